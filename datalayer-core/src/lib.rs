//! Datalayer Core: read-only query engine over the clean storage tier.
//!
//! This crate contains everything below the HTTP surface:
//! - Settings loaded once from defaults, an optional TOML file and the environment
//! - TTL byte cache keyed by sanitized strings
//! - Dataset discovery and remote partition download
//! - Validated query types (prices, real estate, analytics)
//! - Lazy, schema-tolerant filtering and provider aggregates (polars)
//! - Bearer-token gate backed by a refreshable secret source

pub mod auth;
pub mod config;
pub mod data;
pub mod query;

pub use auth::{AuthError, FileSecretSource, SecretError, SecretSource, TokenProvider, TokenState};
pub use config::{ConfigError, LogFormat, Settings};
pub use data::{
    CacheManager, DataAccessError, DataRepository, HttpFetcher, ProviderSummary, RemoteFetcher,
    Row, SourceResolver, TransportError,
};
pub use query::{
    AnalyticsQuery, BaseQuery, DataQuery, PriceQuery, QueryParams, RealEstateQuery,
    ValidationError,
};
