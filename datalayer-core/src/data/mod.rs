//! Dataset discovery, byte caching and lazy querying

pub mod cache;
pub mod error;
pub mod frame;
pub mod repository;
pub mod source;

pub use cache::{sanitize_key, CacheError, CacheManager, CacheStatus};
pub use error::{DataAccessError, TransportError};
pub use frame::{dataframe_to_rows, ColumnSet, DatasetFrame, Row};
pub use repository::{
    DataRepository, ProviderSummary, PRICES_DATASET, PROVIDERS_DATASET, REALESTATE_DATASET,
};
pub use source::{HttpFetcher, RemoteFetcher, SourceResolver, DEFAULT_DOWNLOAD_TIMEOUT};
