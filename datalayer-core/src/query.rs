//! Validated query parameters.
//!
//! Raw parameters arrive as [`QueryParams`] (every field optional, nothing
//! checked). Each query type is built with `TryFrom<QueryParams>`, which
//! normalizes string filters, checks per-field bounds in declaration order and
//! then the cross-field ranges. Out-of-range input is rejected, never clamped.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unvalidated query input, as parsed from a query string or CLI flags.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct QueryParams {
    pub provider: Option<String>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub limit: Option<i64>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub min_bedrooms: Option<i64>,
    pub max_bedrooms: Option<i64>,
    pub metric: Option<String>,
}

/// A rejected query parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Filters shared by every dataset query.
#[derive(Debug, Clone, PartialEq)]
pub struct BaseQuery {
    provider: Option<String>,
    country: Option<String>,
    region: Option<String>,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    limit: u32,
}

impl BaseQuery {
    pub const DEFAULT_LIMIT: u32 = 1000;
    pub const MAX_LIMIT: u32 = 10_000;

    pub fn provider(&self) -> Option<&str> {
        self.provider.as_deref()
    }

    pub fn country(&self) -> Option<&str> {
        self.country.as_deref()
    }

    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    pub fn start_date(&self) -> Option<NaiveDate> {
        self.start_date
    }

    pub fn end_date(&self) -> Option<NaiveDate> {
        self.end_date
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }
}

impl Default for BaseQuery {
    fn default() -> Self {
        Self {
            provider: None,
            country: None,
            region: None,
            start_date: None,
            end_date: None,
            limit: Self::DEFAULT_LIMIT,
        }
    }
}

impl TryFrom<&QueryParams> for BaseQuery {
    type Error = ValidationError;

    fn try_from(raw: &QueryParams) -> Result<Self, Self::Error> {
        let provider = normalize_filter("provider", raw.provider.as_deref(), 1, None)?;
        let country = normalize_filter("country", raw.country.as_deref(), 2, Some(3))?;
        let region = normalize_filter("region", raw.region.as_deref(), 2, None)?;

        let limit = match raw.limit {
            None => Self::DEFAULT_LIMIT,
            Some(n) if (1..=i64::from(Self::MAX_LIMIT)).contains(&n) => n as u32,
            Some(_) => {
                return Err(ValidationError::new(
                    "limit",
                    format!("must be between 1 and {}", Self::MAX_LIMIT),
                ))
            }
        };

        if let (Some(start), Some(end)) = (raw.start_date, raw.end_date) {
            if end < start {
                return Err(ValidationError::new(
                    "end_date",
                    "end_date must be on or after start_date",
                ));
            }
        }

        Ok(Self {
            provider,
            country,
            region,
            start_date: raw.start_date,
            end_date: raw.end_date,
            limit,
        })
    }
}

/// Access to the shared filters of any query type.
pub trait DataQuery {
    fn base(&self) -> &BaseQuery;
}

impl DataQuery for BaseQuery {
    fn base(&self) -> &BaseQuery {
        self
    }
}

/// Price records: base filters plus an inclusive price band.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PriceQuery {
    base: BaseQuery,
    min_price: Option<f64>,
    max_price: Option<f64>,
}

impl PriceQuery {
    pub fn min_price(&self) -> Option<f64> {
        self.min_price
    }

    pub fn max_price(&self) -> Option<f64> {
        self.max_price
    }
}

impl DataQuery for PriceQuery {
    fn base(&self) -> &BaseQuery {
        &self.base
    }
}

impl TryFrom<&QueryParams> for PriceQuery {
    type Error = ValidationError;

    fn try_from(raw: &QueryParams) -> Result<Self, Self::Error> {
        let base = BaseQuery::try_from(raw)?;
        let min_price = non_negative_price("min_price", raw.min_price)?;
        let max_price = non_negative_price("max_price", raw.max_price)?;

        if let (Some(min), Some(max)) = (min_price, max_price) {
            if max < min {
                return Err(ValidationError::new(
                    "max_price",
                    "max_price must be greater than or equal to min_price",
                ));
            }
        }

        Ok(Self {
            base,
            min_price,
            max_price,
        })
    }
}

/// Real-estate listings: base filters plus an inclusive bedroom band.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RealEstateQuery {
    base: BaseQuery,
    min_bedrooms: Option<i64>,
    max_bedrooms: Option<i64>,
}

impl RealEstateQuery {
    pub fn min_bedrooms(&self) -> Option<i64> {
        self.min_bedrooms
    }

    pub fn max_bedrooms(&self) -> Option<i64> {
        self.max_bedrooms
    }
}

impl DataQuery for RealEstateQuery {
    fn base(&self) -> &BaseQuery {
        &self.base
    }
}

impl TryFrom<&QueryParams> for RealEstateQuery {
    type Error = ValidationError;

    fn try_from(raw: &QueryParams) -> Result<Self, Self::Error> {
        let base = BaseQuery::try_from(raw)?;

        for (field, value) in [
            ("min_bedrooms", raw.min_bedrooms),
            ("max_bedrooms", raw.max_bedrooms),
        ] {
            if value.is_some_and(|v| v < 0) {
                return Err(ValidationError::new(
                    field,
                    "must be greater than or equal to 0",
                ));
            }
        }

        if let (Some(min), Some(max)) = (raw.min_bedrooms, raw.max_bedrooms) {
            if max < min {
                return Err(ValidationError::new(
                    "max_bedrooms",
                    "max_bedrooms must be greater than or equal to min_bedrooms",
                ));
            }
        }

        Ok(Self {
            base,
            min_bedrooms: raw.min_bedrooms,
            max_bedrooms: raw.max_bedrooms,
        })
    }
}

/// Aggregations: base filters plus the numeric column to aggregate.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AnalyticsQuery {
    base: BaseQuery,
    metric: Option<String>,
}

impl AnalyticsQuery {
    /// Explicit metric column, if the caller chose one.
    pub fn metric(&self) -> Option<&str> {
        self.metric.as_deref()
    }
}

impl DataQuery for AnalyticsQuery {
    fn base(&self) -> &BaseQuery {
        &self.base
    }
}

impl TryFrom<&QueryParams> for AnalyticsQuery {
    type Error = ValidationError;

    fn try_from(raw: &QueryParams) -> Result<Self, Self::Error> {
        let base = BaseQuery::try_from(raw)?;
        let metric = raw
            .metric
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string);
        Ok(Self { base, metric })
    }
}

macro_rules! impl_try_from_owned {
    ($($ty:ty),*) => {$(
        impl TryFrom<QueryParams> for $ty {
            type Error = ValidationError;

            fn try_from(raw: QueryParams) -> Result<Self, Self::Error> {
                Self::try_from(&raw)
            }
        }
    )*};
}

impl_try_from_owned!(BaseQuery, PriceQuery, RealEstateQuery, AnalyticsQuery);

/// Trim and uppercase a free-text filter; blank input means "no filter".
fn normalize_filter(
    field: &'static str,
    value: Option<&str>,
    min_len: usize,
    max_len: Option<usize>,
) -> Result<Option<String>, ValidationError> {
    let Some(cleaned) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    let normalized = cleaned.to_uppercase();
    let len = normalized.chars().count();

    if len < min_len {
        return Err(ValidationError::new(
            field,
            format!("must have at least {min_len} characters"),
        ));
    }
    if let Some(max) = max_len {
        if len > max {
            return Err(ValidationError::new(
                field,
                format!("must have at most {max} characters"),
            ));
        }
    }
    Ok(Some(normalized))
}

fn non_negative_price(field: &'static str, value: Option<f64>) -> Result<Option<f64>, ValidationError> {
    match value {
        Some(v) if !v.is_finite() => Err(ValidationError::new(field, "must be a finite number")),
        Some(v) if v < 0.0 => Err(ValidationError::new(
            field,
            "must be greater than or equal to 0",
        )),
        other => Ok(other),
    }
}
