//! Dataset queries over the clean tier.
//!
//! Every call re-reads the partition listing and scans the (disk-cached)
//! parquet files; results are never memoized. Optional filters are gated on
//! the dataset's [`ColumnSet`], so a dataset missing `region` simply skips the
//! region filter. Required columns (`provider` for summaries and the provider
//! list, the summary metric) fail with `MissingColumn`.

use super::cache::CacheManager;
use super::error::DataAccessError;
use super::frame::{frame_err, DatasetFrame, Row};
use super::source::{RemoteFetcher, SourceResolver};
use crate::config::Settings;
use crate::query::{AnalyticsQuery, BaseQuery, DataQuery, PriceQuery, RealEstateQuery};
use polars::prelude::*;
use rayon::prelude::*;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

pub const PRICES_DATASET: &str = "prices";
pub const REALESTATE_DATASET: &str = "realestate";
pub const PROVIDERS_DATASET: &str = "providers";

/// One provider group of an aggregate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderSummary {
    pub provider: Option<String>,
    pub avg: Option<f64>,
    pub total: Option<f64>,
    pub count: u64,
}

/// Read-only query entry point for the clean-tier datasets.
pub struct DataRepository {
    resolver: SourceResolver,
}

impl DataRepository {
    pub fn new(settings: &Settings, cache: CacheManager, fetcher: Arc<dyn RemoteFetcher>) -> Self {
        Self::from_resolver(SourceResolver::new(
            settings.base_path(),
            settings.blob_prefix_clean.clone(),
            cache,
            fetcher,
        ))
    }

    pub fn from_resolver(resolver: SourceResolver) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &SourceResolver {
        &self.resolver
    }

    /// Union of every partition file of `dataset`, unexecuted.
    pub fn load_lazy_frame(&self, dataset: &str) -> Result<DatasetFrame, DataAccessError> {
        let files = self.resolver.list_partition_files(dataset)?;
        if files.is_empty() {
            return Err(DataAccessError::NoFiles {
                dataset: dataset.to_string(),
            });
        }

        let local: Vec<PathBuf> = files
            .par_iter()
            .map(|f| self.resolver.resolve_to_local(f))
            .collect::<Result<Vec<_>, _>>()?;

        let mut frames = local
            .iter()
            .map(|path| LazyFrame::scan_parquet(path, partition_scan_args()).map_err(frame_err))
            .collect::<Result<Vec<_>, _>>()?;

        let plan = if frames.len() == 1 {
            frames.remove(0)
        } else {
            concat(frames, UnionArgs::default()).map_err(frame_err)?
        };

        debug!(dataset, files = local.len(), "loaded dataset");
        DatasetFrame::new(dataset, plan)
    }

    /// Equality filters, date bounds and the row cap shared by every query.
    ///
    /// The cap comes last here, so domain bounds and aggregations applied by
    /// the caller only see the first `limit` rows that passed these filters.
    pub fn apply_common_filters(&self, frame: DatasetFrame, query: &BaseQuery) -> DatasetFrame {
        let mut frame = frame;

        for (column, value) in [
            ("provider", query.provider()),
            ("country", query.country()),
            ("region", query.region()),
        ] {
            if let Some(value) = value {
                if frame.has_column(column) {
                    frame = frame.filter(col(column).eq(lit(value)));
                }
            }
        }

        if frame.has_column("date") {
            // Non-strict: unparseable dates become null and fail both bounds
            frame = frame.with_column(col("date").cast(DataType::Date));
            if let Some(start) = query.start_date() {
                frame = frame.filter(col("date").gt_eq(lit(start)));
            }
            if let Some(end) = query.end_date() {
                frame = frame.filter(col("date").lt_eq(lit(end)));
            }
        }

        frame.limit(query.limit())
    }

    /// Rows of any dataset, common filters only.
    pub fn fetch_dataset<Q: DataQuery>(
        &self,
        dataset: &str,
        query: &Q,
    ) -> Result<Vec<Row>, DataAccessError> {
        let frame = self.load_lazy_frame(dataset)?;
        self.apply_common_filters(frame, query.base()).collect_rows()
    }

    pub fn fetch_prices(&self, query: &PriceQuery) -> Result<Vec<Row>, DataAccessError> {
        let frame = self.load_lazy_frame(PRICES_DATASET)?;
        let mut frame = self.apply_common_filters(frame, query.base());

        if frame.has_column("price") {
            if let Some(min) = query.min_price() {
                frame = frame.filter(col("price").gt_eq(lit(min)));
            }
            if let Some(max) = query.max_price() {
                frame = frame.filter(col("price").lt_eq(lit(max)));
            }
        }
        frame.collect_rows()
    }

    pub fn fetch_realestate(&self, query: &RealEstateQuery) -> Result<Vec<Row>, DataAccessError> {
        let frame = self.load_lazy_frame(REALESTATE_DATASET)?;
        let mut frame = self.apply_common_filters(frame, query.base());

        if frame.has_column("bedrooms") {
            if let Some(min) = query.min_bedrooms() {
                frame = frame.filter(col("bedrooms").gt_eq(lit(min)));
            }
            if let Some(max) = query.max_bedrooms() {
                frame = frame.filter(col("bedrooms").lt_eq(lit(max)));
            }
        }
        frame.collect_rows()
    }

    /// Mean, sum and count of a metric per provider, sorted by provider.
    ///
    /// The metric is `query.metric()`, else `price` when present, else `value`.
    pub fn fetch_provider_summary(
        &self,
        dataset: &str,
        query: &AnalyticsQuery,
    ) -> Result<Vec<ProviderSummary>, DataAccessError> {
        let frame = self.load_lazy_frame(dataset)?;
        let frame = self.apply_common_filters(frame, query.base());

        let metric = match query.metric() {
            Some(m) => m.to_string(),
            None if frame.has_column("price") => "price".to_string(),
            None => "value".to_string(),
        };
        frame.require_column(&metric)?;
        frame.require_column("provider")?;

        let df = frame
            .map_plan(|plan| {
                plan.group_by([col("provider")])
                    .agg([
                        col(metric.as_str()).mean().alias("avg"),
                        col(metric.as_str()).sum().cast(DataType::Float64).alias("total"),
                        len().cast(DataType::UInt64).alias("count"),
                    ])
                    .sort(["provider"], SortMultipleOptions::default())
            })
            .collect()?;

        summaries_from_frame(&df)
    }

    /// Distinct non-null provider names, ascending.
    pub fn list_providers(&self) -> Result<Vec<String>, DataAccessError> {
        let frame = self.load_lazy_frame(PROVIDERS_DATASET)?;
        frame.require_column("provider")?;

        let df = frame
            .map_plan(|plan| {
                plan.select([col("provider")
                    .cast(DataType::String)
                    .drop_nulls()
                    .unique()
                    .sort(SortOptions::default())])
            })
            .collect()?;

        let names = string_column(&df, "provider")?
            .into_iter()
            .flatten()
            .map(str::to_string)
            .collect();
        Ok(names)
    }
}

/// Scan options for one partition file.
///
/// Hive inference is off: `ingest_date=...` directories are storage layout,
/// not data, and must not add a column.
fn partition_scan_args() -> ScanArgsParquet {
    let mut args = ScanArgsParquet::default();
    args.hive_options.enabled = Some(false);
    args
}

fn string_column<'a>(df: &'a DataFrame, name: &str) -> Result<&'a StringChunked, DataAccessError> {
    df.column(name)
        .and_then(|c| c.as_materialized_series().str())
        .map_err(frame_err)
}

fn summaries_from_frame(df: &DataFrame) -> Result<Vec<ProviderSummary>, DataAccessError> {
    let provider = df
        .column("provider")
        .and_then(|c| c.cast(&DataType::String))
        .map_err(frame_err)?;
    let provider = provider.as_materialized_series().str().map_err(frame_err)?;

    let numeric = |name: &str, dtype: DataType| -> Result<Series, DataAccessError> {
        df.column(name)
            .and_then(|c| c.cast(&dtype))
            .map(|c| c.as_materialized_series().clone())
            .map_err(frame_err)
    };
    let avg = numeric("avg", DataType::Float64)?;
    let total = numeric("total", DataType::Float64)?;
    let count = numeric("count", DataType::UInt64)?;
    let (avg, total, count) = (
        avg.f64().map_err(frame_err)?,
        total.f64().map_err(frame_err)?,
        count.u64().map_err(frame_err)?,
    );

    let finite = |v: Option<f64>| v.filter(|x| x.is_finite());
    Ok((0..df.height())
        .map(|i| ProviderSummary {
            provider: provider.get(i).map(str::to_string),
            avg: finite(avg.get(i)),
            total: finite(total.get(i)),
            count: count.get(i).unwrap_or(0),
        })
        .collect())
}
