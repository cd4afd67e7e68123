//! Aggregation and drilldown service
//!
//! Ties the query engine to storage: loads the tenant's field catalog,
//! compiles the filter, runs the statement under the configured deadline
//! and maps rows back. Stacks are computed by pinning the filter to each
//! top-level bucket and aggregating again, a bounded number at a time.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use futures::{stream, FutureExt, StreamExt, TryStreamExt};
use tracing::{debug, info};

use crate::config::QueryConfig;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{AggregationRecord, AggregationResponse, Page};
use crate::query::builder::{self, AggregationPlan};
use crate::query::compiler::Compiler;
use crate::query::{mapper, Domain, DomainFilter, Statement};
use crate::registry::{FieldCatalog, FieldRegistry};

/// Runs aggregations and list calls for one domain
pub struct AggregationService<D: Domain> {
    db: Database,
    registry: Arc<dyn FieldRegistry>,
    config: QueryConfig,
    _domain: PhantomData<fn() -> D>,
}

impl<D: Domain> Clone for AggregationService<D> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            registry: Arc::clone(&self.registry),
            config: self.config.clone(),
            _domain: PhantomData,
        }
    }
}

impl<D: Domain> AggregationService<D> {
    /// Create a service for domain `D`
    pub fn new(db: Database, registry: Arc<dyn FieldRegistry>, config: QueryConfig) -> Self {
        Self {
            db,
            registry,
            config,
            _domain: PhantomData,
        }
    }

    /// Aggregate by the filter's `across`, with nested stacks when requested
    pub async fn aggregate(&self, filter: &DomainFilter<D>) -> Result<AggregationResponse> {
        let started = Instant::now();
        let cache_hash = filter.cache_hash()?;
        let catalog = self.registry.catalog(&filter.tenant).await?;

        let records = self.aggregate_level(filter.clone(), &catalog).await?;
        let total_count = i64::try_from(records.len()).unwrap_or(i64::MAX);

        info!(
            tenant = %filter.tenant,
            domain = D::NAME,
            across = %filter.across,
            calculation = %filter.calculation.unwrap_or(D::DEFAULT_CALCULATION),
            cache_hash = %cache_hash,
            buckets = records.len(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Aggregation complete"
        );

        Ok(AggregationResponse {
            records,
            total_count,
            cache_hash,
        })
    }

    fn aggregate_level<'a>(
        &'a self,
        filter: DomainFilter<D>,
        catalog: &'a FieldCatalog,
    ) -> BoxFuture<'a, Result<Vec<AggregationRecord>>> {
        async move {
            let AggregationPlan { statement, layout } = {
                let compiler = Compiler::<D>::new(&filter, catalog)?;
                builder::aggregation(&compiler)?
            };
            log_statement(&statement);

            let rows = self
                .db
                .timed("aggregate", statement.query().fetch_all(self.db.pool()))
                .await?;
            let mut records = rows
                .iter()
                .map(|row| mapper::record(row, &layout))
                .collect::<Result<Vec<_>>>()?;

            if filter.stacks.is_empty() || records.is_empty() {
                return Ok(records);
            }

            let nested = records
                .iter()
                .map(|bucket| stack_filter::<D>(&filter, bucket))
                .collect::<Result<Vec<_>>>()?;
            let stacks: Vec<Vec<AggregationRecord>> = stream::iter(nested)
                .map(|next| self.aggregate_level(next, catalog))
                .buffered(self.config.stack_parallelism.max(1))
                .try_collect()
                .await?;

            for (record, stack) in records.iter_mut().zip(stacks) {
                record.stacks = stack;
            }
            Ok(records)
        }
        .boxed()
    }

    /// One page of records matching the filter
    pub async fn list(&self, filter: &DomainFilter<D>) -> Result<Page<D::Record>> {
        let catalog = self.registry.catalog(&filter.tenant).await?;
        let page_size = match filter.page_size {
            Some(0) | None => self.config.default_page_size,
            Some(size) => size.min(self.config.max_page_size),
        };

        let plan = {
            let compiler = Compiler::<D>::new(filter, &catalog)?;
            builder::list(&compiler, filter.page, page_size)?
        };
        log_statement(&plan.count);
        log_statement(&plan.rows);

        let total_count: i64 = self
            .db
            .timed("list_count", plan.count.query_scalar().fetch_one(self.db.pool()))
            .await?;
        let rows = self
            .db
            .timed("list_rows", plan.rows.query().fetch_all(self.db.pool()))
            .await?;
        let records = rows.iter().map(D::map_row).collect::<Result<Vec<_>>>()?;

        debug!(
            tenant = %filter.tenant,
            domain = D::NAME,
            total_count,
            returned = records.len(),
            "List complete"
        );

        Ok(Page {
            records,
            total_count,
            page: filter.page,
            page_size,
        })
    }

    /// Records behind one top-level bucket of an aggregation
    pub async fn drilldown(&self, filter: &DomainFilter<D>, bucket: &AggregationRecord) -> Result<Page<D::Record>> {
        let pinned = filter.pinned_to(&filter.across, false, bucket)?;
        self.list(&pinned).await
    }

    /// Records behind one stack bucket nested in a top-level bucket
    pub async fn drilldown_stack(
        &self,
        filter: &DomainFilter<D>,
        bucket: &AggregationRecord,
        stack: &AggregationRecord,
    ) -> Result<Page<D::Record>> {
        let across = filter
            .stacks
            .first()
            .copied()
            .ok_or_else(|| Error::configuration("filter has no stack dimension"))?;
        let pinned = filter
            .pinned_to(&filter.across, false, bucket)?
            .pinned_to(&across, true, stack)?;
        self.list(&pinned).await
    }
}

/// Filter for the stacks nested in `bucket`: pinned to the bucket and
/// grouped by the first stack dimension
fn stack_filter<D: Domain>(filter: &DomainFilter<D>, bucket: &AggregationRecord) -> Result<DomainFilter<D>> {
    let mut next = filter.pinned_to(&filter.across, false, bucket)?;
    next.across = filter.stacks[0];
    next.custom_across = filter.custom_stack.clone();
    next.attribute_across = filter.attribute_stack.clone();
    next.stacks = filter.stacks[1..].to_vec();
    // sort keys name the top-level dimension
    next.sort.clear();
    Ok(next)
}

fn log_statement(statement: &Statement) {
    debug!(sql = %statement.sql, params = statement.params.len(), "Generated SQL");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::issues::{IssueField, Issues};
    use crate::models::{Across, Filter, FieldRef, SortConfig};

    #[test]
    fn test_stack_filter_pins_bucket_and_moves_stack() {
        let filter: DomainFilter<Issues> = Filter::new("acme")
            .across(Across::Field(IssueField::Project))
            .stack(Across::Field(IssueField::Status))
            .sort(SortConfig::asc("project"))
            .across_limit(3);
        let bucket = AggregationRecord {
            key: Some("PLAT".into()),
            ..AggregationRecord::default()
        };

        let next = stack_filter::<Issues>(&filter, &bucket).unwrap();
        assert_eq!(next.across, Across::Field(IssueField::Status));
        assert!(next.stacks.is_empty());
        assert!(next.sort.is_empty());
        assert_eq!(next.across_limit, 0);
        assert_eq!(next.pinned.len(), 1);
        assert_eq!(next.pinned[0].field, FieldRef::Field(IssueField::Project));
        assert_eq!(next.pinned[0].value, "PLAT");
    }
}
