//! Typed lookups over a [`Warehouse`].

use super::{DataAmountFilter, EntityLookup, Page, Row, TableQuery, Warehouse, WarehouseResult};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// One page of a table browse
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PagedRecords {
    pub records: Vec<Row>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub limit: u32,
    pub offset: u64,
    pub has_more: bool,
}

#[derive(Clone)]
pub struct RecordRepository {
    warehouse: Arc<dyn Warehouse>,
    schema: String,
}

impl RecordRepository {
    pub fn new(warehouse: Arc<dyn Warehouse>, schema: impl Into<String>) -> Self {
        Self {
            warehouse,
            schema: schema.into(),
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub async fn list_tables(&self) -> WarehouseResult<Vec<String>> {
        self.warehouse.list_tables().await
    }

    pub async fn browse(&self, table: &str, page: Page) -> WarehouseResult<PagedRecords> {
        let query = TableQuery::new(&self.schema, table)?.page(page);
        let mut records = self.warehouse.query(&query).await?;

        let has_more = records.len() > page.limit as usize;
        records.truncate(page.limit as usize);
        debug!(table, rows = records.len(), has_more, "Browsed table");

        Ok(PagedRecords {
            records,
            pagination: Pagination {
                limit: page.limit,
                offset: page.offset,
                has_more,
            },
        })
    }

    /// First row of a single-entity lookup
    pub async fn find_one(&self, lookup: EntityLookup, key: &str) -> WarehouseResult<Option<Row>> {
        let rows = self.find_all(lookup, key).await?;
        Ok(rows.into_iter().next())
    }

    pub async fn find_all(&self, lookup: EntityLookup, key: &str) -> WarehouseResult<Vec<Row>> {
        let query = lookup.query(&self.schema, key)?;
        self.warehouse.query(&query).await
    }

    pub async fn data_amount(&self, filter: &DataAmountFilter) -> WarehouseResult<Option<Row>> {
        let query = filter.query(&self.schema)?;
        let rows = self.warehouse.query(&query).await?;
        Ok(rows.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::{Query, WarehouseError};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    struct Recording {
        rows: Vec<Row>,
        queries: Mutex<Vec<Query>>,
    }

    impl Recording {
        fn with_rows(count: usize) -> Arc<Self> {
            let rows = (0..count)
                .map(|i| json!({ "id": i }).as_object().cloned().unwrap())
                .collect();
            Arc::new(Self {
                rows,
                queries: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Warehouse for Recording {
        async fn list_tables(&self) -> WarehouseResult<Vec<String>> {
            Ok(vec!["salary".into(), "user".into()])
        }

        async fn query(&self, query: &Query) -> WarehouseResult<Vec<Row>> {
            self.queries.lock().unwrap().push(query.clone());
            Ok(self.rows.clone())
        }
    }

    #[tokio::test]
    async fn test_browse_detects_more_rows() {
        let warehouse = Recording::with_rows(3);
        let repo = RecordRepository::new(warehouse.clone(), "app_demo");

        let page = repo.browse("salary", Page { limit: 2, offset: 4 }).await.unwrap();
        assert_eq!(page.records.len(), 2);
        assert!(page.pagination.has_more);
        assert_eq!(page.pagination.offset, 4);
        assert_eq!(
            warehouse.queries.lock().unwrap()[0].sql,
            "SELECT * FROM `app_demo.salary` LIMIT 3 OFFSET 4"
        );

        let value = serde_json::to_value(&page).unwrap();
        assert_eq!(value["pagination"]["hasMore"], true);
    }

    #[tokio::test]
    async fn test_browse_last_page() {
        let repo = RecordRepository::new(Recording::with_rows(2), "app_demo");
        let page = repo.browse("salary", Page { limit: 2, offset: 0 }).await.unwrap();
        assert_eq!(page.records.len(), 2);
        assert!(!page.pagination.has_more);
    }

    #[tokio::test]
    async fn test_browse_rejects_bad_identifiers_before_querying() {
        let warehouse = Recording::with_rows(1);
        let repo = RecordRepository::new(warehouse.clone(), "app_demo");

        let err = repo.browse("x;--", Page { limit: 1, offset: 0 }).await.unwrap_err();
        assert!(matches!(err, WarehouseError::InvalidIdentifier { .. }));
        assert!(warehouse.queries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_find_one_and_empty_results() {
        let repo = RecordRepository::new(Recording::with_rows(0), "app_demo");
        assert!(repo.find_one(EntityLookup::Salary, "u-1").await.unwrap().is_none());

        let repo = RecordRepository::new(Recording::with_rows(2), "app_demo");
        let row = repo.find_one(EntityLookup::Salary, "u-1").await.unwrap().unwrap();
        assert_eq!(row["id"], 0);
    }
}
