use super::dto::TableResponse;
use super::validation::parse_page;
use super::AppState;
use crate::core::error::ApiResult;
use crate::warehouse::{PagedRecords, TableQuery};
use axum::extract::{Path, Query, State};
use axum::Json;
use std::collections::HashMap;

/// `GET /tables`
pub async fn list_tables(State(state): State<AppState>) -> ApiResult<Json<TableResponse<Vec<String>>>> {
    let tables = state.records.list_tables().await?;
    Ok(Json(TableResponse::ok("tables", "listTables", tables)))
}

/// `GET /:table_name?limit&offset`
pub async fn browse_table(
    State(state): State<AppState>,
    Path(table_name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<TableResponse<PagedRecords>>> {
    // Reject bad identifiers before checking the page so the table error wins
    TableQuery::new(state.records.schema(), &table_name)?;
    let page = parse_page(&params, &state.config.pagination)?;

    let records = state.records.browse(&table_name, page).await?;
    Ok(Json(TableResponse::ok(table_name, "queryBigQuery", records)))
}
