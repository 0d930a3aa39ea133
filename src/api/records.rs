//! Single-entity lookup handlers.

use super::dto::CheckResponse;
use super::validation::JsonBody;
use super::AppState;
use crate::core::error::{ApiError, ApiResult};
use crate::warehouse::{DataAmountFilter, EntityLookup};
use axum::extract::State;
use axum::Json;
use serde_json::Value;

const UNIQUE_ID: &str = "unique_id";

/// `POST /salary/check`
pub async fn check_salary(State(state): State<AppState>, body: JsonBody) -> ApiResult<Json<CheckResponse>> {
    let unique_id = body.required_str(UNIQUE_ID)?;
    let row = state
        .records
        .find_one(EntityLookup::Salary, &unique_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Salary data not found for the provided unique_id"))?;

    Ok(Json(
        CheckResponse::new("Salary data exists", true, "querySalaryByUniqueId")
            .columns(&row, &["salary_net", "salary_gross"]),
    ))
}

/// `POST /submission/check`
pub async fn check_submission(State(state): State<AppState>, body: JsonBody) -> ApiResult<Json<CheckResponse>> {
    let unique_id = body.required_str(UNIQUE_ID)?;
    let row = state
        .records
        .find_one(EntityLookup::Submission, &unique_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Submission data not found for the provided unique_id"))?;

    Ok(Json(
        CheckResponse::new("Submission data exists", true, "querySubmissionByUniqueId").row(row),
    ))
}

/// `POST /additional_position/check`
pub async fn check_additional_position(
    State(state): State<AppState>,
    body: JsonBody,
) -> ApiResult<Json<CheckResponse>> {
    let unique_id = body.required_str(UNIQUE_ID)?;
    let row = state
        .records
        .find_one(EntityLookup::AdditionalPosition, &unique_id)
        .await?
        .ok_or_else(|| {
            ApiError::not_found("Additional position data not found for the provided unique_id")
        })?;

    Ok(Json(
        CheckResponse::new(
            "Additional position data exists",
            true,
            "queryAdditionalPositionByUniqueId",
        )
        .columns(&row, &["additional_position_group", "additional_position"]),
    ))
}

/// `POST /list_tech/check`
pub async fn check_list_tech(State(state): State<AppState>, body: JsonBody) -> ApiResult<Json<CheckResponse>> {
    let unique_id = body.required_str(UNIQUE_ID)?;
    let rows = state.records.find_all(EntityLookup::ListTech, &unique_id).await?;

    if rows.is_empty() {
        return Err(ApiError::not_found(
            "List tech data not found for the provided unique_id",
        ));
    }

    let data: Vec<Value> = rows.into_iter().map(Value::Object).collect();
    Ok(Json(
        CheckResponse::new("List tech data exists", true, "queryListTechByUniqueId").field("data", data),
    ))
}

/// `POST /data_amount/check`
pub async fn check_data_amount(State(state): State<AppState>, body: JsonBody) -> ApiResult<Json<CheckResponse>> {
    let unique_id = body.required_str(UNIQUE_ID)?;
    let row = state
        .records
        .find_one(EntityLookup::DataAmount, &unique_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Data amount not found for the provided unique_id"))?;

    Ok(Json(
        CheckResponse::new("Data amount exists", true, "queryDataAmountByUniqueId").columns(&row, &["amount"]),
    ))
}

/// `POST /data_amount/filter`
pub async fn filter_data_amount(State(state): State<AppState>, body: JsonBody) -> ApiResult<Json<CheckResponse>> {
    let filter = DataAmountFilter {
        position_group: body.optional_str("parameter_position_group")?,
        position: body.optional_str("parameter_position")?,
        seniority: body.required_str("parameter_seniority")?,
        country_salary: body.required_str("parameter_country_salary")?,
        contract_type: body.required_str("parameter_contract_type")?,
        tech: body.optional_str("parameter_tech")?,
    };

    let row = state
        .records
        .data_amount(&filter)
        .await?
        .ok_or_else(|| ApiError::not_found("Data not found for the provided parameters"))?;

    Ok(Json(
        CheckResponse::new("Data with filters exists", true, "queryDataAmountWithFilters").row(row),
    ))
}

/// `POST /user/check`; an unknown email is a normal answer, not a `404`
pub async fn check_user(State(state): State<AppState>, body: JsonBody) -> ApiResult<Json<CheckResponse>> {
    let email = body.required_email("email")?;
    let user = state.records.find_one(EntityLookup::UserByEmail, &email).await?;

    let response = match user {
        Some(row) => CheckResponse::new("User email exists", true, "queryUserByEmail").row(row),
        None => CheckResponse::new("User email does not exist", false, "queryUserByEmail"),
    };
    Ok(Json(response))
}
