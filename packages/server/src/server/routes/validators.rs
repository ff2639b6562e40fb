use axum::{extract::Extension, Json};
use serde::Serialize;
use tagcheck_core::ValidatorDescriptor;

use crate::server::app::AppState;

#[derive(Serialize)]
pub struct ValidatorsResponse {
    validators: Vec<ValidatorDescriptor>,
}

/// Catalog of registered validators, in execution order.
pub async fn list_validators_handler(
    Extension(state): Extension<AppState>,
) -> Json<ValidatorsResponse> {
    Json(ValidatorsResponse {
        validators: state.controller.registry().descriptors(),
    })
}
