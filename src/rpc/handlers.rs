use super::types::*;
use crate::api::*;
use crate::coordinator::ArenaRequestHandler;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

type AppState = Arc<ArenaRequestHandler>;

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let status = match &self.detail {
            Some(_) => StatusCode::BAD_REQUEST,
            None => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

pub async fn health() -> &'static str {
    "OK"
}

pub async fn get_status(State(handler): State<AppState>) -> Result<Json<Vec<RoundState>>, ErrorResponse> {
    Ok(Json(handler.get_status().await?))
}

pub async fn register_input(
    State(handler): State<AppState>,
    Json(req): Json<InputRegistrationRequest>,
) -> Result<Json<InputRegistrationResponse>, ErrorResponse> {
    Ok(Json(handler.register_input(req).await?))
}

pub async fn confirm_connection(
    State(handler): State<AppState>,
    Json(req): Json<ConnectionConfirmationRequest>,
) -> Result<Json<ConnectionConfirmationResponse>, ErrorResponse> {
    Ok(Json(handler.confirm_connection(req).await?))
}

pub async fn register_output(
    State(handler): State<AppState>,
    Json(req): Json<OutputRegistrationRequest>,
) -> Result<Json<OutputRegistrationResponse>, ErrorResponse> {
    Ok(Json(handler.register_output(req).await?))
}

pub async fn reissue_credentials(
    State(handler): State<AppState>,
    Json(req): Json<ReissueCredentialRequest>,
) -> Result<Json<ReissueCredentialResponse>, ErrorResponse> {
    Ok(Json(handler.reissue_credentials(req).await?))
}

pub async fn remove_input(
    State(handler): State<AppState>,
    Json(req): Json<InputsRemovalRequest>,
) -> Result<Json<()>, ErrorResponse> {
    handler.remove_input(req).await?;
    Ok(Json(()))
}

pub async fn sign_transaction(
    State(handler): State<AppState>,
    Json(req): Json<TransactionSignaturesRequest>,
) -> Result<Json<()>, ErrorResponse> {
    handler.sign_transaction(req).await?;
    Ok(Json(()))
}
