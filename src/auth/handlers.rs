use axum::{
    extract::{
        rejection::{FormRejection, JsonRejection},
        State,
    },
    http::StatusCode,
    routing::{get, post},
    Form, Json, Router,
};
use tracing::instrument;

use crate::{
    auth::{
        dto::{
            LoginRequest, PublicUser, RegisterRequest, ResetPasswordRequest, StatusResponse,
            TokenForm, TokenResponse,
        },
        errors::AuthError,
        extractors::AuthUser,
    },
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/token", post(token))
        .route("/auth/reset-password", post(reset_password))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<TokenResponse>), AuthError> {
    let Json(payload) = payload?;
    let user = state.auth.register(payload).await?;
    let token = state.auth.issue_session_token(&user)?;
    Ok((StatusCode::CREATED, Json(TokenResponse::bearer(token))))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<TokenResponse>, AuthError> {
    let Json(payload) = payload?;
    let token = state.auth.login(&payload.email, payload.password).await?;
    Ok(Json(TokenResponse::bearer(token)))
}

/// OAuth2 password flow: `username` carries the email.
#[instrument(skip(state, form))]
pub async fn token(
    State(state): State<AppState>,
    form: Result<Form<TokenForm>, FormRejection>,
) -> Result<Json<TokenResponse>, AuthError> {
    let Form(form) = form?;
    let token = state.auth.login(&form.username, form.password).await?;
    Ok(Json(TokenResponse::bearer(token)))
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    payload: Result<Json<ResetPasswordRequest>, JsonRejection>,
) -> Result<Json<StatusResponse>, AuthError> {
    let Json(payload) = payload?;
    state.auth.reset_password(payload).await?;
    Ok(Json(StatusResponse {
        status: "success",
        message: "Password updated",
    }))
}

#[instrument(skip_all)]
pub async fn get_me(AuthUser(user): AuthUser) -> Json<PublicUser> {
    Json(PublicUser::from(user))
}
