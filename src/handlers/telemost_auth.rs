use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::Redirect,
    Json,
};
use oauth2::{CsrfToken, PkceCodeVerifier};
use serde::Deserialize;
use serde_json::{json, Value};
use time::OffsetDateTime;
use tower_sessions::{
    session::{Id, Record},
    session_store::SessionStore,
};
use uuid::Uuid;

use crate::error::AppError;
use crate::handlers::request_params::MergedParams;
use crate::models::credential_models::{Credential, Provider};
use crate::utils::time::now_seconds;
use crate::AppState;

/// Starts the Yandex OAuth flow for the caller. The PKCE verifier and CSRF
/// token wait in the session store until the callback.
pub async fn yandex_login(
    State(state): State<Arc<AppState>>,
    params: MergedParams,
) -> Result<Redirect, AppError> {
    let oauth = state
        .yandex_oauth
        .as_ref()
        .ok_or_else(|| AppError::NotConfigured("Yandex OAuth is not configured".to_string()))?;
    let caller = params.caller();

    let csrf_token = CsrfToken::new_random();
    let mut record = Record {
        id: Id(Uuid::new_v4().as_u128() as i128),
        data: Default::default(),
        expiry_date: OffsetDateTime::now_utc() + time::Duration::minutes(15),
    };
    record.data.insert("csrf_token".to_string(), json!(csrf_token.secret()));
    record.data.insert("user_id".to_string(), json!(caller.id));

    let state_token = format!("{}:{}", record.id.0, csrf_token.secret());
    let (auth_url, pkce_verifier) = oauth.authorize_url(state_token);
    record.data.insert("pkce_verifier".to_string(), json!(pkce_verifier.secret()));

    state.session_store.create(&mut record).await.map_err(|e| {
        AppError::Internal(format!("Failed to store session record: {}", e))
    })?;

    tracing::info!("Starting Yandex OAuth for {}", caller.id);
    Ok(Redirect::to(auth_url.as_str()))
}

#[derive(Deserialize)]
pub struct YandexCallback {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

pub async fn yandex_callback(
    State(state): State<Arc<AppState>>,
    Query(query): Query<YandexCallback>,
) -> Result<Redirect, AppError> {
    if let Some(error) = query.error {
        tracing::warn!("Yandex OAuth denied: {}", error);
        return Ok(Redirect::to("/"));
    }
    let oauth = state
        .yandex_oauth
        .as_ref()
        .ok_or_else(|| AppError::NotConfigured("Yandex OAuth is not configured".to_string()))?;
    let (Some(code), Some(state_param)) = (query.code, query.state) else {
        return Err(AppError::BadRequest("Missing code or state".to_string()));
    };

    let (session_id, state_csrf) = state_param
        .split_once(':')
        .ok_or_else(|| AppError::BadRequest("Invalid state format".to_string()))?;
    let session_id = Id(session_id
        .parse::<i128>()
        .map_err(|_| AppError::BadRequest("Invalid session ID format".to_string()))?);

    let record = state
        .session_store
        .load(&session_id)
        .await
        .map_err(|e| AppError::Internal(format!("Session store error: {}", e)))?
        .ok_or_else(|| AppError::BadRequest("Session record not found".to_string()))?;

    let field = |key: &str| record.data.get(key).and_then(Value::as_str).map(String::from);

    if field("csrf_token").as_deref() != Some(state_csrf) {
        tracing::error!("CSRF token mismatch");
        return Err(AppError::BadRequest("CSRF token mismatch".to_string()));
    }
    let pkce_verifier = field("pkce_verifier")
        .map(PkceCodeVerifier::new)
        .ok_or_else(|| AppError::BadRequest("PKCE verifier missing from session".to_string()))?;
    let user_id = field("user_id")
        .ok_or_else(|| AppError::BadRequest("User ID not found in session".to_string()))?;

    let grant = oauth.exchange_code(code, pkce_verifier).await?;

    if let Err(e) = state.session_store.delete(&session_id).await {
        tracing::error!("Failed to delete session record: {}", e);
    }

    let credential = Credential::new(
        grant.access_token,
        grant.refresh_token.unwrap_or_default(),
        grant.expires_in.map(|secs| now_seconds() + secs).unwrap_or(0),
    );
    state.credentials.put(Provider::Telemost, &user_id, &credential)?;

    tracing::info!("Stored Telemost token for {}", user_id);
    Ok(Redirect::to("/"))
}

/// Forgets the caller's own Telemost token. The service token, if any,
/// still applies afterwards.
pub async fn logout(
    State(state): State<Arc<AppState>>,
    params: MergedParams,
) -> Result<Json<Value>, AppError> {
    let caller = params.caller();
    let cleared = state.credentials.clear(Provider::Telemost, &caller.id)?;

    Ok(Json(json!({
        "success": true,
        "cleared": cleared,
    })))
}
