use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::Redirect,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::api::bitrix24::{PortalGrant, DEFAULT_EXPIRES_IN};
use crate::error::AppError;
use crate::handlers::request_params::MergedParams;
use crate::models::credential_models::Provider;
use crate::AppState;

/// Portal tokens found in an install or page-open request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalAuth {
    pub domain: String,
    pub grant: PortalGrant,
}

/// `event=ONAPPINSTALL` with an `auth` object. Bitrix24 sends `auth` as
/// nested form keys, but a JSON object or a JSON-encoded string also occurs.
pub fn install_event_auth(params: &MergedParams) -> Option<PortalAuth> {
    if params.get_str("event").as_deref() != Some("ONAPPINSTALL") {
        return None;
    }

    let auth = match params.get("auth")? {
        Value::Object(map) => map.clone(),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => map,
            _ => return None,
        },
        _ => return None,
    };

    let text = |key: &str| -> String {
        match auth.get(key) {
            Some(Value::String(s)) => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        }
    };

    let domain = text("domain");
    let access_token = text("access_token");
    if domain.is_empty() || access_token.is_empty() {
        return None;
    }

    Some(PortalAuth {
        grant: PortalGrant {
            access_token,
            refresh_token: text("refresh_token"),
            expires_in: text("expires_in").parse().unwrap_or(DEFAULT_EXPIRES_IN),
            domain: domain.clone(),
            member_id: text("member_id"),
            client_endpoint: text("client_endpoint"),
        },
        domain,
    })
}

/// `DOMAIN`/`AUTH_ID`/`REFRESH_ID`/`AUTH_EXPIRES` as posted when the app page
/// opens inside the portal.
pub fn placement_auth(params: &MergedParams) -> Option<PortalAuth> {
    let domain = params.get_str("DOMAIN")?;
    let access_token = params.get_str("AUTH_ID")?;

    Some(PortalAuth {
        grant: PortalGrant {
            access_token,
            refresh_token: params.get_str("REFRESH_ID").unwrap_or_default(),
            expires_in: params
                .get_str("AUTH_EXPIRES")
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_EXPIRES_IN),
            domain: domain.clone(),
            member_id: params.get_str("member_id").unwrap_or_default(),
            client_endpoint: String::new(),
        },
        domain,
    })
}

fn store_portal(state: &AppState, auth: PortalAuth) -> Result<String, AppError> {
    let credential = auth.grant.into_credential();
    state.credentials.put(Provider::Bitrix24, &auth.domain, &credential)?;
    tracing::info!("Stored Bitrix24 tokens for portal {}", auth.domain);
    Ok(auth.domain)
}

pub async fn install(
    State(state): State<Arc<AppState>>,
    params: MergedParams,
) -> Result<Json<Value>, AppError> {
    tracing::info!("Install request received");

    let auth = install_event_auth(&params).or_else(|| {
        (params.get_str("PLACEMENT").as_deref() == Some("DEFAULT"))
            .then(|| placement_auth(&params))
            .flatten()
    });

    let Some(auth) = auth else {
        tracing::warn!("Install request without Bitrix24 authorization data");
        return Err(AppError::BadRequest(
            "Missing Bitrix24 authorization data".to_string(),
        ));
    };

    let domain = store_portal(&state, auth)?;
    Ok(Json(json!({
        "installed": true,
        "domain": domain,
    })))
}

/// App page opened from the portal. Stores tokens when present and reports
/// which integrations are authorized.
pub async fn index(
    State(state): State<Arc<AppState>>,
    params: MergedParams,
) -> Result<Json<Value>, AppError> {
    let domain = match placement_auth(&params) {
        Some(auth) => Some(store_portal(&state, auth)?),
        None => params.get_str("DOMAIN").or_else(|| params.get_str("domain")),
    };

    let bitrix_auth = match &domain {
        Some(domain) => state.credentials.get(Provider::Bitrix24, domain)?.is_some(),
        None => false,
    };
    let caller = params.caller();
    let telemost_auth = state.credentials.resolve_telemost(&caller.id)?.is_some();

    Ok(Json(json!({
        "bitrixAuth": bitrix_auth,
        "telemostAuth": telemost_auth,
        "domain": domain,
        "user": caller,
    })))
}

#[derive(Deserialize)]
pub struct BitrixCallback {
    code: Option<String>,
}

pub async fn bitrix_callback(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BitrixCallback>,
) -> Result<Redirect, AppError> {
    let Some(code) = query.code.filter(|c| !c.is_empty()) else {
        return Ok(Redirect::to("/"));
    };

    let grant = state.bitrix.exchange_code(&code).await?;
    if grant.domain.is_empty() {
        return Err(AppError::Upstream(
            "Bitrix24 token response did not name the portal".to_string(),
        ));
    }

    store_portal(&state, PortalAuth { domain: grant.domain.clone(), grant })?;
    Ok(Redirect::to("/"))
}

/// Current portal user via `user.current`, using the stored portal token.
pub async fn portal_user(
    State(state): State<Arc<AppState>>,
    params: MergedParams,
) -> Result<Json<Value>, AppError> {
    let domain = params
        .get_str("domain")
        .or_else(|| params.get_str("DOMAIN"))
        .ok_or_else(|| AppError::BadRequest("domain is required".to_string()))?;

    let result = state
        .bitrix
        .call_method(&state.credentials, &domain, "user.current", Map::new())
        .await?;

    Ok(Json(result))
}
