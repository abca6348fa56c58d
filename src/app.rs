use std::sync::Arc;

use axum::{
    routing::{get, put},
    Router,
};
use thiserror::Error;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tower_sessions::MemoryStore;
use tracing::Level;

use crate::api::bitrix24::{Bitrix24Client, Bitrix24Error};
use crate::api::telemost::{ConferenceApi, TelemostClient, TelemostError};
use crate::api::yandex_oauth::{OAuthError, TokenRefresher, YandexOAuth};
use crate::config::Config;
use crate::db::{establish_pool, DbError, DbPool};
use crate::handlers::{bitrix24_auth, conference_handlers, telemost_auth, user_handlers};
use crate::repositories::conference_repository::ConferenceRepository;
use crate::repositories::credential_repository::CredentialStore;
use crate::utils::conference_sync::ConferenceSync;
use crate::utils::encryption::{EncryptionError, TokenCipher};

const POOL_SIZE: u32 = 8;

pub struct AppState {
    pub db_pool: DbPool,
    pub repository: Arc<ConferenceRepository>,
    pub credentials: Arc<CredentialStore>,
    pub sync: ConferenceSync,
    pub bitrix: Bitrix24Client,
    pub yandex_oauth: Option<Arc<YandexOAuth>>,
    pub session_store: MemoryStore,
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Database(#[from] DbError),
    #[error("Invalid ENCRYPTION_KEY: {0}")]
    Encryption(#[from] EncryptionError),
    #[error(transparent)]
    Telemost(#[from] TelemostError),
    #[error(transparent)]
    Bitrix24(#[from] Bitrix24Error),
    #[error(transparent)]
    OAuth(#[from] OAuthError),
}

/// Opens the database and wires every client from `config`.
pub fn build_state(config: &Config) -> Result<Arc<AppState>, StartupError> {
    let pool = establish_pool(&config.database_url, POOL_SIZE)?;
    let cipher = TokenCipher::from_base64_key(&config.encryption_key)?;

    let repository = Arc::new(ConferenceRepository::new(pool.clone(), config.telemost_join_base.clone()));
    let credentials = Arc::new(CredentialStore::new(
        pool.clone(),
        cipher,
        config.yandex_oauth_token.clone(),
    ));

    let api: Arc<dyn ConferenceApi> = Arc::new(TelemostClient::new(
        &config.telemost_api_base,
        config.request_timeout,
    )?);

    let yandex_oauth = match config.yandex_oauth_settings() {
        Some(settings) => Some(Arc::new(YandexOAuth::new(&settings)?)),
        None => {
            tracing::warn!("YANDEX_CLIENT_ID/YANDEX_CLIENT_SECRET not set, Yandex login disabled");
            None
        }
    };
    if !credentials.has_service_token() {
        tracing::info!("No YANDEX_OAUTH_TOKEN configured, callers without a session token work locally");
    }

    let refresher = yandex_oauth
        .clone()
        .map(|oauth| oauth as Arc<dyn TokenRefresher>);
    let sync = ConferenceSync::new(repository.clone(), credentials.clone(), api, refresher);

    Ok(Arc::new(AppState {
        db_pool: pool,
        repository,
        credentials,
        sync,
        bitrix: Bitrix24Client::new(&config.bitrix_settings())?,
        yandex_oauth,
        session_store: MemoryStore::default(),
    }))
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        .route(
            "/api/conferences",
            get(conference_handlers::list_conferences).post(conference_handlers::create_conference),
        )
        .route(
            "/api/conferences/{id}",
            put(conference_handlers::update_conference).delete(conference_handlers::delete_conference),
        )
        .route("/api/users/current", get(user_handlers::current_user))
        .route("/api/admin/conferences", get(conference_handlers::list_all_conferences))
        .route("/api/portal/user", get(bitrix24_auth::portal_user));

    let page_routes = Router::new()
        .route("/", get(bitrix24_auth::index).post(bitrix24_auth::index))
        .route("/index", get(bitrix24_auth::index).post(bitrix24_auth::index))
        .route("/install", get(bitrix24_auth::install).post(bitrix24_auth::install))
        .route("/auth/bitrix24", get(bitrix24_auth::bitrix_callback))
        .route("/auth/yandex", get(telemost_auth::yandex_login))
        .route("/auth/yandex/callback", get(telemost_auth::yandex_callback))
        .route("/logout", get(telemost_auth::logout).post(telemost_auth::logout))
        .route("/health", get(user_handlers::health));

    Router::new()
        .merge(api_routes)
        .merge(page_routes)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}
