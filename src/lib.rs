pub mod handlers {
    pub mod bitrix24_auth;
    pub mod conference_handlers;
    pub mod request_params;
    pub mod telemost_auth;
    pub mod user_handlers;
}
pub mod utils {
    pub mod conference_sync;
    pub mod encryption;
    pub mod time;
}
pub mod api {
    pub mod bitrix24;
    pub mod telemost;
    pub mod yandex_oauth;
}
pub mod models {
    pub mod conference_models;
    pub mod credential_models;
}
pub mod repositories {
    pub mod conference_repository;
    pub mod credential_repository;
}
pub mod app;
pub mod config;
pub mod db;
pub mod error;
pub mod schema;

pub use app::{build_router, build_state, AppState};
pub use config::Config;
pub use db::DbPool;
