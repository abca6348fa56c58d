use std::time::Duration;

use async_trait::async_trait;
use oauth2::{
    basic::BasicClient, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken,
    EndpointNotSet, EndpointSet, PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, RefreshToken,
    Scope, TokenResponse, TokenUrl,
};
use thiserror::Error;
use url::Url;

pub const DEFAULT_AUTH_URL: &str = "https://oauth.yandex.ru/authorize";
pub const DEFAULT_TOKEN_URL: &str = "https://oauth.yandex.ru/token";
pub const TELEMOST_SCOPE: &str = "telemost:manage";

type YandexOAuthClient = BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("Invalid OAuth endpoint: {0}")]
    Endpoint(String),
    #[error("Failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Token request failed: {0}")]
    Token(String),
}

/// Tokens returned by a code exchange or a refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Lifetime in seconds, when the provider reports one.
    pub expires_in: Option<i64>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, OAuthError>;
}

#[derive(Debug, Clone)]
pub struct YandexOAuthSettings {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub auth_url: String,
    pub token_url: String,
    pub timeout: Duration,
}

pub struct YandexOAuth {
    client: YandexOAuthClient,
    http: reqwest::Client,
}

impl YandexOAuth {
    pub fn new(settings: &YandexOAuthSettings) -> Result<Self, OAuthError> {
        let client = BasicClient::new(ClientId::new(settings.client_id.clone()))
            .set_client_secret(ClientSecret::new(settings.client_secret.clone()))
            .set_auth_uri(AuthUrl::new(settings.auth_url.clone()).map_err(|e| OAuthError::Endpoint(e.to_string()))?)
            .set_token_uri(TokenUrl::new(settings.token_url.clone()).map_err(|e| OAuthError::Endpoint(e.to_string()))?)
            .set_redirect_uri(
                RedirectUrl::new(settings.redirect_uri.clone()).map_err(|e| OAuthError::Endpoint(e.to_string()))?,
            );

        let http = reqwest::ClientBuilder::new()
            // Following redirects opens the client up to SSRF vulnerabilities.
            .redirect(reqwest::redirect::Policy::none())
            .timeout(settings.timeout)
            .build()?;

        Ok(Self { client, http })
    }

    /// Authorization URL carrying `state_token` and a fresh PKCE challenge.
    /// The verifier must be kept until the callback.
    pub fn authorize_url(&self, state_token: String) -> (Url, PkceCodeVerifier) {
        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

        let (auth_url, _) = self
            .client
            .authorize_url(|| CsrfToken::new(state_token))
            .add_scope(Scope::new(TELEMOST_SCOPE.to_string()))
            .add_extra_param("force_confirm", "yes")
            .set_pkce_challenge(pkce_challenge)
            .url();

        (auth_url, pkce_verifier)
    }

    pub async fn exchange_code(&self, code: String, verifier: PkceCodeVerifier) -> Result<TokenGrant, OAuthError> {
        let token = self
            .client
            .exchange_code(AuthorizationCode::new(code))
            .set_pkce_verifier(verifier)
            .request_async(&self.http)
            .await
            .map_err(|e| OAuthError::Token(e.to_string()))?;

        Ok(TokenGrant {
            access_token: token.access_token().secret().to_string(),
            refresh_token: token.refresh_token().map(|rt| rt.secret().to_string()),
            expires_in: token.expires_in().map(|d| d.as_secs() as i64),
        })
    }
}

#[async_trait]
impl TokenRefresher for YandexOAuth {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, OAuthError> {
        let token = self
            .client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|e| OAuthError::Token(e.to_string()))?;

        Ok(TokenGrant {
            access_token: token.access_token().secret().to_string(),
            // Yandex may omit the refresh token on refresh; keep the old one then.
            refresh_token: Some(
                token
                    .refresh_token()
                    .map(|rt| rt.secret().to_string())
                    .unwrap_or_else(|| refresh_token.to_string()),
            ),
            expires_in: token.expires_in().map(|d| d.as_secs() as i64),
        })
    }
}
