use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::Query;
use axum::routing::get;
use axum::Router;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, info};
use url::Url;

use crate::constants::{OAUTH_REDIRECT_PORT, YOUTUBE_SCOPES};
use crate::error::AuthError;
use crate::publish::profiles::{CredentialBroker, StoredToken};

const CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);
const CALLBACK_PAGE: &str = "Authorization received. You can close this tab.";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_auth_uri() -> String {
    "https://accounts.google.com/o/oauth2/auth".to_string()
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

impl ClientSecrets {
    pub fn load(path: &Path) -> Result<Self, AuthError> {
        let text = std::fs::read_to_string(path)
            .map_err(|_| AuthError::MissingClientSecrets(path.to_path_buf()))?;
        let value: Value =
            serde_json::from_str(&text).map_err(|err| AuthError::ClientSecrets(err.to_string()))?;
        Self::from_value(&value)
    }

    /// Reads the `installed` section, or `web` when that is all there is.
    pub fn from_value(value: &Value) -> Result<Self, AuthError> {
        let section = value
            .get("installed")
            .or_else(|| value.get("web"))
            .ok_or_else(|| AuthError::ClientSecrets("no 'installed' or 'web' section".into()))?;
        serde_json::from_value(section.clone())
            .map_err(|err| AuthError::ClientSecrets(err.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

/// Google OAuth 2.0 installed-app flow with PKCE and a loopback redirect.
pub struct GoogleBroker {
    secrets: ClientSecrets,
    scopes: Vec<String>,
    port: u16,
    http: Client,
}

impl GoogleBroker {
    pub fn new(secrets: ClientSecrets) -> Result<Self, AuthError> {
        Ok(Self {
            secrets,
            scopes: YOUTUBE_SCOPES.iter().map(|s| s.to_string()).collect(),
            port: OAUTH_REDIRECT_PORT,
            http: Client::builder().timeout(Duration::from_secs(30)).build()?,
        })
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn authorization_url(
        &self,
        redirect_uri: &str,
        state: &str,
        challenge: &str,
    ) -> Result<Url, AuthError> {
        let mut url = Url::parse(&self.secrets.auth_uri)
            .map_err(|err| AuthError::ClientSecrets(format!("auth_uri: {err}")))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.secrets.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &self.scopes.join(" "))
            .append_pair("state", state)
            .append_pair("code_challenge", challenge)
            .append_pair("code_challenge_method", "S256")
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent");
        Ok(url)
    }

    /// Runs the full interactive flow; `present` is handed the consent URL.
    pub async fn run_flow<F>(&self, present: F) -> Result<StoredToken, AuthError>
    where
        F: FnOnce(&Url),
    {
        let verifier = random_token(64);
        let state = random_token(32);
        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], self.port))).await?;
        let port = listener.local_addr()?.port();
        let redirect_uri = format!("http://127.0.0.1:{port}/");

        let url = self.authorization_url(&redirect_uri, &state, &pkce_challenge(&verifier))?;
        present(&url);

        let params = await_callback(listener).await?;
        if let Some(error) = params.get("error") {
            return Err(AuthError::Denied(error.clone()));
        }
        if params.get("state").map(String::as_str) != Some(state.as_str()) {
            return Err(AuthError::StateMismatch);
        }
        let code = params
            .get("code")
            .ok_or_else(|| AuthError::Denied("callback carried no code".into()))?;

        debug!("exchanging authorization code");
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("code_verifier", verifier.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
            ("client_id", self.secrets.client_id.as_str()),
            ("client_secret", self.secrets.client_secret.as_str()),
        ];
        self.token_request(&form).await
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<StoredToken, AuthError> {
        let resp = self.http.post(&self.secrets.token_uri).form(form).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AuthError::TokenEndpoint { status, body });
        }
        let payload: TokenResponse = resp.json().await?;
        Ok(self.token_from_response(payload, OffsetDateTime::now_utc()))
    }

    fn token_from_response(&self, payload: TokenResponse, now: OffsetDateTime) -> StoredToken {
        let scopes = payload
            .scope
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_else(|| self.scopes.clone());
        StoredToken {
            access_token: payload.access_token,
            refresh_token: payload.refresh_token,
            expires_at: now + time::Duration::seconds(payload.expires_in.unwrap_or(3600)),
            scopes,
        }
    }
}

#[async_trait]
impl CredentialBroker for GoogleBroker {
    async fn authorize(&self, profile: &str) -> Result<StoredToken, AuthError> {
        self.run_flow(|url| {
            info!(profile, "waiting for browser authorization");
            eprintln!("\nAuthorize profile '{profile}' by opening this URL in a browser:\n\n{url}\n");
        })
        .await
    }

    async fn refresh(&self, token: &StoredToken) -> Result<StoredToken, AuthError> {
        let refresh_token = token
            .refresh_token
            .as_deref()
            .ok_or_else(|| AuthError::Denied("no refresh token stored".into()))?;
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.secrets.client_id.as_str()),
            ("client_secret", self.secrets.client_secret.as_str()),
        ];
        self.token_request(&form).await
    }
}

/// Serves exactly one request on `listener` and returns its query parameters.
async fn await_callback(listener: TcpListener) -> Result<HashMap<String, String>, AuthError> {
    let (params_tx, params_rx) = oneshot::channel::<HashMap<String, String>>();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let slot = Arc::new(Mutex::new(Some(params_tx)));

    let app = Router::new().route(
        "/",
        get(move |Query(params): Query<HashMap<String, String>>| {
            let slot = slot.clone();
            async move {
                if let Some(tx) = slot.lock().ok().and_then(|mut guard| guard.take()) {
                    let _ = tx.send(params);
                }
                CALLBACK_PAGE
            }
        }),
    );
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = stop_rx.await;
            })
            .await
    });

    let received = tokio::time::timeout(CALLBACK_TIMEOUT, params_rx).await;
    let _ = stop_tx.send(());
    let _ = server.await;
    match received {
        Ok(Ok(params)) => Ok(params),
        Ok(Err(_)) => Err(AuthError::Denied("callback listener closed".into())),
        Err(_) => Err(AuthError::Denied("timed out waiting for authorization".into())),
    }
}

pub fn pkce_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Form;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::Json;
    use serde_json::json;

    fn secrets(token_uri: &str) -> ClientSecrets {
        ClientSecrets {
            client_id: "cid".into(),
            client_secret: "secret".into(),
            auth_uri: default_auth_uri(),
            token_uri: token_uri.into(),
        }
    }

    #[test]
    fn pkce_matches_rfc_example() {
        assert_eq!(
            pkce_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn client_secrets_accept_installed_or_web() {
        let installed = json!({"installed": {"client_id": "a", "client_secret": "b"}});
        let parsed = ClientSecrets::from_value(&installed).unwrap();
        assert_eq!(parsed.client_id, "a");
        assert_eq!(parsed.token_uri, default_token_uri());

        let web = json!({"web": {"client_id": "w", "client_secret": "s", "token_uri": "https://t"}});
        assert_eq!(ClientSecrets::from_value(&web).unwrap().token_uri, "https://t");

        assert!(matches!(
            ClientSecrets::from_value(&json!({"other": {}})),
            Err(AuthError::ClientSecrets(_))
        ));
        assert!(matches!(
            ClientSecrets::load(Path::new("/no/such/client_secrets.json")),
            Err(AuthError::MissingClientSecrets(_))
        ));
    }

    #[test]
    fn consent_url_requests_offline_access() {
        let broker = GoogleBroker::new(secrets("https://t")).unwrap();
        let url = broker
            .authorization_url("http://127.0.0.1:8080/", "st", "ch")
            .unwrap();
        let pairs: HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["access_type"], "offline");
        assert_eq!(pairs["prompt"], "consent");
        assert_eq!(pairs["code_challenge_method"], "S256");
        assert_eq!(pairs["redirect_uri"], "http://127.0.0.1:8080/");
        assert!(pairs["scope"].contains("youtube.upload"));
    }

    #[test]
    fn token_expiry_comes_from_expires_in() {
        let broker = GoogleBroker::new(secrets("https://t")).unwrap();
        let now = OffsetDateTime::now_utc();
        let token = broker.token_from_response(
            TokenResponse {
                access_token: "at".into(),
                expires_in: Some(120),
                refresh_token: None,
                scope: None,
            },
            now,
        );
        assert_eq!(token.expires_at, now + time::Duration::seconds(120));
        assert_eq!(token.scopes.len(), 2);
    }

    #[tokio::test]
    async fn loopback_flow_exchanges_code_with_verifier() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let token_endpoint = Router::new().route(
            "/token",
            post(|Form(form): Form<HashMap<String, String>>| async move {
                let ok = form.get("grant_type").map(String::as_str) == Some("authorization_code")
                    && form.get("code").map(String::as_str) == Some("the-code")
                    && form.get("code_verifier").is_some_and(|v| v.len() == 64);
                if ok {
                    (
                        StatusCode::OK,
                        Json(json!({"access_token": "at", "expires_in": 3599, "refresh_token": "rt"})),
                    )
                } else {
                    (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid_grant"})))
                }
            }),
        );
        tokio::spawn(async move {
            axum::serve(listener, token_endpoint).await.unwrap();
        });

        let broker = GoogleBroker::new(secrets(&format!("{base}/token")))
            .unwrap()
            .with_port(0);
        let token = broker
            .run_flow(|url| {
                let pairs: HashMap<_, _> = url.query_pairs().into_owned().collect();
                let callback = format!(
                    "{}?code=the-code&state={}",
                    pairs["redirect_uri"], pairs["state"]
                );
                tokio::spawn(async move {
                    reqwest::get(callback).await.unwrap();
                });
            })
            .await
            .unwrap();
        assert_eq!(token.access_token, "at");
        assert_eq!(token.refresh_token.as_deref(), Some("rt"));
        assert!(token.is_valid());
    }

    #[tokio::test]
    async fn mismatched_state_is_rejected() {
        let broker = GoogleBroker::new(secrets("http://127.0.0.1:9/token"))
            .unwrap()
            .with_port(0);
        let err = broker
            .run_flow(|url| {
                let pairs: HashMap<_, _> = url.query_pairs().into_owned().collect();
                let callback = format!("{}?code=c&state=forged", pairs["redirect_uri"]);
                tokio::spawn(async move {
                    let _ = reqwest::get(callback).await;
                });
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::StateMismatch));
    }
}
