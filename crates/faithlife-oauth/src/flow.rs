//! The three-legged sign-in flow: signin → verify, plus associate.
//!
//! Each step runs to completion against a caller-owned session. The flow
//! itself holds only the consumer identity and an HTTP client.

use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::ConsumerIdentity;
use crate::error::{OAuthError, Result};
use crate::session::{FlowSession, FlowSessionState, ORIGINAL_URL, OAUTH_TOKEN, OAUTH_TOKEN_SECRET};
use crate::signature::{AuthorizationHeader, SignedRequest, build_header};

/// Provider endpoint issuing temporary credentials.
pub const TEMPORARY_TOKEN_PATH: &str = "/v1/temporarytoken";

/// Provider endpoint exchanging a verifier for access credentials.
pub const ACCESS_TOKEN_PATH: &str = "/v1/accesstoken";

/// Provider consent page the user is redirected to.
pub const AUTHORIZE_PATH: &str = "/v1/authorize";

/// Provider endpoint for script-tag credential lookup.
pub const CREDENTIALS_PATH: &str = "/v1/users/credentials";

/// Where `verify` sends the user when no original URL was recorded.
pub const DEFAULT_RETURN_URL: &str = "/";

/// A token/secret pair, temporary or access.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthCredentialPair {
    #[serde(rename = "oauth_token")]
    pub token: String,
    #[serde(rename = "oauth_token_secret")]
    pub token_secret: String,
}

impl OAuthCredentialPair {
    pub fn new(token: impl Into<String>, token_secret: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            token_secret: token_secret.into(),
        }
    }
}

impl std::fmt::Debug for OAuthCredentialPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthCredentialPair")
            .field("token", &self.token)
            .field("token_secret", &"<redacted>")
            .finish()
    }
}

/// Input to [`AuthorizationFlow::start`].
#[derive(Debug, Clone, Default)]
pub struct StartRequest {
    /// Absolute URL of this application's verify route.
    pub callback_url: String,
    /// Where to send the user once signed in.
    pub original_url: Option<String>,
}

/// Input to [`AuthorizationFlow::verify`], as echoed by the provider.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VerifyRequest {
    pub oauth_token: Option<String>,
    pub oauth_verifier: Option<String>,
}

/// Orchestrates the sign-in protocol against the provider.
#[derive(Debug, Clone)]
pub struct AuthorizationFlow {
    identity: ConsumerIdentity,
    client: reqwest::Client,
}

impl AuthorizationFlow {
    pub fn new(identity: ConsumerIdentity) -> Self {
        Self::with_client(identity, reqwest::Client::new())
    }

    /// Use a preconfigured client (timeouts, proxies, TLS).
    pub fn with_client(identity: ConsumerIdentity, client: reqwest::Client) -> Self {
        Self { identity, client }
    }

    pub fn identity(&self) -> &ConsumerIdentity {
        &self.identity
    }

    /// Step "signin": obtain a temporary credential and return the consent URL.
    ///
    /// The session is written only after the provider answers successfully.
    pub async fn start(&self, session: &dyn FlowSession, request: StartRequest) -> Result<String> {
        let authorization = build_header(
            &self.identity,
            &SignedRequest::plaintext()
                .with_method("POST")
                .with_callback(request.callback_url.as_str()),
        );

        tracing::info!(callback = %request.callback_url, "Requesting temporary token");
        let body = self.post_signed(TEMPORARY_TOKEN_PATH, &authorization).await?;

        let temporary_secret = body
            .get(OAUTH_TOKEN_SECRET)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                OAuthError::InvalidResponse(format!(
                    "temporary token response is missing {}",
                    OAUTH_TOKEN_SECRET
                ))
            })?
            .to_string();

        // A secret without a token is the pending marker `verify` looks for.
        session.delete(OAUTH_TOKEN).await?;
        session.set(OAUTH_TOKEN_SECRET, temporary_secret).await?;
        match request.original_url.filter(|url| !url.is_empty()) {
            Some(url) => session.set(ORIGINAL_URL, url).await?,
            None => session.delete(ORIGINAL_URL).await?,
        }

        let location = format!(
            "{}?{}",
            self.identity.endpoint(AUTHORIZE_PATH),
            to_query_string(&body)
        );
        tracing::debug!("Redirecting to provider consent page");
        Ok(location)
    }

    /// Step "verify": exchange the verifier for an access credential.
    ///
    /// The temporary secret is consumed up front, so it is gone whether or
    /// not the exchange succeeds. A secret stored next to an access token
    /// belongs to a completed sign-in and is left alone. Returns the URL to
    /// send the user back to.
    pub async fn verify(&self, session: &dyn FlowSession, request: VerifyRequest) -> Result<String> {
        let Some(temporary_secret) = session.take(OAUTH_TOKEN_SECRET).await? else {
            tracing::warn!("Verify called without a pending authorization");
            return Err(OAuthError::NoPendingAuthorization);
        };
        if session.get(OAUTH_TOKEN).await?.is_some() {
            session.set(OAUTH_TOKEN_SECRET, temporary_secret).await?;
            tracing::warn!("Verify called on an already signed-in session");
            return Err(OAuthError::NoPendingAuthorization);
        }

        let mut signed = SignedRequest::plaintext()
            .with_method("POST")
            .with_token_secret(temporary_secret);
        signed.token = request.oauth_token;
        signed.verifier = request.oauth_verifier;
        let authorization = build_header(&self.identity, &signed);

        tracing::info!("Exchanging verifier for access token");
        let body = self.post_signed(ACCESS_TOKEN_PATH, &authorization).await?;

        let access: OAuthCredentialPair = serde_json::from_value(Value::Object(body))
            .map_err(|e| {
                OAuthError::InvalidResponse(format!("failed to parse access token response: {}", e))
            })?;

        let original_url = session.take(ORIGINAL_URL).await?;
        self.store_credentials(session, access).await?;

        tracing::info!("Access token stored in session");
        Ok(original_url
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| DEFAULT_RETURN_URL.to_string()))
    }

    /// Step "associate": attach an access pair obtained elsewhere. No I/O.
    pub async fn associate(
        &self,
        session: &dyn FlowSession,
        credentials: OAuthCredentialPair,
    ) -> Result<()> {
        self.store_credentials(session, credentials).await?;
        tracing::debug!("Associated access token with session");
        Ok(())
    }

    /// Header for calling the provider with the session's access credentials.
    pub async fn current_authorization_header(
        &self,
        session: &dyn FlowSession,
    ) -> Result<AuthorizationHeader> {
        let state = FlowSessionState::load(session).await?;
        let mut request = SignedRequest::plaintext();
        request.token_secret = state.oauth_token_secret;
        request.token = state.oauth_token;
        Ok(build_header(&self.identity, &request))
    }

    /// A script-tag URL that returns the signed-in user's credentials by
    /// invoking `method_name` (JSONP).
    pub fn sso_credential_lookup_url(&self, method_name: &str) -> String {
        let url = self.identity.endpoint(CREDENTIALS_PATH);
        let authorization = build_header(
            &self.identity,
            &SignedRequest::hmac_sha1("GET", url.as_str()).with_param("jsonp", method_name),
        );

        format!(
            "{}?jsonp={}&authorizationHeader={}",
            url,
            urlencoding::encode(method_name),
            urlencoding::encode(authorization.as_str())
        )
    }

    async fn store_credentials(
        &self,
        session: &dyn FlowSession,
        credentials: OAuthCredentialPair,
    ) -> Result<()> {
        session.set(OAUTH_TOKEN, credentials.token).await?;
        session
            .set(OAUTH_TOKEN_SECRET, credentials.token_secret)
            .await?;
        Ok(())
    }

    /// POST to a provider path and return the JSON object it answers with.
    async fn post_signed(
        &self,
        path: &str,
        authorization: &AuthorizationHeader,
    ) -> Result<Map<String, Value>> {
        let response = self
            .client
            .post(self.identity.endpoint(path))
            .header(AUTHORIZATION, authorization.as_str())
            .send()
            .await
            .map_err(|e| OAuthError::Network(format!("Request to {} failed: {}", path, e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| OAuthError::Network(format!("Failed to read {} response: {}", path, e)))?;

        if !status.is_success() {
            let message = provider_message(&text)
                .or_else(|| status.canonical_reason().map(str::to_string))
                .unwrap_or_else(|| "Unknown error".to_string());
            tracing::warn!(path, status = status.as_u16(), %message, "Provider rejected request");
            return Err(OAuthError::Provider {
                status: status.as_u16(),
                message,
            });
        }

        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(OAuthError::InvalidResponse(format!(
                "{} did not return a JSON object",
                path
            ))),
            Err(e) => Err(OAuthError::InvalidResponse(format!(
                "failed to parse {} response: {}",
                path, e
            ))),
        }
    }
}

/// Pull a human-readable message out of an error body.
fn provider_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => value
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| Some(trimmed.to_string())),
        Err(_) => Some(trimmed.to_string()),
    }
}

/// Render provider fields as a query string, in the order received.
fn to_query_string(fields: &Map<String, Value>) -> String {
    fields
        .iter()
        .map(|(k, v)| {
            let value = match v {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            format!("{}={}", urlencoding::encode(k), urlencoding::encode(&value))
        })
        .collect::<Vec<_>>()
        .join("&")
}
