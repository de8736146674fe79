//! OAuth 1.0 request signing.
//!
//! Builds the `Authorization` header value for a request to the provider.
//! Pure: no I/O and no state beyond the clock and the nonce source.

use std::fmt;
use std::str::FromStr;

use base64::{
    Engine,
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha1::Sha1;

use crate::config::ConsumerIdentity;
use crate::error::OAuthError;

type HmacSha1 = Hmac<Sha1>;

/// OAuth protocol version sent with every request.
pub const OAUTH_VERSION: &str = "1.0";

/// How `oauth_signature` is computed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SignatureMethod {
    #[default]
    Plaintext,
    HmacSha1,
}

impl SignatureMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureMethod::Plaintext => "PLAINTEXT",
            SignatureMethod::HmacSha1 => "HMAC-SHA1",
        }
    }
}

impl fmt::Display for SignatureMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignatureMethod {
    type Err = OAuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PLAINTEXT" => Ok(SignatureMethod::Plaintext),
            "HMAC-SHA1" | "HMAC_SHA1" => Ok(SignatureMethod::HmacSha1),
            other => Err(OAuthError::InvalidRequest(format!(
                "Unsupported signature method: {}",
                other
            ))),
        }
    }
}

/// Everything needed to sign one request.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    pub http_method: String,
    pub url: String,
    pub signature_method: SignatureMethod,
    pub token_secret: Option<String>,
    pub callback: Option<String>,
    pub verifier: Option<String>,
    pub token: Option<String>,
    /// Application parameters, signed and emitted in the given order.
    pub params: Vec<(String, String)>,
}

impl Default for SignedRequest {
    fn default() -> Self {
        Self {
            http_method: "GET".to_string(),
            url: String::new(),
            signature_method: SignatureMethod::Plaintext,
            token_secret: None,
            callback: None,
            verifier: None,
            token: None,
            params: Vec::new(),
        }
    }
}

impl SignedRequest {
    /// A PLAINTEXT request. Method and URL don't take part in the signature.
    pub fn plaintext() -> Self {
        Self::default()
    }

    /// An HMAC-SHA1 request for `method url`.
    pub fn hmac_sha1(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            http_method: method.into(),
            url: url.into(),
            signature_method: SignatureMethod::HmacSha1,
            ..Default::default()
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.http_method = method.into();
        self
    }

    pub fn with_token_secret(mut self, secret: impl Into<String>) -> Self {
        self.token_secret = Some(secret.into());
        self
    }

    pub fn with_callback(mut self, callback: impl Into<String>) -> Self {
        self.callback = Some(callback.into());
        self
    }

    pub fn with_verifier(mut self, verifier: impl Into<String>) -> Self {
        self.verifier = Some(verifier.into());
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// The key both signature methods use: `consumer_secret&token_secret`.
    fn signing_key(&self, identity: &ConsumerIdentity) -> String {
        format!(
            "{}&{}",
            identity.consumer_secret(),
            self.token_secret.as_deref().unwrap_or("")
        )
    }
}

/// A serialized `Authorization` header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationHeader(String);

impl AuthorizationHeader {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for AuthorizationHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for AuthorizationHeader {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Insertion-ordered parameter list. Re-setting a key keeps its slot.
#[derive(Debug, Default)]
struct OAuthParams(Vec<(String, String)>);

impl OAuthParams {
    fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key.to_string(), value)),
        }
    }

    fn serialize(&self) -> String {
        let pairs = self
            .0
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", k, v))
            .collect::<Vec<_>>()
            .join(", ");
        format!("OAuth {}", pairs)
    }
}

/// Build the `Authorization` header for `request`.
///
/// HMAC-SHA1 requests get a fresh timestamp and nonce; PLAINTEXT requests
/// carry neither.
pub fn build_header(identity: &ConsumerIdentity, request: &SignedRequest) -> AuthorizationHeader {
    build_header_at(
        identity,
        request,
        chrono::Utc::now().timestamp(),
        &generate_nonce(),
    )
}

/// [`build_header`] with a fixed timestamp and nonce.
pub fn build_header_at(
    identity: &ConsumerIdentity,
    request: &SignedRequest,
    timestamp: i64,
    nonce: &str,
) -> AuthorizationHeader {
    let mut params = OAuthParams::default();
    params.set("oauth_consumer_key", identity.consumer_token());
    params.set("oauth_signature_method", request.signature_method.as_str());
    params.set("oauth_version", OAUTH_VERSION);
    if request.signature_method == SignatureMethod::HmacSha1 {
        params.set("oauth_timestamp", timestamp.to_string());
        params.set("oauth_nonce", nonce);
    }

    let extras = [
        ("oauth_callback", &request.callback),
        ("oauth_verifier", &request.verifier),
        ("oauth_token", &request.token),
    ];
    for (key, value) in extras {
        if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
            params.set(key, value);
        }
    }

    for (key, value) in &request.params {
        params.set(key, value.as_str());
    }

    let key = request.signing_key(identity);
    let signature = match request.signature_method {
        SignatureMethod::Plaintext => key,
        SignatureMethod::HmacSha1 => {
            hmac_sha1_signature(&request.http_method, &request.url, &params.0, &key)
        }
    };
    params.set("oauth_signature", urlencoding::encode(&signature));

    AuthorizationHeader(params.serialize())
}

/// Compute the base64 HMAC-SHA1 signature of a request (not URL-encoded).
///
/// The base string is `METHOD&enc(url)&enc(k1=v1&k2=v2...)` with the
/// parameters sorted by key.
pub fn hmac_sha1_signature<K, V>(method: &str, url: &str, params: &[(K, V)], key: &str) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let base = signature_base_string(method, url, params);
    let mut mac =
        HmacSha1::new_from_slice(key.as_bytes()).expect("HMAC can take key of any size");
    mac.update(base.as_bytes());
    STANDARD.encode(mac.finalize().into_bytes())
}

/// The HMAC-SHA1 signature base string.
pub fn signature_base_string<K, V>(method: &str, url: &str, params: &[(K, V)]) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    format!(
        "{}&{}&{}",
        method.to_ascii_uppercase(),
        urlencoding::encode(url),
        urlencoding::encode(&canonical_params(params))
    )
}

fn canonical_params<K, V>(params: &[(K, V)]) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut sorted: Vec<(&str, &str)> = params
        .iter()
        .map(|(k, v)| (k.as_ref(), v.as_ref()))
        .collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Generate a random nonce.
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
