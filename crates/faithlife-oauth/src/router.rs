//! Axum binding for the sign-in flow.
//!
//! Mount [`oauth_router`] under any base path. The host must install a
//! [`SessionHandle`] (for example with
//! [`session_middleware`](crate::session::session_middleware)) before these
//! routes run.

use std::sync::Arc;

use axum::{
    Form, Json, Router,
    extract::{FromRef, FromRequest, FromRequestParts, OriginalUri, Query, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, Uri, header, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;

use crate::error::{OAuthError, Result};
use crate::flow::{AuthorizationFlow, OAuthCredentialPair, StartRequest, VerifyRequest};
use crate::session::SessionHandle;
use crate::signature::AuthorizationHeader;

/// Path of the verify route relative to the mount point.
pub const VERIFY_ROUTE: &str = "/verify";

/// Path of the signin route relative to the mount point.
pub const SIGNIN_ROUTE: &str = "/signin";

/// Path of the associate route relative to the mount point.
pub const ASSOCIATE_ROUTE: &str = "/associate";

/// Header set by reverse proxies terminating TLS.
const FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Build the router exposing `/signin`, `/verify` and `/associate`.
pub fn oauth_router(flow: Arc<AuthorizationFlow>) -> Router {
    Router::new()
        .route(SIGNIN_ROUTE, get(handle_signin))
        .route(VERIFY_ROUTE, get(handle_verify))
        .route(ASSOCIATE_ROUTE, post(handle_associate))
        .with_state(flow)
}

/// The signed `Authorization` header for the current session.
///
/// Handlers that call the provider on the user's behalf extract this instead
/// of signing by hand. Requires a [`SessionHandle`] and an
/// `Arc<AuthorizationFlow>` reachable from the router state.
#[derive(Debug, Clone)]
pub struct CurrentAuthorization(pub AuthorizationHeader);

impl<S> FromRequestParts<S> for CurrentAuthorization
where
    Arc<AuthorizationFlow>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = OAuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        let session = SessionHandle::from_request_parts(parts, state).await?;
        let flow = Arc::<AuthorizationFlow>::from_ref(state);
        let authorization = flow.current_authorization_header(session.session()).await?;
        Ok(Self(authorization))
    }
}

#[derive(Debug, Default, Deserialize)]
struct SigninQuery {
    original_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssociateBody {
    access_token: String,
    access_secret: String,
}

/// Handle GET /signin
async fn handle_signin(
    session: SessionHandle,
    State(flow): State<Arc<AuthorizationFlow>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    Query(query): Query<SigninQuery>,
) -> Result<Response> {
    let base_path = uri
        .path()
        .strip_suffix(SIGNIN_ROUTE)
        .unwrap_or_default()
        .to_string();
    let callback_url = format!(
        "{}://{}{}{}",
        request_scheme(&headers),
        request_host(&headers, &uri)?,
        base_path,
        VERIFY_ROUTE
    );

    let original_url = headers
        .get(header::REFERER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or(query.original_url)
        .filter(|url| {
            let usable = HeaderValue::from_str(url).is_ok();
            if !usable {
                tracing::debug!("Ignoring original_url that cannot be redirected to");
            }
            usable
        });

    let location = flow
        .start(
            session.session(),
            StartRequest {
                callback_url,
                original_url,
            },
        )
        .await?;
    found(&location)
}

/// Handle GET /verify
async fn handle_verify(
    session: SessionHandle,
    State(flow): State<Arc<AuthorizationFlow>>,
    Query(query): Query<VerifyRequest>,
) -> Result<Response> {
    let location = flow.verify(session.session(), query).await?;
    found(&location)
}

/// Handle POST /associate
async fn handle_associate(
    session: SessionHandle,
    State(flow): State<Arc<AuthorizationFlow>>,
    request: Request,
) -> Result<StatusCode> {
    let is_json = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"));

    let body = if is_json {
        Json::<AssociateBody>::from_request(request, &())
            .await
            .map_err(|e| OAuthError::InvalidRequest(e.body_text()))?
            .0
    } else {
        Form::<AssociateBody>::from_request(request, &())
            .await
            .map_err(|e| OAuthError::InvalidRequest(e.body_text()))?
            .0
    };

    flow.associate(
        session.session(),
        OAuthCredentialPair::new(body.access_token, body.access_secret),
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Scheme the client used, as reported by a TLS-terminating proxy.
pub(crate) fn request_scheme(headers: &HeaderMap) -> &str {
    headers
        .get(FORWARDED_PROTO)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| *v == "http" || *v == "https")
        .unwrap_or("http")
}

/// `Host` header, else the request target's authority (HTTP/2).
fn request_host<'a>(headers: &'a HeaderMap, uri: &'a Uri) -> Result<&'a str> {
    headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .or_else(|| uri.authority().map(|a| a.as_str()))
        .ok_or_else(|| OAuthError::InvalidRequest("Missing Host header".to_string()))
}

/// A `302 Found` redirect.
fn found(location: &str) -> Result<Response> {
    let value = HeaderValue::from_str(location)
        .map_err(|e| OAuthError::InvalidResponse(format!("Invalid redirect location: {}", e)))?;
    Ok((StatusCode::FOUND, [(header::LOCATION, value)]).into_response())
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        let error_type = match &self {
            OAuthError::Config(_) => "config_error",
            OAuthError::Session(_) => "session_error",
            OAuthError::Provider { .. } => "provider_error",
            OAuthError::Network(_) => "network_error",
            OAuthError::InvalidResponse(_) => "invalid_response",
            OAuthError::NoPendingAuthorization => "no_pending_authorization",
            OAuthError::InvalidRequest(_) => "invalid_request",
        };
        let status = match &self {
            _ if self.is_upstream() => StatusCode::BAD_GATEWAY,
            OAuthError::NoPendingAuthorization | OAuthError::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "OAuth step failed");
        } else {
            tracing::debug!(error = %self, "OAuth step rejected");
        }

        let body = serde_json::json!({
            "type": "error",
            "error": {
                "type": error_type,
                "message": self.to_string()
            }
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConsumerIdentity;
    use crate::session::{
        FlowSession, MemorySessionStore, OAUTH_TOKEN, OAUTH_TOKEN_SECRET, ORIGINAL_URL,
        session_middleware,
    };
    use axum::http::Request;
    use axum::{body::Body, middleware};
    use serde_json::json;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Harness {
        app: Router,
        store: MemorySessionStore,
        server: MockServer,
    }

    async fn harness() -> Harness {
        let server = MockServer::start().await;
        let identity = ConsumerIdentity::new("consumer", "secret")
            .with_root_url(format!("{}/oauth", server.uri()));
        let store = MemorySessionStore::new();
        let app = Router::new()
            .nest("/auth", oauth_router(Arc::new(AuthorizationFlow::new(identity))))
            .layer(middleware::from_fn_with_state(store.clone(), session_middleware));
        Harness { app, store, server }
    }

    async fn mount_provider(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/oauth/v1/temporarytoken"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "oauth_token": "temp-token",
                "oauth_token_secret": "temp-secret"
            })))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/oauth/v1/accesstoken"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "oauth_token": "access-token",
                "oauth_token_secret": "access-secret"
            })))
            .mount(server)
            .await;
    }

    fn session_cookie(response: &Response) -> String {
        response
            .headers()
            .get(header::SET_COOKIE)
            .expect("session cookie")
            .to_str()
            .unwrap()
            .split(';')
            .next()
            .unwrap()
            .to_string()
    }

    fn location(response: &Response) -> &str {
        response
            .headers()
            .get(header::LOCATION)
            .expect("location header")
            .to_str()
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_signin_then_verify_round_trip() {
        let h = harness().await;
        mount_provider(&h.server).await;

        let response = h
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/auth/signin")
                    .header(header::HOST, "app.test")
                    .header(header::REFERER, "http://app.test/library")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            location(&response),
            format!(
                "{}/oauth/v1/authorize?oauth_token=temp-token&oauth_token_secret=temp-secret",
                h.server.uri()
            )
        );
        let cookie = session_cookie(&response);

        let requests = h.server.received_requests().await.unwrap();
        let authorization = requests[0]
            .headers
            .get("authorization")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(authorization.contains("oauth_callback=\"http://app.test/auth/verify\""));

        let response = h
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/auth/verify?oauth_token=temp-token&oauth_verifier=abc")
                    .header(header::HOST, "app.test")
                    .header(header::COOKIE, cookie.as_str())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response), "http://app.test/library");

        let id = cookie.trim_start_matches("faithlife_session=");
        let values = h.store.get(id).await.unwrap().snapshot().await;
        assert_eq!(values.get(OAUTH_TOKEN).map(String::as_str), Some("access-token"));
        assert_eq!(
            values.get(OAUTH_TOKEN_SECRET).map(String::as_str),
            Some("access-secret")
        );
        assert!(!values.contains_key(ORIGINAL_URL));
    }

    #[tokio::test]
    async fn test_signin_uses_forwarded_proto_and_query_original_url() {
        let h = harness().await;
        mount_provider(&h.server).await;

        let response = h
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/auth/signin?original_url=%2Fafter")
                    .header(header::HOST, "app.test")
                    .header(FORWARDED_PROTO, "https")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);

        let cookie = session_cookie(&response);
        let id = cookie.trim_start_matches("faithlife_session=");
        let values = h.store.get(id).await.unwrap().snapshot().await;
        assert_eq!(values.get(ORIGINAL_URL).map(String::as_str), Some("/after"));

        let requests = h.server.received_requests().await.unwrap();
        let authorization = requests[0].headers.get("authorization").unwrap();
        assert!(
            authorization
                .to_str()
                .unwrap()
                .contains("oauth_callback=\"https://app.test/auth/verify\"")
        );
    }

    #[tokio::test]
    async fn test_verify_without_signin_is_bad_request() {
        let h = harness().await;

        let response = h
            .app
            .oneshot(
                Request::builder()
                    .uri("/auth/verify?oauth_token=t&oauth_verifier=v")
                    .header(header::HOST, "app.test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().get(header::LOCATION).is_none());
        let body = body_json(response).await;
        assert_eq!(body["error"]["type"], "no_pending_authorization");
        assert!(h.server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_provider_failure_does_not_redirect() {
        let h = harness().await;
        Mock::given(method("POST"))
            .and(path("/oauth/v1/temporarytoken"))
            .respond_with(ResponseTemplate::new(503).set_body_json(json!({ "message": "down" })))
            .mount(&h.server)
            .await;

        let response = h
            .app
            .oneshot(
                Request::builder()
                    .uri("/auth/signin")
                    .header(header::HOST, "app.test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(response.headers().get(header::LOCATION).is_none());
        let body = body_json(response).await;
        assert_eq!(body["error"]["type"], "provider_error");
        assert_eq!(body["error"]["message"], "Provider error 503: down");
    }

    #[tokio::test]
    async fn test_associate_accepts_json_and_form() {
        let h = harness().await;

        let response = h
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/auth/associate")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        json!({ "accessToken": "a", "accessSecret": "b" }).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let cookie = session_cookie(&response);

        let response = h
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/auth/associate")
                    .header(header::COOKIE, cookie.as_str())
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from("accessToken=a&accessSecret=b"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(body.is_empty());

        let id = cookie.trim_start_matches("faithlife_session=");
        let values = h.store.get(id).await.unwrap().snapshot().await;
        assert_eq!(values.len(), 2);
        assert_eq!(values.get(OAUTH_TOKEN).map(String::as_str), Some("a"));
        assert_eq!(values.get(OAUTH_TOKEN_SECRET).map(String::as_str), Some("b"));
        assert!(h.server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_associate_rejects_incomplete_body() {
        let h = harness().await;

        let response = h
            .app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/auth/associate")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(json!({ "accessToken": "a" }).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["type"], "invalid_request");
    }

    #[tokio::test]
    async fn test_missing_session_layer_is_config_error() {
        let server = MockServer::start().await;
        let identity =
            ConsumerIdentity::new("c", "s").with_root_url(format!("{}/oauth", server.uri()));
        let app = Router::new().nest("/auth", oauth_router(Arc::new(AuthorizationFlow::new(identity))));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/auth/signin")
                    .header(header::HOST, "app.test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"]["type"], "config_error");
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_signin_falls_back_to_uri_authority() {
        let h = harness().await;
        mount_provider(&h.server).await;

        let response = h
            .app
            .oneshot(
                Request::builder()
                    .uri("http://app.test/auth/signin")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);

        let requests = h.server.received_requests().await.unwrap();
        let authorization = requests[0].headers.get("authorization").unwrap();
        assert!(
            authorization
                .to_str()
                .unwrap()
                .contains("oauth_callback=\"http://app.test/auth/verify\"")
        );
    }

    #[tokio::test]
    async fn test_signin_ignores_unredirectable_original_url() {
        let h = harness().await;
        mount_provider(&h.server).await;

        let response = h
            .app
            .oneshot(
                Request::builder()
                    .uri("/auth/signin?original_url=%2Fa%0Ab")
                    .header(header::HOST, "app.test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);

        let cookie = session_cookie(&response);
        let id = cookie.trim_start_matches("faithlife_session=");
        let values = h.store.get(id).await.unwrap().snapshot().await;
        assert!(!values.contains_key(ORIGINAL_URL));
        assert_eq!(
            values.get(OAUTH_TOKEN_SECRET).map(String::as_str),
            Some("temp-secret")
        );
    }

    #[tokio::test]
    async fn test_full_session_store_is_server_error() {
        let server = MockServer::start().await;
        mount_provider(&server).await;
        let identity =
            ConsumerIdentity::new("c", "s").with_root_url(format!("{}/oauth", server.uri()));
        let store = MemorySessionStore::with_limits(0, std::time::Duration::from_secs(60));
        let app = Router::new()
            .nest("/auth", oauth_router(Arc::new(AuthorizationFlow::new(identity))))
            .layer(middleware::from_fn_with_state(store, session_middleware));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/auth/signin")
                    .header(header::HOST, "app.test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().get(header::LOCATION).is_none());
        let body = body_json(response).await;
        assert_eq!(body["error"]["type"], "session_error");
    }

    async fn handle_whoami(CurrentAuthorization(authorization): CurrentAuthorization) -> String {
        authorization.into_string()
    }

    #[tokio::test]
    async fn test_current_authorization_extractor() {
        let flow = Arc::new(AuthorizationFlow::new(ConsumerIdentity::new("c", "s")));
        let store = MemorySessionStore::new();
        let app = Router::new()
            .route("/whoami", get(handle_whoami))
            .with_state(flow)
            .layer(middleware::from_fn_with_state(store.clone(), session_middleware));

        let (id, session) = store.create().await.unwrap();
        session.set(OAUTH_TOKEN, "access".into()).await.unwrap();
        session.set(OAUTH_TOKEN_SECRET, "secret".into()).await.unwrap();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/whoami")
                    .header(header::COOKIE, format!("faithlife_session={}", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(
            &body[..],
            b"OAuth oauth_consumer_key=\"c\", oauth_signature_method=\"PLAINTEXT\", \
              oauth_version=\"1.0\", oauth_token=\"access\", oauth_signature=\"s%26secret\""
        );

        let response = app
            .oneshot(Request::builder().uri("/whoami").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(
            &body[..],
            b"OAuth oauth_consumer_key=\"c\", oauth_signature_method=\"PLAINTEXT\", \
              oauth_version=\"1.0\", oauth_signature=\"s%26\""
        );
        assert_eq!(store.len().await, 1);
    }

    #[test]
    fn test_request_scheme_defaults_to_http() {
        let mut headers = HeaderMap::new();
        assert_eq!(request_scheme(&headers), "http");
        headers.insert(FORWARDED_PROTO, HeaderValue::from_static("https, http"));
        assert_eq!(request_scheme(&headers), "https");
        headers.insert(FORWARDED_PROTO, HeaderValue::from_static("gopher"));
        assert_eq!(request_scheme(&headers), "http");
    }
}
