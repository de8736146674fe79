//! OAuth 1.0 consumer for the Faithlife identity provider.
//!
//! Signs requests to the provider and runs the three-legged sign-in flow
//! (signin → verify, plus associate for single-sign-on handoff) against a
//! caller-supplied session.
//!
//! # Components
//!
//! - [`signature`]: `Authorization` header generation (PLAINTEXT, HMAC-SHA1)
//! - [`config`]: Consumer identity and its file/environment configuration
//! - [`session`]: Session capability plus an in-memory store and middleware
//! - [`flow`]: The signin/verify/associate state machine
//! - [`router`]: Axum routes binding the flow to HTTP, plus the
//!   [`CurrentAuthorization`](router::CurrentAuthorization) extractor

pub mod config;
pub mod error;
pub mod flow;
pub mod router;
pub mod session;
pub mod signature;

pub use config::{ConsumerConfig, ConsumerIdentity};
pub use error::{OAuthError, Result};
pub use flow::{AuthorizationFlow, OAuthCredentialPair, StartRequest, VerifyRequest};
pub use router::{CurrentAuthorization, oauth_router};
pub use session::{
    FlowSession, FlowSessionState, MemorySession, MemorySessionStore, SessionHandle,
    session_middleware,
};
pub use signature::{AuthorizationHeader, SignatureMethod, SignedRequest, build_header};
