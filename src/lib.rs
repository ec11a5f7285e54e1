//! authgate
//!
//! External authentication endpoint for a reverse proxy `auth_request`
//! subrequest. Approves or denies workload-to-workload HTTP calls by
//! verifying a bearer JWT issued by a cloud service account, binding it to
//! the request's audience, and checking an IAM-style policy binding
//! (optionally gated by a conditional expression on path/host/time).
//!
//! ## Request flow
//!
//! `http::AuthService` extracts the bearer token and original URL and hands
//! them to `decision::AuthDecision`, which hashes `(token, audience)` and
//! probes the JWT cache (`cache::ExpiryCache`). On a cold cache it verifies
//! the token via `verifier::TokenVerifier`, pulling signing keys from
//! `keys::JwkSource`. Once identified, bindings are looked up in
//! `policy::PolicyProjection` and any conditional bindings are evaluated by
//! `expr::ExpressionEvaluator`.
//!
//! ## Runtime
//!
//! Like the router this project started from, authgate runs on the `may`
//! coroutine runtime, not tokio — background refreshers are plain OS
//! threads, and the HTTP listener is `may_minihttp`.

pub mod cache;
pub mod clock;
pub mod config;
pub mod decision;
pub mod error;
pub mod expr;
pub mod http;
pub mod ids;
pub mod keys;
pub mod policy;
pub mod policy_source;
pub mod singleflight;
pub mod token;
pub mod verifier;

pub use decision::AuthDecision;
pub use error::AuthError;
pub use ids::RequestId;
