//! AuthEndpoint (C7): adapts the decision state machine to the
//! reverse-proxy `auth_request` HTTP surface, on top of the teacher's
//! `may`/`may_minihttp` coroutine HTTP stack.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use may_minihttp::{HttpService, Request, Response};

use crate::decision::AuthDecision;
use crate::error::AuthError;
use crate::ids::RequestId;

#[derive(Clone)]
pub struct AuthService {
    decision: Arc<AuthDecision>,
    original_url_header: String,
    ready: Arc<AtomicBool>,
}

impl AuthService {
    pub fn new(
        decision: Arc<AuthDecision>,
        original_url_header: String,
        ready: Arc<AtomicBool>,
    ) -> Self {
        Self { decision, original_url_header, ready }
    }
}

impl HttpService for AuthService {
    fn call(&mut self, req: Request, res: &mut Response) -> io::Result<()> {
        let request_id = RequestId::from_header_or_new(get_header(&req, "X-Request-Id"));
        let span = tracing::info_span!("auth_request", request_id = %request_id, path = req.path());
        let _enter = span.enter();

        match req.path() {
            "/healthz" => {
                if self.ready.load(Ordering::Relaxed) {
                    res.status_code(200, "OK");
                } else {
                    res.status_code(503, "Service Unavailable");
                }
                return Ok(());
            }
            "/auth" => {}
            _ => {
                res.status_code(404, "Not Found");
                return Ok(());
            }
        }

        let outcome = self.run_decision(&req);
        match outcome {
            Ok(()) => {
                tracing::debug!("allow");
                res.status_code(200, "OK");
            }
            Err(err) => {
                err.log(None, None);
                res.status_code(407, "Proxy Authentication Required");
            }
        }
        Ok(())
    }
}

impl AuthService {
    fn run_decision(&self, req: &Request) -> Result<(), AuthError> {
        let header = get_header(req, "X-Forwarded-Proxy-Authorization")
            .or_else(|| get_header(req, "X-Forwarded-Authorization"))
            .ok_or_else(|| AuthError::BadRequest {
                reason: "missing forwarded authorization header".to_string(),
            })?;
        let original_url =
            get_header(req, &self.original_url_header).ok_or_else(|| AuthError::BadRequest {
                reason: "missing original URL header".to_string(),
            })?;
        let token = extract_bearer_token(header)?;
        self.decision.decide(&token, original_url)
    }
}

fn get_header<'a>(req: &'a Request, name: &str) -> Option<&'a str> {
    req.headers().iter().find(|h| h.name.eq_ignore_ascii_case(name)).and_then(|h| {
        std::str::from_utf8(h.value).ok()
    })
}

/// The expected prefix is the literal scheme `Bearer:` (case-insensitive),
/// followed by an optional single space, then the token. Multiple spaces or
/// other whitespace are rejected as malformed — this header convention is
/// deliberate, not a typo of the conventional `Bearer `.
fn extract_bearer_token(header_value: &str) -> Result<String, AuthError> {
    const PREFIX: &str = "bearer:";
    if header_value.len() < PREFIX.len()
        || !header_value[..PREFIX.len()].eq_ignore_ascii_case(PREFIX)
    {
        return Err(AuthError::BadRequest {
            reason: "authorization header missing Bearer: prefix".to_string(),
        });
    }
    let rest = &header_value[PREFIX.len()..];
    let token = match rest.strip_prefix(' ') {
        Some(stripped) => stripped,
        None => rest,
    };
    if token.is_empty() || token.starts_with(char::is_whitespace) {
        return Err(AuthError::BadRequest {
            reason: "malformed bearer token whitespace".to_string(),
        });
    }
    Ok(token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_colon_prefix_with_single_space() {
        assert_eq!(extract_bearer_token("Bearer: abc.def.ghi").unwrap(), "abc.def.ghi");
    }

    #[test]
    fn accepts_colon_prefix_without_space() {
        assert_eq!(extract_bearer_token("bearer:abc.def.ghi").unwrap(), "abc.def.ghi");
    }

    #[test]
    fn rejects_conventional_space_only_prefix() {
        assert!(extract_bearer_token("Bearer abc.def.ghi").is_err());
    }

    #[test]
    fn rejects_multiple_spaces_after_colon() {
        assert!(extract_bearer_token("Bearer:  abc.def.ghi").is_err());
    }
}
