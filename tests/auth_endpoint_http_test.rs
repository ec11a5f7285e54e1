//! HTTP-level integration tests for `AuthEndpoint` (C7), driven over a raw
//! `TcpStream` against the real `may_minihttp` listener — grounded on the
//! teacher's `tests/security_tests.rs` `send_request`/RAII-server pattern,
//! simplified because this endpoint's responses are always body-less.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use authgate::cache::ExpiryCache;
use authgate::decision::AuthDecision;
use authgate::error::AuthError;
use authgate::expr::ExpressionEvaluator;
use authgate::http::AuthService;
use authgate::keys::{JwkSource, ReqwestKeyFetcher};
use authgate::policy::{Member, PolicyProjection, PolicyReader, RawBinding, WorkspaceReader};
use authgate::verifier::TokenVerifier;
use jsonwebtoken::{encode, EncodingKey, Header};
use may_minihttp::HttpServer;
use serde::Serialize;

const TEST_PRIVATE_KEY_PEM: &str = include_str!("fixtures/test_rsa_private_key.pem");
const TEST_PUBLIC_KEY_PEM: &str = include_str!("fixtures/test_rsa_public_key.pem");
const TEST_KID: &str = "test-kid-1";
const TEST_ISSUER: &str = "https://accounts.google.com";
const TEST_AUDIENCE_HOST: &str = "api.example";

#[derive(Serialize)]
struct Claims {
    iss: String,
    aud: String,
    email: String,
    iat: i64,
    exp: i64,
}

fn sign(email: &str, aud: &str) -> String {
    let now = authgate::clock::unix_now();
    let mut header = Header::new(jsonwebtoken::Algorithm::RS256);
    header.kid = Some(TEST_KID.to_string());
    let claims =
        Claims { iss: TEST_ISSUER.to_string(), aud: aud.to_string(), email: email.to_string(), iat: now, exp: now + 3600 };
    let key = EncodingKey::from_rsa_pem(TEST_PRIVATE_KEY_PEM.as_bytes()).expect("valid test key");
    encode(&header, &claims, &key).expect("token signs")
}

struct MockCertsServer {
    addr: String,
    handle: Option<std::thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

static NEXT_MOCK_PORT: AtomicU16 = AtomicU16::new(18180);

impl MockCertsServer {
    fn start() -> Self {
        let port = NEXT_MOCK_PORT.fetch_add(1, Ordering::SeqCst);
        let addr = format!("127.0.0.1:{port}");
        let server = tiny_http::Server::http(&addr).expect("bind mock certs server");
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        let body = {
            let mut map = HashMap::new();
            map.insert(TEST_KID.to_string(), TEST_PUBLIC_KEY_PEM.to_string());
            serde_json::to_string(&map).expect("serialize certs body")
        };
        let handle = std::thread::spawn(move || {
            while !shutdown_clone.load(Ordering::Relaxed) {
                if let Ok(Some(request)) = server.recv_timeout(Duration::from_millis(100)) {
                    let response = tiny_http::Response::from_string(body.clone());
                    let _ = request.respond(response);
                }
            }
        });
        Self { addr, handle: Some(handle), shutdown }
    }

    fn url(&self) -> String {
        format!("http://{}/certs", self.addr)
    }
}

impl Drop for MockCertsServer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

struct FixedPolicy(Vec<RawBinding>);
impl PolicyReader for FixedPolicy {
    fn bindings_for_role_in_project(
        &self,
        _role: &str,
        _project: &str,
    ) -> Result<Vec<RawBinding>, AuthError> {
        Ok(self.0.clone())
    }
}
impl WorkspaceReader for FixedPolicy {
    fn members_of_group(&self, _group: &str) -> Result<Vec<String>, AuthError> {
        Ok(Vec::new())
    }
}

/// RAII handle for the running `AuthService` listener, mirroring the
/// teacher's `ServerHandle::stop()` unsafe-cancel-then-join shape.
struct RunningAuthEndpoint {
    certs: MockCertsServer,
    addr: std::net::SocketAddr,
    handle: Option<may::coroutine::JoinHandle<()>>,
}

impl RunningAuthEndpoint {
    fn start(bindings: Vec<RawBinding>) -> Self {
        may::config().set_stack_size(0x8000);
        let certs = MockCertsServer::start();
        let jwk_source =
            Arc::new(JwkSource::new(certs.url(), Arc::new(ReqwestKeyFetcher::new()), 300));
        jwk_source.refresh_static();
        let verifier = Arc::new(TokenVerifier::new(jwk_source, 60));

        let policy = Arc::new(PolicyProjection::new(
            "httpsResourceAccessor".into(),
            "proj".into(),
            Arc::new(FixedPolicy(bindings)),
            Arc::new(FixedPolicy(Vec::new())),
        ));
        policy.refresh();

        let jwt_cache = ExpiryCache::new();
        let evaluator = Arc::new(ExpressionEvaluator::new());
        let decision = Arc::new(AuthDecision::new(jwt_cache, verifier, policy, evaluator));
        let ready = Arc::new(AtomicBool::new(true));
        let service = AuthService::new(decision, "X-Original-URL".to_string(), ready);

        let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
        let addr = listener.local_addr().expect("local addr");
        drop(listener);

        let handle = HttpServer(service).start(addr).expect("start auth listener");
        for _ in 0..50 {
            if TcpStream::connect(addr).is_ok() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        Self { certs, addr, handle: Some(handle) }
    }

    fn status_line(&self, request: &str) -> String {
        let mut stream = TcpStream::connect(self.addr).expect("connect to auth endpoint");
        stream.write_all(request.as_bytes()).expect("write request");
        stream.set_read_timeout(Some(Duration::from_millis(500))).unwrap();

        let mut buf = Vec::new();
        for _ in 0..10 {
            let mut tmp = [0u8; 1024];
            match stream.read(&mut tmp) {
                Ok(0) => break,
                Ok(n) => {
                    buf.extend_from_slice(&tmp[..n]);
                    if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    std::thread::sleep(Duration::from_millis(50));
                }
                Err(e) => panic!("read error: {e:?}"),
            }
        }
        let text = String::from_utf8_lossy(&buf);
        text.lines().next().unwrap_or_default().to_string()
    }
}

impl Drop for RunningAuthEndpoint {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            // SAFETY: test-only teardown, mirrors the teacher's
            // `ServerHandle::stop()` coroutine cancellation.
            unsafe {
                handle.coroutine().cancel();
            }
            let _ = handle.join();
        }
        let _ = &self.certs;
    }
}

#[test]
fn healthz_is_always_200_once_ready() {
    let endpoint = RunningAuthEndpoint::start(Vec::new());
    let status = endpoint.status_line("GET /healthz HTTP/1.1\r\nHost: x\r\n\r\n");
    assert!(status.contains("200"), "unexpected status line: {status}");
}

#[test]
fn auth_allows_valid_token_with_unconditional_binding() {
    let endpoint = RunningAuthEndpoint::start(vec![RawBinding {
        member: Member::Principal("svc@p.iam".into()),
        title: "unconditional".into(),
        expression: None,
    }]);
    let token = sign("svc@p.iam", &format!("https://{TEST_AUDIENCE_HOST}"));
    let request = format!(
        "GET /auth HTTP/1.1\r\nHost: x\r\nX-Forwarded-Authorization: Bearer:{token}\r\nX-Original-URL: https://{TEST_AUDIENCE_HOST}/v1/users\r\n\r\n"
    );
    let status = endpoint.status_line(&request);
    assert!(status.contains("200"), "unexpected status line: {status}");
}

#[test]
fn auth_denies_missing_authorization_header() {
    let endpoint = RunningAuthEndpoint::start(vec![RawBinding {
        member: Member::Principal("svc@p.iam".into()),
        title: "unconditional".into(),
        expression: None,
    }]);
    let request = format!(
        "GET /auth HTTP/1.1\r\nHost: x\r\nX-Original-URL: https://{TEST_AUDIENCE_HOST}/v1/users\r\n\r\n"
    );
    let status = endpoint.status_line(&request);
    assert!(status.contains("407"), "unexpected status line: {status}");
}

#[test]
fn auth_denies_unauthorized_principal() {
    let endpoint = RunningAuthEndpoint::start(Vec::new());
    let token = sign("stranger@p.iam", &format!("https://{TEST_AUDIENCE_HOST}"));
    let request = format!(
        "GET /auth HTTP/1.1\r\nHost: x\r\nX-Forwarded-Authorization: Bearer:{token}\r\nX-Original-URL: https://{TEST_AUDIENCE_HOST}/v1/users\r\n\r\n"
    );
    let status = endpoint.status_line(&request);
    assert!(status.contains("407"), "unexpected status line: {status}");
}
