use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use authgate::cache::{spawn_sweeper, ExpiryCache};
use authgate::config::{Cli, Config};
use authgate::decision::AuthDecision;
use authgate::expr::ExpressionEvaluator;
use authgate::http::AuthService;
use authgate::keys::{JwkSource, ReqwestKeyFetcher};
use authgate::policy::{spawn_refresher, PolicyProjection};
use authgate::policy_source::{EmptyPolicySource, FilePolicySource};
use authgate::verifier::TokenVerifier;
use clap::Parser;
use may_minihttp::HttpServer;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli)?;

    let stop = Arc::new(AtomicBool::new(false));

    let jwk_source = Arc::new(JwkSource::new(
        config.static_certs_url.clone(),
        Arc::new(ReqwestKeyFetcher::new()),
        config.jwks_cache_clean_interval.as_secs() as i64 * 5,
    ));
    jwk_source.refresh_static();
    {
        let jwk_source = jwk_source.clone();
        let stop = stop.clone();
        let interval = config.public_certs_refresh_interval;
        std::thread::spawn(move || loop {
            if stop.load(Ordering::Relaxed) {
                break;
            }
            std::thread::sleep(interval);
            if stop.load(Ordering::Relaxed) {
                break;
            }
            jwk_source.refresh_static();
        });
    }
    {
        let jwk_source = jwk_source.clone();
        let stop = stop.clone();
        let interval = config.jwks_cache_clean_interval;
        std::thread::spawn(move || loop {
            if stop.load(Ordering::Relaxed) {
                break;
            }
            std::thread::sleep(interval);
            if stop.load(Ordering::Relaxed) {
                break;
            }
            jwk_source.sweep_issuer_cache(authgate::clock::unix_now());
        });
    }

    let verifier = Arc::new(TokenVerifier::new(jwk_source, config.jwt_leeway_seconds));

    let (policy_reader, workspace_reader): (
        Arc<dyn authgate::policy::PolicyReader>,
        Arc<dyn authgate::policy::WorkspaceReader>,
    ) = match &config.policy_file {
        Some(path) => {
            let source = Arc::new(FilePolicySource::load(path.clone())?);
            (source.clone(), source)
        }
        None => (Arc::new(EmptyPolicySource), Arc::new(EmptyPolicySource)),
    };

    let policy = Arc::new(PolicyProjection::new(
        config.required_role.clone(),
        config.project.clone(),
        policy_reader,
        workspace_reader,
    ));
    let _policy_refresher =
        spawn_refresher(policy.clone(), config.policy_binding_refresh_interval, stop.clone());

    let jwt_cache = ExpiryCache::new();
    let _jwt_sweeper =
        spawn_sweeper(jwt_cache.clone(), config.jwt_cache_clean_interval, stop.clone());

    let evaluator = Arc::new(ExpressionEvaluator::new());
    let decision = Arc::new(AuthDecision::new(jwt_cache, verifier, policy, evaluator));

    let ready = Arc::new(AtomicBool::new(true));
    let service = AuthService::new(decision, config.original_url_header.clone(), ready);

    let addr = config.bind_addr();
    let server = HttpServer(service).start(addr.as_str()).map_err(|e| anyhow::anyhow!("{e}"))?;
    tracing::info!(addr, "authgate listening");

    register_shutdown(stop.clone())?;

    server.join().map_err(|e| anyhow::anyhow!("server error: {e:?}"))?;
    Ok(())
}

#[cfg(unix)]
fn register_shutdown(stop: Arc<AtomicBool>) -> anyhow::Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGTERM, SIGINT])?;
    std::thread::spawn(move || {
        if signals.forever().next().is_some() {
            tracing::info!("shutdown signal received, stopping background refreshers");
            stop.store(true, Ordering::Relaxed);
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn register_shutdown(_stop: Arc<AtomicBool>) -> anyhow::Result<()> {
    Ok(())
}
