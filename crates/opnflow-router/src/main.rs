//! opnflow router server.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use opnflow_router::http::create_router;
use opnflow_router::{
    AgentRegistry, AppState, HttpClassifier, HttpDispatcher, RequestRouter, RouterConfig,
};

/// Request router server.
#[derive(Parser, Debug)]
#[command(name = "opnflow-router", about = "opnflow request router")]
struct Args {
    /// HTTP listen address
    #[arg(long, env = "OPNFLOW_ROUTER_ADDR", default_value = "127.0.0.1:8001")]
    bind_addr: String,

    /// Agent registry file (JSON)
    #[arg(long, env = "OPNFLOW_REGISTRY", default_value = "agents.json")]
    registry: PathBuf,

    /// Routing service endpoint for intent classification
    #[arg(long, env = "OPNFLOW_CLASSIFIER_URL", default_value = "http://127.0.0.1:8002/route")]
    classifier_url: String,

    /// Classification timeout in seconds
    #[arg(long, env = "OPNFLOW_CLASSIFIER_TIMEOUT", default_value = "30")]
    classifier_timeout: u64,

    /// Dispatch timeout in seconds for agents that set none
    #[arg(long, env = "OPNFLOW_DISPATCH_TIMEOUT", default_value = "300")]
    dispatch_timeout: u64,
}

impl From<Args> for RouterConfig {
    fn from(args: Args) -> Self {
        Self {
            bind_addr: args.bind_addr,
            registry_path: args.registry,
            classifier_url: args.classifier_url,
            classifier_timeout: Duration::from_secs(args.classifier_timeout),
            default_dispatch_timeout: Duration::from_secs(args.dispatch_timeout),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let config = RouterConfig::from(Args::parse());
    let addr: SocketAddr = config.bind_addr.parse()?;

    // Without a registry nothing can be routed.
    let registry = AgentRegistry::from_json_file(&config.registry_path)?;
    info!(
        path = %config.registry_path.display(),
        agents = registry.len(),
        "Agent registry loaded"
    );

    let router = RequestRouter::new(
        Arc::new(registry),
        Arc::new(HttpClassifier::new(
            &config.classifier_url,
            config.classifier_timeout,
        )),
        Arc::new(HttpDispatcher::new()),
    )
    .with_default_timeout(config.default_dispatch_timeout);

    let app = create_router(Arc::new(AppState::new(router)));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, classifier = %config.classifier_url, "Router listening");
    axum::serve(listener, app).await?;

    Ok(())
}
