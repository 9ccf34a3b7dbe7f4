//! opnflow pipeline server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use opnflow_pipeline::http::{create_router, AppState};
use opnflow_pipeline::{
    BackoffPolicy, CommandStage, MergeStage, PipelineController, ServerConfig, ValidationStage,
};

/// Document pipeline server.
#[derive(Parser, Debug)]
#[command(name = "opnflow-pipeline", about = "opnflow document pipeline server")]
struct Args {
    /// HTTP listen address
    #[arg(long, env = "OPNFLOW_PIPELINE_ADDR", default_value = "127.0.0.1:8000")]
    bind_addr: String,

    /// Renderer command producing group spreadsheets
    #[arg(long, env = "OPNFLOW_GROUP_RENDERER", default_value = "opnflow-render-groups")]
    group_renderer: String,

    /// Extra argument for the group renderer (repeatable)
    #[arg(long = "group-renderer-arg")]
    group_renderer_args: Vec<String>,

    /// Renderer command producing notice documents
    #[arg(long, env = "OPNFLOW_NOTICE_RENDERER", default_value = "opnflow-render-notices")]
    notice_renderer: String,

    /// Extra argument for the notice renderer (repeatable)
    #[arg(long = "notice-renderer-arg")]
    notice_renderer_args: Vec<String>,

    /// Delay before the first retry, in seconds
    #[arg(long, env = "OPNFLOW_RETRY_BASE_DELAY", default_value = "1.0")]
    retry_base_delay: f64,

    /// Factor applied to the delay for each further retry
    #[arg(long, env = "OPNFLOW_RETRY_MULTIPLIER", default_value = "2.0")]
    retry_multiplier: f64,
}

impl Args {
    fn into_config(self) -> Result<ServerConfig, Box<dyn std::error::Error>> {
        let base_delay = Duration::try_from_secs_f64(self.retry_base_delay)
            .map_err(|e| format!("Invalid retry base delay: {e}"))?;
        Ok(ServerConfig {
            bind_addr: self.bind_addr,
            group_renderer: self.group_renderer,
            group_renderer_args: self.group_renderer_args,
            notice_renderer: self.notice_renderer,
            notice_renderer_args: self.notice_renderer_args,
            backoff: BackoffPolicy {
                base_delay,
                multiplier: self.retry_multiplier,
            },
        })
    }
}

fn build_controller(config: &ServerConfig) -> PipelineController {
    let group = config
        .group_renderer_args
        .iter()
        .fold(CommandStage::group(&config.group_renderer), |stage, arg| {
            stage.with_arg(arg)
        });
    let notice = config
        .notice_renderer_args
        .iter()
        .fold(CommandStage::notice(&config.notice_renderer), |stage, arg| {
            stage.with_arg(arg)
        });

    PipelineController::new(
        Arc::new(ValidationStage::new()),
        Arc::new(group),
        Arc::new(notice),
        Arc::new(MergeStage::new()),
    )
    .with_backoff(config.backoff)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let config = Args::parse().into_config()?;
    let addr: SocketAddr = config.bind_addr.parse()?;

    info!(
        group_renderer = %config.group_renderer,
        notice_renderer = %config.notice_renderer,
        "Pipeline configured"
    );

    let state = Arc::new(AppState::new(build_controller(&config)));
    let app = create_router(state);

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Pipeline server listening");
    axum::serve(listener, app).await?;

    Ok(())
}
