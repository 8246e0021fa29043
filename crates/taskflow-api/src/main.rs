//! Taskflow REST API entry point.
//!
//! Binary name: `taskflow`
//!
//! Loads settings from the environment (with CLI overrides), initializes the
//! database and supervisor, resumes any runs interrupted by the previous
//! shutdown, then serves the REST API.

use clap::Parser;

use taskflow_api::http;
use taskflow_api::state::AppState;
use taskflow_infra::settings::Settings;

#[derive(Parser)]
#[command(name = "taskflow", version, about = "LLM workflow execution engine")]
struct Cli {
    /// Address to bind the HTTP server to.
    #[arg(long, env = "TASKFLOW_BIND_ADDR")]
    bind: Option<String>,

    /// SQLite database URL.
    #[arg(long, env = "TASKFLOW_DATABASE_URL")]
    database_url: Option<String>,

    /// Export spans to stdout via OpenTelemetry.
    #[arg(long)]
    otel: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    taskflow_observe::tracing_setup::init_tracing(cli.otel)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let mut settings = Settings::from_env()?;
    if let Some(bind) = cli.bind {
        settings.bind_addr = bind;
    }
    if let Some(database_url) = cli.database_url {
        settings.database_url = database_url;
    }

    let state = AppState::init(&settings).await?;

    // Pick runs interrupted by the previous shutdown back up before
    // accepting new work.
    let resumed = state.supervisor.resume_incomplete_runs().await?;
    if resumed > 0 {
        tracing::info!(count = resumed, "resumed interrupted runs");
    }

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr).await?;
    tracing::info!(
        addr = %settings.bind_addr,
        provider = %settings.provider,
        "taskflow API listening"
    );

    let router = http::router::build_router(state);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    taskflow_observe::tracing_setup::shutdown_tracing();
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
