//! AirStation Service - sensor bridge collector, alerting and HTTP API.
//!
//! Run with: `cargo run -p airstation-service`

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use clap::{Parser, Subcommand};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use airstation_core::live::DEFAULT_CHANNEL_CAPACITY;
use airstation_core::{AlarmNotifier, Monitor, Preferences};
use airstation_service::notify::default_sink;
use airstation_service::{
    AppState, BridgeSource, Config, EvaluationScheduler, FileBackend, TerminalBellSiren, api, ws,
};
use airstation_store::SqliteHistory;

/// AirStation Service - sensor bridge collector, alerting and HTTP API.
#[derive(Parser, Debug)]
#[command(name = "airstation-service")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Bind address (overrides config).
    #[arg(short, long, global = true)]
    bind: Option<String>,

    /// Database path (overrides config).
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Sensor bridge address as host:port (overrides config).
    #[arg(short, long, global = true)]
    source: Option<String>,

    /// Collect and serve only; do not evaluate alerts.
    #[arg(long, global = true)]
    no_evaluator: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the service in the foreground (default behavior).
    Run,

    /// Connect to the bridge, run one alert evaluation and print the result.
    Check,
}

/// Everything the monitor needs, built from the configuration.
struct Components {
    history: Arc<SqliteHistory>,
    preferences: Arc<Preferences>,
    alarm: Arc<AlarmNotifier>,
    source: BridgeSource,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("airstation_service=info".parse()?)
                .add_directive("airstation_core=info".parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();

    let config = load_config(&args)?;

    match args.command {
        Some(Command::Check) => run_check(config).await,
        Some(Command::Run) | None => run_server(config, args.no_evaluator).await,
    }
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    if let Some(bind) = &args.bind {
        config.server.bind = bind.clone();
    }
    if let Some(db_path) = &args.database {
        config.storage.path = db_path.clone();
    }
    if let Some(source) = &args.source {
        config.source.address = source.clone();
    }

    config.validate()?;
    Ok(config)
}

async fn build(config: &Config) -> anyhow::Result<Components> {
    let history = Arc::new(SqliteHistory::open(&config.storage.path)?);

    let backend = Arc::new(FileBackend::new(&config.preferences.path));
    let preferences = Arc::new(Preferences::open(backend).await?);

    let alarm = Arc::new(AlarmNotifier::with_duration(
        default_sink(),
        Arc::new(TerminalBellSiren::default()),
        config.monitor.alarm_duration(),
    ));

    Ok(Components {
        history,
        preferences,
        alarm,
        source: BridgeSource::from_config(&config.source),
    })
}

fn start_monitor(config: &Config, components: &Components) -> anyhow::Result<Monitor> {
    let monitor = Monitor::start(
        &components.source,
        components.history.clone(),
        components.preferences.clone(),
        components.alarm.clone(),
        config.monitor.options(DEFAULT_CHANNEL_CAPACITY),
    )?;
    Ok(monitor)
}

async fn run_check(config: Config) -> anyhow::Result<()> {
    let components = build(&config).await?;
    let monitor = start_monitor(&config, &components)?;

    let scheduler = EvaluationScheduler::new(
        monitor.evaluator().clone(),
        config.monitor.evaluation_interval(),
        config.monitor.retry.clone(),
    );
    let result = scheduler.run_once().await;
    monitor.shutdown().await;

    let outcome = result?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn run_server(config: Config, no_evaluator: bool) -> anyhow::Result<()> {
    let components = build(&config).await?;
    let state = AppState::new(
        components.history.clone(),
        components.preferences.clone(),
        config.clone(),
    );

    let monitor = start_monitor(&config, &components)?;
    state.attach(monitor.persistence().clone(), components.alarm.clone());
    monitor.spawn(
        Arc::clone(&state).relay_readings(monitor.feed().subscribe(), monitor.cancel_token()),
    );

    if no_evaluator {
        info!("Alert evaluation disabled");
    } else {
        let scheduler = EvaluationScheduler::new(
            monitor.evaluator().clone(),
            config.monitor.evaluation_interval(),
            config.monitor.retry.clone(),
        )
        .with_stats(state.evaluation.clone());
        monitor.spawn(scheduler.run(monitor.cancel_token()));
    }

    let app = Router::new()
        .merge(api::router())
        .merge(ws::router())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    let addr: SocketAddr = config.server.bind.parse()?;
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    monitor.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
