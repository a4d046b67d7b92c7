use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_bridge::codec::TokenCodec;
use api_bridge::config::{self, Config};
use api_bridge::jobs::sweeper::{self, ExpirySweeper};
use api_bridge::lifecycle::TokenLifecycle;
use api_bridge::proxy::upstream::HttpForwarder;
use api_bridge::{router, store, AppState};

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = cli::Cli::parse();
    let cfg = config::load(args.config.as_deref())?;

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => run_server(cfg, port).await,
        Some(cli::Commands::Sweep) => run_sweep(cfg).await,
        None => run_server(cfg, None).await,
    };

    opentelemetry::global::shutdown_tracer_provider();

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

/// Logs to stdout, plus an OTLP exporter when OTEL_EXPORTER_OTLP_ENDPOINT is set.
fn init_tracing() {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let installed = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "api-bridge"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio);
        match installed {
            Ok(tracer) => Some(tracing_opentelemetry::layer().with_tracer(tracer)),
            Err(e) => {
                eprintln!("failed to install OpenTelemetry tracer, continuing without it: {}", e);
                None
            }
        }
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "api_bridge=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .init();
}

async fn run_server(cfg: Config, port: Option<u16>) -> anyhow::Result<()> {
    let store = store::connect(cfg.store.as_ref()).await?;

    let lifecycle = TokenLifecycle::new(
        store.clone(),
        TokenCodec::new(&cfg.secret)?,
        cfg.token_policy(),
    );
    let forwarder = HttpForwarder::new(
        &cfg.redirect_url,
        &cfg.resource_server_token,
        cfg.upstream_timeout(),
    )?;

    let state = Arc::new(AppState {
        lifecycle,
        forwarder: Arc::new(forwarder),
    });

    let sweeper = ExpirySweeper::new(store.clone(), cfg.expiration())?.spawn();
    tracing::info!(
        every_minutes = cfg.token_expiration_time,
        "Expiry sweeper started"
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port.unwrap_or(cfg.port)));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(upstream = %cfg.redirect_url, "API bridge listening on {}", addr);

    let served = axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    tracing::info!("Shutting down");
    sweeper.shutdown().await;
    store.close().await;

    served?;
    Ok(())
}

async fn run_sweep(cfg: Config) -> anyhow::Result<()> {
    let store = store::connect(cfg.store.as_ref()).await?;
    let result = sweeper::sweep_once(store.as_ref(), cfg.expiration()).await;
    store.close().await;

    let removed = result?;
    println!("Removed {} expired token(s).", removed);
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
