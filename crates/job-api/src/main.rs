//! Job service entry point.

use std::sync::Arc;

use broker::{AmqpBroker, AmqpConfig, Broker};
use job_api::config::Config;
use ledger::{CompensationLedger, InMemoryLedger, PostgresLedger};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use transaction::WatchdogConfig;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

async fn serve<L: CompensationLedger + Clone + 'static>(
    config: Config,
    ledger: L,
    broker: Arc<dyn Broker>,
    metrics_handle: PrometheusHandle,
) {
    let watchdog = WatchdogConfig::default().with_interval(config.watchdog_interval());
    let state = job_api::create_state(&config.participant_id, ledger, broker, watchdog);

    // Handlers are registered; consumption may begin.
    let participant = state
        .participant
        .start()
        .await
        .expect("failed to start transaction consumers");
    let recovered = state
        .participant
        .recover()
        .await
        .expect("failed to recover open transactions");
    tracing::info!(recovered, "transaction participant ready");

    let app = job_api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, participant_id = %config.participant_id, "starting job API");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    participant.shutdown();
    tracing::info!("server shut down gracefully");
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Connect to the broker
    let broker = AmqpBroker::connect(AmqpConfig {
        url: config.amqp_url.clone(),
        ..AmqpConfig::default()
    })
    .await
    .expect("failed to connect to AMQP broker");
    let broker: Arc<dyn Broker> = Arc::new(broker);

    // 4. Open the ledger and serve
    match config.database_url.clone() {
        Some(url) => {
            let ledger = PostgresLedger::connect(&url)
                .await
                .expect("failed to connect to PostgreSQL");
            ledger
                .run_migrations()
                .await
                .expect("failed to run ledger migrations");
            tracing::info!("using PostgreSQL compensation ledger");
            serve(config, ledger, broker, metrics_handle).await;
        }
        None => {
            tracing::warn!("DATABASE_URL not set, compensation ledger kept in memory");
            serve(config, InMemoryLedger::new(), broker, metrics_handle).await;
        }
    }
}
