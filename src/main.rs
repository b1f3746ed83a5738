use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};

use stockpulse::alerts::{cooldown, AlertEvaluator, LogNotifier};
use stockpulse::api::{self, AppState};
use stockpulse::config::{Settings, TransportBackend};
use stockpulse::market_data::adapters::alpha_vantage::AlphaVantageClient;
use stockpulse::market_data::QuoteSource;
use stockpulse::persist::memory::MemoryStore;
use stockpulse::persist::postgres::PostgresStore;
use stockpulse::persist::AlertStore;
use stockpulse::service::ServiceManager;
use stockpulse::stream::memory::{MemoryBroker, MemoryTransport};
use stockpulse::stream::producer::PriceStreamProducer;
use stockpulse::stream::PriceTransport;
use stockpulse::telemetry;

#[derive(Parser, Debug)]
#[command(name = "stockpulse", about = "Portfolio price streaming and alert service")]
struct Cli {
    /// Optional settings file (toml, yaml or json); environment variables override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides BIND_ADDR
    #[arg(long)]
    bind: Option<String>,
}

async fn build_store(settings: &Settings) -> anyhow::Result<Arc<dyn AlertStore>> {
    match &settings.database_url {
        Some(url) => {
            let store = PostgresStore::connect(url).await.context("connecting to postgres")?;
            store.migrate().await.context("running migrations")?;
            info!("using postgres alert store");
            Ok(Arc::new(store))
        }
        None => {
            warn!("DATABASE_URL not set, using an empty in-memory alert store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

fn build_transport(settings: &Settings) -> anyhow::Result<Arc<dyn PriceTransport>> {
    match settings.transport_backend()? {
        TransportBackend::Memory => {
            info!(topic = %settings.price_topic, "using in-process price broker");
            Ok(Arc::new(MemoryTransport::new(
                MemoryBroker::new(),
                &settings.price_topic,
                &settings.kafka_group_id,
            )))
        }
        #[cfg(feature = "kafka")]
        TransportBackend::Kafka => {
            info!(brokers = %settings.kafka_bootstrap_servers, topic = %settings.price_topic, "using kafka price transport");
            Ok(Arc::new(stockpulse::stream::kafka::KafkaTransport::new(settings)))
        }
        #[cfg(not(feature = "kafka"))]
        TransportBackend::Kafka => anyhow::bail!("PRICE_TRANSPORT=kafka requires building with the `kafka` feature"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok(); // load .env

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;
    telemetry::init_tracing(&settings.log_filter);
    telemetry::init_metrics(settings.metrics_port)?;

    let quotes: Arc<dyn QuoteSource> = Arc::new(AlphaVantageClient::new(
        &settings.stock_api_url,
        &settings.stock_api_key,
        settings.stock_api_timeout(),
    )?);
    if settings.stock_api_key.is_empty() {
        warn!("STOCK_API_KEY is empty, quote requests will be rejected upstream");
    }

    let store = build_store(&settings).await?;
    let limiter = cooldown::open(&settings.rate_limit_backend()?)?;
    let transport = build_transport(&settings)?;

    let producer = Arc::new(PriceStreamProducer::new(Arc::clone(&quotes), settings.poll_interval()));
    match store.tracked_symbols().await {
        Ok(symbols) => {
            for symbol in &symbols {
                producer.add_symbol(symbol);
            }
            info!(count = symbols.len(), "seeded tracked symbols from holdings");
        }
        Err(e) => warn!(error = %e, "could not load held symbols, starting with none tracked"),
    }

    let evaluator = Arc::new(AlertEvaluator::new(
        store,
        limiter,
        Arc::new(LogNotifier),
        settings.alert_cooldown(),
    ));
    let services = Arc::new(ServiceManager::new(
        Arc::clone(&producer),
        Arc::clone(&evaluator),
        transport,
        settings.shutdown_timeout(),
    ));
    services.start_services().await;

    let app = api::router(Arc::new(AppState {
        producer,
        quotes,
        evaluator,
        services: Arc::clone(&services),
    }));

    let bind_addr = cli.bind.unwrap_or_else(|| settings.bind_addr.clone());
    let served = async {
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("binding {bind_addr}"))?;
        info!(addr = %bind_addr, "http server listening");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("http server")
    }
    .await;

    services.stop_services().await;
    if let Err(e) = &served {
        error!(error = %e, "server exited with error");
    }
    served
}
