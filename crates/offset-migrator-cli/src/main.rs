//! Kafka Offset Migrator CLI
//!
//! Copies committed consumer group offsets to renamed groups and topics,
//! loop after loop, so a renamed consumer can take over where the old one
//! stopped.

use clap::Parser;
use tokio::signal;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use offset_migrator_core::config::{ClientConfig, LoggingConfig};
use offset_migrator_core::{KafkaOffsetAdmin, MigrationConfig, MigrationMetrics, Scheduler};

/// Kafka consumer group offset migrator.
#[derive(Parser)]
#[command(name = "kafka-offset-migrator")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Client configuration file (cluster connection, logging, metrics).
    #[arg(short = 'c', long = "command-config")]
    command_config: String,

    /// Migration rules file (`.properties` or YAML).
    #[arg(short = 'm', long = "migration", visible_alias = "migration-file")]
    migration: String,

    /// Increase logging verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let client = ClientConfig::from_file(&args.command_config)?;

    let log_config = match args.verbose {
        0 => client.logging.clone(),
        1 => LoggingConfig {
            level: "debug".to_string(),
            ..client.logging.clone()
        },
        _ => LoggingConfig {
            level: "trace".to_string(),
            ..client.logging.clone()
        },
    };
    setup_tracing(&log_config);

    let migration = MigrationConfig::from_file(&args.migration)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        sets = migration.sets.len(),
        loops = %migration.loops,
        interval_ms = migration.interval.as_millis(),
        require_stable = migration.require_stable,
        "starting kafka offset migrator"
    );

    if !migration.has_targets() {
        info!(migration = %args.migration, "no migration targets configured, nothing to do");
        return Ok(());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move { run_migration(client, migration).await })
}

fn setup_tracing(config: &LoggingConfig) {
    let level = match config.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer()).init();
    }
}

async fn run_migration(client: ClientConfig, migration: MigrationConfig) -> anyhow::Result<()> {
    let metrics = MigrationMetrics::new();

    if client.metrics.enabled {
        let server_metrics = metrics.clone();
        let metrics_addr = client.metrics.address.clone();
        tokio::spawn(async move {
            if let Err(e) = start_metrics_server(&metrics_addr, server_metrics).await {
                tracing::error!(error = %e, "metrics server error");
            }
        });
    }

    info!(
        bootstrap_servers = ?client.kafka.bootstrap_servers,
        protocol = ?client.kafka.security_protocol,
        "connecting to kafka cluster"
    );
    let admin = KafkaOffsetAdmin::connect(&client.kafka).await?;
    info!("connected to kafka cluster");

    let mut scheduler = Scheduler::new(migration).with_metrics(metrics);

    tokio::select! {
        reports = scheduler.run(&admin) => {
            let written: usize = reports.iter().map(|r| r.offsets_written).sum();
            info!(loops = reports.len(), offsets_written = written, "migration finished");
        }
        () = shutdown_signal() => {
            info!("shutdown signal received, stopping migration");
        }
    }

    admin.close().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl+c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

async fn start_metrics_server(
    addr: &str,
    metrics: MigrationMetrics,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response};
    use hyper_util::rt::TokioIo;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    let addr: SocketAddr = addr.parse()?;
    let listener = TcpListener::bind(addr).await?;

    info!(address = %addr, "metrics server listening");

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let service = service_fn(move |_req: Request<hyper::body::Incoming>| {
                let metrics = metrics.clone();
                async move {
                    let body = metrics.encode().unwrap_or_default();
                    Ok::<_, hyper::Error>(Response::new(Full::new(Bytes::from(body))))
                }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::debug!(error = %e, "metrics connection error");
            }
        });
    }
}
