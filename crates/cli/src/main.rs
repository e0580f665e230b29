//! Runs the demo order consumer and config watch against a NATS server.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod handlers;

use handlers::{LogChanges, LogOrders};

use std::time::Duration;

use clap::{Parser, ValueEnum};
use courier_broker_nats::{Error as NatsError, NatsBroker, NatsBrokerOptions};
use courier_client::{
    BucketWatcher, ConnectConfig, Connection, ConnectionError, ConnectionManager, ConsumerError,
    ConsumerSupervisor, DEFAULT_SERVER, JsonCodec, KvBucket, KvError, PublishError, Publisher,
    ShutdownConfig, StreamAdmin, StreamError, StreamSpec, SupervisorConfig, WatchError,
};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// CLI-specific error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Could not connect
    #[error(transparent)]
    Connect(#[from] ConnectionError<NatsError>),

    /// Could not start the consumer
    #[error(transparent)]
    Consumer(#[from] ConsumerError<NatsError>),

    /// Could not open the bucket or write the demo value
    #[error(transparent)]
    Kv(#[from] KvError<NatsError>),

    /// Could not publish demo traffic
    #[error(transparent)]
    Publish(#[from] PublishError<NatsError>),

    /// Some tasks did not stop cleanly
    #[error("{0} task(s) did not stop cleanly")]
    Shutdown(usize),

    /// Could not ensure the stream
    #[error(transparent)]
    Stream(#[from] StreamError<NatsError>),

    /// Could not start the watch
    #[error(transparent)]
    Watch(#[from] WatchError<NatsError>),
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// NATS servers, comma separated
    #[arg(
        long,
        default_value = DEFAULT_SERVER,
        env = "COURIER_SERVERS",
        value_delimiter = ','
    )]
    servers: Vec<String>,

    /// Client name reported to the server
    #[arg(long, default_value = "courier", env = "COURIER_CLIENT_NAME")]
    client_name: String,

    /// Connection attempts before giving up
    #[arg(long, default_value_t = 3, env = "COURIER_CONNECT_ATTEMPTS")]
    connect_attempts: usize,

    /// Timeout of a single connection attempt, in seconds
    #[arg(long, default_value_t = 5, env = "COURIER_CONNECT_TIMEOUT_SECS")]
    connect_timeout_secs: u64,

    /// Stream holding the orders
    #[arg(long, default_value = "orders", env = "COURIER_STREAM")]
    stream: String,

    /// Subject orders are published on
    #[arg(long, default_value = "orders", env = "COURIER_SUBJECT")]
    subject: String,

    /// Durable name of the order consumer
    #[arg(long, default_value = "orders_worker", env = "COURIER_DURABLE")]
    durable: String,

    /// Seconds before an unacknowledged order is redelivered
    #[arg(long, default_value_t = 30, env = "COURIER_ACK_WAIT_SECS")]
    ack_wait_secs: u64,

    /// Key-value bucket to open and watch
    #[arg(long, default_value = "cfg", env = "COURIER_BUCKET")]
    bucket: String,

    /// Seconds shutdown waits for tasks before aborting them
    #[arg(long, default_value_t = 10, env = "COURIER_GRACE_PERIOD_SECS")]
    grace_period_secs: u64,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty, env = "COURIER_LOG_FORMAT")]
    log_format: LogFormat,

    /// Publish two demo orders and set `cfg:flag` after startup
    #[arg(long, env = "COURIER_PUBLISH_DEMO")]
    publish_demo: bool,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn publish_demo(
    args: &Args,
    publisher: &Publisher<NatsBroker, JsonCodec>,
    bucket: &KvBucket<NatsBroker, JsonCodec>,
) -> Result<(), Error> {
    for n in 1..=2 {
        publisher
            .publish(&args.subject, &json!({ "text": format!("hello {n}") }))
            .await?;
    }

    bucket.put("cfg:flag", &true).await?;
    info!("published demo traffic");

    Ok(())
}

async fn start(args: &Args, connection: &Connection<NatsBroker>) -> Result<(), Error> {
    StreamAdmin::new(connection)
        .ensure_stream(&StreamSpec::new(&args.stream, [args.subject.as_str()]))
        .await?;

    ConsumerSupervisor::new(connection, SupervisorConfig::default())
        .add_subscription(
            &args.subject,
            &args.durable,
            LogOrders,
            Duration::from_secs(args.ack_wait_secs),
        )
        .await?;

    let bucket = KvBucket::open(connection, &args.bucket, JsonCodec).await?;
    BucketWatcher::new(connection, JsonCodec)
        .watch_bucket::<Value, _>(&args.bucket, LogChanges)
        .await?;

    if args.publish_demo {
        publish_demo(args, &Publisher::new(connection, JsonCodec), &bucket).await?;
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();
    init_tracing(args.log_format);

    // Create shared shutdown token
    let shutdown_token = CancellationToken::new();

    // Set up signal handlers
    let signal_shutdown_token = shutdown_token.clone();
    tokio::spawn(async move {
        if cfg!(unix) {
            use tokio::signal::unix::{SignalKind, signal};

            let mut sigterm = signal(SignalKind::terminate()).expect("SIGTERM handler failed");
            let mut sigint = signal(SignalKind::interrupt()).expect("SIGINT handler failed");

            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = sigint.recv() => info!("Received SIGINT"),
            }
        } else {
            // Fall back to just ctrl-c on non-unix platforms
            let _ = tokio::signal::ctrl_c().await;
            info!("Received interrupt signal");
        }

        signal_shutdown_token.cancel();
    });

    let manager = ConnectionManager::<NatsBroker>::connect(
        ConnectConfig {
            servers: args.servers.clone(),
            max_attempts: args.connect_attempts,
            connect_timeout: Duration::from_secs(args.connect_timeout_secs),
            ..ConnectConfig::default()
        },
        NatsBrokerOptions {
            connection_timeout: Duration::from_secs(args.connect_timeout_secs),
            name: Some(args.client_name.clone()),
        },
    )
    .await?
    .with_shutdown_config(ShutdownConfig {
        grace_period: Duration::from_secs(args.grace_period_secs),
    });
    let connection = manager.connection();

    if let Err(e) = start(&args, &connection).await {
        error!(error = %e, "startup failed");
        manager.disconnect().await;
        return Err(e);
    }

    info!(tasks = connection.task_count(), "running, waiting for shutdown signal");
    shutdown_token.cancelled().await;

    let report = manager.disconnect().await;
    for task in report.failures() {
        error!(task = %task.name, kind = %task.kind, outcome = %task.outcome, "task failed");
    }

    if report.is_clean() {
        info!(tasks = report.tasks.len(), "shutdown complete");
        Ok(())
    } else {
        let failures = report.failures().count();
        warn!(failures, "shutdown completed with failures");
        Err(Error::Shutdown(failures))
    }
}
