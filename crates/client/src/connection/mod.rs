mod error;

pub use error::Error;

use crate::config::{ConnectConfig, ShutdownConfig};
use crate::registry::TaskRegistry;
use crate::shutdown::{ShutdownCoordinator, ShutdownReport};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use courier_broker::{Broker, BrokerError, ErrorKind};
use tokio::sync::OnceCell;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

#[derive(Debug)]
struct Inner<B>
where
    B: Broker,
{
    broker: B,
    closed: AtomicBool,
    registry: TaskRegistry,
    shutdown: OnceCell<ShutdownReport>,
}

/// Shared handle to an established broker connection.
///
/// Clones are cheap and refer to the same connection. A handle cannot close
/// the connection; only [`ConnectionManager::disconnect`] or a
/// [`ShutdownCoordinator`] can.
#[derive(Debug)]
pub struct Connection<B>
where
    B: Broker,
{
    inner: Arc<Inner<B>>,
}

impl<B> Clone for Connection<B>
where
    B: Broker,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<B> Connection<B>
where
    B: Broker,
{
    /// Wraps an already connected broker.
    pub fn new(broker: B) -> Self {
        Self {
            inner: Arc::new(Inner {
                broker,
                closed: AtomicBool::new(false),
                registry: TaskRegistry::default(),
                shutdown: OnceCell::new(),
            }),
        }
    }

    /// Whether the connection has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Number of background tasks still running on this connection.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.inner.registry.len()
    }

    pub(crate) fn broker(&self) -> &B {
        &self.inner.broker
    }

    pub(crate) fn registry(&self) -> &TaskRegistry {
        &self.inner.registry
    }

    pub(crate) fn shutdown_cell(&self) -> &OnceCell<ShutdownReport> {
        &self.inner.shutdown
    }

    pub(crate) fn mark_closed(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }
}

/// Owns the broker connection and its lifecycle.
#[derive(Debug)]
pub struct ConnectionManager<B>
where
    B: Broker,
{
    connection: Connection<B>,
    shutdown: ShutdownConfig,
}

impl<B> ConnectionManager<B>
where
    B: Broker,
{
    /// Connects to the first reachable server, retrying with exponential
    /// backoff and jitter up to `config.max_attempts` times.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::NoServers`] without any attempt if the server list
    /// is empty, and with [`Error::Connect`] or [`Error::Timeout`] once the
    /// attempts are exhausted. Errors that are not about reachability are not
    /// retried.
    pub async fn connect(
        config: ConnectConfig,
        options: B::Options,
    ) -> Result<Self, Error<B::Error>> {
        if config.servers.is_empty() {
            return Err(Error::NoServers);
        }

        let max_attempts = config.max_attempts.max(1);
        let mut attempts = 0;
        let mut delay = config.retry_base_delay;

        loop {
            attempts += 1;

            match timeout(
                config.connect_timeout,
                B::connect(&config.servers, options.clone()),
            )
            .await
            {
                Ok(Ok(broker)) => {
                    info!(servers = ?config.servers, attempts, "connected");

                    return Ok(Self {
                        connection: Connection::new(broker),
                        shutdown: ShutdownConfig::default(),
                    });
                }
                Ok(Err(e)) => {
                    let retriable = matches!(e.kind(), ErrorKind::Unreachable | ErrorKind::TimedOut);

                    if !retriable || attempts >= max_attempts {
                        error!(servers = ?config.servers, attempts, error = %e, "failed to connect");
                        return Err(Error::Connect {
                            attempts,
                            source: e,
                        });
                    }

                    warn!(
                        attempt = attempts,
                        max_attempts,
                        delay = ?delay,
                        error = %e,
                        "connect failed, retrying"
                    );
                }
                Err(_timeout) => {
                    if attempts >= max_attempts {
                        error!(servers = ?config.servers, attempts, "connect timed out");
                        return Err(Error::Timeout {
                            attempts,
                            timeout: config.connect_timeout,
                        });
                    }

                    warn!(
                        attempt = attempts,
                        max_attempts,
                        timeout = ?config.connect_timeout,
                        delay = ?delay,
                        "connect timed out, retrying"
                    );
                }
            }

            sleep(delay).await;

            // Exponential backoff with 0-10% jitter
            delay = std::cmp::min(
                delay.mul_f64(fastrand::f64().mul_add(0.1, 2.0)),
                config.retry_max_delay,
            );
        }
    }

    /// Replaces the shutdown settings used by [`Self::disconnect`].
    #[must_use]
    pub fn with_shutdown_config(mut self, shutdown: ShutdownConfig) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// A shared handle for the other components.
    #[must_use]
    pub fn connection(&self) -> Connection<B> {
        self.connection.clone()
    }

    /// Cancels and drains every registered task, then closes the transport.
    /// Calling it again returns the first report.
    pub async fn disconnect(&self) -> ShutdownReport {
        debug!("disconnect requested");

        ShutdownCoordinator::new(self.connection.clone(), self.shutdown)
            .shutdown()
            .await
    }
}
