use crate::config::ShutdownConfig;
use crate::connection::Connection;
use crate::registry::{TaskKind, TaskOutcome, TaskReport};

use courier_broker::Broker;
use tokio::time::Instant;
use tracing::{info, warn};

/// Outcome of every task stopped by a shutdown.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ShutdownReport {
    /// Watches first, then consumers, each in registration order.
    pub tasks: Vec<TaskReport>,
}

impl ShutdownReport {
    /// Whether every task completed normally.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.tasks
            .iter()
            .all(|t| t.outcome == TaskOutcome::Completed)
    }

    /// Tasks that did not complete normally.
    pub fn failures(&self) -> impl Iterator<Item = &TaskReport> {
        self.tasks
            .iter()
            .filter(|t| t.outcome != TaskOutcome::Completed)
    }
}

/// Tears a connection down: watches, then consumers, then the transport.
#[derive(Debug)]
pub struct ShutdownCoordinator<B>
where
    B: Broker,
{
    config: ShutdownConfig,
    connection: Connection<B>,
}

impl<B> ShutdownCoordinator<B>
where
    B: Broker,
{
    /// Creates a coordinator for `connection`.
    pub const fn new(connection: Connection<B>, config: ShutdownConfig) -> Self {
        Self { config, connection }
    }

    /// Runs the shutdown once. Later calls, from this or any other coordinator
    /// on the same connection, return the first report.
    pub async fn shutdown(&self) -> ShutdownReport {
        self.connection
            .shutdown_cell()
            .get_or_init(|| self.run())
            .await
            .clone()
    }

    async fn run(&self) -> ShutdownReport {
        let registry = self.connection.registry();
        registry.close();

        info!(
            running = registry.len(),
            exited = registry.exited_count(),
            grace_period = ?self.config.grace_period,
            "shutting down"
        );

        let deadline = Instant::now() + self.config.grace_period;
        let mut tasks = registry.drain(TaskKind::Watch, deadline).await;
        tasks.extend(registry.drain(TaskKind::Consumer, deadline).await);

        self.connection.mark_closed();

        if let Err(e) = self.connection.broker().close().await {
            warn!(error = %e, "failed to close broker connection cleanly");
        }

        let report = ShutdownReport { tasks };
        info!(
            tasks = report.tasks.len(),
            failures = report.failures().count(),
            "disconnected"
        );

        report
    }
}
