//! Connection pool actor and its handle.
//!
//! # Responsibilities
//! - Own every server record; all mutations run on one task
//! - Health-gated acquisition with transparent failover
//! - Quarantine failing servers using per-server and global budgets
//! - Broadcast pool status changes (deduplicated)

use futures_util::stream::{self, Stream, StreamExt};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use url::Url;

use crate::config::validation::{parse_bootstrap_urls, validate_pool, ValidationError};
use crate::config::{ConfigError, PoolConfig};
use crate::health::{ClockPair, ConnectionStatus, HealthCondition, HealthRepository, RepositoryError};
use crate::observability::metrics;
use crate::pool::connection::{ConnectionError, NodeConnection};
use crate::pool::roles::{by_deadline, by_latency, determine_roles, RoleAssignment, ServerMetrics};
use crate::pool::server::Server;
use crate::resilience::{jitter, RetryBudget};

const COMMAND_BUFFER: usize = 64;

/// Errors surfaced by the pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Every server is quarantined or failed its probe.
    #[error("no healthy server available")]
    NoHealthyServer,

    #[error("connection failed: {0}")]
    ConnectionFailed(#[source] ConnectionError),

    #[error("ping failed: {0}")]
    PingFailed(#[source] ConnectionError),

    /// Health could not be persisted; the pool stops failing over.
    #[error("health repository failure: {0}")]
    HealthRepository(#[source] RepositoryError),

    /// The pool task has shut down.
    #[error("connection pool closed")]
    Closed,
}

/// Result type for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// Endpoints currently holding the primary and standby roles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleDescription {
    pub primary: Option<Url>,
    pub standby: Option<Url>,
}

enum PoolCommand<C> {
    Acquire(oneshot::Sender<PoolResult<Arc<C>>>),
    ReportFailure(Arc<C>, oneshot::Sender<PoolResult<Arc<C>>>),
    Reconnect(oneshot::Sender<PoolResult<Arc<C>>>),
    DescribeRoles(oneshot::Sender<RoleDescription>),
}

#[derive(Debug, Clone)]
struct PoolSettings {
    max_backoff: Duration,
    jitter: Duration,
    slow_threshold: Duration,
}

impl From<&PoolConfig> for PoolSettings {
    fn from(config: &PoolConfig) -> Self {
        Self {
            max_backoff: Duration::from_secs(config.max_backoff_secs),
            jitter: Duration::from_millis(config.jitter_ms),
            slow_threshold: Duration::from_millis(config.slow_latency_ms),
        }
    }
}

/// Handle to a running connection pool. Cheap to clone.
pub struct ConnectionPool<C> {
    commands: mpsc::Sender<PoolCommand<C>>,
    status: watch::Receiver<ConnectionStatus>,
}

impl<C> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            status: self.status.clone(),
        }
    }
}

impl<C> std::fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("status", &*self.status.borrow())
            .finish()
    }
}

impl<C: NodeConnection> ConnectionPool<C> {
    /// Build servers from the configured bootstrap URLs and start the pool.
    ///
    /// An empty URL list yields a single default server (`connector(None)`).
    pub fn from_config<F>(
        config: &PoolConfig,
        connector: F,
        repository: Option<Arc<dyn HealthRepository>>,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(Option<&Url>) -> C,
    {
        let urls = parse_bootstrap_urls(config)?;
        let servers = if urls.is_empty() {
            vec![(None, connector(None))]
        } else {
            urls.into_iter()
                .map(|url| {
                    let connection = connector(Some(&url));
                    (Some(url), connection)
                })
                .collect()
        };
        Self::spawn(config, servers, repository)
    }

    /// Start a pool over an explicit server set.
    ///
    /// Must be called within a tokio runtime.
    pub fn spawn(
        config: &PoolConfig,
        servers: Vec<(Option<Url>, C)>,
        repository: Option<Arc<dyn HealthRepository>>,
    ) -> Result<Self, ConfigError> {
        validate_pool(config)?;
        if servers.is_empty() {
            return Err(ConfigError::Validation(vec![ValidationError {
                field: "pool.servers".into(),
                message: "at least one server is required".into(),
            }]));
        }

        let now = Instant::now();
        let servers = servers
            .into_iter()
            .map(|(endpoint, connection)| {
                let budget = RetryBudget::from_config(&config.server_budget, now);
                Server::new(endpoint, connection, budget, now)
            })
            .collect::<Vec<_>>();

        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Offline);

        tracing::info!(servers = servers.len(), persistent = repository.is_some(), "Connection pool starting");

        let actor = PoolActor {
            servers,
            settings: PoolSettings::from(config),
            repository,
            global_budget: RetryBudget::from_config(&config.global_budget, now),
            status: status_tx,
            roles: RoleAssignment::default(),
            active: None,
            commands: command_rx,
        };
        tokio::spawn(actor.run());

        Ok(Self {
            commands: command_tx,
            status: status_rx,
        })
    }

    /// Return a live connection, failing over across servers as needed.
    pub async fn acquire(&self) -> PoolResult<Arc<C>> {
        self.request(PoolCommand::Acquire).await?
    }

    /// Report that `connection` misbehaved and fail over.
    ///
    /// The failure is charged to the server owning `connection`, not to
    /// whichever server was handed out last.
    pub async fn report_failure(&self, connection: &Arc<C>) -> PoolResult<Arc<C>> {
        let connection = connection.clone();
        self.request(|reply| PoolCommand::ReportFailure(connection, reply))
            .await?
    }

    /// Force the active server through a stop/start/probe cycle.
    pub async fn reconnect(&self) -> PoolResult<Arc<C>> {
        self.request(PoolCommand::Reconnect).await?
    }

    /// Endpoints of the current primary and standby.
    pub async fn describe_roles(&self) -> PoolResult<RoleDescription> {
        self.request(PoolCommand::DescribeRoles).await
    }

    pub fn current_status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Stream of pool status values: the current one, then every change.
    pub fn observe_status(&self) -> impl Stream<Item = ConnectionStatus> + Send + 'static {
        let mut rx = self.status.clone();
        let current = *rx.borrow_and_update();
        stream::once(async move { current }).chain(stream::unfold(rx, |mut rx| async move {
            rx.changed().await.ok()?;
            let status = *rx.borrow_and_update();
            Some((status, rx))
        }))
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> PoolCommand<C>,
    ) -> PoolResult<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| PoolError::Closed)?;
        rx.await.map_err(|_| PoolError::Closed)
    }
}

struct PoolActor<C> {
    servers: Vec<Server<C>>,
    settings: PoolSettings,
    repository: Option<Arc<dyn HealthRepository>>,
    global_budget: RetryBudget,
    status: watch::Sender<ConnectionStatus>,
    roles: RoleAssignment,
    /// Server whose connection was handed out last.
    active: Option<usize>,
    commands: mpsc::Receiver<PoolCommand<C>>,
}

impl<C: NodeConnection> PoolActor<C> {
    async fn run(mut self) {
        self.warm_up().await;

        while let Some(command) = self.commands.recv().await {
            match command {
                PoolCommand::Acquire(reply) => {
                    let result = self.acquire().await;
                    let _ = reply.send(result);
                }
                PoolCommand::ReportFailure(connection, reply) => {
                    let result = self.report_failure(&connection).await;
                    let _ = reply.send(result);
                }
                PoolCommand::Reconnect(reply) => {
                    let result = self.reconnect().await;
                    let _ = reply.send(result);
                }
                PoolCommand::DescribeRoles(reply) => {
                    self.update_roles(Instant::now());
                    let _ = reply.send(self.describe_roles());
                }
            }
        }

        for server in &mut self.servers {
            if server.status != ConnectionStatus::Offline {
                server.connection.stop().await;
                server.status = ConnectionStatus::Offline;
            }
        }
        tracing::debug!("Connection pool stopped");
    }

    /// Adopt persisted health from a previous run.
    async fn warm_up(&mut self) {
        if let Some(repository) = self.repository.clone() {
            let clock = ClockPair::now();
            for server in &mut self.servers {
                let Some(url) = server.endpoint.clone() else {
                    continue;
                };
                let Some(snapshot) = repository.history(&url).await else {
                    continue;
                };

                server.failure_count = snapshot.failures;
                server.last_latency = snapshot.latency;
                server.last_success_at = snapshot.last_ok.and_then(|ok| {
                    let age = clock.system.duration_since(ok).unwrap_or_default();
                    clock.instant.checked_sub(age)
                });
                if let Some(until) = snapshot.quarantine_until {
                    if until > clock.system {
                        server.next_retry_at = clock.to_instant(until);
                    }
                }
                tracing::debug!(
                    endpoint = %url,
                    condition = ?snapshot.condition,
                    failures = snapshot.failures,
                    "Restored server health"
                );
                server.health = snapshot;
            }
        }
        self.update_roles(Instant::now());
    }

    async fn acquire(&mut self) -> PoolResult<Arc<C>> {
        let now = Instant::now();
        self.refresh_health(now).await;
        self.update_roles(now);

        for index in self.traversal_order(now) {
            if !self.servers[index].is_available(Instant::now()) {
                continue;
            }

            match self.probe(index).await {
                Ok(latency) => {
                    self.record_success(index, latency).await?;
                    return Ok(self.hand_out(index));
                }
                Err(error) => {
                    tracing::warn!(
                        endpoint = %self.servers[index].label(),
                        error = %error,
                        "Server probe failed, trying next server"
                    );
                    self.record_failure(index).await?;
                }
            }
        }

        self.active = None;
        self.set_status(ConnectionStatus::Offline);
        Err(PoolError::NoHealthyServer)
    }

    async fn report_failure(&mut self, connection: &Arc<C>) -> PoolResult<Arc<C>> {
        let owner = self
            .servers
            .iter()
            .position(|server| Arc::ptr_eq(&server.connection, connection));

        match owner {
            Some(index) => {
                tracing::warn!(endpoint = %self.servers[index].label(), "Connection reported as failed");
                if self.active == Some(index) {
                    self.active = None;
                }
                self.shutdown_server(index).await;
                self.record_failure(index).await?;
            }
            None => tracing::warn!("Failure reported for a connection outside the pool"),
        }
        self.acquire().await
    }

    async fn reconnect(&mut self) -> PoolResult<Arc<C>> {
        let Some(index) = self.active.or(self.roles.primary) else {
            return self.acquire().await;
        };

        tracing::info!(endpoint = %self.servers[index].label(), "Forcing reconnect");
        self.shutdown_server(index).await;

        match self.probe(index).await {
            Ok(latency) => {
                self.record_success(index, latency).await?;
                Ok(self.hand_out(index))
            }
            Err(error) => {
                tracing::warn!(
                    endpoint = %self.servers[index].label(),
                    error = %error,
                    "Reconnect failed, failing over"
                );
                self.record_failure(index).await?;
                self.active = None;
                self.acquire().await
            }
        }
    }

    /// Release lapsed quarantines and pull persisted health for due servers.
    async fn refresh_health(&mut self, now: Instant) {
        let slow = Some(self.settings.slow_threshold);
        for server in &mut self.servers {
            if !server.is_available(now) {
                server.health.condition = HealthCondition::Unhealthy;
                continue;
            }

            if let (Some(repository), Some(url)) = (self.repository.as_ref(), server.endpoint.as_ref()) {
                if let Some(snapshot) = repository.history(url).await {
                    server.health = snapshot;
                }
            }

            if server.health.quarantine_until.take().is_some() {
                server.health.condition = HealthCondition::classify(
                    server.health.failures,
                    false,
                    server.health.latency,
                    slow,
                );
                tracing::debug!(endpoint = %server.label(), "Quarantine lapsed");
            }
        }
    }

    /// Primary, standby, then eligible servers by latency, then quarantined
    /// servers by deadline.
    fn traversal_order(&self, now: Instant) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.servers.len());
        order.extend(self.roles.primary);
        if let Some(standby) = self.roles.standby {
            if !order.contains(&standby) {
                order.push(standby);
            }
        }

        let (mut available, mut deferred): (Vec<ServerMetrics>, Vec<ServerMetrics>) = self
            .metrics()
            .into_iter()
            .filter(|m| !order.contains(&m.index))
            .partition(|m| m.is_available(now));
        available.sort_by(by_latency);
        deferred.sort_by(by_deadline);

        order.extend(available.iter().map(|m| m.index));
        order.extend(deferred.iter().map(|m| m.index));
        order
    }

    async fn probe(&mut self, index: usize) -> PoolResult<Duration> {
        let connection = self.servers[index].connection.clone();

        if self.servers[index].status != ConnectionStatus::Online {
            self.set_status(ConnectionStatus::Connecting);
            self.servers[index].status = ConnectionStatus::Connecting;
            if let Err(error) = connection.start().await {
                self.shutdown_server(index).await;
                return Err(PoolError::ConnectionFailed(error));
            }
        }

        let started = Instant::now();
        match connection.ping().await {
            Ok(()) => Ok(started.elapsed()),
            Err(error) => {
                self.shutdown_server(index).await;
                Err(PoolError::PingFailed(error))
            }
        }
    }

    async fn shutdown_server(&mut self, index: usize) {
        let server = &mut self.servers[index];
        server.connection.stop().await;
        server.status = ConnectionStatus::Offline;
    }

    async fn record_success(&mut self, index: usize, latency: Duration) -> PoolResult<()> {
        let now = Instant::now();
        let server = &mut self.servers[index];
        server.mark_success(latency, now, Some(self.settings.slow_threshold));
        server.health.last_ok = Some(SystemTime::now());

        let label = server.label();
        let endpoint = server.endpoint.clone();
        metrics::record_probe_latency(&label, latency);
        metrics::record_node_health(&label, server.health.condition);
        tracing::debug!(endpoint = %label, latency_ms = latency.as_millis() as u64, "Server probe succeeded");

        if let (Some(repository), Some(url)) = (self.repository.clone(), endpoint) {
            if let Err(error) = repository.record_probe(&url, Some(latency), true).await {
                return Err(self.repository_failed(error));
            }
        }
        Ok(())
    }

    async fn record_failure(&mut self, index: usize) -> PoolResult<()> {
        let now = Instant::now();
        let server_delay = self.servers[index].retry_budget.next_delay(now);
        let global_delay = self.global_budget.next_delay(now);

        let delay = server_delay.max(global_delay).min(self.settings.max_backoff)
            + jitter(self.settings.jitter);
        let retry_at = now + delay;
        let until = ClockPair::now().to_system(retry_at);

        let server = &mut self.servers[index];
        server.mark_failure(retry_at);
        server.health.quarantine_until = Some(until);

        let label = server.label();
        let endpoint = server.endpoint.clone();
        metrics::record_node_health(&label, server.health.condition);
        tracing::info!(
            endpoint = %label,
            failures = server.failure_count,
            retry_in_ms = delay.as_millis() as u64,
            "Server quarantined"
        );

        self.update_roles(now);

        if let (Some(repository), Some(url)) = (self.repository.clone(), endpoint) {
            let persisted = match repository.record_probe(&url, None, false).await {
                Ok(()) => repository.quarantine(&url, until).await,
                Err(error) => Err(error),
            };
            if let Err(error) = persisted {
                return Err(self.repository_failed(error));
            }
        }
        Ok(())
    }

    fn repository_failed(&mut self, error: RepositoryError) -> PoolError {
        tracing::error!(error = %error, "Failed to persist server health");
        self.active = None;
        self.set_status(ConnectionStatus::Offline);
        PoolError::HealthRepository(error)
    }

    /// Promote roles after a success and return the connection to hand out.
    fn hand_out(&mut self, probed: usize) -> Arc<C> {
        self.update_roles(Instant::now());
        let index = match self.roles.primary {
            Some(primary) if self.servers[primary].status == ConnectionStatus::Online => primary,
            _ => probed,
        };
        self.active = Some(index);
        self.set_status(ConnectionStatus::Online);
        self.servers[index].connection.clone()
    }

    fn metrics(&self) -> Vec<ServerMetrics> {
        self.servers
            .iter()
            .enumerate()
            .map(|(index, server)| server.metrics(index))
            .collect()
    }

    fn update_roles(&mut self, now: Instant) {
        // A primary that has failed since it was chosen loses its stickiness.
        let preferred = self
            .roles
            .primary
            .filter(|&index| self.servers[index].failure_count == 0);
        let roles = determine_roles(&self.metrics(), now, preferred);

        if roles != self.roles {
            tracing::debug!(primary = ?roles.primary, standby = ?roles.standby, "Server roles changed");
        }
        for (index, server) in self.servers.iter_mut().enumerate() {
            server.role = roles.role_of(index);
        }
        self.roles = roles;
    }

    fn describe_roles(&self) -> RoleDescription {
        let endpoint = |index: Option<usize>| index.and_then(|i| self.servers[i].endpoint.clone());
        RoleDescription {
            primary: endpoint(self.roles.primary),
            standby: endpoint(self.roles.standby),
        }
    }

    fn set_status(&self, status: ConnectionStatus) {
        let changed = self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        if changed {
            metrics::record_pool_status(status);
            tracing::info!(status = %status, "Pool status changed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BudgetConfig;
    use futures_util::future::BoxFuture;

    struct Idle;

    impl NodeConnection for Idle {
        fn start(&self) -> BoxFuture<'_, Result<(), ConnectionError>> {
            Box::pin(async { Ok(()) })
        }

        fn stop(&self) -> BoxFuture<'_, ()> {
            Box::pin(async {})
        }

        fn ping(&self) -> BoxFuture<'_, Result<(), ConnectionError>> {
            Box::pin(async { Ok(()) })
        }
    }

    fn actor(config: &PoolConfig, count: usize) -> PoolActor<Idle> {
        let now = Instant::now();
        let servers = (0..count)
            .map(|_| Server::new(None, Idle, RetryBudget::from_config(&config.server_budget, now), now))
            .collect();
        let (_commands_tx, commands) = mpsc::channel(1);
        let (status, _) = watch::channel(ConnectionStatus::Offline);
        PoolActor {
            servers,
            settings: PoolSettings::from(config),
            repository: None,
            global_budget: RetryBudget::from_config(&config.global_budget, now),
            status,
            roles: RoleAssignment::default(),
            active: None,
            commands,
        }
    }

    #[tokio::test]
    async fn test_hand_out_returns_faster_online_primary() {
        let mut pool = actor(&PoolConfig::default(), 2);
        for (server, ms) in pool.servers.iter_mut().zip([10, 50]) {
            server.status = ConnectionStatus::Online;
            server.last_latency = Some(Duration::from_millis(ms));
        }

        let connection = pool.hand_out(1);
        assert!(Arc::ptr_eq(&connection, &pool.servers[0].connection));
        assert_eq!(pool.active, Some(0));
        assert_eq!(pool.roles.primary, Some(0));
        assert_eq!(*pool.status.borrow(), ConnectionStatus::Online);
    }

    #[tokio::test]
    async fn test_hand_out_falls_back_to_probed_server() {
        let mut pool = actor(&PoolConfig::default(), 2);
        pool.servers[0].last_latency = Some(Duration::from_millis(10));
        pool.servers[1].status = ConnectionStatus::Online;
        pool.servers[1].last_latency = Some(Duration::from_millis(50));

        let connection = pool.hand_out(1);
        assert!(Arc::ptr_eq(&connection, &pool.servers[1].connection));
        assert_eq!(pool.roles.primary, Some(0));
        assert_eq!(pool.active, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_absorbed_by_budget_still_jitters() {
        let config = PoolConfig {
            jitter_ms: 1000,
            global_budget: BudgetConfig {
                max_attempts: 100,
                replenish_secs: 60,
            },
            ..PoolConfig::default()
        };
        let mut pool = actor(&config, 8);
        let now = Instant::now();

        for index in 0..8 {
            pool.record_failure(index).await.unwrap();
        }

        let bound = now + Duration::from_millis(1000);
        assert!(pool.servers.iter().all(|s| s.next_retry_at < bound));
        assert!(pool.servers.iter().any(|s| s.next_retry_at > now));
    }

    #[test]
    fn test_error_display() {
        assert_eq!(PoolError::NoHealthyServer.to_string(), "no healthy server available");
        let err = PoolError::PingFailed(ConnectionError::Timeout(10));
        assert_eq!(err.to_string(), "ping failed: timed out after 10 seconds");
    }

    #[test]
    fn test_settings_from_config() {
        let settings = PoolSettings::from(&PoolConfig::default());
        assert_eq!(settings.max_backoff, Duration::from_secs(300));
        assert_eq!(settings.jitter, Duration::from_millis(500));
        assert_eq!(settings.slow_threshold, Duration::from_secs(2));
    }
}
