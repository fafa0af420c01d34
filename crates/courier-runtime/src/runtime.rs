//! Runtime orchestration: wiring, consumer loops and shutdown.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use courier_runtime::CourierRuntime;
//!
//! let runtime = CourierRuntime::builder()
//!     .config_file("config/courier.toml")
//!     .broker(broker)
//!     .routes(routes)
//!     .build()?;
//!
//! runtime.publisher().publish("orders.created", &order).await;
//! runtime.run().await?;
//! ```

use std::future::Future;
use std::sync::Arc;

use courier_core::{Address, AckAction, BoxedBroker, BoxedCodec, JsonCodec};
use courier_framework::{
    BoxedObserver, Disposition, Dispatcher, Publisher, RouteTable, TracingObserver,
};
use futures::StreamExt;
use tokio::signal;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigLoader, CourierConfig, validate_config};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;

/// Counters for one consumer loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumeStats {
    /// Deliveries pulled from the broker.
    pub received: u64,
    /// Deliveries acknowledged.
    pub acked: u64,
    /// Deliveries requeued for another attempt.
    pub requeued: u64,
    /// Deliveries rejected.
    pub rejected: u64,
}

impl ConsumeStats {
    fn record(&mut self, disposition: &Disposition) {
        match disposition.action {
            AckAction::Ack => self.acked += 1,
            AckAction::Requeue => self.requeued += 1,
            AckAction::Reject => self.rejected += 1,
        }
    }

    /// Deliveries that have been settled.
    pub fn settled(&self) -> u64 {
        self.acked + self.requeued + self.rejected
    }
}

/// The Courier runtime: a frozen route table bound to a broker.
///
/// Cheap to clone; clones share the table, broker and publisher.
#[derive(Clone)]
pub struct CourierRuntime {
    config: Arc<CourierConfig>,
    table: Arc<RouteTable>,
    broker: BoxedBroker,
    codec: BoxedCodec,
    observer: BoxedObserver,
    publisher: Publisher,
}

impl CourierRuntime {
    /// Creates a runtime builder.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &CourierConfig {
        &self.config
    }

    /// Returns the frozen route table.
    pub fn routes(&self) -> &Arc<RouteTable> {
        &self.table
    }

    /// Returns a publisher sharing this runtime's table and broker.
    pub fn publisher(&self) -> Publisher {
        self.publisher.clone()
    }

    /// Builds a dispatcher for one consumer address.
    pub fn dispatcher(&self, address: impl Into<Address>) -> RuntimeResult<Dispatcher> {
        let mut dispatcher = Dispatcher::new(Arc::clone(&self.table), address)?
            .with_codec(Arc::clone(&self.codec))
            .with_retry_policy(self.config.retry.to_policy())
            .with_observer(Arc::clone(&self.observer));
        if let Some(timeout) = self.config.consumer.handler_timeout() {
            dispatcher = dispatcher.with_timeout(timeout);
        }
        Ok(dispatcher)
    }

    /// Consumes `address` until `shutdown` is cancelled or the broker closes
    /// the subscription.
    ///
    /// At most `consumer.concurrency` deliveries are processed at once. On
    /// shutdown no further deliveries are pulled; in-flight deliveries get
    /// `consumer.shutdown_grace_ms` to finish, after which they are cancelled
    /// and rejected. Every received delivery is settled exactly once.
    pub async fn consume(
        &self,
        address: impl Into<Address>,
        shutdown: CancellationToken,
    ) -> RuntimeResult<ConsumeStats> {
        let dispatcher = self.dispatcher(address)?;
        let address = dispatcher.address().clone();
        let mut deliveries = self.broker.subscribe(&address).await?;

        let limit = Arc::new(Semaphore::new(self.config.consumer.concurrency));
        let abort = CancellationToken::new();
        let mut in_flight = JoinSet::new();
        let mut stats = ConsumeStats::default();
        let mut failure = None;

        info!(%address, concurrency = self.config.consumer.concurrency, "Consumer started");

        loop {
            let permit = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                permit = Arc::clone(&limit).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = deliveries.next() => next,
            };

            let delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => {
                    error!(%address, error = %e, "Subscription failed");
                    failure = Some(e);
                    break;
                }
                None => {
                    debug!(%address, "Subscription closed by broker");
                    break;
                }
            };

            stats.received += 1;
            let dispatcher = dispatcher.clone();
            let abort = abort.clone();
            in_flight.spawn(async move {
                let _permit = permit;
                dispatcher.on_delivery_cancellable(delivery, &abort).await
            });

            while let Some(joined) = in_flight.try_join_next() {
                record(&mut stats, joined);
            }
        }

        drop(deliveries);
        self.drain(&address, &mut in_flight, &mut stats, abort).await;

        info!(
            %address,
            received = stats.received,
            acked = stats.acked,
            requeued = stats.requeued,
            rejected = stats.rejected,
            "Consumer stopped"
        );

        match failure {
            Some(e) => Err(e.into()),
            None => Ok(stats),
        }
    }

    async fn drain(
        &self,
        address: &Address,
        in_flight: &mut JoinSet<Disposition>,
        stats: &mut ConsumeStats,
        abort: CancellationToken,
    ) {
        if in_flight.is_empty() {
            return;
        }

        let grace = self.config.consumer.shutdown_grace();
        debug!(%address, pending = in_flight.len(), ?grace, "Waiting for in-flight deliveries");

        let finished = tokio::time::timeout(grace, async {
            while let Some(joined) = in_flight.join_next().await {
                record(stats, joined);
            }
        })
        .await;

        if finished.is_err() {
            warn!(
                %address,
                pending = in_flight.len(),
                "Grace period elapsed, cancelling in-flight deliveries"
            );
            abort.cancel();
            while let Some(joined) = in_flight.join_next().await {
                record(stats, joined);
            }
        }
    }

    /// Consumes every configured queue until Ctrl+C or SIGTERM.
    pub async fn run(&self) -> RuntimeResult<()> {
        self.run_until(wait_for_shutdown()).await
    }

    /// Consumes every configured queue until `signal` completes.
    ///
    /// If any consumer fails, the others are shut down and the first error
    /// is returned.
    pub async fn run_until<F>(&self, signal: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        let queues = &self.config.consumer.queues;
        if queues.is_empty() {
            warn!("No queues configured, nothing to consume");
            return Ok(());
        }

        let shutdown = CancellationToken::new();
        let mut consumers = JoinSet::new();
        for queue in queues {
            let runtime = self.clone();
            let queue = queue.clone();
            let token = shutdown.clone();
            consumers.spawn(async move {
                let result = runtime.consume(queue.as_str(), token.clone()).await;
                if result.is_err() {
                    token.cancel();
                }
                (queue, result)
            });
        }

        info!(
            service = %self.config.service.name,
            queues = queues.len(),
            "Courier runtime is now running"
        );

        tokio::select! {
            _ = signal => info!("Shutdown requested"),
            _ = shutdown.cancelled() => warn!("A consumer failed, shutting down"),
        }
        shutdown.cancel();

        let mut first_error = None;
        while let Some(joined) = consumers.join_next().await {
            match joined {
                Ok((queue, Ok(stats))) => {
                    debug!(queue = %queue, settled = stats.settled(), "Consumer finished")
                }
                Ok((queue, Err(e))) => {
                    error!(queue = %queue, error = %e, "Consumer failed");
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    first_error.get_or_insert(RuntimeError::Join(e));
                }
            }
        }

        info!("Runtime stopped");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for CourierRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CourierRuntime")
            .field("service", &self.config.service.name)
            .field("routes", &self.table)
            .finish_non_exhaustive()
    }
}

fn record(stats: &mut ConsumeStats, joined: Result<Disposition, tokio::task::JoinError>) {
    match joined {
        Ok(disposition) => stats.record(&disposition),
        Err(e) => error!(error = %e, "Delivery task failed"),
    }
}

/// Waits for Ctrl+C or, on Unix, SIGTERM.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to register SIGTERM handler");
                if let Err(e) = signal::ctrl_c().await {
                    error!(error = %e, "Failed to listen for Ctrl+C");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
        }
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for [`CourierRuntime`].
///
/// Configuration comes from [`config`](Self::config) if given, otherwise it is
/// loaded through a [`ConfigLoader`] searching the default directories.
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
    config: Option<CourierConfig>,
    broker: Option<BoxedBroker>,
    routes: Option<RouteTable>,
    codec: BoxedCodec,
    observer: BoxedObserver,
    init_logging: bool,
}

impl RuntimeBuilder {
    /// Creates a new runtime builder.
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new(),
            config: None,
            broker: None,
            routes: None,
            codec: JsonCodec::shared(),
            observer: Arc::new(TracingObserver),
            init_logging: true,
        }
    }

    /// Sets a specific configuration file to load.
    pub fn config_file<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    /// Disables loading environment variables.
    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Uses an already loaded configuration instead of the loader.
    pub fn config(mut self, config: CourierConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Sets the broker client.
    pub fn broker(mut self, broker: BoxedBroker) -> Self {
        self.broker = Some(broker);
        self
    }

    /// Sets the route table; it is frozen by [`build`](Self::build).
    pub fn routes(mut self, routes: RouteTable) -> Self {
        self.routes = Some(routes);
        self
    }

    /// Sets the payload codec shared by publisher and dispatchers.
    pub fn codec(mut self, codec: BoxedCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Sets the dispatch observer.
    pub fn observer(mut self, observer: BoxedObserver) -> Self {
        self.observer = observer;
        self
    }

    /// Leaves the global `tracing` subscriber alone.
    pub fn without_logging(mut self) -> Self {
        self.init_logging = false;
        self
    }

    /// Validates the configuration, freezes the route table and builds the
    /// runtime.
    pub fn build(self) -> RuntimeResult<CourierRuntime> {
        let config = match self.config {
            Some(config) => {
                validate_config(&config)?;
                config
            }
            None => self.config_loader.load()?,
        };

        if self.init_logging {
            logging::init_from_config(&config.logging);
        }

        let broker = self.broker.ok_or(RuntimeError::Missing("a broker"))?;
        let mut table = self.routes.unwrap_or_default();

        if let Some(key) = &config.service.routing_key
            && let Some(event_id) = table
                .event_ids()
                .find(|event_id| !event_id.segments().any(|segment| segment == key))
        {
            return Err(courier_core::ConfigError::OutOfScope {
                event_id: event_id.to_string(),
                scope: key.clone(),
            }
            .into());
        }

        table.freeze();
        let table = Arc::new(table);

        for queue in &config.consumer.queues {
            if table
                .addresses()
                .all(|address| address.as_str() != queue.as_str())
            {
                warn!(queue = %queue, "Configured queue has no bindings; every delivery will be rejected");
            }
        }

        let publisher = Publisher::new(
            Arc::clone(&table),
            Arc::clone(&broker),
            Arc::clone(&self.codec),
        )?;

        info!(
            service = %config.service.name,
            bindings = table.len(),
            log_level = %config.logging.level,
            "Runtime initialized"
        );

        Ok(CourierRuntime {
            config: Arc::new(config),
            table,
            broker,
            codec: self.codec,
            observer: self.observer,
            publisher,
        })
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::MemoryBroker;
    use courier_framework::Destination;

    fn config(queues: &[&str]) -> CourierConfig {
        let mut config = CourierConfig::default();
        config.consumer.queues = queues.iter().map(|q| q.to_string()).collect();
        config
    }

    #[test]
    fn test_build_requires_broker() {
        let err = CourierRuntime::builder()
            .config(config(&[]))
            .without_logging()
            .build()
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Missing(_)));
    }

    #[test]
    fn test_build_enforces_service_routing_key() {
        let mut cfg = config(&[]);
        cfg.service.routing_key = Some("orders".into());

        let mut routes = RouteTable::new();
        routes
            .register("billing.paid", Destination::new("q").handler(|| async {}))
            .unwrap();

        let err = CourierRuntime::builder()
            .config(cfg)
            .broker(Arc::new(MemoryBroker::new()))
            .routes(routes)
            .without_logging()
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Setup(courier_core::ConfigError::OutOfScope { .. })
        ));
    }

    #[test]
    fn test_build_freezes_routes() {
        let runtime = CourierRuntime::builder()
            .config(config(&["q"]))
            .broker(Arc::new(MemoryBroker::new()))
            .without_logging()
            .build()
            .unwrap();
        assert!(runtime.routes().is_ready());
    }

    #[test]
    fn test_stats_record_each_action() {
        use courier_framework::DispositionReason;

        let mut stats = ConsumeStats::default();
        stats.record(&Disposition {
            action: AckAction::Ack,
            reason: DispositionReason::Success,
        });
        stats.record(&Disposition {
            action: AckAction::Reject,
            reason: DispositionReason::NoBinding,
        });
        assert_eq!((stats.acked, stats.rejected, stats.settled()), (1, 1, 2));
    }
}
