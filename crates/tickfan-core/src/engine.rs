//! Process wiring: one cache, one router, one supervised upstream
//! connection, one lag sweeper. The gateway and any in-process consumers
//! hang off the shared router and cache.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::cache::SymbolCache;
use crate::config::Config;
use crate::pipeline::IngestPipeline;
use crate::router::{CancelReason, Router, SubscriberHandle};
use crate::supervisor::Supervisor;
use crate::tick::SubscriberKind;

const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

pub struct Engine {
    config: Config,
    cache: Arc<SymbolCache>,
    router: Arc<Router>,
}

impl Engine {
    pub fn new(config: Config) -> Self {
        let router = Arc::new(Router::new(config.router.outbox_capacity));
        Self {
            config,
            cache: Arc::new(SymbolCache::new()),
            router,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &Arc<SymbolCache> {
        &self.cache
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Subscribe an in-process consumer to a set of symbols, using the
    /// configured drop policy. An empty set subscribes to everything.
    pub fn subscribe_local(&self, symbols: &[String]) -> SubscriberHandle {
        let handle = self
            .router
            .register(SubscriberKind::Local, self.config.router.drop_policy);
        if symbols.is_empty() {
            self.router.subscribe_all(handle.id());
        } else {
            for symbol in symbols {
                self.router.subscribe(handle.id(), symbol);
            }
        }
        handle
    }

    /// Spawn the ingest supervisor and the lag sweeper. Both stop when
    /// `shutdown` flips to true; the sweeper cancels every remaining
    /// subscriber on its way out so WebSocket peers get a going-away close.
    pub fn start(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let pipeline = IngestPipeline::new(
            &self.config.frame,
            Arc::clone(&self.cache),
            Arc::clone(&self.router),
        );
        let supervisor =
            Supervisor::new(self.config.upstream.clone(), pipeline, shutdown.clone());

        let router = Arc::clone(&self.router);
        let timeout = self.config.router.lag_eviction_timeout();
        let mut sweeper_shutdown = shutdown;
        let sweeper = tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        router.evict_lagging(timeout);
                    }
                    _ = sweeper_shutdown.changed() => break,
                }
            }
            router.cancel_all(CancelReason::Shutdown);
        });

        vec![tokio::spawn(supervisor.run()), sweeper]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FrameConfig, RouterConfig, StatsConfig, UpstreamConfig, WsConfig};
    use crate::router::DropPolicy;
    use crate::tick::Tick;

    fn config() -> Config {
        Config {
            upstream: UpstreamConfig {
                host: "127.0.0.1".to_string(),
                // Unroutable in tests; the supervisor just retries.
                port: 1,
                token: "t".to_string(),
                idle_timeout_secs: 5,
                backoff_initial_secs: 1,
                backoff_max_secs: 30,
            },
            frame: FrameConfig::default(),
            router: RouterConfig {
                outbox_capacity: 16,
                drop_policy: DropPolicy::DropNewest,
                lag_eviction_timeout_secs: 0,
            },
            ws: WsConfig {
                listen_addr: "127.0.0.1:0".to_string(),
                ping_interval_secs: 30,
            },
            stats: Some(StatsConfig {
                listen_addr: "127.0.0.1:0".to_string(),
            }),
        }
    }

    fn tick(symbol: &str, price: f64) -> Arc<Tick> {
        Arc::new(Tick {
            symbol: symbol.to_string(),
            name: String::new(),
            last_price: price,
            change_percent: 0.0,
            volume: 0.0,
            amount: 0.0,
            upstream_time: String::new(),
            ingest_seq: 1,
            ingest_time_ms: 1,
            raw: String::new(),
        })
    }

    #[tokio::test]
    async fn test_subscribe_local_receives_published_tick() {
        let engine = Engine::new(config());
        let mut sub = engine.subscribe_local(&["SH600000".to_string()]);
        engine.router().publish(&tick("SH600000", 10.0));
        engine.router().publish(&tick("SZ300750", 1.0));
        assert_eq!(sub.try_recv().unwrap().symbol, "SH600000");
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_subscribe_local_empty_means_all() {
        let engine = Engine::new(config());
        let mut sub = engine.subscribe_local(&[]);
        engine.router().publish(&tick("SZ300750", 1.0));
        assert_eq!(sub.try_recv().unwrap().symbol, "SZ300750");
    }

    #[tokio::test]
    async fn test_shutdown_cancels_subscribers() {
        let engine = Engine::new(config());
        let sub = engine.subscribe_local(&["SH600000".to_string()]);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = engine.start(shutdown_rx);
        shutdown_tx.send(true).unwrap();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(sub.cancel_reason(), Some(CancelReason::Shutdown));
    }
}
