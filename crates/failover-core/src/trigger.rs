//! Serializes periodic ticks and external triggers into single-threaded
//! reconcile invocations.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use chrono::Utc;

use crate::engine::ReconcileEngine;

/// Handle external callers (the HTTP surface, tests) use to request an
/// out-of-band reconcile. Cloneable; cheap to hold in an `Arc` behind
/// `axum::extract::State`.
#[derive(Clone)]
pub struct TriggerHandle {
    tx: mpsc::Sender<()>,
}

impl TriggerHandle {
    /// Enqueue a trigger. If one is already pending, this is a no-op — an
    /// edge-triggered coalescing channel, not a queue (spec.md §4.6).
    pub fn trigger(&self) {
        if self.tx.try_send(()).is_err() {
            tracing::debug!("trigger already pending, coalesced");
        }
    }
}

/// Owns the periodic ticker and the external trigger channel, and drives
/// `ReconcileEngine::reconcile` from a single task.
///
/// Grounded in the teacher's `DdnsEngine::run_internal` `tokio::select!`
/// loop, generalized from two arms (IP stream, shutdown) to three (ticker,
/// trigger, shutdown).
pub struct TriggerMux {
    engine: Arc<ReconcileEngine>,
    interval: Duration,
    trigger_rx: mpsc::Receiver<()>,
    trigger_tx: mpsc::Sender<()>,
}

impl TriggerMux {
    pub fn new(engine: Arc<ReconcileEngine>, interval: Duration) -> Self {
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        Self {
            engine,
            interval,
            trigger_rx,
            trigger_tx,
        }
    }

    /// A cloneable handle external callers use to request a reconcile.
    pub fn handle(&self) -> TriggerHandle {
        TriggerHandle {
            tx: self.trigger_tx.clone(),
        }
    }

    /// Run until cancelled via ctrl-c/SIGTERM. Production entry point.
    pub async fn run(mut self) {
        self.run_internal(None).await;
    }

    /// Run until `shutdown_rx` fires. Test-only: lets tests terminate the
    /// loop deterministically instead of racing ctrl-c.
    #[cfg(test)]
    pub async fn run_with_shutdown(mut self, shutdown_rx: oneshot::Receiver<()>) {
        self.run_internal(Some(shutdown_rx)).await;
    }

    async fn run_internal(&mut self, shutdown_rx: Option<oneshot::Receiver<()>>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tokio::pin! {
            let shutdown = async {
                match shutdown_rx {
                    Some(rx) => { let _ = rx.await; }
                    None => { let _ = tokio::signal::ctrl_c().await; }
                }
            };
        }

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.engine.reconcile(Utc::now()).await;
                }
                Some(()) = self.trigger_rx.recv() => {
                    self.engine.reconcile(Utc::now()).await;
                }
                _ = &mut shutdown => {
                    tracing::info!("trigger loop shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Configuration, LogFormat};
    use crate::health::test_support::StaticHealthProbe;
    use crate::provider::Record;
    use crate::state::{DnsTarget, OperationalState};
    use crate::state_store::MemoryOperationalStateStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullObserver;
    #[async_trait]
    impl crate::observer::DnsObserver for NullObserver {
        async fn observe(&self) -> DnsTarget {
            DnsTarget::Unknown
        }
    }

    struct CountingProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl crate::provider::ProviderClient for CountingProvider {
        async fn get_record(&self, _hostname: &str) -> Result<Option<Record>, crate::error::ProviderError> {
            Ok(None)
        }
        async fn read_target(&self, _hostname: &str) -> Result<DnsTarget, crate::error::ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(DnsTarget::Primary)
        }
        async fn set_target(&self, _hostname: &str, _target: DnsTarget) -> Result<(), crate::error::ProviderError> {
            Ok(())
        }
    }

    fn test_config() -> Configuration {
        Configuration {
            hostname: "mirai.example.com".to_string(),
            tunnel_id: "tun-1".to_string(),
            failover_address: "165.227.110.199".to_string(),
            stabilization_failover: Duration::from_secs(90),
            stabilization_failback: Duration::from_secs(600),
            max_failovers_24h: 3,
            reconcile_interval: Duration::from_millis(20),
            dry_run: false,
            min_primary_replicas: 2,
            cloudflare_api_token: "real-token-value".to_string(),
            cloudflare_zone_id: None,
            cloudflare_account_id: None,
            cdn_tunnel_suffix: "cfargotunnel.com".to_string(),
            cdn_address_prefixes: vec![],
            k8s_namespace: "ingress".to_string(),
            k8s_label_selector: "app=cloudflared".to_string(),
            http_bind_addr: "0.0.0.0:8080".to_string(),
            state_store_path: None,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }

    #[tokio::test]
    async fn explicit_trigger_causes_a_reconcile() {
        let config = test_config();
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
        });
        let (engine, _rx) = ReconcileEngine::new(
            config.clone(),
            Arc::new(StaticHealthProbe::new(true)),
            Arc::new(NullObserver),
            provider.clone(),
            Arc::new(MemoryOperationalStateStore::new()),
            OperationalState::initial(Utc::now()),
        );
        let engine = Arc::new(engine);

        let mux = TriggerMux::new(engine, Duration::from_secs(3600));
        let handle = mux.handle();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        handle.trigger();
        let join = tokio::spawn(mux.run_with_shutdown(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = shutdown_tx.send(());
        join.await.unwrap();

        assert!(provider.calls.load(Ordering::SeqCst) >= 1);
    }
}
