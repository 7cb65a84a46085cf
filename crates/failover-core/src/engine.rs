//! The reconciliation state machine.

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use chrono::{DateTime, Utc};

use crate::config::Configuration;
use crate::health::HealthProbe;
use crate::observer::DnsObserver;
use crate::provider::ProviderClient;
use crate::state::{DnsTarget, OperationalState, SystemPhase};
use crate::state_store::OperationalStateStore;

/// Emitted once per `reconcile()` invocation for observability.
///
/// Grounded in the teacher's own `EngineEvent`: a bounded channel so a slow
/// consumer cannot block reconciliation, with a `Reconciled` no-op variant
/// covering the common case of "nothing changed this tick."
#[derive(Debug, Clone)]
pub enum ReconcileEvent {
    DriftCorrected {
        from: DnsTarget,
        to: DnsTarget,
    },
    StabilizationStarted {
        phase: SystemPhase,
    },
    StabilizationAborted {
        reason: String,
    },
    Committed {
        target: DnsTarget,
        phase: SystemPhase,
    },
    CommitFailed {
        target: DnsTarget,
        error: String,
    },
    Reconciled,
}

/// Default capacity of the event channel. Matches the teacher's
/// `default_event_channel_capacity`.
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// The reconciliation engine: owns `OperationalState` behind a single
/// mutual-exclusion scope and the four leaf collaborators it reconciles
/// against.
pub struct ReconcileEngine {
    config: Configuration,
    health_probe: Arc<dyn HealthProbe>,
    dns_observer: Arc<dyn DnsObserver>,
    provider: Arc<dyn ProviderClient>,
    store: Arc<dyn OperationalStateStore>,
    state: Mutex<OperationalState>,
    events: mpsc::Sender<ReconcileEvent>,
}

impl ReconcileEngine {
    /// Construct an engine with the given state as the in-memory starting
    /// point (normally loaded once from `store` at process start).
    pub fn new(
        config: Configuration,
        health_probe: Arc<dyn HealthProbe>,
        dns_observer: Arc<dyn DnsObserver>,
        provider: Arc<dyn ProviderClient>,
        store: Arc<dyn OperationalStateStore>,
        initial_state: OperationalState,
    ) -> (Self, mpsc::Receiver<ReconcileEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let engine = Self {
            config,
            health_probe,
            dns_observer,
            provider,
            store,
            state: Mutex::new(initial_state),
            events: tx,
        };
        (engine, rx)
    }

    /// Snapshot of the current in-memory state, for the `/state` and
    /// `/health` HTTP handlers.
    pub async fn snapshot(&self) -> OperationalState {
        self.state.lock().await.clone()
    }

    /// Force `phase = DUAL_FAILURE` ahead of the next reconcile, per the
    /// `/webhook` handler's special-cased alert (spec.md §6).
    pub async fn force_dual_failure(&self) {
        let mut state = self.state.lock().await;
        state.phase = SystemPhase::DualFailure;
        state.stabilization_start = None;
        self.persist(&state).await;
    }

    async fn persist(&self, state: &OperationalState) {
        if let Err(err) = self.store.save(state).await {
            tracing::warn!(error = %err, "failed to persist operational state");
        }
    }

    fn emit(&self, event: ReconcileEvent) {
        if self.events.try_send(event).is_err() {
            tracing::warn!("reconcile event channel full, dropping event");
        }
    }

    /// Run one reconciliation pass under the state's mutual-exclusion
    /// scope. Never returns an error: every fault is logged and absorbed
    /// per spec.md §7's propagation policy.
    pub async fn reconcile(&self, now: DateTime<Utc>) {
        let mut state = self.state.lock().await;

        let observed_dns = self.dns_observer.observe().await;
        let api_target = match self.provider.read_target(&self.config.hostname).await {
            Ok(target) => target,
            Err(err) => {
                tracing::warn!(error = %err, "provider read_target failed, skipping tick");
                self.emit(ReconcileEvent::Reconciled);
                return;
            }
        };
        let desired = if self.health_probe.primary_healthy().await {
            DnsTarget::Primary
        } else {
            DnsTarget::Failover
        };

        if observed_dns != DnsTarget::Unknown && observed_dns != state.current_target {
            tracing::debug!(
                ?observed_dns,
                current = ?state.current_target,
                "dns observer disagrees with current_target (advisory)"
            );
        }

        // Step 2: drift correction. Observed provider reality wins over memory.
        if matches!(api_target, DnsTarget::Primary | DnsTarget::Failover)
            && api_target != state.current_target
        {
            let from = state.current_target;
            state.current_target = api_target;
            self.persist(&state).await;
            tracing::warn!(?from, to = ?api_target, "drift detected, adopted provider target");
            self.emit(ReconcileEvent::DriftCorrected { from, to: api_target });
        }

        // Step 3: transition decision.
        if desired == state.current_target {
            if state.stabilization_start.is_some() {
                state.stabilization_start = None;
                state.phase = steady_phase_for(state.current_target);
                self.persist(&state).await;
                tracing::info!(phase = %state.phase, "stabilization aborted, condition reverted");
                self.emit(ReconcileEvent::StabilizationAborted {
                    reason: "condition reverted before threshold".to_string(),
                });
            } else {
                self.emit(ReconcileEvent::Reconciled);
            }
            return;
        }

        if state.stabilization_start.is_none() {
            if desired == DnsTarget::Failover
                && state.failover_count_24h >= self.config.max_failovers_24h
            {
                tracing::warn!(
                    failover_count_24h = state.failover_count_24h,
                    max = self.config.max_failovers_24h,
                    "circuit breaker tripped, refusing new failover"
                );
                self.emit(ReconcileEvent::StabilizationAborted {
                    reason: "circuit breaker tripped".to_string(),
                });
                return;
            }

            state.stabilization_start = Some(now);
            state.phase = match desired {
                DnsTarget::Failover => SystemPhase::PrimaryDegraded,
                DnsTarget::Primary => SystemPhase::Recovering,
                DnsTarget::Unknown => unreachable!("desired is always PRIMARY or FAILOVER"),
            };
            self.persist(&state).await;
            tracing::info!(phase = %state.phase, "stabilization started");
            self.emit(ReconcileEvent::StabilizationStarted { phase: state.phase });
            return;
        }

        let stabilization_start = state.stabilization_start.expect("checked is_some above");
        let required = match state.phase {
            SystemPhase::PrimaryDegraded => self.config.stabilization_failover,
            SystemPhase::Recovering => self.config.stabilization_failback,
            other => {
                tracing::warn!(phase = %other, "stabilization active in unexpected phase");
                self.emit(ReconcileEvent::Reconciled);
                return;
            }
        };
        let elapsed = (now - stabilization_start)
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);
        if elapsed < required {
            self.emit(ReconcileEvent::Reconciled);
            return;
        }

        // Step 4: commit.
        self.commit(&mut state, desired, now).await;
    }

    async fn commit(&self, state: &mut OperationalState, target: DnsTarget, now: DateTime<Utc>) {
        if self.config.dry_run {
            tracing::info!(?target, "dry run: skipping provider write");
        } else if let Err(err) = self.provider.set_target(&self.config.hostname, target).await {
            tracing::warn!(?target, error = %err, "commit failed, retrying next tick");
            self.emit(ReconcileEvent::CommitFailed {
                target,
                error: err.to_string(),
            });
            return;
        }

        state.current_target = target;
        state.phase = steady_phase_for(target);
        state.last_change_time = now;
        if target == DnsTarget::Failover {
            state.failover_count_24h += 1;
        }
        state.stabilization_start = None;
        self.persist(state).await;
        tracing::info!(?target, phase = %state.phase, "commit succeeded");
        self.emit(ReconcileEvent::Committed {
            target,
            phase: state.phase,
        });
    }
}

fn steady_phase_for(target: DnsTarget) -> SystemPhase {
    match target {
        DnsTarget::Primary => SystemPhase::PrimaryHealthy,
        DnsTarget::Failover => SystemPhase::OnFailover,
        DnsTarget::Unknown => unreachable!("current_target is never Unknown after initialization"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::test_support::StaticHealthProbe;
    use crate::state_store::MemoryOperationalStateStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    struct StaticObserver;
    #[async_trait::async_trait]
    impl DnsObserver for StaticObserver {
        async fn observe(&self) -> DnsTarget {
            DnsTarget::Unknown
        }
    }

    struct ScriptedProvider {
        read_target: std::sync::Mutex<DnsTarget>,
        set_target_calls: AtomicUsize,
        fail_set_target: bool,
    }

    impl ScriptedProvider {
        fn new(read_target: DnsTarget) -> Self {
            Self {
                read_target: std::sync::Mutex::new(read_target),
                set_target_calls: AtomicUsize::new(0),
                fail_set_target: false,
            }
        }
    }

    #[async_trait::async_trait]
    impl ProviderClient for ScriptedProvider {
        async fn get_record(&self, _hostname: &str) -> Result<Option<crate::provider::Record>, crate::error::ProviderError> {
            Ok(None)
        }

        async fn read_target(&self, _hostname: &str) -> Result<DnsTarget, crate::error::ProviderError> {
            Ok(*self.read_target.lock().unwrap())
        }

        async fn set_target(&self, _hostname: &str, target: DnsTarget) -> Result<(), crate::error::ProviderError> {
            self.set_target_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_set_target {
                return Err(crate::error::ProviderError::Network("boom".to_string()));
            }
            *self.read_target.lock().unwrap() = target;
            Ok(())
        }
    }

    fn test_config() -> Configuration {
        Configuration {
            hostname: "mirai.example.com".to_string(),
            tunnel_id: "tun-1".to_string(),
            failover_address: "165.227.110.199".to_string(),
            stabilization_failover: StdDuration::from_secs(90),
            stabilization_failback: StdDuration::from_secs(600),
            max_failovers_24h: 3,
            reconcile_interval: StdDuration::from_secs(30),
            dry_run: false,
            min_primary_replicas: 2,
            cloudflare_api_token: "real-token-value".to_string(),
            cloudflare_zone_id: None,
            cloudflare_account_id: None,
            cdn_tunnel_suffix: "cfargotunnel.com".to_string(),
            cdn_address_prefixes: vec!["104.16.".to_string()],
            k8s_namespace: "ingress".to_string(),
            k8s_label_selector: "app=cloudflared".to_string(),
            http_bind_addr: "0.0.0.0:8080".to_string(),
            state_store_path: None,
            log_level: "info".to_string(),
            log_format: crate::config::LogFormat::Pretty,
        }
    }

    fn engine_with(
        healthy: bool,
        provider_target: DnsTarget,
    ) -> (ReconcileEngine, Arc<ScriptedProvider>, Arc<StaticHealthProbe>) {
        let config = test_config();
        let health = Arc::new(StaticHealthProbe::new(healthy));
        let observer = Arc::new(StaticObserver);
        let provider = Arc::new(ScriptedProvider::new(provider_target));
        let store = Arc::new(MemoryOperationalStateStore::new());
        let now = Utc::now();
        let (engine, _rx) = ReconcileEngine::new(
            config,
            health.clone(),
            observer,
            provider.clone(),
            store,
            OperationalState::initial(now),
        );
        (engine, provider, health)
    }

    #[tokio::test]
    async fn steady_primary_has_no_side_effects() {
        let (engine, provider, _health) = engine_with(true, DnsTarget::Primary);
        engine.reconcile(Utc::now()).await;
        let state = engine.snapshot().await;
        assert_eq!(state.phase, SystemPhase::PrimaryHealthy);
        assert_eq!(provider.set_target_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn clean_failover_commits_after_threshold() {
        let (engine, provider, _health) = engine_with(false, DnsTarget::Primary);
        let t0 = Utc::now();

        engine.reconcile(t0 + chrono::Duration::seconds(30)).await;
        assert_eq!(engine.snapshot().await.phase, SystemPhase::PrimaryDegraded);

        engine.reconcile(t0 + chrono::Duration::seconds(120)).await;
        let state = engine.snapshot().await;
        assert_eq!(state.phase, SystemPhase::OnFailover);
        assert_eq!(state.current_target, DnsTarget::Failover);
        assert_eq!(state.failover_count_24h, 1);
        assert!(state.stabilization_start.is_none());
        assert_eq!(provider.set_target_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn flap_is_suppressed_without_provider_write() {
        let (engine, provider, health) = engine_with(false, DnsTarget::Primary);
        let t0 = Utc::now();

        engine.reconcile(t0 + chrono::Duration::seconds(30)).await;
        assert_eq!(engine.snapshot().await.phase, SystemPhase::PrimaryDegraded);

        health.set(true);
        engine.reconcile(t0 + chrono::Duration::seconds(90)).await;

        let state = engine.snapshot().await;
        assert_eq!(state.phase, SystemPhase::PrimaryHealthy);
        assert!(state.stabilization_start.is_none());
        assert_eq!(provider.set_target_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn circuit_breaker_blocks_new_failover() {
        let mut config = test_config();
        config.max_failovers_24h = 3;
        let health = Arc::new(StaticHealthProbe::new(false));
        let observer = Arc::new(StaticObserver);
        let provider = Arc::new(ScriptedProvider::new(DnsTarget::Primary));
        let store = Arc::new(MemoryOperationalStateStore::new());
        let now = Utc::now();
        let mut initial = OperationalState::initial(now);
        initial.failover_count_24h = 3;
        let (engine, _rx) = ReconcileEngine::new(
            config,
            health,
            observer,
            provider.clone(),
            store,
            initial,
        );

        engine.reconcile(now).await;
        let state = engine.snapshot().await;
        assert_eq!(state.phase, SystemPhase::PrimaryHealthy);
        assert_eq!(provider.set_target_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn drift_correction_adopts_provider_target_without_phase_change() {
        let (engine, _provider, _health) = engine_with(true, DnsTarget::Failover);
        engine.reconcile(Utc::now()).await;
        let state = engine.snapshot().await;
        assert_eq!(state.current_target, DnsTarget::Failover);
    }

    #[tokio::test]
    async fn force_dual_failure_clears_stabilization_start() {
        let (engine, _provider, _health) = engine_with(false, DnsTarget::Primary);
        engine.reconcile(Utc::now() + chrono::Duration::seconds(30)).await;
        assert_eq!(engine.snapshot().await.phase, SystemPhase::PrimaryDegraded);
        assert!(engine.snapshot().await.stabilization_start.is_some());

        engine.force_dual_failure().await;

        let state = engine.snapshot().await;
        assert_eq!(state.phase, SystemPhase::DualFailure);
        assert!(state.stabilization_start.is_none());
        assert!(state.stabilization_invariant_holds());
    }

    #[tokio::test]
    async fn dry_run_transitions_state_without_provider_write() {
        let mut config = test_config();
        config.dry_run = true;
        let health = Arc::new(StaticHealthProbe::new(false));
        let observer = Arc::new(StaticObserver);
        let provider = Arc::new(ScriptedProvider::new(DnsTarget::Primary));
        let store = Arc::new(MemoryOperationalStateStore::new());
        let now = Utc::now();
        let (engine, _rx) = ReconcileEngine::new(
            config,
            health,
            observer,
            provider.clone(),
            store,
            OperationalState::initial(now),
        );

        engine.reconcile(now + chrono::Duration::seconds(30)).await;
        engine.reconcile(now + chrono::Duration::seconds(120)).await;

        let state = engine.snapshot().await;
        assert_eq!(state.current_target, DnsTarget::Failover);
        assert_eq!(state.phase, SystemPhase::OnFailover);
        assert_eq!(state.failover_count_24h, 1);
        assert_eq!(provider.set_target_calls.load(Ordering::SeqCst), 0);
    }
}
