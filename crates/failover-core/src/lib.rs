//! Core library for the DNS failover controller.
//!
//! Provides the reconciliation engine and the trait boundaries it reconciles
//! across: `HealthProbe` (primary-path health), `DnsObserver` (advisory DNS
//! cross-check), `ProviderClient` (authoritative DNS provider), and
//! `OperationalStateStore` (durable operational state). Satellite crates
//! (`failover-provider-cloudflare`, `failover-health-k8s`) implement the
//! trait boundaries against real infrastructure; `failoverd` wires them
//! together behind an HTTP surface.

pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod observer;
pub mod provider;
pub mod state;
pub mod state_store;
pub mod trigger;

pub use config::Configuration;
pub use engine::{ReconcileEngine, ReconcileEvent};
pub use error::{Error, ProviderError, Result};
pub use health::HealthProbe;
pub use observer::{DnsObserver, ResolverDnsObserver};
pub use provider::{ProviderClient, Record};
pub use state::{DnsTarget, OperationalState, SystemPhase};
pub use state_store::{FileOperationalStateStore, MemoryOperationalStateStore, OperationalStateStore};
pub use trigger::{TriggerHandle, TriggerMux};
