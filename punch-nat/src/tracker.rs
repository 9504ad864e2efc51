//! Discovery tracker (`spec.md` §4.2): runs the mapping/filtering tests on
//! startup, on interface change, and on a periodic timer; persists the
//! history through the storage seam and broadcasts changes.
//!
//! The tracker never holds a reference to whatever watches for interface
//! changes — per the design note on breaking the tracker/monitor/callback
//! cycle, [`Tracker::discovery_trigger`] hands back a plain `Fn` the watcher
//! can call without knowing about the tracker itself.

use crate::behavior::{History, NatBehavior};
use crate::error::{Error, Result};
use crate::filtering::{run_filtering_test, FilteringProbe};
use crate::mapping::{run_mapping_test, MappingProbe};
use punch_core::SharedClock;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const DEFAULT_STORAGE_KEY: &str = "nat_behavior";

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub max_history_size: usize,
    pub check_interval: Duration,
    pub storage_key: String,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_history_size: 100,
            check_interval: Duration::from_secs(30 * 60),
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
        }
    }
}

/// Plain counters exposed for the embedding binary's own telemetry, not
/// wired to any exporter here.
#[derive(Debug, Default, Clone, Copy)]
pub struct TrackerMetrics {
    pub discovery_cycles: u64,
    pub behavior_changes: u64,
}

pub struct Tracker {
    history: Mutex<History>,
    clock: SharedClock,
    storage: Arc<dyn punch_core::Storage>,
    config: TrackerConfig,
    events: broadcast::Sender<NatBehavior>,
    generation: AtomicU64,
    discovery_cycles: AtomicU64,
    behavior_changes: AtomicU64,
}

impl Tracker {
    pub fn new(clock: SharedClock, storage: Arc<dyn punch_core::Storage>, config: TrackerConfig) -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            history: Mutex::new(History::new(config.max_history_size)),
            clock,
            storage,
            config,
            events,
            generation: AtomicU64::new(0),
            discovery_cycles: AtomicU64::new(0),
            behavior_changes: AtomicU64::new(0),
        })
    }

    pub fn metrics(&self) -> TrackerMetrics {
        TrackerMetrics {
            discovery_cycles: self.discovery_cycles.load(Ordering::Relaxed),
            behavior_changes: self.behavior_changes.load(Ordering::Relaxed),
        }
    }

    /// Restores persisted history, if any, at startup.
    pub async fn load(&self) -> Result<()> {
        if let Some(raw) = self.storage.load(&self.config.storage_key).await? {
            match History::from_json(&raw) {
                Ok(history) => *self.history.lock().await = history,
                Err(e) => warn!(error = %e, "discarding unparseable persisted nat behavior history"),
            }
        }
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NatBehavior> {
        self.events.subscribe()
    }

    pub async fn current(&self) -> Option<NatBehavior> {
        self.history.lock().await.current().cloned()
    }

    pub async fn history_len(&self) -> usize {
        self.history.lock().await.len()
    }

    /// Appends `behavior` if it differs from the current entry, persists the
    /// new history, and broadcasts the change. Returns whether a change
    /// actually occurred.
    pub async fn record(&self, behavior: NatBehavior) -> Result<bool> {
        let mut history = self.history.lock().await;
        let changed = history.current() != Some(&behavior);
        if !changed {
            return Ok(false);
        }
        history.push(behavior.clone(), self.clock.system_now());
        let json = history.to_json().map_err(|e| Error::Parse(e.to_string()))?;
        self.storage.save(&self.config.storage_key, &json).await?;
        drop(history);
        self.behavior_changes.fetch_add(1, Ordering::Relaxed);
        let _ = self.events.send(behavior);
        Ok(true)
    }

    /// A plain callback an interface-change watcher can invoke without
    /// holding any other reference to this tracker. Each call bumps the
    /// generation counter and spawns a fresh discovery cycle against the
    /// probes and addresses captured at construction time; the returned
    /// handle resolves to the generation the spawned cycle ran under.
    pub fn discovery_trigger(
        self: &Arc<Self>,
        mapping_probe: Arc<dyn MappingProbe>,
        filtering_probe: Arc<dyn FilteringProbe>,
        primary: SocketAddr,
        alternate_ip: IpAddr,
    ) -> impl Fn() -> JoinHandle<u64> + Send + Sync + 'static {
        let tracker = Arc::clone(self);
        move || {
            let n = tracker.generation.fetch_add(1, Ordering::SeqCst) + 1;
            let tracker = Arc::clone(&tracker);
            let mapping_probe = Arc::clone(&mapping_probe);
            let filtering_probe = Arc::clone(&filtering_probe);
            tokio::spawn(async move {
                if let Err(e) = run_discovery(&tracker, mapping_probe.as_ref(), filtering_probe.as_ref(), primary, alternate_ip).await {
                    warn!(error = %e, "interface-change triggered nat behavior discovery failed");
                }
                n
            })
        }
    }

    pub fn spawn_periodic(
        self: Arc<Self>,
        mapping_probe: Arc<dyn MappingProbe>,
        filtering_probe: Arc<dyn FilteringProbe>,
        primary: SocketAddr,
        alternate_ip: IpAddr,
    ) -> JoinHandle<()> {
        let interval = self.config.check_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = run_discovery(&self, mapping_probe.as_ref(), filtering_probe.as_ref(), primary, alternate_ip).await {
                    warn!(error = %e, "periodic nat behavior discovery failed");
                }
            }
        })
    }
}

/// Runs one discovery cycle (mapping test, then filtering test) and feeds
/// the result into the tracker.
pub async fn run_discovery(
    tracker: &Tracker,
    mapping_probe: &dyn MappingProbe,
    filtering_probe: &dyn FilteringProbe,
    primary: SocketAddr,
    alternate_ip: IpAddr,
) -> Result<bool> {
    let mapping = run_mapping_test(mapping_probe, primary, alternate_ip).await?;
    let filtering = run_filtering_test(filtering_probe, primary).await?;
    tracker.discovery_cycles.fetch_add(1, Ordering::Relaxed);
    debug!(?mapping, ?filtering, "nat behavior discovery cycle complete");
    let mut behavior = NatBehavior::unknown();
    behavior.mapping = mapping;
    behavior.filtering = filtering;
    let changed = tracker.record(behavior).await?;
    if changed {
        info!("nat behavior changed");
    }
    Ok(changed)
}
