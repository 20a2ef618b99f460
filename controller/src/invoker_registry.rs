use super::*;
use broker::messages::{Capacity, HeartbeatMessage, InvokerStatus};
use broker::{MessageBroker, MessageId};
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

/// An invoker that stays silent this long is no longer healthy.
const STALE_AFTER: time::Duration = time::Duration::seconds(30);

/// Monitor tick: heartbeat reads block at most this long, so stale scans
/// happen at least once a second.
const MONITOR_BLOCK: std::time::Duration = std::time::Duration::from_millis(1000);

const MONITOR_BATCH: usize = 64;

const STOP_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct Invoker {
    pub last_heartbeat: time::OffsetDateTime,
    pub capacity: Capacity,
    pub status: InvokerStatus,
}

/// Aggregate view over healthy invokers.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ClusterCapacity {
    pub total_invokers: usize,
    pub healthy_invokers: usize,
    pub total_memory: u64,
    pub available_memory: u64,
    pub total_containers: u64,
    pub warm_containers: u64,
    pub busy_containers: u64,
    pub prewarm_containers: u64,
    pub supported_runtimes: Vec<String>,
}

/// Tracks invoker liveness from the heartbeat stream and selects a target
/// invoker per invocation.
///
/// The map is shared between the monitor task and request handlers; every
/// access takes the mutex and nothing does I/O while holding it.
pub struct InvokerRegistry {
    invokers: Mutex<HashMap<String, Invoker>>,
    broker: Arc<dyn MessageBroker>,
    monitor: Mutex<Option<(tokio_util::sync::CancellationToken, tokio::task::JoinHandle<()>)>>,
}

impl InvokerRegistry {
    pub fn new(broker: Arc<dyn MessageBroker>) -> Self {
        Self {
            invokers: Default::default(),
            broker,
            monitor: Mutex::new(None),
        }
    }

    /// Start the heartbeat monitor. A second call while the monitor runs is
    /// a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut monitor = self.monitor.lock().trace_expect("Failed to lock mutex");
        if let Some((_, handle)) = monitor.as_ref() {
            if !handle.is_finished() {
                warn!("Heartbeat monitor already running");
                return;
            }
        }

        let cancel_token = tokio_util::sync::CancellationToken::new();
        let registry = self.clone();
        let token = cancel_token.clone();
        let handle = tokio::spawn(async move { registry.run(token).await });
        *monitor = Some((cancel_token, handle));
        info!("Started heartbeat monitor");
    }

    /// Stop the heartbeat monitor, joining it within a bounded wait. Safe to
    /// call when the monitor is not running.
    pub async fn stop(&self) {
        let Some((cancel_token, handle)) = self
            .monitor
            .lock()
            .trace_expect("Failed to lock mutex")
            .take()
        else {
            return;
        };

        cancel_token.cancel();
        if tokio::time::timeout(STOP_TIMEOUT, handle).await.is_err() {
            warn!("Heartbeat monitor did not stop within {STOP_TIMEOUT:?}");
        }
        info!("Stopped heartbeat monitor");
    }

    async fn run(self: Arc<Self>, cancel_token: tokio_util::sync::CancellationToken) {
        let mut last_id = MessageId::zero();
        loop {
            tokio::select! {
                biased;
                _ = cancel_token.cancelled() => break,
                read = self.broker.read_blocking(
                    broker::STREAM_HEARTBEATS,
                    &last_id,
                    MONITOR_BLOCK,
                    MONITOR_BATCH,
                ) => match read {
                    Ok(messages) => {
                        for message in messages {
                            last_id = message.id.clone();
                            match HeartbeatMessage::from_fields(&message.fields) {
                                Ok(heartbeat) => self.apply_heartbeat(heartbeat),
                                Err(e) => warn!("Ignoring invalid heartbeat: {e}"),
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Heartbeat stream read failed: {e}");
                        tokio::time::sleep(MONITOR_BLOCK).await;
                    }
                }
            }

            self.check_stale();
        }
    }

    /// Fold one heartbeat into the registry.
    pub fn apply_heartbeat(&self, heartbeat: HeartbeatMessage) {
        metrics::counter!("whisk_heartbeats_total").increment(1);

        let mut invokers = self.invokers.lock().trace_expect("Failed to lock mutex");
        let known = invokers
            .insert(
                heartbeat.invoker_id.clone(),
                Invoker {
                    last_heartbeat: heartbeat.timestamp,
                    capacity: heartbeat.capacity,
                    status: heartbeat.status,
                },
            )
            .is_some();
        drop(invokers);

        if !known {
            info!("Registered new invoker: {}", heartbeat.invoker_id);
        }
    }

    fn check_stale(&self) {
        let stale_before = time::OffsetDateTime::now_utc() - STALE_AFTER;
        let mut invokers = self.invokers.lock().trace_expect("Failed to lock mutex");
        for (invoker_id, invoker) in invokers.iter_mut() {
            if invoker.status == InvokerStatus::Healthy && invoker.last_heartbeat < stale_before {
                invoker.status = InvokerStatus::Unhealthy;
                warn!(
                    "Invoker {invoker_id} marked unhealthy, last heartbeat {}",
                    invoker.last_heartbeat
                );
            }
        }
    }

    /// Select an invoker for an execution of `kind` needing
    /// `memory_required` MB.
    ///
    /// Healthy invokers with enough memory and the runtime form the
    /// candidate set; those with warm containers are preferred; within the
    /// preferred set the one with the most available memory wins, invoker id
    /// ascending on ties so replays select identically.
    pub fn select(&self, kind: &str, memory_required: u64) -> Option<String> {
        let invokers = self.invokers.lock().trace_expect("Failed to lock mutex");

        let candidates = invokers
            .iter()
            .filter(|(_, invoker)| {
                invoker.status == InvokerStatus::Healthy
                    && invoker.capacity.available_memory >= memory_required
                    && invoker
                        .capacity
                        .supported_runtimes
                        .iter()
                        .any(|r| r == kind)
            })
            .collect::<Vec<_>>();

        if candidates.is_empty() {
            warn!("No healthy invoker available for {kind} with {memory_required}MB");
            return None;
        }

        let warm = candidates
            .iter()
            .filter(|(_, invoker)| invoker.capacity.warm_containers > 0)
            .copied()
            .collect::<Vec<_>>();

        let preferred = if warm.is_empty() { &candidates } else { &warm };
        preferred
            .iter()
            .max_by(|(a_id, a), (b_id, b)| {
                a.capacity
                    .available_memory
                    .cmp(&b.capacity.available_memory)
                    .then_with(|| b_id.cmp(a_id))
            })
            .map(|(invoker_id, invoker)| {
                debug!(
                    "Selected invoker {invoker_id} for {kind}: available_memory={}MB, warm={}",
                    invoker.capacity.available_memory, invoker.capacity.warm_containers
                );
                (*invoker_id).clone()
            })
    }

    pub fn cluster_capacity(&self) -> ClusterCapacity {
        let invokers = self.invokers.lock().trace_expect("Failed to lock mutex");

        let mut capacity = ClusterCapacity {
            total_invokers: invokers.len(),
            healthy_invokers: 0,
            total_memory: 0,
            available_memory: 0,
            total_containers: 0,
            warm_containers: 0,
            busy_containers: 0,
            prewarm_containers: 0,
            supported_runtimes: Vec::new(),
        };

        let mut runtimes = BTreeSet::new();
        for invoker in invokers.values() {
            if invoker.status != InvokerStatus::Healthy {
                continue;
            }
            capacity.healthy_invokers += 1;
            capacity.total_memory += invoker.capacity.total_memory;
            capacity.available_memory += invoker.capacity.available_memory;
            capacity.warm_containers += u64::from(invoker.capacity.warm_containers);
            capacity.busy_containers += u64::from(invoker.capacity.busy_containers);
            capacity.prewarm_containers += u64::from(invoker.capacity.prewarm_containers);
            runtimes.extend(invoker.capacity.supported_runtimes.iter().cloned());
        }
        capacity.total_containers =
            capacity.warm_containers + capacity.busy_containers + capacity.prewarm_containers;
        capacity.supported_runtimes = runtimes.into_iter().collect();
        capacity
    }

    pub fn invokers(&self) -> Vec<(String, Invoker)> {
        self.invokers
            .lock()
            .trace_expect("Failed to lock mutex")
            .iter()
            .map(|(invoker_id, invoker)| (invoker_id.clone(), invoker.clone()))
            .collect()
    }
}
