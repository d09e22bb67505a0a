//! The hash chain: the single-writer event log for one tracked tab.
//!
//! `HashChain` owns the append-only sequence of proved events for one
//! document. Writes are serialized through a `tokio::sync::Mutex` so two
//! concurrent `record_event` calls can never observe or extend the same
//! tail; the PoSW computation itself (CPU-bound, ~tens of milliseconds at
//! `POSW_ITERATIONS`) runs on the blocking thread pool via
//! `tokio::task::spawn_blocking` so it never stalls the async runtime's
//! I/O reactor while a writer holds the lock.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngCore;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Semaphore};

use crate::checkpoint::{is_checkpoint_boundary, Checkpoint, CHECKPOINT_INTERVAL};
use crate::error::{Error, Result};
use crate::event::{Event, EventCore, EventCoreWithPosw, EventInput};
use crate::fingerprint::{DeviceFingerprint, FingerprintComponents};
use crate::hash::{det_json, sha256_hex};
use crate::posw::{self, Posw, POSW_TIMEOUT};

/// Abstraction over "compute a PoSW". The chain always dispatches the real
/// implementation to a blocking thread; this trait exists so tests (and
/// any host that wants a cheaper proof for local development) can swap in
/// a faster backend without touching chain logic.
pub trait PoswBackend: Send + Sync {
    fn compute(&self, previous_hash: &str, event_data_str: &str) -> Posw;
}

/// The production backend: the real iterated-SHA-256 PoSW.
#[derive(Debug, Default)]
pub struct StandardPosw;

impl PoswBackend for StandardPosw {
    fn compute(&self, previous_hash: &str, event_data_str: &str) -> Posw {
        posw::compute(previous_hash, event_data_str)
    }
}

/// Callback invoked after an event is durably appended to the in-memory
/// chain, before `record_event` returns. A host wires this up to its own
/// storage (see `persistence.rs`) to get incremental durability without
/// the chain needing to know anything about SQLite, files, or anything
/// else.
pub type AppendEventHook = Arc<dyn Fn(&Event) + Send + Sync>;

struct ChainInner {
    device_fingerprint: DeviceFingerprint,
    initial_hash: String,
    /// Wall-clock epoch-ms this chain was seeded (or last reset) at.
    /// Every event's `timestamp` is recorded relative to this reference
    /// point, per the data model's "milliseconds since chain start".
    start_time: u64,
    checkpoint_interval: u64,
    events: Vec<Event>,
    checkpoints: Vec<Checkpoint>,
}

impl ChainInner {
    fn last_hash(&self) -> &str {
        self.events
            .last()
            .map(|e| e.hash.as_str())
            .unwrap_or(self.initial_hash.as_str())
    }

    fn last_timestamp(&self) -> u64 {
        self.events.last().map(|e| e.core.timestamp).unwrap_or(0)
    }
}

/// A fully self-describing, restorable snapshot of a chain's state, used
/// by `persistence.rs` to save/restore across process restarts and by
/// `envelope.rs` to build exports.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainSnapshot {
    pub device_fingerprint: DeviceFingerprint,
    pub initial_hash: String,
    pub start_time: u64,
    pub checkpoint_interval: u64,
    pub events: Vec<Event>,
    pub checkpoints: Vec<Checkpoint>,
}

/// One tab's hash chain: device fingerprint, running events, and the
/// checkpoints sampled off them.
pub struct HashChain {
    inner: Mutex<ChainInner>,
    posw_backend: Arc<dyn PoswBackend>,
    /// Bounds how many `record_event` calls may be in flight (queued
    /// waiting on the writer lock or the blocking pool) at once. `None`
    /// means unbounded — the default, and the right choice for a single
    /// embedded editor tab. A host fronting many tabs behind one socket
    /// sets this to shed load instead of letting the queue grow without
    /// bound.
    queue: Option<Semaphore>,
    queue_capacity: Option<usize>,
    append_event_hook: std::sync::Mutex<Option<AppendEventHook>>,
}

impl HashChain {
    /// Start a new chain: derive the seed hash from `components` and
    /// record nothing else. The first call to `record_event` must be a
    /// `HumanAttestation` (see `EventType::may_open_chain`).
    pub fn initialize(components: FingerprintComponents) -> Result<Self> {
        Self::initialize_with_interval(components, CHECKPOINT_INTERVAL)
    }

    pub fn initialize_with_interval(
        components: FingerprintComponents,
        checkpoint_interval: u64,
    ) -> Result<Self> {
        let device_fingerprint = DeviceFingerprint::derive(components)?;
        let initial_hash = seed_initial_hash(&device_fingerprint.hash);
        Ok(Self {
            inner: Mutex::new(ChainInner {
                device_fingerprint,
                initial_hash,
                start_time: now_millis(),
                checkpoint_interval,
                events: Vec::new(),
                checkpoints: Vec::new(),
            }),
            posw_backend: Arc::new(StandardPosw),
            queue: None,
            queue_capacity: None,
            append_event_hook: std::sync::Mutex::new(None),
        })
    }

    /// Start a new chain from a fingerprint derived elsewhere (shared
    /// across tabs by `tabs::TabCoordinator`) instead of deriving one from
    /// raw components.
    pub fn from_fingerprint(fingerprint: DeviceFingerprint, checkpoint_interval: u64) -> Self {
        let initial_hash = seed_initial_hash(&fingerprint.hash);
        Self {
            inner: Mutex::new(ChainInner {
                device_fingerprint: fingerprint,
                initial_hash,
                start_time: now_millis(),
                checkpoint_interval,
                events: Vec::new(),
                checkpoints: Vec::new(),
            }),
            posw_backend: Arc::new(StandardPosw),
            queue: None,
            queue_capacity: None,
            append_event_hook: std::sync::Mutex::new(None),
        }
    }

    /// Rebuild a chain from a previously saved snapshot, trusting it as-is
    /// (callers that need tamper-evidence should run `verify::verify_full`
    /// or `verify::verify_sampled` over the snapshot first).
    pub fn restore(snapshot: ChainSnapshot) -> Self {
        Self {
            inner: Mutex::new(ChainInner {
                device_fingerprint: snapshot.device_fingerprint,
                initial_hash: snapshot.initial_hash,
                start_time: snapshot.start_time,
                checkpoint_interval: snapshot.checkpoint_interval,
                events: snapshot.events,
                checkpoints: snapshot.checkpoints,
            }),
            posw_backend: Arc::new(StandardPosw),
            queue: None,
            queue_capacity: None,
            append_event_hook: std::sync::Mutex::new(None),
        }
    }

    /// Bound the number of concurrent `record_event` callers. Once
    /// `capacity` permits are outstanding, further calls fail fast with
    /// `Error::QueueFull` instead of queuing indefinitely.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue = Some(Semaphore::new(capacity));
        self.queue_capacity = Some(capacity);
        self
    }

    /// Swap in a non-default PoSW backend (tests, or a host that wants a
    /// cheaper proof for local development).
    pub fn with_posw_backend(mut self, backend: Arc<dyn PoswBackend>) -> Self {
        self.posw_backend = backend;
        self
    }

    /// Register a hook invoked synchronously, under the writer lock,
    /// right after each event is appended in memory. Replaces any
    /// previously-registered hook.
    pub fn set_append_event_hook(&self, hook: AppendEventHook) {
        *self.append_event_hook.lock().unwrap() = Some(hook);
    }

    pub async fn device_fingerprint(&self) -> DeviceFingerprint {
        self.inner.lock().await.device_fingerprint.clone()
    }

    pub async fn initial_hash(&self) -> String {
        self.inner.lock().await.initial_hash.clone()
    }

    pub async fn checkpoint_interval(&self) -> u64 {
        self.inner.lock().await.checkpoint_interval
    }

    pub async fn len(&self) -> u64 {
        self.inner.lock().await.events.len() as u64
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn last_hash(&self) -> String {
        self.inner.lock().await.last_hash().to_string()
    }

    pub async fn events(&self) -> Vec<Event> {
        self.inner.lock().await.events.clone()
    }

    pub async fn checkpoints(&self) -> Vec<Checkpoint> {
        self.inner.lock().await.checkpoints.clone()
    }

    /// Milliseconds since this chain was initialized (or last reset).
    pub async fn elapsed_ms(&self) -> u64 {
        now_millis().saturating_sub(self.inner.lock().await.start_time)
    }

    /// How many `record_event` calls currently hold a queue permit (i.e.
    /// are in flight: waiting on the writer lock or the blocking pool).
    /// Always `0` for a chain with no queue capacity bound, since such a
    /// chain never makes a caller wait for a permit.
    pub fn queued(&self) -> u64 {
        match (&self.queue, self.queue_capacity) {
            (Some(sem), Some(capacity)) => capacity.saturating_sub(sem.available_permits()) as u64,
            _ => 0,
        }
    }

    /// Snapshot the entire chain state for persistence or export.
    pub async fn snapshot(&self) -> ChainSnapshot {
        let inner = self.inner.lock().await;
        ChainSnapshot {
            device_fingerprint: inner.device_fingerprint.clone(),
            initial_hash: inner.initial_hash.clone(),
            start_time: inner.start_time,
            checkpoint_interval: inner.checkpoint_interval,
            events: inner.events.clone(),
            checkpoints: inner.checkpoints.clone(),
        }
    }

    /// Destroy the chain's recorded state and immediately re-initialize it
    /// from the same device fingerprint: a fresh `initial_hash` (re-salted),
    /// a fresh `start_time`, and an empty event/checkpoint log. The next
    /// `record_event` call must again be a `HumanAttestation`.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        inner.initial_hash = seed_initial_hash(&inner.device_fingerprint.hash);
        inner.start_time = now_millis();
        inner.events = Vec::new();
        inner.checkpoints = Vec::new();
    }

    /// Record one event: assign its sequence number and timestamp, link
    /// it to the current tail, compute its PoSW on the blocking pool, and
    /// append it. Returns the fully-proved `Event`.
    pub async fn record_event(&self, input: EventInput) -> Result<Event> {
        let _permit = match &self.queue {
            Some(sem) => Some(
                sem.try_acquire()
                    .map_err(|_| Error::QueueFull)?,
            ),
            None => None,
        };

        let mut inner = self.inner.lock().await;

        let sequence = inner.events.len() as u64;
        if sequence == 0 && !input.event_type.may_open_chain() {
            return Err(Error::AttestationMustBeFirst);
        }

        let previous_hash = inner.last_hash().to_string();
        let elapsed = now_millis().saturating_sub(inner.start_time);
        let timestamp = if inner.events.is_empty() {
            elapsed
        } else {
            elapsed.max(inner.last_timestamp())
        };
        let input_content_hash = input.content_hash;

        let core = EventCore {
            sequence,
            timestamp,
            event_type: input.event_type,
            input_type: input.input_type,
            data: input.data,
            range_offset: input.range_offset,
            range_length: input.range_length,
            range: input.range,
            description: input.description,
            previous_hash,
        };

        let event_data_str = det_json(&core)?;
        let backend = self.posw_backend.clone();
        let previous_hash_for_posw = core.previous_hash.clone();
        // The computation itself runs to completion on the blocking pool
        // regardless (cancellation-safety only extends to before
        // dispatch — see the concurrency model), but a caller is told
        // `PoswTimeout` and the event is dropped rather than appended if
        // it overran the reference wall-clock bound.
        let posw = tokio::time::timeout(
            POSW_TIMEOUT,
            tokio::task::spawn_blocking(move || backend.compute(&previous_hash_for_posw, &event_data_str)),
        )
        .await
        .map_err(|_| Error::PoswTimeout)?
        .map_err(|_| Error::PoswTimeout)?;

        let payload = det_json(&EventCoreWithPosw { core: &core, posw: &posw })?;
        let hash = crate::hash::sha256_hex_concat(&[core.previous_hash.as_bytes(), payload.as_bytes()]);

        let event = Event { core, posw, hash };
        inner.events.push(event.clone());

        if is_checkpoint_boundary(sequence, inner.checkpoint_interval) {
            inner.checkpoints.push(Checkpoint {
                sequence,
                hash: event.hash.clone(),
                timestamp: event.core.timestamp,
                content_hash: input_content_hash,
            });
        }

        if let Some(hook) = self.append_event_hook.lock().unwrap().as_ref() {
            hook(&event);
        }

        Ok(event)
    }
}

/// `initialHash = SHA-256(fingerprintHash ‖ random_16_bytes)` — salts the
/// chain seed with a fresh nonce so two tabs sharing one device fingerprint
/// (see `tabs::TabCoordinator`) don't start from the same literal hash.
fn seed_initial_hash(fingerprint_hash: &str) -> String {
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    let mut bytes = fingerprint_hash.as_bytes().to_vec();
    bytes.extend_from_slice(&salt);
    sha256_hex(&bytes)
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Attestation, EventData, EventType};

    fn sample_components() -> FingerprintComponents {
        crate::fingerprint::FingerprintComponents {
            user_agent: "UA".to_string(),
            platform: "P".to_string(),
            languages: vec!["en".to_string()],
            hardware_concurrency: Some(4),
            device_memory_gb: Some(8),
            screen: crate::fingerprint::ScreenGeometry {
                width: 1280,
                height: 720,
                color_depth: Some(24),
            },
            timezone: "UTC".to_string(),
            canvas_probe: None,
            webgl_probe: None,
            fonts: vec![],
            cookie_enabled: true,
            do_not_track: None,
            max_touch_points: 0,
        }
    }

    fn attestation_input() -> EventInput {
        EventInput {
            event_type: EventType::HumanAttestation,
            input_type: None,
            data: EventData::Attestation(Attestation {
                verified: true,
                score: 0.9,
                action: "start".to_string(),
                timestamp: "2026-07-28T00:00:00Z".to_string(),
                hostname: "host".to_string(),
                signature: "sig".to_string(),
                success: true,
            }),
            range_offset: None,
            range_length: None,
            range: None,
            description: None,
            content_hash: None,
        }
    }

    fn content_change_input(text: &str) -> EventInput {
        EventInput {
            event_type: EventType::ContentChange,
            input_type: Some("insertText".to_string()),
            data: EventData::Text { value: text.to_string() },
            range_offset: Some(0),
            range_length: Some(0),
            range: None,
            description: None,
            content_hash: None,
        }
    }

    #[tokio::test]
    async fn first_event_must_be_human_attestation() {
        let chain = HashChain::initialize(sample_components()).unwrap();
        let err = chain.record_event(content_change_input("x")).await.unwrap_err();
        assert!(matches!(err, Error::AttestationMustBeFirst));
    }

    #[tokio::test]
    async fn event_zero_previous_hash_equals_initial_hash() {
        let chain = HashChain::initialize(sample_components()).unwrap();
        let initial = chain.initial_hash().await;
        let event = chain.record_event(attestation_input()).await.unwrap();
        assert_eq!(event.core.previous_hash, initial);
        assert_eq!(event.core.sequence, 0);
    }

    #[tokio::test]
    async fn subsequent_events_link_to_previous_hash() {
        let chain = HashChain::initialize(sample_components()).unwrap();
        let first = chain.record_event(attestation_input()).await.unwrap();
        let second = chain.record_event(content_change_input("hello")).await.unwrap();
        assert_eq!(second.core.previous_hash, first.hash);
        assert_eq!(second.core.sequence, 1);
    }

    #[tokio::test]
    async fn checkpoint_emitted_on_interval_boundary() {
        let chain = HashChain::initialize_with_interval(sample_components(), 2).unwrap();
        chain.record_event(attestation_input()).await.unwrap();
        let second = chain.record_event(content_change_input("a")).await.unwrap();
        let checkpoints = chain.checkpoints().await;
        assert_eq!(checkpoints.len(), 1);
        assert_eq!(checkpoints[0].hash, second.hash);
    }

    #[tokio::test]
    async fn append_event_hook_fires_per_event() {
        let chain = HashChain::initialize(sample_components()).unwrap();
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let count_clone = count.clone();
        chain.set_append_event_hook(Arc::new(move |_event| {
            count_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }));
        chain.record_event(attestation_input()).await.unwrap();
        chain.record_event(content_change_input("a")).await.unwrap();
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn event_timestamp_is_chain_relative() {
        let chain = HashChain::initialize(sample_components()).unwrap();
        let event = chain.record_event(attestation_input()).await.unwrap();
        // Chain start and first event are recorded within the same call;
        // a raw epoch-ms stamp would be on the order of 1.7e12.
        assert!(event.core.timestamp < 1_000);
    }

    #[tokio::test]
    async fn reset_clears_events_and_reseeds_initial_hash() {
        let chain = HashChain::initialize(sample_components()).unwrap();
        let initial_before = chain.initial_hash().await;
        chain.record_event(attestation_input()).await.unwrap();
        chain.record_event(content_change_input("a")).await.unwrap();
        assert_eq!(chain.len().await, 2);

        chain.reset().await;

        assert_eq!(chain.len().await, 0);
        assert!(chain.checkpoints().await.is_empty());
        assert_ne!(chain.initial_hash().await, initial_before);

        // The chain is usable again and still enforces the opening rule.
        let err = chain.record_event(content_change_input("b")).await.unwrap_err();
        assert!(matches!(err, Error::AttestationMustBeFirst));
        let event = chain.record_event(attestation_input()).await.unwrap();
        assert_eq!(event.core.sequence, 0);
    }

    #[tokio::test]
    async fn queue_capacity_rejects_when_exhausted() {
        use std::sync::Arc as StdArc;

        struct SlowPosw;
        impl PoswBackend for SlowPosw {
            fn compute(&self, previous_hash: &str, event_data_str: &str) -> Posw {
                std::thread::sleep(std::time::Duration::from_millis(200));
                posw::compute(previous_hash, event_data_str)
            }
        }

        let chain = StdArc::new(
            HashChain::initialize(sample_components())
                .unwrap()
                .with_queue_capacity(1)
                .with_posw_backend(StdArc::new(SlowPosw)),
        );
        chain.record_event(attestation_input()).await.unwrap();

        let chain_a = chain.clone();
        let handle = tokio::spawn(async move { chain_a.record_event(content_change_input("a")).await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let second = chain.record_event(content_change_input("b")).await;
        assert!(matches!(second, Err(Error::QueueFull)));
        handle.await.unwrap().unwrap();
    }
}
