//! Per-stream throttle for incremental type-and-dedupe passes.
//!
//! Callers that flush raw records in batches ask the valve whether a typing
//! pass is worth running now, and tell it when one has run. The valve never
//! runs anything itself.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::config::Config;
use crate::core::StreamDescriptor;

/// Interval meaning "always ready".
const NEGATIVE_MILLIS: i64 = -1;
const SIX_HOURS_MILLIS: i64 = 6 * 60 * 60 * 1000;

/// Interval ladder a stream steps up after each pass. The last step repeats.
const PAYLOAD_INTERVALS: [i64; 2] = [NEGATIVE_MILLIS, SIX_HOURS_MILLIS];

/// Source of the current time in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy)]
struct ValveEntry {
    last_update_time_ms: i64,
    interval_index: usize,
}

impl ValveEntry {
    const INITIAL: ValveEntry = ValveEntry {
        last_update_time_ms: 0,
        interval_index: 0,
    };

    fn interval_ms(&self) -> i64 {
        PAYLOAD_INTERVALS[self.interval_index]
    }
}

/// Decides, per stream, whether an incremental typing pass may run now.
pub struct TypeAndDedupeOperationValve {
    enabled: bool,
    clock: Arc<dyn Clock>,
    streams: RwLock<HashMap<StreamDescriptor, Arc<Mutex<ValveEntry>>>>,
}

impl fmt::Debug for TypeAndDedupeOperationValve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeAndDedupeOperationValve")
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

impl TypeAndDedupeOperationValve {
    /// Create a valve on the wall clock. The feature flag is read once, here.
    pub fn new(config: &Config) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &Config, clock: Arc<dyn Clock>) -> Self {
        Self {
            enabled: config.enable_incremental_final_table_updates,
            clock,
            streams: RwLock::new(HashMap::new()),
        }
    }

    /// Register a stream, resetting it if it was already known.
    pub fn add_stream(&self, stream: &StreamDescriptor) {
        let mut streams = self.streams.write().unwrap_or_else(|e| e.into_inner());
        streams.insert(stream.clone(), Arc::new(Mutex::new(ValveEntry::INITIAL)));
    }

    /// Register a stream unless it is already known.
    pub fn add_stream_if_absent(&self, stream: &StreamDescriptor) {
        self.entry_or_insert(stream);
    }

    /// Whether a typing pass for `stream` should run now.
    ///
    /// Always `false` when incremental final table updates are disabled or
    /// the stream was never registered.
    pub fn ready_to_type_and_dedupe(&self, stream: &StreamDescriptor) -> bool {
        if !self.enabled {
            return false;
        }
        let Some(entry) = self.entry(stream) else {
            return false;
        };

        let entry = *entry.lock().unwrap_or_else(|e| e.into_inner());
        let interval = entry.interval_ms();
        interval == NEGATIVE_MILLIS
            || self.clock.now_millis() - entry.last_update_time_ms >= interval
    }

    /// Record that a pass ran now and step the stream's interval up.
    pub fn update_time_and_increase_interval(&self, stream: &StreamDescriptor) {
        let entry = self.entry_or_insert(stream);
        let now = self.clock.now_millis();

        let mut entry = entry.lock().unwrap_or_else(|e| e.into_inner());
        entry.last_update_time_ms = now;
        entry.interval_index = (entry.interval_index + 1).min(PAYLOAD_INTERVALS.len() - 1);
        debug!(
            "Typing and deduping {} ran at {}; next pass in {} ms",
            stream,
            now,
            entry.interval_ms()
        );
    }

    /// Current interval for `stream`, if registered.
    pub fn get_increment_interval(&self, stream: &StreamDescriptor) -> Option<i64> {
        self.entry(stream)
            .map(|entry| entry.lock().unwrap_or_else(|e| e.into_inner()).interval_ms())
    }

    fn entry(&self, stream: &StreamDescriptor) -> Option<Arc<Mutex<ValveEntry>>> {
        let streams = self.streams.read().unwrap_or_else(|e| e.into_inner());
        streams.get(stream).cloned()
    }

    fn entry_or_insert(&self, stream: &StreamDescriptor) -> Arc<Mutex<ValveEntry>> {
        if let Some(entry) = self.entry(stream) {
            return entry;
        }
        let mut streams = self.streams.write().unwrap_or_else(|e| e.into_inner());
        streams
            .entry(stream.clone())
            .or_insert_with(|| Arc::new(Mutex::new(ValveEntry::INITIAL)))
            .clone()
    }
}
