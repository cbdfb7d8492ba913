//! Snowflake-style 64-bit identifier generation.
//!
//! Layout, high to low: `timestamp offset | datacenter (5) | worker (5) | sequence (12)`.
//! Identifiers double as database keys and as stored object file names.

use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

/// 2022-01-01T00:00:00Z in milliseconds.
pub const EPOCH_MS: u64 = 1_640_995_200_000;

const WORKER_ID_BITS: u64 = 5;
const DATACENTER_ID_BITS: u64 = 5;
const SEQUENCE_BITS: u64 = 12;

pub const MAX_WORKER_ID: u8 = ((1u64 << WORKER_ID_BITS) - 1) as u8;
pub const MAX_DATACENTER_ID: u8 = ((1u64 << DATACENTER_ID_BITS) - 1) as u8;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

const WORKER_ID_SHIFT: u64 = SEQUENCE_BITS;
const DATACENTER_ID_SHIFT: u64 = SEQUENCE_BITS + WORKER_ID_BITS;
const TIMESTAMP_SHIFT: u64 = SEQUENCE_BITS + WORKER_ID_BITS + DATACENTER_ID_BITS;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdError {
    #[error("worker id must be between 0 and {MAX_WORKER_ID}, got {0}")]
    WorkerOutOfRange(u8),
    #[error("datacenter id must be between 0 and {MAX_DATACENTER_ID}, got {0}")]
    DatacenterOutOfRange(u8),
}

/// Millisecond wall-clock source.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

/// The system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Generator configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct IdConfig {
    /// Datacenter id (0-31). Default: 1.
    #[serde(default = "default_datacenter_id")]
    pub datacenter_id: u8,
    /// Explicit worker id (0-31). Derived from the host when absent.
    #[serde(default)]
    pub worker_id: Option<u8>,
}

fn default_datacenter_id() -> u8 {
    1
}

impl Default for IdConfig {
    fn default() -> Self {
        Self {
            datacenter_id: default_datacenter_id(),
            worker_id: None,
        }
    }
}

#[derive(Debug)]
struct GeneratorState {
    last_timestamp: u64,
    sequence: u64,
}

/// Thread-safe, strictly increasing identifier source.
pub struct IdGenerator {
    worker_id: u64,
    datacenter_id: u64,
    clock: Box<dyn Clock>,
    state: Mutex<GeneratorState>,
}

impl std::fmt::Debug for IdGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdGenerator")
            .field("worker_id", &self.worker_id)
            .field("datacenter_id", &self.datacenter_id)
            .finish_non_exhaustive()
    }
}

impl IdGenerator {
    pub fn new(worker_id: u8, datacenter_id: u8) -> Result<Self, IdError> {
        Self::with_clock(worker_id, datacenter_id, SystemClock)
    }

    pub fn with_clock(
        worker_id: u8,
        datacenter_id: u8,
        clock: impl Clock + 'static,
    ) -> Result<Self, IdError> {
        if worker_id > MAX_WORKER_ID {
            return Err(IdError::WorkerOutOfRange(worker_id));
        }
        if datacenter_id > MAX_DATACENTER_ID {
            return Err(IdError::DatacenterOutOfRange(datacenter_id));
        }
        Ok(Self::build(worker_id, datacenter_id, Box::new(clock)))
    }

    fn build(worker_id: u8, datacenter_id: u8, clock: Box<dyn Clock>) -> Self {
        Self {
            worker_id: (worker_id & MAX_WORKER_ID) as u64,
            datacenter_id: (datacenter_id & MAX_DATACENTER_ID) as u64,
            clock,
            state: Mutex::new(GeneratorState {
                last_timestamp: 0,
                sequence: 0,
            }),
        }
    }

    /// Build a generator from config, deriving the worker id from the host if unset.
    pub fn from_config(config: &IdConfig) -> Result<Self, IdError> {
        let worker_id = config.worker_id.unwrap_or_else(host_worker_id);
        Self::new(worker_id, config.datacenter_id)
    }

    pub fn worker_id(&self) -> u8 {
        self.worker_id as u8
    }

    pub fn datacenter_id(&self) -> u8 {
        self.datacenter_id as u8
    }

    /// Issue the next identifier.
    pub fn next_id(&self) -> u64 {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let mut timestamp = self.clock.now_millis().max(state.last_timestamp);

        if timestamp == state.last_timestamp {
            state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                timestamp = self.wait_next_millis(state.last_timestamp);
            }
        } else {
            state.sequence = 0;
        }
        state.last_timestamp = timestamp;

        (timestamp.saturating_sub(EPOCH_MS) << TIMESTAMP_SHIFT)
            | (self.datacenter_id << DATACENTER_ID_SHIFT)
            | (self.worker_id << WORKER_ID_SHIFT)
            | state.sequence
    }

    fn wait_next_millis(&self, last_timestamp: u64) -> u64 {
        let mut timestamp = self.clock.now_millis();
        while timestamp <= last_timestamp {
            std::hint::spin_loop();
            timestamp = self.clock.now_millis();
        }
        timestamp
    }
}

/// Split an identifier back into `(unix_millis, datacenter, worker, sequence)`.
pub fn decompose(id: u64) -> (u64, u8, u8, u16) {
    let timestamp = (id >> TIMESTAMP_SHIFT) + EPOCH_MS;
    let datacenter = ((id >> DATACENTER_ID_SHIFT) & MAX_DATACENTER_ID as u64) as u8;
    let worker = ((id >> WORKER_ID_SHIFT) & MAX_WORKER_ID as u64) as u8;
    let sequence = (id & SEQUENCE_MASK) as u16;
    (timestamp, datacenter, worker, sequence)
}

/// Derive a worker id from the host's hardware address and the process id.
///
/// Low 3 bits of the address, shifted left by 2, OR the low 2 bits of the pid.
/// Falls back to a random address when zero or several interfaces are found.
pub fn host_worker_id() -> u8 {
    let mac = match hardware_addresses(Path::new("/sys/class/net")).as_slice() {
        [single] => *single,
        found => {
            debug!(interfaces = found.len(), "No unique hardware address, using random");
            rand::random::<u64>() & 0xFFFF_FFFF_FFFF
        }
    };
    worker_id_from(mac, std::process::id())
}

fn worker_id_from(mac: u64, pid: u32) -> u8 {
    let mac_bits = (mac & 0b111) as u8;
    let pid_bits = (pid & 0b11) as u8;
    (mac_bits << 2) | pid_bits
}

/// Non-loopback, non-zero hardware addresses listed under a sysfs-style directory.
fn hardware_addresses(root: &Path) -> Vec<u64> {
    let Ok(entries) = std::fs::read_dir(root) else {
        return Vec::new();
    };

    let mut found = Vec::new();
    for entry in entries.flatten() {
        if entry.file_name() == "lo" {
            continue;
        }
        let Ok(raw) = std::fs::read_to_string(entry.path().join("address")) else {
            continue;
        };
        if let Some(mac) = parse_mac(raw.trim())
            && mac != 0
        {
            found.push(mac);
        }
    }
    found
}

fn parse_mac(s: &str) -> Option<u64> {
    let hex_digits: String = s.split(':').collect();
    if hex_digits.len() != 12 {
        return None;
    }
    u64::from_str_radix(&hex_digits, 16).ok()
}

static GLOBAL: OnceLock<Arc<IdGenerator>> = OnceLock::new();

/// Install the process-wide generator. Returns the generator that ends up
/// installed, which is the existing one if `install` already ran.
pub fn install(config: &IdConfig) -> Result<Arc<IdGenerator>, IdError> {
    if let Some(existing) = GLOBAL.get() {
        warn!("Id generator already installed, keeping existing instance");
        return Ok(existing.clone());
    }
    let generator = Arc::new(IdGenerator::from_config(config)?);
    Ok(GLOBAL.get_or_init(|| generator).clone())
}

/// The process-wide generator, built from host defaults on first use if
/// nothing was installed.
pub fn global() -> Arc<IdGenerator> {
    GLOBAL
        .get_or_init(|| {
            Arc::new(IdGenerator::build(
                host_worker_id(),
                default_datacenter_id(),
                Box::new(SystemClock),
            ))
        })
        .clone()
}
