//! Object descriptors, tiers and the operating mode.
//!
//! A tensor file is the unit of placement: the strategy engine decides per
//! access which tier should serve it.

use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::layer::LayerClass;

/// Identifies which storage tier should serve an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Memory-speed key-value cache.
    Hot,
    /// Reserved middle tier; served through the hot cache path.
    Warm,
    /// Object storage.
    Cold,
}

impl Tier {
    /// Whether reads for this decision should try the hot cache first.
    pub fn reads_through_hot(&self) -> bool {
        matches!(self, Tier::Hot | Tier::Warm)
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Hot => write!(f, "hot"),
            Tier::Warm => write!(f, "warm"),
            Tier::Cold => write!(f, "cold"),
        }
    }
}

/// Process-wide policy knob biasing tier decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    /// Promote frequently accessed objects toward the hot tier.
    #[default]
    Performance,
    /// Demote rarely accessed objects toward the cold tier.
    CostSaving,
    /// Base tier table only.
    Balanced,
}

impl OperatingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperatingMode::Performance => "performance",
            OperatingMode::CostSaving => "cost_saving",
            OperatingMode::Balanced => "balanced",
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            OperatingMode::Performance => 0,
            OperatingMode::CostSaving => 1,
            OperatingMode::Balanced => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => OperatingMode::Performance,
            1 => OperatingMode::CostSaving,
            _ => OperatingMode::Balanced,
        }
    }
}

impl std::fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Unknown operating mode '{0}' (expected performance, cost_saving or balanced)")]
pub struct ParseModeError(pub String);

impl FromStr for OperatingMode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "performance" => Ok(OperatingMode::Performance),
            "cost_saving" | "costsaving" => Ok(OperatingMode::CostSaving),
            "balanced" => Ok(OperatingMode::Balanced),
            _ => Err(ParseModeError(s.to_string())),
        }
    }
}

/// Lock-free holder for the current operating mode.
///
/// Each decision reads one snapshot; a concurrent `set` affects only later
/// decisions.
#[derive(Debug)]
pub struct ModeCell(AtomicU8);

impl ModeCell {
    pub fn new(mode: OperatingMode) -> Self {
        Self(AtomicU8::new(mode.to_u8()))
    }

    pub fn get(&self) -> OperatingMode {
        OperatingMode::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, mode: OperatingMode) {
        self.0.store(mode.to_u8(), Ordering::Release);
    }
}

/// Kind of access recorded in the prefetcher history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Read,
    Write,
}

/// Identity and statistics for one named object.
#[derive(Debug, Clone, Serialize)]
pub struct ObjectDescriptor {
    /// Unique object name.
    pub name: String,

    /// Size in bytes, as last observed.
    pub size_hint: u64,

    /// Category derived from the name.
    pub layer_class: LayerClass,

    /// Number of tier selections made for this object.
    pub access_frequency: u64,

    /// Wall-clock time of the last tier selection.
    pub last_access: SystemTime,
}

impl ObjectDescriptor {
    pub fn new(name: &str, size_hint: u64, layer_class: LayerClass) -> Self {
        Self {
            name: name.to_string(),
            size_hint,
            layer_class,
            access_frequency: 0,
            last_access: SystemTime::now(),
        }
    }

    /// Record an access, updating timestamp, counter and size.
    pub fn touch(&mut self, size: u64) {
        self.access_frequency += 1;
        self.last_access = SystemTime::now();
        if size > 0 {
            self.size_hint = size;
        }
    }
}
