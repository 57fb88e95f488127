//! Probe scheduling modes and configuration
//!
//! This module defines how per-processor probes are scheduled and which
//! topology leaf they read.

use std::fmt;

/// Upper bound on concurrently pinned probes chosen automatically
pub const DEFAULT_MAX_IN_FLIGHT: usize = 16;

/// How per-processor probes are scheduled
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum ProbeMode {
    /// Launch, pin, run and join one probe before starting the next
    Sequential,

    /// Launch probes in batches and join each batch before reading it
    Parallel {
        /// Maximum number of probes running at once
        max_in_flight: usize,
    },
}

impl fmt::Debug for ProbeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequential => write!(f, "Sequential"),
            Self::Parallel { max_in_flight } => {
                write!(f, "Parallel(max_in_flight={})", max_in_flight)
            }
        }
    }
}

impl ProbeMode {
    /// Selects a mode for the given number of logical processors
    pub fn select_for_system(logical_processors: usize) -> Self {
        if logical_processors <= 1 {
            return Self::Sequential;
        }

        Self::Parallel {
            max_in_flight: logical_processors.min(DEFAULT_MAX_IN_FLIGHT),
        }
    }

    /// Number of probes that may run at once
    pub fn max_in_flight(&self) -> usize {
        match self {
            Self::Sequential => 1,
            Self::Parallel { max_in_flight } => (*max_in_flight).max(1),
        }
    }

    pub fn is_parallel(&self) -> bool {
        matches!(self, Self::Parallel { .. })
    }

    /// Returns a human-readable description of this mode
    pub fn description(&self) -> String {
        match self {
            Self::Sequential => "Sequential probing".to_string(),
            Self::Parallel { max_in_flight } => {
                format!("Parallel probing with up to {} pinned workers", max_in_flight)
            }
        }
    }
}

/// Which topology enumeration leaf to read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TopologyLeaf {
    /// Prefer leaf 0x1F when present, otherwise leaf 0xB
    #[default]
    Auto,
    /// Always read leaf 0xB
    Legacy,
}

/// Configuration for topology discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeConfig {
    /// Scheduling mode; `None` selects one from the processor count
    pub mode: Option<ProbeMode>,

    /// Topology leaf selection
    pub topology_leaf: TopologyLeaf,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            mode: None,
            topology_leaf: TopologyLeaf::Auto,
        }
    }
}

impl ProbeConfig {
    pub fn with_mode(mut self, mode: ProbeMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_topology_leaf(mut self, topology_leaf: TopologyLeaf) -> Self {
        self.topology_leaf = topology_leaf;
        self
    }

    /// The mode used for `logical_processors` processors
    pub fn mode_for(&self, logical_processors: usize) -> ProbeMode {
        self.mode
            .unwrap_or_else(|| ProbeMode::select_for_system(logical_processors))
    }
}
