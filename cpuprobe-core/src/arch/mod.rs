//! Processor identification and topology discovery
//!
//! This module is responsible for:
//! - Capturing and decoding the identification leaves
//! - Running work pinned to individual logical processors
//! - Probing each logical processor for its topology identifiers

pub mod affinity;
pub mod capability;
pub mod leaf;
pub mod leaf_table;
pub mod probe_mode;
pub mod processor;
pub mod topology;

#[cfg(test)]
pub(crate) mod sim;

pub use affinity::{AffinityRunner, PinnedThreadRunner};
pub use capability::{Capabilities, Feature, Vendor, VendorId};
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub use leaf::NativeLeafReader;
pub use leaf::{LeafReader, Register, RegisterLeaf};
pub use leaf_table::LeafTable;
pub use probe_mode::{ProbeConfig, ProbeMode, TopologyLeaf};
pub use processor::Processor;
pub use topology::{CoreType, LevelType, LogicalCoreRecord, TopologyProber, TopologyTable};

use crate::error::ProcessorError;

/// Detect identification data and topology of the current host
pub fn detect_processor() -> Result<Processor, ProcessorError> {
    Processor::detect()
}

/// Select the probe mode for the given number of logical processors
pub fn select_probe_mode(logical_processors: usize) -> ProbeMode {
    ProbeMode::select_for_system(logical_processors)
}
