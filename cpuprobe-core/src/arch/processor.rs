//! The owning processor description
//!
//! A [`Processor`] is built once, explicitly. Construction captures the
//! identification leaves on the calling thread and then runs one pinned probe
//! per logical processor; nothing is mutated afterwards. Callers that want a
//! process-wide instance cache it themselves.

use std::fmt;

use tracing::debug;

use super::affinity::AffinityRunner;
use super::capability::Capabilities;
use super::leaf::LeafReader;
use super::leaf_table::LeafTable;
use super::probe_mode::ProbeConfig;
use super::topology::{TopologyProber, TopologyTable};
use crate::error::{ConsistencyError, ProcessorError};

/// Identification and topology of the host processors
#[derive(Clone)]
pub struct Processor {
    leaves: LeafTable,
    topology: TopologyTable,
}

impl fmt::Debug for Processor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let caps = self.capabilities();
        f.debug_struct("Processor")
            .field("vendor", &caps.vendor_id())
            .field("brand", &caps.brand_string())
            .field("logical_processors", &self.topology.len())
            .field("cores", &self.topology.core_count())
            .field("packages", &self.topology.package_count())
            .finish()
    }
}

impl Processor {
    /// Detect the processors of the current host with default settings
    pub fn detect() -> Result<Self, ProcessorError> {
        Self::detect_with(ProbeConfig::default())
    }

    /// Detect the processors of the current host.
    ///
    /// Probes run on a [`PinnedThreadRunner`](super::affinity::PinnedThreadRunner)
    /// that verifies placement; build one with placement checks disabled and
    /// pass it to [`Processor::with_collaborators`] to skip them.
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    pub fn detect_with(config: ProbeConfig) -> Result<Self, ProcessorError> {
        use super::affinity::PinnedThreadRunner;
        use super::leaf::NativeLeafReader;

        Self::with_collaborators(&NativeLeafReader, &PinnedThreadRunner::new(), config)
    }

    #[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
    pub fn detect_with(_config: ProbeConfig) -> Result<Self, ProcessorError> {
        Err(ProcessorError::UnsupportedArchitecture)
    }

    /// Build from explicit leaf and affinity collaborators
    pub fn with_collaborators<L, A>(
        reader: &L,
        runner: &A,
        config: ProbeConfig,
    ) -> Result<Self, ProcessorError>
    where
        L: LeafReader,
        A: AffinityRunner,
    {
        let leaves = LeafTable::capture(reader)?;

        let vendor = Capabilities::new(&leaves).vendor_id();
        if !vendor.is_printable() {
            return Err(ConsistencyError::MalformedVendor {
                vendor: *vendor.as_bytes(),
            }
            .into());
        }

        let topology = TopologyProber::new(&leaves, reader, runner, config).probe()?;
        topology.validate()?;

        debug!(
            %vendor,
            logical_processors = topology.len(),
            cores = topology.core_count(),
            packages = topology.package_count(),
            "processor detected"
        );

        Ok(Self { leaves, topology })
    }

    /// The captured identification leaves
    pub fn leaves(&self) -> &LeafTable {
        &self.leaves
    }

    /// Decoded vendor, brand, signature and features
    pub fn capabilities(&self) -> Capabilities<'_> {
        Capabilities::new(&self.leaves)
    }

    /// Per-logical-processor topology
    pub fn topology(&self) -> &TopologyTable {
        &self.topology
    }
}
