//! Per-logical-processor topology discovery
//!
//! Topology identifiers are only meaningful when read on the processor they
//! describe, so every logical processor in the affinity set gets its own
//! pinned probe. Each probe owns exactly one slot of the table while it runs.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::ops::Index;
use std::thread;

use tracing::{debug, trace, warn};

use super::affinity::AffinityRunner;
use super::capability::Capabilities;
use super::leaf::{LeafReader, RegisterLeaf};
use super::leaf_table::LeafTable;
use super::probe_mode::{ProbeConfig, ProbeMode, TopologyLeaf};
use crate::error::{ConsistencyError, ProcessorError};

/// Extended topology enumeration leaf
pub const LEGACY_TOPOLOGY_LEAF: u32 = 0xB;

/// V2 extended topology enumeration leaf
pub const V2_TOPOLOGY_LEAF: u32 = 0x1F;

/// Hybrid information leaf
pub const HYBRID_LEAF: u32 = 0x1A;

/// Identifier value marking a slot whose probe failed
pub const SENTINEL_ID: u32 = u32::MAX;

/// Upper bound on subleaves read from a topology leaf
pub const MAX_TOPOLOGY_LEVELS: u32 = 8;

const SHIFT_MASK: u32 = 0xF;

/// Level type reported in C bits 8-15 of a topology subleaf
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelType {
    /// Marks the end of the enumerated levels
    Invalid,
    Smt,
    Core,
    Module,
    Tile,
    Die,
    DieGroup,
    Unknown(u8),
}

impl LevelType {
    /// Level type of one topology subleaf
    pub fn of(level: &RegisterLeaf) -> Self {
        Self::from(((level.ecx >> 8) & 0xFF) as u8)
    }
}

impl From<u8> for LevelType {
    fn from(value: u8) -> Self {
        match value {
            0 => LevelType::Invalid,
            1 => LevelType::Smt,
            2 => LevelType::Core,
            3 => LevelType::Module,
            4 => LevelType::Tile,
            5 => LevelType::Die,
            6 => LevelType::DieGroup,
            other => LevelType::Unknown(other),
        }
    }
}

/// Core type reported by the hybrid information leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoreType {
    /// Efficiency core (0x20)
    Efficiency,
    /// Performance core (0x40)
    Performance,
    /// Any other encoding
    Reserved(u8),
}

impl From<u8> for CoreType {
    fn from(value: u8) -> Self {
        match value {
            0x20 => CoreType::Efficiency,
            0x40 => CoreType::Performance,
            other => CoreType::Reserved(other),
        }
    }
}

impl fmt::Display for CoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreType::Efficiency => write!(f, "efficiency"),
            CoreType::Performance => write!(f, "performance"),
            CoreType::Reserved(raw) => write!(f, "reserved({:#x})", raw),
        }
    }
}

/// Topology identifiers of one logical processor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogicalCoreRecord {
    /// Position in the affinity set
    pub ordinal: usize,
    /// x2APIC ID as reported to this processor
    pub x2apic_id: u32,
    /// Shared by SMT siblings of one physical core
    pub core_id: u32,
    /// Shared by every core of one physical package
    pub package_id: u32,
    /// Thread index within the core
    pub smt_id: u32,
    /// `None` on processors with a single core type
    pub core_type: Option<CoreType>,
}

impl LogicalCoreRecord {
    /// Record for a slot whose probe did not run
    pub fn failed(ordinal: usize) -> Self {
        Self {
            ordinal,
            x2apic_id: SENTINEL_ID,
            core_id: SENTINEL_ID,
            package_id: SENTINEL_ID,
            smt_id: SENTINEL_ID,
            core_type: None,
        }
    }

    /// Decode the SMT-level (subleaf 0) and core-level (subleaf 1) results of
    /// leaf 0xB read on this processor
    pub fn decode(
        ordinal: usize,
        smt_level: RegisterLeaf,
        core_level: RegisterLeaf,
        core_type: Option<CoreType>,
    ) -> Self {
        Self::from_shifts(
            ordinal,
            smt_level.edx,
            smt_level.eax & SHIFT_MASK,
            core_level.eax & SHIFT_MASK,
            core_type,
        )
    }

    /// Decode the levels of a topology leaf read on this processor, subleaf 0
    /// first.
    ///
    /// Levels are read up to the first invalid one. The SMT shift comes from
    /// the SMT level and the package shift from the last valid level, so
    /// module, tile and die levels of leaf 0x1F stay inside the package.
    pub fn decode_levels(
        ordinal: usize,
        levels: &[RegisterLeaf],
        core_type: Option<CoreType>,
    ) -> Self {
        let x2apic_id = levels.first().map_or(0, |level| level.edx);
        let mut smt_shift = 0;
        let mut package_shift = 0;

        for level in levels
            .iter()
            .take_while(|level| LevelType::of(level) != LevelType::Invalid)
        {
            let shift = level.eax & SHIFT_MASK;
            if LevelType::of(level) == LevelType::Smt {
                smt_shift = shift;
            }
            package_shift = shift;
        }

        Self::from_shifts(ordinal, x2apic_id, smt_shift, package_shift, core_type)
    }

    fn from_shifts(
        ordinal: usize,
        x2apic_id: u32,
        smt_shift: u32,
        package_shift: u32,
        core_type: Option<CoreType>,
    ) -> Self {
        Self {
            ordinal,
            x2apic_id,
            core_id: x2apic_id >> smt_shift,
            package_id: x2apic_id >> package_shift,
            smt_id: x2apic_id & ((1 << smt_shift) - 1),
            core_type,
        }
    }

    /// False for slots holding the sentinel
    pub fn is_valid(&self) -> bool {
        self.x2apic_id != SENTINEL_ID
    }
}

/// Topology records of every logical processor, in ordinal order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyTable {
    records: Vec<LogicalCoreRecord>,
}

impl TopologyTable {
    /// Table for a processor without topology enumeration
    fn single(x2apic_id: u32) -> Self {
        Self {
            records: vec![LogicalCoreRecord {
                ordinal: 0,
                x2apic_id,
                core_id: 0,
                package_id: 0,
                smt_id: 0,
                core_type: None,
            }],
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Get the record of a logical processor by ordinal
    pub fn get(&self, ordinal: usize) -> Option<&LogicalCoreRecord> {
        self.records.get(ordinal)
    }

    /// Iterate over all records in ordinal order
    pub fn iter(&self) -> std::slice::Iter<'_, LogicalCoreRecord> {
        self.records.iter()
    }

    pub fn records(&self) -> &[LogicalCoreRecord] {
        &self.records
    }

    /// Iterate over records whose probe succeeded
    pub fn valid_records(&self) -> impl Iterator<Item = &LogicalCoreRecord> {
        self.records.iter().filter(|r| r.is_valid())
    }

    /// Ordinals whose probe failed
    pub fn failed_ordinals(&self) -> Vec<usize> {
        self.records
            .iter()
            .filter(|r| !r.is_valid())
            .map(|r| r.ordinal)
            .collect()
    }

    /// Number of distinct physical cores among valid records
    pub fn core_count(&self) -> usize {
        self.valid_records()
            .map(|r| r.core_id)
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Number of distinct packages among valid records
    pub fn package_count(&self) -> usize {
        self.valid_records()
            .map(|r| r.package_id)
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Other logical processors sharing a physical core with `ordinal`
    pub fn siblings_of(&self, ordinal: usize) -> Vec<usize> {
        let Some(record) = self.get(ordinal).filter(|r| r.is_valid()) else {
            return Vec::new();
        };

        self.valid_records()
            .filter(|r| r.core_id == record.core_id && r.ordinal != ordinal)
            .map(|r| r.ordinal)
            .collect()
    }

    /// Check that no two valid records share an x2APIC ID
    pub fn validate(&self) -> Result<(), ConsistencyError> {
        let mut seen: HashMap<u32, usize> = HashMap::with_capacity(self.records.len());

        for record in self.valid_records() {
            if let Some(&first) = seen.get(&record.x2apic_id) {
                return Err(ConsistencyError::DuplicateX2apicId {
                    x2apic_id: record.x2apic_id,
                    first,
                    second: record.ordinal,
                });
            }
            seen.insert(record.x2apic_id, record.ordinal);
        }

        Ok(())
    }
}

impl Index<usize> for TopologyTable {
    type Output = LogicalCoreRecord;

    fn index(&self, ordinal: usize) -> &Self::Output {
        &self.records[ordinal]
    }
}

impl<'a> IntoIterator for &'a TopologyTable {
    type Item = &'a LogicalCoreRecord;
    type IntoIter = std::slice::Iter<'a, LogicalCoreRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// Drives one pinned probe per logical processor.
pub struct TopologyProber<'a, L, A> {
    leaves: &'a LeafTable,
    reader: &'a L,
    runner: &'a A,
    config: ProbeConfig,
}

impl<'a, L: LeafReader, A: AffinityRunner> TopologyProber<'a, L, A> {
    pub fn new(leaves: &'a LeafTable, reader: &'a L, runner: &'a A, config: ProbeConfig) -> Self {
        Self {
            leaves,
            reader,
            runner,
            config,
        }
    }

    /// The topology leaf to probe, or `None` if the processor has none
    pub fn topology_leaf(&self) -> Option<u32> {
        let enumerates = |leaf| {
            self.leaves
                .leaf(leaf)
                .is_some_and(|regs| regs.ebx & 0xFFFF != 0)
        };

        match self.config.topology_leaf {
            TopologyLeaf::Auto if enumerates(V2_TOPOLOGY_LEAF) => Some(V2_TOPOLOGY_LEAF),
            _ if enumerates(LEGACY_TOPOLOGY_LEAF) => Some(LEGACY_TOPOLOGY_LEAF),
            _ => None,
        }
    }

    /// Probe every logical processor and build the topology table.
    ///
    /// The table is not validated; see [`TopologyTable::validate`].
    pub fn probe(&self) -> Result<TopologyTable, ProcessorError> {
        let caps = Capabilities::new(self.leaves);

        let Some(topology_leaf) = self.topology_leaf() else {
            debug!("no topology enumeration leaf, assuming one logical processor");
            return Ok(TopologyTable::single(caps.initial_apic_id()));
        };

        let count = self
            .runner
            .logical_processor_count()
            .map_err(ProcessorError::ProcessorCount)?;
        if count == 0 {
            return Err(ProcessorError::NoLogicalProcessors);
        }

        let hybrid = caps.has_hybrid() && self.leaves.max_leaf() >= HYBRID_LEAF;
        let mode = self.config.mode_for(count);
        debug!(
            count,
            leaf = format_args!("{:#x}", topology_leaf),
            hybrid,
            ?mode,
            "probing logical processors"
        );

        let mut records: Vec<LogicalCoreRecord> = (0..count).map(LogicalCoreRecord::failed).collect();

        match mode {
            ProbeMode::Sequential => {
                for slot in records.iter_mut() {
                    self.probe_slot(topology_leaf, hybrid, slot);
                }
            }
            ProbeMode::Parallel { .. } => {
                for batch in records.chunks_mut(mode.max_in_flight()) {
                    thread::scope(|scope| {
                        for slot in batch {
                            scope.spawn(move || self.probe_slot(topology_leaf, hybrid, slot));
                        }
                    });
                }
            }
        }

        let table = TopologyTable { records };
        let failed = table.failed_ordinals();
        if !failed.is_empty() {
            warn!(?failed, "some logical processors could not be probed");
        }
        debug!(
            cores = table.core_count(),
            packages = table.package_count(),
            "topology probe complete"
        );

        Ok(table)
    }

    /// Probe one logical processor; on failure the slot keeps its sentinel
    fn probe_slot(&self, topology_leaf: u32, hybrid: bool, slot: &mut LogicalCoreRecord) {
        let ordinal = slot.ordinal;
        let result = self
            .runner
            .run_pinned(ordinal, || self.read_identifiers(ordinal, topology_leaf, hybrid));

        match result {
            Ok(record) => {
                trace!(
                    ordinal,
                    x2apic_id = record.x2apic_id,
                    core_id = record.core_id,
                    package_id = record.package_id,
                    "probed logical processor"
                );
                *slot = record;
            }
            Err(err) => {
                warn!(ordinal, error = %err, "failed to probe logical processor");
            }
        }
    }

    /// Runs on the pinned processor
    fn read_identifiers(&self, ordinal: usize, topology_leaf: u32, hybrid: bool) -> LogicalCoreRecord {
        let mut levels = vec![self.reader.query(topology_leaf, 0)];
        for subleaf in 1..MAX_TOPOLOGY_LEVELS {
            let level = self.reader.query(topology_leaf, subleaf);
            if LevelType::of(&level) == LevelType::Invalid {
                break;
            }
            levels.push(level);
        }

        // Core type 0 means this processor does not report one
        let core_type = hybrid
            .then(|| (self.reader.query(HYBRID_LEAF, 0).eax >> 24) as u8)
            .filter(|raw| *raw != 0)
            .map(CoreType::from);

        LogicalCoreRecord::decode_levels(ordinal, &levels, core_type)
    }
}
