//! Simulated host for tests
//!
//! Leaf values are scripted per logical processor. The simulated runner runs
//! work on a real thread and records which processor that thread is
//! "pinned" to, so topology leaves answer differently per probe just like the
//! hardware does.

use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::affinity::AffinityRunner;
use super::leaf::{LeafReader, RegisterLeaf};
use super::leaf_table::{BRAND_FIRST_LEAF, BRAND_LAST_LEAF, EXTENDED_MAX_LEAF};
use super::topology::{HYBRID_LEAF, LEGACY_TOPOLOGY_LEAF, V2_TOPOLOGY_LEAF};
use crate::error::AffinityError;

thread_local! {
    /// Processor the current thread is pinned to; unpinned threads run on 0
    static CURRENT_PROCESSOR: Cell<usize> = const { Cell::new(0) };
}

fn current_processor() -> usize {
    CURRENT_PROCESSOR.with(Cell::get)
}

/// Bits needed to number `n` items
fn id_bits(n: u32) -> u32 {
    n.max(1).next_power_of_two().trailing_zeros()
}

#[derive(Debug, Clone)]
pub(crate) struct SimulatedHost {
    vendor: [u8; 12],
    max_leaf: u32,
    max_extended_leaf: u32,
    brand: [u8; 48],
    overrides: HashMap<(u32, u32), RegisterLeaf>,

    logical: u32,
    threads_per_core: u32,
    packages: u32,
    dies: u32,
    smt_shift: u32,
    die_shift: u32,
    core_shift: u32,
    x2apic_ids: Vec<u32>,
    shuffle_seed: Option<u64>,
    x2apic_overrides: BTreeMap<usize, u32>,
    core_types: BTreeMap<usize, u8>,

    topology_leaf: bool,
    v2_topology_leaf: bool,
    hybrid: bool,

    failing: BTreeSet<usize>,
    reported_count: Option<usize>,
    count_unavailable: bool,
    pinned_runs: Arc<AtomicUsize>,
}

impl SimulatedHost {
    fn new(vendor: [u8; 12], logical: u32, threads_per_core: u32) -> Self {
        let mut host = Self {
            vendor,
            max_leaf: 0x20,
            max_extended_leaf: 0x8000_0008,
            brand: [0; 48],
            overrides: HashMap::new(),
            logical,
            threads_per_core: threads_per_core.max(1),
            packages: 1,
            dies: 1,
            smt_shift: 0,
            die_shift: 0,
            core_shift: 0,
            x2apic_ids: Vec::new(),
            shuffle_seed: None,
            x2apic_overrides: BTreeMap::new(),
            core_types: BTreeMap::new(),
            topology_leaf: true,
            v2_topology_leaf: true,
            hybrid: false,
            failing: BTreeSet::new(),
            reported_count: None,
            count_unavailable: false,
            pinned_runs: Arc::new(AtomicUsize::new(0)),
        };
        host.relayout();
        host
    }

    /// Intel host with `logical` processors, `threads_per_core` per core
    pub fn intel(logical: u32, threads_per_core: u32) -> Self {
        Self::new(*b"GenuineIntel", logical, threads_per_core)
    }

    /// AMD host with `logical` processors, `threads_per_core` per core
    pub fn amd(logical: u32, threads_per_core: u32) -> Self {
        Self::new(*b"AuthenticAMD", logical, threads_per_core)
    }

    fn relayout(&mut self) {
        let cores = (self.logical / self.threads_per_core).max(1);
        let cores_per_package = (cores / self.packages.max(1)).max(1);
        let dies = self.dies.max(1);
        let cores_per_die = (cores_per_package / dies).max(1);
        self.smt_shift = id_bits(self.threads_per_core);
        self.die_shift = self.smt_shift + id_bits(cores_per_die);
        self.core_shift = self.die_shift + id_bits(dies);

        let mut ids: Vec<u32> = (0..self.logical)
            .map(|i| {
                let thread = i % self.threads_per_core;
                let core = i / self.threads_per_core;
                let package = core / cores_per_package;
                let core_in_package = core % cores_per_package;
                let die = core_in_package / cores_per_die;
                let core_in_die = core_in_package % cores_per_die;
                (package << self.core_shift)
                    | (die << self.die_shift)
                    | (core_in_die << self.smt_shift)
                    | thread
            })
            .collect();

        if let Some(seed) = self.shuffle_seed {
            ids.shuffle(&mut StdRng::seed_from_u64(seed));
        }
        for (&ordinal, &id) in &self.x2apic_overrides {
            ids[ordinal] = id;
        }
        self.x2apic_ids = ids;
    }

    pub fn with_packages(mut self, packages: u32) -> Self {
        self.packages = packages;
        self.relayout();
        self
    }

    /// Split every package into `dies` dies, reported as a die level by
    /// leaf 0x1F only
    pub fn with_dies(mut self, dies: u32) -> Self {
        self.dies = dies;
        self.relayout();
        self
    }

    /// Assign x2APIC IDs to ordinals in a seeded random order
    pub fn with_shuffled_ordinals(mut self, seed: u64) -> Self {
        self.shuffle_seed = Some(seed);
        self.relayout();
        self
    }

    pub fn with_x2apic_id(mut self, ordinal: usize, x2apic_id: u32) -> Self {
        self.x2apic_overrides.insert(ordinal, x2apic_id);
        self.relayout();
        self
    }

    pub fn with_core_type(mut self, ordinal: usize, core_type: u8) -> Self {
        self.core_types.insert(ordinal, core_type);
        self
    }

    pub fn with_hybrid(mut self) -> Self {
        self.hybrid = true;
        self
    }

    pub fn with_vendor(mut self, vendor: [u8; 12]) -> Self {
        self.vendor = vendor;
        self
    }

    pub fn with_max_leaf(mut self, max_leaf: u32) -> Self {
        self.max_leaf = max_leaf;
        self
    }

    pub fn with_max_extended_leaf(mut self, max_extended_leaf: u32) -> Self {
        self.max_extended_leaf = max_extended_leaf;
        self
    }

    pub fn with_brand(mut self, brand: &str) -> Self {
        self.brand = [0; 48];
        let len = brand.len().min(self.brand.len());
        self.brand[..len].copy_from_slice(&brand.as_bytes()[..len]);
        self
    }

    /// Replace subleaf 0 of `leaf` on every processor
    pub fn with_leaf(mut self, leaf: u32, value: RegisterLeaf) -> Self {
        self.overrides.insert((leaf, 0), value);
        self
    }

    /// Report no topology enumeration leaves at all
    pub fn without_topology_leaf(mut self) -> Self {
        self.topology_leaf = false;
        self
    }

    /// Report leaf 0xB but not leaf 0x1F
    pub fn without_v2_topology_leaf(mut self) -> Self {
        self.v2_topology_leaf = false;
        self
    }

    pub fn with_failing_processor(mut self, ordinal: usize) -> Self {
        self.failing.insert(ordinal);
        self
    }

    pub fn with_reported_count(mut self, count: usize) -> Self {
        self.reported_count = Some(count);
        self
    }

    pub fn with_count_unavailable(mut self) -> Self {
        self.count_unavailable = true;
        self
    }

    /// Number of pinned runs that executed work
    pub fn pinned_runs(&self) -> usize {
        self.pinned_runs.load(Ordering::SeqCst)
    }

    fn vendor_register(&self, offset: usize) -> u32 {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.vendor[offset..offset + 4]);
        u32::from_le_bytes(bytes)
    }

    fn brand_leaf(&self, leaf: u32) -> RegisterLeaf {
        let base = (leaf - BRAND_FIRST_LEAF) as usize * 16;
        let mut regs = [0u32; 4];
        for (i, reg) in regs.iter_mut().enumerate() {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(&self.brand[base + i * 4..base + i * 4 + 4]);
            *reg = u32::from_le_bytes(bytes);
        }
        RegisterLeaf::new(regs[0], regs[1], regs[2], regs[3])
    }

    /// (level type, shift, processors) of each level of a topology leaf
    fn topology_levels(&self, leaf: u32) -> Vec<(u32, u32, u32)> {
        let per_package = self.logical / self.packages.max(1);
        let mut levels = vec![(1, self.smt_shift, self.threads_per_core)];

        if leaf == V2_TOPOLOGY_LEAF && self.dies > 1 {
            levels.push((2, self.die_shift, per_package / self.dies));
            levels.push((5, self.core_shift, per_package));
        } else {
            levels.push((2, self.core_shift, per_package));
        }
        levels
    }

    fn topology_level(&self, leaf: u32, subleaf: u32, x2apic_id: u32) -> RegisterLeaf {
        match self.topology_levels(leaf).get(subleaf as usize) {
            Some(&(level_type, shift, count)) => {
                RegisterLeaf::new(shift, count, (level_type << 8) | subleaf, x2apic_id)
            }
            None => RegisterLeaf::new(0, 0, subleaf, x2apic_id),
        }
    }
}

impl LeafReader for SimulatedHost {
    fn query(&self, leaf: u32, subleaf: u32) -> RegisterLeaf {
        if let Some(value) = self.overrides.get(&(leaf, subleaf)) {
            return *value;
        }

        let cpu = current_processor();
        let x2apic_id = self.x2apic_ids.get(cpu).copied().unwrap_or(0);

        match leaf {
            0 => RegisterLeaf::new(
                self.max_leaf,
                self.vendor_register(0),
                self.vendor_register(8),
                self.vendor_register(4),
            ),
            1 => {
                let htt = if self.logical > 1 { 1 << 28 } else { 0 };
                RegisterLeaf::new(
                    0x0009_06A3,
                    ((x2apic_id & 0xFF) << 24) | (self.logical.min(0xFF) << 16) | (8 << 8),
                    1 | (1 << 9) | (1 << 19) | (1 << 20) | (1 << 28),
                    (1 << 23) | (1 << 25) | (1 << 26) | htt,
                )
            }
            7 if subleaf == 0 => {
                let hybrid = if self.hybrid { 1 << 15 } else { 0 };
                RegisterLeaf::new(0, 1 << 5, 0, hybrid)
            }
            LEGACY_TOPOLOGY_LEAF if self.topology_leaf => {
                self.topology_level(leaf, subleaf, x2apic_id)
            }
            V2_TOPOLOGY_LEAF if self.topology_leaf && self.v2_topology_leaf => {
                self.topology_level(leaf, subleaf, x2apic_id)
            }
            HYBRID_LEAF => {
                let core_type = self.core_types.get(&cpu).copied().unwrap_or(0);
                RegisterLeaf::new(u32::from(core_type) << 24, 0, 0, 0)
            }
            EXTENDED_MAX_LEAF => RegisterLeaf::new(self.max_extended_leaf, 0, 0, 0),
            BRAND_FIRST_LEAF..=BRAND_LAST_LEAF => self.brand_leaf(leaf),
            _ => RegisterLeaf::default(),
        }
    }
}

impl AffinityRunner for SimulatedHost {
    fn logical_processor_count(&self) -> Result<usize, AffinityError> {
        if self.count_unavailable {
            return Err(AffinityError::AffinityUnavailable);
        }
        Ok(self.reported_count.unwrap_or(self.x2apic_ids.len()))
    }

    fn run_pinned<F, R>(&self, index: usize, work: F) -> Result<R, AffinityError>
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        if index >= self.x2apic_ids.len() {
            return Err(AffinityError::OutOfRange {
                index,
                available: self.x2apic_ids.len(),
            });
        }
        if self.failing.contains(&index) {
            return Err(AffinityError::PinFailed { index });
        }

        self.pinned_runs.fetch_add(1, Ordering::SeqCst);
        thread::scope(|scope| {
            scope
                .spawn(move || {
                    CURRENT_PROCESSOR.with(|current| current.set(index));
                    work()
                })
                .join()
        })
        .map_err(|_| AffinityError::WorkerPanicked { index })
    }
}
