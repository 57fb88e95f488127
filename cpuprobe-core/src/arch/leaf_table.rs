//! Snapshot of the processor-invariant identification leaves
//!
//! Vendor, feature and brand leaves are identical on every logical processor
//! of a package family, so they are captured once from the calling thread.

use std::fmt;

use tracing::debug;

use super::leaf::{LeafReader, RegisterLeaf};
use crate::error::ConsistencyError;

/// Leaf reporting the highest extended leaf
pub const EXTENDED_MAX_LEAF: u32 = 0x8000_0000;

/// First of the three brand string leaves
pub const BRAND_FIRST_LEAF: u32 = 0x8000_0002;

/// Last of the three brand string leaves
pub const BRAND_LAST_LEAF: u32 = 0x8000_0004;

/// Highest standard leaf accepted from leaf 0
pub const MAX_STANDARD_LEAF: u32 = 0xFF;

/// Immutable snapshot of standard leaves `0..=max_leaf` plus the brand leaves.
#[derive(Clone, PartialEq, Eq)]
pub struct LeafTable {
    /// Standard leaves, indexed by leaf number
    leaves: Vec<RegisterLeaf>,
    /// Leaf 0 vendor registers in (B, D, C) order
    vendor: [u32; 3],
    /// Brand string registers, all zero when unsupported
    brand: [u32; 12],
    /// Value of leaf `0x8000_0000` register A
    max_extended_leaf: u32,
}

impl fmt::Debug for LeafTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeafTable")
            .field("max_leaf", &self.max_leaf())
            .field("max_extended_leaf", &format_args!("{:#x}", self.max_extended_leaf))
            .field("leaves", &self.leaves.len())
            .finish()
    }
}

impl LeafTable {
    /// Capture the leaf table from the processor the caller runs on.
    ///
    /// Fails if leaf 0 reports a highest leaf above [`MAX_STANDARD_LEAF`].
    pub fn capture<R: LeafReader + ?Sized>(reader: &R) -> Result<Self, ConsistencyError> {
        let leaf0 = reader.query(0, 0);
        let max_leaf = leaf0.eax;
        let vendor = [leaf0.ebx, leaf0.edx, leaf0.ecx];

        if max_leaf > MAX_STANDARD_LEAF {
            return Err(ConsistencyError::ImplausibleMaxLeaf { max_leaf });
        }

        let leaves = (0..=max_leaf).map(|leaf| reader.query(leaf, 0)).collect();

        let max_extended_leaf = reader.query(EXTENDED_MAX_LEAF, 0).eax;
        let mut brand = [0u32; 12];
        if max_extended_leaf > BRAND_LAST_LEAF {
            for (chunk, leaf) in brand.chunks_exact_mut(4).zip(BRAND_FIRST_LEAF..=BRAND_LAST_LEAF) {
                chunk.copy_from_slice(&reader.query(leaf, 0).to_array());
            }
        }

        debug!(
            max_leaf,
            max_extended_leaf = format_args!("{:#x}", max_extended_leaf),
            "captured identification leaves"
        );

        Ok(Self {
            leaves,
            vendor,
            brand,
            max_extended_leaf,
        })
    }

    /// Highest standard leaf reported by leaf 0
    pub fn max_leaf(&self) -> u32 {
        self.leaves.first().map_or(0, |leaf0| leaf0.eax)
    }

    /// Highest extended leaf reported by leaf `0x8000_0000`
    pub fn max_extended_leaf(&self) -> u32 {
        self.max_extended_leaf
    }

    /// Get a standard leaf, or `None` if the processor does not implement it
    pub fn leaf(&self, leaf: u32) -> Option<&RegisterLeaf> {
        self.leaves.get(usize::try_from(leaf).ok()?)
    }

    /// All captured standard leaves
    pub fn leaves(&self) -> &[RegisterLeaf] {
        &self.leaves
    }

    /// Number of captured standard leaves
    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Vendor registers in (B, D, C) order
    pub fn vendor_registers(&self) -> [u32; 3] {
        self.vendor
    }

    /// Brand string registers
    pub fn brand_registers(&self) -> &[u32; 12] {
        &self.brand
    }
}
