//! Decoding of vendor, brand, signature and feature leaves
//!
//! Everything here is a pure function of a captured [`LeafTable`]. A leaf the
//! processor does not implement decodes as absent: zero for fields, false for
//! features.

use std::fmt;

use super::leaf::{Register, RegisterLeaf};
use super::leaf_table::LeafTable;

/// Leaf 0 (B, D, C) registers of GenuineIntel
pub const INTEL_SIGNATURE: [u32; 3] = [0x756e6547, 0x49656e69, 0x6c65746e];

/// Leaf 0 (B, D, C) registers of AuthenticAMD
pub const AMD_SIGNATURE: [u32; 3] = [0x68747541, 0x69746e65, 0x444d4163];

/// 12-byte vendor identification string.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct VendorId([u8; 12]);

impl VendorId {
    /// Build the vendor ID from leaf 0 registers in (B, D, C) order
    pub fn from_registers(registers: [u32; 3]) -> Self {
        let mut bytes = [0u8; 12];
        for (chunk, register) in bytes.chunks_exact_mut(4).zip(registers) {
            chunk.copy_from_slice(&register.to_le_bytes());
        }
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }

    /// The vendor string, if it is valid UTF-8
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    /// Check that every byte is printable ASCII
    pub fn is_printable(&self) -> bool {
        self.0.iter().all(|b| b.is_ascii_graphic() || *b == b' ')
    }
}

impl fmt::Display for VendorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for VendorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VendorId({:?})", String::from_utf8_lossy(&self.0))
    }
}

/// Processor vendor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vendor {
    Intel,
    Amd,
    /// Any other vendor, e.g. a hypervisor or a less common manufacturer
    Other(VendorId),
}

/// Named instruction-set features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    Sse3,
    Pclmulqdq,
    Ssse3,
    Sse41,
    Sse42,
    Avx,
    Mmx,
    Sse,
    Sse2,
    /// Multi-threading: leaf 1 B bits 16-23 are valid
    Htt,
    Avx2,
    Sha,
    Prefetchwt1,
    /// More than one core type in the package
    Hybrid,
}

impl Feature {
    /// Every feature this crate knows how to decode
    pub const ALL: [Feature; 14] = [
        Feature::Sse3,
        Feature::Pclmulqdq,
        Feature::Ssse3,
        Feature::Sse41,
        Feature::Sse42,
        Feature::Avx,
        Feature::Mmx,
        Feature::Sse,
        Feature::Sse2,
        Feature::Htt,
        Feature::Avx2,
        Feature::Sha,
        Feature::Prefetchwt1,
        Feature::Hybrid,
    ];

    /// The (leaf, register, bit) this feature is reported in
    pub const fn location(self) -> (u32, Register, u32) {
        match self {
            Feature::Sse3 => (1, Register::Ecx, 0),
            Feature::Pclmulqdq => (1, Register::Ecx, 1),
            Feature::Ssse3 => (1, Register::Ecx, 9),
            Feature::Sse41 => (1, Register::Ecx, 19),
            Feature::Sse42 => (1, Register::Ecx, 20),
            Feature::Avx => (1, Register::Ecx, 28),
            Feature::Mmx => (1, Register::Edx, 23),
            Feature::Sse => (1, Register::Edx, 25),
            Feature::Sse2 => (1, Register::Edx, 26),
            Feature::Htt => (1, Register::Edx, 28),
            Feature::Avx2 => (7, Register::Ebx, 5),
            Feature::Sha => (7, Register::Ebx, 29),
            Feature::Prefetchwt1 => (7, Register::Ecx, 0),
            Feature::Hybrid => (7, Register::Edx, 15),
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Feature::Sse3 => "sse3",
            Feature::Pclmulqdq => "pclmulqdq",
            Feature::Ssse3 => "ssse3",
            Feature::Sse41 => "sse4.1",
            Feature::Sse42 => "sse4.2",
            Feature::Avx => "avx",
            Feature::Mmx => "mmx",
            Feature::Sse => "sse",
            Feature::Sse2 => "sse2",
            Feature::Htt => "htt",
            Feature::Avx2 => "avx2",
            Feature::Sha => "sha",
            Feature::Prefetchwt1 => "prefetchwt1",
            Feature::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Decoded view over a [`LeafTable`].
#[derive(Debug, Clone, Copy)]
pub struct Capabilities<'a> {
    leaves: &'a LeafTable,
}

impl<'a> Capabilities<'a> {
    pub fn new(leaves: &'a LeafTable) -> Self {
        Self { leaves }
    }

    fn leaf1(&self) -> RegisterLeaf {
        self.leaves.leaf(1).copied().unwrap_or_default()
    }

    /// Vendor identification string from leaf 0
    pub fn vendor_id(&self) -> VendorId {
        VendorId::from_registers(self.leaves.vendor_registers())
    }

    pub fn vendor(&self) -> Vendor {
        match self.leaves.vendor_registers() {
            INTEL_SIGNATURE => Vendor::Intel,
            AMD_SIGNATURE => Vendor::Amd,
            other => Vendor::Other(VendorId::from_registers(other)),
        }
    }

    pub fn is_intel(&self) -> bool {
        self.leaves.vendor_registers() == INTEL_SIGNATURE
    }

    pub fn is_amd(&self) -> bool {
        self.leaves.vendor_registers() == AMD_SIGNATURE
    }

    /// Raw 48-byte brand buffer; all zero when the processor has no brand leaves
    pub fn brand_id(&self) -> [u8; 48] {
        let mut bytes = [0u8; 48];
        for (chunk, register) in bytes.chunks_exact_mut(4).zip(self.leaves.brand_registers()) {
            chunk.copy_from_slice(&register.to_le_bytes());
        }
        bytes
    }

    /// Brand string with padding removed, or `None` if absent
    pub fn brand_string(&self) -> Option<String> {
        let bytes = self.brand_id();
        let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
        let brand = String::from_utf8_lossy(&bytes[..end]).trim().to_string();
        (!brand.is_empty()).then_some(brand)
    }

    /// Family ID, leaf 1 A bits 8-11
    pub fn family(&self) -> u32 {
        (self.leaf1().eax >> 8) & 0xF
    }

    /// Model, leaf 1 A bits 4-7
    pub fn model(&self) -> u32 {
        (self.leaf1().eax >> 4) & 0xF
    }

    /// Stepping ID, leaf 1 A bits 0-3
    pub fn stepping(&self) -> u32 {
        self.leaf1().eax & 0xF
    }

    /// Extended family ID, leaf 1 A bits 20-27
    pub fn extended_family(&self) -> u32 {
        (self.leaf1().eax >> 20) & 0xFF
    }

    /// Extended model ID, leaf 1 A bits 16-19
    pub fn extended_model(&self) -> u32 {
        (self.leaf1().eax >> 16) & 0xF
    }

    /// Processor type, leaf 1 A bits 12-13
    pub fn processor_type(&self) -> u32 {
        (self.leaf1().eax >> 12) & 0x3
    }

    /// Family as software should display it
    pub fn display_family(&self) -> u32 {
        match self.family() {
            0xF => 0xF + self.extended_family(),
            family => family,
        }
    }

    /// Model as software should display it
    pub fn display_model(&self) -> u32 {
        match self.family() {
            0x6 | 0xF => (self.extended_model() << 4) | self.model(),
            _ => self.model(),
        }
    }

    /// Maximum addressable logical processor IDs per package, leaf 1 B bits 16-23
    pub fn max_logical_processor_ids(&self) -> u32 {
        (self.leaf1().ebx >> 16) & 0xFF
    }

    /// Initial APIC ID of the capturing processor, leaf 1 B bits 24-31
    pub fn initial_apic_id(&self) -> u32 {
        self.leaf1().ebx >> 24
    }

    /// Cores per package from the deterministic cache leaf (Intel only)
    pub fn cores_per_package(&self) -> Option<u32> {
        if !self.is_intel() {
            return None;
        }
        let leaf4 = self.leaves.leaf(4)?;
        Some((leaf4.eax >> 26) + 1)
    }

    /// Check whether a feature is reported
    pub fn has(&self, feature: Feature) -> bool {
        let (leaf, register, bit) = feature.location();
        self.leaves
            .leaf(leaf)
            .is_some_and(|regs| regs.bit(register, bit))
    }

    /// Iterate over every reported feature
    pub fn features(&self) -> impl Iterator<Item = Feature> + 'a {
        let this = *self;
        Feature::ALL.into_iter().filter(move |f| this.has(*f))
    }

    pub fn has_sse3(&self) -> bool {
        self.has(Feature::Sse3)
    }

    pub fn has_pclmulqdq(&self) -> bool {
        self.has(Feature::Pclmulqdq)
    }

    pub fn has_ssse3(&self) -> bool {
        self.has(Feature::Ssse3)
    }

    pub fn has_sse41(&self) -> bool {
        self.has(Feature::Sse41)
    }

    pub fn has_sse42(&self) -> bool {
        self.has(Feature::Sse42)
    }

    pub fn has_avx(&self) -> bool {
        self.has(Feature::Avx)
    }

    pub fn has_mmx(&self) -> bool {
        self.has(Feature::Mmx)
    }

    pub fn has_sse(&self) -> bool {
        self.has(Feature::Sse)
    }

    pub fn has_sse2(&self) -> bool {
        self.has(Feature::Sse2)
    }

    pub fn has_htt(&self) -> bool {
        self.has(Feature::Htt)
    }

    pub fn has_avx2(&self) -> bool {
        self.has(Feature::Avx2)
    }

    pub fn has_sha(&self) -> bool {
        self.has(Feature::Sha)
    }

    pub fn has_prefetchwt1(&self) -> bool {
        self.has(Feature::Prefetchwt1)
    }

    pub fn has_hybrid(&self) -> bool {
        self.has(Feature::Hybrid)
    }
}
