//! Raw identification leaves
//!
//! A leaf is the four-register result of one `CPUID` query. Everything else
//! in this crate decodes these values.

/// One of the four registers returned by a leaf query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    Eax,
    Ebx,
    Ecx,
    Edx,
}

/// The result of querying one (leaf, subleaf) pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RegisterLeaf {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
}

impl RegisterLeaf {
    /// Create a leaf from its four register values
    pub const fn new(eax: u32, ebx: u32, ecx: u32, edx: u32) -> Self {
        Self { eax, ebx, ecx, edx }
    }

    /// Get a register by name
    pub fn get(&self, register: Register) -> u32 {
        match register {
            Register::Eax => self.eax,
            Register::Ebx => self.ebx,
            Register::Ecx => self.ecx,
            Register::Edx => self.edx,
        }
    }

    /// Check whether `bit` of `register` is set
    pub fn bit(&self, register: Register, bit: u32) -> bool {
        self.get(register) & (1 << bit) != 0
    }

    /// Registers in (A, B, C, D) order
    pub fn to_array(self) -> [u32; 4] {
        [self.eax, self.ebx, self.ecx, self.edx]
    }
}

/// Source of identification leaves.
///
/// Queries are issued on whichever logical processor the calling thread is
/// currently running on. Leaves beyond what the processor implements return
/// whatever the architecture defines for them; implementations never
/// synthesize errors.
pub trait LeafReader: Sync {
    fn query(&self, leaf: u32, subleaf: u32) -> RegisterLeaf;
}

impl<T: LeafReader + ?Sized> LeafReader for &T {
    fn query(&self, leaf: u32, subleaf: u32) -> RegisterLeaf {
        (**self).query(leaf, subleaf)
    }
}

/// Reads leaves with the `CPUID` instruction of the executing processor.
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeLeafReader;

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
impl LeafReader for NativeLeafReader {
    fn query(&self, leaf: u32, subleaf: u32) -> RegisterLeaf {
        #[cfg(target_arch = "x86")]
        use std::arch::x86::__cpuid_count;
        #[cfg(target_arch = "x86_64")]
        use std::arch::x86_64::__cpuid_count;

        // SAFETY: CPUID is available on every x86_64 processor and on every
        // x86 processor Rust's std targets support.
        let r = unsafe { __cpuid_count(leaf, subleaf) };
        RegisterLeaf::new(r.eax, r.ebx, r.ecx, r.edx)
    }
}
