//! cpuprobe core - processor identification and topology discovery
//!
//! This library decodes the x86 identification leaves (vendor, brand,
//! signature, features) and maps every logical processor in the process
//! affinity set to its SMT sibling group, physical core and package.

/// Identification leaves, affinity pinning and topology probing
pub mod arch;

/// Error types
pub mod error;

pub use arch::{detect_processor, Processor};
pub use error::{AffinityError, ConsistencyError, ProcessorError};
