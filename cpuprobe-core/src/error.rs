//! Error types for processor discovery.
//!
//! Unsupported leaves are never errors: they decode as absent. Affinity
//! failures are per-processor and end up as sentinel records in the
//! topology table. Only consistency violations and a total inability to
//! enumerate processors fail construction.

use std::io;

/// Failure to run work on a specific logical processor.
#[derive(Debug, thiserror::Error)]
pub enum AffinityError {
    /// The requested index is not part of the process affinity set.
    #[error("logical processor {index} is outside the affinity set ({available} available)")]
    OutOfRange {
        /// Requested ordinal.
        index: usize,
        /// Number of processors in the affinity set.
        available: usize,
    },

    /// The platform does not expose the process affinity set.
    #[error("thread affinity is not available on this platform")]
    AffinityUnavailable,

    /// The OS refused to bind the worker thread.
    #[error("failed to pin worker thread to logical processor {index}")]
    PinFailed {
        /// Requested ordinal.
        index: usize,
    },

    /// The worker ran, but not on the processor it was bound to.
    #[error("worker for logical processor {index} ran on cpu {actual}, expected cpu {expected}")]
    Migrated {
        /// Requested ordinal.
        index: usize,
        /// OS CPU number the worker was bound to.
        expected: usize,
        /// OS CPU number the worker observed.
        actual: usize,
    },

    /// The worker thread could not be created.
    #[error("failed to spawn probe thread: {0}")]
    Spawn(#[from] io::Error),

    /// The worker thread panicked before producing a result.
    #[error("probe worker for logical processor {index} panicked")]
    WorkerPanicked {
        /// Requested ordinal.
        index: usize,
    },
}

/// The probed data contradicts itself.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsistencyError {
    /// Two logical processors reported the same x2APIC ID.
    #[error("x2APIC ID {x2apic_id:#x} reported by logical processors {first} and {second}")]
    DuplicateX2apicId {
        /// The colliding identifier.
        x2apic_id: u32,
        /// Lower ordinal reporting it.
        first: usize,
        /// Higher ordinal reporting it.
        second: usize,
    },

    /// The leaf 0 vendor registers are not printable ASCII.
    #[error("vendor identification {vendor:02x?} is not printable ASCII")]
    MalformedVendor {
        /// Raw vendor bytes in (B, D, C) order.
        vendor: [u8; 12],
    },

    /// Leaf 0 reports more standard leaves than any processor implements.
    #[error("leaf 0 reports an implausible highest leaf {max_leaf:#x}")]
    ImplausibleMaxLeaf {
        /// Raw leaf 0 register A.
        max_leaf: u32,
    },
}

/// Errors that prevent a [`Processor`](crate::arch::Processor) from being built.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    /// The affinity set is empty.
    #[error("no logical processors are available to this process")]
    NoLogicalProcessors,

    /// The logical processor count could not be obtained.
    #[error("failed to determine the logical processor count: {0}")]
    ProcessorCount(#[source] AffinityError),

    /// Probed identifiers are inconsistent.
    #[error("inconsistent processor data: {0}")]
    Consistency(#[from] ConsistencyError),

    /// The identification instruction is not available on this architecture.
    #[error("processor identification is only supported on x86 and x86_64")]
    UnsupportedArchitecture,
}

impl ProcessorError {
    /// Returns true if this is a consistency violation rather than an
    /// environment failure.
    pub fn is_consistency_error(&self) -> bool {
        matches!(self, ProcessorError::Consistency(_))
    }
}
