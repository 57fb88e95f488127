//! Running work on a specific logical processor
//!
//! This module handles pinning short-lived worker threads to individual
//! logical processors of the process affinity set.

use std::thread;

use core_affinity::CoreId;
use tracing::trace;

use crate::error::AffinityError;

/// Executes work on exactly one logical processor.
///
/// Logical processors are addressed by their ordinal in the process affinity
/// set, `0..logical_processor_count()`.
pub trait AffinityRunner: Sync {
    /// Number of logical processors in the process affinity set
    fn logical_processor_count(&self) -> Result<usize, AffinityError>;

    /// Run `work` while bound to logical processor `index`, blocking until it
    /// has completed.
    fn run_pinned<F, R>(&self, index: usize, work: F) -> Result<R, AffinityError>
    where
        F: FnOnce() -> R + Send,
        R: Send;
}

/// Runs work on a freshly spawned thread pinned with `core_affinity`.
#[derive(Debug, Clone)]
pub struct PinnedThreadRunner {
    /// Affinity set captured at construction, if the platform exposes one
    core_ids: Option<Vec<CoreId>>,
    /// Whether to confirm the worker's CPU after pinning
    verify_placement: bool,
}

impl Default for PinnedThreadRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl PinnedThreadRunner {
    /// Create a runner over the current process affinity set
    pub fn new() -> Self {
        let core_ids = core_affinity::get_core_ids();
        trace!(cores = ?core_ids.as_ref().map(Vec::len), "captured affinity set");
        Self {
            core_ids,
            verify_placement: true,
        }
    }

    /// Enable or disable the post-pin placement check
    pub fn with_verify_placement(mut self, verify: bool) -> Self {
        self.verify_placement = verify;
        self
    }

    /// Whether workers confirm their CPU after pinning
    pub fn verifies_placement(&self) -> bool {
        self.verify_placement
    }

    /// The captured affinity set, if available
    pub fn core_ids(&self) -> Option<&[CoreId]> {
        self.core_ids.as_deref()
    }
}

impl AffinityRunner for PinnedThreadRunner {
    fn logical_processor_count(&self) -> Result<usize, AffinityError> {
        match &self.core_ids {
            Some(core_ids) => Ok(core_ids.len()),
            // num_cpus honours the affinity mask where the platform has one
            None => Ok(num_cpus::get()),
        }
    }

    fn run_pinned<F, R>(&self, index: usize, work: F) -> Result<R, AffinityError>
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        let core_ids = self
            .core_ids
            .as_deref()
            .ok_or(AffinityError::AffinityUnavailable)?;
        let core = *core_ids.get(index).ok_or(AffinityError::OutOfRange {
            index,
            available: core_ids.len(),
        })?;
        let verify = self.verify_placement;

        thread::scope(|scope| {
            let handle = thread::Builder::new()
                .name(format!("cpuprobe-{index}"))
                .spawn_scoped(scope, move || -> Result<R, AffinityError> {
                    pin_thread_to_core(index, core, verify)?;
                    Ok(work())
                })?;

            handle
                .join()
                .map_err(|_| AffinityError::WorkerPanicked { index })?
        })
    }
}

/// Pin the current thread to `core`, optionally confirming where it runs
fn pin_thread_to_core(index: usize, core: CoreId, verify: bool) -> Result<(), AffinityError> {
    if !core_affinity::set_for_current(core) {
        return Err(AffinityError::PinFailed { index });
    }

    if verify {
        verify_placement(index, core.id)?;
    }

    trace!(index, cpu = core.id, "worker pinned");
    Ok(())
}

#[cfg(target_os = "linux")]
fn verify_placement(index: usize, expected: usize) -> Result<(), AffinityError> {
    // SAFETY: sched_getcpu has no preconditions.
    let actual = unsafe { libc::sched_getcpu() };

    // A negative value means the kernel can't tell; the mask still binds us.
    match usize::try_from(actual) {
        Ok(actual) if actual != expected => Err(AffinityError::Migrated {
            index,
            expected,
            actual,
        }),
        _ => Ok(()),
    }
}

#[cfg(not(target_os = "linux"))]
fn verify_placement(_index: usize, _expected: usize) -> Result<(), AffinityError> {
    Ok(())
}
