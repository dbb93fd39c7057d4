//! Backend interfaces consumed by the lockstep harness.
//!
//! The harness drives two independently-implemented emulators through these
//! traits: the translator under test executes a whole block until it reaches
//! the injected return instruction ([`TranslatorBackend::execute`]), while
//! the reference emulator is stepped for an exact instruction count
//! ([`ReferenceBackend::run_for_count`]). Everything else — register files,
//! flags, floating-point control/status, guest memory — is the shared
//! [`CpuBackend`] surface, so the comparator is written once against it.
//!
//! Implementations own their state; the harness never assumes anything about
//! residual register or memory content beyond what it wrote itself.

#![forbid(unsafe_code)]

use bitflags::bitflags;
use tandem_arch::{Fpcr, Fpsr, PStateFlag, V128};
use thiserror::Error;

bitflags! {
    /// Guest mapping permissions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MemoryPermission: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC = 1 << 2;
    }
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("mapping {size:#x} bytes at {addr:#x} failed: {reason}")]
    Map { addr: u64, size: u64, reason: String },

    #[error("access to unmapped guest address {addr:#x}")]
    Unmapped { addr: u64 },

    #[error("guest access at {addr:#x} violates mapping permissions (needs {needs:?})")]
    Protection { addr: u64, needs: MemoryPermission },

    #[error("register {name} is not available on this backend")]
    UnsupportedRegister { name: String },

    #[error("execution fault at {pc:#x}: {reason}")]
    Execution { pc: u64, reason: String },
}

/// Register-file and guest-memory accessors common to both backends.
///
/// Register indices follow the architectural numbering of the active
/// variant; `sp` is always separate from the general file (an A32 backend
/// is expected to alias it to r13).
pub trait CpuBackend {
    fn gpr(&self, index: usize) -> u64;
    fn set_gpr(&mut self, index: usize, value: u64);

    fn sp(&self) -> u64;
    fn set_sp(&mut self, value: u64);

    fn pc(&self) -> u64;
    fn set_pc(&mut self, value: u64);

    fn vreg(&self, index: usize) -> V128;
    fn set_vreg(&mut self, index: usize, value: V128);

    fn flag(&self, flag: PStateFlag) -> bool;
    fn set_flag(&mut self, flag: PStateFlag, value: bool);

    fn fpcr(&self) -> Fpcr;
    fn set_fpcr(&mut self, fpcr: Fpcr);

    fn fpsr(&self) -> Fpsr;
    fn set_fpsr(&mut self, fpsr: Fpsr);

    /// Map a zero-initialized guest region. Regions never overlap; the
    /// harness tears the whole address space down between programs.
    fn map(&mut self, addr: u64, size: u64, perm: MemoryPermission) -> Result<(), BackendError>;

    /// Release every mapping. Must be idempotent and must tolerate a
    /// partially-completed setup.
    fn unmap_all(&mut self);

    /// Host-side write into a mapped region, used to emit code and seed
    /// working memory. Not subject to guest mapping permissions — guest
    /// stores executed by the backend are.
    fn write_memory(&mut self, addr: u64, bytes: &[u8]) -> Result<(), BackendError>;

    /// Host-side read back of a mapped region.
    fn read_memory(&self, addr: u64, len: usize) -> Result<Vec<u8>, BackendError>;
}

/// The device under test: a dynamic binary translator executing a whole
/// block from an entry address until its own control flow returns.
pub trait TranslatorBackend: CpuBackend {
    fn execute(&mut self, entry: u64) -> Result<(), BackendError>;
}

/// The golden model: a reference emulator stepped for an exact number of
/// instructions from its current program counter.
pub trait ReferenceBackend: CpuBackend {
    fn run_for_count(&mut self, count: u64) -> Result<(), BackendError>;
}
