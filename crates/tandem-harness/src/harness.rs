use crate::compare::{compare_backends, ComparisonResult, MemorySnapshot};
use crate::layout::{AddressLayout, LayoutError};
use crate::policy::ComparePolicy;
use std::fmt;
use tandem_arch::{Fpcr, Fpsr, IsaProfile, PStateFlag, V128};
use tandem_backend::{
    BackendError, CpuBackend, MemoryPermission, ReferenceBackend, TranslatorBackend,
};
use thiserror::Error;

/// Which of the two backends an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendSide {
    Translator,
    Reference,
}

impl fmt::Display for BackendSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackendSide::Translator => "translator",
            BackendSide::Reference => "reference",
        })
    }
}

#[derive(Debug, Error)]
pub enum HarnessError {
    /// Mapping or zero-initialization failed while building the address
    /// space. Fatal: the harness tears down whatever was established and
    /// the test must abort.
    #[error("{side} backend setup failed: {source}")]
    Setup {
        side: BackendSide,
        source: BackendError,
    },

    #[error("{side} backend: {source}")]
    Backend {
        side: BackendSide,
        source: BackendError,
    },

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error("code segment full: all {capacity} instruction slots are used")]
    CodeSegmentFull { capacity: u64 },

    #[error(
        "working memory write at offset {offset:#x} ({len} bytes) exceeds the data segment ({size:#x} bytes)"
    )]
    WorkingMemoryOutOfRange { offset: u64, len: usize, size: u64 },

    #[error("vector register v{index} is not part of the {profile:?} register file")]
    RegisterOutOfProfile { index: usize, profile: IsaProfile },

    #[error("the emitted program already ran; call reset() before running another")]
    AlreadyRan,
}

/// Initial architectural state for both backends.
///
/// Intentionally partial, mirroring what per-instruction test cases
/// actually vary: registers not named here keep the all-zero baseline that
/// `setup` establishes in both backends.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegisterInit {
    pub x0: u64,
    pub x1: u64,
    pub x2: u64,
    pub x3: u64,
    pub sp: u64,
    pub v0: V128,
    pub v1: V128,
    pub v2: V128,
    pub v3: V128,
    pub v4: V128,
    pub v5: V128,
    pub v14: V128,
    pub v15: V128,
    pub v30: V128,
    pub v31: V128,
    pub negative: bool,
    pub zero: bool,
    pub carry: bool,
    pub overflow: bool,
    pub fpcr: Fpcr,
    pub fpsr: Fpsr,
}

/// Drives one translator backend and one reference backend in lockstep over
/// a shared guest address layout.
///
/// A test goes through: construction (which performs setup), zero or more
/// `init_registers`/`emit`/`write_working_memory` calls, exactly one `run`,
/// one or more `compare` calls, and either drop or `reset` for a fresh,
/// independent program.
pub struct Harness<T: TranslatorBackend, R: ReferenceBackend> {
    profile: IsaProfile,
    layout: AddressLayout,
    translator: T,
    reference: R,
    cursor: u64,
    emitted: u64,
    using_memory: bool,
    ran: bool,
    mapped: bool,
}

impl<T: TranslatorBackend, R: ReferenceBackend> Harness<T, R> {
    pub fn new(
        profile: IsaProfile,
        layout: AddressLayout,
        translator: T,
        reference: R,
    ) -> Result<Self, HarnessError> {
        let mut harness = Self {
            profile,
            layout,
            translator,
            reference,
            cursor: layout.code_base(),
            emitted: 0,
            using_memory: false,
            ran: false,
            mapped: false,
        };
        harness.setup()?;
        Ok(harness)
    }

    /// Tear down and re-establish both backends from scratch. The only
    /// supported way to chain a second independent instruction sequence
    /// inside one test.
    pub fn reset(&mut self) -> Result<(), HarnessError> {
        self.teardown();
        self.setup()
    }

    /// Release both backends' guest mappings. Idempotent, and safe to call
    /// after a partially failed setup.
    pub fn teardown(&mut self) {
        if !self.mapped {
            tracing::warn!("teardown of a harness that is not fully set up");
        }
        self.translator.unmap_all();
        self.reference.unmap_all();
        self.mapped = false;
    }

    fn setup(&mut self) -> Result<(), HarnessError> {
        let code = (
            self.layout.code_base(),
            self.layout.code_size(),
            MemoryPermission::READ | MemoryPermission::EXEC,
        );
        let data = (
            self.layout.data_base(),
            self.layout.data_size(),
            MemoryPermission::READ | MemoryPermission::WRITE,
        );

        for (base, size, perm) in [code, data] {
            if let Err(source) = self.translator.map(base, size, perm) {
                self.teardown();
                return Err(HarnessError::Setup {
                    side: BackendSide::Translator,
                    source,
                });
            }
            if let Err(source) = self.reference.map(base, size, perm) {
                self.teardown();
                return Err(HarnessError::Setup {
                    side: BackendSide::Reference,
                    source,
                });
            }
        }
        self.mapped = true;

        // Both backends start from an identical all-zero architectural
        // baseline, so registers a test leaves uninitialized still have to
        // match after execution.
        for backend in [
            &mut self.translator as &mut dyn CpuBackend,
            &mut self.reference as &mut dyn CpuBackend,
        ] {
            for index in 0..self.profile.gpr_count() {
                backend.set_gpr(index, 0);
            }
            backend.set_sp(0);
            for index in 0..self.profile.vreg_count() {
                backend.set_vreg(index, V128::ZERO);
            }
            for flag in PStateFlag::ALL {
                backend.set_flag(flag, false);
            }
            backend.set_fpcr(Fpcr::default());
            backend.set_fpsr(Fpsr::default());
            backend.set_pc(self.layout.code_base());
        }

        self.cursor = self.layout.code_base();
        self.emitted = 0;
        self.using_memory = false;
        self.ran = false;
        Ok(())
    }

    /// Write the named register values into both backends. Reading any of
    /// them back from either backend afterwards yields the exact bits
    /// supplied.
    pub fn init_registers(&mut self, init: &RegisterInit) -> Result<(), HarnessError> {
        let mask = self.profile.gpr_mask();

        for (index, value) in [(0, init.x0), (1, init.x1), (2, init.x2), (3, init.x3)] {
            self.translator.set_gpr(index, value & mask);
            self.reference.set_gpr(index, value & mask);
        }
        self.translator.set_sp(init.sp & mask);
        self.reference.set_sp(init.sp & mask);

        let vregs = [
            (0, init.v0),
            (1, init.v1),
            (2, init.v2),
            (3, init.v3),
            (4, init.v4),
            (5, init.v5),
            (14, init.v14),
            (15, init.v15),
            (30, init.v30),
            (31, init.v31),
        ];
        for (index, value) in vregs {
            if !self.profile.has_vreg(index) {
                if value != V128::ZERO {
                    return Err(HarnessError::RegisterOutOfProfile {
                        index,
                        profile: self.profile,
                    });
                }
                continue;
            }
            self.translator.set_vreg(index, value);
            self.reference.set_vreg(index, value);
        }

        let flags = [
            (PStateFlag::Negative, init.negative),
            (PStateFlag::Zero, init.zero),
            (PStateFlag::Carry, init.carry),
            (PStateFlag::Overflow, init.overflow),
        ];
        for (flag, value) in flags {
            self.translator.set_flag(flag, value);
            self.reference.set_flag(flag, value);
        }

        self.translator.set_fpcr(init.fpcr);
        self.reference.set_fpcr(init.fpcr);
        self.translator.set_fpsr(init.fpsr);
        self.reference.set_fpsr(init.fpsr);
        Ok(())
    }

    /// Instruction slots available to the caller; the final slot of the
    /// code page is reserved for the return instruction `run` appends.
    pub fn code_capacity(&self) -> u64 {
        self.layout.code_size() / self.profile.insn_size() - 1
    }

    /// Append one instruction word to both backends' code segments.
    pub fn emit(&mut self, opcode: u32) -> Result<(), HarnessError> {
        if self.emitted >= self.code_capacity() {
            return Err(HarnessError::CodeSegmentFull {
                capacity: self.code_capacity(),
            });
        }
        self.write_word(self.cursor, opcode)?;
        self.cursor += self.profile.insn_size();
        self.emitted += 1;
        Ok(())
    }

    /// Number of caller-emitted instructions (the trailing return the
    /// harness appends is never counted).
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Seed the data segment of both backends and arm the memory verifier:
    /// every subsequent `compare` will also check the data segment
    /// byte-for-byte.
    pub fn write_working_memory(&mut self, offset: u64, bytes: &[u8]) -> Result<(), HarnessError> {
        let size = self.layout.data_size();
        let in_range = offset
            .checked_add(bytes.len() as u64)
            .is_some_and(|end| end <= size);
        if !in_range {
            return Err(HarnessError::WorkingMemoryOutOfRange {
                offset,
                len: bytes.len(),
                size,
            });
        }

        let addr = self.layout.data_base() + offset;
        self.translator
            .write_memory(addr, bytes)
            .map_err(|source| HarnessError::Backend {
                side: BackendSide::Translator,
                source,
            })?;
        self.reference
            .write_memory(addr, bytes)
            .map_err(|source| HarnessError::Backend {
                side: BackendSide::Reference,
                source,
            })?;
        self.using_memory = true;
        Ok(())
    }

    pub fn using_memory(&self) -> bool {
        self.using_memory
    }

    /// Run the emitted program on both backends: the translator executes
    /// the whole block from the code base until it reaches the appended
    /// return instruction; the reference then steps once per caller-emitted
    /// instruction.
    pub fn run(&mut self) -> Result<(), HarnessError> {
        self.run_inner(true)
    }

    /// Run the translator only, leaving the reference untouched. Matches
    /// cases where the caller wants the translator's behavior without a
    /// reference comparison.
    pub fn run_translator_only(&mut self) -> Result<(), HarnessError> {
        self.run_inner(false)
    }

    fn run_inner(&mut self, step_reference: bool) -> Result<(), HarnessError> {
        if self.ran {
            return Err(HarnessError::AlreadyRan);
        }
        self.ran = true;

        // The return instruction lands in the reserved slot and is excluded
        // from the reference step count: both backends advance through
        // exactly the caller-visible program.
        self.write_word(self.cursor, self.profile.ret_opcode())?;

        self.translator
            .execute(self.layout.code_base())
            .map_err(|source| HarnessError::Backend {
                side: BackendSide::Translator,
                source,
            })?;

        if step_reference {
            self.reference
                .run_for_count(self.emitted)
                .map_err(|source| HarnessError::Backend {
                    side: BackendSide::Reference,
                    source,
                })?;
        }
        Ok(())
    }

    /// Read back the full architectural state from both backends and
    /// evaluate it under the supplied policy. When working memory is armed,
    /// the data segment is verified in the same call.
    pub fn compare(&self, policy: &ComparePolicy) -> Result<ComparisonResult, HarnessError> {
        let memory = if self.using_memory {
            let size = self.layout.data_size() as usize;
            let base = self.layout.data_base();
            let translator = self
                .translator
                .read_memory(base, size)
                .map_err(|source| HarnessError::Backend {
                    side: BackendSide::Translator,
                    source,
                })?;
            let reference = self
                .reference
                .read_memory(base, size)
                .map_err(|source| HarnessError::Backend {
                    side: BackendSide::Reference,
                    source,
                })?;
            Some(MemorySnapshot {
                base,
                translator,
                reference,
            })
        } else {
            None
        };

        Ok(compare_backends(
            self.profile,
            &self.translator,
            &self.reference,
            policy,
            memory.as_ref(),
        ))
    }

    pub fn profile(&self) -> IsaProfile {
        self.profile
    }

    pub fn layout(&self) -> &AddressLayout {
        &self.layout
    }

    pub fn translator(&self) -> &T {
        &self.translator
    }

    pub fn translator_mut(&mut self) -> &mut T {
        &mut self.translator
    }

    pub fn reference(&self) -> &R {
        &self.reference
    }

    pub fn reference_mut(&mut self) -> &mut R {
        &mut self.reference
    }

    fn write_word(&mut self, addr: u64, opcode: u32) -> Result<(), HarnessError> {
        let bytes = opcode.to_le_bytes();
        self.translator
            .write_memory(addr, &bytes)
            .map_err(|source| HarnessError::Backend {
                side: BackendSide::Translator,
                source,
            })?;
        self.reference
            .write_memory(addr, &bytes)
            .map_err(|source| HarnessError::Backend {
                side: BackendSide::Reference,
                source,
            })
    }
}
