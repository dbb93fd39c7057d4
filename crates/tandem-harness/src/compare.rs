use crate::policy::{ComparePolicy, FpSkips, FpTolerance, SkipReason};
use crate::ulp;
use tandem_arch::{Fpcr, Fpsr, IsaProfile, PStateFlag, V128};
use tandem_backend::CpuBackend;

/// Index of the primary result register: skip conditions and numeric
/// tolerance only ever look at v0.
const PRIMARY_RESULT: usize = 0;

/// Outcome of one `compare` invocation.
///
/// Inconclusive is deliberately distinct from both pass and fail so that
/// suite-level reporting never conflates known-ambiguous semantics with a
/// translator bug.
#[derive(Debug)]
pub enum ComparisonResult {
    Pass,
    Inconclusive(SkipReason),
    Fail(Divergence),
}

impl ComparisonResult {
    pub fn is_pass(&self) -> bool {
        matches!(self, ComparisonResult::Pass)
    }

    pub fn is_inconclusive(&self) -> bool {
        matches!(self, ComparisonResult::Inconclusive(_))
    }

    pub fn is_fail(&self) -> bool {
        matches!(self, ComparisonResult::Fail(_))
    }
}

/// Every individual mismatch found by one comparison, with the values read
/// from both backends.
#[derive(Debug)]
pub struct Divergence {
    pub(crate) profile: IsaProfile,
    pub mismatches: Vec<Mismatch>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaneWidth {
    Single,
    Double,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mismatch {
    Gpr {
        index: usize,
        translator: u64,
        reference: u64,
    },
    Sp {
        translator: u64,
        reference: u64,
    },
    Vreg {
        index: usize,
        translator: V128,
        reference: V128,
    },
    /// A lane of the primary result register outside the declared ULP
    /// tolerance. `ulp` is `None` when either value was zero/inf/NaN and
    /// the magnitude-preserving distance is undefined.
    VregLane {
        lane: usize,
        width: LaneWidth,
        translator: u64,
        reference: u64,
        ulp: Option<u64>,
    },
    Flag {
        flag: PStateFlag,
        translator: bool,
        reference: bool,
    },
    Fpcr {
        translator: Fpcr,
        reference: Fpcr,
    },
    Fpsr {
        translator: Fpsr,
        reference: Fpsr,
        mask: Fpsr,
    },
    Memory {
        offset: u64,
        addr: u64,
        translator: u8,
        reference: u8,
    },
}

/// Data-segment contents read back from both backends.
pub(crate) struct MemorySnapshot {
    pub base: u64,
    pub translator: Vec<u8>,
    pub reference: Vec<u8>,
}

pub(crate) fn compare_backends<T, R>(
    profile: IsaProfile,
    translator: &T,
    reference: &R,
    policy: &ComparePolicy,
    memory: Option<&MemorySnapshot>,
) -> ComparisonResult
where
    T: CpuBackend + ?Sized,
    R: CpuBackend + ?Sized,
{
    // Skip conditions come first: a matched skip must short-circuit before
    // any equality is evaluated.
    if let Some(reason) = skip_reason(reference, policy.skips) {
        return ComparisonResult::Inconclusive(reason);
    }

    let mut mismatches = Vec::new();
    let mask = profile.gpr_mask();

    for index in 0..profile.gpr_count() {
        let t = translator.gpr(index) & mask;
        let r = reference.gpr(index) & mask;
        if t != r {
            mismatches.push(Mismatch::Gpr {
                index,
                translator: t,
                reference: r,
            });
        }
    }

    let t_sp = translator.sp() & mask;
    let r_sp = reference.sp() & mask;
    if t_sp != r_sp {
        mismatches.push(Mismatch::Sp {
            translator: t_sp,
            reference: r_sp,
        });
    }

    for index in 0..profile.vreg_count() {
        let t = translator.vreg(index);
        let r = reference.vreg(index);
        if t == r {
            continue;
        }
        if index == PRIMARY_RESULT {
            match policy.tolerance {
                FpTolerance::Exact => mismatches.push(Mismatch::Vreg {
                    index,
                    translator: t,
                    reference: r,
                }),
                FpTolerance::UpToOneUlpS => tolerant_lanes_f32(t, r, &mut mismatches),
                FpTolerance::UpToOneUlpD => tolerant_lanes_f64(t, r, &mut mismatches),
            }
        } else {
            mismatches.push(Mismatch::Vreg {
                index,
                translator: t,
                reference: r,
            });
        }
    }

    let t_fpcr = translator.fpcr();
    let r_fpcr = reference.fpcr();
    if t_fpcr != r_fpcr {
        mismatches.push(Mismatch::Fpcr {
            translator: t_fpcr,
            reference: r_fpcr,
        });
    }

    let t_fpsr = translator.fpsr();
    let r_fpsr = reference.fpsr();
    if (t_fpsr.bits() ^ r_fpsr.bits()) & policy.fpsr_mask.bits() != 0 {
        mismatches.push(Mismatch::Fpsr {
            translator: t_fpsr,
            reference: r_fpsr,
            mask: policy.fpsr_mask,
        });
    }

    for flag in PStateFlag::ALL {
        let t = translator.flag(flag);
        let r = reference.flag(flag);
        if t != r {
            mismatches.push(Mismatch::Flag {
                flag,
                translator: t,
                reference: r,
            });
        }
    }

    if let Some(snapshot) = memory {
        for (offset, (t, r)) in snapshot
            .translator
            .iter()
            .zip(snapshot.reference.iter())
            .enumerate()
        {
            if t != r {
                mismatches.push(Mismatch::Memory {
                    offset: offset as u64,
                    addr: snapshot.base + offset as u64,
                    translator: *t,
                    reference: *r,
                });
            }
        }
    }

    if mismatches.is_empty() {
        ComparisonResult::Pass
    } else {
        ComparisonResult::Fail(Divergence {
            profile,
            mismatches,
        })
    }
}

fn skip_reason<R: CpuBackend + ?Sized>(reference: &R, skips: FpSkips) -> Option<SkipReason> {
    if skips.contains(FpSkips::IF_NAN_S)
        && reference.vreg(PRIMARY_RESULT).f32_lane(0).is_nan()
    {
        return Some(SkipReason::NanSingle);
    }
    if skips.contains(FpSkips::IF_NAN_D)
        && reference.vreg(PRIMARY_RESULT).f64_lane(0).is_nan()
    {
        return Some(SkipReason::NanDouble);
    }
    if skips.contains(FpSkips::IF_UNDERFLOW) && reference.fpsr().contains(Fpsr::UFC) {
        return Some(SkipReason::Underflow);
    }
    if skips.contains(FpSkips::IF_OVERFLOW) && reference.fpsr().contains(Fpsr::OFC) {
        return Some(SkipReason::Overflow);
    }
    None
}

fn tolerant_lanes_f32(t: V128, r: V128, mismatches: &mut Vec<Mismatch>) {
    for lane in 0..4 {
        let tb = t.u32_lane(lane);
        let rb = r.u32_lane(lane);
        if tb == rb {
            continue;
        }
        let distance = ulp::ulp_distance_f32(tb, rb);
        match distance {
            Some(d) if d <= 1 => {
                tracing::debug!(lane, ulp = d, "single-precision lane accepted within 1 ULP");
            }
            _ => mismatches.push(Mismatch::VregLane {
                lane,
                width: LaneWidth::Single,
                translator: tb as u64,
                reference: rb as u64,
                ulp: distance,
            }),
        }
    }
}

fn tolerant_lanes_f64(t: V128, r: V128, mismatches: &mut Vec<Mismatch>) {
    for lane in 0..2 {
        let tb = t.u64_lane(lane);
        let rb = r.u64_lane(lane);
        if tb == rb {
            continue;
        }
        let distance = ulp::ulp_distance_f64(tb, rb);
        match distance {
            Some(d) if d <= 1 => {
                tracing::debug!(lane, ulp = d, "double-precision lane accepted within 1 ULP");
            }
            _ => mismatches.push(Mismatch::VregLane {
                lane,
                width: LaneWidth::Double,
                translator: tb,
                reference: rb,
                ulp: distance,
            }),
        }
    }
}
