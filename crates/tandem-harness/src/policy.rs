use bitflags::bitflags;
use std::fmt;
use tandem_arch::Fpsr;

bitflags! {
    /// Conditions under which a comparison is declared inconclusive instead
    /// of being evaluated. NaN conditions look at the primary result
    /// register (v0); underflow/overflow look at the reference backend's
    /// cumulative status bits.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct FpSkips: u8 {
        const IF_NAN_S = 1 << 0;
        const IF_NAN_D = 1 << 1;
        const IF_UNDERFLOW = 1 << 2;
        const IF_OVERFLOW = 1 << 3;
    }
}

/// Numeric tolerance applied to the primary result register when exact
/// equality fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FpTolerance {
    /// Bit-exact equality, no fallback.
    #[default]
    Exact,
    /// Accept up to one ULP per single-precision lane.
    UpToOneUlpS,
    /// Accept up to one ULP per double-precision lane.
    UpToOneUlpD,
}

/// Per-invocation comparison configuration. Immutable once handed to
/// `compare`; the default is the strictest form (exact equality, no skips,
/// no FPSR bits compared).
#[derive(Debug, Clone, Copy, Default)]
pub struct ComparePolicy {
    /// Only these FPSR bits participate in the status comparison.
    pub fpsr_mask: Fpsr,
    pub skips: FpSkips,
    pub tolerance: FpTolerance,
}

impl ComparePolicy {
    pub fn exact() -> Self {
        Self::default()
    }

    pub fn with_fpsr_mask(mut self, mask: Fpsr) -> Self {
        self.fpsr_mask = mask;
        self
    }

    pub fn with_skips(mut self, skips: FpSkips) -> Self {
        self.skips = skips;
        self
    }

    pub fn with_tolerance(mut self, tolerance: FpTolerance) -> Self {
        self.tolerance = tolerance;
        self
    }
}

/// Why a comparison was declared inconclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NanSingle,
    NanDouble,
    Underflow,
    Overflow,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SkipReason::NanSingle => "primary single-precision result is NaN",
            SkipReason::NanDouble => "primary double-precision result is NaN",
            SkipReason::Underflow => "reference reported underflow",
            SkipReason::Overflow => "reference reported overflow",
        };
        f.write_str(text)
    }
}
