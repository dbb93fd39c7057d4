use bitflags::bitflags;
use std::fmt;

/// Rounding mode control field of [`Fpcr`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RoundingMode {
    /// Round to nearest, ties to even.
    #[default]
    Nearest = 0,
    /// Round towards plus infinity.
    PlusInfinity = 1,
    /// Round towards minus infinity.
    MinusInfinity = 2,
    /// Round towards zero.
    Zero = 3,
}

impl RoundingMode {
    fn from_field(bits: u32) -> Self {
        match bits & 0b11 {
            0 => RoundingMode::Nearest,
            1 => RoundingMode::PlusInfinity,
            2 => RoundingMode::MinusInfinity,
            _ => RoundingMode::Zero,
        }
    }
}

/// Floating-point control register.
///
/// Carried opaquely between the backends; only the fields the comparison
/// policies care about get named accessors.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct Fpcr(u32);

impl Fpcr {
    const RMODE_SHIFT: u32 = 22;
    /// Flush-to-zero mode control bit.
    pub const FZ: u32 = 1 << 24;
    /// Default NaN mode control bit.
    pub const DN: u32 = 1 << 25;
    /// Alternative half-precision control bit.
    pub const AHP: u32 = 1 << 26;

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn rounding_mode(self) -> RoundingMode {
        RoundingMode::from_field(self.0 >> Self::RMODE_SHIFT)
    }

    pub fn with_rounding_mode(self, mode: RoundingMode) -> Self {
        Self((self.0 & !(0b11 << Self::RMODE_SHIFT)) | ((mode as u32) << Self::RMODE_SHIFT))
    }

    pub fn flush_to_zero(self) -> bool {
        self.0 & Self::FZ != 0
    }

    pub fn default_nan(self) -> bool {
        self.0 & Self::DN != 0
    }

    pub fn alt_half_precision(self) -> bool {
        self.0 & Self::AHP != 0
    }
}

impl fmt::Debug for Fpcr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fpcr({:#010x})", self.0)
    }
}

bitflags! {
    /// Floating-point status register: cumulative exception bits plus the
    /// cumulative saturation bit.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct Fpsr: u32 {
        /// Invalid operation.
        const IOC = 1 << 0;
        /// Divide by zero.
        const DZC = 1 << 1;
        /// Overflow.
        const OFC = 1 << 2;
        /// Underflow.
        const UFC = 1 << 3;
        /// Inexact.
        const IXC = 1 << 4;
        /// Input denormal.
        const IDC = 1 << 7;
        /// Cumulative saturation.
        const QC = 1 << 27;
    }
}
