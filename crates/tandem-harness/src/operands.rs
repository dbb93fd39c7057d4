//! Random floating-point operand bit patterns for edge-case suites.
//!
//! Rejection-samples raw encodings so callers get uniformly distributed
//! operands within a class: `normal_*` excludes zeros, subnormals,
//! infinities and NaNs by requiring a mixed exponent; `subnormal_*` keeps
//! the sign, forces a zero exponent and requires a nonzero mantissa.

use rand::Rng;

pub fn normal_f16<R: Rng + ?Sized>(rng: &mut R) -> u16 {
    loop {
        let bits: u16 = rng.gen();
        let exponent = bits & 0x7C00;
        if exponent != 0 && exponent != 0x7C00 {
            return bits;
        }
    }
}

pub fn subnormal_f16<R: Rng + ?Sized>(rng: &mut R) -> u16 {
    loop {
        let bits: u16 = rng.gen();
        if bits & 0x03FF != 0 {
            return bits & 0x83FF;
        }
    }
}

pub fn normal_f32<R: Rng + ?Sized>(rng: &mut R) -> u32 {
    loop {
        let bits: u32 = rng.gen();
        let exponent = bits & 0x7F80_0000;
        if exponent != 0 && exponent != 0x7F80_0000 {
            return bits;
        }
    }
}

pub fn subnormal_f32<R: Rng + ?Sized>(rng: &mut R) -> u32 {
    loop {
        let bits: u32 = rng.gen();
        if bits & 0x007F_FFFF != 0 {
            return bits & 0x807F_FFFF;
        }
    }
}

pub fn normal_f64<R: Rng + ?Sized>(rng: &mut R) -> u64 {
    loop {
        let bits: u64 = rng.gen();
        let exponent = bits & 0x7FF0_0000_0000_0000;
        if exponent != 0 && exponent != 0x7FF0_0000_0000_0000 {
            return bits;
        }
    }
}

pub fn subnormal_f64<R: Rng + ?Sized>(rng: &mut R) -> u64 {
    loop {
        let bits: u64 = rng.gen();
        if bits & 0x000F_FFFF_FFFF_FFFF != 0 {
            return bits & 0x800F_FFFF_FFFF_FFFF;
        }
    }
}
