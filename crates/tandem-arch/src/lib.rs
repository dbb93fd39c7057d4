//! Architectural value types shared by the lockstep harness and its backends.
//!
//! Everything here is a plain value: vector register contents ([`V128`]),
//! floating-point control/status words ([`Fpcr`], [`Fpsr`]), condition flags
//! ([`PStateFlag`]) and the per-variant capability descriptor
//! ([`IsaProfile`]). Backends store state however they like; these types only
//! define the bit-exact shapes that cross the harness boundary.

#![forbid(unsafe_code)]

mod fp;
mod profile;
mod pstate;
mod vector;

pub use fp::{Fpcr, Fpsr, RoundingMode};
pub use profile::IsaProfile;
pub use pstate::PStateFlag;
pub use vector::V128;
