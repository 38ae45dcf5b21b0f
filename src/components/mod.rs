//! Components - pure grading helpers
//!
//! Neither module starts a program: `assembler` builds the source that is
//! run and `checksource` decides whether it is run at all.

pub mod assembler;
pub mod checksource;

pub use assembler::{assemble, RunMode};
pub use checksource::{check, CheckOutcome};
