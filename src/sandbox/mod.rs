//! Sandbox module - isolate wrapper for learner programs
//!
//! Every Python or C/C++ run, and every C/C++ build, happens inside its own
//! isolate box with resource limits. The sandbox module does NOT:
//! - Stream or interpret program output (the runtime's process driver does)
//! - Know about languages

pub mod config;
pub mod isolate_box;
pub mod meta;

pub use config::{init_config, SandboxConfig};
pub use isolate_box::{ensure_available, is_available, IsolateBox, Limits, BOX_ROOT};
pub use meta::{IsolateMeta, IsolateStatus};
