//! Command implementation modules
//!
//! Each command is implemented as a separate module.

pub mod activation;
pub mod compile;
pub mod safe_outputs;

pub use activation::run_activation_check;
pub use compile::{discover_workflows, run_compile, run_graph, run_validate, CompileParams};
pub use safe_outputs::{run_apply, run_collect, run_emit, run_serve, run_verdict, ApplyParams};
