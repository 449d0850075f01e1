//! From stored parameter values to a command line
//!
//! Everything in here is pure: no database, no filesystem access.

pub mod command;
pub mod values;

pub use command::{build_command, job_parser, render_command};
pub use values::{coerce_value, rebase_output_value, subprocess_arg, SubprocessArg};
