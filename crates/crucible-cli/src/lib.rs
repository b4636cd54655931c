//! Command-line front end for the crucible validation supervisor.
//!
//! The library half of the binary: argument parsing, telemetry setup,
//! the built-in [`suite::BasicSuite`] checks, and the console report
//! listener. [`run`] wires them to a
//! [`Validator`](crucible_supervisor::Validator) and drives it to
//! completion.

pub mod cli;
pub mod report;
pub mod suite;
pub mod telemetry;

pub use self::cli::run;
pub use self::suite::BasicSuite;
