//! # auditdb
//!
//! Operator CLI over audit databases. The binary in `main.rs` only installs
//! logging and hands the parsed arguments to [`cli::execute`].

pub mod cli;
