#![forbid(unsafe_code)]

//! # boxman
//!
//! The shared code for boxman, a front-end over the `vagrant` binary.
//! Encapsulates abstractions for things like:
//!
//! - Running the VM manager and capturing its output
//! - Fanning a job out across a fleet of named VMs and aggregating the
//!   per-host reports
//! - Shipping files to/from VMs over `scp`, with per-host connection info
//!   resolved once and cached

pub mod dispatch;
pub mod exec;
pub mod fleet;
pub mod log;
pub mod report;
pub mod transfer;
