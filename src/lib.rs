//! mailq
//! ===
//!
//! Schedules the operations a mail client asks of its backend worker. See the
//! [`actions`][crate::actions] module for the scheduler itself.

#![warn(missing_docs)]

#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate log;
#[macro_use]
extern crate serde;

pub mod actions;
pub mod config;
pub mod progress;
pub mod sim;

/// Consumes any error and dumps it to the logger.
pub fn report_err(err: anyhow::Error) {
    error!("error: {:?}", err);
}
