#![allow(clippy::result_large_err)]

pub mod admission;
pub mod consolidate;
pub mod context;
pub mod digest;
pub(crate) mod download;
pub mod errors;
pub mod fetch;
pub mod manifest;
pub mod operation;
pub mod remove;
pub mod resolve;
pub mod stage;
pub mod subscribe;
pub mod telemetry;
pub mod tracking;
pub(crate) mod unpack;
pub(crate) mod utils;

pub use crate::context::Context;
pub use crate::errors::{ClearupError, ExitStatus};

#[cfg(test)]
pub(crate) mod test;
