//! The background half of warden: owns the catalog, runs commands for the
//! client over IPC, and saves everything on the way out.

pub mod handler;
pub mod runtime;

pub use runtime::{ServiceContext, ServiceExit, ServiceOptions};
