//! Password-based file protection: the cipher engine, the protected-path
//! catalog, command routing, and the local service protocol.
//!
//! - [`engine`] transforms files and directory trees in place.
//! - [`catalog`] holds the protected paths and persists them through [`persist`].
//! - [`router`] turns command tokens into engine and catalog operations.
//! - [`ipc`], [`ipc_client`] and [`supervisor`] carry commands between the
//!   `warden` client and `warden-service`.

pub mod catalog;
pub mod command;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod ipc_client;
pub mod paths;
pub mod persist;
pub mod router;
pub mod settings;
pub mod shutdown;
pub mod supervisor;

pub use error::{ErrorKind, Result, WardenError};
