//! DAP session core.
//!
//! Bridges the Debug Adapter Protocol spoken by the editor to the GDB/MI
//! engine in the `gdbmi` crate: a blocking DAP server loop over stdio,
//! request handlers issuing typed MI commands, and background pumps turning
//! asynchronous debugger records into DAP events.

pub mod error;
mod events;
pub mod handles;
pub mod protocol;
pub mod server;
pub mod session;
pub mod trace;

pub use error::SessionError;
pub use server::start;
