//! Loom Types - Wire-level definitions shared by both ends of the bridge
//!
//! This crate contains the pure data structures that cross the process
//! boundary: wire values with reference handles, the request/response and
//! notification messages, and the error taxonomy.

mod error;
mod protocol;
mod value;

pub use error::*;
pub use protocol::*;
pub use value::*;
