//! Loom Runtime - Backend side of the model bridge
//!
//! This crate contains the backend object model the bridge talks to, the
//! registry that gives exposed objects stable public names, and the
//! marshaller that turns backend values into wire values and back.

pub use loom_types;

mod marshal;
mod model;
mod observe;
mod record;
mod registry;
mod widget;

pub use marshal::*;
pub use model::*;
pub use observe::*;
pub use record::*;
pub use registry::*;
pub use widget::*;
