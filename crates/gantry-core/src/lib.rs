//! Gantry Core
//!
//! Domain types, ports and error handling shared by the Gantry server and
//! agents: material revisions, work envelopes, the console stream protocol,
//! health scopes and pipeline label templates.

pub mod clock;
pub mod console;
pub mod error;
pub mod health;
pub mod ids;
pub mod label;
pub mod material;
pub mod message;
pub mod ports;
pub mod topology;
pub mod work;

pub use error::{Error, Result};
pub use ids::*;
