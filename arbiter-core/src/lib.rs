//! ARBITER Core - Entity Types
//!
//! Data model, status state machine, errors and configuration shared by
//! every other crate. Storage, judging and orchestration live elsewhere.

mod config;
mod delivery;
mod entities;
mod enums;
mod error;
mod identity;

pub use config::*;
pub use delivery::Delivery;
pub use entities::*;
pub use enums::*;
pub use error::*;
pub use identity::*;
