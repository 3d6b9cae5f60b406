//! Axle Core - Types, causality primitives, and error handling

pub mod causality;
pub mod error;
pub mod event;
pub mod hook;
pub mod plan;
pub mod types;

pub use error::{KernelError, Result};
pub use event::Payload;
pub use hook::*;
pub use plan::{ModuleEntry, MountPlan};
pub use types::*;
