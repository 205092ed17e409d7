pub mod config;
pub mod error;
pub mod event;
pub mod identity;
pub mod telemetry;

pub use error::{EventBusError, ParleyError, Result};
pub use identity::IdentityResolver;
