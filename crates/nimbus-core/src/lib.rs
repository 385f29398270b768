pub mod config;
pub mod ids;
pub mod types;

pub use config::EmulatorConfig;
pub use ids::{IdGenerator, ResourceKind};
pub use types::*;
