pub mod context;
pub mod dataset;
pub mod entities;
pub mod events;
pub mod ports;
pub mod repositories;

pub use context::*;
pub use dataset::*;
pub use entities::*;
pub use events::*;
pub use migration_core::{MigrationError, MigrationResult};
pub use ports::*;
pub use repositories::*;
