pub mod config;
pub mod constants;
pub mod diff;
pub mod entity;
pub mod error;
pub mod message;
pub mod room;
pub mod snapshot;
pub mod watcher;

pub use entity::{Entity, EntityCommon, LearningMode, TeamMode};
pub use error::{ConfigError, Result};
pub use message::{Message, Thread};
pub use room::Room;
pub use snapshot::Snapshot;
