pub mod decision;
pub mod engine;
pub mod router;
pub mod stop;
pub mod tracker;

pub use decision::Decision;
pub use engine::DispatchEngine;
pub use router::{NoOpRouter, RouterSuggester};
pub use stop::StopManager;
pub use tracker::ResponseTracker;
