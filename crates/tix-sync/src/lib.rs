pub mod cache;
pub mod discovery;
pub mod field_map;
pub mod normalize;
pub mod orchestrator;
pub mod progress;
pub mod strategy;

pub use cache::*;
pub use discovery::*;
pub use field_map::*;
pub use normalize::*;
pub use orchestrator::*;
pub use progress::*;
pub use strategy::*;
