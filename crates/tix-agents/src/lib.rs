pub mod adapter;
pub mod client;
pub mod error;
pub mod runner;
pub mod types;

pub use adapter::*;
pub use client::*;
pub use error::*;
pub use runner::*;
pub use types::*;
