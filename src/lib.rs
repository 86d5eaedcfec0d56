pub mod brain;
pub mod config;
pub mod errors;
pub mod hands;
pub mod internet;
pub mod observability;
pub mod orchestrator;
pub mod safety;
pub mod soul;
pub mod store;

pub use errors::{Result, UmbrasolError};
