//! Launching additional Grid Engine workers
pub mod handler;
pub mod orchestrator;

pub use handler::ScaleUpHandler;
pub use orchestrator::{total_integral_demand, ScaleUpOrchestrator};
