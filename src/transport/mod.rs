//! Naval transport of land units across water

pub mod manager;
pub mod plan;
pub mod stall;

pub use manager::TransportManager;
pub use plan::{Recovered, TransportPlan, TransportState};
pub use stall::{bump_retry, ProgressWatch};
