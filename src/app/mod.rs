mod monitor;
mod operations;
mod orchestrator;
mod runtime;
mod shutdown;
mod startup;
mod types;


pub use orchestrator::BurnRig;
pub use types::ShutdownReason;
