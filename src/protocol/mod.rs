mod command;
mod controller;
mod response;
mod state;


pub use command::Command;
pub use controller::{ProtocolController, RigControl, RigSnapshot, RunParameters};
pub use response::Response;
pub use state::ProtocolState;
