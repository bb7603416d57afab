pub mod message;
pub mod models;
pub mod registry;

pub use message::{StreamEnvelope, StreamEvent};
pub use models::{Machine, MachineState};
pub use registry::MachineRegistry;
