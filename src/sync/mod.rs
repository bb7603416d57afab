pub mod connection;
pub mod engine;

pub use connection::{ConnectionStatus, SubscriptionTarget};
pub use engine::MachineSubscription;
