pub mod config;
pub mod message;
pub mod messaging;
pub mod shutdown;
pub mod stats;
