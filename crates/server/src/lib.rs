pub mod config;
pub mod events;
pub mod input;
pub mod replication;
pub mod server;

pub use config::ServerConfig;
pub use events::{DisconnectReason, ServerEvent};
pub use server::GameServer;
