pub mod client;
pub mod error;
pub mod options;
pub mod server;

pub use client::agent::{AgentSeed, SyncAgent};
pub use client::state::SyncState;
pub use client::transport::{EventStream, LocalTransport, SyncTransport};
pub use error::SyncError;
pub use options::SyncOptions;
pub use server::broadcast::PageBroadcast;
pub use server::coordinator::SyncCoordinator;
