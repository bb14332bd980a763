pub mod agent;
pub mod backoff;
pub mod buffer;
pub mod roster;
pub mod state;
pub mod transport;
pub mod typing;
