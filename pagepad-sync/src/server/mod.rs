pub mod broadcast;
pub mod coordinator;
