pub mod error;
pub mod memory;
pub mod presence;
pub mod store;
pub mod typing;

pub use error::StoreError;
pub use memory::MemoryDocumentStore;
pub use presence::{PresenceEntry, PresenceRegistry, PRESENCE_TTL};
pub use store::{DocumentStore, WriteOutcome};
pub use typing::{TypingLock, TypingRegistry, TYPING_TTL};
