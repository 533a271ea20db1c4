mod conversation;

pub use conversation::{ConversationMemory, MemoryConfig};
