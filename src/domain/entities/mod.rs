mod conversation;

pub use conversation::{
    ConversationKey, ConversationMetadata, ConversationOverview, ConversationRecord,
    ConversationSummary, Interaction, Message, MessageRole,
};
