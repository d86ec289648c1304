//! 记忆层：对话日志、分词相关度、记忆存储

pub mod conversation;
pub mod store;
pub mod tokenizer;

pub use conversation::{render_transcript, ConversationTurn, Message, Role};
pub use store::{rank_summaries, MemoryStore};
pub use tokenizer::{jaccard_similarity, tokenize, tokenize_to_set};
