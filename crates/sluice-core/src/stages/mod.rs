//! Built-in stages.

mod chunk_text;
mod contains;
mod copy_fields;
mod drop_record;
mod emit_nested_children;
mod rename_fields;
mod sentence;
mod timestamp;
mod word_matcher;

pub use chunk_text::{ChunkText, ChunkingMethod};
pub use contains::Contains;
pub use copy_fields::CopyFields;
pub use drop_record::DropRecord;
pub use emit_nested_children::EmitNestedChildren;
pub use rename_fields::RenameFields;
pub use sentence::SentenceDetector;
pub use timestamp::Timestamp;
pub use word_matcher::{WordMatch, WordMatcher};
