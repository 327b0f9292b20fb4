pub mod dedup;
pub mod dst;
pub mod parse;

pub use dedup::Deduplicator;
pub use dst::DstWindow;
pub use parse::{parse_export, BadRowPolicy, MalformedInputError};
