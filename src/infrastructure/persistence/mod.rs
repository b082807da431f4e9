mod jsonl;

pub use jsonl::{JsonlLog, LogRecord};
