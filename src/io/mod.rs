pub mod compression;
pub mod jsonl;
