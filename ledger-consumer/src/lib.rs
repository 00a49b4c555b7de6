pub mod clock;
pub mod config;
pub mod dead_letter;
pub mod error;
pub mod ingest;
pub mod kafka;
pub mod source;

#[cfg(test)]
mod test_utils;
