//! AN3155 protocol building blocks.

pub mod framing;
pub mod response;

// Re-export common types
pub use framing::{ACK, Command, MAX_BLOCK, NACK, SYNC, checksum};
pub use response::ResponseScanner;
