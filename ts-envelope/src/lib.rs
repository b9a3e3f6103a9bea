//! Decoder for the proprietary recording envelope written by networked
//! video recorders: a fixed header, a run of length-prefixed metadata
//! chunks (plaintext or encrypted), then the MPEG transport stream XORed
//! with a per-recording keystream.
//!
//! The decoder is streaming: it consumes any [`std::io::Read`] and writes
//! decrypted bytes in arrival order, so it can sit on the read end of a
//! live download pipe as easily as on a file.

mod cipher;
mod decoder;
mod error;
mod header;
mod keys;
mod reader;
mod turing;

pub use cipher::CipherStream;
pub use decoder::{DecodeSummary, EnvelopeDecoder};
pub use error::Error;
pub use header::{CHUNK_HEADER_LEN, Chunk, ChunkKind, EnvelopeHeader, HEADER_LEN, MAGIC};
pub use keys::KeySchedule;
pub use reader::Reader;

/// A `Result` alias where the `Err` case is `ts_envelope::Error`.
pub type Result<T> = std::result::Result<T, Error>;
