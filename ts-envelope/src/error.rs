use thiserror::Error;

/// The error type returned by envelope decode operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Unexpected end of stream while reading {0}")]
    UnexpectedEof(&'static str),

    #[error("Invalid envelope magic {0:02x?}")]
    InvalidMagic([u8; 4]),

    #[error("Chunk {id} declares {chunk_size} total bytes, less than header plus {payload_size} payload bytes")]
    ChunkOverrun {
        id: u16,
        chunk_size: u32,
        payload_size: u32,
    },

    #[error("Unknown chunk type {0}")]
    UnknownChunkKind(u16),

    #[error("Encrypted chunk {0} appears before the key seed chunk")]
    MissingKeySeed(u16),

    #[error("Stream start offset {offset} already passed (position {position})")]
    OffsetBehind { offset: u32, position: u64 },

    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),
}
