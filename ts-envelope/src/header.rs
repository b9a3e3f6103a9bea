use crate::{Error, Result, reader::Reader};
use std::io::Read;

/// Tag opening every recording envelope.
pub const MAGIC: [u8; 4] = *b"TiVo";

/// Size of the fixed envelope header in bytes.
pub const HEADER_LEN: u64 = 16;

/// Size of a chunk header in bytes.
pub const CHUNK_HEADER_LEN: u32 = 12;

/// The fixed 16-byte header at the start of an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeHeader {
    /// Flag words the recorder writes but the decoder does not interpret.
    pub reserved: [u16; 3],
    /// Absolute offset of the first transport-stream byte.
    pub mpeg_offset: u32,
    /// Number of metadata chunks between this header and the stream.
    pub chunk_count: u16,
}

impl EnvelopeHeader {
    pub fn read_from<R: Read>(reader: &mut Reader<R>) -> Result<Self> {
        let mut magic = [0; 4];
        reader.fill(&mut magic, "envelope magic")?;

        if magic != MAGIC {
            return Err(Error::InvalidMagic(magic));
        }

        let reserved = [
            reader.read_u16("reserved field")?,
            reader.read_u16("reserved field")?,
            reader.read_u16("reserved field")?,
        ];

        Ok(Self {
            reserved,
            mpeg_offset: reader.read_u32("stream offset")?,
            chunk_count: reader.read_u16("chunk count")?,
        })
    }
}

/// Whether a chunk's payload is stored in the clear or encrypted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    Plaintext,
    Encrypted,
}

/// One length-prefixed metadata chunk.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: u16,
    pub kind: ChunkKind,
    /// Payload bytes, exactly as stored. Encrypted payloads are decrypted
    /// in place by the decoder once key material is available.
    pub payload: Vec<u8>,
}

impl Chunk {
    /// Reads one chunk header plus payload, consuming any trailing padding
    /// so the position afterwards is exactly `chunk_size` bytes past the
    /// chunk header start.
    pub fn read_from<R: Read>(reader: &mut Reader<R>) -> Result<Self> {
        let chunk_size = reader.read_u32("chunk size")?;
        let payload_size = reader.read_u32("chunk payload size")?;
        let id = reader.read_u16("chunk id")?;

        let kind = match reader.read_u16("chunk type")? {
            0 => ChunkKind::Plaintext,
            1 => ChunkKind::Encrypted,
            other => return Err(Error::UnknownChunkKind(other)),
        };

        if chunk_size < CHUNK_HEADER_LEN + payload_size {
            return Err(Error::ChunkOverrun {
                id,
                chunk_size,
                payload_size,
            });
        }

        let payload = reader.read_bytes(payload_size as usize, "chunk payload")?;
        let padding = chunk_size - CHUNK_HEADER_LEN - payload_size;
        reader.skip(u64::from(padding), "chunk padding")?;

        Ok(Self { id, kind, payload })
    }
}
