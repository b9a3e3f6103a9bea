use crate::{
    Error, Result,
    cipher::CipherStream,
    header::{Chunk, ChunkKind, EnvelopeHeader},
    keys::KeySchedule,
    reader::Reader,
};
use log::{debug, trace};
use std::io::{Read, Write};

/// Bytes pulled from the source per copy-loop iteration.
const COPY_CHUNK: usize = 64 * 1024;

/// Parsed metadata plus stream accounting for one decode run.
#[derive(Debug)]
pub struct DecodeSummary {
    pub header: EnvelopeHeader,
    /// Metadata chunks in file order, encrypted payloads decrypted.
    pub chunks: Vec<Chunk>,
    /// Transport-stream bytes written to the sink.
    pub stream_bytes: u64,
}

/// Streaming decoder for one recording envelope.
///
/// Bytes are decrypted strictly in arrival order, so the source can be the
/// read end of a live download pipe; the whole file is never held in
/// memory.
pub struct EnvelopeDecoder<'a> {
    mak: &'a str,
}

impl<'a> EnvelopeDecoder<'a> {
    /// `mak` is the account's media access key.
    pub fn new(mak: &'a str) -> Self {
        Self { mak }
    }

    /// Decodes everything from `src`, writing the decrypted transport
    /// stream to `out`. Malformed header or chunk metadata aborts the whole
    /// run; the envelope is not recoverable past a parse failure.
    pub fn decode<R: Read, W: Write>(&self, src: R, out: &mut W) -> Result<DecodeSummary> {
        let mut reader = Reader::new(src);

        let header = EnvelopeHeader::read_from(&mut reader)?;
        debug!(
            "envelope: {} chunks, stream at offset {}",
            header.chunk_count, header.mpeg_offset
        );

        let mut seed: Option<Vec<u8>> = None;
        let mut chunks = Vec::with_capacity(usize::from(header.chunk_count));

        for _ in 0..header.chunk_count {
            let mut chunk = Chunk::read_from(&mut reader)?;

            if chunk.kind == ChunkKind::Encrypted {
                let Some(seed) = &seed else {
                    return Err(Error::MissingKeySeed(chunk.id));
                };

                let mut cipher = CipherStream::new(KeySchedule::metadata(self.mak, seed));
                // each chunk decrypts on its own sub-stream, from block 0
                cipher.seek(chunk.id as u8, 0);
                cipher.apply(&mut chunk.payload);
            }

            trace!(
                "chunk {}: {:?}, {} payload bytes",
                chunk.id,
                chunk.kind,
                chunk.payload.len()
            );

            if seed.is_none() {
                seed = Some(chunk.payload.clone());
            }

            chunks.push(chunk);
        }

        // the chunk run may be padded out to the stream start; skip forward
        // exactly once
        let position = reader.position();
        let offset = u64::from(header.mpeg_offset);

        if position > offset {
            return Err(Error::OffsetBehind {
                offset: header.mpeg_offset,
                position,
            });
        }

        reader.skip(offset - position, "padding before stream start")?;

        let mut cipher = seed.map(|seed| CipherStream::new(KeySchedule::media(self.mak, &seed)));

        if cipher.is_none() {
            debug!("no key seed chunk; copying stream as-is");
        }

        let mut stream_bytes = 0;
        let mut buf = vec![0; COPY_CHUNK];

        loop {
            let n = reader.read_some(&mut buf)?;

            if n == 0 {
                break;
            }

            if let Some(cipher) = &mut cipher {
                cipher.apply(&mut buf[..n]);
            }

            out.write_all(&buf[..n])?;
            stream_bytes += n as u64;
        }

        Ok(DecodeSummary {
            header,
            chunks,
            stream_bytes,
        })
    }
}
