use md5::Md5;
use sha1::{Digest, Sha1};

/// Fixed prefix folded into the metadata key derivation.
const METADATA_PREFIX: &[u8] = b"tivo:TiVo DVR:";

/// The 20-byte schedule seeding keystream derivation for one envelope.
///
/// Two schedules exist per recording: the media schedule decrypts the
/// transport stream, the metadata schedule decrypts encrypted chunks. Both
/// are functions of the media access key and the key-seed chunk payload.
#[derive(Clone)]
pub struct KeySchedule([u8; 20]);

impl KeySchedule {
    /// Media schedule: SHA-1 over the media access key followed by the
    /// key-seed chunk payload.
    pub fn media(mak: &str, seed: &[u8]) -> Self {
        let mut sha = Sha1::new();
        sha.update(mak.as_bytes());
        sha.update(seed);
        Self(sha.finalize().into())
    }

    /// Metadata schedule: the media access key is first folded through MD5
    /// (prefixed) and rendered as 32 lowercase hex characters; that string
    /// then stands in for the key in the media formula.
    pub fn metadata(mak: &str, seed: &[u8]) -> Self {
        let mut md5 = Md5::new();
        md5.update(METADATA_PREFIX);
        md5.update(mak.as_bytes());
        let folded = hex::encode(md5.finalize());
        Self::media(&folded, seed)
    }

    /// Derives the working key and IV for one (sub-stream, block) pair.
    ///
    /// Byte 16 of the schedule buffer carries the sub-stream id and bytes
    /// 17-19 the big-endian block index; the key hashes the first 17 bytes,
    /// the IV all 20.
    pub(crate) fn derive(&self, stream_id: u8, block_id: u32) -> ([u8; 20], [u8; 20]) {
        let mut buf = self.0;
        buf[16] = stream_id;
        buf[17] = (block_id >> 16) as u8;
        buf[18] = (block_id >> 8) as u8;
        buf[19] = block_id as u8;

        let key = Sha1::digest(&buf[..17]).into();
        let iv = Sha1::digest(buf).into();
        (key, iv)
    }
}
