use crate::{
    keys::KeySchedule,
    turing::{BLOCK_LEN, Turing},
};

/// Decrypting cursor over one logical sub-stream of an envelope.
///
/// A fresh working key and IV are derived for every block index, so seeking
/// to an arbitrary block costs one derivation rather than a replay of the
/// whole keystream. Consuming N bytes always consumes exactly N bytes of
/// keystream; the buffer regenerates transparently when exhausted, stepping
/// the block index.
pub struct CipherStream {
    schedule: KeySchedule,
    stream_id: u8,
    block_id: u32,
    buf: [u8; BLOCK_LEN],
    pos: usize,
}

impl CipherStream {
    /// Creates a cursor positioned at block 0 of sub-stream 0.
    pub fn new(schedule: KeySchedule) -> Self {
        Self {
            schedule,
            stream_id: 0,
            block_id: 0,
            buf: [0; BLOCK_LEN],
            pos: BLOCK_LEN,
        }
    }

    /// Repositions the keystream at the start of `block_id` for
    /// `stream_id`, re-deriving the working key and IV on next use.
    pub fn seek(&mut self, stream_id: u8, block_id: u32) {
        self.stream_id = stream_id;
        self.block_id = block_id;
        self.pos = BLOCK_LEN;
    }

    fn refill(&mut self) {
        let (key, iv) = self.schedule.derive(self.stream_id, self.block_id);
        Turing::new(&key, &iv).generate(&mut self.buf);
        self.block_id = self.block_id.wrapping_add(1);
        self.pos = 0;
    }

    /// XORs the keystream over `data` in place. Encryption and decryption
    /// are the same operation.
    pub fn apply(&mut self, data: &mut [u8]) {
        for byte in data {
            if self.pos == BLOCK_LEN {
                self.refill();
            }

            *byte ^= self.buf[self.pos];
            self.pos += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule() -> KeySchedule {
        KeySchedule::media("1234567890", b"fixture-seed")
    }

    fn keystream(cipher: &mut CipherStream, len: usize) -> Vec<u8> {
        let mut buf = vec![0; len];
        cipher.apply(&mut buf);
        buf
    }

    #[test]
    fn apply_twice_restores_plaintext() {
        let plain = b"packets of a transport stream".to_vec();
        let mut data = plain.clone();

        let mut enc = CipherStream::new(schedule());
        enc.apply(&mut data);
        assert_ne!(data, plain);

        let mut dec = CipherStream::new(schedule());
        dec.apply(&mut data);
        assert_eq!(data, plain);
    }

    #[test]
    fn consuming_n_bytes_advances_exactly_n() {
        // decrypting in two unequal pieces must equal one straight pass
        let mut one_pass = CipherStream::new(schedule());
        let expected = keystream(&mut one_pass, 1000);

        let mut split = CipherStream::new(schedule());
        let mut head = keystream(&mut split, 337);
        head.extend(keystream(&mut split, 663));

        assert_eq!(head, expected);
    }

    #[test]
    fn buffer_regenerates_across_block_boundary() {
        let mut cipher = CipherStream::new(schedule());
        let long = keystream(&mut cipher, BLOCK_LEN * 3 + 5);

        assert_eq!(long.len(), BLOCK_LEN * 3 + 5);
        assert_ne!(long[..BLOCK_LEN], long[BLOCK_LEN..BLOCK_LEN * 2]);
    }

    #[test]
    fn seek_matches_sequential_consumption() {
        let mut sequential = CipherStream::new(schedule());
        let all = keystream(&mut sequential, BLOCK_LEN * 2 + 40);

        let mut seeked = CipherStream::new(schedule());
        seeked.seek(0, 2);
        let tail = keystream(&mut seeked, 40);

        assert_eq!(tail, all[BLOCK_LEN * 2..]);
    }

    #[test]
    fn sub_streams_do_not_share_keystream() {
        let mut a = CipherStream::new(schedule());
        let mut b = CipherStream::new(schedule());
        b.seek(1, 0);

        assert_ne!(keystream(&mut a, 64), keystream(&mut b, 64));
    }
}
