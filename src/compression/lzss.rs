//! LZSS codec for `Cprs` payloads.
//!
//! Classic 4096-byte sliding-window variant: space-filled window, match
//! lengths 3..=18, flag byte ahead of every eight tokens (bit set = literal),
//! and a trailing little-endian u32 additive checksum of the uncompressed
//! bytes. The decoder streams into a caller buffer and never materializes
//! more than the window.

use std::io::{self, Read};

/// Sliding window size.
const WINDOW: usize = 4096;
const MASK: usize = WINDOW - 1;
/// Shortest encodable match.
const MIN_MATCH: usize = 3;
/// Longest encodable match.
const MAX_MATCH: usize = 18;
/// Window fill byte; the ring starts as all spaces.
const FILL: u8 = 0x20;
/// Decoder ring cursor starts here, mirroring the encoder's coordinates.
const START: usize = WINDOW - MAX_MATCH;

const HASH_BITS: u32 = 13;
const HASH_SIZE: usize = 1 << HASH_BITS;
const NO_POS: u32 = u32::MAX;
/// Hash-chain walk limit per position.
const MAX_CHAIN: usize = 128;

#[inline]
fn hash3(bytes: &[u8]) -> usize {
    let key = u32::from(bytes[0]) << 16 | u32::from(bytes[1]) << 8 | u32::from(bytes[2]);
    (key.wrapping_mul(2_654_435_761) >> (32 - HASH_BITS)) as usize
}

/// Compress `data` into the LZSS stream form, checksum included.
///
/// The output is deterministic for a given input. Compression never fails;
/// incompressible data simply grows by the flag-byte overhead, and the
/// caller decides whether the result is worth keeping.
#[must_use]
pub fn compress(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() / 2 + 16);
    let mut head = vec![NO_POS; HASH_SIZE];
    let mut prev = vec![NO_POS; WINDOW];

    let insert = |head: &mut Vec<u32>, prev: &mut Vec<u32>, pos: usize| {
        if pos + MIN_MATCH > data.len() {
            return;
        }
        let h = hash3(&data[pos..]);
        prev[pos & MASK] = head[h];
        head[h] = pos as u32;
    };

    let mut pos = 0usize;
    let mut flag_pos = 0usize;
    let mut token = 0u8;

    while pos < data.len() {
        if token == 0 {
            flag_pos = out.len();
            out.push(0);
        }

        let (best_pos, best_len) = find_match(data, pos, &head, &prev);
        if best_len >= MIN_MATCH {
            let window_index = (best_pos + START) & MASK;
            out.push((window_index & 0xff) as u8);
            out.push((((window_index >> 4) & 0xf0) | (best_len - MIN_MATCH)) as u8);

            for i in 0..best_len {
                insert(&mut head, &mut prev, pos + i);
            }
            pos += best_len;
        } else {
            out[flag_pos] |= 1 << token;
            out.push(data[pos]);
            insert(&mut head, &mut prev, pos);
            pos += 1;
        }

        token = (token + 1) % 8;
    }

    let checksum = data
        .iter()
        .fold(0u32, |sum, &b| sum.wrapping_add(u32::from(b)));
    out.extend_from_slice(&checksum.to_le_bytes());

    out
}

/// Longest match for `data[pos..]` within the reachable window.
fn find_match(data: &[u8], pos: usize, head: &[u32], prev: &[u32]) -> (usize, usize) {
    let limit = MAX_MATCH.min(data.len() - pos);
    if limit < MIN_MATCH {
        return (0, 0);
    }

    let mut best_pos = 0usize;
    let mut best_len = 0usize;
    let mut candidate = head[hash3(&data[pos..])];
    let mut chain = 0usize;

    while candidate != NO_POS && chain < MAX_CHAIN {
        let cand = candidate as usize;
        let distance = pos.wrapping_sub(cand);
        // The decoder ring holds the previous WINDOW-1 bytes at read time.
        if distance == 0 || distance > WINDOW - 1 {
            break;
        }

        let mut len = 0usize;
        while len < limit && data[cand + len] == data[pos + len] {
            len += 1;
        }

        if len > best_len {
            best_len = len;
            best_pos = cand;
            if len == limit {
                break;
            }
        }

        candidate = prev[cand & MASK];
        chain += 1;
    }

    (best_pos, best_len)
}

/// Streaming LZSS decoder with a known output length.
///
/// Yields exactly `out_len` decompressed bytes, then validates the trailing
/// checksum. Truncated streams and checksum mismatches surface as
/// [`io::ErrorKind::InvalidData`].
pub struct LzssDecoder<R> {
    src: R,
    window: [u8; WINDOW],
    cursor: usize,
    remaining: u64,
    flags: u8,
    flag_bits: u8,
    copy_pos: usize,
    copy_len: usize,
    checksum: u32,
    verified: bool,
}

impl<R: Read> LzssDecoder<R> {
    /// Wrap `src`, expecting `out_len` bytes of decompressed output.
    pub fn new(src: R, out_len: u64) -> Self {
        Self {
            src,
            window: [FILL; WINDOW],
            cursor: START,
            remaining: out_len,
            flags: 0,
            flag_bits: 0,
            copy_pos: 0,
            copy_len: 0,
            checksum: 0,
            verified: false,
        }
    }

    fn read_byte(&mut self) -> io::Result<u8> {
        let mut byte = [0u8; 1];
        self.src.read_exact(&mut byte).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                io::Error::new(io::ErrorKind::InvalidData, "truncated LZSS stream")
            } else {
                e
            }
        })?;

        Ok(byte[0])
    }

    #[inline]
    fn emit(&mut self, byte: u8, buf: &mut [u8], filled: &mut usize) {
        buf[*filled] = byte;
        *filled += 1;
        self.window[self.cursor] = byte;
        self.cursor = (self.cursor + 1) & MASK;
        self.checksum = self.checksum.wrapping_add(u32::from(byte));
        self.remaining -= 1;
    }

    fn verify_checksum(&mut self) -> io::Result<()> {
        let mut stored = [0u8; 4];
        self.src.read_exact(&mut stored).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                io::Error::new(io::ErrorKind::InvalidData, "missing LZSS checksum")
            } else {
                e
            }
        })?;

        if u32::from_le_bytes(stored) != self.checksum {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "LZSS checksum mismatch",
            ));
        }

        self.verified = true;
        Ok(())
    }
}

impl<R: Read> Read for LzssDecoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0usize;

        while filled < buf.len() && self.remaining > 0 {
            if self.copy_len > 0 {
                let byte = self.window[self.copy_pos & MASK];
                self.copy_pos += 1;
                self.copy_len -= 1;
                self.emit(byte, buf, &mut filled);
                continue;
            }

            if self.flag_bits == 0 {
                self.flags = self.read_byte()?;
                self.flag_bits = 8;
            }

            let literal = self.flags & 1 != 0;
            self.flags >>= 1;
            self.flag_bits -= 1;

            if literal {
                let byte = self.read_byte()?;
                self.emit(byte, buf, &mut filled);
            } else {
                let low = usize::from(self.read_byte()?);
                let high = usize::from(self.read_byte()?);
                self.copy_pos = low | ((high & 0xf0) << 4);
                self.copy_len = (high & 0x0f) + MIN_MATCH;
            }
        }

        if self.remaining == 0 && !self.verified {
            self.verify_checksum()?;
        }

        Ok(filled)
    }
}

/// Decompress a full in-memory stream of known output length.
///
/// # Errors
/// Returns an error when the stream is truncated or the checksum fails.
pub fn decompress(data: &[u8], out_len: usize) -> io::Result<Vec<u8>> {
    let mut decoder = LzssDecoder::new(data, out_len as u64);
    let mut out = Vec::with_capacity(out_len);
    decoder.read_to_end(&mut out)?;

    Ok(out)
}
