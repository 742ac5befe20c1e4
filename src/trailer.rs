//! Optional `0x00` + SHA-1 end-of-file trailer.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use sha1::{Digest, Sha1};

use crate::error::{Error, Result};
use crate::source::ReadAt;
use crate::types::SHA_SIZE;

/// Trailer length on disk: marker byte plus digest.
const TRAILER_SIZE: u64 = 1 + SHA_SIZE as u64;

/// Append a SHA-1 trailer (`0x00` + 20-byte hash) to the file.
///
/// The hash covers all content up to, but not including, the trailer. When
/// the file already ends with a provably valid trailer it is overwritten in
/// place, which makes the operation idempotent. A payload that merely ends
/// with `0x00` plus 20 arbitrary bytes is not treated as a trailer; the
/// stored digest must re-verify before it is replaced.
///
/// # Errors
/// Fails on I/O errors while reading, hashing, or rewriting the file.
pub fn write_sha1_trailer(path: impl AsRef<Path>) -> Result<()> {
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    let size = file.metadata()?.len();

    let mut write_pos = size;
    let mut digest: Option<[u8; SHA_SIZE]> = None;

    if size >= TRAILER_SIZE {
        let mut tail = [0u8; TRAILER_SIZE as usize];
        if file.read_exact_at(&mut tail, size - TRAILER_SIZE).is_ok() && tail[0] == 0x00 {
            let candidate = size - TRAILER_SIZE;
            let candidate_digest = hash_file_prefix(&file, candidate)?;
            if candidate_digest[..] == tail[1..] {
                write_pos = candidate;
                digest = Some(candidate_digest);
            }
        }
    }

    let digest = match digest {
        Some(digest) => digest,
        None => hash_file_prefix(&file, size)?,
    };

    file.seek(SeekFrom::Start(write_pos))?;
    file.write_all(&[0x00])?;
    file.write_all(&digest)?;
    file.sync_all()?;

    Ok(())
}

/// Verify that the file ends with a valid SHA-1 trailer and return the
/// stored digest.
///
/// # Errors
/// Fails with [`Error::TrailerTooShort`], [`Error::InvalidTrailerPrefix`],
/// or [`Error::TrailerHashMismatch`] when the trailer is absent or stale.
pub fn verify_sha1_trailer(path: impl AsRef<Path>) -> Result<[u8; SHA_SIZE]> {
    let file = OpenOptions::new().read(true).open(path)?;
    let size = file.metadata()?.len();

    if size < TRAILER_SIZE {
        return Err(Error::TrailerTooShort);
    }

    let mut tail = [0u8; TRAILER_SIZE as usize];
    file.read_exact_at(&mut tail, size - TRAILER_SIZE)?;
    if tail[0] != 0x00 {
        return Err(Error::InvalidTrailerPrefix);
    }

    let mut stored = [0u8; SHA_SIZE];
    stored.copy_from_slice(&tail[1..]);

    let computed = hash_file_prefix(&file, size - TRAILER_SIZE)?;
    if computed != stored {
        return Err(Error::TrailerHashMismatch);
    }

    Ok(stored)
}

/// SHA-1 over the first `n` bytes of the file.
fn hash_file_prefix(file: &std::fs::File, n: u64) -> Result<[u8; SHA_SIZE]> {
    let mut hasher = Sha1::new();
    let mut buf = [0u8; 32 * 1024];
    let mut offset = 0u64;

    while offset < n {
        let chunk = buf
            .len()
            .min(usize::try_from(n - offset).unwrap_or(usize::MAX));
        let read = file.read_at(&mut buf[..chunk], offset)?;
        if read == 0 {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "file shrank while hashing trailer content",
            )));
        }

        hasher.update(&buf[..read]);
        offset += read as u64;
    }

    Ok(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn sha1_of(data: &[u8]) -> [u8; SHA_SIZE] {
        let mut hasher = Sha1::new();
        hasher.update(data);
        hasher.finalize().into()
    }

    #[test]
    fn appends_and_verifies_trailer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.pbo");
        fs::write(&path, b"archive body").unwrap();

        write_sha1_trailer(&path).unwrap();

        let bytes = fs::read(&path).unwrap();
        assert_eq!(bytes.len(), b"archive body".len() + 21);
        assert_eq!(bytes[b"archive body".len()], 0x00);

        let stored = verify_sha1_trailer(&path).unwrap();
        assert_eq!(stored, sha1_of(b"archive body"));
    }

    #[test]
    fn trailer_write_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.pbo");
        fs::write(&path, b"stable content").unwrap();

        write_sha1_trailer(&path).unwrap();
        let first = fs::read(&path).unwrap();

        write_sha1_trailer(&path).unwrap();
        let second = fs::read(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn accidental_trailer_shape_is_not_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.pbo");

        // Payload that happens to end with 0x00 + 20 arbitrary bytes.
        let mut body = b"payload".to_vec();
        body.push(0x00);
        body.extend_from_slice(&[0x42u8; 20]);
        fs::write(&path, &body).unwrap();

        write_sha1_trailer(&path).unwrap();

        let bytes = fs::read(&path).unwrap();
        assert_eq!(bytes.len(), body.len() + 21);
        assert_eq!(&bytes[..body.len()], body.as_slice());
        assert_eq!(verify_sha1_trailer(&path).unwrap(), sha1_of(&body));
    }

    #[test]
    fn verify_failures() {
        let dir = tempfile::tempdir().unwrap();

        let short = dir.path().join("short.pbo");
        fs::write(&short, b"tiny").unwrap();
        assert!(matches!(
            verify_sha1_trailer(&short),
            Err(Error::TrailerTooShort)
        ));

        let bad_prefix = dir.path().join("prefix.pbo");
        let mut bytes = vec![0u8; 40];
        bytes[40 - 21] = 0x01;
        fs::write(&bad_prefix, &bytes).unwrap();
        assert!(matches!(
            verify_sha1_trailer(&bad_prefix),
            Err(Error::InvalidTrailerPrefix)
        ));

        let stale = dir.path().join("stale.pbo");
        fs::write(&stale, b"first body").unwrap();
        write_sha1_trailer(&stale).unwrap();
        // Corrupt a body byte after the trailer was written.
        let mut bytes = fs::read(&stale).unwrap();
        bytes[0] ^= 0xff;
        fs::write(&stale, &bytes).unwrap();
        assert!(matches!(
            verify_sha1_trailer(&stale),
            Err(Error::TrailerHashMismatch)
        ));
    }
}
