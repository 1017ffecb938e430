//! Chunked AES-256-GCM for files larger than memory
//!
//! Stream format (binary):
//! ```text
//! [4 bytes: "FDS1"][4 bytes: chunk_size, u32 BE]
//! frame*: [12 bytes: random nonce][chunk ciphertext][16 bytes: GCM tag]
//! AAD = stream_iv (12) || chunk_size (u32 BE) || chunk_index (u64 BE) || final (u8)
//! ```
//!
//! Every frame but the last carries exactly `chunk_size` plaintext bytes. The
//! `stream_iv` is the 12-byte value stored in the share record. Binding it,
//! the index, and the final flag into the AAD makes reordering, truncation,
//! extension, and splicing frames between files fail authentication.
//!
//! Memory budget: two plaintext chunks plus two frames, whatever the file size.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use zeroize::Zeroize;

use fdrive_core::types::DEFAULT_MIME_TYPE;
use fdrive_core::{FdriveError, FdriveResult};

use crate::cipher::{generate_iv, Algorithm, DecryptedFile, EncryptedPayload, AES_GCM_STREAM};
use crate::keys::{fill_random, generate_file_key, FileKey};
use crate::{IV_SIZE, TAG_SIZE};

const MAGIC: &[u8; 4] = b"FDS1";
const HEADER_SIZE: usize = 8;

/// Largest chunk size a decoder will allocate for
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Byte counts of a finished stream operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamSummary {
    pub plaintext_bytes: u64,
    pub ciphertext_bytes: u64,
    pub chunks: u64,
}

/// Result of encrypting a file on disk
#[derive(Debug, Clone)]
pub struct EncryptedFile {
    pub iv: [u8; IV_SIZE],
    pub summary: StreamSummary,
}

impl EncryptedFile {
    pub fn algorithm(&self) -> Algorithm {
        Algorithm::AesGcmStream
    }
}

/// Encrypt everything `reader` yields into `writer` with a caller-supplied key
/// and stream IV.
pub fn encrypt_stream<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    key: &FileKey,
    iv: &[u8; IV_SIZE],
    chunk_size: usize,
) -> FdriveResult<StreamSummary> {
    if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
        return Err(FdriveError::MalformedInput(format!(
            "chunk size {chunk_size} out of range (1..={MAX_CHUNK_SIZE})"
        )));
    }

    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let mut summary = StreamSummary::default();

    writer.write_all(MAGIC)?;
    writer.write_all(&(chunk_size as u32).to_be_bytes())?;
    summary.ciphertext_bytes += HEADER_SIZE as u64;

    let mut current = vec![0u8; chunk_size];
    let mut next = vec![0u8; chunk_size];
    let mut current_len = read_full(reader, &mut current)?;
    let mut index = 0u64;

    loop {
        // Read ahead to learn whether this chunk is the last one
        let next_len = if current_len == chunk_size {
            read_full(reader, &mut next)?
        } else {
            0
        };
        let is_final = next_len == 0;

        let mut nonce = [0u8; IV_SIZE];
        fill_random(&mut nonce)?;
        let aad = build_aad(iv, chunk_size, index, is_final);
        let sealed = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &current[..current_len],
                    aad: &aad,
                },
            )
            .map_err(|_| FdriveError::MalformedInput(format!("chunk {index} encryption failed")))?;

        writer.write_all(&nonce)?;
        writer.write_all(&sealed)?;

        summary.plaintext_bytes += current_len as u64;
        summary.ciphertext_bytes += (IV_SIZE + sealed.len()) as u64;
        summary.chunks += 1;

        if is_final {
            break;
        }
        std::mem::swap(&mut current, &mut next);
        current_len = next_len;
        index += 1;
    }

    writer.flush()?;
    current.zeroize();
    next.zeroize();

    debug!(
        chunks = summary.chunks,
        plaintext_bytes = summary.plaintext_bytes,
        "encrypted stream"
    );
    Ok(summary)
}

/// Decrypt frame by frame. Each chunk is authenticated before it reaches
/// `writer`, but a later failure (truncation, tampering) leaves earlier chunks
/// written, so callers must discard `writer` on `Err`.
fn decrypt_frames<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    key: &FileKey,
    iv: &[u8],
) -> FdriveResult<StreamSummary> {
    if iv.len() != IV_SIZE {
        return Err(FdriveError::MalformedInput(format!(
            "stream iv has {} bytes (expected {IV_SIZE})",
            iv.len()
        )));
    }
    let mut stream_iv = [0u8; IV_SIZE];
    stream_iv.copy_from_slice(iv);

    let mut header = [0u8; HEADER_SIZE];
    if read_full(reader, &mut header)? != HEADER_SIZE || &header[..4] != MAGIC {
        return Err(FdriveError::MalformedInput("missing stream header".into()));
    }
    let chunk_size = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
    if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
        return Err(FdriveError::MalformedInput(format!(
            "stream chunk size {chunk_size} out of range"
        )));
    }

    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let frame_len = IV_SIZE + chunk_size + TAG_SIZE;
    let mut summary = StreamSummary {
        ciphertext_bytes: HEADER_SIZE as u64,
        ..Default::default()
    };

    let mut current = vec![0u8; frame_len];
    let mut next = vec![0u8; frame_len];
    let mut current_len = read_full(reader, &mut current)?;
    if current_len == 0 {
        return Err(FdriveError::MalformedInput("stream has no frames".into()));
    }
    let mut index = 0u64;

    loop {
        if current_len < IV_SIZE + TAG_SIZE {
            return Err(FdriveError::MalformedInput(format!(
                "frame {index} truncated to {current_len} bytes"
            )));
        }
        let next_len = if current_len == frame_len {
            read_full(reader, &mut next)?
        } else {
            0
        };
        let is_final = next_len == 0;

        let (nonce, sealed) = current[..current_len].split_at(IV_SIZE);
        let aad = build_aad(&stream_iv, chunk_size, index, is_final);
        let mut plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), Payload { msg: sealed, aad: &aad })
            .map_err(|_| FdriveError::Integrity)?;

        writer.write_all(&plaintext)?;
        summary.plaintext_bytes += plaintext.len() as u64;
        summary.ciphertext_bytes += current_len as u64;
        summary.chunks += 1;
        plaintext.zeroize();

        if is_final {
            break;
        }
        std::mem::swap(&mut current, &mut next);
        current_len = next_len;
        index += 1;
    }

    writer.flush()?;
    Ok(summary)
}

/// Encrypt an in-memory buffer into the stream format under a fresh key and IV.
pub fn encrypt_bytes(plaintext: &[u8], chunk_size: usize) -> FdriveResult<(EncryptedPayload, FileKey)> {
    let key = generate_file_key()?;
    let iv = generate_iv()?;
    let mut ciphertext = Vec::with_capacity(plaintext.len() + HEADER_SIZE + 64);
    let mut reader = plaintext;
    encrypt_stream(&mut reader, &mut ciphertext, &key, &iv, chunk_size)?;

    Ok((
        EncryptedPayload {
            ciphertext,
            iv: iv.to_vec(),
            algorithm: AES_GCM_STREAM.to_string(),
        },
        key,
    ))
}

/// Decrypt an in-memory stream payload. Nothing is returned on failure.
pub fn decrypt_bytes(
    payload: &EncryptedPayload,
    key: &FileKey,
    mime_type: &str,
) -> FdriveResult<DecryptedFile> {
    if Algorithm::from_tag(&payload.algorithm)? != Algorithm::AesGcmStream {
        return Err(FdriveError::UnsupportedAlgorithm(format!(
            "{} is not a stream payload",
            payload.algorithm
        )));
    }

    let mut out = Vec::with_capacity(payload.ciphertext.len());
    let mut reader = payload.ciphertext.as_slice();
    if let Err(e) = decrypt_frames(&mut reader, &mut out, key, &payload.iv) {
        out.zeroize();
        return Err(e);
    }

    let mime_type = if mime_type.trim().is_empty() {
        DEFAULT_MIME_TYPE.to_string()
    } else {
        mime_type.to_string()
    };
    Ok(DecryptedFile { bytes: out, mime_type })
}

/// Encrypt the file at `src` into `dst` under a fresh key and stream IV.
///
/// `dst` only appears once encryption has fully succeeded.
pub fn encrypt_file(src: &Path, dst: &Path, chunk_size: usize) -> FdriveResult<(EncryptedFile, FileKey)> {
    let key = generate_file_key()?;
    let iv = generate_iv()?;

    let mut reader = BufReader::new(File::open(src)?);
    let summary = write_atomically(dst, |writer| {
        encrypt_stream(&mut reader, writer, &key, &iv, chunk_size)
    })?;

    debug!(
        src = %src.display(),
        dst = %dst.display(),
        bytes = summary.plaintext_bytes,
        "encrypted file"
    );
    Ok((EncryptedFile { iv, summary }, key))
}

/// Decrypt the stream at `src` into `dst`.
///
/// Plaintext is written to a temporary sibling and renamed into place only
/// after the final frame authenticates; on any failure the temporary file is
/// removed and `dst` is untouched.
pub fn decrypt_file(src: &Path, dst: &Path, key: &FileKey, iv: &[u8]) -> FdriveResult<StreamSummary> {
    let mut reader = BufReader::new(File::open(src)?);
    write_atomically(dst, |writer| decrypt_frames(&mut reader, writer, key, iv))
}

/// Decrypt a stream from any reader into `dst` with the same atomic guarantee
/// as [`decrypt_file`].
pub fn decrypt_reader_to_file<R: Read>(
    reader: &mut R,
    dst: &Path,
    key: &FileKey,
    iv: &[u8],
) -> FdriveResult<StreamSummary> {
    write_atomically(dst, |writer| decrypt_frames(reader, writer, key, iv))
}

fn write_atomically<T>(
    dst: &Path,
    body: impl FnOnce(&mut BufWriter<File>) -> FdriveResult<T>,
) -> FdriveResult<T> {
    if let Some(parent) = dst.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let tmp = tmp_path(dst);
    let result = File::create(&tmp)
        .map_err(FdriveError::from)
        .and_then(|file| {
            let mut writer = BufWriter::new(file);
            let value = body(&mut writer)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
            Ok(value)
        });

    match result {
        Ok(value) => {
            std::fs::rename(&tmp, dst)?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rm) = std::fs::remove_file(&tmp) {
                warn!(tmp = %tmp.display(), "failed to remove partial output: {rm}");
            }
            Err(e)
        }
    }
}

fn tmp_path(dst: &Path) -> PathBuf {
    let mut name = dst
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".fdrive_tmp");
    dst.with_file_name(name)
}

/// AAD: stream_iv (12) || chunk_size (4, BE) || chunk_index (8, BE) || final (1)
fn build_aad(iv: &[u8; IV_SIZE], chunk_size: usize, index: u64, is_final: bool) -> Vec<u8> {
    let mut aad = Vec::with_capacity(IV_SIZE + 4 + 8 + 1);
    aad.extend_from_slice(iv);
    aad.extend_from_slice(&(chunk_size as u32).to_be_bytes());
    aad.extend_from_slice(&index.to_be_bytes());
    aad.push(is_final as u8);
    aad
}

/// Read until `buf` is full or the reader is exhausted.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}


#[cfg(test)]
mod proptest_suite {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn roundtrip(data in proptest::collection::vec(any::<u8>(), 0..=2048), chunk in 1usize..300) {
            let (payload, key) = encrypt_bytes(&data, chunk).unwrap();
            let out = decrypt_bytes(&payload, &key, "").unwrap();
            prop_assert_eq!(out.bytes, data);
        }

        #[test]
        fn bit_flip_after_header_fails(
            data in proptest::collection::vec(any::<u8>(), 0..=512),
            pos in any::<prop::sample::Index>(),
            bit in 0u8..8,
        ) {
            let (mut payload, key) = encrypt_bytes(&data, 64).unwrap();
            let body = payload.ciphertext.len() - HEADER_SIZE;
            let i = HEADER_SIZE + pos.index(body);
            payload.ciphertext[i] ^= 1 << bit;
            prop_assert!(matches!(decrypt_bytes(&payload, &key, ""), Err(FdriveError::Integrity)));
        }
    }
}
