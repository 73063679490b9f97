//! Frame codec.
//!
//! Layout: magic(4) + version(1) + payload length(4, LE) + payload + crc32(4, LE).
//! The checksum covers the payload only.

use crate::error::{Result, SyncError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

/// Current frame format version.
pub const FRAME_VERSION: u8 = 1;

/// magic + version + length.
pub const HEADER_SIZE: usize = 4 + 1 + 4;

/// Trailing checksum.
pub const TRAILER_SIZE: usize = 4;

/// Upper bound for a single payload (64MB).
const MAX_PAYLOAD: usize = 64 * 1024 * 1024;

/// Total on-disk size of a frame carrying `payload_len` bytes.
pub fn frame_size(payload_len: usize) -> u64 {
    (HEADER_SIZE + payload_len + TRAILER_SIZE) as u64
}

/// Serialize `value` and wrap it in a frame.
pub fn encode<T: Serialize>(magic: &[u8; 4], value: &T) -> Result<Vec<u8>> {
    let payload = rmp_serde::to_vec_named(value)?;
    if payload.len() > MAX_PAYLOAD {
        return Err(SyncError::Serialization(format!(
            "payload of {} bytes exceeds frame limit",
            payload.len()
        )));
    }

    let mut buf = Vec::with_capacity(frame_size(payload.len()) as usize);
    buf.extend_from_slice(magic);
    buf.push(FRAME_VERSION);
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&payload);
    buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    Ok(buf)
}

/// Validate a frame header and return the payload length it declares.
pub fn parse_header(magic: &[u8; 4], header: &[u8; HEADER_SIZE]) -> Result<usize> {
    if &header[0..4] != magic {
        return Err(SyncError::InvalidFormat(format!(
            "bad frame magic, expected {:?}",
            String::from_utf8_lossy(magic)
        )));
    }
    if header[4] != FRAME_VERSION {
        return Err(SyncError::InvalidFormat(format!(
            "Unsupported frame version: {}",
            header[4]
        )));
    }

    let len = u32::from_le_bytes([header[5], header[6], header[7], header[8]]) as usize;
    if len > MAX_PAYLOAD {
        return Err(SyncError::Corruption(format!("frame length {} too large", len)));
    }
    Ok(len)
}

/// Check the trailing checksum of a payload.
pub fn verify(payload: &[u8], trailer: &[u8; TRAILER_SIZE]) -> Result<()> {
    let expected = u32::from_le_bytes(*trailer);
    let got = crc32fast::hash(payload);
    if expected != got {
        return Err(SyncError::ChecksumMismatch { expected, got });
    }
    Ok(())
}

/// Read exactly one frame from `reader` and return its payload.
pub fn read_payload<R: Read>(reader: &mut R, magic: &[u8; 4]) -> Result<Vec<u8>> {
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header)?;
    let len = parse_header(magic, &header)?;

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;

    let mut trailer = [0u8; TRAILER_SIZE];
    reader.read_exact(&mut trailer)?;
    verify(&payload, &trailer)?;

    Ok(payload)
}

/// Read and decode a single-frame file.
pub fn read_file<T: DeserializeOwned>(path: &Path, magic: &[u8; 4]) -> Result<T> {
    let mut file = File::open(path)?;
    let payload = read_payload(&mut file, magic)?;
    Ok(rmp_serde::from_slice(&payload)?)
}

/// Read and decode a single-frame file, treating a missing file as `None`.
pub fn read_file_opt<T: DeserializeOwned>(path: &Path, magic: &[u8; 4]) -> Result<Option<T>> {
    match read_file(path, magic) {
        Ok(value) => Ok(Some(value)),
        Err(SyncError::Storage(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Encode `value` as a frame and atomically replace `path` with it.
pub fn write_file<T: Serialize>(path: &Path, magic: &[u8; 4], value: &T) -> Result<()> {
    let bytes = encode(magic, value)?;
    write_atomic(path, &bytes)
}

/// Replace `path` with `bytes` so readers see either the old or the new file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = Path::new(&tmp_name);

    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    if let Err(e) = fs::rename(tmp_path, path) {
        let _ = fs::remove_file(tmp_path);
        return Err(e.into());
    }

    // Persist the rename itself. Directories cannot be opened on every platform.
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }

    Ok(())
}
