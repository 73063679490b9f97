//! Append-only action log file for a single user.

use crate::error::{Result, SyncError};
use crate::storage::frame::{self, HEADER_SIZE, TRAILER_SIZE};
use crate::types::{EpisodeAction, Offset};
use parking_lot::{Mutex, RwLock};
use serde::de::IgnoredAny;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Magic bytes for action batches.
const LOG_MAGIC: &[u8; 4] = b"ACT\0";

/// Location of one batch in the file.
#[derive(Clone, Copy, Debug)]
struct FrameEntry {
    /// Byte position of the frame.
    pos: u64,
    /// Log index of the batch's first action.
    first: u64,
    /// Actions in the batch.
    count: u64,
}

impl FrameEntry {
    fn end(&self) -> u64 {
        self.first + self.count
    }
}

struct Writer {
    file: File,
    /// End of the last complete frame.
    end: u64,
}

/// Append-only action log.
pub struct ActionLogFile {
    /// Path to the log file.
    path: PathBuf,

    /// Write handle; held for the whole append so batches never interleave.
    writer: Mutex<Writer>,

    /// Committed frames. Only complete, durable frames are ever listed.
    frames: RwLock<Vec<FrameEntry>>,

    /// fsync after every batch.
    sync_on_append: bool,
}

impl ActionLogFile {
    /// Open or create a log, dropping a torn trailing batch if one is found.
    pub fn open(path: impl AsRef<Path>, sync_on_append: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let size = file.metadata()?.len();
        let (frames, end) = Self::scan(&file, size)?;

        if end < size {
            warn!(
                path = %path.display(),
                valid = end,
                size,
                "truncating torn batch at end of action log"
            );
            file.set_len(end)?;
            file.sync_all()?;
        }

        Ok(Self {
            path,
            writer: Mutex::new(Writer { file, end }),
            frames: RwLock::new(frames),
            sync_on_append,
        })
    }

    /// Number of actions in the log.
    pub fn len(&self) -> Offset {
        Offset(self.frames.read().last().map(FrameEntry::end).unwrap_or(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len().0 == 0
    }

    /// Append a batch. Either the whole batch becomes visible or none of it.
    ///
    /// Returns the new log length.
    pub fn append(&self, actions: &[EpisodeAction]) -> Result<Offset> {
        let mut writer = self.writer.lock();

        if actions.is_empty() {
            return Ok(self.len());
        }

        let bytes = frame::encode(LOG_MAGIC, &actions)?;
        let pos = writer.end;

        if let Err(e) = Self::write_frame(&mut writer.file, pos, &bytes, self.sync_on_append) {
            // Roll the file back so a later append does not land after garbage.
            if let Err(rollback) = writer.file.set_len(pos) {
                warn!(path = %self.path.display(), error = %rollback, "failed to roll back action log");
            }
            return Err(e);
        }
        writer.end = pos + bytes.len() as u64;

        let mut frames = self.frames.write();
        let first = frames.last().map(FrameEntry::end).unwrap_or(0);
        let entry = FrameEntry {
            pos,
            first,
            count: actions.len() as u64,
        };
        frames.push(entry);

        Ok(Offset(entry.end()))
    }

    /// Actions at index `offset` and later, plus the log length they were read at.
    pub fn read_since(&self, offset: Offset) -> Result<(Vec<EpisodeAction>, Offset)> {
        let (pending, total) = {
            let frames = self.frames.read();
            let total = frames.last().map(FrameEntry::end).unwrap_or(0);
            if offset.0 >= total {
                return Ok((Vec::new(), Offset(total)));
            }
            let start = frames.partition_point(|f| f.end() <= offset.0);
            (frames[start..].to_vec(), total)
        };

        let mut reader = BufReader::new(File::open(&self.path)?);
        reader.seek(SeekFrom::Start(pending[0].pos))?;

        let mut actions = Vec::with_capacity((total - offset.0) as usize);
        for entry in &pending {
            let payload = frame::read_payload(&mut reader, LOG_MAGIC)?;
            let batch: Vec<EpisodeAction> = rmp_serde::from_slice(&payload)?;
            if batch.len() as u64 != entry.count {
                return Err(SyncError::Corruption(format!(
                    "batch at byte {} holds {} actions, index says {}",
                    entry.pos,
                    batch.len(),
                    entry.count
                )));
            }

            let skip = offset.0.saturating_sub(entry.first) as usize;
            actions.extend(batch.into_iter().skip(skip));
        }

        debug!(path = %self.path.display(), %offset, returned = actions.len(), "read action log");
        Ok((actions, Offset(total)))
    }

    /// Force sync all pending writes to disk.
    pub fn sync(&self) -> Result<()> {
        self.writer.lock().file.sync_all()?;
        Ok(())
    }

    fn write_frame(file: &mut File, pos: u64, bytes: &[u8], sync: bool) -> Result<()> {
        file.seek(SeekFrom::Start(pos))?;
        file.write_all(bytes)?;
        if sync {
            file.sync_data()?;
        }
        Ok(())
    }

    /// Walk all frames, returning the index and the end of the last valid one.
    ///
    /// A frame that runs past the end of the file with no complete frame
    /// after it, or whose checksum fails and which is the last thing in the
    /// file, is a torn write and ends the scan. Anything else that fails to
    /// validate is corruption.
    fn scan(file: &File, size: u64) -> Result<(Vec<FrameEntry>, u64)> {
        let mut reader = BufReader::new(file.try_clone()?);
        reader.seek(SeekFrom::Start(0))?;

        let mut frames = Vec::new();
        let mut pos = 0u64;
        let mut first = 0u64;

        while pos < size {
            let remaining = size - pos;
            if remaining < HEADER_SIZE as u64 {
                break;
            }

            let mut header = [0u8; HEADER_SIZE];
            reader.read_exact(&mut header)?;
            let len = frame::parse_header(LOG_MAGIC, &header).map_err(|e| {
                SyncError::Corruption(format!("invalid frame at byte {}: {}", pos, e))
            })?;

            let frame_len = frame::frame_size(len);
            if remaining < frame_len {
                // A torn append is always the last frame. A complete frame
                // further on means this length field is damaged.
                if let Some(next) = Self::find_frame(&mut reader, pos + 1, size)? {
                    return Err(SyncError::Corruption(format!(
                        "frame at byte {} overruns valid frame at byte {}",
                        pos, next
                    )));
                }
                break;
            }

            let mut payload = vec![0u8; len];
            reader.read_exact(&mut payload)?;
            let mut trailer = [0u8; TRAILER_SIZE];
            reader.read_exact(&mut trailer)?;

            if let Err(e) = frame::verify(&payload, &trailer) {
                if pos + frame_len == size {
                    break;
                }
                return Err(SyncError::Corruption(format!(
                    "invalid frame at byte {}: {}",
                    pos, e
                )));
            }

            let count = rmp_serde::from_slice::<Vec<IgnoredAny>>(&payload)?.len() as u64;
            frames.push(FrameEntry { pos, first, count });
            first += count;
            pos += frame_len;
        }

        Ok((frames, pos))
    }

    /// Position of the first complete, checksummed frame in `[from, size)`.
    fn find_frame<R: Read + Seek>(reader: &mut R, from: u64, size: u64) -> Result<Option<u64>> {
        reader.seek(SeekFrom::Start(from))?;
        let mut tail = Vec::with_capacity((size - from) as usize);
        reader.take(size - from).read_to_end(&mut tail)?;

        let mut start = 0;
        while start + HEADER_SIZE + TRAILER_SIZE <= tail.len() {
            let Some(found) = tail[start..]
                .windows(LOG_MAGIC.len())
                .position(|w| w == LOG_MAGIC)
            else {
                break;
            };
            let at = start + found;
            start = at + 1;

            let Some(header) = tail.get(at..at + HEADER_SIZE) else {
                break;
            };
            let mut buf = [0u8; HEADER_SIZE];
            buf.copy_from_slice(header);
            let Ok(len) = frame::parse_header(LOG_MAGIC, &buf) else {
                continue;
            };

            let payload_start = at + HEADER_SIZE;
            let trailer_start = payload_start + len;
            let Some(trailer) = tail.get(trailer_start..trailer_start + TRAILER_SIZE) else {
                continue;
            };
            let mut crc = [0u8; TRAILER_SIZE];
            crc.copy_from_slice(trailer);
            if frame::verify(&tail[payload_start..trailer_start], &crc).is_ok() {
                return Ok(Some(from + at as u64));
            }
        }

        Ok(None)
    }
}
