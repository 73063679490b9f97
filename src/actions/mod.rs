//! Episode action log.
//!
//! Each user has one append-only file of checksummed frames, one frame per
//! uploaded batch. The cursor handed to clients is the number of actions in
//! the log, so `read_since(n)` returns everything appended after the first `n`.

mod log;
mod store;

pub use log::ActionLogFile;
pub use store::{ActionLog, ActionPage, ActionUpload};
