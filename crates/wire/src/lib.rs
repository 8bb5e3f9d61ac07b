//! Frames exchanged between the bridge and its host.
//!
//! Both channels carry UTF-8 JSON objects, one per line. Requests are wrapped
//! in an [`Envelope`] carrying a numeric id which the matching [`Reply`]
//! echoes back.

use std::io;

use thiserror::Error;

mod codec;
mod frame;

pub use codec::{MAX_FRAME_BYTES, read_frame, write_frame};
pub use frame::{BridgeRequest, Envelope, ErrorBody, HostRequest, Reply};

#[derive(Debug, Error)]
pub enum Error {
    #[error("JSON serialization error")]
    Json(#[from] serde_json::Error),
    #[error("I/O error")]
    Io(#[from] io::Error),
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },
}
