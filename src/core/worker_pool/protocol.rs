//! Wire protocol between the scheduler and a worker process.
//!
//! Line-delimited JSON over the child's stdin/stdout. The child's stderr is
//! inherited so worker logs interleave with the scheduler's.

use std::io::{self, BufRead, Write};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::core::model::Payload;
use crate::core::worker_pool::TaskResult;

/// Parent-to-worker messages.
#[derive(Debug, Serialize, Deserialize)]
pub enum WorkerRequest {
    /// No-op round-trip; confirms the model is materialized and warm.
    Prepare,
    /// Execute one batch.
    Run {
        /// Task to execute.
        task_name: String,
        /// Batch items in submission order.
        items: Vec<Payload>,
    },
    /// Orderly exit.
    Shutdown,
}

/// Worker-to-parent messages.
#[derive(Debug, Serialize, Deserialize)]
pub enum WorkerResponse {
    /// Reply to [`WorkerRequest::Prepare`].
    Ready,
    /// Reply to [`WorkerRequest::Run`].
    Result(TaskResult),
}

/// Write one message followed by a newline and flush.
///
/// # Errors
///
/// Propagates I/O failures; a broken pipe here means the peer is gone.
pub fn write_message<T: Serialize, W: Write>(writer: &mut W, message: &T) -> io::Result<()> {
    let line = serde_json::to_vec(message).map_err(io::Error::other)?;
    writer.write_all(&line)?;
    writer.write_all(b"\n")?;
    writer.flush()
}

/// Read one newline-delimited message.
///
/// # Errors
///
/// Returns `UnexpectedEof` when the peer closed the stream, `InvalidData` on
/// malformed JSON, and propagates other I/O failures.
pub fn read_message<T: DeserializeOwned, R: BufRead>(reader: &mut R) -> io::Result<T> {
    let mut line = String::new();
    let read = reader.read_line(&mut line)?;
    if read == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "worker stream closed",
        ));
    }
    serde_json::from_str(&line).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
}
