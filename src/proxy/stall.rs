//! Stall detection for streamed downloads
//!
//! Some DPI middleboxes let a TLS stream carry a small, fixed payload budget
//! and then stop forwarding packets while keeping the connection open. The
//! detector reads a stream in small increments and classifies how it ended:
//! cleanly, stalled inside the byte window that matches that budget, stalled
//! outside it, or cut off by the probe's overall deadline.

use futures::{Stream, StreamExt};
use std::fmt::Display;
use std::ops::RangeInclusive;
use tokio::time::{timeout, Duration, Instant};
use tracing::debug;

/// Bytes consumed per read
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Idle time after which a read counts as stalled
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Lower bound of the freeze window (14 KB)
pub const FREEZE_WINDOW_MIN: u64 = 14 * 1024;

/// Upper bound of the freeze window (25 KB)
pub const FREEZE_WINDOW_MAX: u64 = 25 * 1024;

/// Tuned thresholds for the freeze heuristic
///
/// The window was picked from observed traffic, not derived; tests shrink the
/// stall timeout, nothing else should need to touch these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StallPolicy {
    pub chunk_size: usize,
    pub stall_timeout: Duration,
    pub freeze_window: RangeInclusive<u64>,
}

impl Default for StallPolicy {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            stall_timeout: DEFAULT_STALL_TIMEOUT,
            freeze_window: FREEZE_WINDOW_MIN..=FREEZE_WINDOW_MAX,
        }
    }
}

impl StallPolicy {
    pub fn with_stall_timeout(mut self, stall_timeout: Duration) -> Self {
        self.stall_timeout = stall_timeout;
        self
    }

    pub fn in_freeze_window(&self, bytes: u64) -> bool {
        self.freeze_window.contains(&bytes)
    }
}

/// How a watched stream ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StallOutcome {
    /// End of stream
    Completed { bytes: u64 },
    /// Idle timeout with the total inside the freeze window
    StalledInWindow { bytes: u64 },
    /// Idle timeout with the total outside the freeze window
    StalledOutOfWindow { bytes: u64 },
    /// The probe's overall deadline fired first
    TimedOutOverall { bytes: u64 },
    /// Transport error mid-stream
    Failed { bytes: u64, error: String },
}

impl StallOutcome {
    pub fn bytes(&self) -> u64 {
        match self {
            StallOutcome::Completed { bytes }
            | StallOutcome::StalledInWindow { bytes }
            | StallOutcome::StalledOutOfWindow { bytes }
            | StallOutcome::TimedOutOverall { bytes }
            | StallOutcome::Failed { bytes, .. } => *bytes,
        }
    }
}

/// Splits whatever the stream yields into reads of at most `chunk_size` bytes
struct ChunkReader<S, B> {
    stream: S,
    pending: Option<B>,
    offset: usize,
    chunk_size: usize,
}

impl<S, B, E> ChunkReader<S, B>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
{
    fn new(stream: S, chunk_size: usize) -> Self {
        Self {
            stream,
            pending: None,
            offset: 0,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Returns the number of bytes read, 0 at end of stream
    async fn read(&mut self) -> Result<usize, E> {
        loop {
            let remaining = self
                .pending
                .as_ref()
                .map_or(0, |buf| buf.as_ref().len() - self.offset);
            if remaining > 0 {
                let n = remaining.min(self.chunk_size);
                self.offset += n;
                return Ok(n);
            }

            match self.stream.next().await {
                Some(Ok(buf)) => {
                    self.pending = Some(buf);
                    self.offset = 0;
                }
                Some(Err(e)) => return Err(e),
                None => return Ok(0),
            }
        }
    }
}

/// Watches a byte stream for the freeze signature
#[derive(Debug, Clone, Default)]
pub struct StallDetector {
    policy: StallPolicy,
}

impl StallDetector {
    pub fn new(policy: StallPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &StallPolicy {
        &self.policy
    }

    /// Consume `stream` until it ends, stalls, errors or `deadline` passes
    pub async fn watch<S, B, E>(&self, stream: S, deadline: Instant) -> StallOutcome
    where
        S: Stream<Item = Result<B, E>> + Unpin,
        B: AsRef<[u8]>,
        E: Display,
    {
        let mut reader = ChunkReader::new(stream, self.policy.chunk_size);
        let mut total: u64 = 0;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let deadline_first = remaining <= self.policy.stall_timeout;
            let wait = remaining.min(self.policy.stall_timeout);

            match timeout(wait, reader.read()).await {
                Ok(Ok(0)) => return StallOutcome::Completed { bytes: total },
                Ok(Ok(n)) => total += n as u64,
                Ok(Err(e)) => {
                    debug!(bytes = total, error = %e, "stream failed mid-transfer");
                    return StallOutcome::Failed {
                        bytes: total,
                        error: e.to_string(),
                    };
                }
                Err(_) if deadline_first => {
                    debug!(bytes = total, "overall deadline reached while reading");
                    return StallOutcome::TimedOutOverall { bytes: total };
                }
                Err(_) => {
                    debug!(bytes = total, "stream stalled");
                    return if self.policy.in_freeze_window(total) {
                        StallOutcome::StalledInWindow { bytes: total }
                    } else {
                        StallOutcome::StalledOutOfWindow { bytes: total }
                    };
                }
            }
        }
    }
}
