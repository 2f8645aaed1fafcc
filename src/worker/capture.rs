use std::fmt;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;

use crate::job::{Job, LogBuffer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Stdout => write!(f, "stdout"),
            StreamKind::Stderr => write!(f, "stderr"),
        }
    }
}

/// Spawn a task draining `stream` into the job's matching log buffer.
///
/// The task ends at end-of-stream. A read error is recorded as a line in the
/// same buffer and ends the task; it never touches the sibling stream or the
/// supervisor.
pub fn spawn_capture<R>(job: Arc<Job>, stream: R, kind: StreamKind) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let log = match kind {
            StreamKind::Stdout => &job.stdout,
            StreamKind::Stderr => &job.stderr,
        };
        match drain(stream, log).await {
            Ok(lines) => {
                tracing::debug!(job_id = %job.id, stream = %kind, lines, "Stream closed");
            }
            Err(e) => {
                tracing::warn!(job_id = %job.id, stream = %kind, error = %e, "Capture failed");
                log.append(format!("Error capturing {}: {}", kind, e)).await;
            }
        }
    })
}

/// Read `reader` line by line into `log` until end-of-stream.
///
/// Bytes that are not valid UTF-8 are replaced rather than failing the read.
/// Trailing `\n` / `\r\n` are stripped. Returns the number of lines appended.
pub async fn drain<R>(reader: R, log: &LogBuffer) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(256);
    let mut count = 0;

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(count);
        }
        while matches!(buf.last(), Some(b'\n') | Some(b'\r')) {
            buf.pop();
        }
        log.append(String::from_utf8_lossy(&buf).into_owned()).await;
        count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    #[tokio::test]
    async fn drain_splits_lines_and_strips_terminators() {
        let log = LogBuffer::new();
        let input: &[u8] = b"alpha\nbeta\r\n\ngamma";
        let count = drain(input, &log).await.unwrap();

        assert_eq!(count, 4);
        assert_eq!(log.snapshot().await, vec!["alpha", "beta", "", "gamma"]);
    }

    #[tokio::test]
    async fn drain_replaces_invalid_utf8() {
        let log = LogBuffer::new();
        let input: &[u8] = b"ok\n\xff\xfebad\n";
        drain(input, &log).await.unwrap();

        let lines = log.snapshot().await;
        assert_eq!(lines[0], "ok");
        assert!(lines[1].ends_with("bad"));
        assert!(lines[1].contains('\u{FFFD}'));
    }

    /// Yields one line, then fails.
    struct FailingReader {
        sent: bool,
    }

    impl AsyncRead for FailingReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.sent {
                Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe broke")))
            } else {
                self.sent = true;
                buf.put_slice(b"partial\n");
                Poll::Ready(Ok(()))
            }
        }
    }

    #[tokio::test]
    async fn drain_surfaces_read_errors_after_keeping_prior_lines() {
        let log = LogBuffer::new();
        let err = drain(FailingReader { sent: false }, &log).await.unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(log.snapshot().await, vec!["partial"]);
    }
}
