//! Non-blocking line reader over child process output.
//!
//! Each source gets a drain task that reads lines as fast as the child writes
//! them and pushes them into an unbounded channel. The owner polls with
//! [`LineReader::try_next`] (never blocks) or awaits [`LineReader::next_line`].
//! End of stream is reported only once every source hit EOF *and* all buffered
//! lines were handed out.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, error::TryRecvError};

type BoxedSource = Box<dyn AsyncRead + Unpin + Send>;

/// Result of a non-blocking read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadLine {
    /// A complete line, without its delimiter.
    Line(String),
    /// Nothing buffered yet, but the source is still open.
    Empty,
    /// All sources are exhausted and the buffer is drained.
    Eof,
}

/// Line reader that never blocks its owner.
///
/// Must be created inside a Tokio runtime, since the drain tasks are spawned
/// on construction.
pub struct LineReader {
    rx: UnboundedReceiver<String>,
}

impl LineReader {
    /// Drain a single source.
    pub fn new<R>(source: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        Self::merged([Box::new(source) as BoxedSource])
    }

    /// Drain several sources into one interleaved line stream.
    pub fn merged(sources: impl IntoIterator<Item = BoxedSource>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        for source in sources {
            tokio::spawn(drain(source, tx.clone()));
        }
        // Only the drain tasks hold senders now, so the channel closes when the
        // last of them finishes.
        drop(tx);
        Self { rx }
    }

    /// Take the child's stdout and stderr (whichever are piped) and merge them.
    pub fn from_child(child: &mut Child) -> Self {
        let mut sources: Vec<BoxedSource> = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            sources.push(Box::new(stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            sources.push(Box::new(stderr));
        }
        Self::merged(sources)
    }

    /// Pop the next buffered line without waiting.
    pub fn try_next(&mut self) -> ReadLine {
        match self.rx.try_recv() {
            Ok(line) => ReadLine::Line(line),
            Err(TryRecvError::Empty) => ReadLine::Empty,
            Err(TryRecvError::Disconnected) => ReadLine::Eof,
        }
    }

    /// Wait for the next line. Returns `None` at end of stream.
    ///
    /// Cancel safe: a line is never lost if this future is dropped.
    pub async fn next_line(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

async fn drain(source: BoxedSource, tx: UnboundedSender<String>) {
    let mut reader = BufReader::new(source);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        // A read error ends this source just like EOF.
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let line = String::from_utf8_lossy(strip_line_end(&buf)).into_owned();
        if tx.send(line).is_err() {
            // Reader dropped; nobody is listening anymore.
            break;
        }
    }
}

fn strip_line_end(mut line: &[u8]) -> &[u8] {
    if let [rest @ .., b'\n'] = line {
        line = rest;
    }
    if let [rest @ .., b'\r'] = line {
        line = rest;
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    async fn wait_for_line(reader: &mut LineReader) -> ReadLine {
        for _ in 0..200 {
            match reader.try_next() {
                ReadLine::Empty => tokio::time::sleep(Duration::from_millis(5)).await,
                other => return other,
            }
        }
        ReadLine::Empty
    }

    #[tokio::test]
    async fn reports_empty_while_source_is_open() {
        let (_tx, rx) = tokio::io::duplex(64);
        let mut reader = LineReader::new(rx);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(reader.try_next(), ReadLine::Empty);
    }

    #[tokio::test]
    async fn hands_out_buffered_lines_before_eof() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut reader = LineReader::new(rx);

        tx.write_all(b"first\nsecond\n").await.unwrap();
        drop(tx);

        // Give the drain task time to hit EOF; the lines must still come first.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(reader.try_next(), ReadLine::Line("first".into()));
        assert_eq!(reader.try_next(), ReadLine::Line("second".into()));
        assert_eq!(reader.try_next(), ReadLine::Eof);
        assert_eq!(reader.try_next(), ReadLine::Eof);
    }

    #[tokio::test]
    async fn merged_sources_end_only_when_all_close() {
        let (mut out_tx, out_rx) = tokio::io::duplex(64);
        let (mut err_tx, err_rx) = tokio::io::duplex(64);
        let mut reader = LineReader::merged([
            Box::new(out_rx) as BoxedSource,
            Box::new(err_rx) as BoxedSource,
        ]);

        out_tx.write_all(b"from stdout\n").await.unwrap();
        drop(out_tx);
        assert_eq!(
            wait_for_line(&mut reader).await,
            ReadLine::Line("from stdout".into())
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(reader.try_next(), ReadLine::Empty);

        err_tx.write_all(b"from stderr\n").await.unwrap();
        drop(err_tx);
        assert_eq!(
            wait_for_line(&mut reader).await,
            ReadLine::Line("from stderr".into())
        );
        assert_eq!(wait_for_line(&mut reader).await, ReadLine::Eof);
    }

    #[tokio::test]
    async fn next_line_waits_then_returns_none() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut reader = LineReader::new(rx);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = tx.write_all(b"late line").await;
        });

        assert_eq!(reader.next_line().await.as_deref(), Some("late line"));
        assert_eq!(reader.next_line().await, None);
    }

    #[tokio::test]
    async fn strips_line_endings_and_decodes_lossily() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut reader = LineReader::new(rx);

        tx.write_all(b"crlf line\r\n\nbad \xff byte\n").await.unwrap();
        drop(tx);

        assert_eq!(reader.next_line().await.as_deref(), Some("crlf line"));
        assert_eq!(reader.next_line().await.as_deref(), Some(""));
        assert_eq!(reader.next_line().await.as_deref(), Some("bad \u{fffd} byte"));
        assert_eq!(reader.next_line().await, None);
    }
}
