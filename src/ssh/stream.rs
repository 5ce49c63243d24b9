// ABOUTME: Streaming command output as chunks or as re-assembled lines.
// ABOUTME: Line buffering keeps arrival order and flushes trailing partial lines.

use std::collections::VecDeque;

use tokio::sync::mpsc;

use super::error::Result;
use super::transport::{OutputChunk, StreamKind};

/// Event from a chunk-level command stream.
#[derive(Debug)]
pub enum StreamEvent {
    Chunk(OutputChunk),
    /// Exit code, or the error that ended the stream. Always the last event.
    Finished(Result<u32>),
}

/// Output of a command running on a dedicated connection.
#[derive(Debug)]
pub struct CommandStream {
    events: mpsc::UnboundedReceiver<StreamEvent>,
}

impl CommandStream {
    pub(crate) fn new(events: mpsc::UnboundedReceiver<StreamEvent>) -> Self {
        Self { events }
    }

    /// Next event, or `None` once the stream is exhausted.
    pub async fn next(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    /// Re-assemble chunks into complete lines.
    pub fn lines(self) -> LineStream {
        LineStream {
            inner: self,
            stdout: LineBuffer::default(),
            stderr: LineBuffer::default(),
            pending: VecDeque::new(),
            done: false,
        }
    }

    /// Drain the stream, handing every chunk to `on_chunk`, and return the exit code.
    pub async fn for_each_chunk(mut self, mut on_chunk: impl FnMut(OutputChunk)) -> Result<u32> {
        while let Some(event) = self.next().await {
            match event {
                StreamEvent::Chunk(chunk) => on_chunk(chunk),
                StreamEvent::Finished(result) => return result,
            }
        }
        Err(super::Error::ChannelClosed)
    }
}

/// Event from a line-level command stream.
#[derive(Debug)]
pub enum LineEvent {
    Line { stream: StreamKind, text: String },
    Finished(Result<u32>),
}

/// Line-buffered view over a [`CommandStream`].
#[derive(Debug)]
pub struct LineStream {
    inner: CommandStream,
    stdout: LineBuffer,
    stderr: LineBuffer,
    pending: VecDeque<LineEvent>,
    done: bool,
}

impl LineStream {
    /// Next complete line, or the terminal `Finished` event.
    ///
    /// Trailing partial lines are flushed before `Finished` is delivered.
    pub async fn next(&mut self) -> Option<LineEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            if self.done {
                return None;
            }

            match self.inner.next().await {
                Some(StreamEvent::Chunk(chunk)) => {
                    let buffer = match chunk.stream {
                        StreamKind::Stdout => &mut self.stdout,
                        StreamKind::Stderr => &mut self.stderr,
                    };
                    for text in buffer.push(&chunk.data) {
                        self.pending.push_back(LineEvent::Line {
                            stream: chunk.stream,
                            text,
                        });
                    }
                }
                Some(StreamEvent::Finished(result)) => {
                    self.flush();
                    self.pending.push_back(LineEvent::Finished(result));
                    self.done = true;
                }
                None => {
                    self.flush();
                    self.pending
                        .push_back(LineEvent::Finished(Err(super::Error::ChannelClosed)));
                    self.done = true;
                }
            }
        }
    }

    fn flush(&mut self) {
        for (stream, buffer) in [
            (StreamKind::Stdout, &mut self.stdout),
            (StreamKind::Stderr, &mut self.stderr),
        ] {
            if let Some(text) = buffer.finish() {
                self.pending.push_back(LineEvent::Line { stream, text });
            }
        }
    }
}

/// Accumulates bytes and yields complete `\n`-terminated lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    partial: Vec<u8>,
}

impl LineBuffer {
    /// Append a chunk, returning every line it completed (without terminators).
    pub fn push(&mut self, data: &[u8]) -> Vec<String> {
        self.partial.extend_from_slice(data);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.partial[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            lines.push(decode_line(&self.partial[start..end]));
            start = end + 1;
        }
        self.partial.drain(..start);
        lines
    }

    /// Take whatever partial line remains.
    pub fn finish(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            return None;
        }
        let line = decode_line(&self.partial);
        self.partial.clear();
        Some(line)
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_complete_lines() {
        let mut buffer = LineBuffer::default();
        assert_eq!(buffer.push(b"one\ntwo\n"), vec!["one", "two"]);
        assert!(buffer.finish().is_none());
    }

    #[test]
    fn joins_lines_split_across_chunks() {
        let mut buffer = LineBuffer::default();
        assert!(buffer.push(b"hel").is_empty());
        assert_eq!(buffer.push(b"lo\nwor"), vec!["hello"]);
        assert_eq!(buffer.finish().as_deref(), Some("wor"));
    }

    #[test]
    fn strips_carriage_returns() {
        let mut buffer = LineBuffer::default();
        assert_eq!(buffer.push(b"dos line\r\n"), vec!["dos line"]);
    }

    #[test]
    fn keeps_empty_lines() {
        let mut buffer = LineBuffer::default();
        assert_eq!(buffer.push(b"a\n\nb\n"), vec!["a", "", "b"]);
    }

    #[tokio::test]
    async fn line_stream_flushes_partial_before_finish() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(StreamEvent::Chunk(OutputChunk {
            stream: StreamKind::Stdout,
            data: b"first\nsec".to_vec(),
        }))
        .unwrap();
        tx.send(StreamEvent::Chunk(OutputChunk {
            stream: StreamKind::Stderr,
            data: b"oops\n".to_vec(),
        }))
        .unwrap();
        tx.send(StreamEvent::Finished(Ok(0))).unwrap();
        drop(tx);

        let mut lines = CommandStream::new(rx).lines();
        let mut seen = Vec::new();
        while let Some(event) = lines.next().await {
            match event {
                LineEvent::Line { stream, text } => seen.push((stream, text)),
                LineEvent::Finished(result) => {
                    assert_eq!(result.unwrap(), 0);
                }
            }
        }

        assert_eq!(
            seen,
            vec![
                (StreamKind::Stdout, "first".to_string()),
                (StreamKind::Stderr, "oops".to_string()),
                (StreamKind::Stdout, "sec".to_string()),
            ]
        );
    }
}
