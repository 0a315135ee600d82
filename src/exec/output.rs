// src/exec/output.rs

//! Output pump: drains the child's combined stdout/stderr pipe into the run
//! log and the log bus.
//!
//! The child writes both streams into one OS pipe, so the bytes arrive in
//! the order they were produced. A blocking thread reads the pipe in chunks
//! and hands them to the async side. Raw bytes go to the log file, flushed
//! per chunk. The bus receives the decoded text of the same chunk, with bare
//! `\n` turned into `\r\n`.

use std::io::{self, Read};

use anyhow::{Context, Result};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::warn;

use crate::bus::LogBus;

/// Upper bound on bytes read per chunk.
pub const CHUNK_SIZE: usize = 4096;

/// Incremental UTF-8 decoder that carries incomplete sequences across chunk
/// boundaries and normalizes newlines for terminal-style viewers.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    pending: Vec<u8>,
    last_was_cr: bool,
}

impl ChunkDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut text = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(s) => {
                    text.push_str(s);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(bad) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                        None => {
                            // Incomplete sequence at the end: wait for more.
                            self.pending.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }

        self.normalize(&text)
    }

    /// Flush whatever is left once the stream has ended.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        self.normalize(&rest)
    }

    fn normalize(&mut self, text: &str) -> String {
        let mut out = String::with_capacity(text.len() + 8);
        for c in text.chars() {
            if c == '\n' && !self.last_was_cr {
                out.push('\r');
            }
            out.push(c);
            self.last_was_cr = c == '\r';
        }
        out
    }
}

/// Sink for one task's output.
pub struct OutputSink<'a, W> {
    pub log: &'a mut W,
    pub bus: &'a LogBus,
    pub task_id: &'a str,
}

impl<W: AsyncWrite + Unpin> OutputSink<'_, W> {
    async fn deliver(&mut self, bytes: &[u8], decoder: &mut ChunkDecoder) -> Result<()> {
        self.log
            .write_all(bytes)
            .await
            .context("writing run log")?;
        self.log.flush().await.context("flushing run log")?;
        self.broadcast(decoder.push(bytes));
        Ok(())
    }

    fn broadcast(&self, text: String) {
        if !text.is_empty() {
            self.bus.emit(self.task_id, &text);
        }
    }
}

/// Chunks in flight between the reader thread and the writer.
const CHANNEL_DEPTH: usize = 64;

/// Drain `reader` until EOF, which happens once every copy of the pipe's
/// write end (the child and its descendants) is closed.
///
/// A read error ends the stream with a warning; a log write error aborts
/// the pump.
pub async fn pump_output<R, W>(reader: R, sink: &mut OutputSink<'_, W>) -> Result<()>
where
    R: Read + Send + 'static,
    W: AsyncWrite + Unpin,
{
    let (tx, mut rx) = mpsc::channel::<io::Result<Vec<u8>>>(CHANNEL_DEPTH);
    let reader_thread = tokio::task::spawn_blocking(move || read_chunks(reader, tx));

    let mut decoder = ChunkDecoder::default();
    while let Some(chunk) = rx.recv().await {
        match chunk {
            Ok(bytes) => sink.deliver(&bytes, &mut decoder).await?,
            Err(e) => {
                warn!(task_id = sink.task_id, error = %e, "output read failed");
                break;
            }
        }
    }
    sink.broadcast(decoder.finish());

    drop(rx);
    if let Err(e) = reader_thread.await {
        warn!(task_id = sink.task_id, error = %e, "output reader thread failed");
    }
    Ok(())
}

fn read_chunks<R: Read>(mut reader: R, tx: mpsc::Sender<io::Result<Vec<u8>>>) {
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let msg = match reader.read(&mut buf) {
            Ok(0) => return,
            Ok(n) => Ok(buf[..n].to_vec()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => Err(e),
        };
        let failed = msg.is_err();
        // The writer side is gone: nobody left to deliver to.
        if tx.blocking_send(msg).is_err() || failed {
            return;
        }
    }
}
