//! Defragments incoming data frames into complete messages, or streams
//! them chunk by chunk. This is the subtle heart of the coordinator: the
//! `message_complete`/`message_fetched` two-phase rendezvous must be
//! preserved exactly, or the result is either a deadlock (if the two events
//! are collapsed into one) or unbounded buffering (if the second event is
//! dropped).
//!
//! Grounded on the upstream Python `sync.messages.Assembler`, ported from
//! `threading.Lock`/`threading.Event` to `tokio::sync::Mutex` plus
//! [`crate::event::OneShotEvent`].

use crate::error::WsError;
use crate::event::OneShotEvent;
use crate::frame::{Frame, OpCode};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// A complete, reassembled application message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Text(String),
    Binary(Vec<u8>),
}

/// One frame's worth of already-decoded payload, buffered until the message
/// completes (or streamed directly, in streaming mode).
#[derive(Debug, Clone)]
enum Chunk {
    Text(String),
    Binary(Vec<u8>),
}

/// Strict incremental UTF-8 decoder: feeds frame payloads in order, carrying
/// any dangling multi-byte sequence across frame boundaries, and rejects
/// invalid sequences as soon as they're unambiguous.
#[derive(Debug, Default)]
struct IncrementalUtf8Decoder {
    pending: Vec<u8>,
}

impl IncrementalUtf8Decoder {
    fn feed(&mut self, data: &[u8], fin: bool) -> Result<String, WsError> {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(data);

        match std::str::from_utf8(&buf) {
            Ok(s) => Ok(s.to_string()),
            Err(e) => {
                let valid_up_to = e.valid_up_to();
                if e.error_len().is_some() {
                    // An unambiguous invalid sequence, not just a boundary cut.
                    return Err(WsError::InvalidUtf8);
                }
                if fin {
                    // Trailing bytes never completed a valid sequence.
                    return Err(WsError::InvalidUtf8);
                }
                let valid =
                    std::str::from_utf8(&buf[..valid_up_to]).unwrap().to_string();
                self.pending = buf[valid_up_to..].to_vec();
                Ok(valid)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Text,
    Binary,
}

struct Inner {
    get_in_progress: bool,
    put_in_progress: bool,
    mode: Option<Mode>,
    decoder: Option<IncrementalUtf8Decoder>,
    chunks: Vec<Chunk>,
    chunks_tx: Option<mpsc::UnboundedSender<Option<Chunk>>>,
    closed: bool,
}

impl Inner {
    fn new() -> Self {
        Self {
            get_in_progress: false,
            put_in_progress: false,
            mode: None,
            decoder: None,
            chunks: Vec::new(),
            chunks_tx: None,
            closed: false,
        }
    }
}

/// Lazily-yielded chunks of a message still being received. Produced by
/// [`Assembler::get_iter`].
pub struct ChunkStream<'a> {
    assembler: &'a Assembler,
    prefetched: std::vec::IntoIter<Chunk>,
    rx: mpsc::UnboundedReceiver<Option<Chunk>>,
    finished: bool,
}

impl<'a> ChunkStream<'a> {
    /// Yield the next chunk as `Message::Text`/`Message::Binary` (one chunk
    /// per underlying frame), or `None` once the message ends.
    pub async fn next(&mut self) -> Option<Message> {
        if let Some(chunk) = self.prefetched.next() {
            return Some(into_message(chunk));
        }
        if self.finished {
            return None;
        }
        match self.rx.recv().await {
            Some(Some(chunk)) => Some(into_message(chunk)),
            _ => {
                self.finished = true;
                self.assembler.finish_get_iter().await;
                None
            }
        }
    }
}

fn into_message(chunk: Chunk) -> Message {
    match chunk {
        Chunk::Text(s) => Message::Text(s),
        Chunk::Binary(b) => Message::Binary(b),
    }
}

/// Assembles frames into messages. Exactly one producer (the reader task)
/// calls [`Self::put`]; exactly one consumer calls [`Self::get`] or
/// [`Self::get_iter`] at a time.
pub struct Assembler {
    inner: Mutex<Inner>,
    message_complete: OneShotEvent,
    message_fetched: OneShotEvent,
}

impl Assembler {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
            message_complete: OneShotEvent::new(),
            message_fetched: OneShotEvent::new(),
        }
    }

    /// Add `frame` to the message currently being assembled.
    ///
    /// On the final frame (`fin = true`) this waits until the message has
    /// been fetched via [`Self::get`] or fully drained via
    /// [`Self::get_iter`], providing backpressure to the reader.
    pub async fn put(&self, frame: Frame) -> Result<(), WsError> {
        {
            let mut inner = self.inner.lock().await;
            if inner.closed {
                return Err(WsError::Eof);
            }
            if inner.put_in_progress {
                return Err(WsError::InvalidState("put is already running".into()));
            }

            match frame.opcode {
                OpCode::Text => {
                    if inner.mode.is_some() {
                        return Err(WsError::ProtocolError(
                            "new data frame arrived with a message already in progress".into(),
                        ));
                    }
                    inner.mode = Some(Mode::Text);
                    inner.decoder = Some(IncrementalUtf8Decoder::default());
                }
                OpCode::Binary => {
                    if inner.mode.is_some() {
                        return Err(WsError::ProtocolError(
                            "new data frame arrived with a message already in progress".into(),
                        ));
                    }
                    inner.mode = Some(Mode::Binary);
                    inner.decoder = None;
                }
                OpCode::Continuation => {
                    if inner.mode.is_none() {
                        return Err(WsError::ProtocolError(
                            "continuation frame with no message in progress".into(),
                        ));
                    }
                }
                _ => {
                    // Control frames never reach the assembler; the coordinator
                    // handles them before calling put(). Ignore defensively.
                    return Ok(());
                }
            }

            let chunk = match inner.mode {
                Some(Mode::Text) => {
                    let decoder = inner.decoder.as_mut().expect("text mode has a decoder");
                    Chunk::Text(decoder.feed(&frame.data, frame.fin)?)
                }
                Some(Mode::Binary) => Chunk::Binary(frame.data),
                None => unreachable!("mode is set above for every accepted opcode"),
            };

            if let Some(tx) = &inner.chunks_tx {
                let _ = tx.send(Some(chunk));
            } else {
                inner.chunks.push(chunk);
            }

            if !frame.fin {
                return Ok(());
            }

            self.message_complete.set();
            if let Some(tx) = &inner.chunks_tx {
                let _ = tx.send(None);
            }
            inner.put_in_progress = true;
        }

        self.message_fetched.wait().await;

        let mut inner = self.inner.lock().await;
        inner.put_in_progress = false;
        self.message_fetched.clear();
        inner.mode = None;
        inner.decoder = None;
        if inner.closed {
            return Err(WsError::Eof);
        }
        Ok(())
    }

    /// Read the next complete message, or `None` if `timeout` elapses
    /// first. New data opcodes arriving while a new opcode arrives mid
    /// message are the producer's concern, not this method's.
    pub async fn get(&self, timeout: Option<Duration>) -> Result<Option<Message>, WsError> {
        {
            let mut inner = self.inner.lock().await;
            if inner.closed {
                return Err(WsError::Eof);
            }
            if inner.get_in_progress {
                return Err(WsError::InvalidState(
                    "get or get_iter is already running".into(),
                ));
            }
            inner.get_in_progress = true;
        }

        let completed = match timeout {
            Some(d) => self.message_complete.wait_timeout(d).await,
            None => {
                self.message_complete.wait().await;
                true
            }
        };

        let mut inner = self.inner.lock().await;
        inner.get_in_progress = false;

        if !completed {
            return Ok(None);
        }
        if inner.closed {
            return Err(WsError::Eof);
        }

        self.message_complete.clear();
        let chunks = std::mem::take(&mut inner.chunks);
        let message = join_chunks(chunks);

        self.message_fetched.set();
        Ok(Some(message))
    }

    /// Stream the next message chunk by chunk, switching the assembler from
    /// buffering to rendezvous-channel mode for the remainder of the
    /// message if it isn't complete yet.
    pub async fn get_iter(&self) -> Result<ChunkStream<'_>, WsError> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(WsError::Eof);
        }
        if inner.get_in_progress {
            return Err(WsError::InvalidState(
                "get or get_iter is already running".into(),
            ));
        }

        let prefetched = std::mem::take(&mut inner.chunks);
        let (tx, rx) = mpsc::unbounded_channel();
        // If the message was already complete by the time get_iter() was
        // called, put() didn't send the sentinel (there was no channel yet);
        // send it ourselves so the consumer loop terminates.
        if self.message_complete.is_set() {
            let _ = tx.send(None);
        }
        inner.chunks_tx = Some(tx);
        inner.get_in_progress = true;

        Ok(ChunkStream {
            assembler: self,
            prefetched: prefetched.into_iter(),
            rx,
            finished: false,
        })
    }

    async fn finish_get_iter(&self) {
        let mut inner = self.inner.lock().await;
        inner.get_in_progress = false;
        inner.chunks_tx = None;
        self.message_complete.clear();
        if !inner.closed {
            self.message_fetched.set();
        }
    }

    /// End the stream of frames. Idempotent; safe to call concurrently with
    /// [`Self::put`], [`Self::get`], or a live [`ChunkStream`]. Unblocks any
    /// waiter, after which all three operations fail with
    /// [`WsError::Eof`].
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return;
        }
        inner.closed = true;

        if inner.get_in_progress {
            self.message_complete.set();
            if let Some(tx) = &inner.chunks_tx {
                let _ = tx.send(None);
            }
        }
        if inner.put_in_progress {
            self.message_fetched.set();
        }
    }
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

fn join_chunks(chunks: Vec<Chunk>) -> Message {
    if chunks.iter().any(|c| matches!(c, Chunk::Text(_))) {
        let mut s = String::new();
        for chunk in chunks {
            if let Chunk::Text(t) = chunk {
                s.push_str(&t);
            }
        }
        Message::Text(s)
    } else {
        let mut data = Vec::new();
        for chunk in chunks {
            if let Chunk::Binary(b) = chunk {
                data.extend_from_slice(&b);
            }
        }
        Message::Binary(data)
    }
}
