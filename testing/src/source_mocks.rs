//! In-memory broker doubles.
//!
//! - [`InMemorySource`]: a queue-backed [`MessageSource`] tests push into
//! - [`InMemorySink`]: a [`MessageSink`] that records every write
//!
//! Both are cheap to clone; clones share state, so a test can hand one clone
//! to the code under test and keep another to drive or inspect it.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use user_service_core::source::SourceFuture;
use user_service_core::{Context, Message, MessageSink, MessageSource, SourceError};

type Item = Result<Message, SourceError>;

/// Queue-backed message source.
///
/// `read` waits for the next pushed item, the context, or a close, whichever
/// comes first. After `close`, every read fails with [`SourceError::Closed`].
///
/// # Example
///
/// ```
/// use user_service_core::{Context, Message, MessageSource};
/// use user_service_testing::InMemorySource;
///
/// # #[tokio::main]
/// # async fn main() {
/// let source = InMemorySource::new();
/// source.push(Message::new("user-1", "{}"));
///
/// let msg = source.read(&Context::background()).await.unwrap();
/// assert_eq!(msg.key, b"user-1");
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct InMemorySource {
    inner: Arc<SourceInner>,
}

#[derive(Debug)]
struct SourceInner {
    tx: mpsc::UnboundedSender<Item>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Item>>,
    closed: CancellationToken,
    close_delay: Mutex<Option<Duration>>,
    reads: AtomicUsize,
    closes: AtomicUsize,
}

impl InMemorySource {
    /// Create an empty, open source.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(SourceInner {
                tx,
                rx: tokio::sync::Mutex::new(rx),
                closed: CancellationToken::new(),
                close_delay: Mutex::new(None),
                reads: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
            }),
        }
    }

    /// Make `close` block for `delay` before closing.
    #[must_use]
    pub fn with_close_delay(self, delay: Duration) -> Self {
        *self.inner.close_delay.lock().unwrap() = Some(delay);
        self
    }

    /// Queue a message for a future read.
    pub fn push(&self, message: Message) {
        let _ = self.inner.tx.send(Ok(message));
    }

    /// Queue a read error for a future read.
    pub fn push_error(&self, error: SourceError) {
        let _ = self.inner.tx.send(Err(error));
    }

    /// Number of reads started so far.
    #[must_use]
    pub fn reads(&self) -> usize {
        self.inner.reads.load(Ordering::SeqCst)
    }

    /// Number of times `close` was called.
    #[must_use]
    pub fn close_calls(&self) -> usize {
        self.inner.closes.load(Ordering::SeqCst)
    }

    /// Whether the source has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }
}

impl Default for InMemorySource {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageSource for InMemorySource {
    fn read<'a>(&'a self, ctx: &'a Context) -> SourceFuture<'a, Message> {
        Box::pin(async move {
            self.inner.reads.fetch_add(1, Ordering::SeqCst);
            if self.inner.closed.is_cancelled() {
                return Err(SourceError::Closed);
            }

            let mut rx = self.inner.rx.lock().await;
            tokio::select! {
                biased;
                () = self.inner.closed.cancelled() => Err(SourceError::Closed),
                reason = ctx.done() => Err(reason.into()),
                item = rx.recv() => item.unwrap_or(Err(SourceError::Closed)),
            }
        })
    }

    fn close(&self) -> Result<(), SourceError> {
        self.inner.closes.fetch_add(1, Ordering::SeqCst);
        let delay = *self.inner.close_delay.lock().unwrap();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        self.inner.closed.cancel();
        Ok(())
    }
}

/// Message sink that records every accepted write.
#[derive(Clone, Debug, Default)]
pub struct InMemorySink {
    topic: Arc<str>,
    written: Arc<Mutex<Vec<Message>>>,
    closed: CancellationToken,
}

impl InMemorySink {
    /// Create an open sink for `topic`.
    #[must_use]
    pub fn new(topic: &str) -> Self {
        Self {
            topic: Arc::from(topic),
            ..Self::default()
        }
    }

    /// Messages written so far, in write order.
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.written.lock().unwrap().clone()
    }

    /// Whether the sink has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

impl MessageSink for InMemorySink {
    fn write<'a>(&'a self, ctx: &'a Context, message: Message) -> SourceFuture<'a, ()> {
        Box::pin(async move {
            if self.closed.is_cancelled() {
                return Err(SourceError::Closed);
            }
            if let Some(reason) = ctx.err() {
                return Err(reason.into());
            }
            let message = message.with_position(&*self.topic, 0, -1);
            self.written.lock().unwrap().push(message);
            Ok(())
        })
    }

    fn close(&self) -> Result<(), SourceError> {
        self.closed.cancel();
        Ok(())
    }
}
