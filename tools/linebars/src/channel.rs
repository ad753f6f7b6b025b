use crate::errors::LinebarsError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Poll {
    Message(String),
    /// Nothing arrived within the timeout; producers may still send.
    Empty,
    /// Every sender is gone and the buffer is drained.
    Disconnected,
}

/// Consumer side of the status channel.
pub trait MessageSource {
    fn poll(&mut self, timeout: Duration) -> Poll;
}

/// Orchestrator query: are all producers finished?
pub trait CompletionSignal {
    fn is_finished(&self) -> bool;
}

impl<F: Fn() -> bool> CompletionSignal for F {
    fn is_finished(&self) -> bool {
        self()
    }
}

/// Finished once the counter reaches zero; producers decrement as they return.
#[derive(Debug, Clone, Default)]
pub struct PendingCounter(Arc<AtomicUsize>);

impl PendingCounter {
    pub fn new(pending: usize) -> Self {
        Self(Arc::new(AtomicUsize::new(pending)))
    }

    pub fn done(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    pub fn pending(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl CompletionSignal for PendingCounter {
    fn is_finished(&self) -> bool {
        self.pending() == 0
    }
}

#[derive(Debug, Clone)]
enum SenderKind {
    Bounded(mpsc::Sender<String>),
    Unbounded(mpsc::UnboundedSender<String>),
}

/// Producer handle. Cheap to clone; one per worker.
#[derive(Debug, Clone)]
pub struct MessageSender {
    inner: SenderKind,
}

impl MessageSender {
    /// Send one status line. On a bounded channel this blocks while the buffer is full,
    /// so it must not be called from inside an async runtime.
    pub fn send(&self, line: impl Into<String>) -> Result<(), LinebarsError> {
        let line = line.into();
        match &self.inner {
            SenderKind::Bounded(tx) => tx
                .blocking_send(line)
                .map_err(|e| LinebarsError::Channel(e.to_string())),
            SenderKind::Unbounded(tx) => tx
                .send(line)
                .map_err(|e| LinebarsError::Channel(e.to_string())),
        }
    }

    /// Convenience for the `<identity>-><payload>` convention.
    pub fn send_to(&self, identity: &str, payload: &str) -> Result<(), LinebarsError> {
        self.send(format!("{identity}->{payload}"))
    }
}

enum ReceiverKind {
    Bounded(mpsc::Receiver<String>),
    Unbounded(mpsc::UnboundedReceiver<String>),
}

impl ReceiverKind {
    async fn recv(&mut self) -> Option<String> {
        match self {
            Self::Bounded(rx) => rx.recv().await,
            Self::Unbounded(rx) => rx.recv().await,
        }
    }

    fn try_recv(&mut self) -> Result<String, mpsc::error::TryRecvError> {
        match self {
            Self::Bounded(rx) => rx.try_recv(),
            Self::Unbounded(rx) => rx.try_recv(),
        }
    }
}

/// Receiving end of `message_channel`, polled with a timeout from a plain thread.
pub struct ChannelSource {
    rx: ReceiverKind,
    runtime: Runtime,
}

impl MessageSource for ChannelSource {
    fn poll(&mut self, timeout: Duration) -> Poll {
        match self.rx.try_recv() {
            Ok(line) => return Poll::Message(line),
            Err(mpsc::error::TryRecvError::Disconnected) => return Poll::Disconnected,
            Err(mpsc::error::TryRecvError::Empty) if timeout.is_zero() => return Poll::Empty,
            Err(mpsc::error::TryRecvError::Empty) => {}
        }
        let rx = &mut self.rx;
        match self
            .runtime
            .block_on(async { tokio::time::timeout(timeout, rx.recv()).await })
        {
            Ok(Some(line)) => Poll::Message(line),
            Ok(None) => Poll::Disconnected,
            Err(_) => Poll::Empty,
        }
    }
}

/// Multi-producer, single-consumer text channel. `capacity: None` is unbounded.
pub fn message_channel(
    capacity: Option<usize>,
) -> Result<(MessageSender, ChannelSource), LinebarsError> {
    let runtime = Builder::new_current_thread()
        .enable_time()
        .build()
        .map_err(|e| LinebarsError::Channel(e.to_string()))?;
    let (inner, rx) = match capacity {
        Some(0) => {
            return Err(LinebarsError::Configuration(
                "channel capacity must be greater than zero".to_string(),
            ))
        }
        Some(capacity) => {
            let (tx, rx) = mpsc::channel(capacity);
            (SenderKind::Bounded(tx), ReceiverKind::Bounded(rx))
        }
        None => {
            let (tx, rx) = mpsc::unbounded_channel();
            (SenderKind::Unbounded(tx), ReceiverKind::Unbounded(rx))
        }
    };
    Ok((MessageSender { inner }, ChannelSource { rx, runtime }))
}

/// In-memory source over a fixed script of lines; empty once exhausted.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSource {
    lines: std::collections::VecDeque<String>,
}

impl ScriptedSource {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }
}

impl MessageSource for ScriptedSource {
    fn poll(&mut self, _timeout: Duration) -> Poll {
        match self.lines.pop_front() {
            Some(line) => Poll::Message(line),
            None => Poll::Empty,
        }
    }
}
