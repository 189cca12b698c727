//! Sequential stream combinator
//!
//! [`CombinedStream`] linearizes an ordered queue of heterogeneous sources
//! into one pull-based byte stream. Sources are drained strictly in the order
//! they were appended: a pending source that settles late delays everything
//! behind it but is never overtaken. Nothing is read from a source unless the
//! consumer is polling, so at most one chunk is in flight at a time.

use bytes::Bytes;
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_core::stream::FusedStream;
use futures_core::Stream;
use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

use crate::error::{MultipartError, MultipartResult};
use crate::source::{
    classify, PendingValue, Source, SourceEvent, SourceStream, Value, DEFAULT_FILE_CHUNK_SIZE,
};

/// Terminal and non-terminal states of the output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputState {
    Open,
    /// Every source drained
    Ended,
    /// A source failed; the error is waiting to be delivered
    Errored,
    /// Cancelled, or the error has been delivered
    Destroyed,
}

/// Lifecycle signals observable through [`CombinedStream::subscribe`]
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    End,
    Error(MultipartError),
    /// Sent exactly once, after `End` or `Error` if either occurred
    Close,
}

/// Counters collected while draining
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CombineStats {
    pub sources_appended: u64,
    pub sources_completed: u64,
    pub sources_cancelled: u64,
    pub chunks_forwarded: u64,
    pub bytes_forwarded: u64,
}

enum Current {
    Idle,
    Resolving(PendingValue),
    Draining(SourceStream),
}

impl Current {
    fn is_idle(&self) -> bool {
        matches!(self, Current::Idle)
    }
}

/// Ordered multiplexer of byte sources
pub struct CombinedStream {
    queue: VecDeque<Source>,
    current: Current,
    state: OutputState,
    destroyed: bool,
    pending_error: Option<MultipartError>,
    file_chunk_size: usize,
    waker: Option<Waker>,
    listeners: Vec<UnboundedSender<StreamEvent>>,
    stats: CombineStats,
}

impl Default for CombinedStream {
    fn default() -> Self {
        Self::new()
    }
}

impl CombinedStream {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            current: Current::Idle,
            state: OutputState::Open,
            destroyed: false,
            pending_error: None,
            file_chunk_size: DEFAULT_FILE_CHUNK_SIZE,
            waker: None,
            listeners: Vec::new(),
            stats: CombineStats::default(),
        }
    }

    /// Read size for file sources classified by this combinator
    pub fn with_file_chunk_size(mut self, size: usize) -> Self {
        self.file_chunk_size = size.max(1);
        self
    }

    /// Classify `value` and queue the resulting sources
    pub fn append(&mut self, value: impl Into<Value>) -> &mut Self {
        if self.destroyed {
            return self;
        }
        for source in classify(value.into(), self.file_chunk_size) {
            self.push_source(source);
        }
        self
    }

    /// Classify and queue each value in order
    pub fn append_sources<I, V>(&mut self, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        for value in values {
            self.append(value);
        }
        self
    }

    /// Queue an already classified source
    pub fn push_source(&mut self, source: Source) -> &mut Self {
        if self.destroyed {
            return self;
        }
        self.stats.sources_appended += 1;
        self.queue.push_back(source);
        self
    }

    pub fn state(&self) -> OutputState {
        self.state
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Sources waiting behind the current one
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> &CombineStats {
        &self.stats
    }

    /// Receive `End`, `Error` and `Close` signals
    ///
    /// A receiver created after destruction is already closed.
    pub fn subscribe(&mut self) -> UnboundedReceiver<StreamEvent> {
        let (tx, rx) = unbounded();
        if !self.destroyed {
            self.listeners.push(tx);
        }
        rx
    }

    /// Stop draining and release every source
    ///
    /// The current source and everything still queued are dropped, which
    /// cancels them. An error, if given, becomes the next and last item of the
    /// stream. Only the first call has any effect.
    pub fn destroy(&mut self, error: Option<MultipartError>) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;

        let cancelled = self.queue.len() as u64 + u64::from(!self.current.is_idle());
        self.current = Current::Idle;
        self.queue.clear();
        self.stats.sources_cancelled += cancelled;

        match error {
            Some(err) => {
                log::debug!("Combined stream destroyed with error: {}", err);
                self.state = OutputState::Errored;
                self.emit(StreamEvent::Error(err.clone()));
                self.pending_error = Some(err);
            }
            None => {
                log::debug!("Combined stream destroyed, {} sources cancelled", cancelled);
                if self.state == OutputState::Open {
                    self.state = OutputState::Destroyed;
                }
            }
        }

        self.emit(StreamEvent::Close);
        self.listeners.clear();

        if let Some(waker) = self.waker.take() {
            waker.wake();
        }
    }

    fn emit(&mut self, event: StreamEvent) {
        self.listeners
            .retain(|listener| listener.unbounded_send(event.clone()).is_ok());
    }

    /// Graceful end of output
    fn finish(&mut self) {
        log::debug!(
            "Combined stream ended after {} bytes",
            self.stats.bytes_forwarded
        );
        self.state = OutputState::Ended;
        self.emit(StreamEvent::End);
        self.destroy(None);
    }

    fn forward(&mut self, chunk: Bytes) -> Poll<Option<MultipartResult<Bytes>>> {
        self.stats.chunks_forwarded += 1;
        self.stats.bytes_forwarded += chunk.len() as u64;
        Poll::Ready(Some(Ok(chunk)))
    }

    /// Put the sources a settled value classifies into at the queue head
    ///
    /// A value that classifies into nothing (`Null`, `Missing`, an empty
    /// list) adds no bytes and draining moves on to the next queued source
    /// instead of ending the output.
    fn reclassify(&mut self, value: Value) {
        for source in classify(value, self.file_chunk_size).into_iter().rev() {
            self.stats.sources_appended += 1;
            self.queue.push_front(source);
        }
    }
}

impl Stream for CombinedStream {
    type Item = MultipartResult<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        this.waker = None;

        // Each iteration either returns or advances to the next source, so a
        // long run of immediately settled pending values never recurses.
        loop {
            if let Some(err) = this.pending_error.take() {
                this.state = OutputState::Destroyed;
                return Poll::Ready(Some(Err(err)));
            }
            if this.destroyed {
                return Poll::Ready(None);
            }

            match &mut this.current {
                Current::Idle => match this.queue.pop_front() {
                    None => {
                        this.finish();
                        return Poll::Ready(None);
                    }
                    Some(Source::Bytes(chunk)) => {
                        this.stats.sources_completed += 1;
                        if !chunk.is_empty() {
                            return this.forward(chunk);
                        }
                    }
                    Some(Source::Pending(fut)) => this.current = Current::Resolving(fut),
                    Some(Source::Stream(stream)) => this.current = Current::Draining(stream),
                },
                Current::Resolving(fut) => match fut.as_mut().poll(cx) {
                    Poll::Pending => {
                        this.waker = Some(cx.waker().clone());
                        return Poll::Pending;
                    }
                    Poll::Ready(Ok(value)) => {
                        log::debug!("Pending source resolved to {:?}", value);
                        this.current = Current::Idle;
                        this.stats.sources_completed += 1;
                        this.reclassify(value);
                    }
                    Poll::Ready(Err(err)) => {
                        log::warn!("Pending source failed: {}", err);
                        this.current = Current::Idle;
                        this.destroy(Some(err));
                    }
                },
                Current::Draining(stream) => match stream.as_mut().poll_next(cx) {
                    Poll::Pending => {
                        this.waker = Some(cx.waker().clone());
                        return Poll::Pending;
                    }
                    Poll::Ready(Some(SourceEvent::Data(chunk))) => {
                        if !chunk.is_empty() {
                            return this.forward(chunk);
                        }
                    }
                    Poll::Ready(None) => {
                        this.current = Current::Idle;
                        this.stats.sources_completed += 1;
                    }
                    Poll::Ready(Some(SourceEvent::Closed)) => {
                        log::warn!("Source closed before it ended, ending output");
                        this.current = Current::Idle;
                        this.stats.sources_completed += 1;
                        this.finish();
                        return Poll::Ready(None);
                    }
                    Poll::Ready(Some(SourceEvent::Error(err))) => {
                        log::warn!("Stream source failed: {}", err);
                        this.current = Current::Idle;
                        this.destroy(Some(err));
                    }
                },
            }
        }
    }
}

impl FusedStream for CombinedStream {
    fn is_terminated(&self) -> bool {
        self.destroyed && self.pending_error.is_none()
    }
}

impl fmt::Debug for CombinedStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let current = match &self.current {
            Current::Idle => "idle",
            Current::Resolving(_) => "resolving",
            Current::Draining(_) => "draining",
        };
        f.debug_struct("CombinedStream")
            .field("queued", &self.queue.len())
            .field("current", &current)
            .field("state", &self.state)
            .field("destroyed", &self.destroyed)
            .finish()
    }
}
