//! Input values and the sources they classify into
//!
//! A [`Value`] is anything that can be appended to a multipart body. The
//! combinator never sees values directly: each one is classified once into
//! zero or more [`Source`]s, and every resolved pending value is classified
//! again when it settles.

use async_stream::stream;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures_util::{stream::BoxStream, FutureExt, StreamExt, TryFutureExt};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::{MultipartError, MultipartResult};

/// A boxed stream of body chunks supplied by the caller
pub type ByteStream = BoxStream<'static, MultipartResult<Bytes>>;

/// A value that is not known yet
pub type PendingValue = BoxFuture<'static, MultipartResult<Value>>;

/// An outbound request whose response body is file-like content
pub type PendingResponse = BoxFuture<'static, MultipartResult<ByteStream>>;

/// Read size used when a path is classified outside of an encoder
pub const DEFAULT_FILE_CHUNK_SIZE: usize = 64 * 1024;

/// Signals a draining source can raise besides "ended" (`None`)
#[derive(Debug)]
pub enum SourceEvent {
    Data(Bytes),
    /// The source shut down without reaching its end
    Closed,
    Error(MultipartError),
}

/// Stream form every draining source is adapted to
pub type SourceStream = BoxStream<'static, SourceEvent>;

/// One queued unit of the combinator
pub enum Source {
    /// Forwarded as one indivisible chunk
    Bytes(Bytes),
    /// Resolved before anything behind it is read
    Pending(PendingValue),
    /// Drained until it ends
    Stream(SourceStream),
}

impl Source {
    pub fn kind(&self) -> &'static str {
        match self {
            Source::Bytes(_) => "bytes",
            Source::Pending(_) => "pending",
            Source::Stream(_) => "stream",
        }
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            other => f.write_str(other.kind()),
        }
    }
}

impl From<Bytes> for Source {
    fn from(bytes: Bytes) -> Self {
        Source::Bytes(bytes)
    }
}

impl From<&'static str> for Source {
    fn from(text: &'static str) -> Self {
        Source::Bytes(Bytes::from_static(text.as_bytes()))
    }
}

impl From<String> for Source {
    fn from(text: String) -> Self {
        Source::Bytes(Bytes::from(text))
    }
}

/// A file-object wrapper: a basename plus the content it stands for
#[derive(Debug)]
pub struct FileObject {
    pub basename: String,
    pub contents: Box<Value>,
}

impl FileObject {
    pub fn new(basename: impl Into<String>, contents: impl Into<Value>) -> Self {
        Self {
            basename: basename.into(),
            contents: Box::new(contents.into()),
        }
    }
}

/// Anything that can be appended to a multipart body
pub enum Value {
    /// The missing-value sentinel, rejected by `append`
    Missing,
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Bytes(Bytes),
    /// Expanded into one entry per element
    List(Vec<Value>),
    /// Byte stream, optionally carrying the path it reads
    Stream {
        stream: SourceStream,
        path: Option<PathBuf>,
    },
    /// A file opened lazily when its turn comes
    File(PathBuf),
    Pending(PendingValue),
    Response(PendingResponse),
    Object(FileObject),
}

impl Value {
    pub fn stream<S>(stream: S) -> Self
    where
        S: futures_core::Stream<Item = MultipartResult<Bytes>> + Send + 'static,
    {
        Value::Stream {
            stream: adapt_stream(stream.boxed()),
            path: None,
        }
    }

    /// A stream reading from `path`; the path only feeds the filename
    pub fn stream_with_path<S>(stream: S, path: impl Into<PathBuf>) -> Self
    where
        S: futures_core::Stream<Item = MultipartResult<Bytes>> + Send + 'static,
    {
        Value::Stream {
            stream: adapt_stream(stream.boxed()),
            path: Some(path.into()),
        }
    }

    pub fn list<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        Value::List(items.into_iter().map(Into::into).collect())
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Value::File(path.into())
    }

    pub fn pending<F>(fut: F) -> Self
    where
        F: Future<Output = MultipartResult<Value>> + Send + 'static,
    {
        Value::Pending(fut.boxed())
    }

    pub fn response<F>(fut: F) -> Self
    where
        F: Future<Output = MultipartResult<ByteStream>> + Send + 'static,
    {
        Value::Response(fut.boxed())
    }

    /// Binary data, streams, pending responses and file objects get a filename
    pub fn is_file_like(&self) -> bool {
        matches!(
            self,
            Value::Bytes(_)
                | Value::Stream { .. }
                | Value::File(_)
                | Value::Response(_)
                | Value::Object(_)
        )
    }

    /// Path the value reads from, if it knows one
    pub fn path(&self) -> Option<&Path> {
        match self {
            Value::Stream { path, .. } => path.as_deref(),
            Value::File(path) => Some(path),
            _ => None,
        }
    }

    /// Classify with the default file read size
    pub fn into_sources(self) -> Vec<Source> {
        classify(self, DEFAULT_FILE_CHUNK_SIZE)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Missing => f.write_str("Missing"),
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Value::Integer(n) => f.debug_tuple("Integer").field(n).finish(),
            Value::Float(n) => f.debug_tuple("Float").field(n).finish(),
            Value::Text(s) => f.debug_tuple("Text").field(s).finish(),
            Value::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Value::List(items) => f.debug_list().entries(items).finish(),
            Value::Stream { path, .. } => f.debug_struct("Stream").field("path", path).finish(),
            Value::File(path) => f.debug_tuple("File").field(path).finish(),
            Value::Pending(_) => f.write_str("Pending"),
            Value::Response(_) => f.write_str("Response"),
            Value::Object(obj) => f.debug_tuple("Object").field(obj).finish(),
        }
    }
}

/// Classify a value into the sources the combinator drains
///
/// `Missing` and `Null` produce nothing, scalars and text become a single
/// byte chunk, lists classify element by element, file objects unwrap to
/// their contents. Paths are opened only once the combinator reaches them.
/// An empty result is valid: if a settled pending value classifies into
/// nothing, the combinator skips it and keeps draining.
pub fn classify(value: Value, file_chunk_size: usize) -> Vec<Source> {
    let mut out = Vec::new();
    let mut stack = vec![value];

    // Depth-first, reversed pushes keep list order
    while let Some(value) = stack.pop() {
        match value {
            Value::Missing | Value::Null => {}
            Value::Bool(b) => out.push(Source::Bytes(Bytes::from(if b { "1" } else { "0" }))),
            Value::Integer(n) => out.push(Source::Bytes(Bytes::from(n.to_string()))),
            Value::Float(n) => out.push(Source::Bytes(Bytes::from(format_number(n)))),
            Value::Text(s) => out.push(Source::Bytes(Bytes::from(s))),
            Value::Bytes(b) => out.push(Source::Bytes(b)),
            Value::List(items) => stack.extend(items.into_iter().rev()),
            Value::Stream { stream, .. } => out.push(Source::Stream(stream)),
            Value::File(path) => out.push(Source::Stream(read_file(path, file_chunk_size))),
            Value::Pending(fut) => out.push(Source::Pending(fut)),
            Value::Response(fut) => out.push(Source::Pending(
                fut.map_ok(|stream| Value::Stream {
                    stream: adapt_stream(stream),
                    path: None,
                })
                .boxed(),
            )),
            Value::Object(obj) => stack.push(*obj.contents),
        }
    }

    out
}

/// Render a float the way form values are conventionally written
pub(crate) fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else {
        n.to_string()
    }
}

fn adapt_stream(stream: ByteStream) -> SourceStream {
    stream
        .map(|item| match item {
            Ok(chunk) => SourceEvent::Data(chunk),
            Err(e) => SourceEvent::Error(e),
        })
        .boxed()
}

fn read_file(path: PathBuf, chunk_size: usize) -> SourceStream {
    let chunk_size = chunk_size.max(1);
    stream! {
        let mut file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) => {
                log::warn!("Failed to open {:?}: {}", path, e);
                yield SourceEvent::Error(e.into());
                return;
            }
        };

        loop {
            let mut buffer = vec![0u8; chunk_size];
            match file.read(&mut buffer).await {
                Ok(0) => break,
                Ok(bytes_read) => {
                    buffer.truncate(bytes_read);
                    yield SourceEvent::Data(Bytes::from(buffer));
                }
                Err(e) => {
                    log::warn!("Error reading {:?}: {}", path, e);
                    yield SourceEvent::Error(e.into());
                    return;
                }
            }
        }
    }
    .boxed()
}

enum ChannelMessage {
    Data(Bytes),
    Finish,
    Abort(MultipartError),
}

/// Producer half of [`body_channel`]
///
/// Dropping it without calling [`BodySender::finish`] closes the source
/// without ending it.
#[derive(Debug, Clone)]
pub struct BodySender {
    tx: mpsc::Sender<ChannelMessage>,
}

impl fmt::Debug for ChannelMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelMessage::Data(b) => f.debug_tuple("Data").field(&b.len()).finish(),
            ChannelMessage::Finish => f.write_str("Finish"),
            ChannelMessage::Abort(e) => f.debug_tuple("Abort").field(e).finish(),
        }
    }
}

impl BodySender {
    /// Send one chunk, waiting while the channel is full
    pub async fn send(&self, chunk: impl Into<Bytes>) -> MultipartResult<()> {
        self.tx
            .send(ChannelMessage::Data(chunk.into()))
            .await
            .map_err(|_| MultipartError::Cancelled)
    }

    /// End the source normally
    pub async fn finish(self) {
        let _ = self.tx.send(ChannelMessage::Finish).await;
    }

    /// Fail the source, which fails the whole body
    pub async fn abort(self, err: MultipartError) {
        let _ = self.tx.send(ChannelMessage::Abort(err)).await;
    }

    /// True once the body dropped the receiving side
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A bounded channel whose receiving side is a stream value
pub fn body_channel(capacity: usize) -> (BodySender, Value) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let mut messages = ReceiverStream::new(rx);

    let events = stream! {
        while let Some(message) = messages.next().await {
            match message {
                ChannelMessage::Data(chunk) => yield SourceEvent::Data(chunk),
                ChannelMessage::Finish => return,
                ChannelMessage::Abort(e) => {
                    yield SourceEvent::Error(e);
                    return;
                }
            }
        }
        yield SourceEvent::Closed;
    };

    let value = Value::Stream {
        stream: events.boxed(),
        path: None,
    };
    (BodySender { tx }, value)
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::Text(text.to_string())
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Value::Text(text)
    }
}

impl From<Bytes> for Value {
    fn from(bytes: Bytes) -> Self {
        Value::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Bytes(Bytes::from(bytes))
    }
}

impl From<&'static [u8]> for Value {
    fn from(bytes: &'static [u8]) -> Self {
        Value::Bytes(Bytes::from_static(bytes))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(n as i64)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Integer(n as i64)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        match i64::try_from(n) {
            Ok(n) => Value::Integer(n),
            Err(_) => Value::Text(n.to_string()),
        }
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::from(n as u64)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<FileObject> for Value {
    fn from(obj: FileObject) -> Self {
        Value::Object(obj)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Missing)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => match n.as_f64() {
                    Some(f) => Value::Float(f),
                    None => Value::Text(n.to_string()),
                },
            },
            serde_json::Value::String(s) => Value::Text(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            object @ serde_json::Value::Object(_) => Value::Text(object.to_string()),
        }
    }
}
