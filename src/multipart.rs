//! multipart/form-data encoder
//!
//! Entries are only staged by [`MultipartEncoder::append`]. The first poll,
//! [`MultipartEncoder::stream`] or [`MultipartEncoder::buffer`] expands them,
//! in append order, into framed sources on the owned [`CombinedStream`] and
//! appends the closing boundary.

use bytes::{Bytes, BytesMut};
use futures::channel::mpsc::UnboundedReceiver;
use futures_core::stream::FusedStream;
use futures_core::Stream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::combined_stream::{CombineStats, CombinedStream, StreamEvent};
use crate::error::{MultipartError, MultipartResult, ValidationError};
use crate::resolve::{generate_boundary, resolve_content_type, resolve_filename};
use crate::source::{format_number, Source, Value};
use crate::stream_configuration::EncoderConfig;

const CRLF: &str = "\r\n";

/// Per-entry overrides
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendOptions {
    /// Filename or path; only its basename is used
    pub filename: Option<String>,
    pub content_type: Option<String>,
}

impl AppendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Name of a form field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldName {
    Text(String),
    Integer(i64),
    Float(f64),
}

impl FieldName {
    /// Empty strings, zero and NaN are rejected
    pub fn is_valid(&self) -> bool {
        match self {
            FieldName::Text(name) => !name.is_empty(),
            FieldName::Integer(n) => *n != 0,
            FieldName::Float(n) => *n != 0.0 && !n.is_nan(),
        }
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldName::Text(name) => f.write_str(name),
            FieldName::Integer(n) => write!(f, "{}", n),
            FieldName::Float(n) => f.write_str(&format_number(*n)),
        }
    }
}

impl From<&str> for FieldName {
    fn from(name: &str) -> Self {
        FieldName::Text(name.to_string())
    }
}

impl From<String> for FieldName {
    fn from(name: String) -> Self {
        FieldName::Text(name)
    }
}

impl From<&String> for FieldName {
    fn from(name: &String) -> Self {
        FieldName::Text(name.clone())
    }
}

impl From<i32> for FieldName {
    fn from(n: i32) -> Self {
        FieldName::Integer(n as i64)
    }
}

impl From<i64> for FieldName {
    fn from(n: i64) -> Self {
        FieldName::Integer(n)
    }
}

impl From<u32> for FieldName {
    fn from(n: u32) -> Self {
        FieldName::Integer(n as i64)
    }
}

impl From<usize> for FieldName {
    fn from(n: usize) -> Self {
        match i64::try_from(n) {
            Ok(n) => FieldName::Integer(n),
            Err(_) => FieldName::Text(n.to_string()),
        }
    }
}

impl From<f64> for FieldName {
    fn from(n: f64) -> Self {
        FieldName::Float(n)
    }
}

#[derive(Debug)]
struct Entry {
    field: FieldName,
    value: Value,
    options: AppendOptions,
}

/// Streaming multipart/form-data body
///
/// The encoder is itself a `Stream` of body chunks, so it can be handed to
/// any HTTP client that accepts a byte stream body.
///
/// ```
/// use rs2_multipart::{AppendOptions, MultipartEncoder};
///
/// # async fn example() -> rs2_multipart::MultipartResult<()> {
/// let mut form = MultipartEncoder::new();
/// form.append("name", "rs2", AppendOptions::default())?;
/// form.append("logo", vec![0u8, 1, 2], AppendOptions::new().filename("logo.bin"))?;
///
/// let body = form.buffer().await?;
/// assert_eq!(form.get_length(), body.len() as u64);
/// # Ok(())
/// # }
/// ```
pub struct MultipartEncoder {
    inner: CombinedStream,
    config: EncoderConfig,
    boundary: String,
    stack: Vec<Entry>,
    length: u64,
    started: bool,
    ended: bool,
    polled: bool,
}

impl Default for MultipartEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl MultipartEncoder {
    pub fn new() -> Self {
        Self::with_config(EncoderConfig::default())
    }

    pub fn with_config(config: EncoderConfig) -> Self {
        let boundary = match &config.boundary {
            Some(boundary) if !boundary.is_empty() => boundary.clone(),
            _ => generate_boundary(&config.boundary_prefix),
        };

        Self {
            inner: CombinedStream::new().with_file_chunk_size(config.file_chunk_size),
            config,
            boundary,
            stack: Vec::new(),
            length: 0,
            started: false,
            ended: false,
            polled: false,
        }
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Stage a field
    ///
    /// Lists stage one entry per element with the same options, and an empty
    /// list stages an empty string. Booleans and null are staged as `1`/`0`.
    /// Nothing is staged when an error is returned.
    pub fn append(
        &mut self,
        field: impl Into<FieldName>,
        value: impl Into<Value>,
        options: AppendOptions,
    ) -> MultipartResult<&mut Self> {
        let field = field.into();
        if !field.is_valid() {
            return Err(ValidationError::InvalidField.into());
        }
        let value = value.into();
        check_value(&value)?;
        if self.started {
            return Err(MultipartError::AlreadyStarted);
        }

        self.stage(field, value, options);
        Ok(self)
    }

    fn stage(&mut self, field: FieldName, value: Value, options: AppendOptions) {
        let value = match value {
            Value::List(items) if items.is_empty() => Value::Text(String::new()),
            Value::List(items) => {
                for item in items {
                    self.stage(field.clone(), item, options.clone());
                }
                return;
            }
            Value::Bool(b) => Value::Integer(i64::from(b)),
            Value::Null => Value::Integer(0),
            other => other,
        };

        self.stack.push(Entry {
            field,
            value,
            options,
        });
    }

    /// Entries staged and not yet expanded
    pub fn staged(&self) -> usize {
        self.stack.len()
    }

    /// Expand the staged entries; repeated calls are no-ops
    pub fn stream(&mut self) -> &mut Self {
        self.init();
        self
    }

    fn init(&mut self) {
        if self.started || self.ended {
            return;
        }
        self.started = true;

        let entries = std::mem::take(&mut self.stack);
        log::debug!("Expanding {} multipart entries", entries.len());
        for entry in entries {
            self.generate(entry);
        }

        let closing = format!("--{}--{}", self.boundary, CRLF);
        self.inner.push_source(Source::from(closing));
        self.ended = true;
    }

    fn generate(&mut self, entry: Entry) {
        let Entry {
            field,
            mut value,
            options,
        } = entry;

        let mut head = format!(
            "--{}{}Content-Disposition: form-data; name=\"{}\"",
            self.boundary, CRLF, field
        );

        if value.is_file_like() {
            let mut filename = options.filename;
            if let Value::Object(object) = value {
                if filename.is_none() {
                    filename = Some(object.basename);
                }
                value = *object.contents;
            }

            let defaults = &self.config.defaults;
            let file = resolve_filename(filename.as_deref(), value.path(), defaults);
            let content_type = resolve_content_type(options.content_type.as_deref(), defaults);
            head.push_str(&format!("; filename=\"{}\"{}", file, CRLF));
            head.push_str(&format!("Content-Type: {}{}", content_type, CRLF));
        } else {
            head.push_str(CRLF);
        }
        head.push_str(CRLF);

        self.inner.push_source(Source::from(head));
        self.inner.append(value);
        self.inner.push_source(Source::from(CRLF));
    }

    /// Collect the whole body and record its length
    ///
    /// Only a body nobody has read yet can be buffered: a second call, or a
    /// call after chunks were polled, fails with `Consumed` and leaves the
    /// recorded length alone. A body destroyed without an error fails with
    /// `Cancelled`.
    pub async fn buffer(&mut self) -> MultipartResult<Bytes> {
        if self.polled {
            return Err(MultipartError::Consumed);
        }
        if self.inner.is_terminated() {
            return Err(MultipartError::Cancelled);
        }
        self.init();
        self.polled = true;

        let mut body = BytesMut::new();
        while let Some(chunk) = self.inner.next().await {
            body.extend_from_slice(&chunk?);
        }

        let body = body.freeze();
        self.length = body.len() as u64;
        Ok(body)
    }

    /// Length recorded by the last completed `buffer()`, `0` before that
    pub fn get_length(&self) -> u64 {
        self.length
    }

    pub fn get_boundary(&self) -> &str {
        &self.boundary
    }

    /// Request headers for this body
    ///
    /// `chunked` selects `transfer-encoding: chunked`; otherwise
    /// `content-length` is taken from [`MultipartEncoder::get_length`].
    pub fn get_headers(&self, chunked: bool) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        headers.insert(
            "content-type".to_string(),
            format!("multipart/form-data; boundary=\"{}\"", self.boundary),
        );
        if chunked {
            headers.insert("transfer-encoding".to_string(), "chunked".to_string());
        } else {
            headers.insert("content-length".to_string(), self.get_length().to_string());
        }
        headers
    }

    pub fn destroy(&mut self, error: Option<MultipartError>) {
        self.inner.destroy(error);
    }

    pub fn subscribe(&mut self) -> UnboundedReceiver<StreamEvent> {
        self.inner.subscribe()
    }

    pub fn stats(&self) -> &CombineStats {
        self.inner.stats()
    }
}

fn check_value(value: &Value) -> Result<(), ValidationError> {
    match value {
        Value::Missing => Err(ValidationError::MissingValue),
        Value::List(items) => items.iter().try_for_each(check_value),
        _ => Ok(()),
    }
}

impl Stream for MultipartEncoder {
    type Item = MultipartResult<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        this.init();
        this.polled = true;
        Pin::new(&mut this.inner).poll_next(cx)
    }
}

impl FusedStream for MultipartEncoder {
    fn is_terminated(&self) -> bool {
        self.inner.is_terminated()
    }
}

impl fmt::Debug for MultipartEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultipartEncoder")
            .field("boundary", &self.boundary)
            .field("staged", &self.stack.len())
            .field("started", &self.started)
            .field("ended", &self.ended)
            .field("polled", &self.polled)
            .field("inner", &self.inner)
            .finish()
    }
}
