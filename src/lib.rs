//! rs2-multipart - streaming multipart/form-data bodies
//!
//! [`CombinedStream`] drains an ordered queue of byte sources (literal
//! bytes, pending values, byte streams) as one backpressured stream.
//! [`MultipartEncoder`] frames form fields on top of it.

pub mod error;
pub mod stream_configuration;
pub mod source;
pub mod resolve;
pub mod combined_stream;
pub mod multipart;

pub use combined_stream::{CombineStats, CombinedStream, OutputState, StreamEvent};
pub use error::{MultipartError, MultipartResult, ValidationError};
pub use multipart::{AppendOptions, FieldName, MultipartEncoder};
pub use source::{body_channel, BodySender, ByteStream, FileObject, Source, SourceEvent, Value};
pub use stream_configuration::{EncoderConfig, FileDefaults};
