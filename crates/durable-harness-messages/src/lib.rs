//! Synthetic inbound messages for durable function tests.
//!
//! Provides:
//! - `HttpRequestBuilder` - HTTP trigger requests with `Host`/`Content-Length` set
//! - `QueueMessage` - Queue message test double with every system property settable
//! - `SerializerSettings` - JSON payload settings shared with the host
//! - `FunctionArguments` - Named arguments passed to a trigger invocation

pub mod binding;
pub mod error;
pub mod http;
pub mod queue;
pub mod serializer;

pub use binding::{BindingValue, FunctionArguments};
pub use error::MessageError;
pub use http::{HttpRequest, HttpRequestBuilder, HttpResponse, create_http_request};
pub use queue::{QueueMessage, QueueMessageBuilder, SystemProperties};
pub use serializer::{
    DefaultSerializerSettingsFactory, MessageSerializerSettingsFactory, SerializerSettings,
    TypeNameHandling,
};
