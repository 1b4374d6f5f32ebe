//! Backend response decoding and Messages response encoding.

pub mod collect;
pub mod decoder;
pub mod encoder;
pub mod event_stream;
mod tags;

pub use collect::collect_response;
pub use decoder::StreamDecoder;
pub use encoder::{encode_sse_frame, ResponseEncoder};
pub use event_stream::{decode_stream, DecodedStream};

use crate::pool::Credentials;

/// A typed event decoded from the backend response.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    ThinkingStart,
    ThinkingDelta {
        text: String,
    },
    ThinkingEnd,
    ContentDelta {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    /// The account's credentials were refreshed while serving this response.
    TokenRefreshed {
        credentials: Credentials,
    },
    Error {
        message: String,
    },
}
