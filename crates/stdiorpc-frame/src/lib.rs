//! Newline-delimited JSON-RPC framing for child-process stdio.
//!
//! Every message on the wire is one line of UTF-8 text:
//! - compact JSON for a single JSON-RPC 2.0 envelope
//! - terminated by `\n`, optionally preceded by `\r`
//!
//! [`LineBuffer`] reassembles lines from arbitrarily split byte chunks;
//! [`decode`]/[`encode`] convert between lines and [`Message`] values.

pub mod buffer;
pub mod codec;
pub mod error;
#[cfg(feature = "async")]
pub mod line_codec;
pub mod message;

pub use buffer::{LineBuffer, Messages};
pub use codec::{decode, encode, encode_into, FrameConfig, DELIMITER};
pub use error::{FrameError, Result};
#[cfg(feature = "async")]
pub use line_codec::LineCodec;
pub use message::{
    ErrorObject, ErrorResponse, Message, Notification, Request, RequestId, Response, Version,
    INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, JSONRPC_VERSION, METHOD_NOT_FOUND,
    PARSE_ERROR,
};
