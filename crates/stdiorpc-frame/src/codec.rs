use bytes::{BufMut, BytesMut};

use crate::error::{FrameError, Result};
use crate::message::Message;

/// Line terminator on the wire.
pub const DELIMITER: u8 = b'\n';

/// Optional carriage return stripped before a line is decoded.
pub const CARRIAGE_RETURN: u8 = b'\r';

/// Decode one wire line (without its terminator) into a message.
///
/// Fails with [`FrameError::MalformedFrame`] when the text is not JSON or does
/// not match any JSON-RPC envelope. An empty line is malformed.
pub fn decode(line: &str) -> Result<Message> {
    let value: serde_json::Value = serde_json::from_str(line)
        .map_err(|err| FrameError::malformed(format!("invalid JSON: {err}")))?;
    Message::from_value(value)
}

/// Encode a message as compact JSON followed by exactly one `\n`.
///
/// JSON string escaping guarantees the output has no other newline. Fails
/// with [`FrameError::MalformedFrame`] for messages [`decode`] would reject,
/// such as scalar `params`.
pub fn encode(message: &Message) -> Result<String> {
    message.validate()?;
    let mut line = serde_json::to_string(message).map_err(FrameError::Encode)?;
    line.push(DELIMITER as char);
    Ok(line)
}

/// Append the wire line for `message` to `dst`.
pub fn encode_into(message: &Message, dst: &mut BytesMut) -> Result<()> {
    message.validate()?;
    serde_json::to_writer((&mut *dst).writer(), message).map_err(FrameError::Encode)?;
    dst.put_u8(DELIMITER);
    Ok(())
}

/// Turn raw line bytes (terminator already removed) into text.
///
/// One trailing `\r` is stripped. Invalid UTF-8 is replaced rather than
/// rejected; the JSON decoder reports whatever that leaves behind.
pub(crate) fn line_text(bytes: &[u8]) -> String {
    let bytes = match bytes.last() {
        Some(&CARRIAGE_RETURN) => &bytes[..bytes.len() - 1],
        _ => bytes,
    };
    String::from_utf8_lossy(bytes).into_owned()
}

/// Configuration for line framing.
#[derive(Debug, Clone, Default)]
pub struct FrameConfig {
    /// Maximum line length in bytes, excluding the terminator.
    ///
    /// `None` (the default) imposes no bound; growth of a line that never ends
    /// is then the caller's concern.
    pub max_line_length: Option<usize>,
}

impl FrameConfig {
    /// Config with a line length cap.
    pub fn with_max_line_length(max: usize) -> Self {
        Self {
            max_line_length: Some(max),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;
    use crate::message::{RequestId, INTERNAL_ERROR};

    #[test]
    fn ping_request_wire_bytes() {
        let line = encode(&Message::request(1, "ping", None)).unwrap();
        assert_eq!(line, "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n");
    }

    #[test]
    fn roundtrip_each_variant() {
        let messages = [
            Message::request("abc", "tools/call", Some(json!({"name": "echo", "arguments": {}}))),
            Message::notification("notifications/progress", Some(json!({"progress": 0.5}))),
            Message::response(9, json!({"tools": []})),
            Message::error(
                Some(RequestId::Number(9)),
                INTERNAL_ERROR,
                "boom",
                Some(json!({"trace": [1, 2]})),
            ),
            Message::error(None, INTERNAL_ERROR, "no id", None),
        ];

        for message in messages {
            let line = encode(&message).unwrap();
            assert!(line.ends_with('\n'));
            let decoded = decode(line.trim_end_matches('\n')).unwrap();
            assert_eq!(decoded, message);
        }
    }

    #[test]
    fn roundtrip_keeps_explicit_null_members() {
        let messages = [
            Message::request(1, "x", Some(Value::Null)),
            Message::notification("x", Some(Value::Null)),
            Message::error(Some(RequestId::Number(2)), INTERNAL_ERROR, "boom", Some(Value::Null)),
            Message::response(3, Value::Null),
        ];

        for message in messages {
            let line = encode(&message).unwrap();
            assert!(line.contains("null"), "{line}");
            assert_eq!(decode(line.trim_end()).unwrap(), message);
        }
    }

    #[test]
    fn absent_params_stay_absent() {
        let decoded = decode("{\"jsonrpc\":\"2.0\",\"method\":\"x\"}").unwrap();
        assert_eq!(decoded, Message::notification("x", None));
    }

    #[test]
    fn scalar_params_rejected_on_both_sides() {
        let message = Message::notification("x", Some(json!(3)));
        assert!(matches!(
            encode(&message),
            Err(FrameError::MalformedFrame { .. })
        ));
        let mut dst = BytesMut::new();
        assert!(matches!(
            encode_into(&Message::request(1, "x", Some(json!("s"))), &mut dst),
            Err(FrameError::MalformedFrame { .. })
        ));
        assert!(dst.is_empty());
        assert!(matches!(
            decode("{\"jsonrpc\":\"2.0\",\"method\":\"x\",\"params\":3}"),
            Err(FrameError::MalformedFrame { .. })
        ));
    }

    #[test]
    fn embedded_newlines_are_escaped() {
        let message = Message::notification("log", Some(json!({"text": "line one\nline two\r\n"})));
        let line = encode(&message).unwrap();
        assert_eq!(line.matches('\n').count(), 1);
        assert_eq!(decode(line.trim_end()).unwrap(), message);
    }

    #[test]
    fn encode_into_appends() {
        let mut dst = BytesMut::from(&b"prefix"[..]);
        encode_into(&Message::notification("ping", None), &mut dst).unwrap();
        assert_eq!(
            dst.as_ref(),
            b"prefix{\"jsonrpc\":\"2.0\",\"method\":\"ping\"}\n".as_ref()
        );
    }

    #[test]
    fn decode_rejects_invalid_json_and_empty_lines() {
        assert!(matches!(
            decode("not json"),
            Err(FrameError::MalformedFrame { .. })
        ));
        assert!(matches!(decode(""), Err(FrameError::MalformedFrame { .. })));
    }

    #[test]
    fn line_text_strips_single_carriage_return() {
        assert_eq!(line_text(b"{}\r"), "{}");
        assert_eq!(line_text(b"{}\r\r"), "{}\r");
        assert_eq!(line_text(b""), "");
        assert_eq!(line_text(b"\xff"), "\u{fffd}");
    }
}
