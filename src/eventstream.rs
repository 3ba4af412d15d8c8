//! Decoder for the `application/vnd.amazon.eventstream` framing used by
//! Bedrock's streaming responses.
//!
//! Each frame is a 12-byte prelude (total length, headers length, prelude CRC),
//! a block of typed headers, the payload and a trailing message CRC. Checksums
//! are read but not verified; the transport is TLS.

const PRELUDE_LEN: usize = 12;
const TRAILER_LEN: usize = 4;
const MIN_FRAME_LEN: usize = PRELUDE_LEN + TRAILER_LEN;
// Service-side limit is 16 MiB per message.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid frame length {total} (headers {headers})")]
    FrameLength { total: usize, headers: usize },
    #[error("header block overruns its declared length")]
    HeaderOverrun,
    #[error("unknown header value type {0}")]
    UnknownHeaderType(u8),
    #[error("header is not valid UTF-8")]
    InvalidUtf8,
    #[error("stream ended inside a frame ({0} bytes left over)")]
    Truncated(usize),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HeaderValue {
    Bool(bool),
    Byte(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Bytes(Vec<u8>),
    String(String),
    Timestamp(i64),
    Uuid([u8; 16]),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub headers: Vec<(String, HeaderValue)>,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.iter().find_map(|(key, value)| match value {
            HeaderValue::String(text) if key == name => Some(text.as_str()),
            _ => None,
        })
    }

    /// `:message-type`, `event` for ordinary chunks.
    pub fn message_type(&self) -> Option<&str> {
        self.header_str(":message-type")
    }

    pub fn event_type(&self) -> Option<&str> {
        self.header_str(":event-type")
    }

    pub fn exception_type(&self) -> Option<&str> {
        self.header_str(":exception-type")
    }
}

/// Incremental decoder: feed arbitrary byte chunks, pull whole messages.
#[derive(Debug, Default)]
pub struct Decoder {
    buf: Vec<u8>,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Returns `Ok(None)` until a full frame has been buffered.
    pub fn next_message(&mut self) -> Result<Option<Message>, DecodeError> {
        if self.buf.len() < PRELUDE_LEN {
            return Ok(None);
        }

        let total = read_u32(&self.buf[0..4]) as usize;
        let headers_len = read_u32(&self.buf[4..8]) as usize;
        if !(MIN_FRAME_LEN..=MAX_FRAME_LEN).contains(&total)
            || headers_len > total - MIN_FRAME_LEN
        {
            return Err(DecodeError::FrameLength {
                total,
                headers: headers_len,
            });
        }
        if self.buf.len() < total {
            return Ok(None);
        }

        let frame: Vec<u8> = self.buf.drain(..total).collect();
        let headers_end = PRELUDE_LEN + headers_len;
        let headers = parse_headers(&frame[PRELUDE_LEN..headers_end])?;
        let payload = frame[headers_end..total - TRAILER_LEN].to_vec();

        Ok(Some(Message { headers, payload }))
    }

    /// Call once the byte stream is exhausted.
    pub fn finish(&self) -> Result<(), DecodeError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(DecodeError::Truncated(self.buf.len()))
        }
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos.checked_add(len).ok_or(DecodeError::HeaderOverrun)?;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or(DecodeError::HeaderOverrun)?;
        self.pos = end;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn take_string(&mut self, len: usize) -> Result<String, DecodeError> {
        String::from_utf8(self.take(len)?.to_vec()).map_err(|_| DecodeError::InvalidUtf8)
    }
}

fn parse_headers(bytes: &[u8]) -> Result<Vec<(String, HeaderValue)>, DecodeError> {
    let mut cursor = Cursor { bytes, pos: 0 };
    let mut headers = Vec::new();

    while cursor.pos < bytes.len() {
        let name_len = cursor.take(1)?[0] as usize;
        let name = cursor.take_string(name_len)?;
        let kind = cursor.take(1)?[0];
        let value = match kind {
            0 => HeaderValue::Bool(true),
            1 => HeaderValue::Bool(false),
            2 => HeaderValue::Byte(i8::from_be_bytes(cursor.take_array()?)),
            3 => HeaderValue::Int16(i16::from_be_bytes(cursor.take_array()?)),
            4 => HeaderValue::Int32(i32::from_be_bytes(cursor.take_array()?)),
            5 => HeaderValue::Int64(i64::from_be_bytes(cursor.take_array()?)),
            6 => {
                let len = u16::from_be_bytes(cursor.take_array()?) as usize;
                HeaderValue::Bytes(cursor.take(len)?.to_vec())
            }
            7 => {
                let len = u16::from_be_bytes(cursor.take_array()?) as usize;
                HeaderValue::String(cursor.take_string(len)?)
            }
            8 => HeaderValue::Timestamp(i64::from_be_bytes(cursor.take_array()?)),
            9 => HeaderValue::Uuid(cursor.take_array()?),
            other => return Err(DecodeError::UnknownHeaderType(other)),
        };
        headers.push((name, value));
    }

    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(headers: &[(&str, &str)], payload: &[u8]) -> Vec<u8> {
        let mut header_block = Vec::new();
        for (name, value) in headers {
            header_block.push(name.len() as u8);
            header_block.extend_from_slice(name.as_bytes());
            header_block.push(7);
            header_block.extend_from_slice(&(value.len() as u16).to_be_bytes());
            header_block.extend_from_slice(value.as_bytes());
        }
        let total = MIN_FRAME_LEN + header_block.len() + payload.len();
        let mut out = Vec::new();
        out.extend_from_slice(&(total as u32).to_be_bytes());
        out.extend_from_slice(&(header_block.len() as u32).to_be_bytes());
        out.extend_from_slice(&[0; 4]);
        out.extend_from_slice(&header_block);
        out.extend_from_slice(payload);
        out.extend_from_slice(&[0; 4]);
        out
    }

    #[test]
    fn decodes_frames_split_across_pushes() {
        let mut bytes = frame(
            &[(":message-type", "event"), (":event-type", "chunk")],
            br#"{"bytes":"e30="}"#,
        );
        bytes.extend(frame(&[(":message-type", "event")], b"second"));

        let mut decoder = Decoder::new();
        let (head, tail) = bytes.split_at(7);
        decoder.push(head);
        assert_eq!(decoder.next_message().unwrap(), None);

        decoder.push(tail);
        let first = decoder.next_message().unwrap().unwrap();
        assert_eq!(first.message_type(), Some("event"));
        assert_eq!(first.event_type(), Some("chunk"));
        assert_eq!(first.payload, br#"{"bytes":"e30="}"#);

        let second = decoder.next_message().unwrap().unwrap();
        assert_eq!(second.payload, b"second");
        assert_eq!(decoder.next_message().unwrap(), None);
        assert!(decoder.finish().is_ok());
    }

    #[test]
    fn exposes_exception_type() {
        let mut decoder = Decoder::new();
        decoder.push(&frame(
            &[
                (":message-type", "exception"),
                (":exception-type", "throttlingException"),
            ],
            br#"{"message":"slow down"}"#,
        ));
        let message = decoder.next_message().unwrap().unwrap();
        assert_eq!(message.exception_type(), Some("throttlingException"));
    }

    #[test]
    fn rejects_impossible_lengths() {
        let mut decoder = Decoder::new();
        decoder.push(&[0, 0, 0, 4, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert!(matches!(
            decoder.next_message(),
            Err(DecodeError::FrameLength { total: 4, .. })
        ));
    }

    #[test]
    fn rejects_unknown_header_types() {
        let mut bytes = frame(&[("a", "b")], b"");
        // value type byte sits after the prelude, name length and name
        bytes[PRELUDE_LEN + 2] = 42;
        let mut decoder = Decoder::new();
        decoder.push(&bytes);
        assert_eq!(
            decoder.next_message(),
            Err(DecodeError::UnknownHeaderType(42))
        );
    }

    #[test]
    fn leftover_bytes_are_reported() {
        let mut decoder = Decoder::new();
        decoder.push(&[0, 0]);
        assert_eq!(decoder.next_message().unwrap(), None);
        assert_eq!(decoder.finish(), Err(DecodeError::Truncated(2)));
    }
}
