use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

pub const CRLF: &[u8] = b"\r\n";
pub const END: &str = "END";
pub const VALUE: &str = "VALUE";

/// Longest reply line accepted before the stream is treated as corrupt.
pub const MAX_LINE_LENGTH: usize = 4096;

/// Largest value a GET reply may announce; memcached cannot be configured past 1 GiB items.
pub const MAX_VALUE_LENGTH: usize = 1024 * 1024 * 1024;

/// Commands this client sends. Only the two memcached verbs the load generator needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Get { key: String },
    Set { key: String, value: Bytes },
}

/// Memcached text protocol: encodes requests and splits replies into lines.
///
/// Format:
/// - GET: `get <key>\r\n`
/// - SET: `set <key> 0 0 <length>\r\n<value>\r\n`
///
/// Reply lines end with `\n`, optionally preceded by `\r`, and are capped at
/// [`MAX_LINE_LENGTH`]. Value payloads are not lines; callers take them off the buffer with
/// [`drain`] right after the `VALUE` header was decoded.
#[derive(Debug, Clone)]
pub struct TextCodec {
    lines: LinesCodec,
}

impl TextCodec {
    pub fn new() -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(MAX_LINE_LENGTH),
        }
    }
}

impl Default for TextCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder<Request> for TextCodec {
    type Error = io::Error;

    fn encode(&mut self, request: Request, dst: &mut BytesMut) -> io::Result<()> {
        match request {
            Request::Get { key } => {
                dst.reserve(key.len() + 6);
                dst.put_slice(b"get ");
                dst.put_slice(key.as_bytes());
                dst.put_slice(CRLF);
            }
            Request::Set { key, value } => {
                let length = value.len().to_string();
                dst.reserve(key.len() + length.len() + value.len() + 14);
                dst.put_slice(b"set ");
                dst.put_slice(key.as_bytes());
                dst.put_slice(b" 0 0 ");
                dst.put_slice(length.as_bytes());
                dst.put_slice(CRLF);
                dst.put_slice(&value);
                dst.put_slice(CRLF);
            }
        }
        Ok(())
    }
}

impl Decoder for TextCodec {
    type Item = String;
    type Error = LinesCodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, LinesCodecError> {
        self.lines.decode(src)
    }
}

/// First line of a GET reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetLine {
    /// Terminator only: a miss
    End,
    /// `VALUE <key> <flags> <length>`, payload follows
    Value { length: usize },
}

impl GetLine {
    pub fn parse(line: &str) -> Result<Self, String> {
        if line == END {
            return Ok(GetLine::End);
        }
        if !line.starts_with(VALUE) {
            return Err(format!("expected END or VALUE, got {line:?}"));
        }

        // key and flags are not checked; only the declared length matters
        let length = line
            .split_ascii_whitespace()
            .nth(3)
            .and_then(|field| field.parse::<usize>().ok())
            .ok_or_else(|| format!("malformed VALUE header {line:?}"))?;

        if length > MAX_VALUE_LENGTH {
            return Err(format!("VALUE length {length} exceeds {MAX_VALUE_LENGTH}"));
        }

        Ok(GetLine::Value { length })
    }
}

/// Discards `len` bytes if that many are buffered.
pub fn drain(buf: &mut BytesMut, len: usize) -> bool {
    if buf.len() < len {
        return false;
    }
    buf.advance(len);
    true
}
