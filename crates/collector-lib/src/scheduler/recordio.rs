//! Stream decoding for operator API responses
//!
//! Responses are either `application/recordio` framed (`<len>\n<payload>`
//! repeated) or a plain JSON body holding one or more concatenated messages.
//! Both are read to end of stream.

use crate::error::{CollectorError, Result};
use serde::de::DeserializeOwned;

pub const RECORDIO_CONTENT_TYPE: &str = "application/recordio";

/// Decode every message in `body` and return them in stream order
pub fn decode_all<T: DeserializeOwned>(content_type: Option<&str>, body: &[u8]) -> Result<Vec<T>> {
    let is_recordio = content_type
        .map(|ct| ct.trim().starts_with(RECORDIO_CONTENT_TYPE))
        .unwrap_or(false);

    if is_recordio {
        decode_frames(body)
    } else {
        serde_json::Deserializer::from_slice(body)
            .into_iter::<T>()
            .map(|m| m.map_err(CollectorError::from))
            .collect()
    }
}

/// Decode the stream and keep the last message, if any
pub fn decode_last<T: DeserializeOwned>(content_type: Option<&str>, body: &[u8]) -> Result<Option<T>> {
    Ok(decode_all(content_type, body)?.pop())
}

fn decode_frames<T: DeserializeOwned>(mut body: &[u8]) -> Result<Vec<T>> {
    let mut messages = Vec::new();

    loop {
        // Skip stray whitespace between frames
        while let Some((first, rest)) = body.split_first() {
            if first.is_ascii_whitespace() {
                body = rest;
            } else {
                break;
            }
        }
        if body.is_empty() {
            return Ok(messages);
        }

        let newline = body
            .iter()
            .position(|b| *b == b'\n')
            .ok_or_else(|| frame_error("missing record length terminator"))?;

        let len: usize = std::str::from_utf8(&body[..newline])
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .ok_or_else(|| frame_error("invalid record length"))?;

        let payload_start = newline + 1;
        let payload_end = payload_start
            .checked_add(len)
            .filter(|end| *end <= body.len())
            .ok_or_else(|| frame_error("truncated record"))?;

        messages.push(serde_json::from_slice(&body[payload_start..payload_end])?);
        body = &body[payload_end..];
    }
}

fn frame_error(message: &str) -> CollectorError {
    CollectorError::Protocol {
        expected: "recordio frame".to_string(),
        actual: message.to_string(),
    }
}
