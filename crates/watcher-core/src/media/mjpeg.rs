use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use tracing::{debug, info};
use url::Url;

use crate::media::{DegradedTransport, RenderSink, RenderTarget, TransportError};

const DEFAULT_BOUNDARY: &str = "frame";
const MAX_BUFFERED: usize = 8 * 1024 * 1024;

/// Incremental parser for `multipart/x-mixed-replace` JPEG streams.
#[derive(Debug)]
pub struct MjpegParser {
    delimiter: Vec<u8>,
    buf: BytesMut,
}

impl MjpegParser {
    pub fn new(boundary: &str) -> Self {
        let boundary = boundary.trim_start_matches("--");
        Self {
            delimiter: format!("--{boundary}").into_bytes(),
            buf: BytesMut::new(),
        }
    }

    /// Extracts the `boundary` parameter from a `Content-Type` header value.
    pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
        content_type.split(';').skip(1).find_map(|param| {
            let (name, value) = param.split_once('=')?;
            if !name.trim().eq_ignore_ascii_case("boundary") {
                return None;
            }
            let value = value.trim().trim_matches('"');
            (!value.is_empty()).then(|| value.to_string())
        })
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Returns the next complete JPEG part, or `None` until more bytes
    /// arrive.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>, TransportError> {
        let Some(start) = find(&self.buf, &self.delimiter, 0) else {
            return self.check_capacity();
        };

        let after_delimiter = start + self.delimiter.len();
        if self.buf.len() < after_delimiter + 2 {
            return Ok(None);
        }
        if &self.buf[after_delimiter..after_delimiter + 2] == b"--" {
            return Err(TransportError::Ended);
        }

        let Some(headers_end) = find(&self.buf, b"\r\n\r\n", after_delimiter) else {
            return self.check_capacity();
        };
        let body_start = headers_end + 4;
        let headers = String::from_utf8_lossy(&self.buf[after_delimiter..headers_end]);
        let content_length = parse_content_length(&headers)?;

        let body_len = match content_length {
            Some(len) => {
                let body_end = body_start
                    .checked_add(len)
                    .filter(|_| len <= MAX_BUFFERED)
                    .ok_or_else(|| {
                        TransportError::Malformed(format!("content-length {len} too large"))
                    })?;
                if self.buf.len() < body_end {
                    return self.check_capacity();
                }
                len
            }
            None => {
                let Some(next) = find(&self.buf, &self.delimiter, body_start) else {
                    return self.check_capacity();
                };
                let mut end = next;
                if end >= body_start + 2 && &self.buf[end - 2..end] == b"\r\n" {
                    end -= 2;
                }
                end - body_start
            }
        };

        self.buf.advance(body_start);
        let frame = self.buf.split_to(body_len).freeze();
        Ok(Some(frame))
    }

    fn check_capacity(&self) -> Result<Option<Bytes>, TransportError> {
        if self.buf.len() > MAX_BUFFERED {
            return Err(TransportError::Malformed(format!(
                "no complete part within {} buffered bytes",
                self.buf.len()
            )));
        }
        Ok(None)
    }
}

fn parse_content_length(headers: &str) -> Result<Option<usize>, TransportError> {
    for line in headers.lines() {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if name.trim().eq_ignore_ascii_case("content-length") {
            let len = value
                .trim()
                .parse::<usize>()
                .map_err(|err| TransportError::Malformed(format!("content-length: {err}")))?;
            return Ok(Some(len));
        }
    }
    Ok(None)
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}

/// Pulls `/api/stream/mjpeg` and publishes every JPEG part as the current
/// render target.
pub struct MjpegTransport {
    http: Client,
    url: Url,
    sequence: u64,
}

impl MjpegTransport {
    pub fn new(url: Url) -> Self {
        Self {
            http: Client::new(),
            url,
            sequence: 0,
        }
    }

    pub fn frames_received(&self) -> u64 {
        self.sequence
    }
}

#[async_trait]
impl DegradedTransport for MjpegTransport {
    async fn pull(&mut self, render: RenderSink) -> Result<(), TransportError> {
        let response = self
            .http
            .get(self.url.clone())
            .send()
            .await
            .map_err(|err| TransportError::Http(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("unknown").to_string(),
            });
        }

        let boundary = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(MjpegParser::boundary_from_content_type)
            .unwrap_or_else(|| DEFAULT_BOUNDARY.to_string());
        info!(url = %self.url, %boundary, "MJPEG fallback streaming");

        let mut parser = MjpegParser::new(&boundary);
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|err| TransportError::Http(err.to_string()))?;
            parser.push(&chunk);
            while let Some(jpeg) = parser.next_frame()? {
                self.sequence += 1;
                render.send_replace(RenderTarget::MjpegFrame {
                    sequence: self.sequence,
                    jpeg,
                });
            }
        }

        debug!(frames = self.sequence, "MJPEG body ended");
        Err(TransportError::Ended)
    }
}
