//! `multipart/form-data` decomposition

use crate::Error;
use bytes::Bytes;
use memchr::memmem;

/// One decoded part.
#[derive(Debug, Clone)]
pub struct Part {
    pub name: String,
    /// Present for file parts, possibly empty.
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// Multipart form data parser
pub struct MultipartParser {
    boundary: String,
}

impl MultipartParser {
    /// Create a new multipart parser from Content-Type header
    pub fn from_content_type(content_type: &str) -> Result<Self, Error> {
        // "multipart/form-data; boundary=----WebKitFormBoundary7MA4YWxkTrZu0gW"
        let boundary = content_type
            .split(';')
            .find_map(|part| {
                part.trim()
                    .strip_prefix("boundary=")
                    .map(|b| b.trim_matches('"').to_string())
            })
            .filter(|b| !b.is_empty())
            .ok_or_else(|| Error::BadRequest("Missing boundary in Content-Type".to_string()))?;

        Ok(Self { boundary })
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Split `body` into parts. Part bodies are slices of `body`, not copies.
    ///
    /// The body must end with the closing `--boundary--` delimiter. Anything
    /// after it is ignored.
    pub fn parse(&self, body: &Bytes) -> Result<Vec<Part>, Error> {
        let delimiter = format!("--{}", self.boundary);
        let mut positions: Vec<usize> = memmem::find_iter(body, delimiter.as_bytes()).collect();
        if positions.is_empty() {
            return Err(Error::BadRequest("Multipart body has no boundary".to_string()));
        }

        let closing = positions
            .iter()
            .position(|&at| body[at + delimiter.len()..].starts_with(b"--"))
            .ok_or_else(|| Error::BadRequest("Multipart body is truncated".to_string()))?;
        positions.truncate(closing + 1);

        let mut parts = Vec::with_capacity(positions.len().saturating_sub(1));
        for window in positions.windows(2) {
            let start = skip_line_break(body, window[0] + delimiter.len());
            let end = trim_line_break(body, start, window[1]);
            if start >= end {
                continue;
            }
            parts.push(self.parse_part(body, start, end)?);
        }

        Ok(parts)
    }

    fn parse_part(&self, body: &Bytes, start: usize, end: usize) -> Result<Part, Error> {
        let segment = &body[start..end];
        let (header_len, separator_len) = match memmem::find(segment, b"\r\n\r\n") {
            Some(i) => (i, 4),
            None => memmem::find(segment, b"\n\n")
                .map(|i| (i, 2))
                .ok_or_else(|| Error::BadRequest("Malformed multipart part".to_string()))?,
        };

        let headers = String::from_utf8_lossy(&segment[..header_len]);
        let mut name = None;
        let mut filename = None;
        let mut content_type = None;

        for line in headers.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            if key.trim().eq_ignore_ascii_case("content-disposition") {
                for attr in value.split(';').map(str::trim) {
                    if let Some(v) = attr.strip_prefix("name=") {
                        name = Some(v.trim_matches('"').to_string());
                    } else if let Some(v) = attr.strip_prefix("filename=") {
                        filename = Some(v.trim_matches('"').to_string());
                    }
                }
            } else if key.trim().eq_ignore_ascii_case("content-type") {
                content_type = Some(value.trim().to_string());
            }
        }

        let name = name.ok_or_else(|| Error::BadRequest("Missing field name".to_string()))?;
        let data_start = (start + header_len + separator_len).min(end);

        Ok(Part {
            name,
            filename,
            content_type,
            data: body.slice(data_start..end),
        })
    }
}

fn skip_line_break(body: &[u8], mut at: usize) -> usize {
    if body.get(at) == Some(&b'\r') {
        at += 1;
    }
    if body.get(at) == Some(&b'\n') {
        at += 1;
    }
    at
}

fn trim_line_break(body: &[u8], start: usize, mut end: usize) -> usize {
    if end > start && body[end - 1] == b'\n' {
        end -= 1;
        if end > start && body[end - 1] == b'\r' {
            end -= 1;
        }
    }
    end
}
