//! Request parameter binding.
//!
//! [`ParamBinder`] turns the raw data of a [`Request`] into a [`Param`] bag:
//! query-string pairs first, then the URL-encoded body or, for multipart
//! submissions, the form fields and uploaded files. Values stay strings until
//! a typed accessor parses them.

use crate::multipart::MultipartParser;
use crate::{Error, Request};
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, trace, warn};
use trellis_config::AppConfig;

/// Readable body of an uploaded file.
pub type FileStream = Box<dyn AsyncRead + Send + Unpin>;

/// Parameters bound from one request.
#[derive(Debug, Default)]
pub struct Param {
    fields: Vec<(String, String)>,
    files: Vec<FileParam>,
}

impl Param {
    pub fn new(fields: Vec<(String, String)>, files: Vec<FileParam>) -> Self {
        Self { fields, files }
    }

    /// Bag holding only form fields.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self::new(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            Vec::new(),
        )
    }

    /// No fields and no files.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.files.is_empty()
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Every value for `name`, in submission order.
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Parse the first value for `name`.
    pub fn get_parsed<T: FromStr>(&self, name: &str) -> Result<Option<T>, Error> {
        self.parse_with(name, std::any::type_name::<T>(), |v| v.parse().ok())
    }

    pub fn get_long(&self, name: &str) -> Result<Option<i64>, Error> {
        self.parse_with(name, "i64", |v| v.parse().ok())
    }

    pub fn get_int(&self, name: &str) -> Result<Option<i32>, Error> {
        self.parse_with(name, "i32", |v| v.parse().ok())
    }

    pub fn get_double(&self, name: &str) -> Result<Option<f64>, Error> {
        self.parse_with(name, "f64", |v| v.parse().ok())
    }

    /// Accepts `true`/`false`, `1`/`0`, `on`/`off`, `yes`/`no`.
    pub fn get_bool(&self, name: &str) -> Result<Option<bool>, Error> {
        self.parse_with(name, "bool", |v| match v.to_ascii_lowercase().as_str() {
            "true" | "1" | "on" | "yes" => Some(true),
            "false" | "0" | "off" | "no" => Some(false),
            _ => None,
        })
    }

    fn parse_with<T>(
        &self,
        name: &str,
        expected: &'static str,
        parse: impl FnOnce(&str) -> Option<T>,
    ) -> Result<Option<T>, Error> {
        match self.get(name) {
            None => Ok(None),
            Some(raw) => parse(raw.trim())
                .map(Some)
                .ok_or_else(|| Error::type_mismatch(name, expected, raw)),
        }
    }

    /// Fields as a JSON object of strings; for repeated names the last value wins.
    pub fn field_map(&self) -> Map<String, Value> {
        self.fields
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect()
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    /// First uploaded file for `field_name`.
    pub fn file(&self, field_name: &str) -> Option<&FileParam> {
        self.files.iter().find(|f| f.field_name == field_name)
    }

    pub fn files(&self) -> &[FileParam] {
        &self.files
    }
}

/// Uploaded file
pub struct FileParam {
    /// Form field the file was submitted under.
    pub field_name: String,
    /// Final path component of the submitted file name.
    pub file_name: String,
    pub size: u64,
    pub content_type: String,
    stream: Mutex<Option<FileStream>>,
}

impl FileParam {
    /// File backed by an in-memory body.
    pub fn new(
        field_name: impl Into<String>,
        file_name: &str,
        content_type: impl Into<String>,
        data: Bytes,
    ) -> Self {
        let size = data.len() as u64;
        Self::from_reader(
            field_name,
            file_name,
            size,
            content_type,
            Box::new(std::io::Cursor::new(data)),
        )
    }

    /// File backed by an arbitrary reader.
    pub fn from_reader(
        field_name: impl Into<String>,
        file_name: &str,
        size: u64,
        content_type: impl Into<String>,
        stream: FileStream,
    ) -> Self {
        Self {
            field_name: field_name.into(),
            file_name: real_file_name(file_name).to_string(),
            size,
            content_type: content_type.into(),
            stream: Mutex::new(Some(stream)),
        }
    }

    /// Get file extension
    pub fn extension(&self) -> Option<&str> {
        self.file_name.rsplit_once('.').map(|(_, ext)| ext)
    }

    /// Check if file is an image
    pub fn is_image(&self) -> bool {
        self.content_type.starts_with("image/")
    }

    /// Whether the stream is still unread.
    pub fn is_available(&self) -> bool {
        self.stream.lock().is_some()
    }

    /// Take the stream; it can be taken once.
    pub fn take_stream(&self) -> Result<FileStream, Error> {
        self.stream
            .lock()
            .take()
            .ok_or_else(|| Error::StreamConsumed(self.field_name.clone()))
    }

    /// Read the whole stream.
    pub async fn read_to_end(&self) -> Result<Vec<u8>, Error> {
        let mut stream = self.take_stream()?;
        let mut buf = Vec::with_capacity(self.size as usize);
        stream
            .read_to_end(&mut buf)
            .await
            .map_err(|e| Error::Internal(format!("Failed to read upload: {}", e)))?;
        Ok(buf)
    }

    /// Write the stream to `dir/<file_name>`, creating `dir` when missing.
    pub async fn save_to(&self, dir: impl AsRef<Path>) -> Result<PathBuf, Error> {
        let mut stream = self.take_stream()?;
        let dir = dir.as_ref();
        let path = dir.join(&self.file_name);

        let write = async {
            tokio::fs::create_dir_all(dir).await?;
            let mut file = tokio::fs::File::create(&path).await?;
            tokio::io::copy(&mut stream, &mut file).await
        };
        let written = write.await.map_err(|e| {
            warn!(path = %path.display(), error = %e, "upload file failure");
            Error::Internal(format!("Failed to save file: {}", e))
        })?;

        debug!(path = %path.display(), bytes = written, "Saved uploaded file");
        Ok(path)
    }
}

impl fmt::Debug for FileParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileParam")
            .field("field_name", &self.field_name)
            .field("file_name", &self.file_name)
            .field("size", &self.size)
            .field("content_type", &self.content_type)
            .field("available", &self.is_available())
            .finish()
    }
}

fn real_file_name(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

/// Builds a [`Param`] from a request.
#[derive(Debug, Clone, Default)]
pub struct ParamBinder {
    upload_limit: Option<u64>,
}

impl ParamBinder {
    /// `upload_limit` caps the size of each uploaded file, in bytes.
    pub fn new(upload_limit: Option<u64>) -> Self {
        Self { upload_limit }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.upload_limit_bytes())
    }

    pub fn bind(&self, request: &Request) -> Result<Param, Error> {
        let mut fields = parse_pairs(request.query.as_bytes())?;
        let content_type = request.content_type().unwrap_or_default();

        let param = if is_multipart(content_type) {
            self.bind_multipart(request, content_type, fields)?
        } else {
            if !request.body.is_empty() && is_form(content_type) {
                fields.extend(parse_pairs(&request.body)?);
            }
            Param::new(fields, Vec::new())
        };

        trace!(
            fields = param.fields.len(),
            files = param.files.len(),
            "Bound request parameters"
        );
        Ok(param)
    }

    fn bind_multipart(
        &self,
        request: &Request,
        content_type: &str,
        mut fields: Vec<(String, String)>,
    ) -> Result<Param, Error> {
        let parser = MultipartParser::from_content_type(content_type)?;
        let mut files = Vec::new();

        for part in parser.parse(&request.body)? {
            let Some(filename) = part.filename else {
                fields.push((part.name, String::from_utf8_lossy(&part.data).into_owned()));
                continue;
            };

            if real_file_name(&filename).is_empty() {
                continue;
            }
            if let Some(limit) = self.upload_limit
                && part.data.len() as u64 > limit
            {
                return Err(Error::PayloadTooLarge(format!(
                    "file `{}` is {} bytes, limit is {}",
                    filename,
                    part.data.len(),
                    limit
                )));
            }

            let content_type = part
                .content_type
                .unwrap_or_else(|| "application/octet-stream".to_string());
            files.push(FileParam::new(part.name, &filename, content_type, part.data));
        }

        Ok(Param::new(fields, files))
    }
}

fn is_multipart(content_type: &str) -> bool {
    content_type
        .get(..10)
        .is_some_and(|p| p.eq_ignore_ascii_case("multipart/"))
}

fn is_form(content_type: &str) -> bool {
    content_type.is_empty()
        || content_type
            .split(';')
            .next()
            .is_some_and(|m| m.trim().eq_ignore_ascii_case("application/x-www-form-urlencoded"))
}

fn parse_pairs(bytes: &[u8]) -> Result<Vec<(String, String)>, Error> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    serde_urlencoded::from_bytes(bytes)
        .map_err(|e| Error::BadRequest(format!("Failed to parse form data: {}", e)))
}
