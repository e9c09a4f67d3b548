// Request and result types exchanged with the transport front

use crate::Error;
use bytes::Bytes;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

/// HTTP methods
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    GET,
    POST,
    PUT,
    DELETE,
    PATCH,
    HEAD,
    OPTIONS,
}

impl HttpMethod {
    /// Parse a method name, ignoring case.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Some(HttpMethod::GET),
            "POST" => Some(HttpMethod::POST),
            "PUT" => Some(HttpMethod::PUT),
            "DELETE" => Some(HttpMethod::DELETE),
            "PATCH" => Some(HttpMethod::PATCH),
            "HEAD" => Some(HttpMethod::HEAD),
            "OPTIONS" => Some(HttpMethod::OPTIONS),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::GET => "GET",
            HttpMethod::POST => "POST",
            HttpMethod::PUT => "PUT",
            HttpMethod::DELETE => "DELETE",
            HttpMethod::PATCH => "PATCH",
            HttpMethod::HEAD => "HEAD",
            HttpMethod::OPTIONS => "OPTIONS",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request as delivered by the transport front.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub method: String,
    pub path: String,
    /// Raw query string, without the leading `?`.
    pub query: String,
    /// Header names are stored lowercase.
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl Request {
    /// Create a request; a query string embedded in `path` is split off.
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        let path = path.into();
        let (path, query) = match path.split_once('?') {
            Some((p, q)) => (p.to_string(), q.to_string()),
            None => (path, String::new()),
        };
        Self {
            method: method.into(),
            path,
            query,
            ..Default::default()
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    pub fn with_header(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(key.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// URL-encoded form body built from pairs.
    pub fn with_form(self, pairs: &[(&str, &str)]) -> Result<Self, Error> {
        let body = serde_urlencoded::to_string(pairs)
            .map_err(|e| Error::BadRequest(format!("Failed to encode form data: {}", e)))?;
        Ok(self
            .with_header("content-type", "application/x-www-form-urlencoded")
            .with_body(body))
    }

    /// Header lookup, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }
}

/// "Render template or redirect" instruction returned by an action.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct View {
    /// Absolute paths (leading `/`) redirect; relative ones name a template.
    pub path: String,
    pub model: Map<String, Value>,
}

impl View {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            model: Map::new(),
        }
    }

    /// Add a model entry.
    pub fn with(mut self, key: impl Into<String>, value: impl Serialize) -> Result<Self, Error> {
        self.model.insert(key.into(), serde_json::to_value(value)?);
        Ok(self)
    }
}

/// "Serialize as a data response" instruction returned by an action.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Data {
    pub model: Value,
}

impl Data {
    pub fn new(model: impl Serialize) -> Result<Self, Error> {
        Ok(Self {
            model: serde_json::to_value(model)?,
        })
    }
}

/// Value produced by a routed action.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionResult {
    View(View),
    Data(Data),
}

impl From<View> for ActionResult {
    fn from(view: View) -> Self {
        ActionResult::View(view)
    }
}

impl From<Data> for ActionResult {
    fn from(data: Data) -> Self {
        ActionResult::Data(data)
    }
}

/// Rendering instruction handed back to the transport front.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Redirect to an absolute location.
    Redirect { location: String },
    /// Forward to a template with the model as request attributes.
    Forward {
        template: String,
        model: Map<String, Value>,
    },
    /// `application/json` body.
    Json(Bytes),
    /// Nothing to write.
    Empty,
}

impl Outcome {
    pub fn is_empty(&self) -> bool {
        matches!(self, Outcome::Empty)
    }

    /// JSON body, if this is a data response.
    pub fn json_body(&self) -> Option<&[u8]> {
        match self {
            Outcome::Json(body) => Some(&body[..]),
            _ => None,
        }
    }
}
