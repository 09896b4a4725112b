use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

use crate::endpoint::Endpoint;
use crate::options::RequestContext;

/// Characters that must be escaped within a path segment, beyond the
/// control-character baseline: the segment separator itself plus the
/// handful of characters that are otherwise valid in a URL path but would
/// change the parse if left raw.
const SEGMENT: &AsciiSet = &CONTROLS.add(b'/').add(b'?').add(b'#').add(b'%');

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
        }
    }
}

/// An immutable (method, path, query, headers, body, options) tuple.
///
/// Built with [`RequestBuilder`]; path segments are percent-encoded at
/// construction time so callers never have to think about escaping, and
/// database-prefixing remains the job of the (out of scope) domain
/// wrappers that build the segment list.
#[derive(Clone, Debug)]
pub struct Request {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    body: Option<serde_json::Value>,
    context: RequestContext,
}

impl Request {
    pub fn builder(method: Method) -> RequestBuilder {
        RequestBuilder::new(method)
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body(&self) -> Option<&serde_json::Value> {
        self.body.as_ref()
    }

    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

pub struct RequestBuilder {
    method: Method,
    segments: Vec<String>,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    body: Option<serde_json::Value>,
    context: RequestContext,
}

impl RequestBuilder {
    fn new(method: Method) -> Self {
        Self {
            method,
            segments: Vec::new(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            context: RequestContext::default(),
        }
    }

    pub fn segment(mut self, segment: impl AsRef<str>) -> Self {
        self.segments
            .push(utf8_percent_encode(segment.as_ref(), SEGMENT).to_string());
        self
    }

    pub fn segments<I, S>(mut self, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for s in segments {
            self = self.segment(s);
        }
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn json_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    pub fn build(self) -> Request {
        Request {
            method: self.method,
            path: format!("/{}", self.segments.join("/")),
            query: self.query,
            headers: self.headers,
            body: self.body,
            context: self.context,
        }
    }
}

/// A case-insensitive header multimap.
#[derive(Clone, Debug, Default)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// A decoded HTTP (or binary-protocol) response, independent of transport.
#[derive(Clone, Debug)]
pub struct RawResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: serde_json::Value,
    pub raw: Option<bytes::Bytes>,
    pub endpoint: Endpoint,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_are_percent_encoded_and_joined() {
        let req = Request::builder(Method::Get)
            .segment("_db")
            .segment("my db/with slash")
            .segment("_api")
            .build();
        assert_eq!(req.path(), "/_db/my%20db%2Fwith%20slash/_api");
    }

    #[test]
    fn headers_lookup_is_case_insensitive() {
        let mut h = Headers::new();
        h.insert("ETag", "\"abc\"");
        assert_eq!(h.get("etag"), Some("\"abc\""));
        assert_eq!(h.get("ETAG"), Some("\"abc\""));
    }

    #[test]
    fn is_success_follows_2xx() {
        let resp = RawResponse {
            status: 204,
            headers: Headers::new(),
            body: serde_json::Value::Null,
            raw: None,
            endpoint: Endpoint::parse("http://a:8529").unwrap(),
        };
        assert!(resp.is_success());
    }
}
