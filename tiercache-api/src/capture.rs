//! Response sinks and cached response snapshots.
//!
//! Handlers and the middleware write responses through the [`ResponseSink`]
//! trait. [`ResponseCapture`] buffers everything in memory and produces a
//! [`ResponseSnapshot`] when finished; [`HttpResponseSink`] builds a real
//! axum [`Response`]. Replaying a snapshot into either sink reproduces the
//! captured status, headers and body.

use axum::body::{Body, Bytes};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use serde::{Deserialize, Serialize};

use crate::error::CaptureError;

/// Encoding recorded for text snapshots.
pub const TEXT_ENCODING: &str = "utf-8";

/// One body write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    Text(String),
    Binary(Bytes),
}

/// A destination for status, headers and body writes.
///
/// `set_header` replaces every existing value for the name; `append_header`
/// adds another value after the existing ones.
pub trait ResponseSink {
    type Output;

    fn status(&self) -> StatusCode;
    fn set_status(&mut self, status: StatusCode);

    fn header(&self, name: &HeaderName) -> Option<&HeaderValue>;
    fn set_header(&mut self, name: HeaderName, value: HeaderValue);
    fn append_header(&mut self, name: HeaderName, value: HeaderValue);
    fn remove_header(&mut self, name: &HeaderName);

    fn write(&mut self, chunk: Chunk) -> Result<(), CaptureError>;

    /// Finalize the response.
    fn finish(self) -> Result<Self::Output, CaptureError>
    where
        Self: Sized;
}

// ============================================================================
// SNAPSHOT
// ============================================================================

/// Captured body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum SnapshotContent {
    Empty,
    Text(String),
    Binary(#[serde(with = "base64_bytes")] Vec<u8>),
}

impl SnapshotContent {
    pub fn is_empty(&self) -> bool {
        match self {
            SnapshotContent::Empty => true,
            SnapshotContent::Text(s) => s.is_empty(),
            SnapshotContent::Binary(b) => b.is_empty(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            SnapshotContent::Empty => &[],
            SnapshotContent::Text(s) => s.as_bytes(),
            SnapshotContent::Binary(b) => b,
        }
    }
}

/// A complete response as stored in the cache.
///
/// Headers keep their final order; a name appears more than once only when
/// it was appended rather than set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseSnapshot {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub content: SnapshotContent,
    pub encoding: Option<String>,
}

impl ResponseSnapshot {
    /// First stored value for `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Write status, headers and body into `sink` without finishing it.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::InvalidHeader`] if a stored header is no
    /// longer a valid name/value pair.
    pub fn replay<S: ResponseSink>(&self, sink: &mut S) -> Result<(), CaptureError> {
        let status = StatusCode::from_u16(self.status)
            .map_err(|e| CaptureError::invalid_header(":status", e))?;
        sink.set_status(status);

        for (name, value) in &self.headers {
            let header_name = HeaderName::try_from(name.as_str())
                .map_err(|e| CaptureError::invalid_header(name.as_str(), e))?;
            let header_value = HeaderValue::try_from(value.as_str())
                .map_err(|e| CaptureError::invalid_header(name.as_str(), e))?;
            sink.append_header(header_name, header_value);
        }

        match &self.content {
            SnapshotContent::Empty => Ok(()),
            SnapshotContent::Text(text) => sink.write(Chunk::Text(text.clone())),
            SnapshotContent::Binary(bytes) => {
                sink.write(Chunk::Binary(Bytes::copy_from_slice(bytes)))
            }
        }
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// BUFFERING SINK
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
enum Buffer {
    #[default]
    Empty,
    Text(String),
    Binary(Vec<u8>),
}

/// In-memory sink that turns writes into a [`ResponseSnapshot`].
#[derive(Debug, Clone)]
pub struct ResponseCapture {
    status: StatusCode,
    headers: Vec<(HeaderName, HeaderValue)>,
    buffer: Buffer,
}

impl Default for ResponseCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseCapture {
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: Vec::new(),
            buffer: Buffer::Empty,
        }
    }

    /// Current header table, in order.
    pub fn headers(&self) -> impl Iterator<Item = (&HeaderName, &HeaderValue)> {
        self.headers.iter().map(|(n, v)| (n, v))
    }
}

impl ResponseSink for ResponseCapture {
    type Output = ResponseSnapshot;

    fn status(&self) -> StatusCode {
        self.status
    }

    fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    fn header(&self, name: &HeaderName) -> Option<&HeaderValue> {
        self.headers.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        match self.headers.iter().position(|(n, _)| *n == name) {
            Some(first) => {
                self.headers[first].1 = value;
                let mut index = 0;
                self.headers.retain(|(n, _)| {
                    let keep = index <= first || *n != name;
                    index += 1;
                    keep
                });
            }
            None => self.headers.push((name, value)),
        }
    }

    fn append_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.push((name, value));
    }

    fn remove_header(&mut self, name: &HeaderName) {
        self.headers.retain(|(n, _)| n != name);
    }

    fn write(&mut self, chunk: Chunk) -> Result<(), CaptureError> {
        self.buffer = match (std::mem::take(&mut self.buffer), chunk) {
            (Buffer::Empty, Chunk::Text(text)) => Buffer::Text(text),
            (Buffer::Empty, Chunk::Binary(bytes)) => Buffer::Binary(bytes.to_vec()),
            (Buffer::Text(mut acc), Chunk::Text(text)) => {
                acc.push_str(&text);
                Buffer::Text(acc)
            }
            (Buffer::Binary(mut acc), Chunk::Binary(bytes)) => {
                acc.extend_from_slice(&bytes);
                Buffer::Binary(acc)
            }
            (previous, _) => {
                self.buffer = previous;
                return Err(CaptureError::MixedContent);
            }
        };
        Ok(())
    }

    fn finish(self) -> Result<ResponseSnapshot, CaptureError> {
        // Snapshots store header values as strings; non-UTF-8 bytes cannot be
        // replayed faithfully.
        let headers = self
            .headers
            .into_iter()
            .map(|(name, value)| match std::str::from_utf8(value.as_bytes()) {
                Ok(text) => Ok((name.as_str().to_string(), text.to_string())),
                Err(e) => Err(CaptureError::invalid_header(name.as_str(), e)),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let (content, encoding) = match self.buffer {
            Buffer::Empty => (SnapshotContent::Empty, None),
            Buffer::Text(text) => (SnapshotContent::Text(text), Some(TEXT_ENCODING.to_string())),
            Buffer::Binary(bytes) => (SnapshotContent::Binary(bytes), None),
        };

        Ok(ResponseSnapshot {
            status: self.status.as_u16(),
            headers,
            content,
            encoding,
        })
    }
}

// ============================================================================
// TRANSPORT SINK
// ============================================================================

/// Sink that assembles a real axum [`Response`].
#[derive(Debug, Default)]
pub struct HttpResponseSink {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl HttpResponseSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResponseSink for HttpResponseSink {
    type Output = Response;

    fn status(&self) -> StatusCode {
        self.status
    }

    fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    fn header(&self, name: &HeaderName) -> Option<&HeaderValue> {
        self.headers.get(name)
    }

    fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    fn append_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.append(name, value);
    }

    fn remove_header(&mut self, name: &HeaderName) {
        self.headers.remove(name);
    }

    fn write(&mut self, chunk: Chunk) -> Result<(), CaptureError> {
        match chunk {
            Chunk::Text(text) => self.body.extend_from_slice(text.as_bytes()),
            Chunk::Binary(bytes) => self.body.extend_from_slice(&bytes),
        }
        Ok(())
    }

    fn finish(self) -> Result<Response, CaptureError> {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        Ok(response)
    }
}

// ============================================================================
// DRAINING A DOWNSTREAM RESPONSE
// ============================================================================

/// Whether a content type should be captured as text.
pub fn is_textual(content_type: Option<&HeaderValue>) -> bool {
    let Some(value) = content_type.and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let mime = value.split(';').next().unwrap_or("").trim().to_ascii_lowercase();

    mime.starts_with("text/")
        || mime == "application/json"
        || mime.ends_with("+json")
        || mime == "application/xml"
        || mime.ends_with("+xml")
        || mime == "application/javascript"
        || mime == "application/x-www-form-urlencoded"
}

/// Read a downstream response completely into a [`ResponseCapture`] and
/// finish it.
///
/// Textual content types are captured as text when the body is valid UTF-8;
/// everything else is captured as bytes.
///
/// # Errors
///
/// Returns [`CaptureError::Downstream`] if the body stream fails.
pub async fn capture_response(response: Response) -> Result<ResponseSnapshot, CaptureError> {
    let (parts, body) = response.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| CaptureError::Downstream {
            reason: e.to_string(),
        })?;

    let mut capture = ResponseCapture::new();
    capture.set_status(parts.status);
    for (name, value) in &parts.headers {
        capture.append_header(name.clone(), value.clone());
    }

    if !bytes.is_empty() {
        let chunk = if is_textual(parts.headers.get(CONTENT_TYPE)) {
            match String::from_utf8(bytes.to_vec()) {
                Ok(text) => Chunk::Text(text),
                Err(_) => Chunk::Binary(bytes),
            }
        } else {
            Chunk::Binary(bytes)
        };
        capture.write(chunk)?;
    }

    capture.finish()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::{CACHE_CONTROL, SET_COOKIE};
    use proptest::prelude::*;

    fn hv(s: &'static str) -> HeaderValue {
        HeaderValue::from_static(s)
    }

    #[test]
    fn test_set_header_overwrites_in_place() {
        let mut capture = ResponseCapture::new();
        capture.set_header(CONTENT_TYPE, hv("text/plain"));
        capture.set_header(CACHE_CONTROL, hv("private"));
        capture.set_header(CONTENT_TYPE, hv("text/html"));

        let snapshot = capture.finish().expect("finish");
        assert_eq!(
            snapshot.headers,
            vec![
                ("content-type".to_string(), "text/html".to_string()),
                ("cache-control".to_string(), "private".to_string()),
            ]
        );
    }

    #[test]
    fn test_set_header_collapses_appended_values() {
        let mut capture = ResponseCapture::new();
        capture.append_header(SET_COOKIE, hv("a=1"));
        capture.append_header(SET_COOKIE, hv("b=2"));
        capture.set_header(SET_COOKIE, hv("c=3"));

        assert_eq!(capture.headers().count(), 1);
        assert_eq!(capture.header(&SET_COOKIE), Some(&hv("c=3")));
    }

    #[test]
    fn test_removed_header_is_not_captured() {
        let mut capture = ResponseCapture::new();
        capture.set_header(CONTENT_TYPE, hv("text/plain"));
        capture.set_header(CACHE_CONTROL, hv("private"));
        capture.remove_header(&CACHE_CONTROL);

        let snapshot = capture.finish().expect("finish");
        assert_eq!(snapshot.header("cache-control"), None);
        assert_eq!(snapshot.header("Content-Type"), Some("text/plain"));
    }

    #[test]
    fn test_non_utf8_header_value_rejected() {
        let mut capture = ResponseCapture::new();
        let latin1 = HeaderValue::from_bytes(b"caf\xe9").expect("obs-text is a valid header value");
        capture.set_header(HeaderName::from_static("x-label"), latin1);

        let err = capture.finish().unwrap_err();
        assert!(matches!(err, CaptureError::InvalidHeader { ref name, .. } if name == "x-label"));
    }

    #[test]
    fn test_utf8_header_value_replays_unchanged() {
        let mut capture = ResponseCapture::new();
        let value = HeaderValue::from_bytes("café".as_bytes()).expect("header value");
        capture.set_header(HeaderName::from_static("x-label"), value.clone());

        let snapshot = capture.finish().expect("finish");
        let mut sink = HttpResponseSink::new();
        snapshot.replay(&mut sink).expect("replay");
        let response = sink.finish().expect("response");

        assert_eq!(response.headers().get("x-label"), Some(&value));
    }

    #[test]
    fn test_text_chunks_concatenate() {
        let mut capture = ResponseCapture::new();
        capture.write(Chunk::Text("hello ".into())).expect("write");
        capture.write(Chunk::Text("world".into())).expect("write");

        let snapshot = capture.finish().expect("finish");
        assert_eq!(snapshot.content, SnapshotContent::Text("hello world".into()));
        assert_eq!(snapshot.encoding.as_deref(), Some(TEXT_ENCODING));
    }

    #[test]
    fn test_binary_chunks_concatenate() {
        let mut capture = ResponseCapture::new();
        capture.write(Chunk::Binary(Bytes::from_static(&[0, 1]))).expect("write");
        capture.write(Chunk::Binary(Bytes::from_static(&[2]))).expect("write");

        let snapshot = capture.finish().expect("finish");
        assert_eq!(snapshot.content, SnapshotContent::Binary(vec![0, 1, 2]));
        assert_eq!(snapshot.encoding, None);
    }

    #[test]
    fn test_mixed_chunks_rejected() {
        let mut capture = ResponseCapture::new();
        capture.write(Chunk::Text("a".into())).expect("write");
        let err = capture.write(Chunk::Binary(Bytes::from_static(b"b"))).unwrap_err();
        assert_eq!(err, CaptureError::MixedContent);
    }

    #[test]
    fn test_empty_body_snapshot() {
        let mut capture = ResponseCapture::new();
        capture.set_status(StatusCode::NO_CONTENT);

        let snapshot = capture.finish().expect("finish");
        assert_eq!(snapshot.status, 204);
        assert_eq!(snapshot.content, SnapshotContent::Empty);
        assert!(snapshot.content.is_empty());
    }

    #[test]
    fn test_wire_form() {
        let snapshot = ResponseSnapshot {
            status: 200,
            headers: vec![("content-type".into(), "application/octet-stream".into())],
            content: SnapshotContent::Binary(vec![1, 2, 3]),
            encoding: None,
        };

        let json = serde_json::to_value(&snapshot).expect("serialize");
        assert_eq!(json["headers"][0][0], "content-type");
        assert_eq!(json["content"]["type"], "binary");
        assert_eq!(json["content"]["data"], "AQID");
        assert!(json["encoding"].is_null());

        let empty = serde_json::to_value(SnapshotContent::Empty).expect("serialize");
        assert_eq!(empty, serde_json::json!({"type": "empty"}));
    }

    #[test]
    fn test_replay_into_http_sink() {
        let snapshot = ResponseSnapshot {
            status: 201,
            headers: vec![
                ("set-cookie".into(), "a=1".into()),
                ("set-cookie".into(), "b=2".into()),
                ("content-type".into(), "text/plain".into()),
            ],
            content: SnapshotContent::Text("made".into()),
            encoding: Some(TEXT_ENCODING.into()),
        };

        let mut sink = HttpResponseSink::new();
        snapshot.replay(&mut sink).expect("replay");
        let response = sink.finish().expect("finish");

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers().get_all(SET_COOKIE).iter().count(), 2);
        assert_eq!(response.headers().get(CONTENT_TYPE), Some(&hv("text/plain")));
    }

    #[test]
    fn test_replay_rejects_corrupt_header() {
        let snapshot = ResponseSnapshot {
            status: 200,
            headers: vec![("bad header".into(), "x".into())],
            content: SnapshotContent::Empty,
            encoding: None,
        };

        let err = snapshot.replay(&mut ResponseCapture::new()).unwrap_err();
        assert!(matches!(err, CaptureError::InvalidHeader { .. }));
    }

    #[test]
    fn test_is_textual() {
        assert!(is_textual(Some(&hv("text/html; charset=utf-8"))));
        assert!(is_textual(Some(&hv("application/json"))));
        assert!(is_textual(Some(&hv("application/problem+json"))));
        assert!(!is_textual(Some(&hv("image/png"))));
        assert!(!is_textual(None));
    }

    #[tokio::test]
    async fn test_capture_response_text() {
        let mut response = Response::new(Body::from("hi there"));
        response
            .headers_mut()
            .insert(CONTENT_TYPE, hv("text/plain; charset=utf-8"));

        let snapshot = capture_response(response).await.expect("capture");
        assert_eq!(snapshot.status, 200);
        assert_eq!(snapshot.content, SnapshotContent::Text("hi there".into()));
    }

    #[tokio::test]
    async fn test_capture_response_invalid_utf8_falls_back_to_binary() {
        let mut response = Response::new(Body::from(vec![0xff, 0xfe]));
        response.headers_mut().insert(CONTENT_TYPE, hv("text/plain"));

        let snapshot = capture_response(response).await.expect("capture");
        assert_eq!(snapshot.content, SnapshotContent::Binary(vec![0xff, 0xfe]));
    }

    #[tokio::test]
    async fn test_capture_response_failing_body() {
        let stream = futures_util::stream::iter(vec![
            Ok::<_, std::io::Error>(Bytes::from_static(b"partial")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ]);
        let response = Response::new(Body::from_stream(stream));

        let err = capture_response(response).await.unwrap_err();
        assert!(matches!(err, CaptureError::Downstream { .. }));
    }

    // ========================================================================
    // PROPERTY-BASED TESTS
    // ========================================================================

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Replaying a snapshot into a fresh capture reproduces it.
        #[test]
        fn prop_replay_reproduces_snapshot(
            status in 200u16..600,
            headers in prop::collection::vec(("x-[a-z]{1,8}", "[a-zA-Z0-9 ]{0,16}"), 0..6),
            text in prop::option::of("[ -~]{1,64}"),
        ) {
            let snapshot = ResponseSnapshot {
                status,
                headers,
                encoding: text.as_ref().map(|_| TEXT_ENCODING.to_string()),
                content: text.map(SnapshotContent::Text).unwrap_or(SnapshotContent::Empty),
            };

            let mut capture = ResponseCapture::new();
            snapshot.replay(&mut capture).expect("replay");
            let replayed = capture.finish().expect("finish");

            prop_assert_eq!(replayed, snapshot);
        }
    }
}
