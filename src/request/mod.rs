pub mod body;
pub mod client_ip;
pub mod headers;

pub use body::{decode_body, is_form, is_json, FORM_CONTENT_TYPE, JSON_CONTENT_TYPE};
pub use client_ip::{primary_host_address, resolve_client_ip, CLIENT_IP_HEADERS, UNKNOWN_IP};
pub use headers::{header_name_variants, header_with_variants, HeaderLookup};

use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::HeaderMap;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use url::form_urlencoded;

/// Everything the guard needs to know about the inbound call, independent of
/// the transport that produced it.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub remote_addr: Option<SocketAddr>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a context from the head of an HTTP request and its collected body.
    pub fn from_parts(
        parts: &http::request::Parts,
        body: Vec<u8>,
        remote_addr: Option<SocketAddr>,
    ) -> Self {
        let query = parts
            .uri
            .query()
            .map(|q| {
                form_urlencoded::parse(q.as_bytes())
                    .into_owned()
                    .collect::<Vec<(String, String)>>()
            })
            .unwrap_or_default();

        Self {
            headers: parts.headers.clone(),
            query,
            body,
            remote_addr,
        }
    }

    /// Adds a header. Invalid names or values are ignored.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn with_query_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn with_json_body(self, body: &Value) -> Self {
        let bytes = serde_json::to_vec(body).unwrap_or_default();
        self.with_header(CONTENT_TYPE.as_str(), JSON_CONTENT_TYPE)
            .with_body(bytes)
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.header(CONTENT_TYPE.as_str())
    }

    /// Query parameters, plus form fields when the body is URL-encoded. The
    /// first value of a repeated name wins.
    pub fn parameters(&self) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        for (name, value) in &self.query {
            params.entry(name.clone()).or_insert_with(|| value.clone());
        }

        if is_form(self.content_type()) {
            for (name, value) in form_urlencoded::parse(&self.body).into_owned() {
                if !name.is_empty() {
                    params.entry(name).or_insert(value);
                }
            }
        }

        params
    }

    /// Decoded body fields. A body that fails to decode counts as empty.
    pub fn decoded_body(&self) -> Map<String, Value> {
        match decode_body(self.content_type(), &self.body) {
            Ok(map) => map,
            Err(e) => {
                tracing::warn!("Request body could not be decoded, treating as empty: {}", e);
                Map::new()
            }
        }
    }

    pub fn client_ip(&self) -> String {
        resolve_client_ip(&self.headers, self.remote_addr)
    }

    pub fn client_port(&self) -> Option<u16> {
        self.remote_addr.map(|addr| addr.port())
    }

    pub fn header_with_variants(&self, name: &str) -> Option<String> {
        header_with_variants(&self.headers, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_parts_reads_query() {
        let request = http::Request::builder()
            .uri("/orders?sku=A%2F1&qty=2&qty=3")
            .header("token", "t-1")
            .body(())
            .unwrap();
        let (parts, _) = request.into_parts();
        let ctx = RequestContext::from_parts(&parts, Vec::new(), None);

        let params = ctx.parameters();
        assert_eq!(params.get("sku").map(String::as_str), Some("A/1"));
        assert_eq!(params.get("qty").map(String::as_str), Some("2"));
        assert_eq!(ctx.header_with_variants("Token"), Some("t-1".to_string()));
    }

    #[test]
    fn test_form_fields_join_parameters() {
        let ctx = RequestContext::new()
            .with_query_param("a", "query")
            .with_header("content-type", FORM_CONTENT_TYPE)
            .with_body("a=form&b=2");

        let params = ctx.parameters();
        assert_eq!(params.get("a").map(String::as_str), Some("query"));
        assert_eq!(params.get("b").map(String::as_str), Some("2"));
    }

    #[test]
    fn test_undecodable_body_is_empty() {
        let ctx = RequestContext::new()
            .with_header("content-type", JSON_CONTENT_TYPE)
            .with_body("{broken");
        assert!(ctx.decoded_body().is_empty());
    }

    #[test]
    fn test_json_body_round_trip() {
        let ctx = RequestContext::new().with_json_body(&json!({"item": "book"}));
        assert!(is_json(ctx.content_type()));
        assert_eq!(ctx.decoded_body().get("item"), Some(&json!("book")));
    }

    #[test]
    fn test_port_comes_from_socket() {
        let ctx = RequestContext::new().with_remote_addr("192.0.2.1:8443".parse().unwrap());
        assert_eq!(ctx.client_port(), Some(8443));
        assert_eq!(ctx.client_ip(), "192.0.2.1");
    }
}
