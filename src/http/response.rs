//! Outbound HTTP response, consumed by `transport::http::HttpTransport`
//! when framing bytes for the write buffer (spec §6).

use sha1::{Digest, Sha1};

use crate::http::headers::HttpHeaders;

pub struct HttpResponse {
    pub status: u16,
    pub reason: String,
    pub headers: HttpHeaders,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16) -> HttpResponse {
        HttpResponse {
            status,
            reason: reason_phrase(status).to_owned(),
            headers: HttpHeaders::new(),
            body: Vec::new(),
        }
    }

    pub fn with_body(status: u16, body: Vec<u8>) -> HttpResponse {
        let mut resp = HttpResponse::new(status);
        resp.body = body;
        resp
    }

    /// Quoted hex SHA-1 of the body, per spec §6 ("`ETag` ... is the
    /// quoted hex of the SHA-1 of the body").
    pub fn compute_etag(&self) -> String {
        let digest = Sha1::digest(&self.body);
        let mut hex = String::with_capacity(digest.len() * 2 + 2);
        hex.push('"');
        for byte in digest {
            hex.push_str(&format!("{:02x}", byte));
        }
        hex.push('"');
        hex
    }

    pub fn set_etag(&mut self) {
        let etag = self.compute_etag();
        self.headers.remove("ETag");
        self.headers.add("ETag", etag);
    }

    /// Strips entity headers forbidden on a 304 (spec §4.2/§6). No-op for
    /// any other status.
    pub fn apply_304_rules(&mut self) {
        if self.status == 304 {
            self.headers.clear_headers_for_304();
        }
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn etag_is_quoted_hex_sha1() {
        let resp = HttpResponse::with_body(200, b"hello".to_vec());
        let etag = resp.compute_etag();
        assert!(etag.starts_with('"') && etag.ends_with('"'));
        assert_eq!(etag.len(), 42);
    }

    #[test]
    fn apply_304_rules_strips_entity_headers() {
        let mut resp = HttpResponse::new(304);
        resp.headers.add("Content-Type", "text/html");
        resp.headers.add("ETag", "\"abc\"");
        resp.apply_304_rules();
        assert!(resp.headers.get("Content-Type").is_none());
        assert_eq!(resp.headers.get("ETag"), Some("\"abc\""));
    }
}
