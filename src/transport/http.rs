//! HTTP/1.x framing (spec §4.2/§6). Frame boundary is {request-line,
//! header block terminated by a blank line, body delimited by
//! `Content-Length` or `Transfer-Encoding: chunked`}. Parsing beyond the
//! framing boundary (exact header semantics, URI validation) is out of
//! scope per spec §1 — this module only needs to find message boundaries
//! and hand a parsed `HttpMessage` to the dispatcher.

use crate::buffer::ByteChain;
use crate::error::{ServiceError, ServiceResult};
use crate::http::headers::HttpHeaders;
use crate::http::{HttpMessage, HttpResponse, Method};
use crate::transport::{Frame, IngressState, Transport};

pub struct HttpTransport {
    state: IngressState,
    write_buf: ByteChain,
}

impl HttpTransport {
    pub fn new() -> HttpTransport {
        HttpTransport {
            state: IngressState::Init,
            write_buf: ByteChain::new(),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> HttpTransport {
        HttpTransport::new()
    }
}

impl Transport for HttpTransport {
    fn process_read_data(&mut self, input: &mut ByteChain) -> ServiceResult<Vec<Frame>> {
        let mut frames = Vec::new();

        loop {
            let buf = input.coalesce();
            let header_end = match find_header_end(buf) {
                Some(end) => end,
                None => {
                    self.state = IngressState::OnReading;
                    break;
                }
            };

            let head = &buf[..header_end];
            let mut message = match parse_head(head) {
                Ok(m) => m,
                Err(e) => {
                    self.state = IngressState::Error;
                    return Err(e);
                }
            };

            let body_start = header_end + 4;
            let rest = &buf[body_start..];

            let (body, consumed_body) = match read_body(&message.headers, rest) {
                Some(result) => result,
                None => {
                    self.state = IngressState::OnReading;
                    break;
                }
            };

            let total_consumed = body_start + consumed_body;
            input.take(total_consumed);

            message.body = body;
            frames.push(Frame::Http(message));
            self.state = IngressState::Finish;
        }

        Ok(frames)
    }

    fn send_header(&mut self, header: Vec<u8>) {
        self.write_buf.append(header);
    }

    fn send_body(&mut self, body: ByteChain) {
        let mut body = body;
        self.write_buf.append(body.take(body.len()));
    }

    fn write_buffer(&mut self) -> &mut ByteChain {
        &mut self.write_buf
    }

    fn ingress_state(&self) -> IngressState {
        self.state
    }

    fn reset(&mut self) {
        self.state = IngressState::Init;
    }
}

/// Outbound-connection counterpart to `HttpTransport`: frames complete
/// HTTP responses on a `Role::Client` connection (spec C12's forwarding
/// path) without parsing them, since the caller of `client::Client::call_peer`
/// only needs the raw bytes to pass on (or decode with `parse_response`).
pub struct HttpReplyTransport {
    state: IngressState,
    write_buf: ByteChain,
}

impl HttpReplyTransport {
    pub fn new() -> HttpReplyTransport {
        HttpReplyTransport {
            state: IngressState::Init,
            write_buf: ByteChain::new(),
        }
    }
}

impl Default for HttpReplyTransport {
    fn default() -> HttpReplyTransport {
        HttpReplyTransport::new()
    }
}

impl Transport for HttpReplyTransport {
    fn process_read_data(&mut self, input: &mut ByteChain) -> ServiceResult<Vec<Frame>> {
        let mut frames = Vec::new();

        loop {
            let buf = input.coalesce();
            let header_end = match find_header_end(buf) {
                Some(end) => end,
                None => {
                    self.state = IngressState::OnReading;
                    break;
                }
            };

            let headers = match parse_headers_block(&buf[..header_end]) {
                Ok((_, headers)) => headers,
                Err(e) => {
                    self.state = IngressState::Error;
                    return Err(e);
                }
            };

            let body_start = header_end + 4;
            let rest = &buf[body_start..];

            let (_, consumed_body) = match read_body(&headers, rest) {
                Some(result) => result,
                None => {
                    self.state = IngressState::OnReading;
                    break;
                }
            };

            let total_consumed = body_start + consumed_body;
            let raw = buf[..total_consumed].to_vec();
            input.take(total_consumed);

            frames.push(Frame::HttpReply(raw));
            self.state = IngressState::Finish;
        }

        Ok(frames)
    }

    fn send_header(&mut self, header: Vec<u8>) {
        self.write_buf.append(header);
    }

    fn send_body(&mut self, body: ByteChain) {
        let mut body = body;
        self.write_buf.append(body.take(body.len()));
    }

    fn write_buffer(&mut self) -> &mut ByteChain {
        &mut self.write_buf
    }

    fn ingress_state(&self) -> IngressState {
        self.state
    }

    fn reset(&mut self) {
        self.state = IngressState::Init;
    }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Splits a header block into its first line (request-line or status-line,
/// caller-interpreted) and the parsed header set.
fn parse_headers_block(head: &[u8]) -> ServiceResult<(String, HttpHeaders)> {
    let head = std::str::from_utf8(head)
        .map_err(|_| ServiceError::Protocol("message head is not valid utf-8".to_owned()))?;
    let mut lines = head.split("\r\n");

    let first_line = lines
        .next()
        .ok_or_else(|| ServiceError::Protocol("missing first line".to_owned()))?
        .to_owned();

    let mut headers = HttpHeaders::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| ServiceError::Protocol(format!("malformed header line: {}", line)))?;
        headers.add(name.trim(), value.trim().to_owned());
    }

    Ok((first_line, headers))
}

fn parse_head(head: &[u8]) -> ServiceResult<HttpMessage> {
    let (request_line, headers) = parse_headers_block(head)?;
    let mut parts = request_line.split(' ');
    let method = parts
        .next()
        .ok_or_else(|| ServiceError::Protocol("missing method".to_owned()))?;
    let url = parts
        .next()
        .ok_or_else(|| ServiceError::Protocol("missing url".to_owned()))?;

    let mut message = HttpMessage::new(Method::parse(method), url.to_owned());
    message.headers = headers;
    Ok(message)
}

/// Extracts a complete body from `rest` per `headers`' framing
/// (`Transfer-Encoding: chunked` or `Content-Length`), returning
/// `(body, bytes_consumed)`, or `None` if `rest` doesn't yet hold a
/// complete body.
fn read_body(headers: &HttpHeaders, rest: &[u8]) -> Option<(Vec<u8>, usize)> {
    if headers
        .get("Transfer-Encoding")
        .is_some_and(|v| v.eq_ignore_ascii_case("chunked"))
    {
        decode_chunked(rest)
    } else {
        let content_length: usize = headers
            .get("Content-Length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        if rest.len() < content_length {
            None
        } else {
            Some((rest[..content_length].to_vec(), content_length))
        }
    }
}

/// Decodes a chunked body starting at `data[0]`. Returns `(body,
/// bytes_consumed)` including the terminating `0\r\n\r\n`, or `None` if
/// `data` doesn't yet contain a complete chunked body. Trailers (if any)
/// are consumed but discarded.
fn decode_chunked(data: &[u8]) -> Option<(Vec<u8>, usize)> {
    let mut body = Vec::new();
    let mut pos = 0;

    loop {
        let line_end = find_crlf(&data[pos..])? + pos;
        let size_line = std::str::from_utf8(&data[pos..line_end]).ok()?;
        let size_str = size_line.split(';').next().unwrap_or(size_line).trim();
        let chunk_size = usize::from_str_radix(size_str, 16).ok()?;
        pos = line_end + 2;

        if chunk_size == 0 {
            // Trailing headers (possibly none) followed by a blank line.
            let trailer_end = find_header_end_from(data, pos)?;
            return Some((body, trailer_end + 4));
        }

        if data.len() < pos + chunk_size + 2 {
            return None;
        }
        body.extend_from_slice(&data[pos..pos + chunk_size]);
        pos += chunk_size + 2;
    }
}

fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|w| w == b"\r\n")
}

fn find_header_end_from(data: &[u8], from: usize) -> Option<usize> {
    data[from..]
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|p| p + from)
        .or_else(|| {
            // A trailer-less terminator is just "\r\n" after the 0-chunk line.
            if data[from..].starts_with(b"\r\n") {
                Some(from)
            } else {
                None
            }
        })
}

/// Serializes `response` as an HTTP/1.1 status line + headers + body,
/// computing `Content-Length` and applying the 304 entity-header strip
/// (spec §4.2/§6).
pub fn encode_response(mut response: HttpResponse) -> Vec<u8> {
    response.apply_304_rules();

    if response.headers.get("Content-Length").is_none() {
        response
            .headers
            .add("Content-Length", response.body.len().to_string());
    }

    let mut out = format!("HTTP/1.1 {} {}\r\n", response.status, response.reason).into_bytes();
    for (name, value) in response.headers.iter() {
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&response.body);
    out
}

/// Serializes `message` as an HTTP/1.1 request line + headers + body for
/// the outbound client path (spec C12's forwarding mode), adding
/// `Content-Length` if the caller hasn't already set one.
pub fn encode_request(message: &HttpMessage) -> Vec<u8> {
    let mut out = format!("{} {} HTTP/1.1\r\n", message.method.as_str(), message.url).into_bytes();

    let mut wrote_content_length = false;
    for (name, value) in message.headers.iter() {
        if name.eq_ignore_ascii_case("Content-Length") {
            wrote_content_length = true;
        }
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    if !wrote_content_length {
        out.extend_from_slice(format!("Content-Length: {}\r\n", message.body.len()).as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&message.body);
    out
}

/// Parses a complete HTTP response from `raw` wire bytes, as captured by
/// `HttpReplyTransport`. `raw` is assumed to hold exactly one complete
/// response (the transport only emits once framing is fully validated).
pub fn parse_response(raw: &[u8]) -> ServiceResult<HttpResponse> {
    let header_end = find_header_end(raw)
        .ok_or_else(|| ServiceError::Protocol("incomplete response head".to_owned()))?;
    let (status_line, headers) = parse_headers_block(&raw[..header_end])?;

    let mut parts = status_line.split(' ');
    let _version = parts
        .next()
        .ok_or_else(|| ServiceError::Protocol("missing http version".to_owned()))?;
    let status: u16 = parts
        .next()
        .ok_or_else(|| ServiceError::Protocol("missing status code".to_owned()))?
        .parse()
        .map_err(|_| ServiceError::Protocol("status code is not numeric".to_owned()))?;
    let reason = parts.collect::<Vec<_>>().join(" ");

    let body_start = header_end + 4;
    let rest = &raw[body_start..];
    let (body, _) = read_body(&headers, rest)
        .ok_or_else(|| ServiceError::Protocol("incomplete response body".to_owned()))?;

    let mut response = HttpResponse::new(status);
    if !reason.is_empty() {
        response.reason = reason;
    }
    response.headers = headers;
    response.body = body;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_request_with_content_length_body() {
        let mut transport = HttpTransport::new();
        let mut input = ByteChain::new();
        input.append(
            b"POST /echo HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\n\r\nhello".to_vec(),
        );

        let frames = transport.process_read_data(&mut input).unwrap();
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            Frame::Http(msg) => {
                assert_eq!(msg.method, Method::Post);
                assert_eq!(msg.url, "/echo");
                assert_eq!(msg.body, b"hello");
            }
            _ => panic!("wrong frame kind"),
        }
        assert!(input.is_empty());
    }

    #[test]
    fn keepalive_pipeline_yields_two_frames_in_order() {
        let mut transport = HttpTransport::new();
        let mut input = ByteChain::new();
        input.append(
            b"GET /a HTTP/1.1\r\nHost: x\r\n\r\nGET /b HTTP/1.1\r\nHost: x\r\n\r\n".to_vec(),
        );

        let frames = transport.process_read_data(&mut input).unwrap();
        assert_eq!(frames.len(), 2);
        let urls: Vec<&str> = frames
            .iter()
            .map(|f| match f {
                Frame::Http(msg) => msg.url.as_str(),
                _ => panic!("wrong frame kind"),
            })
            .collect();
        assert_eq!(urls, vec!["/a", "/b"]);
    }

    #[test]
    fn partial_body_waits() {
        let mut transport = HttpTransport::new();
        let mut input = ByteChain::new();
        input.append(b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc".to_vec());

        let frames = transport.process_read_data(&mut input).unwrap();
        assert!(frames.is_empty());
        assert_eq!(transport.ingress_state(), IngressState::OnReading);
    }

    /// A body split across two reads must still decode once the rest
    /// arrives, as long as the caller keeps feeding the same `ByteChain`
    /// across calls instead of starting over from an empty one each time.
    #[test]
    fn partial_body_completes_once_fed_the_rest() {
        let mut transport = HttpTransport::new();
        let mut input = ByteChain::new();
        input.append(b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc".to_vec());

        let frames = transport.process_read_data(&mut input).unwrap();
        assert!(frames.is_empty());

        input.append(b"defghijk".to_vec());
        let frames = transport.process_read_data(&mut input).unwrap();
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            Frame::Http(msg) => assert_eq!(msg.body, b"abcdefghij"),
            _ => panic!("wrong frame kind"),
        }
    }

    #[test]
    fn chunked_body_decodes() {
        let mut transport = HttpTransport::new();
        let mut input = ByteChain::new();
        input.append(
            b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n0\r\n\r\n"
                .to_vec(),
        );

        let frames = transport.process_read_data(&mut input).unwrap();
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            Frame::Http(msg) => assert_eq!(msg.body, b"Wiki"),
            _ => panic!("wrong frame kind"),
        }
    }

    #[test]
    fn status_304_strips_entity_headers_on_encode() {
        let mut response = HttpResponse::new(304);
        response.headers.add("Content-Type", "text/html");
        response.headers.add("ETag", "\"abc\"");
        let wire = encode_response(response);
        let wire = String::from_utf8(wire).unwrap();
        assert!(wire.contains("ETag"));
        assert!(!wire.contains("Content-Type"));
    }
}
