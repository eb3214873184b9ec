//! HTTP header storage: three parallel ordered sequences (code, name,
//! value) with tombstone-based removal, ported from
//! `HTTPHeaders.cpp`/`HTTPCommonHeaders.template.h`. The code is a
//! perfect-hash-style match over well-known lowercase header names; `Other`
//! carries an owned name, `None` is the tombstone sentinel left behind by
//! `remove`.

use std::fmt;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum HeaderCode {
    None = 0,
    Other = 1,
    Allow,
    Connection,
    ContentEncoding,
    ContentLanguage,
    ContentLength,
    ContentMd5,
    ContentRange,
    ContentType,
    ETag,
    Host,
    KeepAlive,
    LastModified,
    ProxyAuthenticate,
    ProxyAuthorization,
    ProxyConnection,
    Te,
    Trailer,
    TransferEncoding,
    Upgrade,
}

impl HeaderCode {
    /// Canonical wire name for a well-known code. `None`/`Other` have no
    /// fixed name (the caller supplies one for `Other`).
    pub fn name(self) -> Option<&'static str> {
        use HeaderCode::*;
        Some(match self {
            Allow => "Allow",
            Connection => "Connection",
            ContentEncoding => "Content-Encoding",
            ContentLanguage => "Content-Language",
            ContentLength => "Content-Length",
            ContentMd5 => "Content-MD5",
            ContentRange => "Content-Range",
            ContentType => "Content-Type",
            ETag => "ETag",
            Host => "Host",
            KeepAlive => "Keep-Alive",
            LastModified => "Last-Modified",
            ProxyAuthenticate => "Proxy-Authenticate",
            ProxyAuthorization => "Proxy-Authorization",
            ProxyConnection => "Proxy-Connection",
            Te => "TE",
            Trailer => "Trailer",
            TransferEncoding => "Transfer-Encoding",
            Upgrade => "Upgrade",
            None | Other => return std::option::Option::None,
        })
    }

    /// Hashes a header name (case-insensitively) to its well-known code,
    /// or `Other` if it isn't one of the fixed set. Mirrors
    /// `HTTPCommonHeaders::hash` without the generated-perfect-hash
    /// machinery — a direct match is plenty for this header set's size.
    pub fn hash(name: &str) -> HeaderCode {
        use HeaderCode::*;
        let mut buf = [0u8; 32];
        if name.len() > buf.len() {
            return Other;
        }
        for (dst, src) in buf.iter_mut().zip(name.bytes()) {
            *dst = src.to_ascii_lowercase();
        }
        match &buf[..name.len()] {
            b"allow" => Allow,
            b"connection" => Connection,
            b"content-encoding" => ContentEncoding,
            b"content-language" => ContentLanguage,
            b"content-length" => ContentLength,
            b"content-md5" => ContentMd5,
            b"content-range" => ContentRange,
            b"content-type" => ContentType,
            b"etag" => ETag,
            b"host" => Host,
            b"keep-alive" => KeepAlive,
            b"last-modified" => LastModified,
            b"proxy-authenticate" => ProxyAuthenticate,
            b"proxy-authorization" => ProxyAuthorization,
            b"proxy-connection" => ProxyConnection,
            b"te" => Te,
            b"trailer" => Trailer,
            b"transfer-encoding" => TransferEncoding,
            b"upgrade" => Upgrade,
            _ => Other,
        }
    }

    /// The fixed per-hop set from spec §4.2, excluding `Connection` itself
    /// (whose *value* lists additional per-connection header names to
    /// strip — handled separately by `strip_per_hop_headers`).
    pub fn is_per_hop(self) -> bool {
        use HeaderCode::*;
        matches!(
            self,
            Connection
                | KeepAlive
                | ProxyAuthenticate
                | ProxyAuthorization
                | ProxyConnection
                | Te
                | Trailer
                | TransferEncoding
                | Upgrade
        )
    }

    /// Entity headers a 304 response must not carry (spec §4.2 / §6).
    pub fn is_entity(self) -> bool {
        use HeaderCode::*;
        matches!(
            self,
            Allow
                | ContentEncoding
                | ContentLanguage
                | ContentLength
                | ContentMd5
                | ContentRange
                | ContentType
                | LastModified
        )
    }
}

enum Name {
    WellKnown(&'static str),
    Owned(String),
}

impl Name {
    fn as_str(&self) -> &str {
        match self {
            Name::WellKnown(s) => s,
            Name::Owned(s) => s,
        }
    }
}

#[derive(Default)]
pub struct HttpHeaders {
    codes: Vec<HeaderCode>,
    names: Vec<Name>,
    values: Vec<String>,
    deleted_count: usize,
}

impl HttpHeaders {
    pub fn new() -> HttpHeaders {
        HttpHeaders::default()
    }

    pub fn add(&mut self, name: &str, value: impl Into<String>) {
        let code = HeaderCode::hash(name);
        let stored_name = match code {
            HeaderCode::Other => Name::Owned(name.to_owned()),
            _ => Name::WellKnown(code.name().expect("well-known code has a name")),
        };
        self.codes.push(code);
        self.names.push(stored_name);
        self.values.push(value.into());
    }

    pub fn len(&self) -> usize {
        self.codes.len() - self.deleted_count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn exists(&self, name: &str) -> bool {
        self.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Removes every entry with the given name, tombstoning its slot.
    /// Returns whether anything was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let mut removed = false;
        for i in 0..self.codes.len() {
            if self.codes[i] != HeaderCode::None && self.names[i].as_str().eq_ignore_ascii_case(name) {
                self.codes[i] = HeaderCode::None;
                self.deleted_count += 1;
                removed = true;
            }
        }
        removed
    }

    pub fn remove_all(&mut self) {
        self.codes.clear();
        self.names.clear();
        self.values.clear();
        self.deleted_count = 0;
    }

    pub fn get_all<'a, 'b>(&'a self, name: &'b str) -> impl Iterator<Item = &'a str> + 'a
    where
        'b: 'a,
    {
        self.iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    pub fn get<'a, 'b>(&'a self, name: &'b str) -> Option<&'a str>
    where
        'b: 'a,
    {
        self.get_all(name).next()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.codes
            .iter()
            .zip(self.names.iter())
            .zip(self.values.iter())
            .filter(|((code, _), _)| **code != HeaderCode::None)
            .map(|((_, name), value)| (name.as_str(), value.as_str()))
    }

    /// Strips a 304 response's forbidden entity headers in place (spec
    /// §4.2/§6), per RFC 7232 §4.1.
    pub fn clear_headers_for_304(&mut self) {
        for code in self.codes.iter_mut() {
            if code.is_entity() {
                *code = HeaderCode::None;
                self.deleted_count += 1;
            }
        }
    }

    /// Strips hop-by-hop headers before forwarding (spec §4.2, Open
    /// Question 1): both the names listed in any `Connection` header
    /// value and the fixed per-hop set. Returns the stripped headers so
    /// callers can log or inspect what was removed.
    pub fn strip_per_hop_headers(&mut self) -> HttpHeaders {
        let mut stripped = HttpHeaders::new();

        let connection_values: Vec<String> = self
            .get_all("Connection")
            .map(|v| v.to_owned())
            .collect();

        for value in connection_values {
            for raw in value.split(',') {
                let hdr = raw.trim();
                if hdr.is_empty() {
                    continue;
                }
                self.transfer_header_if_present(hdr, &mut stripped);
            }
        }

        for i in 0..self.codes.len() {
            if self.codes[i] != HeaderCode::None && self.codes[i].is_per_hop() {
                stripped.codes.push(self.codes[i]);
                stripped.names.push(match &self.names[i] {
                    Name::WellKnown(s) => Name::WellKnown(s),
                    Name::Owned(s) => Name::Owned(s.clone()),
                });
                stripped.values.push(self.values[i].clone());
                self.codes[i] = HeaderCode::None;
                self.deleted_count += 1;
            }
        }

        stripped
    }

    fn transfer_header_if_present(&mut self, name: &str, dest: &mut HttpHeaders) {
        for i in 0..self.codes.len() {
            if self.codes[i] != HeaderCode::None && self.names[i].as_str().eq_ignore_ascii_case(name) {
                dest.codes.push(self.codes[i]);
                dest.names.push(match &self.names[i] {
                    Name::WellKnown(s) => Name::WellKnown(s),
                    Name::Owned(s) => Name::Owned(s.clone()),
                });
                dest.values.push(self.values[i].clone());
                self.codes[i] = HeaderCode::None;
                self.deleted_count += 1;
            }
        }
    }
}

impl fmt::Debug for HttpHeaders {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl Clone for HttpHeaders {
    fn clone(&self) -> HttpHeaders {
        let mut out = HttpHeaders::new();
        for (name, value) in self.iter() {
            out.add(name, value.to_owned());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_get() {
        let mut h = HttpHeaders::new();
        h.add("Content-Type", "text/html");
        h.add("X-Custom", "v");
        assert_eq!(h.get("content-type"), Some("text/html"));
        assert_eq!(h.get("x-custom"), Some("v"));
        assert_eq!(h.len(), 2);
    }

    #[test]
    fn remove_tombstones_and_preserves_others() {
        let mut h = HttpHeaders::new();
        h.add("A", "1");
        h.add("B", "2");
        h.add("A", "3");
        assert!(h.remove("a"));
        assert_eq!(h.len(), 1);
        assert_eq!(h.get("b"), Some("2"));
    }

    #[test]
    fn clear_for_304_keeps_etag() {
        let mut h = HttpHeaders::new();
        h.add("Content-Type", "text/html");
        h.add("ETag", "\"abc\"");
        h.clear_headers_for_304();
        assert_eq!(h.get("ETag"), Some("\"abc\""));
        assert_eq!(h.get("Content-Type"), None);
    }

    #[test]
    fn strip_per_hop_removes_connection_named_and_fixed_set() {
        let mut h = HttpHeaders::new();
        h.add("Connection", "X-Custom, keep-alive");
        h.add("X-Custom", "v");
        h.add("Keep-Alive", "timeout=5");
        h.add("Host", "example.com");

        let stripped = h.strip_per_hop_headers();

        assert!(h.get("Connection").is_none());
        assert!(h.get("Keep-Alive").is_none());
        assert!(h.get("X-Custom").is_none());
        assert_eq!(h.get("Host"), Some("example.com"));
        assert!(stripped.exists("X-Custom"));
    }
}
