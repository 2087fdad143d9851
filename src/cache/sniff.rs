//! Content sniffing and the media-type whitelist

use crate::error::{CacheError, Result};
use crate::upstream::BodyStream;
use bytes::BytesMut;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::io;

/// Maximum number of leading bytes considered when sniffing.
pub const SNIFF_LEN: usize = 512;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const OCTET_STREAM: &str = "application/octet-stream";

/// Magic-number signatures. `None` in a pattern matches any byte.
const SIGNATURES: &[(&[Option<u8>], &str)] = &[
    (&bytes_of(*b"GIF87a"), "image/gif"),
    (&bytes_of(*b"GIF89a"), "image/gif"),
    (&bytes_of(*b"\x89PNG\r\n\x1a\n"), "image/png"),
    (&bytes_of(*b"\xff\xd8\xff"), "image/jpeg"),
    (&bytes_of(*b"BM"), "image/bmp"),
    (
        &[
            Some(b'R'), Some(b'I'), Some(b'F'), Some(b'F'),
            None, None, None, None,
            Some(b'W'), Some(b'E'), Some(b'B'), Some(b'P'), Some(b'V'), Some(b'P'),
        ],
        "image/webp",
    ),
    (&bytes_of(*b"\x00\x00\x01\x00"), "image/x-icon"),
    (&bytes_of(*b"\x00\x00\x02\x00"), "image/x-icon"),
    (&bytes_of(*b"%PDF-"), "application/pdf"),
    (&bytes_of(*b"%!PS-Adobe-"), "application/postscript"),
    (&bytes_of(*b"PK\x03\x04"), "application/zip"),
    (&bytes_of(*b"\x1f\x8b\x08"), "application/x-gzip"),
    (&bytes_of(*b"\xfe\xff"), "text/plain; charset=utf-16be"),
    (&bytes_of(*b"\xff\xfe"), "text/plain; charset=utf-16le"),
    (&bytes_of(*b"\xef\xbb\xbf"), TEXT_PLAIN),
];

const fn bytes_of<const N: usize>(raw: [u8; N]) -> [Option<u8>; N] {
    let mut out = [None; N];
    let mut i = 0;
    while i < N {
        out[i] = Some(raw[i]);
        i += 1;
    }
    out
}

/// Markup prefixes checked case-insensitively after leading whitespace.
const MARKUP: &[(&[u8], &str)] = &[
    (b"<!DOCTYPE HTML", "text/html; charset=utf-8"),
    (b"<HTML", "text/html; charset=utf-8"),
    (b"<HEAD", "text/html; charset=utf-8"),
    (b"<BODY", "text/html; charset=utf-8"),
    (b"<?XML", "text/xml; charset=utf-8"),
];

/// Classify a byte prefix into a MIME type.
///
/// Only the first [`SNIFF_LEN`] bytes are examined.
pub fn sniff(data: &[u8]) -> &'static str {
    let data = &data[..data.len().min(SNIFF_LEN)];

    for (pattern, mime) in SIGNATURES {
        if matches_signature(data, pattern) {
            return *mime;
        }
    }

    let trimmed = trim_leading_ws(data);
    for (prefix, mime) in MARKUP {
        if trimmed.len() >= prefix.len() && trimmed[..prefix.len()].eq_ignore_ascii_case(prefix) {
            return *mime;
        }
    }

    if data.iter().any(|&b| is_binary(b)) {
        OCTET_STREAM
    } else {
        TEXT_PLAIN
    }
}

fn matches_signature(data: &[u8], pattern: &[Option<u8>]) -> bool {
    data.len() >= pattern.len()
        && pattern
            .iter()
            .zip(data)
            .all(|(expected, actual)| expected.map_or(true, |b| b == *actual))
}

fn trim_leading_ws(data: &[u8]) -> &[u8] {
    let start = data
        .iter()
        .position(|b| !matches!(b, b'\t' | b'\n' | b'\x0c' | b'\r' | b' '))
        .unwrap_or(data.len());
    &data[start..]
}

fn is_binary(b: u8) -> bool {
    matches!(b, 0x00..=0x08 | 0x0b | 0x0e..=0x1a | 0x1c..=0x1f)
}

/// Immutable mapping from accepted MIME types to stored file extensions
#[derive(Debug, Clone)]
pub struct MediaTypes {
    extensions: HashMap<&'static str, &'static str>,
}

impl MediaTypes {
    /// The image whitelist
    pub fn images() -> Self {
        Self::from_pairs([
            ("image/gif", ".gif"),
            ("image/png", ".png"),
            ("image/jpeg", ".jpg"),
            ("image/bmp", ".bmp"),
            ("image/webp", ".webp"),
        ])
    }

    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'static str, &'static str)>,
    {
        Self {
            extensions: pairs.into_iter().collect(),
        }
    }

    /// Extension (with leading dot) for `mime`, if accepted
    pub fn extension(&self, mime: &str) -> Option<&'static str> {
        self.extensions.get(mime).copied()
    }
}

impl Default for MediaTypes {
    fn default() -> Self {
        Self::images()
    }
}

/// Outcome of a successful validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sniffed {
    pub mime: &'static str,
    pub extension: &'static str,
}

/// Validates downloaded bytes against the media-type whitelist
#[derive(Debug, Clone, Default)]
pub struct ContentValidator {
    media_types: MediaTypes,
}

impl ContentValidator {
    pub fn new(media_types: MediaTypes) -> Self {
        Self { media_types }
    }

    /// Sniff `prefix` and map it to an extension, rejecting anything outside the whitelist.
    pub fn validate(&self, prefix: &[u8]) -> Result<Sniffed> {
        let mime = sniff(prefix);
        match self.media_types.extension(mime) {
            Some(extension) => Ok(Sniffed { mime, extension }),
            None => Err(CacheError::UnsupportedMedia { mime }),
        }
    }
}

/// Pull chunks from `body` until at least `limit` bytes are buffered or the
/// stream ends. A short body is not an error.
///
/// The returned buffer may hold more than `limit` bytes; all of it belongs to
/// the payload.
pub async fn read_prefix(body: &mut BodyStream, limit: usize) -> io::Result<BytesMut> {
    let mut buf = BytesMut::with_capacity(limit);
    while buf.len() < limit {
        match body.next().await {
            Some(chunk) => buf.extend_from_slice(&chunk?),
            None => break,
        }
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures_util::stream;

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\x00\x00\x00\rIHDR";
    const JPEG: &[u8] = b"\xff\xd8\xff\xe0\x00\x10JFIF\x00";
    const WEBP: &[u8] = b"RIFF\x24\x00\x00\x00WEBPVP8 ";

    #[test]
    fn test_sniff_images() {
        assert_eq!(sniff(b"GIF89a\x01\x00"), "image/gif");
        assert_eq!(sniff(b"GIF87a"), "image/gif");
        assert_eq!(sniff(PNG), "image/png");
        assert_eq!(sniff(JPEG), "image/jpeg");
        assert_eq!(sniff(b"BM\x3e\x00\x00\x00"), "image/bmp");
        assert_eq!(sniff(WEBP), "image/webp");
    }

    #[test]
    fn test_sniff_other_types() {
        assert_eq!(sniff(b"hello world"), TEXT_PLAIN);
        assert_eq!(sniff(b""), TEXT_PLAIN);
        assert_eq!(sniff(b"  <html><body>"), "text/html; charset=utf-8");
        assert_eq!(sniff(b"%PDF-1.7"), "application/pdf");
        assert_eq!(sniff(b"\x00\x01\x02\x03"), OCTET_STREAM);
        assert_eq!(sniff(b"\x00\x00\x01\x00\x01"), "image/x-icon");
    }

    #[test]
    fn test_sniff_only_considers_prefix() {
        let mut data = vec![b'a'; SNIFF_LEN];
        data.push(0x00);
        assert_eq!(sniff(&data), TEXT_PLAIN);
    }

    #[test]
    fn test_extension_table() {
        let validator = ContentValidator::default();
        let cases: &[(&[u8], &str)] = &[
            (b"GIF89a....", ".gif"),
            (PNG, ".png"),
            (JPEG, ".jpg"),
            (b"BM......", ".bmp"),
            (WEBP, ".webp"),
        ];
        for (data, ext) in cases {
            assert_eq!(validator.validate(data).unwrap().extension, *ext);
        }
    }

    #[test]
    fn test_rejects_unsupported() {
        let validator = ContentValidator::default();
        let err = validator.validate(b"just some text").unwrap_err();
        assert!(matches!(err, CacheError::UnsupportedMedia { mime } if mime == TEXT_PLAIN));

        let err = validator.validate(b"\x00\x00\x01\x00\x01").unwrap_err();
        assert!(matches!(err, CacheError::UnsupportedMedia { mime: "image/x-icon" }));
    }

    #[test]
    fn test_custom_table() {
        let validator = ContentValidator::new(MediaTypes::from_pairs([("image/png", ".png")]));
        assert!(validator.validate(PNG).is_ok());
        assert!(validator.validate(JPEG).is_err());
    }

    #[tokio::test]
    async fn test_read_prefix_across_chunks() {
        let chunks = vec![
            Ok(Bytes::from_static(&[1u8; 300])),
            Ok(Bytes::from_static(&[2u8; 300])),
            Ok(Bytes::from_static(&[3u8; 300])),
        ];
        let mut body: BodyStream = Box::pin(stream::iter(chunks));

        let prefix = read_prefix(&mut body, SNIFF_LEN).await.unwrap();
        assert_eq!(prefix.len(), 600);

        let rest = body.next().await.unwrap().unwrap();
        assert_eq!(rest[0], 3);
    }

    #[tokio::test]
    async fn test_read_prefix_short_body() {
        let mut body: BodyStream = Box::pin(stream::iter(vec![Ok(Bytes::from_static(b"GIF89a"))]));
        let prefix = read_prefix(&mut body, SNIFF_LEN).await.unwrap();
        assert_eq!(&prefix[..], b"GIF89a");
    }

    #[tokio::test]
    async fn test_read_prefix_error() {
        let mut body: BodyStream = Box::pin(stream::iter(vec![
            Ok(Bytes::from_static(b"GIF")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ]));
        let err = read_prefix(&mut body, SNIFF_LEN).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }
}
