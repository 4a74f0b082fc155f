//! Payload codec: opaque bytes to ordered, size-bounded attribute values.
//!
//! ```text
//! bytes ──[deflate]──► base64 ──► split ──► "00<body>", "01<body>", ...
//! ```
//!
//! The store does not keep multi-valued attributes in write order, so every
//! chunk carries a two-digit hex ordinal and decoding reassembles by ordinal.

use std::io::{Read, Write};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;

use crate::attributes::RECORD_FIELDS;
use crate::error::{Error, Result};

/// Width of the ordinal prefix on every chunk.
pub const ORDINAL_WIDTH: usize = 2;

/// Attribute values accepted in a single put request.
pub const MAX_ATTRIBUTES_PER_PUT: usize = 256;

/// Most chunks a payload may occupy so a full record fits in one put.
pub const MAX_CHUNKS: usize = MAX_ATTRIBUTES_PER_PUT - RECORD_FIELDS;

/// Smallest value size that leaves room for an ordinal and one base64 quantum.
pub const MIN_VALUE_BYTES: usize = ORDINAL_WIDTH + 4;

/// Encodes and decodes session payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadCodec {
    compress: bool,
    chunk_body: usize,
}

impl PayloadCodec {
    /// Create a codec for the given per-value size limit.
    ///
    /// `max_value_bytes` below [`MIN_VALUE_BYTES`] is raised to it.
    pub fn new(compress: bool, max_value_bytes: usize) -> Self {
        let body = max_value_bytes.max(MIN_VALUE_BYTES) - ORDINAL_WIDTH;
        Self {
            compress,
            chunk_body: body - body % 4,
        }
    }

    pub fn compress(&self) -> bool {
        self.compress
    }

    /// Base64 characters carried by each chunk after its ordinal.
    pub fn chunk_body(&self) -> usize {
        self.chunk_body
    }

    /// Encode a payload into ordinal-tagged chunks.
    pub fn encode(&self, payload: &[u8]) -> Result<Vec<String>> {
        if payload.is_empty() {
            return Ok(vec![ordinal(0)]);
        }

        let bytes = if self.compress {
            deflate(payload)?
        } else {
            payload.to_vec()
        };
        let text = STANDARD.encode(bytes);

        let chunks = text.len().div_ceil(self.chunk_body);
        if chunks > MAX_CHUNKS {
            return Err(Error::PayloadTooLarge {
                chunks,
                max: MAX_CHUNKS,
            });
        }

        // base64 output is ASCII, so byte offsets are char boundaries.
        Ok(text
            .as_bytes()
            .chunks(self.chunk_body)
            .enumerate()
            .map(|(i, body)| {
                let mut chunk = ordinal(i);
                chunk.push_str(&String::from_utf8_lossy(body));
                chunk
            })
            .collect())
    }

    /// Reassemble a payload from chunks in any order.
    pub fn decode<S: AsRef<str>>(&self, chunks: &[S]) -> Result<Vec<u8>> {
        let mut tagged: Vec<(usize, &str)> = chunks
            .iter()
            .map(AsRef::as_ref)
            .filter(|c| !c.is_empty())
            .map(split_ordinal)
            .collect::<Result<_>>()?;

        if tagged.is_empty() {
            return Err(Error::malformed("no payload chunks"));
        }

        tagged.sort_by_key(|(n, _)| *n);
        for (expected, (n, _)) in tagged.iter().enumerate() {
            if *n != expected {
                return Err(Error::malformed(format!(
                    "payload chunk {:02X} found where {:02X} was expected",
                    n, expected
                )));
            }
        }

        let text: String = tagged.into_iter().map(|(_, body)| body).collect();
        if text.is_empty() {
            return Ok(Vec::new());
        }

        let bytes = STANDARD
            .decode(text.as_bytes())
            .map_err(|e| Error::malformed(format!("payload is not base64: {}", e)))?;

        if self.compress {
            inflate(&bytes)
        } else {
            Ok(bytes)
        }
    }
}

fn ordinal(n: usize) -> String {
    format!("{:02X}", n)
}

fn split_ordinal(chunk: &str) -> Result<(usize, &str)> {
    let (tag, body) = chunk
        .split_at_checked(ORDINAL_WIDTH)
        .ok_or_else(|| Error::malformed(format!("payload chunk '{}' has no ordinal", chunk)))?;

    if !tag.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::malformed(format!("invalid payload chunk ordinal '{}'", tag)));
    }
    let n = usize::from_str_radix(tag, 16)
        .map_err(|_| Error::malformed(format!("invalid payload chunk ordinal '{}'", tag)))?;
    Ok((n, body))
}

fn deflate(payload: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload).map_err(Error::Compression)?;
    encoder.finish().map_err(Error::Compression)
}

fn inflate(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    DeflateDecoder::new(bytes)
        .read_to_end(&mut out)
        .map_err(|e| Error::malformed(format!("payload does not inflate: {}", e)))?;
    Ok(out)
}
