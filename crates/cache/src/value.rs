//! Stored cache values
//!
//! Encoded as a 4-byte big-endian length, that many bytes of JSON metadata
//! (the response headers and any remembered-failure marker), then the body.

use crate::headers::ResponseHeaders;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

const LENGTH_PREFIX: usize = 4;

/// Why a negative entry was stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Remembered {
    /// The origin fetch failed
    FetchFailed,
    /// The origin response could not be cached
    NotCacheable,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Metadata {
    headers: ResponseHeaders,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    remembered: Option<Remembered>,
}

/// A cached response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpValue {
    headers: ResponseHeaders,
    body: Vec<u8>,
    remembered: Option<Remembered>,
}

impl HttpValue {
    /// A stored response
    #[must_use]
    pub const fn new(headers: ResponseHeaders, body: Vec<u8>) -> Self {
        Self {
            headers,
            body,
            remembered: None,
        }
    }

    /// A negative entry; `headers` carry its expiry
    #[must_use]
    pub const fn remembered(kind: Remembered, headers: ResponseHeaders) -> Self {
        Self {
            headers,
            body: Vec::new(),
            remembered: Some(kind),
        }
    }

    /// Response headers
    #[must_use]
    pub const fn headers(&self) -> &ResponseHeaders {
        &self.headers
    }

    /// Response body
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Negative-entry marker
    #[must_use]
    pub const fn remembered_kind(&self) -> Option<Remembered> {
        self.remembered
    }

    /// Serialize for storage
    pub fn encode(&self) -> Result<Vec<u8>> {
        let metadata = serde_json::to_vec(&Metadata {
            headers: self.headers.clone(),
            remembered: self.remembered,
        })?;
        let length = u32::try_from(metadata.len())
            .map_err(|_| Error::serialization("response headers too large to encode"))?;
        let mut out = Vec::with_capacity(LENGTH_PREFIX + metadata.len() + self.body.len());
        out.extend_from_slice(&length.to_be_bytes());
        out.extend_from_slice(&metadata);
        out.extend_from_slice(&self.body);
        Ok(out)
    }

    /// Deserialize a stored value
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (prefix, rest) = bytes
            .split_first_chunk::<LENGTH_PREFIX>()
            .ok_or_else(|| Error::serialization("value shorter than its length prefix"))?;
        let length = u32::from_be_bytes(*prefix) as usize;
        if rest.len() < length {
            return Err(Error::serialization(format!(
                "header length {length} exceeds value size {}",
                rest.len()
            )));
        }
        let (metadata, body) = rest.split_at(length);
        let metadata: Metadata = serde_json::from_slice(metadata)?;
        Ok(Self {
            headers: metadata.headers,
            body: body.to_vec(),
            remembered: metadata.remembered,
        })
    }
}
