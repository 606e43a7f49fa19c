//! Continuation tokens for the `changes` and `entities` scans.
//!
//! A token is the base64 encoding of a small JSON cursor. Tokens are opaque
//! to clients and only valid for the dataset and scan kind they were issued
//! for; resubmitting one against another dataset or endpoint is a 400.

use anyhow::Context;
use errors::ErrorMetadata;
use serde::{
    Deserialize,
    Serialize,
};

const CURSOR_VERSION: u8 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanKind {
    Changes,
    Entities,
}

/// Resume position for a paged scan: the next sequence number (changes) or
/// internal id (entities) to read.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    v: u8,
    #[serde(rename = "k")]
    pub kind: ScanKind,
    #[serde(rename = "ds")]
    pub dataset_id: u32,
    #[serde(rename = "f")]
    pub floor: u64,
}

impl Cursor {
    pub fn new(kind: ScanKind, dataset_id: u32, floor: u64) -> Self {
        Self {
            v: CURSOR_VERSION,
            kind,
            dataset_id,
            floor,
        }
    }

    pub fn encode(&self) -> String {
        base64::encode(serde_json::to_vec(self).expect("cursor serialization is infallible"))
    }

    pub fn decode(token: &str, kind: ScanKind, dataset_id: u32) -> anyhow::Result<Self> {
        let bytes = base64::decode(token.trim())
            .context(invalid_token())?;
        let cursor: Cursor = serde_json::from_slice(&bytes).context(invalid_token())?;
        if cursor.v != CURSOR_VERSION || cursor.kind != kind || cursor.dataset_id != dataset_id {
            anyhow::bail!(invalid_token());
        }
        Ok(cursor)
    }
}

fn invalid_token() -> ErrorMetadata {
    ErrorMetadata::bad_request(
        "InvalidContinuationToken",
        "the continuation token is not valid for this scan",
    )
}
