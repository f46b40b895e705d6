use serde::Deserialize;
use time::OffsetDateTime;

use crate::{parse_timestamp, HintCategory, SourceRecord};

/// A legacy hint document exactly as the document store returns it.
pub type RawDocument = serde_json::Value;

/// Placeholder used in the ledger when a document carries no usable `_id`.
pub const UNKNOWN_SOURCE_ID: &str = "UNKNOWN_SOURCE_ID";

pub(crate) const ID_KEY: &str = "_id";
pub(crate) const CATEGORY_KEY: &str = "hintCategory";
pub(crate) const BODY_KEY: &str = "hintTextOriginal";
pub(crate) const PROCESS_ID_KEY: &str = "processId";
pub(crate) const SOURCE_KEY: &str = "hintSource";
pub(crate) const CREATION_DATE_KEY: &str = "creationDate";

const OBJECT_ID_BYTES: usize = 12;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("failed to decode legacy document {source_id}: {reason}")]
pub struct DecodeFailure {
    pub source_id: String,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LegacyId {
    Plain(String),
    Extended {
        #[serde(rename = "$oid")]
        oid: String,
    },
}

impl LegacyId {
    fn into_string(self) -> String {
        match self {
            Self::Plain(value) | Self::Extended { oid: value } => value,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyHintDocument {
    #[serde(rename = "_id")]
    id: LegacyId,
    hint_source: String,
    hint_text_original: String,
    hint_category: HintCategory,
    #[serde(default)]
    show_to_user: bool,
    process_id: String,
    creation_date: Option<String>,
    process_version: Option<String>,
    resource_id: Option<String>,
}

/// Reads the document identifier, accepting both `"…"` and `{"$oid": "…"}`.
#[must_use]
pub fn legacy_document_id(document: &RawDocument) -> Option<String> {
    let raw = document.get(ID_KEY)?;
    LegacyId::deserialize(raw).ok().map(LegacyId::into_string)
}

/// Identifier used to key ledger rows, falling back to [`UNKNOWN_SOURCE_ID`].
#[must_use]
pub fn document_source_id(document: &RawDocument) -> String {
    legacy_document_id(document).unwrap_or_else(|| UNKNOWN_SOURCE_ID.to_string())
}

/// Creation instant embedded in a 24-hex-digit legacy object id.
///
/// The first four bytes hold big-endian unix seconds.
#[must_use]
pub fn legacy_id_timestamp(source_id: &str) -> Option<OffsetDateTime> {
    let bytes = hex::decode(source_id).ok()?;
    if bytes.len() != OBJECT_ID_BYTES {
        return None;
    }
    let seconds = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    OffsetDateTime::from_unix_timestamp(i64::from(seconds)).ok()
}

/// Effective creation time: the explicit `creationDate` when it parses, otherwise
/// the instant embedded in the id.
#[must_use]
pub fn document_creation_instant(document: &RawDocument) -> Option<OffsetDateTime> {
    let explicit = document
        .get(CREATION_DATE_KEY)
        .and_then(serde_json::Value::as_str)
        .and_then(|raw| parse_timestamp(raw).ok());

    explicit.or_else(|| legacy_document_id(document).and_then(|id| legacy_id_timestamp(&id)))
}

/// Decodes a raw legacy document into a typed [`SourceRecord`].
///
/// # Errors
/// Returns a [`DecodeFailure`] naming the document when a required field is
/// missing, has the wrong type, or the creation date does not parse.
pub fn decode_document(document: &RawDocument) -> Result<SourceRecord, DecodeFailure> {
    let source_id = document_source_id(document);
    let decoded =
        LegacyHintDocument::deserialize(document).map_err(|err| DecodeFailure {
            source_id: source_id.clone(),
            reason: err.to_string(),
        })?;

    let creation_date = decoded
        .creation_date
        .as_deref()
        .map(parse_timestamp)
        .transpose()
        .map_err(|err| DecodeFailure {
            source_id: source_id.clone(),
            reason: err.to_string(),
        })?;

    Ok(SourceRecord {
        source_id: decoded.id.into_string(),
        hint_source: decoded.hint_source,
        body: decoded.hint_text_original,
        category: decoded.hint_category,
        show_to_user: decoded.show_to_user,
        process_id: decoded.process_id,
        creation_date,
        process_version: decoded.process_version,
        resource_id: decoded.resource_id,
    })
}
