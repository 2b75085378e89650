//! Wire types for the messaging substrate (the relay-based pub/sub network).
//!
//! The substrate itself — signature verification, relay connections, wire
//! encoding — is an external collaborator (see [`crate::substrate::ingest`]
//! and [`crate::substrate::outbox`]). This module only defines the shapes the
//! engine reads and writes.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::amount::{Amount, BigIntParseError};

/// A public identity on the substrate (hex-encoded, opaque to the engine).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PublicKey(pub String);

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A substrate event id: the stable hash of the signed payload. Unlike the
/// engine's own entity ids (Token, Transaction, Balance, ...), this is not a
/// UUID — it is whatever the substrate's signing convention produces.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(pub String);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single substrate tag: `["p", "<pubkey>"]`, `["e", "<id>"]`, `["t", "<tag>"]`, ...
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag(pub Vec<String>);

impl Tag {
    pub fn new(kind: &str, values: impl IntoIterator<Item = String>) -> Self {
        let mut v = vec![kind.to_string()];
        v.extend(values);
        Tag(v)
    }

    pub fn p(pubkey: &PublicKey) -> Self {
        Tag::new("p", [pubkey.0.clone()])
    }

    pub fn e(id: &EventId) -> Self {
        Tag::new("e", [id.0.clone()])
    }

    pub fn t(value: impl Into<String>) -> Self {
        Tag::new("t", [value.into()])
    }

    pub fn d(value: impl Into<String>) -> Self {
        Tag::new("d", [value.into()])
    }

    pub fn amount(value: &Amount) -> Self {
        Tag::new("amount", [value.to_string()])
    }

    pub fn delegation(delegator: &PublicKey) -> Self {
        Tag::new("delegation", [delegator.0.clone()])
    }

    pub fn kind(&self) -> &str {
        self.0.first().map(String::as_str).unwrap_or("")
    }

    pub fn value(&self) -> Option<&str> {
        self.0.get(1).map(String::as_str)
    }

    /// All `p` tags, in tag order. By convention the first is the ledger's
    /// own identity (the subscription target); the second is the receiver.
    pub fn p_values(tags: &[Tag]) -> Vec<&str> {
        tags.iter()
            .filter(|t| t.kind() == "p")
            .filter_map(Tag::value)
            .collect()
    }
}

/// Regular events (transaction outcomes, requests): kind 1112.
pub const KIND_TRANSACTION: i32 = 1112;
/// Parametrised-replaceable events (balance announcements): kind 31111.
pub const KIND_BALANCE_ANNOUNCEMENT: i32 = 31111;

pub const TAG_INTERNAL_START: &str = "internal-transaction-start";
pub const TAG_INBOUND_START: &str = "inbound-transaction-start";
pub const TAG_OUTBOUND_START: &str = "outbound-transaction-start";

/// A signed event as delivered by / handed to the substrate.
///
/// `author` is deliberately absent: it is derived by the pre-validation
/// pipeline from `signer` plus any `delegation` tag, never carried as a
/// field the substrate itself vouches for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedEvent {
    pub id: EventId,
    pub signature: String,
    pub signer: PublicKey,
    pub kind: i32,
    pub created_at: i64,
    pub tags: Vec<Tag>,
    /// Raw JSON content, parsed on demand by the pre-validation pipeline.
    /// Left as a string (not eagerly parsed) so a malformed payload can
    /// still be persisted as an Event with an empty payload (§4.1.2).
    pub content: String,
}

impl SignedEvent {
    pub fn tag_value(&self, kind: &str) -> Option<&str> {
        self.tags.iter().find(|t| t.kind() == kind).and_then(Tag::value)
    }

    pub fn delegation_tag(&self) -> Option<&str> {
        self.tag_value("delegation")
    }

    pub fn transaction_type_tag(&self) -> Option<&str> {
        self.tag_value("t")
    }

    /// Parses `content` as JSON, decoding numeric leaves as exact
    /// [`Amount`] values rather than floats. Requires the caller's
    /// `serde_json` build to carry the `arbitrary_precision` feature.
    pub fn parse_content(&self) -> Result<RequestContent, ContentParseError> {
        let value: Value =
            serde_json::from_str(&self.content).map_err(|_| ContentParseError::Malformed)?;
        RequestContent::from_value(value)
    }
}

/// Parsed `{ "tokens": { "<name>": <amount> }, "memo": "..." }` payload.
#[derive(Debug, Clone, Default)]
pub struct RequestContent {
    pub tokens: BTreeMap<String, Amount>,
    pub memo: Option<String>,
    /// The content as received, re-published verbatim in ok outcome events.
    pub raw: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentParseError {
    Malformed,
}

impl RequestContent {
    fn from_value(value: Value) -> Result<Self, ContentParseError> {
        let obj = value.as_object().ok_or(ContentParseError::Malformed)?;

        let tokens_value = obj.get("tokens").ok_or(ContentParseError::Malformed)?;
        let tokens_obj = tokens_value.as_object().ok_or(ContentParseError::Malformed)?;

        let mut tokens = BTreeMap::new();
        for (name, amount_value) in tokens_obj {
            let number = amount_value.as_number().ok_or(ContentParseError::Malformed)?;
            let amount =
                Amount::from_json_number(number).map_err(|BigIntParseError| ContentParseError::Malformed)?;
            tokens.insert(name.clone(), amount);
        }

        let memo = obj
            .get("memo")
            .and_then(|m| m.as_str())
            .map(|s| s.to_string());

        Ok(RequestContent {
            tokens,
            memo,
            raw: value,
        })
    }
}
