//! Shard iterators and the policies used to obtain them.

use crate::record::SequenceNumber;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque position handle issued by the log service.
///
/// Tokens are backend specific. They are threaded back into `get_records`
/// unchanged and never inspected.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IteratorToken(String);

impl IteratorToken {
    /// Wraps a backend token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Tokens can be long and carry backend secrets; keep them out of logs.
impl fmt::Debug for IteratorToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IteratorToken(len={})", self.0.len())
    }
}

/// Wire name of an iterator type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IteratorType {
    /// Start after the most recent record.
    Latest,
    /// Start at the oldest untrimmed record.
    TrimHorizon,
    /// Start at a given sequence number.
    AtSequenceNumber,
    /// Start right after a given sequence number.
    AfterSequenceNumber,
}

impl IteratorType {
    /// Returns the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            IteratorType::Latest => "LATEST",
            IteratorType::TrimHorizon => "TRIM_HORIZON",
            IteratorType::AtSequenceNumber => "AT_SEQUENCE_NUMBER",
            IteratorType::AfterSequenceNumber => "AFTER_SEQUENCE_NUMBER",
        }
    }

    /// Parses a wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "LATEST" => Some(IteratorType::Latest),
            "TRIM_HORIZON" => Some(IteratorType::TrimHorizon),
            "AT_SEQUENCE_NUMBER" => Some(IteratorType::AtSequenceNumber),
            "AFTER_SEQUENCE_NUMBER" => Some(IteratorType::AfterSequenceNumber),
            _ => None,
        }
    }
}

impl fmt::Display for IteratorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a freshly acquired shard iterator starts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IteratorPolicy {
    /// Only records written after the iterator is issued.
    Latest,
    /// Everything still retained by the shard.
    TrimHorizon,
    /// The record with this sequence number and everything after it.
    AtSequenceNumber(SequenceNumber),
    /// Everything strictly after this sequence number.
    AfterSequenceNumber(SequenceNumber),
}

impl IteratorPolicy {
    /// Returns the wire iterator type.
    pub fn iterator_type(&self) -> IteratorType {
        match self {
            IteratorPolicy::Latest => IteratorType::Latest,
            IteratorPolicy::TrimHorizon => IteratorType::TrimHorizon,
            IteratorPolicy::AtSequenceNumber(_) => IteratorType::AtSequenceNumber,
            IteratorPolicy::AfterSequenceNumber(_) => IteratorType::AfterSequenceNumber,
        }
    }

    /// Returns the starting sequence number, if the policy carries one.
    pub fn starting_sequence_number(&self) -> Option<&SequenceNumber> {
        match self {
            IteratorPolicy::AtSequenceNumber(seq) | IteratorPolicy::AfterSequenceNumber(seq) => {
                Some(seq)
            }
            IteratorPolicy::Latest | IteratorPolicy::TrimHorizon => None,
        }
    }
}

impl Default for IteratorPolicy {
    fn default() -> Self {
        IteratorPolicy::TrimHorizon
    }
}
