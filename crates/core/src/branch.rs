//! Opaque branch handles.
//!
//! A [`BranchToken`] names one forkable branch inside a history store. Only
//! the store that issued a token interprets its bytes; everything else
//! passes it around unchanged. Tokens serialize as base64 strings so they
//! survive JSON payloads and log lines intact.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Opaque, serializable handle to one history branch.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct BranchToken(Vec<u8>);

impl BranchToken {
    pub fn new(bytes: Vec<u8>) -> Self {
        BranchToken(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Base64 rendering used by `Display`, `Debug` and serde.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }

    pub fn from_base64(encoded: &str) -> Result<Self, base64::DecodeError> {
        STANDARD.decode(encoded).map(BranchToken)
    }
}

impl From<Vec<u8>> for BranchToken {
    fn from(bytes: Vec<u8>) -> Self {
        BranchToken(bytes)
    }
}

impl fmt::Display for BranchToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl fmt::Debug for BranchToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BranchToken({})", self.to_base64())
    }
}

impl Serialize for BranchToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for BranchToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BranchToken::from_base64(&encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_base64_string() {
        let token = BranchToken::new(vec![0xde, 0xad, 0xbe, 0xef]);
        let json = serde_json::to_value(&token).unwrap();
        assert_eq!(json, serde_json::json!("3q2+7w=="));
        let back: BranchToken = serde_json::from_value(json).unwrap();
        assert_eq!(back, token);
    }

    #[test]
    fn rejects_invalid_base64() {
        let err = serde_json::from_value::<BranchToken>(serde_json::json!("not base64!"));
        assert!(err.is_err());
    }

    #[test]
    fn debug_does_not_dump_raw_bytes() {
        let token = BranchToken::new(b"abc".to_vec());
        assert_eq!(format!("{token:?}"), "BranchToken(YWJj)");
    }
}
