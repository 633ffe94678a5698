//! Peer identifier type.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::hashing::compute_hash256;
use crate::NODE_ID_LEN;

/// The prefix for NodeID string representations.
pub const NODE_ID_PREFIX: &str = "NodeID-";

/// A 20-byte identifier for a quorum peer.
///
/// Peers derive their NodeID from the delegated public key they vote with:
/// the first 20 bytes of `SHA256(compressed_public_key)`.
///
/// # Examples
///
/// ```
/// use finality_ids::NodeId;
///
/// let id = NodeId::from_bytes([0u8; 20]);
/// assert!(id.is_empty());
/// assert!(id.to_string().starts_with("NodeID-"));
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NodeId([u8; NODE_ID_LEN]);

/// Errors that can occur when parsing a NodeID.
#[derive(Debug, Error)]
pub enum NodeIdError {
    /// The hex decoding failed.
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    /// The decoded bytes have the wrong length.
    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// The NodeID string is missing the required prefix.
    #[error("missing NodeID- prefix")]
    MissingPrefix,
}

impl NodeId {
    /// The empty (zero) NodeID.
    pub const EMPTY: Self = Self([0u8; NODE_ID_LEN]);

    /// Creates a NodeID from a 20-byte array.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; NODE_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Creates a NodeID from a slice, returning an error if the length is wrong.
    ///
    /// # Errors
    ///
    /// Returns `NodeIdError::InvalidLength` if the slice is not exactly 20 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, NodeIdError> {
        if bytes.len() != NODE_ID_LEN {
            return Err(NodeIdError::InvalidLength {
                expected: NODE_ID_LEN,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; NODE_ID_LEN];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    /// Derives a NodeID from a serialized public key.
    #[must_use]
    pub fn from_public_key(public_key: &[u8]) -> Self {
        let digest = compute_hash256(public_key);
        let mut arr = [0u8; NODE_ID_LEN];
        arr.copy_from_slice(&digest[..NODE_ID_LEN]);
        Self(arr)
    }

    /// Returns the NodeID as a byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; NODE_ID_LEN] {
        &self.0
    }

    /// Returns true if this is the empty (zero) NodeID.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0 == [0u8; NODE_ID_LEN]
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{NODE_ID_PREFIX}{}", hex::encode(self.0))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self)
    }
}

impl FromStr for NodeId {
    type Err = NodeIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stripped = s
            .strip_prefix(NODE_ID_PREFIX)
            .ok_or(NodeIdError::MissingPrefix)?;
        let bytes = hex::decode(stripped)?;
        Self::from_slice(&bytes)
    }
}

impl PartialOrd for NodeId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NodeId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl AsRef<[u8]> for NodeId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; NODE_ID_LEN]> for NodeId {
    fn from(bytes: [u8; NODE_ID_LEN]) -> Self {
        Self::from_bytes(bytes)
    }
}

impl Serialize for NodeId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_string())
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            s.parse().map_err(serde::de::Error::custom)
        } else {
            let bytes = <Vec<u8>>::deserialize(deserializer)?;
            Self::from_slice(&bytes).map_err(serde::de::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_public_key_is_stable() {
        let a = NodeId::from_public_key(b"delegated key");
        let b = NodeId::from_public_key(b"delegated key");
        let c = NodeId::from_public_key(b"another key");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(!a.is_empty());
    }

    #[test]
    fn test_string_missing_prefix() {
        let result = "0102".parse::<NodeId>();
        assert!(matches!(result, Err(NodeIdError::MissingPrefix)));
    }

    #[test]
    fn test_string_wrong_length() {
        let result = "NodeID-0102".parse::<NodeId>();
        assert!(matches!(result, Err(NodeIdError::InvalidLength { .. })));
    }

    #[test]
    fn test_json_serialization() {
        let id = NodeId::from_bytes([42u8; 20]);
        let json = serde_json::to_string(&id).unwrap();
        assert!(json.contains(NODE_ID_PREFIX));

        let parsed: NodeId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_ordering_is_bytewise() {
        let a = NodeId::from_bytes([1u8; 20]);
        let b = NodeId::from_bytes([2u8; 20]);
        assert!(a < b);
        assert_eq!(a.cmp(&a), std::cmp::Ordering::Equal);
    }
}
