//! SHA-256 helpers.

use sha2::{Digest, Sha256};

/// A 256-bit (32-byte) hash value.
pub type Hash256 = [u8; 32];

/// Computes a SHA-256 hash of the input bytes.
///
/// # Examples
///
/// ```
/// use finality_ids::compute_hash256;
///
/// let hash = compute_hash256(b"hello world");
/// assert_eq!(hash.len(), 32);
/// ```
#[must_use]
pub fn compute_hash256(data: &[u8]) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Computes SHA-256(SHA-256(data)), the hash used for block and transaction ids.
#[must_use]
pub fn compute_double_hash256(data: &[u8]) -> Hash256 {
    compute_hash256(&compute_hash256(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_hash256() {
        // Known SHA-256 hash of empty string
        let hash = compute_hash256(b"");
        let expected =
            hex::decode("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855")
                .unwrap();
        assert_eq!(hash.as_slice(), expected.as_slice());
    }

    #[test]
    fn test_double_hash_differs_from_single() {
        let single = compute_hash256(b"block");
        let double = compute_double_hash256(b"block");
        assert_ne!(single, double);
        assert_eq!(double, compute_hash256(&single));
    }
}
