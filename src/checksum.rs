//! Dataset fingerprints for cache integrity verification

use sha2::{Digest, Sha256};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::dataset::Dataset;

/// SHA256 fingerprint of a dataset's canonical JSON encoding
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute fingerprint from raw bytes
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self(format!("{:x}", hash))
    }

    /// Compute fingerprint from a dataset (columns, then rows, in order)
    pub fn of_dataset(dataset: &Dataset) -> Self {
        // Dataset serialization only fails for non-string map keys, which it never has
        let canonical = serde_json::to_vec(dataset).unwrap_or_default();
        Self::from_bytes(&canonical)
    }

    /// Get the hex string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Verify that a dataset matches this fingerprint
    pub fn verify(&self, dataset: &Dataset) -> bool {
        *self == Self::of_dataset(dataset)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Dataset {
        Dataset::from_rows(["id", "name"], vec![vec![json!(1), json!("a")]]).unwrap()
    }

    #[test]
    fn test_fingerprint_consistency() {
        assert_eq!(Fingerprint::of_dataset(&sample()), Fingerprint::of_dataset(&sample()));
    }

    #[test]
    fn test_fingerprint_different_content() {
        let mut other = sample();
        other.push_row(vec![json!(2), json!("b")]).unwrap();
        assert_ne!(Fingerprint::of_dataset(&sample()), Fingerprint::of_dataset(&other));
    }

    #[test]
    fn test_fingerprint_verification() {
        let fingerprint = Fingerprint::of_dataset(&sample());
        assert!(fingerprint.verify(&sample()));
        assert!(!fingerprint.verify(&Dataset::new(["id"])));
        assert_eq!(fingerprint.as_str().len(), 64);
    }
}
