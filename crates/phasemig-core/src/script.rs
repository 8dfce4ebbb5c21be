use sha2::{Digest, Sha256};

/// A single migration script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    /// Path relative to the scanned root, always `/`-separated (e.g. "0002/add_posts.sql").
    pub name: String,
    /// Raw SQL text.
    pub contents: String,
    /// SHA-256 of `contents`, lowercase hex.
    pub checksum: String,
}

impl Script {
    pub fn new(name: impl Into<String>, contents: impl Into<String>) -> Self {
        let contents = contents.into();
        let checksum = compute_checksum(&contents);
        Self {
            name: name.into(),
            contents,
            checksum,
        }
    }
}

/// Sort into execution order: ordinal by name, stable for equal names.
pub fn sort_by_name(scripts: &mut [Script]) {
    scripts.sort_by(|a, b| a.name.cmp(&b.name));
}

/// Compute SHA256 checksum of a string
pub fn compute_checksum(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    format!("{:x}", hasher.finalize())
}
