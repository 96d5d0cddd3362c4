use serde::{Deserialize, Serialize};
use std::fmt;

/// Content fingerprint: the lowercase hex digest produced by the configured
/// hash tool. Records are sharded on disk by the first two characters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap a digest string, normalising to lowercase.
    pub fn new<S: Into<String>>(digest: S) -> Self {
        let digest = digest.into();
        if digest.chars().any(|c| c.is_ascii_uppercase()) {
            Fingerprint(digest.to_ascii_lowercase())
        } else {
            Fingerprint(digest)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Two-character shard directory name.
    pub fn shard(&self) -> &str {
        &self.0[..self.0.len().min(2)]
    }

    /// Everything after the shard; the canonical artifact basename.
    pub fn rest(&self) -> &str {
        &self.0[self.0.len().min(2)..]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Fingerprint {
    fn from(value: &str) -> Self {
        Fingerprint::new(value)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalises_case_and_shards() {
        let fp = Fingerprint::new("D41D8CD98F00b204e9800998ecf8427e");
        assert_eq!(fp.as_str(), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(fp.shard(), "d4");
        assert_eq!(fp.rest(), "1d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn short_digests_do_not_panic() {
        let fp = Fingerprint::new("a");
        assert_eq!(fp.shard(), "a");
        assert_eq!(fp.rest(), "");
    }
}
