/// Errors produced by limiters and the stores backing them.
///
/// None of these is ever an implicit admission. Callers that want fail-open
/// behaviour must choose it explicitly around the call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LimitError {
    /// The backing medium could not be reached or is no longer usable.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// The value stored under `key` does not have the shape the limiter expects.
    ///
    /// The store may be shared infrastructure, so another writer can leave a
    /// value of a different kind under the same key.
    #[error("Entry at `{key}` is corrupt: {detail}")]
    EntryCorrupt {
        /// The key whose value could not be interpreted.
        key: String,
        /// What was found instead.
        detail: String,
    },

    /// A quota parameter was zero, negative or not finite.
    ///
    /// Raised before any store interaction.
    #[error("Invalid parameters: {0}")]
    InvalidParameters(&'static str),
}

impl LimitError {
    /// `true` for failures originating in the store rather than the caller.
    ///
    /// A corrupt entry is grouped with unavailability: neither tells the
    /// limiter anything it can safely decide on.
    pub fn is_store_failure(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_) | Self::EntryCorrupt { .. })
    }

    pub(crate) fn corrupt(key: &str, detail: impl Into<String>) -> Self {
        Self::EntryCorrupt {
            key: key.to_string(),
            detail: detail.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_classifies_store_failures() {
        assert!(LimitError::StoreUnavailable("down".into()).is_store_failure());
        assert!(LimitError::corrupt("k", "bucket").is_store_failure());
        assert!(!LimitError::InvalidParameters("limit must be non-zero").is_store_failure());
    }

    #[test]
    fn it_names_the_corrupt_key() {
        let err = LimitError::corrupt("login:alice", "found a token bucket");
        assert_eq!(
            err.to_string(),
            "Entry at `login:alice` is corrupt: found a token bucket"
        );
    }
}
