use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 digest of the given content.
///
/// All no-op detection in the reconciler compares these digests, so every
/// store has to derive them from the exact stored bytes.
pub fn sha256_hex(content: impl AsRef<[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_ref());
    let hash = hasher.finalize();
    format!("{hash:x}")
}

#[cfg(test)]
mod tests {
    use super::sha256_hex;

    #[test]
    fn empty_content() {
        assert_eq!(
            sha256_hex(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
        );
    }

    #[test]
    fn content_addressing() {
        assert_eq!(sha256_hex("dashboard"), sha256_hex("dashboard"));
        assert_ne!(sha256_hex("dashboard"), sha256_hex("dashboard "));
    }
}
