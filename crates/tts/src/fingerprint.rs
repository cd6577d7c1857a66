//! Synthesis fingerprints
//!
//! A fingerprint identifies one (text, engine configuration) tuple. Text
//! is trimmed and whitespace-collapsed before hashing so cosmetic
//! differences never duplicate cache entries.

use sha2::{Digest, Sha256};

/// 128-bit content-addressed identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 16]);

impl Fingerprint {
    /// Digest of the normalized synthesis tuple.
    pub fn compute(
        text: &str,
        engine: &str,
        voice: &str,
        sample_rate: u32,
        format: &str,
    ) -> Self {
        let normalized = normalize(text);

        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        hasher.update([0u8]);
        hasher.update(engine.as_bytes());
        hasher.update([0u8]);
        hasher.update(voice.as_bytes());
        hasher.update([0u8]);
        hasher.update(sample_rate.to_le_bytes());
        hasher.update([0u8]);
        hasher.update(format.as_bytes());

        let digest = hasher.finalize();
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Lowercase hex, used as the on-disk file name.
    pub fn hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Parse a hex file name back into a fingerprint.
    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() != 32 {
            return None;
        }
        let mut bytes = [0u8; 16];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(Self(bytes))
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_across_calls() {
        let a = Fingerprint::compute("hello", "local", "amber", 16000, "pcm16");
        let b = Fingerprint::compute("hello", "local", "amber", 16000, "pcm16");
        assert_eq!(a, b);
    }

    #[test]
    fn whitespace_is_normalized() {
        let a = Fingerprint::compute("  hello   world ", "local", "amber", 16000, "pcm16");
        let b = Fingerprint::compute("hello world", "local", "amber", 16000, "pcm16");
        assert_eq!(a, b);
    }

    #[test]
    fn any_tuple_field_changes_the_digest() {
        let base = Fingerprint::compute("hello", "local", "amber", 16000, "pcm16");
        assert_ne!(base, Fingerprint::compute("hello!", "local", "amber", 16000, "pcm16"));
        assert_ne!(base, Fingerprint::compute("hello", "remote", "amber", 16000, "pcm16"));
        assert_ne!(base, Fingerprint::compute("hello", "local", "jade", 16000, "pcm16"));
        assert_ne!(base, Fingerprint::compute("hello", "local", "amber", 22050, "pcm16"));
        assert_ne!(base, Fingerprint::compute("hello", "local", "amber", 16000, "opus"));
    }

    #[test]
    fn hex_round_trip() {
        let fp = Fingerprint::compute("round trip", "local", "amber", 16000, "pcm16");
        let hex = fp.hex();
        assert_eq!(hex.len(), 32);
        assert_eq!(Fingerprint::from_hex(&hex), Some(fp));
    }

    #[test]
    fn bad_hex_is_rejected() {
        assert!(Fingerprint::from_hex("not-hex").is_none());
        assert!(Fingerprint::from_hex("abcd").is_none());
    }
}
