//! Canonical serialization of password digest records.
//!
//! Digests travel as PHC strings (`$argon2i$v=19$m=...,t=...,p=...$salt$hash`)
//! so every record is self-describing: the algorithm id, its parameters and
//! the salt ride along with the digest bytes. Verification never needs an
//! external parameter lookup, and digests created under older defaults stay
//! verifiable after the defaults move.

use argon2::password_hash::PasswordHash;

/// The closed set of digest algorithms this service understands.
///
/// Adding an algorithm is a deliberate code change here and in the
/// dispatch sites, not a string-keyed lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashScheme {
    /// Memory-hard Argon2i. The only algorithm used for new credentials.
    Argon2i,
    /// PBKDF2-HMAC-SHA256. Kept to verify digests that predate Argon2.
    Pbkdf2Sha256,
}

impl HashScheme {
    /// PHC algorithm identifier embedded in serialized records.
    #[must_use]
    pub const fn ident(self) -> &'static str {
        match self {
            Self::Argon2i => "argon2i",
            Self::Pbkdf2Sha256 => "pbkdf2-sha256",
        }
    }

    /// Resolve a PHC algorithm identifier against the closed set.
    #[must_use]
    pub fn from_ident(ident: &str) -> Option<Self> {
        match ident {
            "argon2i" => Some(Self::Argon2i),
            "pbkdf2-sha256" => Some(Self::Pbkdf2Sha256),
            _ => None,
        }
    }
}

impl std::fmt::Display for HashScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.ident())
    }
}

/// Codec failure: the record cannot be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Not a well-formed record, or the algorithm id is not a supported
    /// one. Both collapse: an unknown algorithm is unverifiable either way.
    #[error("malformed digest record")]
    MalformedDigest,
}

/// Serialize a parsed record back to its canonical string form.
#[must_use]
pub fn encode(record: &PasswordHash<'_>) -> String {
    record.to_string()
}

/// Parse a serialized record and resolve its algorithm.
///
/// # Errors
///
/// Fails with [`CodecError::MalformedDigest`] when the string does not
/// parse as a PHC record or names an algorithm outside the supported set.
pub fn decode(serialized: &str) -> Result<(HashScheme, PasswordHash<'_>), CodecError> {
    let record = PasswordHash::new(serialized).map_err(|_| CodecError::MalformedDigest)?;
    let scheme =
        HashScheme::from_ident(record.algorithm.as_str()).ok_or(CodecError::MalformedDigest)?;
    Ok((scheme, record))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARGON2I_SAMPLE: &str =
        "$argon2i$v=19$m=1024,t=1,p=1$c29tZXNhbHRzb21lc2FsdA$9sTbSlTio3Biev89thdrlKKiCaYsjjYVJxGAL3swxpQ";

    #[test]
    fn decode_resolves_the_embedded_algorithm() {
        let (scheme, record) = decode(ARGON2I_SAMPLE).expect("parses");
        assert_eq!(scheme, HashScheme::Argon2i);
        assert_eq!(record.algorithm.as_str(), "argon2i");
    }

    #[test]
    fn decode_round_trips_through_encode() {
        let (_, record) = decode(ARGON2I_SAMPLE).expect("parses");
        assert_eq!(encode(&record), ARGON2I_SAMPLE);
    }

    #[test]
    fn unknown_algorithm_is_malformed() {
        let foreign = ARGON2I_SAMPLE.replacen("argon2i", "scrypt", 1);
        assert_eq!(decode(&foreign), Err(CodecError::MalformedDigest));
    }

    #[test]
    fn garbage_is_malformed() {
        assert_eq!(decode(""), Err(CodecError::MalformedDigest));
        assert_eq!(decode("not-a-digest"), Err(CodecError::MalformedDigest));
        assert_eq!(decode("$argon2i$"), Err(CodecError::MalformedDigest));
    }

    #[test]
    fn idents_round_trip() {
        for scheme in [HashScheme::Argon2i, HashScheme::Pbkdf2Sha256] {
            assert_eq!(HashScheme::from_ident(scheme.ident()), Some(scheme));
        }
        assert_eq!(HashScheme::from_ident("argon2id"), None);
    }
}
