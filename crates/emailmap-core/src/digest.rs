use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

const DIGEST_HEX_LEN: usize = 64;
const SHORT_LEN: usize = 12;

/// How an email is canonicalised before hashing.
///
/// `None` hashes the bytes exactly as stored on the user record, which is what
/// existing index keys were derived from. Switching to `TrimLowercase` changes
/// every key and requires a reindex.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EmailNormalization {
    #[default]
    None,
    TrimLowercase,
}

impl EmailNormalization {
    pub fn apply<'a>(&self, email: &'a str) -> std::borrow::Cow<'a, str> {
        match self {
            EmailNormalization::None => std::borrow::Cow::Borrowed(email),
            EmailNormalization::TrimLowercase => {
                std::borrow::Cow::Owned(email.trim().to_lowercase())
            }
        }
    }
}

impl FromStr for EmailNormalization {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "raw" => Ok(EmailNormalization::None),
            "trim_lowercase" | "trim-lowercase" => Ok(EmailNormalization::TrimLowercase),
            other => anyhow::bail!("unknown email normalization: {other}"),
        }
    }
}

/// Lowercase hex SHA-256 of an email address. Used as the index document id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EmailDigest(String);

impl EmailDigest {
    pub fn of(email: &str, normalization: EmailNormalization) -> Self {
        let canonical = normalization.apply(email);
        let digest = Sha256::digest(canonical.as_bytes());
        Self(hex::encode(digest))
    }

    /// Accepts an already computed digest. Uppercase hex is rejected so that a
    /// parsed digest always names the same document as a computed one.
    pub fn parse(hex_digest: &str) -> Option<Self> {
        let valid = hex_digest.len() == DIGEST_HEX_LEN
            && hex_digest
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(hex_digest.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        &self.0[..SHORT_LEN]
    }
}

impl TryFrom<String> for EmailDigest {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("not a sha-256 hex digest: {value:?}"))
    }
}

impl From<EmailDigest> for String {
    fn from(digest: EmailDigest) -> Self {
        digest.0
    }
}

impl fmt::Display for EmailDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
