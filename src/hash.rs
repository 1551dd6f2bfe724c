use super::Error;
use sha1::{Digest, Sha1};
use std::fmt;
use std::str::FromStr;

pub const SHA1_HASH_SIZE: usize = 20;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Sha1Hash([u8; SHA1_HASH_SIZE]);

impl Sha1Hash {
    pub fn hasher() -> Sha1 {
        Sha1::new()
    }

    pub fn new(hasher: Sha1) -> Self {
        Self(hasher.finalize().into())
    }

    /// Hashes `data` in one go.
    pub fn digest(data: &[u8]) -> Self {
        Self::new(Self::hasher().chain_update(data))
    }

    pub fn hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<&[u8]> for Sha1Hash {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        Ok(Self(bytes.try_into()?))
    }
}

impl From<[u8; SHA1_HASH_SIZE]> for Sha1Hash {
    fn from(value: [u8; SHA1_HASH_SIZE]) -> Self {
        Self(value)
    }
}

impl FromStr for Sha1Hash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)
            .map_err(|err| Error::Object(format!("invalid object id {s:?}: {err}")))?;
        Self::try_from(&bytes[..])
    }
}

impl fmt::Display for Sha1Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_hashes_like_git_hash_object() {
        let hash = Sha1Hash::digest(b"blob 11\0hello world");
        assert_eq!(hash.hex(), "95d09f2b10159347eece71399a7e2e907ea3df4f");
    }

    #[test]
    fn it_parses_hex_text() {
        let hash: Sha1Hash = "95d09f2b10159347eece71399a7e2e907ea3df4f".parse().unwrap();
        assert_eq!(hash.to_string(), "95d09f2b10159347eece71399a7e2e907ea3df4f");
    }

    #[test]
    fn it_rejects_short_or_non_hex_text() {
        assert!("95d09f2b".parse::<Sha1Hash>().is_err());
        assert!("zz".repeat(20).parse::<Sha1Hash>().is_err());
    }
}
