mod store;

use super::{Error, Result, Sha1Hash};
use sha1::Digest;
use std::fmt;
use std::str::FromStr;

pub use store::ObjectStore;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Commit,
    Tree,
    Blob,
    Tag,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Commit => "commit",
            Self::Tree => "tree",
            Self::Blob => "blob",
            Self::Tag => "tag",
        }
    }
}

impl FromStr for ObjectKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "commit" => Ok(Self::Commit),
            "tree" => Ok(Self::Tree),
            "blob" => Ok(Self::Blob),
            "tag" => Ok(Self::Tag),
            _ => Err(Error::Object(format!("unknown object type {s:?}"))),
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// NOTE:
// A loose object is "<type> <size>\0<contents>", hashed and stored as a whole.
fn header(kind: ObjectKind, content: &[u8]) -> String {
    format!("{kind} {}\0", content.len())
}

pub fn hash_object(kind: ObjectKind, content: &[u8]) -> Sha1Hash {
    let hasher = Sha1Hash::hasher()
        .chain_update(header(kind, content))
        .chain_update(content);
    Sha1Hash::new(hasher)
}

fn zero_position(bytes: &[u8]) -> Option<usize> {
    bytes.iter().position(|&b| b == b'\0')
}
