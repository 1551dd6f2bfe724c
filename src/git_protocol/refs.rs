use super::{Error, PktLine, Result};
use std::collections::BTreeMap;
use std::io::Read;
use tracing::debug;

const SYMREF_HEAD: &str = "symref=HEAD:";

/// Ref name to object id, as advertised by the remote.
pub type RefMap = BTreeMap<String, String>;

/// What `info/refs?service=git-upload-pack` told us about the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub head_id: String,
    pub head_symref: String,
    pub refs: RefMap,
}

impl Advertisement {
    pub fn parse<R: Read>(mut r: R) -> Result<Self> {
        // "# service=git-upload-pack\n"
        read_line(&mut r)?;

        let first_line = loop {
            let line = read_line(&mut r)?;
            if !line.payload().is_empty() {
                break String::from_utf8_lossy(line.payload()).trim().to_string();
            }
        };

        let (head, capabilities) = first_line.split_once('\0').ok_or_else(|| {
            Error::Protocol(format!(
                "invalid format for HEAD advertisement line: {first_line:?}"
            ))
        })?;
        let head_id = head
            .split_once(' ')
            .map_or(head, |(id, _)| id)
            .to_string();
        let head_symref = capabilities
            .split(' ')
            .find_map(|cap| cap.strip_prefix(SYMREF_HEAD))
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                Error::Protocol(
                    "cannot determine HEAD: no symref=HEAD capability advertised".into(),
                )
            })?
            .to_string();

        let mut refs = RefMap::new();
        refs.insert(head_symref.clone(), head_id.clone());

        while let Some(line) = PktLine::read_from(&mut r)? {
            if line.is_flush() {
                break;
            }
            let text = String::from_utf8_lossy(line.payload());
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            match text.split_once(' ') {
                Some((id, name)) => {
                    refs.insert(name.to_string(), id.to_string());
                }
                None => debug!(line = text, "skipping malformed ref line"),
            }
        }

        Ok(Self {
            head_id,
            head_symref,
            refs,
        })
    }
}

fn read_line<R: Read>(r: &mut R) -> Result<PktLine> {
    PktLine::read_from(r)?
        .ok_or_else(|| Error::Protocol("ref advertisement ended unexpectedly".into()))
}
