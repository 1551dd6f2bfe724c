use super::{header, zero_position, Error, ObjectKind, Result, Sha1Hash};
use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::trace;

/// Loose object database under `<git dir>/objects`.
#[derive(Debug, Clone)]
pub struct ObjectStore {
    objects_dir: PathBuf,
}

impl ObjectStore {
    pub fn new<P: AsRef<Path>>(git_dir: P) -> Self {
        Self {
            objects_dir: git_dir.as_ref().join("objects"),
        }
    }

    pub fn path_of(&self, hash: &Sha1Hash) -> PathBuf {
        let hex = hash.hex();
        self.objects_dir.join(&hex[..2]).join(&hex[2..])
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, hash: &Sha1Hash) -> bool {
        self.path_of(hash).is_file()
    }

    /// Stores `content` as a loose object and returns its id.
    ///
    /// The object is compressed into a temporary file beside its final path
    /// and renamed into place, so the store never holds a half-written
    /// object. Writing an id that is already stored replaces the file.
    pub fn write(&self, kind: ObjectKind, content: &[u8]) -> Result<Sha1Hash> {
        let hash = super::hash_object(kind, content);
        let path = self.path_of(&hash);
        let dir = path
            .parent()
            .ok_or_else(|| Error::Object(format!("no directory for object {hash}")))?;
        fs::create_dir_all(dir)?;

        let mut e = ZlibEncoder::new(NamedTempFile::new_in(dir)?, Compression::default());
        e.write_all(header(kind, content).as_bytes())?;
        e.write_all(content)?;
        e.finish()?
            .persist(&path)
            .map_err(|err| Error::Io(err.error))?;

        trace!(%hash, %kind, size = content.len(), "wrote object");
        Ok(hash)
    }

    pub fn read(&self, hash: &Sha1Hash) -> Result<(Vec<u8>, ObjectKind)> {
        let f = File::open(self.path_of(hash)).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => Error::ObjectNotFound(*hash),
            _ => Error::Io(err),
        })?;

        let mut data = vec![];
        ZlibDecoder::new(f).read_to_end(&mut data)?;

        let zero_pos = zero_position(&data)
            .ok_or_else(|| Error::Object(format!("no header terminator in object {hash}")))?;
        let (kind, size) = parse_header(&data[..zero_pos])
            .ok_or_else(|| Error::Object(format!("malformed header in object {hash}")))?;
        let kind: ObjectKind = kind.parse()?;

        data.drain(..=zero_pos);
        if data.len() != size {
            return Err(Error::Object(format!(
                "object size mismatch for {hash}: expected {size}, got {}",
                data.len()
            )));
        }

        Ok((data, kind))
    }
}

fn parse_header(bytes: &[u8]) -> Option<(&str, usize)> {
    let (kind, size) = std::str::from_utf8(bytes).ok()?.split_once(' ')?;
    Some((kind, size.parse().ok()?))
}
