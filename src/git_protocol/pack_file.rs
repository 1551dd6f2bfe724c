use super::{
    apply_delta,
    git_object::{ObjectKind, ObjectStore},
    Error, Result, Sha1Hash, SHA1_HASH_SIZE,
};
use flate2::{Decompress, FlushDecompress, Status};
use sha1::{Digest, Sha1};
use std::fmt;
use std::io::{self, BufRead, Read};
use tracing::{debug, info};

const MASK_LAST_4: u8 = 0b00001111;
const MASK_LAST_7: u8 = 0b01111111;
const MASK_OBJECT_TYPE: u8 = 0b01110000;

const PACK_SIGNATURE: &[u8; 4] = b"PACK";
const PACK_VERSION: u32 = 2;
const PACK_HEADER_SIZE: usize = 12;

// Upper bound on what an object header can make us preallocate.
const MAX_PREALLOC: usize = 1 << 20;
const INFLATE_CHUNK: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackSummary {
    pub num_objects: u32,
    pub checksum: Sha1Hash,
}

/// Decodes a version 2 packfile from `reader`, storing every object in `store`.
///
/// Ref-delta bases must be stored before the delta that names them: either
/// earlier in this pack or already present in `store`.
pub fn decode<R: BufRead>(reader: R, store: &ObjectStore) -> Result<PackSummary> {
    let mut pack = PackFile::new(reader)?;
    info!(objects = pack.num_objects, "decoding packfile");

    while let Some(entry) = pack.next_entry()? {
        match entry {
            PackEntry::Object { kind, data } => {
                let hash = store.write(kind, &data)?;
                debug!(%hash, %kind, size = data.len(), "stored object");
            }
            PackEntry::RefDelta { base, delta } => {
                let (data, kind) = apply_delta(&base, &delta, store)?;
                let hash = store.write(kind, &data)?;
                debug!(%hash, %base, %kind, size = data.len(), "stored deltified object");
            }
        }
    }

    pack.finish()
}

#[derive(Debug, PartialEq, Eq)]
enum PackEntry {
    Object { kind: ObjectKind, data: Vec<u8> },
    RefDelta { base: Sha1Hash, delta: Vec<u8> },
}

#[derive(Debug)]
struct PackFile<R> {
    reader: HashingReader<R>,
    num_objects: u32,
    remaining: u32,
}

impl<R: BufRead> PackFile<R> {
    fn new(reader: R) -> Result<Self> {
        let mut reader = HashingReader::new(reader);

        let mut header = [0u8; PACK_HEADER_SIZE];
        reader
            .read_exact(&mut header)
            .map_err(|err| truncated(err, "packfile header"))?;

        if &header[..4] != PACK_SIGNATURE {
            return Err(Error::Pack(format!(
                "invalid packfile signature {:?}",
                String::from_utf8_lossy(&header[..4])
            )));
        }
        let version = u32::from_be_bytes(header[4..8].try_into()?);
        if version != PACK_VERSION {
            return Err(Error::Pack(format!(
                "unsupported packfile version {version}"
            )));
        }
        let num_objects = u32::from_be_bytes(header[8..12].try_into()?);

        Ok(Self {
            reader,
            num_objects,
            remaining: num_objects,
        })
    }

    fn next_entry(&mut self) -> Result<Option<PackEntry>> {
        if self.remaining == 0 {
            return Ok(None);
        }

        let (len, obj_type) = self.read_object_header()?;

        let entry = match obj_type {
            ObjectType::Commit | ObjectType::Tree | ObjectType::Blob | ObjectType::Tag => {
                let data = inflate(&mut self.reader, len)?;
                PackEntry::Object {
                    kind: obj_type.kind()?,
                    data,
                }
            }
            ObjectType::RefDelta => {
                let mut buf = [0u8; SHA1_HASH_SIZE];
                self.reader
                    .read_exact(&mut buf)
                    .map_err(|err| truncated(err, "ref-delta base id"))?;
                let base = Sha1Hash::from(buf);
                let delta = inflate(&mut self.reader, len)?;
                PackEntry::RefDelta { base, delta }
            }
            ObjectType::OfsDelta | ObjectType::Unknown(_) => {
                return Err(Error::Pack(format!(
                    "unsupported object type in packfile: {obj_type}"
                )));
            }
        };

        self.remaining -= 1;
        Ok(Some(entry))
    }

    // Object header: type in bits 4-6 of the first byte, size in its low
    // 4 bits, then 7 more size bits per continuation byte.
    fn read_object_header(&mut self) -> Result<(usize, ObjectType)> {
        let mut byte = self.read_header_byte()?;
        let obj_type = ObjectType::new(byte);
        let mut len: usize = (byte & MASK_LAST_4) as usize;
        let mut shift = 4;

        while super::msb_is_1(byte) {
            if shift >= usize::BITS {
                return Err(Error::Pack("object size overflows".into()));
            }
            byte = self.read_header_byte()?;
            len |= ((byte & MASK_LAST_7) as usize) << shift;
            shift += 7;
        }

        Ok((len, obj_type))
    }

    fn read_header_byte(&mut self) -> Result<u8> {
        super::read_one(&mut self.reader).map_err(|err| truncated(err, "object header"))
    }

    /// Checks the trailing checksum once every object has been read.
    fn finish(self) -> Result<PackSummary> {
        let Self {
            reader,
            num_objects,
            ..
        } = self;
        let (mut inner, hasher) = reader.into_parts();
        let computed = Sha1Hash::new(hasher);

        let mut trailer = [0u8; SHA1_HASH_SIZE];
        inner
            .read_exact(&mut trailer)
            .map_err(|err| truncated(err, "packfile trailer"))?;
        let checksum = Sha1Hash::from(trailer);

        if checksum != computed {
            return Err(Error::Pack(format!(
                "packfile checksum mismatch: trailer {checksum}, computed {computed}"
            )));
        }

        Ok(PackSummary {
            num_objects,
            checksum,
        })
    }
}

/// Inflates one zlib stream, consuming exactly its bytes from `r`.
fn inflate<R: BufRead>(r: &mut R, size_hint: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(size_hint.clamp(1, MAX_PREALLOC));
    let mut inflater = Decompress::new(true);

    loop {
        if out.len() == out.capacity() {
            out.reserve(INFLATE_CHUNK);
        }

        let input = r.fill_buf()?;
        let eof = input.is_empty();
        let flush = if eof {
            FlushDecompress::Finish
        } else {
            FlushDecompress::None
        };

        let (in_before, out_before) = (inflater.total_in(), inflater.total_out());
        let status = inflater
            .decompress_vec(input, &mut out, flush)
            .map_err(|err| Error::Pack(format!("corrupt zlib stream: {err}")))?;
        let consumed = (inflater.total_in() - in_before) as usize;
        let produced = inflater.total_out() - out_before;
        r.consume(consumed);

        match status {
            Status::StreamEnd => return Ok(out),
            _ if consumed == 0 && produced == 0 && eof => {
                return Err(Error::Pack("truncated zlib stream".into()))
            }
            _ if consumed == 0 && produced == 0 => {
                return Err(Error::Pack("zlib stream made no progress".into()))
            }
            _ => {}
        }
    }
}

fn truncated(err: io::Error, what: &str) -> Error {
    match err.kind() {
        io::ErrorKind::UnexpectedEof => Error::Pack(format!("truncated packfile: {what}")),
        _ => Error::Io(err),
    }
}

/// Hashes every byte handed out, for the trailing pack checksum.
struct HashingReader<R> {
    inner: R,
    hasher: Sha1,
}

impl<R> HashingReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha1Hash::hasher(),
        }
    }

    fn into_parts(self) -> (R, Sha1) {
        (self.inner, self.hasher)
    }
}

impl<R> fmt::Debug for HashingReader<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashingReader").finish_non_exhaustive()
    }
}

impl<R: BufRead> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}

impl<R: BufRead> BufRead for HashingReader<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        if amt > 0 {
            // The bytes being consumed are still at the front of the buffer.
            if let Ok(buf) = self.inner.fill_buf() {
                self.hasher.update(&buf[..amt.min(buf.len())]);
            }
        }
        self.inner.consume(amt);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObjectType {
    Commit,
    Tree,
    Blob,
    Tag,
    OfsDelta,
    RefDelta,
    Unknown(u8),
}

impl ObjectType {
    fn new(byte: u8) -> Self {
        match (byte & MASK_OBJECT_TYPE) >> 4 {
            1 => Self::Commit,
            2 => Self::Tree,
            3 => Self::Blob,
            4 => Self::Tag,
            6 => Self::OfsDelta,
            7 => Self::RefDelta,
            tag => Self::Unknown(tag),
        }
    }

    fn kind(self) -> Result<ObjectKind> {
        match self {
            Self::Commit => Ok(ObjectKind::Commit),
            Self::Tree => Ok(ObjectKind::Tree),
            Self::Blob => Ok(ObjectKind::Blob),
            Self::Tag => Ok(ObjectKind::Tag),
            _ => Err(Error::Pack(format!("{self} is not a plain object type"))),
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Commit => write!(f, "commit"),
            Self::Tree => write!(f, "tree"),
            Self::Blob => write!(f, "blob"),
            Self::Tag => write!(f, "tag"),
            Self::OfsDelta => write!(f, "ofs-delta (6)"),
            Self::RefDelta => write!(f, "ref-delta (7)"),
            Self::Unknown(tag) => write!(f, "unknown ({tag})"),
        }
    }
}
