use super::{git_object::ObjectKind, git_object::ObjectStore, Error, Result, Sha1Hash};
use std::io::{self, Cursor, Read};
use tracing::trace;

const MASK_LAST_7: u8 = 0b01111111;
const COPY_ZERO_SIZE: usize = 0x10000;
// Upper bound on what a declared result size can make us preallocate.
const MAX_PREALLOC: usize = 1 << 20;

/// Rebuilds the object described by `delta` on top of the stored object `base`.
///
/// The base must already be a loose object in `store`. The result inherits
/// the base's kind.
pub fn apply_delta(
    base: &Sha1Hash,
    delta: &[u8],
    store: &ObjectStore,
) -> Result<(Vec<u8>, ObjectKind)> {
    let (base_content, kind) = store.read(base).map_err(|err| Error::MissingBase {
        hash: *base,
        source: Box::new(err),
    })?;

    let delta = Delta::new(delta)?;
    let restored = delta.restore(&base_content)?;
    trace!(%base, %kind, size = restored.len(), "applied delta");

    Ok((restored, kind))
}

// Delta header sizes: 7 bits per byte, least significant group first.
fn get_length<R: Read>(r: &mut R) -> Result<usize> {
    let mut byte = read_byte(r, "size header")?;
    let mut len: usize = (byte & MASK_LAST_7) as usize;
    let mut shift = 7;

    while super::msb_is_1(byte) {
        if shift >= usize::BITS {
            return Err(Error::Delta("size header overflows".into()));
        }
        byte = read_byte(r, "size header")?;
        len |= ((byte & MASK_LAST_7) as usize) << shift;
        shift += 7;
    }

    Ok(len)
}

fn read_byte<R: Read>(r: &mut R, what: &str) -> Result<u8> {
    super::read_one(r).map_err(|err| match err.kind() {
        io::ErrorKind::UnexpectedEof => Error::Delta(format!("truncated delta while reading {what}")),
        _ => Error::Io(err),
    })
}

#[derive(Debug)]
pub struct Delta {
    target_size: usize,
    instructions: Vec<Instruction>,
}

impl Delta {
    pub fn new(bytes: &[u8]) -> Result<Self> {
        let mut r = Cursor::new(bytes);
        // base size, not checked against the actual base
        get_length(&mut r)?;
        let target_size = get_length(&mut r)?;

        let mut instructions: Vec<Instruction> = vec![];
        while (r.position() as usize) < bytes.len() {
            let byte = read_byte(&mut r, "instruction")?;
            instructions.push(Instruction::new(byte, &mut r)?);
        }

        Ok(Self {
            target_size,
            instructions,
        })
    }

    pub fn restore(&self, base: &[u8]) -> Result<Vec<u8>> {
        let mut result: Vec<u8> = Vec::with_capacity(self.target_size.min(MAX_PREALLOC));

        for inst in self.instructions.iter() {
            match *inst {
                Instruction::Copy { offset, size } => {
                    let window = offset
                        .checked_add(size)
                        .and_then(|end| base.get(offset..end))
                        .ok_or_else(|| {
                            Error::Delta(format!(
                                "copy of {size} bytes at offset {offset} exceeds base of {} bytes",
                                base.len()
                            ))
                        })?;
                    result.extend_from_slice(window);
                }
                Instruction::Insert(ref bytes) => {
                    result.extend_from_slice(bytes);
                }
            }

            if result.len() > self.target_size {
                return Err(self.size_mismatch(result.len()));
            }
        }

        if result.len() != self.target_size {
            return Err(self.size_mismatch(result.len()));
        }

        Ok(result)
    }

    fn size_mismatch(&self, got: usize) -> Error {
        Error::Delta(format!(
            "delta result size mismatch: expected {}, got {got}",
            self.target_size
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    Copy { offset: usize, size: usize },
    Insert(Vec<u8>),
}

impl Instruction {
    fn new<R: Read>(byte: u8, r: &mut R) -> Result<Self> {
        if super::msb_is_1(byte) {
            let offset = get_delta_offset(byte, r)?;
            let size = match get_delta_size(byte, r)? {
                0 => COPY_ZERO_SIZE,
                size => size,
            };
            Ok(Self::Copy { offset, size })
        } else {
            let len = (byte & MASK_LAST_7) as usize;
            if len == 0 {
                return Err(Error::Delta("reserved instruction 0x00".into()));
            }
            let mut buf = vec![0u8; len];
            r.read_exact(&mut buf).map_err(|_| {
                Error::Delta(format!("truncated delta: insert of {len} bytes"))
            })?;
            Ok(Self::Insert(buf))
        }
    }
}

// Copy operands: bits 0-3 of the command flag which offset bytes follow,
// bits 4-6 which size bytes follow, both little-endian.
fn get_delta_offset<R: Read>(byte: u8, r: &mut R) -> Result<usize> {
    let mut offset = 0;
    for i in 0..4 {
        if byte & (1 << i) != 0 {
            offset |= (read_byte(r, "copy offset")? as usize) << (i * 8);
        }
    }
    Ok(offset)
}

fn get_delta_size<R: Read>(byte: u8, r: &mut R) -> Result<usize> {
    let mut size = 0;
    for i in 0..3 {
        if byte & (1 << (i + 4)) != 0 {
            size |= (read_byte(r, "copy size")? as usize) << (i * 8);
        }
    }
    Ok(size)
}
