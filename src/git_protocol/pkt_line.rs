use super::{Error, Result};
use std::fmt;
use std::io::{self, Read};
use tokio::io::{AsyncRead, AsyncReadExt};

const LEN_SIZE: usize = 4;
const MAX_LINE_SIZE: usize = 0xffff;

/// A pkt-line frame. `None` is the flush packet (`0000`).
#[derive(Debug, Clone, PartialEq)]
pub struct PktLine(Option<Vec<u8>>);

impl PktLine {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Some(bytes))
    }

    pub fn flush() -> Self {
        Self(None)
    }

    pub fn is_flush(&self) -> bool {
        self.0.is_none()
    }

    pub fn size(&self) -> usize {
        if let Some(bytes) = self.0.as_ref() {
            bytes.len() + LEN_SIZE
        } else {
            0
        }
    }

    pub fn payload(&self) -> &[u8] {
        self.0.as_deref().unwrap_or_default()
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.0.unwrap_or_default()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let size = self.size();
        if size > MAX_LINE_SIZE {
            return Err(Error::PktLine(format!(
                "payload of {} bytes does not fit in a pkt-line",
                size - LEN_SIZE
            )));
        }
        let mut bytes = format!("{size:04x}").into_bytes();
        bytes.extend_from_slice(self.payload());
        Ok(bytes)
    }

    /// Reads one frame. `Ok(None)` means the source ended cleanly before a new frame.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Option<Self>> {
        let mut len_buf = [0u8; LEN_SIZE];
        let mut filled = 0;
        while filled < LEN_SIZE {
            match r.read(&mut len_buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }

        let Some(line_len) = line_length(&len_buf[..filled])? else {
            return Ok(None);
        };
        if line_len == 0 {
            return Ok(Some(Self::flush()));
        }
        let value_len = line_len - LEN_SIZE;

        let mut buf = vec![0u8; value_len];
        r.read_exact(&mut buf).map_err(|err| truncated(err, value_len))?;
        Ok(Some(Self::new(buf)))
    }

    pub async fn read_from_async<R: AsyncRead + Unpin>(r: &mut R) -> Result<Option<Self>> {
        let mut len_buf = [0u8; LEN_SIZE];
        let mut filled = 0;
        while filled < LEN_SIZE {
            match r.read(&mut len_buf[filled..]).await? {
                0 => break,
                n => filled += n,
            }
        }

        let Some(line_len) = line_length(&len_buf[..filled])? else {
            return Ok(None);
        };
        if line_len == 0 {
            return Ok(Some(Self::flush()));
        }
        let value_len = line_len - LEN_SIZE;

        let mut buf = vec![0u8; value_len];
        r.read_exact(&mut buf)
            .await
            .map_err(|err| truncated(err, value_len))?;
        Ok(Some(Self::new(buf)))
    }
}

impl From<&[u8]> for PktLine {
    fn from(bytes: &[u8]) -> Self {
        Self::new(bytes.into())
    }
}

impl fmt::Display for PktLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}{}",
            self.size(),
            String::from_utf8_lossy(self.payload())
        )
    }
}

/// Total line length announced by a length field, `None` for an empty source.
fn line_length(len_buf: &[u8]) -> Result<Option<usize>> {
    match len_buf.len() {
        0 => return Ok(None),
        LEN_SIZE => {}
        n => {
            return Err(Error::PktLine(format!(
                "truncated length field: got {n} of {LEN_SIZE} bytes"
            )))
        }
    }

    match line_size(len_buf)? {
        n if n != 0 && n < LEN_SIZE => Err(Error::PktLine(format!("invalid pkt-line length {n}"))),
        n => Ok(Some(n)),
    }
}

fn line_size(buf: &[u8]) -> Result<usize> {
    let invalid = || {
        Error::PktLine(format!(
            "invalid length field {:?}",
            String::from_utf8_lossy(buf)
        ))
    };
    if !buf.iter().all(u8::is_ascii_hexdigit) {
        return Err(invalid());
    }
    let len_str = std::str::from_utf8(buf).map_err(|_| invalid())?;
    usize::from_str_radix(len_str, 16).map_err(|_| invalid())
}

fn truncated(err: io::Error, expected: usize) -> Error {
    match err.kind() {
        io::ErrorKind::UnexpectedEof => {
            Error::PktLine(format!("truncated pkt-line: expected {expected} payload bytes"))
        }
        _ => Error::Io(err),
    }
}
