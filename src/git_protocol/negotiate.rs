use super::{PktLine, Result};

/// Body of the `git-upload-pack` POST: a single want, a flush, then done.
pub fn upload_pack_request(head_id: &str) -> Result<Vec<u8>> {
    let want = PktLine::new(format!("want {head_id}\n").into_bytes());
    let done = PktLine::from(&b"done\n"[..]);

    Ok([want.encode()?, PktLine::flush().encode()?, done.encode()?].concat())
}
