mod delta;
mod negotiate;
mod pack_file;
mod pkt_line;
mod refs;

use std::io::Read;

pub use delta::{apply_delta, Delta, Instruction};
pub use negotiate::upload_pack_request;
pub use pack_file::{decode, PackSummary};
pub use pkt_line::PktLine;
pub use refs::{Advertisement, RefMap};

use super::{git_object, Error, Result, Sha1Hash, SHA1_HASH_SIZE};

fn read_one<R: Read>(r: &mut R) -> std::io::Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    let [byte] = buf;
    Ok(byte)
}

fn msb_is_1(byte: u8) -> bool {
    byte & 0b10000000 == 0b10000000
}
