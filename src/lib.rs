mod clone;
mod error;
pub mod git_object;
pub mod git_protocol;
mod hash;
mod layout;

const GIT_DIR: &str = ".git";

pub use clone::{clone, discover, fetch};
pub use error::{Error, Stage};
pub use hash::{Sha1Hash, SHA1_HASH_SIZE};
pub use layout::write_layout;
pub type Result<T> = std::result::Result<T, Error>;
