use super::Sha1Hash;
use std::array::TryFromSliceError;
use std::fmt;
use std::io;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("ERR - Io: {0}")]
    Io(#[from] io::Error),

    #[error("ERR - TryFromSlice: {0}")]
    TryFromSlice(#[from] TryFromSliceError),

    #[error("ERR - Http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("ERR - Http: unexpected status code {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("ERR - PktLine: {0}")]
    PktLine(String),

    #[error("ERR - Protocol: {0}")]
    Protocol(String),

    #[error("ERR - Pack: {0}")]
    Pack(String),

    #[error("ERR - Delta: {0}")]
    Delta(String),

    #[error("ERR - Delta: could not read base object {hash}: {source}")]
    MissingBase {
        hash: Sha1Hash,
        #[source]
        source: Box<Error>,
    },

    #[error("ERR - Object: {0} not found")]
    ObjectNotFound(Sha1Hash),

    #[error("ERR - Object: {0}")]
    Object(String),

    #[error("ERR - Layout: {0}")]
    Layout(String),

    #[error("{stage}: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<Error>,
    },

    #[error("ERR - Other: {0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub(crate) fn at(self, stage: Stage) -> Self {
        Self::Stage {
            stage,
            source: Box::new(self),
        }
    }

    /// The clone stage that failed, if this error came out of [`crate::clone`].
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Stage {
    DiscoverRefs,
    FetchPackfile,
    WriteLayout,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Self::DiscoverRefs => "failed to discover refs",
            Self::FetchPackfile => "failed to fetch packfile",
            Self::WriteLayout => "failed to write repository structure",
        };
        write!(f, "{value}")
    }
}
