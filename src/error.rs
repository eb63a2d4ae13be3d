use thiserror::Error;

use crate::proto::ProtoError;
use crate::router::RouterError;
use crate::session::ClientError;

/// Whether retrying this operation may succeed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Transience {
    /// Retry will never help without changing inputs/state.
    Permanent,
    /// Retry may help (transient outage or timing).
    Retryable,
    /// Unknown if retry will help.
    Unknown,
}

impl Transience {
    pub fn is_retryable(self) -> bool {
        matches!(self, Transience::Retryable)
    }
}

/// Crate-level convenience error.
///
/// A thin wrapper over the per-module errors; nothing is flattened away.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Proto(#[from] ProtoError),

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error(transparent)]
    Client(#[from] ClientError),
}

impl Error {
    pub fn transience(&self) -> Transience {
        match self {
            Error::Proto(e) => e.transience(),
            Error::Router(e) => e.transience(),
            Error::Client(e) => e.transience(),
        }
    }
}
