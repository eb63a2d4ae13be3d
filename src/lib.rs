#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod proto;
pub mod router;
pub mod session;
pub mod telemetry;

pub use error::{Error, Transience};
pub type Result<T> = std::result::Result<T, Error>;

// Re-export the public surface at the crate root for convenience
pub use crate::config::{ClientConfig, apply_env_overrides};
pub use crate::proto::{
    DEFAULT_PORT, Envelope, Message, Mode, OkBody, PROTOCOL_MAJOR, PROTOCOL_MINOR, ProtoError,
    protocol_version,
};
pub use crate::router::{Inbound, Router, RouterError, RouterHandle, check_server};
pub use crate::session::{ClientError, STATUS_LIFETIME, Session, StreamStatus};
