//! Client for the MRPC/2 protocol: a TLS-wrapped, length-prefixed RPC
//! exchange used to authenticate against a networked video recorder, query
//! recording metadata and resolve download authorizations.
//!
//! A [`Session`] owns one authenticated connection and serializes requests
//! on it; [`Command`] values describe one typed request/response exchange
//! and expose narrow accessors over the structured result.

mod command;
mod error;
mod frame;
mod session;

pub use command::{Command, CommandKind};
pub use error::Error;
pub use frame::{CLIENT_NAME, CLIENT_VERSION, PROTOCOL_MAGIC, SCHEMA_VERSION};
pub use session::{DEFAULT_PORT, Session, TlsIdentity};

/// A `Result` alias where the `Err` case is `mindrpc::Error`.
pub type Result<T> = std::result::Result<T, Error>;
