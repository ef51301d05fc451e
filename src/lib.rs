#![cfg_attr(not(test), no_std)]
#![allow(async_fn_in_trait)]

mod fmt;

pub mod codec;
mod cursor;

pub mod config;

pub mod command;
pub mod event;

pub mod h4;
pub mod run_loop;
pub mod transport;

pub mod chipset;
pub mod connection;
pub mod control;
pub mod link_key;
pub mod logger;

mod acl;
pub mod gap;
mod hci;
mod init;
pub mod power;
mod scheduler;
mod event_handler;

pub mod runner;

pub(crate) use fmt::Bytes;

pub use bt_hci::param::BdAddr;
pub use hci::{manufacturer, Hci};
pub use init::{InitPhase, InitStep};
pub use power::{HciState, PowerMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    CommandDisallowed,
    AclBuffersFull,
    UnknownConnectionIdentifier,
    MemoryCapacityExceeded,
    InvalidHciParameters,
    ConnectionAlreadyExists,
    PacketBufferReserved,
    NotSupported,
    Codec(codec::Error),
    Transport,
    Failed(u8),
}

impl Error {
    /// The HCI status code reported for this error.
    pub fn status(&self) -> u8 {
        use event::status;
        match self {
            Error::CommandDisallowed | Error::PacketBufferReserved => status::COMMAND_DISALLOWED,
            Error::AclBuffersFull => status::ACL_BUFFERS_FULL,
            Error::UnknownConnectionIdentifier => status::UNKNOWN_CONNECTION_IDENTIFIER,
            Error::MemoryCapacityExceeded => status::MEMORY_CAPACITY_EXCEEDED,
            Error::InvalidHciParameters | Error::Codec(_) => status::INVALID_HCI_COMMAND_PARAMETERS,
            Error::ConnectionAlreadyExists => status::ACL_CONNECTION_ALREADY_EXISTS,
            Error::NotSupported => status::UNSUPPORTED_FEATURE_OR_PARAMETER_VALUE,
            Error::Transport => status::HARDWARE_FAILURE,
            Error::Failed(status) => *status,
        }
    }
}

impl From<codec::Error> for Error {
    fn from(error: codec::Error) -> Self {
        Self::Codec(error)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            Error::CommandDisallowed => defmt::write!(fmt, "CommandDisallowed"),
            Error::AclBuffersFull => defmt::write!(fmt, "AclBuffersFull"),
            Error::UnknownConnectionIdentifier => defmt::write!(fmt, "UnknownConnectionIdentifier"),
            Error::MemoryCapacityExceeded => defmt::write!(fmt, "MemoryCapacityExceeded"),
            Error::InvalidHciParameters => defmt::write!(fmt, "InvalidHciParameters"),
            Error::ConnectionAlreadyExists => defmt::write!(fmt, "ConnectionAlreadyExists"),
            Error::PacketBufferReserved => defmt::write!(fmt, "PacketBufferReserved"),
            Error::NotSupported => defmt::write!(fmt, "NotSupported"),
            Error::Codec(e) => defmt::write!(fmt, "Codec({})", e),
            Error::Transport => defmt::write!(fmt, "Transport"),
            Error::Failed(status) => defmt::write!(fmt, "Failed({:02x})", status),
        }
    }
}
