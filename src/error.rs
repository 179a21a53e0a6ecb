use std::io;

use crate::channel::ChannelId;
use crate::communication::Uuid128;
use crate::radio::Role;
use crate::Address;

/// Errors coming out of a radio backend are opaque to the protocol logic.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("The radio could not be enabled: {}", source)]
    RadioUnavailable {
        #[source]
        source: BoxError,
    },
    #[error("The radio is held by the {:?} role.", holder)]
    RadioInUse { holder: Role },
    #[error("Scanning failed: {}", source)]
    ScanFailed {
        #[source]
        source: BoxError,
    },
    #[error("The scan was aborted.")]
    ScanAborted,
    #[error("The scan ended without finding {:?}.", name)]
    ScanEnded { name: String },
    #[error("{:?} does not advertise service {}.", name, service)]
    ServiceMismatch { name: String, service: Uuid128 },
    #[error("GATT connection to {} failed: {}", address, source)]
    GattConnectFailed {
        address: Address,
        #[source]
        source: BoxError,
    },
    #[error("GATT discovery failed: {}", source)]
    DiscoveryFailed {
        #[source]
        source: BoxError,
    },
    #[error("The peer has no service {}.", service)]
    ServiceNotFound { service: Uuid128 },
    #[error("The service has no characteristic {}.", characteristic)]
    CharacteristicNotFound { characteristic: Uuid128 },
    #[error("Reading the characteristic failed: {}", source)]
    CharacteristicReadFailed {
        #[source]
        source: BoxError,
    },
    #[error("Writing the characteristic failed: {}", source)]
    CharacteristicWriteFailed {
        #[source]
        source: BoxError,
    },
    #[error("{:?} is not a channel id.", value)]
    MalformedChannelId { value: String },
    #[error("GATT disconnect failed: {}", source)]
    GattDisconnectFailed {
        #[source]
        source: BoxError,
    },
    #[error("Opening channel {} failed: {}", channel, source)]
    ChannelOpenFailed {
        channel: ChannelId,
        #[source]
        source: io::Error,
    },
    #[error("Sending on the channel failed: {}", source)]
    ChannelSendFailed {
        #[source]
        source: io::Error,
    },
    #[error("Receiving from the channel failed: {}", source)]
    ChannelReceiveFailed {
        #[source]
        source: io::Error,
    },
    #[error("The channel was closed by the peer.")]
    ChannelClosed,
    #[error("Closing the channel failed: {}", source)]
    ChannelCloseFailed {
        #[source]
        source: io::Error,
    },
    #[error("The operation was cancelled.")]
    Cancelled,
    #[error("A session is already open.")]
    AlreadyConnected,
    #[error("No session is open.")]
    NotConnected,
    #[error("Already advertising.")]
    AlreadyAdvertising,
    #[error("Not advertising.")]
    NotAdvertising,
    #[error("Starting to advertise failed: {}", source)]
    AdvertiseFailed {
        #[source]
        source: BoxError,
    },
    #[error("Stopping advertising failed: {}", source)]
    StopAdvertiseFailed {
        #[source]
        source: BoxError,
    },
    #[error("No name was handed off before the wait ended.")]
    HandoffTimedOut,
}

impl Error {
    /// Whether the error only reports that a caller gave up.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            Error::ScanAborted | Error::Cancelled | Error::HandoffTimedOut
        )
    }

    fn io_kind(&self) -> io::ErrorKind {
        match self {
            Error::ChannelSendFailed { source }
            | Error::ChannelReceiveFailed { source }
            | Error::ChannelCloseFailed { source }
            | Error::ChannelOpenFailed { source, .. } => source.kind(),
            Error::ScanAborted | Error::Cancelled => io::ErrorKind::Interrupted,
            Error::HandoffTimedOut => io::ErrorKind::TimedOut,
            Error::ChannelClosed => io::ErrorKind::UnexpectedEof,
            Error::NotConnected => io::ErrorKind::NotConnected,
            Error::AlreadyConnected => io::ErrorKind::AlreadyExists,
            Error::RadioInUse { .. } => io::ErrorKind::AddrInUse,
            Error::ScanEnded { .. }
            | Error::ServiceMismatch { .. }
            | Error::ServiceNotFound { .. }
            | Error::CharacteristicNotFound { .. } => io::ErrorKind::NotFound,
            Error::GattConnectFailed { .. } => io::ErrorKind::ConnectionRefused,
            Error::MalformedChannelId { .. } => io::ErrorKind::InvalidData,
            _ => io::ErrorKind::Other,
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        io::Error::new(err.io_kind(), err)
    }
}
