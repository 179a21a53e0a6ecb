//! An owned, connection-oriented channel to a peer identified by address and
//! PSM. The handle is released exactly once, by [`Channel::close`] or on drop.

use std::fmt::{Display, Formatter};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tracing::{debug, warn};

use crate::communication::stream::{BluetoothStream, L2capTarget, SocketOptions};
use crate::error::{Error, Result};
use crate::{Address, AddressType};

/// Longest channel id text a peripheral may publish.
pub const MAX_CHANNEL_ID_LEN: usize = 255;

/// The PSM of a connection-oriented channel, as published by a peripheral.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct ChannelId(u16);

impl ChannelId {
    pub fn new(psm: u16) -> Option<Self> {
        (psm != 0).then_some(ChannelId(psm))
    }

    pub fn get(self) -> u16 {
        self.0
    }

    /// Parses the decimal text read from the channel characteristic. Only
    /// ASCII digits are accepted; zero and values above `u16::MAX` are
    /// rejected.
    pub fn parse(value: &[u8]) -> Result<Self> {
        let malformed = || Error::MalformedChannelId {
            value: String::from_utf8_lossy(value).into_owned(),
        };

        if value.is_empty() || value.len() > MAX_CHANNEL_ID_LEN {
            return Err(malformed());
        }
        if !value.iter().all(u8::is_ascii_digit) {
            return Err(malformed());
        }

        let mut psm: u32 = 0;
        for digit in value {
            psm = psm * 10 + (digit - b'0') as u32;
            if psm > u16::MAX as u32 {
                return Err(malformed());
            }
        }

        ChannelId::new(psm as u16).ok_or_else(malformed)
    }
}

impl Display for ChannelId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The native boundary for opening and releasing channel handles.
#[allow(async_fn_in_trait)]
pub trait ChannelTransport {
    type Handle: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn open(
        &self,
        address: Address,
        address_type: AddressType,
        channel: ChannelId,
    ) -> io::Result<Self::Handle>;

    /// Releases a handle returned by [`ChannelTransport::open`].
    fn close_handle(&self, handle: Self::Handle) -> io::Result<()>;
}

/// L2CAP credit-based channels over `AF_BLUETOOTH` sockets.
#[derive(Debug, Clone, Default)]
pub struct L2capTransport {
    pub options: SocketOptions,
}

impl L2capTransport {
    pub fn new(options: SocketOptions) -> Self {
        L2capTransport { options }
    }
}

impl ChannelTransport for L2capTransport {
    type Handle = BluetoothStream;

    async fn open(
        &self,
        address: Address,
        address_type: AddressType,
        channel: ChannelId,
    ) -> io::Result<BluetoothStream> {
        BluetoothStream::connect(
            address,
            address_type,
            L2capTarget::Psm(channel.get()),
            &self.options,
        )
        .await
    }

    fn close_handle(&self, handle: BluetoothStream) -> io::Result<()> {
        handle.close()
    }
}

/// An open channel. No buffering, framing or retries happen here.
pub struct Channel<T: ChannelTransport> {
    transport: Arc<T>,
    handle: Option<T::Handle>,
    address: Address,
    id: ChannelId,
}

impl<T: ChannelTransport> Channel<T> {
    pub async fn open(
        transport: Arc<T>,
        address: Address,
        address_type: AddressType,
        id: ChannelId,
    ) -> Result<Self> {
        let handle = transport
            .open(address, address_type, id)
            .await
            .map_err(|source| Error::ChannelOpenFailed {
                channel: id,
                source,
            })?;

        debug!(%address, channel = %id, "channel opened");

        Ok(Channel {
            transport,
            handle: Some(handle),
            address,
            id,
        })
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    fn handle_mut(&mut self) -> io::Result<&mut T::Handle> {
        self.handle
            .as_mut()
            .ok_or_else(|| io::ErrorKind::NotConnected.into())
    }

    pub async fn send(&mut self, data: &[u8]) -> Result<()> {
        let handle = self
            .handle_mut()
            .map_err(|source| Error::ChannelSendFailed { source })?;

        handle
            .write_all(data)
            .await
            .map_err(|source| Error::ChannelSendFailed { source })?;
        handle
            .flush()
            .await
            .map_err(|source| Error::ChannelSendFailed { source })
    }

    /// Reads whatever the peer sent next into `buf`. A closed channel is
    /// reported as [`Error::ChannelClosed`] rather than a zero-length read.
    pub async fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        let handle = self
            .handle_mut()
            .map_err(|source| Error::ChannelReceiveFailed { source })?;

        match handle.read(buf).await {
            Ok(0) if !buf.is_empty() => Err(Error::ChannelClosed),
            Ok(n) => Ok(n),
            Err(source) => Err(Error::ChannelReceiveFailed { source }),
        }
    }

    pub fn close(mut self) -> Result<()> {
        self.release()
            .map_err(|source| Error::ChannelCloseFailed { source })
    }

    fn release(&mut self) -> io::Result<()> {
        match self.handle.take() {
            Some(handle) => {
                debug!(address = %self.address, channel = %self.id, "channel closed");
                self.transport.close_handle(handle)
            }
            None => Ok(()),
        }
    }

    fn pin_handle(&mut self) -> io::Result<Pin<&mut T::Handle>> {
        self.handle_mut().map(Pin::new)
    }
}

impl<T: ChannelTransport> Drop for Channel<T> {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            warn!(channel = %self.id, "releasing channel failed: {}", err);
        }
    }
}

impl<T: ChannelTransport> AsyncRead for Channel<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut().pin_handle() {
            Ok(handle) => handle.poll_read(cx, buf),
            Err(err) => Poll::Ready(Err(err)),
        }
    }
}

impl<T: ChannelTransport> AsyncWrite for Channel<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut().pin_handle() {
            Ok(handle) => handle.poll_write(cx, buf),
            Err(err) => Poll::Ready(Err(err)),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().pin_handle() {
            Ok(handle) => handle.poll_flush(cx),
            Err(err) => Poll::Ready(Err(err)),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().pin_handle() {
            Ok(handle) => handle.poll_shutdown(cx),
            Err(err) => Poll::Ready(Err(err)),
        }
    }
}
