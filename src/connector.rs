//! The central side of the negotiation: find the named peripheral, read the
//! channel id it publishes over GATT, drop GATT, and open the channel.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{Future, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::{debug, info, trace, warn};

use crate::central::{Central, DeviceDescriptor, GattClient};
use crate::channel::{Channel, ChannelId, ChannelTransport};
use crate::communication::Uuid128;
use crate::error::{BoxError, Error, Result};
use crate::gatt::Characteristic;
use crate::radio::{Radio, RadioClaim, Role};
use crate::{Address, AddressType};

/// Who the open session is connected to.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SessionInfo {
    pub address: Address,
    pub address_type: AddressType,
    pub channel: ChannelId,
}

/// An open channel together with the radio claim that made it. Reads end
/// with [`Error::Cancelled`] once the token passed to
/// [`Connector::connect`] fires.
pub struct Session<T: ChannelTransport> {
    info: SessionInfo,
    channel: Channel<T>,
    token: CancellationToken,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
    _claim: RadioClaim,
}

impl<T: ChannelTransport> Session<T> {
    fn new(info: SessionInfo, channel: Channel<T>, token: CancellationToken, claim: RadioClaim) -> Self {
        Session {
            info,
            channel,
            cancelled: Box::pin(token.clone().cancelled_owned()),
            token,
            _claim: claim,
        }
    }

    pub fn info(&self) -> SessionInfo {
        self.info
    }

    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.channel.send(data).await
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Error::Cancelled),
            read = self.channel.receive(buf) => read,
        }
    }

    /// Releases the channel handle, then the radio.
    pub fn close(self) -> Result<()> {
        let Session {
            info,
            channel,
            _claim,
            ..
        } = self;
        let closed = channel.close();
        debug!(address = %info.address, channel = %info.channel, "session closed");
        closed
    }

    fn poll_cancelled(&mut self, cx: &mut Context<'_>) -> bool {
        self.token.is_cancelled() || self.cancelled.as_mut().poll(cx).is_ready()
    }
}

impl<T: ChannelTransport> AsyncRead for Session<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.poll_cancelled(cx) {
            return Poll::Ready(Err(Error::Cancelled.into()));
        }
        Pin::new(&mut this.channel).poll_read(cx, buf)
    }
}

impl<T: ChannelTransport> AsyncWrite for Session<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().channel).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().channel).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().channel).poll_shutdown(cx)
    }
}

/// Drives the central role. Holds at most one session.
pub struct Connector<C: Central, T: ChannelTransport> {
    radio: Radio,
    central: C,
    transport: Arc<T>,
    session: Option<Session<T>>,
}

async fn find_characteristic<G: GattClient>(
    gatt: &mut G,
    service: Uuid128,
    characteristic: Uuid128,
) -> Result<Characteristic> {
    let range = gatt
        .discover_service(service)
        .await
        .map_err(|source| Error::DiscoveryFailed { source })?
        .ok_or(Error::ServiceNotFound { service })?;

    gatt.discover_characteristic(range, characteristic)
        .await
        .map_err(|source| Error::DiscoveryFailed { source })?
        .ok_or(Error::CharacteristicNotFound { characteristic })
}

async fn read_channel_id<G: GattClient>(
    gatt: &mut G,
    service: Uuid128,
    characteristic: Uuid128,
) -> Result<ChannelId> {
    let characteristic = find_characteristic(gatt, service, characteristic).await?;
    let value = gatt
        .read(&characteristic)
        .await
        .map_err(|source| Error::CharacteristicReadFailed { source })?;

    let id = ChannelId::parse(&value)?;
    debug!(channel = %id, "channel id read");
    Ok(id)
}

async fn write_value<G: GattClient>(
    gatt: &mut G,
    service: Uuid128,
    characteristic: Uuid128,
    value: &[u8],
) -> Result<()> {
    let characteristic = find_characteristic(gatt, service, characteristic).await?;
    gatt.write(&characteristic, value)
        .await
        .map_err(|source| Error::CharacteristicWriteFailed { source })
}

/// Combines the outcome of the GATT exchange with the disconnect that always
/// follows it. The exchange error is the one reported.
fn settle<V>(exchanged: Result<V>, disconnected: std::result::Result<(), BoxError>) -> Result<V> {
    match (exchanged, disconnected) {
        (Ok(value), Ok(())) => {
            debug!("gatt disconnected");
            Ok(value)
        }
        (Ok(_), Err(source)) => Err(Error::GattDisconnectFailed { source }),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(source)) => {
            warn!("gatt disconnect after failure also failed: {}", source);
            Err(err)
        }
    }
}

impl<C: Central, T: ChannelTransport> Connector<C, T> {
    pub fn new(radio: Radio, central: C, transport: T) -> Self {
        Connector {
            radio,
            central,
            transport: Arc::new(transport),
            session: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    pub fn session_info(&self) -> Option<SessionInfo> {
        self.session.as_ref().map(Session::info)
    }

    /// Connects to the peripheral advertising `device_name` and opens the
    /// channel it publishes in `channel_characteristic`. Only the scan
    /// observes `token` directly; a cancellation during the remaining steps
    /// closes the freshly opened channel and reports [`Error::Cancelled`].
    pub async fn connect(
        &mut self,
        token: &CancellationToken,
        device_name: &str,
        service: Uuid128,
        channel_characteristic: Uuid128,
    ) -> Result<SessionInfo> {
        if self.session.is_some() {
            return Err(Error::AlreadyConnected);
        }

        let claim = self.radio.claim(Role::Central)?;
        self.central
            .enable()
            .await
            .map_err(|source| Error::RadioUnavailable { source })?;

        let device = self.find(token, device_name, service).await?;
        info!(address = %device.address, rssi = device.rssi, device_name, "peripheral found");

        let id = self
            .negotiate(&device, service, channel_characteristic)
            .await?;

        let channel = Channel::open(
            self.transport.clone(),
            device.address,
            device.address_type,
            id,
        )
        .await?;

        if token.is_cancelled() {
            if let Err(err) = channel.close() {
                warn!("closing cancelled channel failed: {}", err);
            }
            return Err(Error::Cancelled);
        }

        let info = SessionInfo {
            address: device.address,
            address_type: device.address_type,
            channel: id,
        };
        info!(address = %info.address, channel = %info.channel, "session open");

        self.session = Some(Session::new(info, channel, token.clone(), claim));
        Ok(info)
    }

    /// Scans until a report named `device_name` shows up. A match that lacks
    /// `service` ends the scan with [`Error::ServiceMismatch`].
    async fn find(
        &self,
        token: &CancellationToken,
        device_name: &str,
        service: Uuid128,
    ) -> Result<DeviceDescriptor> {
        let mut scan = self
            .central
            .start_scan()
            .await
            .map_err(|source| Error::ScanFailed { source })?;

        let outcome = loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => break Err(Error::ScanAborted),
                next = scan.next() => next,
            };

            match next {
                None => {
                    break Err(Error::ScanEnded {
                        name: device_name.to_owned(),
                    })
                }
                Some(Err(source)) => break Err(Error::ScanFailed { source }),
                Some(Ok(device)) if device.name.as_deref() == Some(device_name) => {
                    if device.advertises(service) {
                        break Ok(device);
                    }
                    break Err(Error::ServiceMismatch {
                        name: device_name.to_owned(),
                        service,
                    });
                }
                Some(Ok(device)) => {
                    trace!(address = %device.address, name = ?device.name, "skipping device");
                }
            }
        };

        if let Err(err) = self.central.stop_scan(scan).await {
            warn!("stopping scan failed: {}", err);
        }
        outcome
    }

    async fn negotiate(
        &self,
        device: &DeviceDescriptor,
        service: Uuid128,
        characteristic: Uuid128,
    ) -> Result<ChannelId> {
        let mut gatt = self.gatt_connect(device).await?;
        let read = read_channel_id(&mut gatt, service, characteristic).await;
        settle(read, gatt.disconnect().await)
    }

    async fn gatt_connect(&self, device: &DeviceDescriptor) -> Result<C::Gatt> {
        let gatt = self
            .central
            .connect(device.address, device.address_type)
            .await
            .map_err(|source| Error::GattConnectFailed {
                address: device.address,
                source,
            })?;
        debug!(address = %device.address, "gatt connected");
        Ok(gatt)
    }

    /// Writes `name` into the hand-off characteristic of the peripheral
    /// advertising `device_name`, without opening a channel.
    pub async fn deliver_name(
        &mut self,
        token: &CancellationToken,
        device_name: &str,
        service: Uuid128,
        handoff_characteristic: Uuid128,
        name: &str,
    ) -> Result<()> {
        let _claim = self.radio.claim(Role::Central)?;
        self.central
            .enable()
            .await
            .map_err(|source| Error::RadioUnavailable { source })?;

        let device = self.find(token, device_name, service).await?;
        let mut gatt = self.gatt_connect(&device).await?;
        let written = write_value(&mut gatt, service, handoff_characteristic, name.as_bytes()).await;
        settle(written, gatt.disconnect().await)?;

        info!(address = %device.address, name, "name delivered");
        Ok(())
    }

    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.session
            .as_mut()
            .ok_or(Error::NotConnected)?
            .write(data)
            .await
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.session
            .as_mut()
            .ok_or(Error::NotConnected)?
            .read(buf)
            .await
    }

    pub fn close(&mut self) -> Result<()> {
        self.session.take().ok_or(Error::NotConnected)?.close()
    }

    /// Moves the open session out of the connector.
    pub fn detach(&mut self) -> Result<Session<T>> {
        self.session.take().ok_or(Error::NotConnected)
    }
}
