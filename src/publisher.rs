//! The proxy side of the negotiation: listen on a dynamic PSM, publish it
//! through GATT, and accept the one channel a connector opens.

use std::io;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::channel::ChannelId;
use crate::communication::stream::{BluetoothListener, BluetoothStream, L2capTarget, SocketOptions};
use crate::communication::Uuid128;
use crate::error::{Error, Result};
use crate::gatt::{CharacteristicKind, LocalCharacteristic, LocalService};
use crate::peripheral::Peripheral;
use crate::radio::{Radio, Role};
use crate::Address;

pub struct ChannelPublisher<P: Peripheral> {
    radio: Radio,
    peripheral: P,
    options: SocketOptions,
}

impl<P: Peripheral> ChannelPublisher<P> {
    pub fn new(radio: Radio, peripheral: P, options: SocketOptions) -> Self {
        ChannelPublisher {
            radio,
            peripheral,
            options,
        }
    }

    fn listen(&self) -> io::Result<(BluetoothListener, ChannelId)> {
        let listener = BluetoothListener::bind(L2capTarget::Psm(0), &self.options)?;
        let (_, psm) = listener.local_addr()?;
        let id = ChannelId::new(psm)
            .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no psm was assigned"))?;
        Ok((listener, id))
    }

    /// Advertises `device_name` with `channel_characteristic` holding the
    /// listener's PSM, and returns the first channel opened to it. The
    /// beacon and GATT server are gone by the time this returns.
    pub async fn publish(
        &self,
        token: &CancellationToken,
        device_name: &str,
        service: Uuid128,
        channel_characteristic: Uuid128,
    ) -> Result<(BluetoothStream, Address)> {
        let _claim = self.radio.claim(Role::Peripheral)?;
        self.peripheral
            .enable()
            .await
            .map_err(|source| Error::RadioUnavailable { source })?;

        let (listener, id) = self.listen().map_err(|source| Error::AdvertiseFailed {
            source: source.into(),
        })?;
        info!(channel = %id, "channel listener bound");

        let local = LocalService {
            uuid: service,
            characteristics: vec![LocalCharacteristic {
                uuid: channel_characteristic,
                kind: CharacteristicKind::Read(Bytes::from(id.to_string())),
            }],
        };

        let server = token.child_token();
        let started = match self.peripheral.serve(local, server.clone()).await {
            Ok(()) => self.peripheral.advertise(device_name, service).await,
            Err(err) => Err(err),
        };
        if let Err(source) = started {
            server.cancel();
            return Err(Error::AdvertiseFailed { source });
        }

        let accepted = tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::Cancelled),
            accepted = listener.accept() => {
                accepted.map_err(|source| Error::ChannelOpenFailed { channel: id, source })
            }
        };

        server.cancel();
        if let Err(err) = self.peripheral.stop().await {
            warn!("stopping advertising failed: {}", err);
        }

        let (stream, (peer, _)) = accepted?;
        info!(%peer, channel = %id, "channel accepted");
        Ok((stream, peer))
    }
}
