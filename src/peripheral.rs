//! The peripheral-role radio seam used by [`Advertiser`](crate::Advertiser)
//! and [`ChannelPublisher`](crate::ChannelPublisher).

use std::sync::Arc;

use enumflags2::BitFlags;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::central::enable_le;
use crate::communication::stream::{BluetoothListener, L2capTarget, SocketOptions};
use crate::communication::Uuid128;
use crate::eir;
use crate::error::BoxError;
use crate::gatt::{self, AttributeTable, LocalService};
use crate::management::interface::Controller;
use crate::management::{self, AdvertisingFlags, AdvertisingParams, ManagementStream};
use crate::socket::ATT_CID;

/// The advertising instance this crate owns on the controller.
pub const ADVERTISING_INSTANCE: u8 = 1;

#[allow(async_fn_in_trait)]
pub trait Peripheral {
    async fn enable(&self) -> Result<(), BoxError>;

    /// Starts a connectable beacon carrying `service` in the advertising data
    /// and `name` in the scan response.
    async fn advertise(&self, name: &str, service: Uuid128) -> Result<(), BoxError>;

    /// Serves `service` to GATT clients until `token` is cancelled.
    async fn serve(&self, service: LocalService, token: CancellationToken) -> Result<(), BoxError>;

    /// Removes the beacon.
    async fn stop(&self) -> Result<(), BoxError>;
}

/// The peripheral role on a local BlueZ controller.
#[derive(Debug, Clone)]
pub struct BluezPeripheral {
    controller: Controller,
    options: SocketOptions,
}

impl BluezPeripheral {
    pub fn new(controller: Controller, options: SocketOptions) -> Self {
        BluezPeripheral {
            controller,
            options,
        }
    }
}

impl Peripheral for BluezPeripheral {
    async fn enable(&self) -> Result<(), BoxError> {
        Ok(enable_le(self.controller).await?)
    }

    async fn advertise(&self, name: &str, service: Uuid128) -> Result<(), BoxError> {
        let params = AdvertisingParams {
            instance: ADVERTISING_INSTANCE,
            flags: BitFlags::from(AdvertisingFlags::EnterConnectable)
                | AdvertisingFlags::AdvertiseDiscoverable,
            duration: 0,
            timeout: 0,
            adv_data: eir::advertising_data(service),
            scan_rsp: eir::scan_response(name),
        };

        let mut socket = ManagementStream::open()?;
        let instance = management::add_advertising(&mut socket, self.controller, params).await?;
        info!(controller = %self.controller, instance, name, %service, "advertising");
        Ok(())
    }

    async fn serve(&self, service: LocalService, token: CancellationToken) -> Result<(), BoxError> {
        let listener = BluetoothListener::bind(L2capTarget::Cid(ATT_CID), &self.options)?;
        let table = Arc::new(AttributeTable::new(&service));
        debug!(service = %service.uuid, "gatt server listening");

        tokio::spawn(gatt::server::serve(listener, table, token));
        Ok(())
    }

    async fn stop(&self) -> Result<(), BoxError> {
        let mut socket = ManagementStream::open()?;
        management::remove_advertising(&mut socket, self.controller, ADVERTISING_INSTANCE)
            .await?;
        info!(controller = %self.controller, "advertising stopped");
        Ok(())
    }
}
