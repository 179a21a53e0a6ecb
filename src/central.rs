//! The central-role radio seam used by [`Connector`](crate::Connector), and
//! its BlueZ implementation over the management socket and ATT.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use enumflags2::BitFlags;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::communication::stream::{BluetoothStream, L2capTarget, SocketOptions};
use crate::communication::Uuid128;
use crate::eir::parse_eir;
use crate::error::BoxError;
use crate::gatt::{AttClient, Bearer, Characteristic, ServiceRange, MAX_PDU_LEN};
use crate::management::interface::{Controller, ControllerSetting, Event, Response};
use crate::management::{self, AddressTypeFlag, ManagementStream};
use crate::socket::ATT_CID;
use crate::{Address, AddressType};

/// One advertising report, merged with what was previously heard from the
/// same address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub address: Address,
    pub address_type: AddressType,
    pub name: Option<String>,
    pub services: Vec<Uuid128>,
    pub rssi: i8,
}

impl DeviceDescriptor {
    pub fn advertises(&self, service: Uuid128) -> bool {
        self.services.contains(&service)
    }
}

/// The operations the connector needs from a local adapter in the central
/// role.
#[allow(async_fn_in_trait)]
pub trait Central {
    type Scan: Stream<Item = Result<DeviceDescriptor, BoxError>> + Unpin;
    type Gatt: GattClient;

    /// Powers the adapter and turns on LE.
    async fn enable(&self) -> Result<(), BoxError>;

    async fn start_scan(&self) -> Result<Self::Scan, BoxError>;

    async fn stop_scan(&self, scan: Self::Scan) -> Result<(), BoxError>;

    async fn connect(
        &self,
        address: Address,
        address_type: AddressType,
    ) -> Result<Self::Gatt, BoxError>;
}

/// A GATT link to one peer.
#[allow(async_fn_in_trait)]
pub trait GattClient {
    async fn discover_service(&mut self, uuid: Uuid128) -> Result<Option<ServiceRange>, BoxError>;

    async fn discover_characteristic(
        &mut self,
        service: ServiceRange,
        uuid: Uuid128,
    ) -> Result<Option<Characteristic>, BoxError>;

    async fn read(&mut self, characteristic: &Characteristic) -> Result<Bytes, BoxError>;

    async fn write(&mut self, characteristic: &Characteristic, value: &[u8])
        -> Result<(), BoxError>;

    async fn disconnect(self) -> Result<(), BoxError>;
}

impl<B: Bearer> GattClient for AttClient<B> {
    async fn discover_service(&mut self, uuid: Uuid128) -> Result<Option<ServiceRange>, BoxError> {
        Ok(AttClient::discover_service(self, uuid).await?)
    }

    async fn discover_characteristic(
        &mut self,
        service: ServiceRange,
        uuid: Uuid128,
    ) -> Result<Option<Characteristic>, BoxError> {
        Ok(AttClient::discover_characteristic(self, service, uuid).await?)
    }

    async fn read(&mut self, characteristic: &Characteristic) -> Result<Bytes, BoxError> {
        Ok(AttClient::read(self, characteristic.value_handle).await?)
    }

    async fn write(
        &mut self,
        characteristic: &Characteristic,
        value: &[u8],
    ) -> Result<(), BoxError> {
        Ok(AttClient::write(self, characteristic.value_handle, value).await?)
    }

    async fn disconnect(self) -> Result<(), BoxError> {
        Ok(AttClient::disconnect(self)?)
    }
}

/// Brings `controller` up with LE enabled, touching only the settings that
/// are not already in place.
pub(crate) async fn enable_le(controller: Controller) -> management::Result<()> {
    let mut socket = ManagementStream::open()?;
    let info = management::get_controller_info(&mut socket, controller).await?;
    if info.le_ready() {
        return Ok(());
    }

    if !info.current_settings.contains(ControllerSetting::LE) {
        debug!(%controller, "enabling le");
        management::set_le(&mut socket, controller, true).await?;
    }
    if !info.current_settings.contains(ControllerSetting::Powered) {
        debug!(%controller, "powering on");
        management::set_powered(&mut socket, controller, true).await?;
    }

    Ok(())
}

fn le_address_types() -> BitFlags<AddressTypeFlag> {
    AddressTypeFlag::LEPublic | AddressTypeFlag::LERandom
}

/// The central role on a local BlueZ controller.
#[derive(Debug, Clone)]
pub struct BluezCentral {
    controller: Controller,
    options: SocketOptions,
}

impl BluezCentral {
    pub fn new(controller: Controller, options: SocketOptions) -> Self {
        BluezCentral {
            controller,
            options,
        }
    }
}

/// Scan results relayed from the management socket reader task.
pub struct BluezScan {
    rx: mpsc::Receiver<Result<DeviceDescriptor, BoxError>>,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Stream for BluezScan {
    type Item = Result<DeviceDescriptor, BoxError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for BluezScan {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

fn merge(seen: &mut HashMap<Address, DeviceDescriptor>, response: Response) -> Option<DeviceDescriptor> {
    let (address, address_type, rssi, eir_data) = match response.event {
        Event::DeviceFound {
            address,
            address_type,
            rssi,
            eir_data,
            ..
        } if address_type.is_le() => (address, address_type, rssi, eir_data),
        _ => return None,
    };

    let eir = match parse_eir(eir_data) {
        Ok(eir) => eir,
        Err(err) => {
            trace!(%address, "ignoring bad advertising data: {}", err);
            return None;
        }
    };

    let device = seen.entry(address).or_insert_with(|| DeviceDescriptor {
        address,
        address_type,
        name: None,
        services: Vec::new(),
        rssi,
    });

    device.address_type = address_type;
    device.rssi = rssi;
    if let Some(name) = &eir.name {
        // a shortened name never replaces a complete one
        if name.complete || device.name.is_none() {
            device.name = Some(name.name.clone());
        }
    }
    for service in eir.services() {
        if !device.advertises(service) {
            device.services.push(service);
        }
    }

    Some(device.clone())
}

fn scan_socket_events(
    socket: ManagementStream,
) -> impl Stream<Item = Result<Response, management::Error>> + Unpin {
    Box::pin(futures::stream::unfold(socket, |mut socket| async move {
        let response = socket.receive().await;
        Some((response, socket))
    }))
}

/// Starts discovery again on a socket of its own: the command waits for its
/// reply and discards everything else, so it must not share the socket
/// that scan events are read from.
async fn restart_discovery(controller: Controller) -> Result<(), management::Error> {
    let mut socket = ManagementStream::open()?;
    management::start_discovery(&mut socket, controller, le_address_types()).await?;
    Ok(())
}

async fn scan_events<S, R, F>(
    mut events: S,
    controller: Controller,
    mut restart: R,
    tx: mpsc::Sender<Result<DeviceDescriptor, BoxError>>,
    token: CancellationToken,
) where
    S: Stream<Item = Result<Response, management::Error>> + Unpin,
    R: FnMut(Controller) -> F,
    F: Future<Output = Result<(), management::Error>>,
{
    let mut seen = HashMap::new();

    loop {
        let response = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            response = events.next() => response,
        };

        let response = match response {
            Some(Ok(response)) if response.controller == controller => response,
            Some(Ok(_)) => continue,
            Some(Err(err)) => {
                let _ = tx.send(Err(err.into())).await;
                break;
            }
            None => break,
        };

        if let Event::Discovering {
            discovering: false, ..
        } = response.event
        {
            // the kernel ends discovery on its own after a while
            debug!(%controller, "discovery stopped, restarting");
            if let Err(err) = restart(controller).await {
                let _ = tx.send(Err(err.into())).await;
                break;
            }
            continue;
        }

        if let Some(device) = merge(&mut seen, response) {
            if tx.send(Ok(device)).await.is_err() {
                break;
            }
        }
    }
}

impl Central for BluezCentral {
    type Scan = BluezScan;
    type Gatt = AttClient<BluetoothStream>;

    async fn enable(&self) -> Result<(), BoxError> {
        Ok(enable_le(self.controller).await?)
    }

    async fn start_scan(&self) -> Result<BluezScan, BoxError> {
        let mut socket = ManagementStream::open()?;
        management::start_discovery(&mut socket, self.controller, le_address_types())
            .await?;
        debug!(controller = %self.controller, "scan started");

        let (tx, rx) = mpsc::channel(32);
        let token = CancellationToken::new();
        let task = tokio::spawn(scan_events(
            scan_socket_events(socket),
            self.controller,
            restart_discovery,
            tx,
            token.clone(),
        ));

        Ok(BluezScan {
            rx,
            token,
            task: Some(task),
        })
    }

    async fn stop_scan(&self, mut scan: BluezScan) -> Result<(), BoxError> {
        scan.token.cancel();
        if let Some(task) = scan.task.take() {
            if let Err(err) = task.await {
                warn!("scan task failed: {}", err);
            }
        }

        let mut socket = ManagementStream::open()?;
        management::stop_discovery(&mut socket, self.controller, le_address_types())
            .await?;
        debug!(controller = %self.controller, "scan stopped");
        Ok(())
    }

    async fn connect(
        &self,
        address: Address,
        address_type: AddressType,
    ) -> Result<AttClient<BluetoothStream>, BoxError> {
        let stream =
            BluetoothStream::connect(address, address_type, L2capTarget::Cid(ATT_CID), &self.options)
                .await?;
        let mut client = AttClient::new(stream);

        match client.exchange_mtu(MAX_PDU_LEN as u16).await {
            Ok(mtu) => debug!(%address, mtu, "att mtu negotiated"),
            // peers that refuse the exchange keep the default MTU
            Err(err) if err.code().is_some() => debug!(%address, "mtu exchange refused: {}", err),
            Err(err) => return Err(err.into()),
        }

        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use bytes::{BufMut, BytesMut};

    use super::*;

    const SERVICE: &str = "79cf4eca-116a-4ded-8426-fb83e53bc1d7";

    fn found(address: Address, eir: &[u8], rssi: i8) -> Response {
        Response {
            event: Event::DeviceFound {
                address,
                address_type: AddressType::LERandom,
                rssi,
                flags: BitFlags::empty(),
                eir_data: Bytes::copy_from_slice(eir),
            },
            controller: Controller(0),
        }
    }

    fn short_name(name: &str) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(name.len() as u8 + 1);
        buf.put_u8(0x08);
        buf.put_slice(name.as_bytes());
        buf.to_vec()
    }

    #[test]
    pub fn merge_combines_reports_test() {
        let service: Uuid128 = SERVICE.parse().unwrap();
        let address: Address = "11:22:33:44:55:66".parse().unwrap();
        let mut seen = HashMap::new();

        let first = merge(
            &mut seen,
            found(address, &crate::eir::advertising_data(service), -70),
        )
        .unwrap();
        assert!(first.advertises(service));
        assert_eq!(first.name, None);

        let second = merge(
            &mut seen,
            found(address, &crate::eir::scan_response("proxy-1"), -60),
        )
        .unwrap();
        assert!(second.advertises(service));
        assert_eq!(second.name.as_deref(), Some("proxy-1"));
        assert_eq!(second.rssi, -60);
        assert_eq!(second.services.len(), 1);

        let third = merge(&mut seen, found(address, &short_name("pro"), -65)).unwrap();
        assert_eq!(third.name.as_deref(), Some("proxy-1"));
    }

    #[test]
    pub fn merge_ignores_other_events_test() {
        let mut seen = HashMap::new();
        let response = Response {
            event: Event::AdvertisingAdded { instance: 1 },
            controller: Controller(0),
        };
        assert!(merge(&mut seen, response).is_none());
        assert!(seen.is_empty());
    }

    #[test]
    pub fn merge_single_report_test() {
        let service: Uuid128 = SERVICE.parse().unwrap();
        let address: Address = "11:22:33:44:55:66".parse().unwrap();
        let mut seen = HashMap::new();

        // the kernel folds a scan response into the report it answers
        let eir = [
            &crate::eir::advertising_data(service)[..],
            &crate::eir::scan_response("proxy-1")[..],
        ]
        .concat();
        let device = merge(&mut seen, found(address, &eir, -50)).unwrap();
        assert!(device.advertises(service));
        assert_eq!(device.name.as_deref(), Some("proxy-1"));
    }

    fn discovering_stopped() -> Response {
        Response {
            event: Event::Discovering {
                address_type: le_address_types(),
                discovering: false,
            },
            controller: Controller(0),
        }
    }

    #[tokio::test]
    pub async fn scan_survives_discovery_restart_test() {
        let first: Address = "11:22:33:44:55:66".parse().unwrap();
        let second: Address = "11:22:33:44:55:77".parse().unwrap();
        let reports: Vec<Result<Response, management::Error>> = vec![
            Ok(found(first, &short_name("a"), -70)),
            Ok(discovering_stopped()),
            Ok(found(second, &short_name("b"), -70)),
        ];
        let events = futures::stream::iter(reports).chain(futures::stream::pending());

        let restarts = Arc::new(AtomicUsize::new(0));
        let restart = {
            let restarts = restarts.clone();
            move |controller: Controller| {
                assert_eq!(controller, Controller(0));
                restarts.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, management::Error>(()) }
            }
        };

        let (tx, mut rx) = mpsc::channel(4);
        let token = CancellationToken::new();
        let task = tokio::spawn(scan_events(events, Controller(0), restart, tx, token.clone()));

        let got = rx.recv().await.unwrap().unwrap();
        assert_eq!(got.address, first);
        // the report after the restart is still delivered
        let got = rx.recv().await.unwrap().unwrap();
        assert_eq!(got.address, second);
        assert_eq!(restarts.load(Ordering::SeqCst), 1);

        token.cancel();
        task.await.unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    pub async fn scan_reports_failed_restart_test() {
        let reports: Vec<Result<Response, management::Error>> = vec![Ok(discovering_stopped())];
        let events = futures::stream::iter(reports).chain(futures::stream::pending());
        let restart = |_: Controller| async { Err::<(), _>(management::Error::InvalidData) };

        let (tx, mut rx) = mpsc::channel(4);
        scan_events(events, Controller(0), restart, tx, CancellationToken::new()).await;

        assert!(rx.recv().await.unwrap().is_err());
        assert!(rx.recv().await.is_none());
    }
}
