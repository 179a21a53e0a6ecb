#![allow(dead_code)]

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::io::DuplexStream;
use tokio_util::sync::CancellationToken;

use blesocks::communication::Uuid128;
use blesocks::gatt::{Characteristic, CharacteristicKind, LocalService, ServiceRange, PROP_READ};
use blesocks::management::interface::Controller;
use blesocks::{
    Address, AddressType, BoxError, Central, ChannelId, ChannelTransport, Connector,
    DeviceDescriptor, GattClient, Peripheral, Radio,
};

pub fn service() -> Uuid128 {
    "79cf4eca-116a-4ded-8426-fb83e53bc1d7".parse().unwrap()
}

pub fn channel_characteristic() -> Uuid128 {
    "ab76ead2-b6e6-4f12-a053-61cd0eed19f9".parse().unwrap()
}

pub fn handoff_characteristic() -> Uuid128 {
    "918ce61c-199f-419e-b6d5-59883a0049d8".parse().unwrap()
}

pub const PROXY: &str = "proxy-1";

pub fn proxy_address() -> Address {
    "11:22:33:44:55:66".parse().unwrap()
}

pub fn device(name: &str, address: &str, services: Vec<Uuid128>) -> DeviceDescriptor {
    DeviceDescriptor {
        address: address.parse().unwrap(),
        address_type: AddressType::LERandom,
        name: Some(name.to_owned()),
        services,
        rssi: -60,
    }
}

pub fn proxy() -> DeviceDescriptor {
    device(PROXY, "11:22:33:44:55:66", vec![service()])
}

pub fn count(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::SeqCst);
}

#[derive(Default)]
pub struct CentralCalls {
    pub enable: AtomicUsize,
    pub start_scan: AtomicUsize,
    pub stop_scan: AtomicUsize,
    pub connect: AtomicUsize,
    pub discover: AtomicUsize,
    pub read: AtomicUsize,
    pub disconnect: AtomicUsize,
    pub written: Mutex<Vec<Vec<u8>>>,
}

/// How the peer's GATT server behaves.
#[derive(Clone)]
pub struct GattScript {
    pub has_service: bool,
    pub has_characteristic: bool,
    pub value: Bytes,
    pub fail_connect: bool,
    pub fail_read: bool,
    pub fail_disconnect: bool,
    /// Cancelled while the value is read, to model a shutdown mid-connect.
    pub cancel_on_read: Option<CancellationToken>,
}

impl Default for GattScript {
    fn default() -> Self {
        GattScript {
            has_service: true,
            has_characteristic: true,
            value: Bytes::from_static(b"4242"),
            fail_connect: false,
            fail_read: false,
            fail_disconnect: false,
            cancel_on_read: None,
        }
    }
}

pub struct MockCentral {
    pub reports: Vec<Result<DeviceDescriptor, String>>,
    /// Keep the scan open after the scripted reports instead of ending it.
    pub keep_scanning: bool,
    pub fail_enable: bool,
    pub script: GattScript,
    pub calls: Arc<CentralCalls>,
}

impl MockCentral {
    pub fn new(reports: Vec<DeviceDescriptor>) -> Self {
        MockCentral {
            reports: reports.into_iter().map(Ok).collect(),
            keep_scanning: false,
            fail_enable: false,
            script: GattScript::default(),
            calls: Arc::default(),
        }
    }
}

impl Central for MockCentral {
    type Scan = BoxStream<'static, Result<DeviceDescriptor, BoxError>>;
    type Gatt = MockGatt;

    async fn enable(&self) -> Result<(), BoxError> {
        bump(&self.calls.enable);
        if self.fail_enable {
            return Err("adapter is off".into());
        }
        Ok(())
    }

    async fn start_scan(&self) -> Result<Self::Scan, BoxError> {
        bump(&self.calls.start_scan);
        let reports: Vec<Result<DeviceDescriptor, BoxError>> = self
            .reports
            .iter()
            .cloned()
            .map(|report| report.map_err(BoxError::from))
            .collect();

        let scan = stream::iter(reports);
        if self.keep_scanning {
            Ok(scan.chain(stream::pending()).boxed())
        } else {
            Ok(scan.boxed())
        }
    }

    async fn stop_scan(&self, _scan: Self::Scan) -> Result<(), BoxError> {
        bump(&self.calls.stop_scan);
        Ok(())
    }

    async fn connect(
        &self,
        _address: Address,
        _address_type: AddressType,
    ) -> Result<MockGatt, BoxError> {
        bump(&self.calls.connect);
        if self.script.fail_connect {
            return Err("connection refused".into());
        }
        Ok(MockGatt {
            script: self.script.clone(),
            calls: self.calls.clone(),
        })
    }
}

pub struct MockGatt {
    script: GattScript,
    calls: Arc<CentralCalls>,
}

impl GattClient for MockGatt {
    async fn discover_service(&mut self, _uuid: Uuid128) -> Result<Option<ServiceRange>, BoxError> {
        bump(&self.calls.discover);
        Ok(self
            .script
            .has_service
            .then_some(ServiceRange { start: 1, end: 5 }))
    }

    async fn discover_characteristic(
        &mut self,
        _service: ServiceRange,
        _uuid: Uuid128,
    ) -> Result<Option<Characteristic>, BoxError> {
        Ok(self.script.has_characteristic.then_some(Characteristic {
            declaration: 2,
            value_handle: 3,
            properties: PROP_READ,
        }))
    }

    async fn read(&mut self, _characteristic: &Characteristic) -> Result<Bytes, BoxError> {
        bump(&self.calls.read);
        if let Some(token) = &self.script.cancel_on_read {
            token.cancel();
        }
        if self.script.fail_read {
            return Err("read not permitted".into());
        }
        Ok(self.script.value.clone())
    }

    async fn write(&mut self, _characteristic: &Characteristic, value: &[u8]) -> Result<(), BoxError> {
        self.calls.written.lock().unwrap().push(value.to_vec());
        Ok(())
    }

    async fn disconnect(self) -> Result<(), BoxError> {
        bump(&self.calls.disconnect);
        if self.script.fail_disconnect {
            return Err("link already gone".into());
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct TransportState {
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub fail_open: AtomicBool,
    pub opened: Mutex<Vec<(Address, ChannelId)>>,
    /// The far ends of opened channels, standing in for the peer.
    pub remotes: Mutex<Vec<DuplexStream>>,
}

#[derive(Clone, Default)]
pub struct MockTransport {
    pub state: Arc<TransportState>,
}

impl MockTransport {
    pub fn opens(&self) -> usize {
        count(&self.state.opens)
    }

    pub fn closes(&self) -> usize {
        count(&self.state.closes)
    }

    pub fn remote(&self) -> DuplexStream {
        self.state.remotes.lock().unwrap().remove(0)
    }
}

impl ChannelTransport for MockTransport {
    type Handle = DuplexStream;

    async fn open(
        &self,
        address: Address,
        _address_type: AddressType,
        channel: ChannelId,
    ) -> io::Result<DuplexStream> {
        bump(&self.state.opens);
        if self.state.fail_open.load(Ordering::SeqCst) {
            return Err(io::ErrorKind::ConnectionRefused.into());
        }

        let (near, far) = tokio::io::duplex(4096);
        self.state.remotes.lock().unwrap().push(far);
        self.state.opened.lock().unwrap().push((address, channel));
        Ok(near)
    }

    fn close_handle(&self, handle: DuplexStream) -> io::Result<()> {
        bump(&self.state.closes);
        drop(handle);
        Ok(())
    }
}

pub fn radio() -> Radio {
    Radio::new(Controller(0))
}

pub fn connector(central: MockCentral, transport: &MockTransport) -> Connector<MockCentral, MockTransport> {
    Connector::new(radio(), central, transport.clone())
}

#[derive(Default)]
pub struct PeripheralState {
    pub enable: AtomicUsize,
    pub advertise: AtomicUsize,
    pub serve: AtomicUsize,
    pub stop: AtomicUsize,
    pub fail_advertise: AtomicBool,
    pub advertised: Mutex<Option<(String, Uuid128)>>,
    pub service: Mutex<Option<LocalService>>,
    pub server: Mutex<Option<CancellationToken>>,
}

#[derive(Clone, Default)]
pub struct MockPeripheral {
    pub state: Arc<PeripheralState>,
}

impl MockPeripheral {
    /// Delivers a write to the first writable characteristic being served,
    /// the way the GATT server task would.
    pub fn write(&self, offset: u16, value: &[u8]) {
        let service = self.state.service.lock().unwrap();
        let service = service.as_ref().expect("nothing is being served");
        for characteristic in &service.characteristics {
            if let CharacteristicKind::Write(handler) = &characteristic.kind {
                handler.on_write(offset, value);
                return;
            }
        }
        panic!("no writable characteristic");
    }

    pub fn server_cancelled(&self) -> bool {
        self.state
            .server
            .lock()
            .unwrap()
            .as_ref()
            .map_or(false, CancellationToken::is_cancelled)
    }
}

impl Peripheral for MockPeripheral {
    async fn enable(&self) -> Result<(), BoxError> {
        bump(&self.state.enable);
        Ok(())
    }

    async fn advertise(&self, name: &str, service: Uuid128) -> Result<(), BoxError> {
        bump(&self.state.advertise);
        if self.state.fail_advertise.load(Ordering::SeqCst) {
            return Err("too many advertising instances".into());
        }
        *self.state.advertised.lock().unwrap() = Some((name.to_owned(), service));
        Ok(())
    }

    async fn serve(&self, service: LocalService, token: CancellationToken) -> Result<(), BoxError> {
        bump(&self.state.serve);
        *self.state.service.lock().unwrap() = Some(service);
        *self.state.server.lock().unwrap() = Some(token);
        Ok(())
    }

    async fn stop(&self) -> Result<(), BoxError> {
        bump(&self.state.stop);
        Ok(())
    }
}
