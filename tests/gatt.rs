use std::io;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use blesocks::att::ErrorCode;
use blesocks::gatt::server::serve_bearer;
use blesocks::gatt::{
    AttClient, AttributeTable, Bearer, CharacteristicKind, LocalCharacteristic, LocalService,
    ServiceRange, PROP_READ,
};
use blesocks::handoff::{handoff_slot, PendingHandoff};

mod common;
use common::*;

/// One end of an in-memory, message-preserving ATT bearer.
struct Pipe {
    tx: mpsc::UnboundedSender<Bytes>,
    rx: mpsc::UnboundedReceiver<Bytes>,
}

fn pipe() -> (Pipe, Pipe) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    (Pipe { tx: a_tx, rx: b_rx }, Pipe { tx: b_tx, rx: a_rx })
}

impl Bearer for Pipe {
    async fn send(&mut self, pdu: &[u8]) -> io::Result<()> {
        self.tx
            .send(Bytes::copy_from_slice(pdu))
            .map_err(|_| io::ErrorKind::BrokenPipe.into())
    }

    async fn recv(&mut self) -> io::Result<Option<Bytes>> {
        Ok(self.rx.recv().await)
    }

    fn close(self) -> io::Result<()> {
        Ok(())
    }
}

struct Peer {
    client: AttClient<Pipe>,
    pending: PendingHandoff,
    token: CancellationToken,
    server: tokio::task::JoinHandle<()>,
}

fn peer(channel_value: Bytes) -> Peer {
    let token = CancellationToken::new();
    let (sink, pending) = handoff_slot(token.clone());

    let service = LocalService {
        uuid: service(),
        characteristics: vec![
            LocalCharacteristic {
                uuid: channel_characteristic(),
                kind: CharacteristicKind::Read(channel_value),
            },
            LocalCharacteristic {
                uuid: handoff_characteristic(),
                kind: CharacteristicKind::Write(Arc::new(sink)),
            },
        ],
    };
    let table = Arc::new(AttributeTable::new(&service));

    let (near, far) = pipe();
    let server = tokio::spawn(serve_bearer(far, table, token.clone()));

    Peer {
        client: AttClient::new(near),
        pending,
        token,
        server,
    }
}

#[tokio::test]
pub async fn discover_and_read_test() {
    let mut peer = peer(Bytes::from_static(b"4242"));

    assert_eq!(peer.client.exchange_mtu(517).await.unwrap(), 517);

    let range = peer.client.discover_service(service()).await.unwrap().unwrap();
    assert_eq!(range, ServiceRange { start: 1, end: 5 });

    let characteristic = peer
        .client
        .discover_characteristic(range, channel_characteristic())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(characteristic.value_handle, 3);
    assert_eq!(characteristic.properties & PROP_READ, PROP_READ);

    let value = peer.client.read(characteristic.value_handle).await.unwrap();
    assert_eq!(&value[..], b"4242");

    let unknown = "00000000-0000-4000-8000-000000000001".parse().unwrap();
    assert!(peer.client.discover_service(unknown).await.unwrap().is_none());
    assert!(peer
        .client
        .discover_characteristic(range, unknown)
        .await
        .unwrap()
        .is_none());

    peer.client.disconnect().unwrap();
    peer.server.await.unwrap();
}

#[tokio::test]
pub async fn long_read_test() {
    let long: Vec<u8> = (0..300).map(|i| (i % 251) as u8).collect();
    let mut peer = peer(Bytes::from(long.clone()));

    // default mtu, so the value spans many blob reads
    let value = peer.client.read(3).await.unwrap();
    assert_eq!(&value[..], &long[..]);
}

#[tokio::test]
pub async fn handoff_write_test() {
    let mut peer = peer(Bytes::from_static(b"4242"));
    let range = peer.client.discover_service(service()).await.unwrap().unwrap();
    let handoff = peer
        .client
        .discover_characteristic(range, handoff_characteristic())
        .await
        .unwrap()
        .unwrap();

    // longer than one write request at the default mtu
    let name = "a-proxy-with-a-rather-long-advertised-name";
    peer.client
        .write(handoff.value_handle, name.as_bytes())
        .await
        .unwrap();

    let got = peer.pending.wait(&CancellationToken::new()).await.unwrap();
    assert_eq!(got, name);
}

#[tokio::test]
pub async fn write_not_permitted_test() {
    let mut peer = peer(Bytes::from_static(b"4242"));

    let err = peer.client.write(3, b"129").await.unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::WriteNotPermitted));

    let err = peer.client.read(5).await.unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::ReadNotPermitted));
}

#[tokio::test]
pub async fn cancel_stops_server_test() {
    let peer = peer(Bytes::from_static(b"4242"));

    peer.token.cancel();
    peer.server.await.unwrap();
}
