//! GATT over the fixed ATT channel: a client for the central role and a
//! one-service server for the peripheral role.

use std::io;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::communication::stream::BluetoothStream;

pub mod client;
pub mod server;

pub use client::AttClient;
pub use server::{AttributeTable, CharacteristicKind, LocalCharacteristic, LocalService, WriteHandler};

/// Largest PDU either side accepts.
pub const MAX_PDU_LEN: usize = 517;

/// Handle range of a primary service.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ServiceRange {
    pub start: u16,
    pub end: u16,
}

/// A characteristic found by discovery.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Characteristic {
    pub declaration: u16,
    pub value_handle: u16,
    pub properties: u8,
}

pub const PROP_READ: u8 = 0x02;
pub const PROP_WRITE_WITHOUT_RESPONSE: u8 = 0x04;
pub const PROP_WRITE: u8 = 0x08;

/// A message-oriented transport carrying one ATT PDU per message.
#[allow(async_fn_in_trait)]
pub trait Bearer {
    async fn send(&mut self, pdu: &[u8]) -> io::Result<()>;

    /// `None` once the peer has gone away.
    async fn recv(&mut self) -> io::Result<Option<Bytes>>;

    fn close(self) -> io::Result<()>;
}

impl Bearer for BluetoothStream {
    async fn send(&mut self, pdu: &[u8]) -> io::Result<()> {
        // SOCK_SEQPACKET: one write is one PDU
        self.write_all(pdu).await
    }

    async fn recv(&mut self) -> io::Result<Option<Bytes>> {
        let mut buf = vec![0u8; MAX_PDU_LEN];
        let n = self.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(buf.into()))
    }

    fn close(self) -> io::Result<()> {
        BluetoothStream::close(self)
    }
}
