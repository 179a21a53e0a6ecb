use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::att::*;
use crate::communication::stream::BluetoothListener;
use crate::communication::Uuid128;
use crate::gatt::{Bearer, MAX_PDU_LEN, PROP_READ, PROP_WRITE, PROP_WRITE_WITHOUT_RESPONSE};

/// Receives values written to a writable characteristic. Implementations
/// must not block: they run on the ATT server task.
pub trait WriteHandler: Send + Sync {
    fn on_write(&self, offset: u16, value: &[u8]);
}

#[derive(Clone)]
pub enum CharacteristicKind {
    /// A constant, readable value.
    Read(Bytes),
    /// Accepts Write Request and Write Command.
    Write(Arc<dyn WriteHandler>),
}

#[derive(Clone)]
pub struct LocalCharacteristic {
    pub uuid: Uuid128,
    pub kind: CharacteristicKind,
}

#[derive(Clone)]
pub struct LocalService {
    pub uuid: Uuid128,
    pub characteristics: Vec<LocalCharacteristic>,
}

enum Attribute {
    Service {
        uuid: Uuid128,
        end: u16,
    },
    Declaration {
        properties: u8,
        value_handle: u16,
        uuid: Uuid128,
    },
    Value {
        uuid: Uuid128,
        kind: CharacteristicKind,
    },
}

impl Attribute {
    fn attribute_type(&self) -> Uuid128 {
        match self {
            Attribute::Service { .. } => Uuid128::from(PRIMARY_SERVICE),
            Attribute::Declaration { .. } => Uuid128::from(CHARACTERISTIC),
            Attribute::Value { uuid, .. } => *uuid,
        }
    }

    /// The readable value, or the error a read of it produces.
    fn read(&self) -> Result<Bytes, ErrorCode> {
        match self {
            Attribute::Service { uuid, .. } => Ok(uuid_value(*uuid)),
            Attribute::Declaration {
                properties,
                value_handle,
                uuid,
            } => {
                let mut buf = BytesMut::with_capacity(19);
                buf.put_u8(*properties);
                buf.put_u16_le(*value_handle);
                buf.put_slice(&uuid_value(*uuid));
                Ok(buf.freeze())
            }
            Attribute::Value {
                kind: CharacteristicKind::Read(value),
                ..
            } => Ok(value.clone()),
            Attribute::Value { .. } => Err(ErrorCode::ReadNotPermitted),
        }
    }
}

fn uuid_value(uuid: Uuid128) -> Bytes {
    match uuid.as_uuid16() {
        Some(short) => Bytes::copy_from_slice(&short.0.to_le_bytes()),
        None => Bytes::copy_from_slice(&uuid.to_le_bytes()),
    }
}

/// Per-connection server state.
#[derive(Debug)]
pub struct BearerState {
    mtu: u16,
    queue: Vec<(u16, u16, Bytes)>,
}

impl Default for BearerState {
    fn default() -> Self {
        BearerState {
            mtu: DEFAULT_MTU,
            queue: Vec::new(),
        }
    }
}

/// The attribute database for a single primary service. Handle 1 is the
/// service declaration; every characteristic takes a declaration handle
/// followed by its value handle.
pub struct AttributeTable {
    attributes: BTreeMap<u16, Attribute>,
    server_mtu: u16,
}

impl AttributeTable {
    pub fn new(service: &LocalService) -> Self {
        let mut attributes = BTreeMap::new();
        let end = 1 + 2 * service.characteristics.len() as u16;

        attributes.insert(
            1,
            Attribute::Service {
                uuid: service.uuid,
                end,
            },
        );

        for (i, characteristic) in service.characteristics.iter().enumerate() {
            let declaration = 2 + 2 * i as u16;
            let properties = match characteristic.kind {
                CharacteristicKind::Read(_) => PROP_READ,
                CharacteristicKind::Write(_) => PROP_WRITE | PROP_WRITE_WITHOUT_RESPONSE,
            };

            attributes.insert(
                declaration,
                Attribute::Declaration {
                    properties,
                    value_handle: declaration + 1,
                    uuid: characteristic.uuid,
                },
            );
            attributes.insert(
                declaration + 1,
                Attribute::Value {
                    uuid: characteristic.uuid,
                    kind: characteristic.kind.clone(),
                },
            );
        }

        AttributeTable {
            attributes,
            server_mtu: MAX_PDU_LEN as u16,
        }
    }

    /// Value handle of the characteristic with the given UUID.
    pub fn value_handle(&self, uuid: Uuid128) -> Option<u16> {
        self.attributes.iter().find_map(|(&handle, attr)| match attr {
            Attribute::Value { uuid: u, .. } if *u == uuid => Some(handle),
            _ => None,
        })
    }

    fn range(&self, start: u16, end: u16) -> impl Iterator<Item = (&u16, &Attribute)> {
        self.attributes.range(start..=end)
    }

    /// Answers one request PDU. Commands and confirmations produce no
    /// response.
    pub fn handle(&self, state: &mut BearerState, pdu: &[u8]) -> Option<Bytes> {
        let raw = *pdu.first()?;
        let request = match Request::parse(pdu) {
            Ok(request) => request,
            Err(_) if Opcode::is_command(raw) => return None,
            Err(code) => return Some(Response::error(raw, 0, code).encode()),
        };

        let response = match self.respond(state, request) {
            Ok(Some(response)) => response,
            Ok(None) => return None,
            Err((handle, code)) => Response::error(raw, handle, code),
        };

        let mut pdu = response.encode();
        pdu.truncate(state.mtu as usize);
        Some(pdu)
    }

    fn respond(
        &self,
        state: &mut BearerState,
        request: Request,
    ) -> Result<Option<Response>, (u16, ErrorCode)> {
        let check_range = |start: u16, end: u16| {
            if start == 0 || start > end {
                Err((start, ErrorCode::InvalidHandle))
            } else {
                Ok(())
            }
        };
        let mtu = state.mtu as usize;

        let response = match request {
            Request::ExchangeMtu { mtu } => {
                state.mtu = mtu.min(self.server_mtu).max(DEFAULT_MTU);
                Response::ExchangeMtu {
                    mtu: self.server_mtu,
                }
            }
            Request::FindInformation { start, end } => {
                check_range(start, end)?;
                let mut entries: Vec<(u16, Uuid128)> = Vec::new();
                for (&handle, attr) in self.range(start, end) {
                    let uuid = attr.attribute_type();
                    // one response carries either 16-bit or 128-bit uuids
                    let short = uuid.as_uuid16().is_some();
                    if let Some((_, first)) = entries.first() {
                        if first.as_uuid16().is_some() != short {
                            break;
                        }
                    }
                    let width = if short { 4 } else { 18 };
                    if 2 + (entries.len() + 1) * width > mtu {
                        break;
                    }
                    entries.push((handle, uuid));
                }
                if entries.is_empty() {
                    return Err((start, ErrorCode::AttributeNotFound));
                }
                Response::FindInformation { entries }
            }
            Request::FindByTypeValue {
                start,
                end,
                attribute_type,
                value,
            } => {
                check_range(start, end)?;
                let mut ranges = Vec::new();
                if attribute_type == PRIMARY_SERVICE {
                    for (&handle, attr) in self.range(start, end) {
                        if let Attribute::Service { uuid, end } = attr {
                            if Uuid128::from_le_slice(&value) == Some(*uuid) {
                                ranges.push((handle, *end));
                            }
                        }
                    }
                }
                if ranges.is_empty() {
                    return Err((start, ErrorCode::AttributeNotFound));
                }
                Response::FindByTypeValue { ranges }
            }
            Request::ReadByType {
                start,
                end,
                attribute_type,
            } => {
                check_range(start, end)?;
                let mut entries: Vec<HandleValue> = Vec::new();
                for (&handle, attr) in self.range(start, end) {
                    if attr.attribute_type() != attribute_type {
                        continue;
                    }
                    let value = attr.read().map_err(|code| (handle, code))?;
                    // entries share one length, and the first one decides it
                    let max = (mtu - 4).min(253);
                    let value = value.slice(..value.len().min(max));
                    if let Some(first) = entries.first() {
                        if first.value.len() != value.len()
                            || 2 + (entries.len() + 1) * (2 + value.len()) > mtu
                        {
                            break;
                        }
                    }
                    entries.push(HandleValue { handle, value });
                }
                if entries.is_empty() {
                    return Err((start, ErrorCode::AttributeNotFound));
                }
                Response::ReadByType { entries }
            }
            Request::ReadByGroupType {
                start,
                end,
                group_type,
            } => {
                check_range(start, end)?;
                if group_type != Uuid128::from(PRIMARY_SERVICE) {
                    return Err((start, ErrorCode::UnsupportedGroupType));
                }
                let mut entries: Vec<GroupValue> = Vec::new();
                for (&handle, attr) in self.range(start, end) {
                    if let Attribute::Service { uuid, end } = attr {
                        let value = uuid_value(*uuid);
                        if let Some(first) = entries.first() {
                            if first.value.len() != value.len() {
                                break;
                            }
                        }
                        entries.push(GroupValue {
                            handle,
                            end_group: *end,
                            value,
                        });
                    }
                }
                if entries.is_empty() {
                    return Err((start, ErrorCode::AttributeNotFound));
                }
                Response::ReadByGroupType { entries }
            }
            Request::Read { handle } => {
                let attr = self.attribute(handle)?;
                let value = attr.read().map_err(|code| (handle, code))?;
                Response::Read {
                    value: value.slice(..value.len().min(mtu - 1)),
                }
            }
            Request::ReadBlob { handle, offset } => {
                let attr = self.attribute(handle)?;
                let value = attr.read().map_err(|code| (handle, code))?;
                let offset = offset as usize;
                if offset > value.len() {
                    return Err((handle, ErrorCode::InvalidOffset));
                }
                let end = value.len().min(offset + mtu - 1);
                Response::ReadBlob {
                    value: value.slice(offset..end),
                }
            }
            Request::Write { handle, value } => {
                self.write(handle, 0, &value)?;
                Response::Write
            }
            Request::WriteCommand { handle, value } => {
                // commands never get a response, not even an error
                let _ = self.write(handle, 0, &value);
                return Ok(None);
            }
            Request::PrepareWrite {
                handle,
                offset,
                value,
            } => {
                self.writable(handle)?;
                if state.queue.len() >= 64 {
                    return Err((handle, ErrorCode::PrepareQueueFull));
                }
                state.queue.push((handle, offset, value.clone()));
                Response::PrepareWrite {
                    handle,
                    offset,
                    value,
                }
            }
            Request::ExecuteWrite { commit } => {
                let queue = std::mem::take(&mut state.queue);
                if commit {
                    self.execute(queue)?;
                }
                Response::ExecuteWrite
            }
            Request::Confirmation => return Ok(None),
        };

        Ok(Some(response))
    }

    fn attribute(&self, handle: u16) -> Result<&Attribute, (u16, ErrorCode)> {
        self.attributes
            .get(&handle)
            .ok_or((handle, ErrorCode::InvalidHandle))
    }

    fn writable(&self, handle: u16) -> Result<&Arc<dyn WriteHandler>, (u16, ErrorCode)> {
        match self.attribute(handle)? {
            Attribute::Value {
                kind: CharacteristicKind::Write(handler),
                ..
            } => Ok(handler),
            _ => Err((handle, ErrorCode::WriteNotPermitted)),
        }
    }

    fn write(&self, handle: u16, offset: u16, value: &[u8]) -> Result<(), (u16, ErrorCode)> {
        let handler = self.writable(handle)?;
        if value.len() > MAX_ATTRIBUTE_LEN {
            return Err((handle, ErrorCode::InvalidAttributeValueLength));
        }
        handler.on_write(offset, value);
        Ok(())
    }

    /// Applies queued writes. Contiguous parts for the same handle are
    /// joined into one write starting at the first part's offset.
    fn execute(&self, queue: Vec<(u16, u16, Bytes)>) -> Result<(), (u16, ErrorCode)> {
        let mut joined: Vec<(u16, u16, Vec<u8>)> = Vec::new();

        for (handle, offset, part) in queue {
            match joined.last_mut() {
                Some((h, start, value))
                    if *h == handle && *start as usize + value.len() == offset as usize =>
                {
                    value.extend_from_slice(&part);
                }
                _ => joined.push((handle, offset, part.to_vec())),
            }
        }

        for (handle, offset, value) in joined {
            self.write(handle, offset, &value)?;
        }
        Ok(())
    }
}

/// Answers requests on one bearer until the peer leaves or `token` fires.
pub async fn serve_bearer<B: Bearer>(
    mut bearer: B,
    table: Arc<AttributeTable>,
    token: CancellationToken,
) {
    let mut state = BearerState::default();

    loop {
        let pdu = tokio::select! {
            _ = token.cancelled() => break,
            pdu = bearer.recv() => pdu,
        };

        let pdu = match pdu {
            Ok(Some(pdu)) => pdu,
            Ok(None) => break,
            Err(err) => {
                debug!("att bearer read failed: {}", err);
                break;
            }
        };

        if let Some(response) = table.handle(&mut state, &pdu) {
            if let Err(err) = bearer.send(&response).await {
                debug!("att bearer write failed: {}", err);
                break;
            }
        }
    }

    if let Err(err) = bearer.close() {
        debug!("att bearer close failed: {}", err);
    }
}

/// Accepts ATT connections until `token` is cancelled, serving each on its
/// own task.
pub async fn serve(listener: BluetoothListener, table: Arc<AttributeTable>, token: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            _ = token.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, (peer, _))) => {
                debug!(%peer, "gatt client connected");
                tokio::spawn(serve_bearer(stream, table.clone(), token.child_token()));
            }
            Err(err) => {
                warn!("accepting att connection failed: {}", err);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(u16, Vec<u8>)>>);

    impl WriteHandler for Recorder {
        fn on_write(&self, offset: u16, value: &[u8]) {
            self.0.lock().unwrap().push((offset, value.to_vec()));
        }
    }

    fn service(recorder: Arc<Recorder>) -> LocalService {
        LocalService {
            uuid: "79cf4eca-116a-4ded-8426-fb83e53bc1d7".parse().unwrap(),
            characteristics: vec![
                LocalCharacteristic {
                    uuid: "ab76ead2-b6e6-4f12-a053-61cd0eed19f9".parse().unwrap(),
                    kind: CharacteristicKind::Read(Bytes::from_static(b"129")),
                },
                LocalCharacteristic {
                    uuid: "918ce61c-199f-419e-b6d5-59883a0049d8".parse().unwrap(),
                    kind: CharacteristicKind::Write(recorder),
                },
            ],
        }
    }

    #[test]
    pub fn table_layout_test() {
        let table = AttributeTable::new(&service(Default::default()));
        assert_eq!(
            table.value_handle("ab76ead2-b6e6-4f12-a053-61cd0eed19f9".parse().unwrap()),
            Some(3)
        );
        assert_eq!(
            table.value_handle("918ce61c-199f-419e-b6d5-59883a0049d8".parse().unwrap()),
            Some(5)
        );
    }

    #[test]
    pub fn read_and_write_permissions_test() {
        let recorder = Arc::new(Recorder::default());
        let table = AttributeTable::new(&service(recorder.clone()));
        let mut state = BearerState::default();

        let rsp = table.handle(&mut state, &Request::Read { handle: 3 }.encode());
        assert_eq!(rsp.unwrap(), Response::Read { value: Bytes::from_static(b"129") }.encode());

        let rsp = table.handle(&mut state, &Request::Read { handle: 5 }.encode());
        assert_eq!(
            rsp.unwrap(),
            Response::error(0x0A, 5, ErrorCode::ReadNotPermitted).encode()
        );

        let write = Request::Write {
            handle: 3,
            value: Bytes::from_static(b"x"),
        };
        let rsp = table.handle(&mut state, &write.encode());
        assert_eq!(
            rsp.unwrap(),
            Response::error(0x12, 3, ErrorCode::WriteNotPermitted).encode()
        );

        let command = Request::WriteCommand {
            handle: 5,
            value: Bytes::from_static(b"proxy"),
        };
        assert!(table.handle(&mut state, &command.encode()).is_none());
        assert_eq!(*recorder.0.lock().unwrap(), vec![(0, b"proxy".to_vec())]);
    }

    #[test]
    pub fn queued_writes_are_joined_test() {
        let recorder = Arc::new(Recorder::default());
        let table = AttributeTable::new(&service(recorder.clone()));
        let mut state = BearerState::default();

        for (offset, part) in [(0u16, &b"hello "[..]), (6, &b"world"[..])] {
            let prepare = Request::PrepareWrite {
                handle: 5,
                offset,
                value: Bytes::copy_from_slice(part),
            };
            assert!(table.handle(&mut state, &prepare.encode()).is_some());
        }
        assert!(recorder.0.lock().unwrap().is_empty());

        let rsp = table.handle(&mut state, &Request::ExecuteWrite { commit: true }.encode());
        assert_eq!(rsp.unwrap(), Response::ExecuteWrite.encode());
        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec![(0, b"hello world".to_vec())]
        );
    }

    #[test]
    pub fn unknown_handle_test() {
        let table = AttributeTable::new(&service(Default::default()));
        let mut state = BearerState::default();
        let rsp = table.handle(&mut state, &Request::Read { handle: 9 }.encode());
        assert_eq!(
            rsp.unwrap(),
            Response::error(0x0A, 9, ErrorCode::InvalidHandle).encode()
        );
    }
}
