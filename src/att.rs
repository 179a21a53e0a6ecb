//! Attribute protocol PDUs (Core 5.2, Vol 3, Part F). Only the subset used
//! for primary service and characteristic discovery, reads and writes is
//! decoded.

use bytes::*;
use num_traits::FromPrimitive;

use crate::communication::Uuid128;

/// MTU every ATT bearer starts with.
pub const DEFAULT_MTU: u16 = 23;
/// Longest attribute value the protocol allows.
pub const MAX_ATTRIBUTE_LEN: usize = 512;

pub const PRIMARY_SERVICE: u16 = 0x2800;
pub const CHARACTERISTIC: u16 = 0x2803;

#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, FromPrimitive)]
pub enum Opcode {
    ErrorRsp = 0x01,
    ExchangeMtuReq = 0x02,
    ExchangeMtuRsp = 0x03,
    FindInformationReq = 0x04,
    FindInformationRsp = 0x05,
    FindByTypeValueReq = 0x06,
    FindByTypeValueRsp = 0x07,
    ReadByTypeReq = 0x08,
    ReadByTypeRsp = 0x09,
    ReadReq = 0x0A,
    ReadRsp = 0x0B,
    ReadBlobReq = 0x0C,
    ReadBlobRsp = 0x0D,
    ReadByGroupTypeReq = 0x10,
    ReadByGroupTypeRsp = 0x11,
    WriteReq = 0x12,
    WriteRsp = 0x13,
    PrepareWriteReq = 0x16,
    PrepareWriteRsp = 0x17,
    ExecuteWriteReq = 0x18,
    ExecuteWriteRsp = 0x19,
    HandleValueNtf = 0x1B,
    HandleValueInd = 0x1D,
    HandleValueCfm = 0x1E,
    WriteCmd = 0x52,
}

impl Opcode {
    /// Commands have bit 6 set and never get a response, not even an error.
    pub fn is_command(raw: u8) -> bool {
        raw & 0x40 != 0
    }
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, FromPrimitive)]
pub enum ErrorCode {
    InvalidHandle = 0x01,
    ReadNotPermitted = 0x02,
    WriteNotPermitted = 0x03,
    InvalidPdu = 0x04,
    InsufficientAuthentication = 0x05,
    RequestNotSupported = 0x06,
    InvalidOffset = 0x07,
    InsufficientAuthorization = 0x08,
    PrepareQueueFull = 0x09,
    AttributeNotFound = 0x0A,
    AttributeNotLong = 0x0B,
    InsufficientEncryptionKeySize = 0x0C,
    InvalidAttributeValueLength = 0x0D,
    UnlikelyError = 0x0E,
    InsufficientEncryption = 0x0F,
    UnsupportedGroupType = 0x10,
    InsufficientResources = 0x11,
}

#[derive(Error, Debug)]
pub enum AttError {
    #[error("Request {:#04x} on handle {:#06x} failed: {:?}.", request, handle, code)]
    Protocol {
        request: u8,
        handle: u16,
        code: ErrorCode,
    },
    #[error("Unknown ATT error code {:#04x}.", code)]
    UnknownErrorCode { code: u8 },
    #[error("Malformed {:?} PDU.", opcode)]
    Malformed { opcode: Option<Opcode> },
    #[error("Expected {:?}, got opcode {:#04x}.", expected, got)]
    UnexpectedResponse { expected: Opcode, got: u8 },
    #[error("The bearer closed.")]
    Closed,
    #[error("IO error: {:?}.", source)]
    IO {
        #[source]
        source: std::io::Error,
    },
}

impl AttError {
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            AttError::Protocol { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<std::io::Error> for AttError {
    fn from(err: std::io::Error) -> Self {
        AttError::IO { source: err }
    }
}

/// Attribute types travel as 16-bit UUIDs when they are in the Bluetooth
/// base range and as 128-bit UUIDs otherwise.
fn put_uuid(buf: &mut BytesMut, uuid: Uuid128) {
    match uuid.as_uuid16() {
        Some(short) => buf.put_u16_le(short.0),
        None => buf.put_slice(&uuid.to_le_bytes()),
    }
}

fn get_uuid(buf: &[u8]) -> Option<Uuid128> {
    Uuid128::from_le_slice(buf)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ExchangeMtu {
        mtu: u16,
    },
    FindInformation {
        start: u16,
        end: u16,
    },
    FindByTypeValue {
        start: u16,
        end: u16,
        attribute_type: u16,
        value: Bytes,
    },
    ReadByType {
        start: u16,
        end: u16,
        attribute_type: Uuid128,
    },
    Read {
        handle: u16,
    },
    ReadBlob {
        handle: u16,
        offset: u16,
    },
    ReadByGroupType {
        start: u16,
        end: u16,
        group_type: Uuid128,
    },
    Write {
        handle: u16,
        value: Bytes,
    },
    WriteCommand {
        handle: u16,
        value: Bytes,
    },
    PrepareWrite {
        handle: u16,
        offset: u16,
        value: Bytes,
    },
    ExecuteWrite {
        commit: bool,
    },
    Confirmation,
}

impl Request {
    pub fn opcode(&self) -> Opcode {
        match self {
            Request::ExchangeMtu { .. } => Opcode::ExchangeMtuReq,
            Request::FindInformation { .. } => Opcode::FindInformationReq,
            Request::FindByTypeValue { .. } => Opcode::FindByTypeValueReq,
            Request::ReadByType { .. } => Opcode::ReadByTypeReq,
            Request::Read { .. } => Opcode::ReadReq,
            Request::ReadBlob { .. } => Opcode::ReadBlobReq,
            Request::ReadByGroupType { .. } => Opcode::ReadByGroupTypeReq,
            Request::Write { .. } => Opcode::WriteReq,
            Request::WriteCommand { .. } => Opcode::WriteCmd,
            Request::PrepareWrite { .. } => Opcode::PrepareWriteReq,
            Request::ExecuteWrite { .. } => Opcode::ExecuteWriteReq,
            Request::Confirmation => Opcode::HandleValueCfm,
        }
    }

    /// Decodes a request. The error carries the code to answer with.
    pub fn parse(pdu: &[u8]) -> Result<Request, ErrorCode> {
        let (&raw, mut buf) = pdu.split_first().ok_or(ErrorCode::InvalidPdu)?;
        let opcode: Opcode = FromPrimitive::from_u8(raw).ok_or(ErrorCode::RequestNotSupported)?;

        let need = |buf: &[u8], len: usize| {
            if buf.len() < len {
                Err(ErrorCode::InvalidPdu)
            } else {
                Ok(())
            }
        };

        let request = match opcode {
            Opcode::ExchangeMtuReq => {
                need(buf, 2)?;
                Request::ExchangeMtu {
                    mtu: buf.get_u16_le(),
                }
            }
            Opcode::FindInformationReq => {
                need(buf, 4)?;
                Request::FindInformation {
                    start: buf.get_u16_le(),
                    end: buf.get_u16_le(),
                }
            }
            Opcode::FindByTypeValueReq => {
                need(buf, 6)?;
                Request::FindByTypeValue {
                    start: buf.get_u16_le(),
                    end: buf.get_u16_le(),
                    attribute_type: buf.get_u16_le(),
                    value: Bytes::copy_from_slice(buf),
                }
            }
            Opcode::ReadByTypeReq | Opcode::ReadByGroupTypeReq => {
                need(buf, 6)?;
                let start = buf.get_u16_le();
                let end = buf.get_u16_le();
                let uuid = get_uuid(buf).ok_or(ErrorCode::InvalidPdu)?;
                if opcode == Opcode::ReadByTypeReq {
                    Request::ReadByType {
                        start,
                        end,
                        attribute_type: uuid,
                    }
                } else {
                    Request::ReadByGroupType {
                        start,
                        end,
                        group_type: uuid,
                    }
                }
            }
            Opcode::ReadReq => {
                need(buf, 2)?;
                Request::Read {
                    handle: buf.get_u16_le(),
                }
            }
            Opcode::ReadBlobReq => {
                need(buf, 4)?;
                Request::ReadBlob {
                    handle: buf.get_u16_le(),
                    offset: buf.get_u16_le(),
                }
            }
            Opcode::WriteReq | Opcode::WriteCmd => {
                need(buf, 2)?;
                let handle = buf.get_u16_le();
                let value = Bytes::copy_from_slice(buf);
                if opcode == Opcode::WriteReq {
                    Request::Write { handle, value }
                } else {
                    Request::WriteCommand { handle, value }
                }
            }
            Opcode::PrepareWriteReq => {
                need(buf, 4)?;
                Request::PrepareWrite {
                    handle: buf.get_u16_le(),
                    offset: buf.get_u16_le(),
                    value: Bytes::copy_from_slice(buf),
                }
            }
            Opcode::ExecuteWriteReq => {
                need(buf, 1)?;
                Request::ExecuteWrite {
                    commit: buf.get_u8() == 0x01,
                }
            }
            Opcode::HandleValueCfm => Request::Confirmation,
            _ => return Err(ErrorCode::RequestNotSupported),
        };

        Ok(request)
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(DEFAULT_MTU as usize);
        buf.put_u8(self.opcode() as u8);

        match self {
            Request::ExchangeMtu { mtu } => buf.put_u16_le(*mtu),
            Request::FindInformation { start, end } => {
                buf.put_u16_le(*start);
                buf.put_u16_le(*end);
            }
            Request::FindByTypeValue {
                start,
                end,
                attribute_type,
                value,
            } => {
                buf.put_u16_le(*start);
                buf.put_u16_le(*end);
                buf.put_u16_le(*attribute_type);
                buf.put_slice(value);
            }
            Request::ReadByType {
                start,
                end,
                attribute_type: uuid,
            }
            | Request::ReadByGroupType {
                start,
                end,
                group_type: uuid,
            } => {
                buf.put_u16_le(*start);
                buf.put_u16_le(*end);
                put_uuid(&mut buf, *uuid);
            }
            Request::Read { handle } => buf.put_u16_le(*handle),
            Request::ReadBlob { handle, offset } => {
                buf.put_u16_le(*handle);
                buf.put_u16_le(*offset);
            }
            Request::Write { handle, value } | Request::WriteCommand { handle, value } => {
                buf.put_u16_le(*handle);
                buf.put_slice(value);
            }
            Request::PrepareWrite {
                handle,
                offset,
                value,
            } => {
                buf.put_u16_le(*handle);
                buf.put_u16_le(*offset);
                buf.put_slice(value);
            }
            Request::ExecuteWrite { commit } => buf.put_u8(*commit as u8),
            Request::Confirmation => {}
        }

        buf.freeze()
    }
}

/// One entry of a Read By Type response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleValue {
    pub handle: u16,
    pub value: Bytes,
}

/// One entry of a Read By Group Type response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupValue {
    pub handle: u16,
    pub end_group: u16,
    pub value: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Error {
        request: u8,
        handle: u16,
        code: u8,
    },
    ExchangeMtu {
        mtu: u16,
    },
    FindInformation {
        entries: Vec<(u16, Uuid128)>,
    },
    FindByTypeValue {
        ranges: Vec<(u16, u16)>,
    },
    ReadByType {
        entries: Vec<HandleValue>,
    },
    Read {
        value: Bytes,
    },
    ReadBlob {
        value: Bytes,
    },
    ReadByGroupType {
        entries: Vec<GroupValue>,
    },
    Write,
    PrepareWrite {
        handle: u16,
        offset: u16,
        value: Bytes,
    },
    ExecuteWrite,
}

impl Response {
    pub fn error(request: u8, handle: u16, code: ErrorCode) -> Response {
        Response::Error {
            request,
            handle,
            code: code as u8,
        }
    }

    pub fn opcode(&self) -> Opcode {
        match self {
            Response::Error { .. } => Opcode::ErrorRsp,
            Response::ExchangeMtu { .. } => Opcode::ExchangeMtuRsp,
            Response::FindInformation { .. } => Opcode::FindInformationRsp,
            Response::FindByTypeValue { .. } => Opcode::FindByTypeValueRsp,
            Response::ReadByType { .. } => Opcode::ReadByTypeRsp,
            Response::Read { .. } => Opcode::ReadRsp,
            Response::ReadBlob { .. } => Opcode::ReadBlobRsp,
            Response::ReadByGroupType { .. } => Opcode::ReadByGroupTypeRsp,
            Response::Write => Opcode::WriteRsp,
            Response::PrepareWrite { .. } => Opcode::PrepareWriteRsp,
            Response::ExecuteWrite => Opcode::ExecuteWriteRsp,
        }
    }

    /// Turns an Error Response into an `Err`, leaving other responses alone.
    pub fn into_result(self) -> Result<Response, AttError> {
        match self {
            Response::Error {
                request,
                handle,
                code,
            } => match FromPrimitive::from_u8(code) {
                Some(code) => Err(AttError::Protocol {
                    request,
                    handle,
                    code,
                }),
                None => Err(AttError::UnknownErrorCode { code }),
            },
            other => Ok(other),
        }
    }

    pub fn parse(pdu: &[u8]) -> Result<Response, AttError> {
        let malformed = |opcode| AttError::Malformed {
            opcode: Some(opcode),
        };
        let (&raw, mut buf) = pdu
            .split_first()
            .ok_or(AttError::Malformed { opcode: None })?;
        let opcode: Opcode = FromPrimitive::from_u8(raw).ok_or(AttError::Malformed { opcode: None })?;

        let response = match opcode {
            Opcode::ErrorRsp => {
                if buf.len() < 4 {
                    return Err(malformed(opcode));
                }
                Response::Error {
                    request: buf.get_u8(),
                    handle: buf.get_u16_le(),
                    code: buf.get_u8(),
                }
            }
            Opcode::ExchangeMtuRsp => {
                if buf.len() < 2 {
                    return Err(malformed(opcode));
                }
                Response::ExchangeMtu {
                    mtu: buf.get_u16_le(),
                }
            }
            Opcode::FindInformationRsp => {
                if buf.is_empty() {
                    return Err(malformed(opcode));
                }
                let uuid_len = match buf.get_u8() {
                    0x01 => 2,
                    0x02 => 16,
                    _ => return Err(malformed(opcode)),
                };
                if buf.is_empty() || buf.len() % (2 + uuid_len) != 0 {
                    return Err(malformed(opcode));
                }
                let entries = buf
                    .chunks(2 + uuid_len)
                    .map(|mut chunk| {
                        let handle = chunk.get_u16_le();
                        get_uuid(chunk).map(|uuid| (handle, uuid))
                    })
                    .collect::<Option<Vec<_>>>()
                    .ok_or(malformed(opcode))?;
                Response::FindInformation { entries }
            }
            Opcode::FindByTypeValueRsp => {
                if buf.is_empty() || buf.len() % 4 != 0 {
                    return Err(malformed(opcode));
                }
                let ranges = buf
                    .chunks(4)
                    .map(|mut chunk| (chunk.get_u16_le(), chunk.get_u16_le()))
                    .collect();
                Response::FindByTypeValue { ranges }
            }
            Opcode::ReadByTypeRsp => {
                let len = buf.first().copied().unwrap_or(0) as usize;
                buf = buf.get(1..).unwrap_or_default();
                if len < 2 || buf.is_empty() || buf.len() % len != 0 {
                    return Err(malformed(opcode));
                }
                let entries = buf
                    .chunks(len)
                    .map(|mut chunk| HandleValue {
                        handle: chunk.get_u16_le(),
                        value: Bytes::copy_from_slice(chunk),
                    })
                    .collect();
                Response::ReadByType { entries }
            }
            Opcode::ReadRsp => Response::Read {
                value: Bytes::copy_from_slice(buf),
            },
            Opcode::ReadBlobRsp => Response::ReadBlob {
                value: Bytes::copy_from_slice(buf),
            },
            Opcode::ReadByGroupTypeRsp => {
                let len = buf.first().copied().unwrap_or(0) as usize;
                buf = buf.get(1..).unwrap_or_default();
                if len < 4 || buf.is_empty() || buf.len() % len != 0 {
                    return Err(malformed(opcode));
                }
                let entries = buf
                    .chunks(len)
                    .map(|mut chunk| GroupValue {
                        handle: chunk.get_u16_le(),
                        end_group: chunk.get_u16_le(),
                        value: Bytes::copy_from_slice(chunk),
                    })
                    .collect();
                Response::ReadByGroupType { entries }
            }
            Opcode::WriteRsp => Response::Write,
            Opcode::PrepareWriteRsp => {
                if buf.len() < 4 {
                    return Err(malformed(opcode));
                }
                Response::PrepareWrite {
                    handle: buf.get_u16_le(),
                    offset: buf.get_u16_le(),
                    value: Bytes::copy_from_slice(buf),
                }
            }
            Opcode::ExecuteWriteRsp => Response::ExecuteWrite,
            other => {
                return Err(AttError::UnexpectedResponse {
                    expected: Opcode::ErrorRsp,
                    got: other as u8,
                })
            }
        };

        Ok(response)
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(DEFAULT_MTU as usize);
        buf.put_u8(self.opcode() as u8);

        match self {
            Response::Error {
                request,
                handle,
                code,
            } => {
                buf.put_u8(*request);
                buf.put_u16_le(*handle);
                buf.put_u8(*code);
            }
            Response::ExchangeMtu { mtu } => buf.put_u16_le(*mtu),
            Response::FindInformation { entries } => {
                let wide = entries.iter().any(|(_, uuid)| uuid.as_uuid16().is_none());
                buf.put_u8(if wide { 0x02 } else { 0x01 });
                for (handle, uuid) in entries {
                    buf.put_u16_le(*handle);
                    if wide {
                        buf.put_slice(&uuid.to_le_bytes());
                    } else {
                        put_uuid(&mut buf, *uuid);
                    }
                }
            }
            Response::FindByTypeValue { ranges } => {
                for (start, end) in ranges {
                    buf.put_u16_le(*start);
                    buf.put_u16_le(*end);
                }
            }
            Response::ReadByType { entries } => {
                let len = entries.first().map_or(2, |e| 2 + e.value.len());
                buf.put_u8(len as u8);
                for entry in entries {
                    buf.put_u16_le(entry.handle);
                    buf.put_slice(&entry.value);
                }
            }
            Response::Read { value } | Response::ReadBlob { value } => buf.put_slice(value),
            Response::ReadByGroupType { entries } => {
                let len = entries.first().map_or(4, |e| 4 + e.value.len());
                buf.put_u8(len as u8);
                for entry in entries {
                    buf.put_u16_le(entry.handle);
                    buf.put_u16_le(entry.end_group);
                    buf.put_slice(&entry.value);
                }
            }
            Response::Write | Response::ExecuteWrite => {}
            Response::PrepareWrite {
                handle,
                offset,
                value,
            } => {
                buf.put_u16_le(*handle);
                buf.put_u16_le(*offset);
                buf.put_slice(value);
            }
        }

        buf.freeze()
    }
}
