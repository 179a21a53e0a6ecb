use bytes::Bytes;
use tracing::trace;

use crate::att::*;
use crate::communication::Uuid128;
use crate::gatt::{Bearer, Characteristic, ServiceRange};

fn mismatch(expected: Opcode, got: Response) -> AttError {
    AttError::UnexpectedResponse {
        expected,
        got: got.opcode() as u8,
    }
}

/// The client half of an ATT bearer. Requests are strictly sequential, as
/// the protocol requires.
pub struct AttClient<B> {
    bearer: B,
    mtu: u16,
}

impl<B: Bearer> AttClient<B> {
    pub fn new(bearer: B) -> Self {
        AttClient {
            bearer,
            mtu: DEFAULT_MTU,
        }
    }

    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    async fn request(&mut self, request: Request, expected: Opcode) -> Result<Response, AttError> {
        trace!(opcode = ?request.opcode(), "att request");
        self.bearer.send(&request.encode()).await?;

        loop {
            let pdu = self.bearer.recv().await?.ok_or(AttError::Closed)?;
            let raw = *pdu.first().ok_or(AttError::Malformed { opcode: None })?;

            if raw == Opcode::HandleValueNtf as u8 {
                continue;
            }
            if raw == Opcode::HandleValueInd as u8 {
                self.bearer.send(&Request::Confirmation.encode()).await?;
                continue;
            }

            let response = Response::parse(&pdu)?.into_result()?;
            if response.opcode() != expected {
                return Err(AttError::UnexpectedResponse { expected, got: raw });
            }
            return Ok(response);
        }
    }

    /// Negotiates the bearer MTU and returns the value now in effect.
    pub async fn exchange_mtu(&mut self, mtu: u16) -> Result<u16, AttError> {
        match self
            .request(Request::ExchangeMtu { mtu }, Opcode::ExchangeMtuRsp)
            .await?
        {
            Response::ExchangeMtu { mtu: server } => {
                self.mtu = mtu.min(server).max(DEFAULT_MTU);
                Ok(self.mtu)
            }
            other => Err(mismatch(Opcode::ExchangeMtuRsp, other)),
        }
    }

    /// Finds the first primary service with the given UUID.
    pub async fn discover_service(
        &mut self,
        uuid: Uuid128,
    ) -> Result<Option<ServiceRange>, AttError> {
        let value = match uuid.as_uuid16() {
            Some(short) => Bytes::copy_from_slice(&short.0.to_le_bytes()),
            None => Bytes::copy_from_slice(&uuid.to_le_bytes()),
        };

        let request = Request::FindByTypeValue {
            start: 0x0001,
            end: 0xFFFF,
            attribute_type: PRIMARY_SERVICE,
            value,
        };

        match self.request(request, Opcode::FindByTypeValueRsp).await {
            Ok(Response::FindByTypeValue { ranges }) => Ok(ranges
                .first()
                .map(|&(start, end)| ServiceRange { start, end })),
            Ok(other) => Err(mismatch(Opcode::FindByTypeValueRsp, other)),
            Err(err) if err.code() == Some(ErrorCode::AttributeNotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Walks the characteristic declarations of `service` looking for `uuid`.
    pub async fn discover_characteristic(
        &mut self,
        service: ServiceRange,
        uuid: Uuid128,
    ) -> Result<Option<Characteristic>, AttError> {
        let mut start = service.start;

        while start <= service.end {
            let request = Request::ReadByType {
                start,
                end: service.end,
                attribute_type: Uuid128::from(CHARACTERISTIC),
            };

            let entries = match self.request(request, Opcode::ReadByTypeRsp).await {
                Ok(Response::ReadByType { entries }) => entries,
                Ok(other) => return Err(mismatch(Opcode::ReadByTypeRsp, other)),
                Err(err) if err.code() == Some(ErrorCode::AttributeNotFound) => break,
                Err(err) => return Err(err),
            };

            let mut last = start;
            for entry in entries {
                last = last.max(entry.handle);

                // properties, value handle, characteristic uuid
                let value = &entry.value[..];
                if value.len() < 5 {
                    return Err(AttError::Malformed {
                        opcode: Some(Opcode::ReadByTypeRsp),
                    });
                }
                let declared = Uuid128::from_le_slice(&value[3..]).ok_or(AttError::Malformed {
                    opcode: Some(Opcode::ReadByTypeRsp),
                })?;

                if declared == uuid {
                    return Ok(Some(Characteristic {
                        declaration: entry.handle,
                        value_handle: u16::from_le_bytes([value[1], value[2]]),
                        properties: value[0],
                    }));
                }
            }

            if last >= service.end {
                break;
            }
            start = last + 1;
        }

        Ok(None)
    }

    /// Reads a characteristic value, following up with Read Blob requests
    /// while the value fills whole responses.
    pub async fn read(&mut self, handle: u16) -> Result<Bytes, AttError> {
        let chunk = self.mtu as usize - 1;

        let mut value = match self
            .request(Request::Read { handle }, Opcode::ReadRsp)
            .await?
        {
            Response::Read { value } => value.to_vec(),
            other => return Err(mismatch(Opcode::ReadRsp, other)),
        };

        let mut last = value.len();
        while last == chunk && value.len() < MAX_ATTRIBUTE_LEN {
            let request = Request::ReadBlob {
                handle,
                offset: value.len() as u16,
            };

            match self.request(request, Opcode::ReadBlobRsp).await {
                Ok(Response::ReadBlob { value: part }) => {
                    last = part.len();
                    value.extend_from_slice(&part);
                }
                Ok(other) => return Err(mismatch(Opcode::ReadBlobRsp, other)),
                Err(err)
                    if matches!(
                        err.code(),
                        Some(ErrorCode::AttributeNotLong) | Some(ErrorCode::InvalidOffset)
                    ) =>
                {
                    break
                }
                Err(err) => return Err(err),
            }
        }

        Ok(value.into())
    }

    /// Writes with a Write Request, or with queued writes when the value
    /// does not fit in one PDU.
    pub async fn write(&mut self, handle: u16, value: &[u8]) -> Result<(), AttError> {
        if value.len() <= self.mtu as usize - 3 {
            self.request(
                Request::Write {
                    handle,
                    value: Bytes::copy_from_slice(value),
                },
                Opcode::WriteRsp,
            )
            .await?;
            return Ok(());
        }

        let chunk = self.mtu as usize - 5;
        for (i, part) in value.chunks(chunk).enumerate() {
            let request = Request::PrepareWrite {
                handle,
                offset: (i * chunk) as u16,
                value: Bytes::copy_from_slice(part),
            };
            if let Err(err) = self.request(request, Opcode::PrepareWriteRsp).await {
                let _ = self
                    .request(
                        Request::ExecuteWrite { commit: false },
                        Opcode::ExecuteWriteRsp,
                    )
                    .await;
                return Err(err);
            }
        }

        self.request(
            Request::ExecuteWrite { commit: true },
            Opcode::ExecuteWriteRsp,
        )
        .await?;
        Ok(())
    }

    pub fn disconnect(self) -> Result<(), AttError> {
        Ok(self.bearer.close()?)
    }
}
