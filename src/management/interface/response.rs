use bytes::*;
use enumflags2::BitFlags;
use num_traits::FromPrimitive;

use crate::management::interface::controller::Controller;
use crate::management::interface::event::Event;
use crate::management::Error;
use crate::util::BufExt;

/// A response from the BlueZ management API. This can be a response to a
/// command that was issued, or an event that was sent in response to an outside
/// stimulus.
#[derive(Debug)]
pub struct Response {
    pub event: Event,
    pub controller: Controller,
}

fn need<T: Buf>(buf: &T, len: usize) -> Result<(), Error> {
    if buf.remaining() < len {
        Err(Error::InvalidData)
    } else {
        Ok(())
    }
}

impl Response {
    pub fn parse<T: Buf>(mut buf: T) -> Result<Self, Error> {
        need(&buf, 6)?;
        let evt_code = buf.get_u16_le();
        let controller = Controller(buf.get_u16_le());
        buf.advance(2); // we already know param length

        let event = match evt_code {
            0x0001 | 0x0002 => {
                need(&buf, 3)?;
                let raw_opcode = buf.get_u16_le();
                let status = buf.get_u8();
                let status =
                    FromPrimitive::from_u8(status).ok_or(Error::UnknownStatus { status })?;

                match FromPrimitive::from_u16(raw_opcode) {
                    Some(opcode) if evt_code == 0x0001 => Event::CommandComplete {
                        opcode,
                        status,
                        param: buf.copy_to_bytes(buf.remaining()),
                    },
                    Some(opcode) => Event::CommandStatus { opcode, status },
                    // replies to commands some other user of this socket sent
                    None => Event::Other {
                        evt_code,
                        param: buf.copy_to_bytes(buf.remaining()),
                    },
                }
            }
            0x0006 => {
                need(&buf, 4)?;
                Event::NewSettings {
                    settings: BitFlags::from_bits_truncate(buf.get_u32_le()),
                }
            }
            0x0012 => {
                need(&buf, 14)?;
                Event::DeviceFound {
                    address: buf.get_address(),
                    address_type: buf.get_primitive_u8().ok_or(Error::InvalidData)?,
                    rssi: buf.get_i8(),
                    flags: buf.get_flags_u32_le(),
                    eir_data: {
                        let len = buf.get_u16_le() as usize;
                        need(&buf, len)?;
                        buf.copy_to_bytes(len)
                    },
                }
            }
            0x0013 => {
                need(&buf, 2)?;
                Event::Discovering {
                    address_type: buf.get_flags_u8(),
                    discovering: buf.get_bool(),
                }
            }
            0x0023 => {
                need(&buf, 1)?;
                Event::AdvertisingAdded {
                    instance: buf.get_u8(),
                }
            }
            0x0024 => {
                need(&buf, 1)?;
                Event::AdvertisingRemoved {
                    instance: buf.get_u8(),
                }
            }
            _ => Event::Other {
                evt_code,
                param: buf.copy_to_bytes(buf.remaining()),
            },
        };

        Ok(Response { controller, event })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::AddressType;
    use crate::management::interface::{Command, CommandStatus};

    #[test]
    pub fn command_complete_test() {
        let raw: &[u8] = &[
            0x01, 0x00, 0x00, 0x00, 0x07, 0x00, 0x05, 0x00, 0x00, 0x01, 0x02, 0x00, 0x00,
        ];
        let response = Response::parse(raw).unwrap();

        assert_eq!(response.controller, Controller(0));
        match response.event {
            Event::CommandComplete {
                opcode,
                status,
                param,
            } => {
                assert_eq!(opcode, Command::SetPowered);
                assert_eq!(status, CommandStatus::Success);
                assert_eq!(&param[..], &[0x01, 0x02, 0x00, 0x00]);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    pub fn device_found_test() {
        let mut raw = vec![0x12, 0x00, 0x01, 0x00, 17, 0x00];
        raw.extend_from_slice(&[0x66, 0x55, 0x44, 0x33, 0x22, 0x11]);
        raw.push(0x02); // LE random
        raw.push(0xC4); // -60 dBm
        raw.extend_from_slice(&[0, 0, 0, 0]);
        raw.extend_from_slice(&[3, 0]);
        raw.extend_from_slice(&[0x02, 0x09, b'a']);

        let response = Response::parse(&raw[..]).unwrap();
        assert_eq!(response.controller, Controller(1));
        match response.event {
            Event::DeviceFound {
                address,
                address_type,
                rssi,
                eir_data,
                ..
            } => {
                assert_eq!(address.to_string(), "11:22:33:44:55:66");
                assert_eq!(address_type, AddressType::LERandom);
                assert_eq!(rssi, -60);
                assert_eq!(&eir_data[..], &[0x02, 0x09, b'a']);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    pub fn truncated_event_test() {
        let raw: &[u8] = &[0x12, 0x00, 0x00, 0x00, 0x02, 0x00, 0x01, 0x02];
        assert!(matches!(Response::parse(raw), Err(Error::InvalidData)));
    }

    #[test]
    pub fn unknown_event_test() {
        let raw: &[u8] = &[0x25, 0x00, 0x00, 0x00, 0x01, 0x00, 0xAA];
        match Response::parse(raw).unwrap().event {
            Event::Other { evt_code, param } => {
                assert_eq!(evt_code, 0x25);
                assert_eq!(&param[..], &[0xAA]);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
