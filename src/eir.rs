//! Extended inquiry response / advertising data: the length-type-value
//! records carried in advertising reports and scan responses.

use bytes::*;
use enumflags2::{bitflags, BitFlags};
use num_traits::FromPrimitive;

use crate::communication::{Uuid128, Uuid16, Uuid32};

/// Largest legacy advertising or scan response payload.
pub const MAX_ADV_DATA_LEN: usize = 31;

#[bitflags]
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum EIRFlags {
    LELimitedDiscoverableMode = 1 << 0,
    LEGeneralDiscoverableMode = 1 << 1,
    BREDRNotSupported = 1 << 2,
    ControllerSimultaneousLEBREDR = 1 << 3,
    HostSimultaneousLEBREDR = 1 << 4,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EIRName {
    pub name: String,
    pub complete: bool,
}

impl EIRName {
    fn short_name(name: String) -> Self {
        EIRName {
            name,
            complete: false,
        }
    }
    fn complete_name(name: String) -> Self {
        EIRName {
            name,
            complete: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ManufacturerSpecificData {
    pub company_identifier_code: u16,
    pub data: Bytes,
}

#[derive(Debug, Default, Clone)]
pub struct EIR {
    pub flags: Option<BitFlags<EIRFlags>>,
    pub uuid16: Vec<u16>,
    pub uuid32: Vec<u32>,
    pub uuid128: Vec<u128>,
    pub name: Option<EIRName>,
    pub tx_power_level: Vec<i8>,
    pub uri: Vec<String>,
    pub manufacturer_specific_data: Vec<ManufacturerSpecificData>,
}

impl EIR {
    /// Every advertised service UUID, widened to 128 bits.
    pub fn services(&self) -> Vec<Uuid128> {
        let mut services: Vec<Uuid128> = Vec::new();
        services.extend(self.uuid16.iter().map(|&u| Uuid128::from(Uuid16(u))));
        services.extend(self.uuid32.iter().map(|&u| Uuid128::from(Uuid32(u))));
        services.extend(self.uuid128.iter().map(|&u| Uuid128(u)));
        services
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EIRError {
    #[error("More than one flag block found.")]
    RepeatedFlag,
    #[error("More than one name block found.")]
    RepeatedName,
    #[error("Unexpected data length {}.", len)]
    UnexpectedDataLength { len: usize },
    #[error("Record claims {} bytes but only {} remain.", len, remaining)]
    Truncated { len: usize, remaining: usize },
    #[error("UTF-8 encoding error in URI.")]
    InvalidURI,
}

#[repr(u8)]
#[derive(FromPrimitive)]
enum EIRDataTypes {
    Flags = 0x01,
    UUID16Incomplete = 0x02,
    UUID16Complete = 0x03,
    UUID32Incomplete = 0x04,
    UUID32Complete = 0x05,
    UUID128Incomplete = 0x06,
    UUID128Complete = 0x07,
    NameShort = 0x08,
    NameComplete = 0x09,
    TxPowerLevel = 0x0A,
    URI = 0x24,
    ManufacturerSpecificData = 0xFF,
}

/// Splits `data` into fixed-width UUIDs.
fn uuid_list<T>(mut data: Bytes, width: usize, get: fn(&mut Bytes) -> T) -> Result<Vec<T>, EIRError> {
    if data.len() % width != 0 {
        return Err(EIRError::UnexpectedDataLength { len: data.len() });
    }
    let mut uuids = Vec::with_capacity(data.len() / width);
    while data.has_remaining() {
        uuids.push(get(&mut data));
    }
    Ok(uuids)
}

fn set_name(eir: &mut EIR, data: &[u8], complete: bool) -> Result<(), EIRError> {
    if eir.name.is_some() {
        return Err(EIRError::RepeatedName);
    }
    let name = String::from_utf8_lossy(data).into_owned();
    eir.name = Some(if complete {
        EIRName::complete_name(name)
    } else {
        EIRName::short_name(name)
    });
    Ok(())
}

/// Parses a sequence of length-type-value records. A zero length ends the
/// data early, as controllers pad reports with zeros. Unknown record types
/// are skipped.
pub fn parse_eir<T: Buf>(mut buf: T) -> Result<EIR, EIRError> {
    let mut eir = EIR::default();

    while buf.has_remaining() {
        let len = buf.get_u8() as usize;
        if len == 0 {
            break;
        }
        if len > buf.remaining() {
            return Err(EIRError::Truncated {
                len,
                remaining: buf.remaining(),
            });
        }

        let data_type = buf.get_u8();
        let mut data = buf.copy_to_bytes(len - 1);

        match FromPrimitive::from_u8(data_type) {
            Some(EIRDataTypes::Flags) => {
                if eir.flags.is_some() {
                    return Err(EIRError::RepeatedFlag);
                }
                let flags = *data.first().ok_or(EIRError::UnexpectedDataLength { len: 0 })?;
                eir.flags = Some(BitFlags::from_bits_truncate(flags));
            }
            Some(EIRDataTypes::UUID16Incomplete | EIRDataTypes::UUID16Complete) => {
                eir.uuid16.extend(uuid_list(data, 2, |d| d.get_u16_le())?);
            }
            Some(EIRDataTypes::UUID32Incomplete | EIRDataTypes::UUID32Complete) => {
                eir.uuid32.extend(uuid_list(data, 4, |d| d.get_u32_le())?);
            }
            Some(EIRDataTypes::UUID128Incomplete | EIRDataTypes::UUID128Complete) => {
                eir.uuid128.extend(uuid_list(data, 16, |d| d.get_u128_le())?);
            }
            Some(EIRDataTypes::NameShort) => set_name(&mut eir, &data, false)?,
            Some(EIRDataTypes::NameComplete) => set_name(&mut eir, &data, true)?,
            Some(EIRDataTypes::TxPowerLevel) => {
                if data.has_remaining() {
                    eir.tx_power_level.push(data.get_i8());
                }
            }
            // only the "no scheme prefix" encoding is understood
            Some(EIRDataTypes::URI) if data.first() == Some(&0x01) => {
                let uri = std::str::from_utf8(&data[1..]).map_err(|_| EIRError::InvalidURI)?;
                eir.uri.push(uri.to_owned());
            }
            Some(EIRDataTypes::ManufacturerSpecificData) => {
                if data.len() < 2 {
                    return Err(EIRError::UnexpectedDataLength { len: data.len() });
                }
                let company_identifier_code = data.get_u16_le();
                eir.manufacturer_specific_data.push(ManufacturerSpecificData {
                    company_identifier_code,
                    data,
                });
            }
            _ => {}
        }
    }

    Ok(eir)
}

/// Advertising data announcing a single 128-bit service. The Flags record is
/// left out: the kernel adds it when the instance is discoverable.
pub fn advertising_data(service: Uuid128) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(18);
    buf.put_u8(17);
    buf.put_u8(EIRDataTypes::UUID128Complete as u8);
    buf.put_slice(&service.to_le_bytes());
    buf.to_vec()
}

/// Scan response carrying the local name. Names that do not fit are cut at a
/// character boundary and sent as a shortened name.
pub fn scan_response(name: &str) -> Vec<u8> {
    let room = MAX_ADV_DATA_LEN - 2;
    let (data_type, name) = if name.len() <= room {
        (EIRDataTypes::NameComplete, name)
    } else {
        let mut end = room;
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        (EIRDataTypes::NameShort, &name[..end])
    };

    let mut buf = BytesMut::with_capacity(2 + name.len());
    buf.put_u8(name.len() as u8 + 1);
    buf.put_u8(data_type as u8);
    buf.put_slice(name.as_bytes());
    buf.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn eir_name_test() {
        let eir = parse_eir(&b"\x04\x09ABC"[..]).unwrap();
        assert_eq!(
            eir.name,
            Some(EIRName {
                name: "ABC".to_owned(),
                complete: true
            })
        );
        assert!(eir.flags.is_none());
        assert!(eir.services().is_empty());
        assert!(eir.manufacturer_specific_data.is_empty());
    }

    #[test]
    pub fn eir_bad_uuid_length_test() {
        let input = Bytes::copy_from_slice(b"\x04\x03\xAB\xAC\x01");
        assert_eq!(
            parse_eir(input).unwrap_err(),
            EIRError::UnexpectedDataLength { len: 3 }
        );
    }

    #[test]
    pub fn eir_uri_test() {
        let input = Bytes::copy_from_slice(b"\x06\x24\x01a.io\x03\x24\x16x");
        let eir = parse_eir(input).unwrap();
        assert_eq!(eir.uri, vec!["a.io".to_string()]);
    }

    #[test]
    pub fn eir_multiple_test() {
        let input = Bytes::copy_from_slice(b"\x02\x01\x06\x03\x03\xAB\xAC\x03\x08Hi");
        let eir = parse_eir(input).unwrap();
        assert_eq!(
            eir.flags,
            Some(EIRFlags::BREDRNotSupported | EIRFlags::LEGeneralDiscoverableMode)
        );
        assert_eq!(eir.uuid16, vec![0xACAB]);
        assert_eq!(
            eir.name.as_ref().map(|name| (name.name.as_str(), name.complete)),
            Some(("Hi", false))
        );
        assert_eq!(eir.services(), vec![Uuid128::from(0xACABu16)]);
    }

    #[test]
    pub fn eir_truncated_test() {
        let input = Bytes::copy_from_slice(b"\x05\x09AB");
        assert_eq!(
            parse_eir(input).unwrap_err(),
            EIRError::Truncated {
                len: 5,
                remaining: 3
            }
        );
    }

    #[test]
    pub fn eir_zero_padding_test() {
        let input = Bytes::copy_from_slice(b"\x02\x0A\xF4\x00\x00\x00");
        let eir = parse_eir(input).unwrap();
        assert_eq!(eir.tx_power_level, vec![-12]);
    }

    #[test]
    pub fn advertising_data_round_trip_test() {
        let service: Uuid128 = "79cf4eca-116a-4ded-8426-fb83e53bc1d7".parse().unwrap();
        let data = advertising_data(service);
        assert_eq!(data.len(), 18);

        let eir = parse_eir(&data[..]).unwrap();
        assert_eq!(eir.services(), vec![service]);
    }

    #[test]
    pub fn scan_response_shortens_long_names_test() {
        let data = scan_response("blesocks forwarder");
        assert_eq!(data[1], 0x09);
        assert_eq!(&data[2..], b"blesocks forwarder");

        let long = "é".repeat(20);
        let data = scan_response(&long);
        assert!(data.len() <= MAX_ADV_DATA_LEN);
        assert_eq!(data[1], 0x08);
        let eir = parse_eir(&data[..]).unwrap();
        let name = eir.name.unwrap();
        assert!(!name.complete);
        assert_eq!(name.name, "é".repeat(14));
    }
}
