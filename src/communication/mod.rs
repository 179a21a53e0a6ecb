//! Identifiers and sockets for talking to remote Bluetooth devices.

use std::fmt::{Debug, Display};
use std::str::FromStr;

use serde::de::{self, Deserialize, Deserializer};

pub mod stream;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Uuid16(pub u16);

impl From<u16> for Uuid16 {
    fn from(u: u16) -> Self {
        Self(u)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Uuid32(pub u32);

impl From<u32> for Uuid32 {
    fn from(u: u32) -> Self {
        Self(u)
    }
}

/// A full 128-bit UUID. Service and characteristic identifiers are always
/// compared in this form, whatever width they were transmitted with.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Uuid128(pub u128);

impl From<u16> for Uuid128 {
    fn from(u: u16) -> Self {
        Self::from(Uuid16::from(u))
    }
}

impl From<u32> for Uuid128 {
    fn from(u: u32) -> Self {
        Self::from(Uuid32::from(u))
    }
}

impl From<u128> for Uuid128 {
    fn from(u: u128) -> Self {
        Self(u)
    }
}

pub const BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805F9B34FB;
const BASE_UUID_MASK: u128 = (1 << 96) - 1;

impl From<Uuid16> for Uuid32 {
    fn from(u: Uuid16) -> Self {
        Self(u.0 as u32)
    }
}

impl From<Uuid16> for Uuid128 {
    fn from(u: Uuid16) -> Self {
        Self(((u.0 as u128) << 96) | BASE_UUID)
    }
}

impl From<Uuid32> for Uuid128 {
    fn from(u: Uuid32) -> Self {
        Self(((u.0 as u128) << 96) | BASE_UUID)
    }
}

impl Uuid128 {
    pub const fn from_u128(u: u128) -> Self {
        Self(u)
    }

    /// The 16-bit alias of this UUID, if it lies in the Bluetooth base range.
    pub fn as_uuid16(&self) -> Option<Uuid16> {
        if self.0 & BASE_UUID_MASK == BASE_UUID && self.0 >> 112 == 0 {
            Some(Uuid16((self.0 >> 96) as u16))
        } else {
            None
        }
    }

    /// Decodes a little-endian UUID as it appears in ATT PDUs, where it is
    /// either 2 or 16 bytes wide.
    pub fn from_le_slice(bytes: &[u8]) -> Option<Self> {
        match bytes.len() {
            2 => Some(Self::from(u16::from_le_bytes([bytes[0], bytes[1]]))),
            16 => {
                let mut arr = [0u8; 16];
                arr.copy_from_slice(bytes);
                Some(Self(u128::from_le_bytes(arr)))
            }
            _ => None,
        }
    }

    pub fn to_le_bytes(&self) -> [u8; 16] {
        self.0.to_le_bytes()
    }
}

impl Debug for Uuid16 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04x}", self.0)
    }
}

impl Debug for Uuid32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bytes = u32::to_le_bytes(self.0);
        write!(
            f,
            "{:02x}{:02x}-{:02x}{:02x}",
            bytes[3], bytes[2], bytes[1], bytes[0]
        )
    }
}

impl Display for Uuid128 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bytes = u128::to_le_bytes(self.0);
        write!(
            f,
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            bytes[15], bytes[14], bytes[13], bytes[12], bytes[11], bytes[10], bytes[9], bytes[8],
            bytes[7], bytes[6], bytes[5], bytes[4], bytes[3], bytes[2], bytes[1], bytes[0]
        )
    }
}

impl Debug for Uuid128 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{:?} is not a UUID of the form xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx", input)]
pub struct UuidParseError {
    input: String,
}

impl FromStr for Uuid128 {
    type Err = UuidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || UuidParseError {
            input: s.to_owned(),
        };

        let groups: Vec<&str> = s.split('-').collect();
        let widths = [8, 4, 4, 4, 12];
        if groups.len() != widths.len()
            || groups.iter().zip(widths).any(|(g, w)| g.len() != w)
        {
            return Err(err());
        }

        let hex: String = groups.concat();
        if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(err());
        }

        u128::from_str_radix(&hex, 16).map(Uuid128).map_err(|_| err())
    }
}

impl<'de> Deserialize<'de> for Uuid128 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn uuid_text_form() {
        let uuid: Uuid128 = "79cf4eca-116a-4ded-8426-fb83e53bc1d7".parse().unwrap();
        assert_eq!(uuid.0, 0x79cf4eca_116a_4ded_8426_fb83e53bc1d7);
        assert_eq!(uuid.to_string(), "79cf4eca-116a-4ded-8426-fb83e53bc1d7");
    }

    #[test]
    pub fn uuid_rejects_malformed_text() {
        assert!("79cf4eca116a4ded8426fb83e53bc1d7".parse::<Uuid128>().is_err());
        assert!("79cf4eca-116a-4ded-8426-fb83e53bc1d".parse::<Uuid128>().is_err());
        assert!("79cf4eca-116a-4ded-8426-fb83e53bc1dz".parse::<Uuid128>().is_err());
        assert!("+9cf4eca-116a-4ded-8426-fb83e53bc1d7".parse::<Uuid128>().is_err());
    }

    #[test]
    pub fn uuid16_expands_into_base_range() {
        let uuid = Uuid128::from(0x2800u16);
        assert_eq!(uuid.to_string(), "00002800-0000-1000-8000-00805f9b34fb");
        assert_eq!(uuid.as_uuid16(), Some(Uuid16(0x2800)));

        let custom = Uuid128::from_u128(0x918ce61c_199f_419e_b6d5_59883a0049d8);
        assert_eq!(custom.as_uuid16(), None);
    }

    #[test]
    pub fn uuid_from_att_slices() {
        assert_eq!(
            Uuid128::from_le_slice(&[0x03, 0x28]),
            Some(Uuid128::from(0x2803u16))
        );

        let custom = Uuid128::from_u128(0xab76ead2_b6e6_4f12_a053_61cd0eed19f9);
        assert_eq!(Uuid128::from_le_slice(&custom.to_le_bytes()), Some(custom));
        assert_eq!(Uuid128::from_le_slice(&[1, 2, 3]), None);
    }
}
