use std::fmt::{Display, Formatter};
use std::str::FromStr;

use bytes::Buf;

/// A Bluetooth device address. Bytes are stored in the little-endian order
/// the kernel uses (`bdaddr_t`), so the textual form prints them reversed.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct Address {
    bytes: [u8; 6],
}

impl Address {
    pub const fn new(bytes: [u8; 6]) -> Address {
        Address { bytes }
    }

    pub fn from_buf<B: Buf>(buf: &mut B) -> Address {
        let mut arr = [0u8; 6];
        buf.copy_to_slice(&mut arr[..]);
        Address::new(arr)
    }

    /// `00:00:00:00:00:00`, which the kernel reads as "any local adapter".
    pub const fn any() -> Address {
        Address { bytes: [0u8; 6] }
    }
}

impl From<[u8; 6]> for Address {
    fn from(bytes: [u8; 6]) -> Self {
        Address { bytes }
    }
}

impl From<Address> for [u8; 6] {
    fn from(val: Address) -> Self {
        val.bytes
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter) -> Result<(), std::fmt::Error> {
        let bytes = self.bytes;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            bytes[5], bytes[4], bytes[3], bytes[2], bytes[1], bytes[0]
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{:?} is not a bluetooth address of the form XX:XX:XX:XX:XX:XX", input)]
pub struct AddressParseError {
    input: String,
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || AddressParseError {
            input: s.to_owned(),
        };

        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');

        // textual order is most significant byte first
        for slot in bytes.iter_mut().rev() {
            let part = parts.next().ok_or_else(err)?;
            if part.len() != 2 {
                return Err(err());
            }
            *slot = u8::from_str_radix(part, 16).map_err(|_| err())?;
        }

        if parts.next().is_some() {
            return Err(err());
        }

        Ok(Address::new(bytes))
    }
}

/// The address type the kernel expects in `sockaddr_l2.l2_bdaddr_type` and in
/// management events.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, FromPrimitive)]
pub enum AddressType {
    BREDR = 0,
    LEPublic = 1,
    LERandom = 2,
}

impl AddressType {
    pub fn is_le(self) -> bool {
        !matches!(self, AddressType::BREDR)
    }
}
