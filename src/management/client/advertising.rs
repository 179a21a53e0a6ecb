use enumflags2::{bitflags, BitFlags};

use super::*;

/// One advertising instance. `adv_data` and `scan_rsp` are raw EIR, see
/// [`crate::eir`].
#[derive(Debug, Clone)]
pub struct AdvertisingParams {
    /// Between 1 and the number of instances the controller supports.
    pub instance: u8,
    pub flags: BitFlags<AdvertisingFlags>,
    /// Seconds per rotation when several instances exist. 0 means the
    /// kernel default.
    pub duration: u16,
    /// Lifetime in seconds. 0 keeps the instance until it is removed.
    pub timeout: u16,
    pub adv_data: Vec<u8>,
    pub scan_rsp: Vec<u8>,
}

impl AdvertisingParams {
    fn encode(&self) -> Result<Bytes> {
        let adv_len = u8::try_from(self.adv_data.len()).map_err(|_| Error::InvalidData)?;
        let rsp_len = u8::try_from(self.scan_rsp.len()).map_err(|_| Error::InvalidData)?;

        let mut param = BytesMut::with_capacity(11 + adv_len as usize + rsp_len as usize);
        param.put_u8(self.instance);
        param.put_u32_le(self.flags.bits());
        param.put_u16_le(self.duration);
        param.put_u16_le(self.timeout);
        param.put_u8(adv_len);
        param.put_u8(rsp_len);
        param.put_slice(&self.adv_data);
        param.put_slice(&self.scan_rsp);
        Ok(param.freeze())
    }
}

#[repr(u32)]
#[bitflags]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AdvertisingFlags {
    /// Connectable advertising, whatever the global connectable setting.
    EnterConnectable = 1 << 0,
    /// General discoverable. The kernel prepends the Flags field, which
    /// costs 3 of the 31 advertising bytes.
    AdvertiseDiscoverable = 1 << 1,
    AdvertiseLimitedDiscoverable = 1 << 2,
    AutoUpdateFlags = 1 << 3,
    AutoUpdateTxPower = 1 << 4,
    AutoUpdateAppearance = 1 << 5,
    AutoUpdateLocalName = 1 << 6,
}

/// Adds or replaces an advertising instance and returns its number. LE must
/// be enabled first or the kernel answers `Rejected`.
pub async fn add_advertising(
    socket: &mut ManagementStream,
    controller: Controller,
    params: AdvertisingParams,
) -> Result<u8> {
    let param = params.encode()?;
    let reply = exec_command(socket, Command::AddAdvertising, controller, Some(param)).await?;
    first_byte(reply)
}

/// Removes an advertising instance, cutting it short if it is on air.
/// Instance 0 removes all of them.
pub async fn remove_advertising(
    socket: &mut ManagementStream,
    controller: Controller,
    instance: u8,
) -> Result<u8> {
    let param = Bytes::copy_from_slice(&[instance]);
    let reply = exec_command(socket, Command::RemoveAdvertising, controller, Some(param)).await?;
    first_byte(reply)
}
