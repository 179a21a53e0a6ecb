use std::fmt::{Display, Formatter};

use enumflags2::{bitflags, BitFlags};

use crate::Address;

/// A controller index, as in `hci0`.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash)]
pub struct Controller(pub u16);

impl Display for Controller {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "hci{}", self.0)
    }
}

impl From<Controller> for u16 {
    fn from(val: Controller) -> Self {
        val.0
    }
}

#[derive(Debug)]
pub struct ControllerInfo {
    pub address: Address,
    pub bluetooth_version: u8,
    pub manufacturer: u16,
    pub supported_settings: ControllerSettings,
    pub current_settings: ControllerSettings,
    pub name: String,
}

impl ControllerInfo {
    /// Whether the controller is powered with LE enabled.
    pub fn le_ready(&self) -> bool {
        self.current_settings
            .contains(ControllerSetting::Powered | ControllerSetting::LE)
    }
}

#[bitflags]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum ControllerSetting {
    Powered = 1 << 0,
    Connectable = 1 << 1,
    FastConnectable = 1 << 2,
    Discoverable = 1 << 3,
    Bondable = 1 << 4,
    LinkLevelSecurity = 1 << 5,
    SecureSimplePairing = 1 << 6,
    BREDR = 1 << 7,
    HighSpeed = 1 << 8,
    LE = 1 << 9,
    Advertising = 1 << 10,
    SecureConnections = 1 << 11,
    DebugKeys = 1 << 12,
    Privacy = 1 << 13,
    Configuration = 1 << 14,
    StaticAddress = 1 << 15,
    PhyConfiguration = 1 << 16,
    WidebandSpeech = 1 << 17,
}

pub type ControllerSettings = BitFlags<ControllerSetting>;
