use bytes::Bytes;
use enumflags2::BitFlags;

use crate::address::AddressType;
use crate::management::client::{AddressTypeFlag, DeviceFlag};
use crate::management::interface::controller::ControllerSettings;
use crate::management::interface::{Command, CommandStatus};
use crate::Address;

#[derive(Debug)]
pub enum Event {
    /// Final reply to a command, carrying its return parameters.
    CommandComplete {
        opcode: Command,
        status: CommandStatus,
        param: Bytes,
    },

    /// Early reply to a command. Anything but success also ends it.
    CommandStatus {
        opcode: Command,
        status: CommandStatus,
    },

    NewSettings { settings: ControllerSettings },

    /// One advertising report. The kernel usually folds a scan response into
    /// the report of the advertisement it answers; a response heard on its
    /// own is reported separately, so reports for one address are merged.
    DeviceFound {
        address: Address,
        address_type: AddressType,
        rssi: i8,
        flags: BitFlags<DeviceFlag>,
        eir_data: Bytes,
    },

    /// Discovery started or stopped. The kernel stops discovery on its own
    /// after a while, so `discovering: false` can arrive unprompted.
    Discovering {
        address_type: BitFlags<AddressTypeFlag>,
        discovering: bool,
    },

    /// Only sent to sockets other than the one that added the instance.
    AdvertisingAdded { instance: u8 },

    AdvertisingRemoved { instance: u8 },

    /// Anything not decoded above, including replies to commands with
    /// opcodes this crate does not know.
    Other { evt_code: u16, param: Bytes },
}
