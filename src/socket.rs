//! Kernel socket definitions for `AF_BLUETOOTH` that `libc` does not carry.

use libc::{c_int, c_ushort};

use crate::Address;

#[repr(u16)]
#[allow(dead_code)]
#[derive(Debug, Copy, Clone)]
pub enum BtProto {
    L2CAP = 0,
    HCI = 1,
}

#[repr(u16)]
#[allow(dead_code)]
#[derive(Debug, Copy, Clone)]
pub enum HciChannel {
    Raw = 0,
    User = 1,
    Monitor = 2,
    Control = 3,
}

pub const HCI_DEV_NONE: c_ushort = 65535;

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct SockAddrHci {
    pub hci_family: c_ushort,
    pub hci_dev: c_ushort,
    pub hci_channel: HciChannel,
}

/// `struct sockaddr_l2`. PSM and CID are little-endian on the wire, which is
/// also host order on every platform BlueZ runs on; `to_le` keeps that honest.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct SockAddrL2 {
    pub l2_family: c_ushort,
    pub l2_psm: u16,
    pub l2_bdaddr: Address,
    pub l2_cid: u16,
    pub l2_bdaddr_type: u8,
}

impl SockAddrL2 {
    pub fn new(addr: Address, addr_type: u8, psm: u16, cid: u16) -> Self {
        SockAddrL2 {
            l2_family: libc::AF_BLUETOOTH as c_ushort,
            l2_psm: psm.to_le(),
            l2_bdaddr: addr,
            l2_cid: cid.to_le(),
            l2_bdaddr_type: addr_type,
        }
    }

    pub fn psm(&self) -> u16 {
        u16::from_le(self.l2_psm)
    }
}

pub const SOL_BLUETOOTH: c_int = 274;
pub const BT_SECURITY: c_int = 4;
pub const BT_RCVMTU: c_int = 13;

/// `struct bt_security`
#[repr(C)]
#[derive(Debug, Copy, Clone, Default)]
pub struct BtSecurity {
    pub level: u8,
    pub key_size: u8,
}

/// Fixed channel carrying the attribute protocol on LE links.
pub const ATT_CID: u16 = 4;
