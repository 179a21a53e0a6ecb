use enumflags2::bitflags;

/// Transports a discovery covers.
#[repr(u8)]
#[bitflags]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AddressTypeFlag {
    BREDR = 1 << 0,
    LEPublic = 1 << 1,
    LERandom = 1 << 2,
}

/// Flags on a Device Found report.
#[repr(u32)]
#[bitflags]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DeviceFlag {
    ConfirmName = 1 << 0,
    LegacyPairing = 1 << 1,
    NotConnectable = 1 << 2,
    InitiatedConnection = 1 << 3,
    NameRequestFailed = 1 << 4,
    ScanResponse = 1 << 5,
}
