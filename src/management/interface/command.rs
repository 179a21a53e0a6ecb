/// Management API opcodes, as numbered in `doc/mgmt-api.txt`. Only the
/// commands this crate issues are listed; the numbering has gaps.
#[repr(u16)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, FromPrimitive, ToPrimitive)]
pub enum Command {
    ReadVersionInfo = 0x0001,
    ReadControllerIndexList = 0x0003,
    ReadControllerInfo = 0x0004,
    SetPowered = 0x0005,
    SetConnectable = 0x0007,
    SetLowEnergy = 0x000D,
    SetLocalName = 0x000F,
    Disconnect = 0x0014,
    StartDiscovery = 0x0023,
    StopDiscovery = 0x0024,
    SetAdvertising = 0x0029,
    AddAdvertising = 0x003E,
    RemoveAdvertising = 0x003F,
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, FromPrimitive, ToPrimitive)]
pub enum CommandStatus {
    Success = 0x00,
    UnknownCommand = 0x01,
    NotConnected = 0x02,
    Failed = 0x03,
    ConnectFailed = 0x04,
    AuthenticationFailed = 0x05,
    NotPaired = 0x06,
    NoResources = 0x07,
    Timeout = 0x08,
    AlreadyConnected = 0x09,
    Busy = 0x0A,
    Rejected = 0x0B,
    NotSupported = 0x0C,
    InvalidParams = 0x0D,
    Disconnected = 0x0E,
    NotPowered = 0x0F,
    Cancelled = 0x10,
    InvalidIndex = 0x11,
    RFKilled = 0x12,
    AlreadyPaired = 0x13,
    PermissionDenied = 0x14,
}
