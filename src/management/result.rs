use crate::management::interface::{Command, CommandStatus};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("The kernel replied without the expected parameters.")]
    NoData,
    #[error("Management socket error: {}.", source)]
    IO {
        #[from]
        source: std::io::Error,
    },
    #[error("{:?} failed with status {:?}.", opcode, status)]
    CommandError {
        opcode: Command,
        status: CommandStatus,
    },
    #[error("Unknown command status {:#04x}.", status)]
    UnknownStatus { status: u8 },
    #[error("Malformed management message.")]
    InvalidData,
}
