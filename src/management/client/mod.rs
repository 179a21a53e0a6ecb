use bytes::*;
use tracing::trace;

pub use advertising::*;
pub use discovery::*;
pub use params::*;
pub use query::*;
pub use settings::*;

use crate::management::interface::*;
use crate::management::stream::ManagementStream;
use crate::management::{Error, Result};

mod advertising;
mod discovery;
mod params;
mod query;
mod settings;

/// What a response says about the command `opcode`, if anything. Events and
/// replies to other commands yield `None`.
fn reply_to(opcode: Command, event: Event) -> Option<Result<Option<Bytes>>> {
    let (status, param) = match event {
        Event::CommandComplete {
            opcode: replied,
            status,
            param,
        } if replied == opcode => (status, Some(param)),
        Event::CommandStatus {
            opcode: replied,
            status,
        } if replied == opcode => (status, None),
        _ => return None,
    };

    Some(match status {
        CommandStatus::Success => Ok(param),
        status => Err(Error::CommandError { opcode, status }),
    })
}

/// Sends one command and waits for its reply. Events arriving in the
/// meantime are discarded: a caller interested in events reads them from a
/// socket of its own.
async fn exec_command(
    socket: &mut ManagementStream,
    opcode: Command,
    controller: Controller,
    param: Option<Bytes>,
) -> Result<Option<Bytes>> {
    let param = param.unwrap_or_default();
    trace!(?opcode, %controller, len = param.len(), "management command");

    socket
        .send(Request {
            opcode,
            controller,
            param,
        })
        .await?;

    loop {
        let response = socket.receive().await?;
        match reply_to(opcode, response.event) {
            Some(reply) => return reply,
            None => trace!(%controller, "skipping unrelated management event"),
        }
    }
}

/// The leading byte of a reply, used by commands that echo a single value.
fn first_byte(param: Option<Bytes>) -> Result<u8> {
    let mut param = param.ok_or(Error::NoData)?;
    if param.is_empty() {
        return Err(Error::InvalidData);
    }
    Ok(param.get_u8())
}
