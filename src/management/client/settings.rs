use super::*;
use crate::util::BufExt;

async fn set_setting(
    socket: &mut ManagementStream,
    controller: Controller,
    opcode: Command,
    enabled: bool,
) -> Result<ControllerSettings> {
    let param = Bytes::copy_from_slice(&[enabled as u8]);
    let mut reply = exec_command(socket, opcode, controller, Some(param))
        .await?
        .ok_or(Error::NoData)?;

    if reply.len() < 4 {
        return Err(Error::InvalidData);
    }
    Ok(reply.get_flags_u32_le())
}

/// Powers the controller on or off and returns the settings now in effect.
/// Advertising instances added while powered off start once it is on.
pub async fn set_powered(
    socket: &mut ManagementStream,
    controller: Controller,
    powered: bool,
) -> Result<ControllerSettings> {
    set_setting(socket, controller, Command::SetPowered, powered).await
}

/// Enables or disables Low Energy. Works while the controller is off.
pub async fn set_le(
    socket: &mut ManagementStream,
    controller: Controller,
    le: bool,
) -> Result<ControllerSettings> {
    set_setting(socket, controller, Command::SetLowEnergy, le).await
}
