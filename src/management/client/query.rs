use super::*;
use crate::util::BufExt;

/// address, version, manufacturer, supported and current settings, class of
/// device, then the 249 byte name and 11 byte short name
const CONTROLLER_INFO_LEN: usize = 6 + 1 + 2 + 4 + 4 + 3 + 249 + 11;

/// Reads the controller's address, settings and name. Needs no privileges.
pub async fn get_controller_info(
    socket: &mut ManagementStream,
    controller: Controller,
) -> Result<ControllerInfo> {
    let mut reply = exec_command(socket, Command::ReadControllerInfo, controller, None)
        .await?
        .ok_or(Error::NoData)?;

    if reply.len() < CONTROLLER_INFO_LEN {
        return Err(Error::InvalidData);
    }

    let address = reply.get_address();
    let bluetooth_version = reply.get_u8();
    let manufacturer = reply.get_u16_le();
    let supported_settings = reply.get_flags_u32_le();
    let current_settings = reply.get_flags_u32_le();
    reply.advance(3);

    Ok(ControllerInfo {
        address,
        bluetooth_version,
        manufacturer,
        supported_settings,
        current_settings,
        name: reply.split_to(249).get_c_string(),
    })
}
