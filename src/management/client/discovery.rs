use enumflags2::BitFlags;

use super::*;

async fn discovery_command(
    socket: &mut ManagementStream,
    controller: Controller,
    opcode: Command,
    address_types: BitFlags<AddressTypeFlag>,
) -> Result<BitFlags<AddressTypeFlag>> {
    let param = Bytes::copy_from_slice(&[address_types.bits()]);
    let reply = exec_command(socket, opcode, controller, Some(param)).await?;
    Ok(BitFlags::from_bits_truncate(first_byte(reply)?))
}

/// Starts discovery over the given address types. Each report arrives as a
/// Device Found event on every management socket. The controller must be
/// powered, and the kernel rejects the command with `Busy` while another
/// discovery session is running.
pub async fn start_discovery(
    socket: &mut ManagementStream,
    controller: Controller,
    address_types: BitFlags<AddressTypeFlag>,
) -> Result<BitFlags<AddressTypeFlag>> {
    discovery_command(socket, controller, Command::StartDiscovery, address_types).await
}

/// Stops a discovery started with [`start_discovery`]. `address_types` must
/// match the ones discovery was started with.
pub async fn stop_discovery(
    socket: &mut ManagementStream,
    controller: Controller,
    address_types: BitFlags<AddressTypeFlag>,
) -> Result<BitFlags<AddressTypeFlag>> {
    discovery_command(socket, controller, Command::StopDiscovery, address_types).await
}
