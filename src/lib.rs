//! # Overview
//!
//! `blesocks` opens a reliable byte stream between two Linux machines over
//! Bluetooth Low Energy. GATT is only used to negotiate: the peripheral
//! publishes the PSM of an L2CAP connection-oriented channel in a
//! characteristic, the central reads it, drops the GATT link and opens the
//! channel. The result is exposed as a tokio stream through [`BleConn`].
//!
//! # Roles
//!
//! - [`Connector`] plays the central role and owns the resulting [`Session`].
//! - [`Advertiser`] plays the peripheral role and receives a device name
//!   written into a characteristic by a remote party.
//! - [`ChannelPublisher`] plays the peripheral role on the other end of a
//!   [`Connector`].
//!
//! Both roles share one adapter, coordinated through [`Radio`].
//!
//! # Management
//!
//! Adapter power, discovery and advertising instances go through the kernel
//! management API in the [`management`] module, where the central type is
//! [`management::ManagementStream`].
//!
//! # Permissions
//! Commands that just query information, such as
//! [`get_controller_info`](crate::management::get_controller_info),
//! will usually work. However, commands that try to change any settings, such
//! as
//! [`set_powered`](crate::management::set_powered)
//! will fail with 'permission denied' errors if your process does not have the
//! `CAP_NET_ADMIN` capability.

#[macro_use]
extern crate num_derive;
#[macro_use]
extern crate thiserror;

pub use address::*;
pub use advertiser::Advertiser;
pub use central::{BluezCentral, Central, DeviceDescriptor, GattClient};
pub use channel::{Channel, ChannelId, ChannelTransport, L2capTransport};
pub use conn::{BleConn, BleDialer, DialTarget, ForwardDialer};
pub use connector::{Connector, Session, SessionInfo};
pub use error::{BoxError, Error, Result};
pub use peripheral::{BluezPeripheral, Peripheral};
pub use publisher::ChannelPublisher;
pub use radio::{Radio, RadioClaim, Role};

pub mod att;
pub mod central;
pub mod channel;
pub mod communication;
pub mod config;
pub mod conn;
pub mod connector;
pub mod eir;
pub mod error;
pub mod gatt;
pub mod handoff;
pub mod management;
pub mod peripheral;
pub mod radio;

mod address;
mod advertiser;
mod publisher;
mod socket;
mod util;
