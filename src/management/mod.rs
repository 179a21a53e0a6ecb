//! The BlueZ kernel management API (`doc/mgmt-api.txt`), used to power the
//! adapter, run LE discovery and install advertising instances.

mod client;
pub mod interface;
pub mod result;
mod stream;

pub use client::*;
pub use result::{Error, Result};
pub use stream::ManagementStream;
