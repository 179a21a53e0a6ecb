pub use self::command::*;
pub use self::controller::*;
pub use self::event::*;
pub(crate) use self::request::*;
pub use self::response::*;

mod command;
mod controller;
mod event;
mod request;
mod response;
