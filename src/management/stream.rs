use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::net::UnixStream as StdUnixStream;

use bytes::*;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use crate::management::interface::{Request, Response};
use crate::management::Error;
use crate::socket::*;
use crate::util::check_error;

/// A 6 byte header followed by at most `u16::MAX` bytes of parameters.
const MAX_MESSAGE_LEN: usize = 6 + u16::MAX as usize;

/// A socket on the management control channel. The kernel delivers one
/// whole message per read, so [`receive`](Self::receive) never leaves a
/// message half consumed and is safe to race in `select!`.
#[derive(Debug)]
pub struct ManagementStream {
    socket: UnixStream,
    buf: Vec<u8>,
}

impl ManagementStream {
    pub fn open() -> io::Result<Self> {
        let fd = check_error(unsafe {
            libc::socket(
                libc::AF_BLUETOOTH,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
                BtProto::HCI as libc::c_int,
            )
        })?;
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };

        let addr = SockAddrHci {
            hci_family: libc::AF_BLUETOOTH as u16,
            hci_dev: HCI_DEV_NONE,
            hci_channel: HciChannel::Control,
        };
        check_error(unsafe {
            libc::bind(
                fd.as_raw_fd(),
                &addr as *const SockAddrHci as *const libc::sockaddr,
                std::mem::size_of::<SockAddrHci>() as libc::socklen_t,
            )
        })?;

        Ok(ManagementStream {
            socket: UnixStream::from_std(StdUnixStream::from(fd))?,
            buf: vec![0u8; MAX_MESSAGE_LEN],
        })
    }

    pub async fn send(&mut self, request: Request) -> io::Result<()> {
        let buf: Bytes = request.into();
        let written = self.socket.write(&buf).await?;
        if written != buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "management command was truncated",
            ));
        }
        Ok(())
    }

    /// Waits for the next reply or event addressed to this socket.
    pub async fn receive(&mut self) -> Result<Response, Error> {
        let n = self.socket.read(&mut self.buf).await?;
        if n == 0 {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }

        let message = &self.buf[..n];
        if n < 6 || u16::from_le_bytes([message[4], message[5]]) as usize != n - 6 {
            return Err(Error::InvalidData);
        }
        Response::parse(message)
    }
}
