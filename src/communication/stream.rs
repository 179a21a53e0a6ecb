//! IO structures related to communicating with remote Bluetooth devices over
//! L2CAP: the fixed ATT channel and dynamically allocated credit-based
//! channels.

use std::io::Error;
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream as StdUnixStream;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde::Deserialize;
use tokio::io::unix::AsyncFd;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixStream;

use crate::socket::*;
use crate::util::check_error;
use crate::{Address, AddressType};

/// What an L2CAP socket binds or connects to: a protocol/service
/// multiplexer for credit-based channels, or a fixed channel id.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum L2capTarget {
    Psm(u16),
    Cid(u16),
}

impl L2capTarget {
    fn split(self) -> (u16, u16) {
        match self {
            L2capTarget::Psm(psm) => (psm, 0),
            L2capTarget::Cid(cid) => (0, cid),
        }
    }
}

/// `BT_SECURITY_*` levels.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    Sdp = 0,
    Low = 1,
    Medium = 2,
    #[default]
    High = 3,
    Fips = 4,
}

/// Options applied to an L2CAP socket before it connects or listens.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct SocketOptions {
    pub security: Option<SecurityLevel>,
    pub recv_mtu: Option<u16>,
}

fn open_l2cap() -> Result<OwnedFd, Error> {
    let fd = check_error(unsafe {
        libc::socket(
            libc::AF_BLUETOOTH,
            libc::SOCK_CLOEXEC | libc::SOCK_NONBLOCK | libc::SOCK_SEQPACKET,
            BtProto::L2CAP as libc::c_int,
        )
    })?;
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn bind(fd: RawFd, addr: &SockAddrL2) -> Result<(), Error> {
    check_error(unsafe {
        libc::bind(
            fd,
            addr as *const SockAddrL2 as *const libc::sockaddr,
            std::mem::size_of::<SockAddrL2>() as u32,
        )
    })
    .map(|_| ())
}

fn apply_options(fd: RawFd, options: &SocketOptions) -> Result<(), Error> {
    if let Some(level) = options.security {
        let sec = BtSecurity {
            level: level as u8,
            key_size: 0,
        };
        check_error(unsafe {
            libc::setsockopt(
                fd,
                SOL_BLUETOOTH,
                BT_SECURITY,
                &sec as *const BtSecurity as *const libc::c_void,
                std::mem::size_of::<BtSecurity>() as libc::socklen_t,
            )
        })?;
    }

    if let Some(mtu) = options.recv_mtu {
        check_error(unsafe {
            libc::setsockopt(
                fd,
                SOL_BLUETOOTH,
                BT_RCVMTU,
                &mtu as *const u16 as *const libc::c_void,
                std::mem::size_of::<u16>() as libc::socklen_t,
            )
        })?;
    }

    Ok(())
}

fn sock_name(fd: RawFd, peer: bool) -> Result<SockAddrL2, Error> {
    let mut addr: SockAddrL2 = unsafe { std::mem::zeroed() };
    let mut addr_len = std::mem::size_of::<SockAddrL2>() as libc::socklen_t;

    check_error(unsafe {
        if peer {
            libc::getpeername(fd, &mut addr as *mut _ as *mut _, &mut addr_len)
        } else {
            libc::getsockname(fd, &mut addr as *mut _ as *mut _, &mut addr_len)
        }
    })?;

    Ok(addr)
}

fn peer_of(addr: &SockAddrL2) -> (Address, u16) {
    let bdaddr = addr.l2_bdaddr;
    (bdaddr, addr.psm())
}

/// A Bluetooth socket which can accept connections from remote Bluetooth
/// devices. You can accept new connections using the
/// [`accept`](`BluetoothListener::accept`) method.
pub struct BluetoothListener {
    inner: AsyncFd<OwnedFd>,
}

impl BluetoothListener {
    /// Creates a new listener on the local LE identity. Binding PSM 0 lets
    /// the kernel allocate a dynamic PSM, readable through
    /// [`local_addr`](`BluetoothListener::local_addr`).
    pub fn bind(target: L2capTarget, options: &SocketOptions) -> Result<Self, Error> {
        let fd = open_l2cap()?;
        let (psm, cid) = target.split();
        let addr = SockAddrL2::new(Address::any(), AddressType::LEPublic as u8, psm, cid);

        bind(fd.as_raw_fd(), &addr)?;
        apply_options(fd.as_raw_fd(), options)?;
        check_error(unsafe { libc::listen(fd.as_raw_fd(), 128) })?;

        Ok(BluetoothListener {
            inner: AsyncFd::new(fd)?,
        })
    }

    /// Accepts a new incoming connection to this listener. Upon success,
    /// returns the connection, the address of the remote device, and the remote
    /// port.
    pub async fn accept(&self) -> Result<(BluetoothStream, (Address, u16)), Error> {
        let mut addr: SockAddrL2 = unsafe { std::mem::zeroed() };
        let mut addr_len = std::mem::size_of::<SockAddrL2>() as libc::socklen_t;

        let fd = loop {
            let res = self.inner.readable().await?.try_io(|_fd| {
                check_error(unsafe {
                    libc::accept4(
                        self.inner.as_raw_fd(),
                        &mut addr as *mut _ as *mut _,
                        &mut addr_len,
                        libc::SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
                    )
                })
            });

            match res {
                Ok(fd) => break unsafe { OwnedFd::from_raw_fd(fd?) },
                Err(_would_block) => continue,
            }
        };

        let sock = BluetoothStream {
            inner: UnixStream::from_std(StdUnixStream::from(fd))?,
        };

        Ok((sock, peer_of(&addr)))
    }

    /// Returns the address and PSM that this listener is listening on.
    pub fn local_addr(&self) -> Result<(Address, u16), Error> {
        Ok(peer_of(&sock_name(self.inner.as_raw_fd(), false)?))
    }
}

impl AsRawFd for BluetoothListener {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

/// A structure representing an active Bluetooth connection. This socket can be
/// connected directly using [`BluetoothStream::connect`], or it can be accepted
/// from a [`BluetoothListener`].
#[derive(Debug)]
pub struct BluetoothStream {
    inner: UnixStream,
}

impl BluetoothStream {
    /// Connects to a remote LE device. The socket is bound to the local LE
    /// identity first so the kernel routes it over LE rather than BR/EDR.
    pub async fn connect(
        addr: Address,
        addr_type: AddressType,
        target: L2capTarget,
        options: &SocketOptions,
    ) -> Result<Self, Error> {
        let fd = open_l2cap()?;

        let local = SockAddrL2::new(Address::any(), AddressType::LEPublic as u8, 0, 0);
        bind(fd.as_raw_fd(), &local)?;
        apply_options(fd.as_raw_fd(), options)?;

        let (psm, cid) = target.split();
        let remote = SockAddrL2::new(addr, addr_type as u8, psm, cid);

        let res = unsafe {
            libc::connect(
                fd.as_raw_fd(),
                &remote as *const SockAddrL2 as *const libc::sockaddr,
                std::mem::size_of::<SockAddrL2>() as u32,
            )
        };

        let fd = match check_error(res) {
            Ok(_) => fd,
            // a SOCK_NONBLOCK socket reports EINPROGRESS
            Err(err) if err.raw_os_error() == Some(libc::EINPROGRESS) => {
                finish_connect(fd).await?
            }
            Err(err) => return Err(err),
        };

        Ok(BluetoothStream {
            inner: UnixStream::from_std(StdUnixStream::from(fd))?,
        })
    }

    /// Gets the remote address and PSM of this Bluetooth connection.
    pub fn peer_addr(&self) -> Result<(Address, u16), Error> {
        Ok(peer_of(&sock_name(self.inner.as_raw_fd(), true)?))
    }

    /// Closes the socket, reporting any error the kernel returns.
    pub fn close(self) -> Result<(), Error> {
        let std = self.inner.into_std()?;
        let fd = std.into_raw_fd();
        check_error(unsafe { libc::close(fd) }).map(|_| ())
    }

    fn pin_get_inner(self: Pin<&mut Self>) -> Pin<&mut UnixStream> {
        Pin::new(&mut self.get_mut().inner)
    }
}

/// Waits for a non-blocking connect on `fd` to finish and collects its
/// outcome. The descriptor is closed if this future is dropped first.
async fn finish_connect(fd: OwnedFd) -> Result<OwnedFd, Error> {
    let afd = AsyncFd::new(fd)?;
    drop(afd.writable().await?);
    let fd = afd.into_inner();
    take_socket_error(fd.as_raw_fd())?;
    Ok(fd)
}

fn take_socket_error(fd: RawFd) -> Result<(), Error> {
    let mut optval: libc::c_int = 0;
    let mut optlen = std::mem::size_of::<libc::c_int>() as libc::socklen_t;

    check_error(unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut optval as *mut _ as *mut _,
            &mut optlen,
        )
    })?;

    if optval != 0 {
        Err(Error::from_raw_os_error(optval))
    } else {
        Ok(())
    }
}

impl AsRawFd for BluetoothStream {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

impl AsyncWrite for BluetoothStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, Error>> {
        AsyncWrite::poll_write(self.pin_get_inner(), cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Error>> {
        AsyncWrite::poll_flush(self.pin_get_inner(), cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Error>> {
        AsyncWrite::poll_shutdown(self.pin_get_inner(), cx)
    }
}

impl AsyncRead for BluetoothStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        AsyncRead::poll_read(self.pin_get_inner(), cx, buf)
    }
}
