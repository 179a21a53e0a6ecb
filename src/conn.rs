//! A negotiated session behind the plain duplex-stream contract, for callers
//! that tunnel a stream-oriented protocol over the channel.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, Waker};

use futures::task::{waker, ArcWake};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{Instant, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::central::Central;
use crate::channel::ChannelTransport;
use crate::communication::Uuid128;
use crate::connector::{Connector, Session, SessionInfo};
use crate::error::Error;
use crate::Address;

#[derive(Default)]
struct Deadline {
    at: Option<Instant>,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl Deadline {
    fn set(&mut self, at: Option<Instant>) {
        self.at = at;
        self.sleep = at.map(|at| Box::pin(tokio::time::sleep_until(at)));
    }

    /// Registers for a wakeup at the deadline and reports whether it passed.
    fn poll_expired(&mut self, cx: &mut Context<'_>) -> bool {
        match &mut self.sleep {
            Some(sleep) => sleep.as_mut().poll(cx).is_ready(),
            None => false,
        }
    }
}

fn timed_out() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "deadline exceeded")
}

/// Every task waiting on one direction of the session. The transport keeps
/// a single waker per direction, so clones polling concurrently hand it
/// this set instead of their own waker.
#[derive(Default)]
struct WakerSet(Mutex<Vec<Waker>>);

impl WakerSet {
    fn register(&self, w: &Waker) {
        let mut wakers = self.0.lock().unwrap_or_else(|e| e.into_inner());
        if !wakers.iter().any(|x| x.will_wake(w)) {
            wakers.push(w.clone());
        }
    }
}

impl ArcWake for WakerSet {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        let wakers = std::mem::take(&mut *arc_self.0.lock().unwrap_or_else(|e| e.into_inner()));
        for w in wakers {
            w.wake();
        }
    }
}

struct Direction {
    waiting: Arc<WakerSet>,
    waker: Waker,
}

impl Default for Direction {
    fn default() -> Self {
        let waiting = Arc::new(WakerSet::default());
        Direction {
            waker: waker(waiting.clone()),
            waiting,
        }
    }
}

impl Direction {
    /// Adds the caller to the waiting set and returns the context to poll
    /// the transport with.
    fn context(&self, cx: &Context<'_>) -> Context<'_> {
        self.waiting.register(cx.waker());
        Context::from_waker(&self.waker)
    }
}

struct Shared<T: ChannelTransport> {
    session: Mutex<Option<Session<T>>>,
    info: SessionInfo,
    readers: Direction,
    writers: Direction,
}

/// A connection over an open session. Clones share the session but each
/// value keeps its own deadlines. Shutting down only flushes: the session
/// stays open until [`close`](BleConn::close).
pub struct BleConn<T: ChannelTransport> {
    shared: Arc<Shared<T>>,
    read_deadline: Deadline,
    write_deadline: Deadline,
}

impl<T: ChannelTransport> std::fmt::Debug for BleConn<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BleConn").finish_non_exhaustive()
    }
}

impl<T: ChannelTransport> Clone for BleConn<T> {
    fn clone(&self) -> Self {
        BleConn {
            shared: self.shared.clone(),
            read_deadline: Deadline::default(),
            write_deadline: Deadline::default(),
        }
    }
}

impl<T: ChannelTransport> BleConn<T> {
    pub fn new(session: Session<T>) -> Self {
        let info = session.info();
        BleConn {
            shared: Arc::new(Shared {
                session: Mutex::new(Some(session)),
                info,
                readers: Direction::default(),
                writers: Direction::default(),
            }),
            read_deadline: Deadline::default(),
            write_deadline: Deadline::default(),
        }
    }

    fn session(&self) -> MutexGuard<'_, Option<Session<T>>> {
        self.shared
            .session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    pub fn peer(&self) -> Address {
        self.shared.info.address
    }

    pub fn info(&self) -> SessionInfo {
        self.shared.info
    }

    pub fn is_closed(&self) -> bool {
        self.session().is_none()
    }

    /// Closes the shared session for every clone.
    pub fn close(&self) -> io::Result<()> {
        let session = self.session().take().ok_or(Error::NotConnected)?;
        debug!(peer = %self.peer(), "connection closed");
        Ok(session.close()?)
    }

    /// Sets both deadlines. `None` clears them.
    pub fn set_deadline(&mut self, at: Option<Instant>) {
        self.read_deadline.set(at);
        self.write_deadline.set(at);
    }

    pub fn set_read_deadline(&mut self, at: Option<Instant>) {
        self.read_deadline.set(at);
    }

    pub fn set_write_deadline(&mut self, at: Option<Instant>) {
        self.write_deadline.set(at);
    }

    pub fn read_deadline(&self) -> Option<Instant> {
        self.read_deadline.at
    }

    pub fn write_deadline(&self) -> Option<Instant> {
        self.write_deadline.at
    }

    fn poll_session<R>(
        &self,
        poll: impl FnOnce(Pin<&mut Session<T>>) -> Poll<io::Result<R>>,
    ) -> Poll<io::Result<R>> {
        match self.session().as_mut() {
            Some(session) => poll(Pin::new(session)),
            None => Poll::Ready(Err(io::ErrorKind::NotConnected.into())),
        }
    }
}

impl<T: ChannelTransport> AsyncRead for BleConn<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.read_deadline.poll_expired(cx) {
            return Poll::Ready(Err(timed_out()));
        }
        let mut cx = this.shared.readers.context(cx);
        this.poll_session(|session| session.poll_read(&mut cx, buf))
    }
}

impl<T: ChannelTransport> AsyncWrite for BleConn<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.write_deadline.poll_expired(cx) {
            return Poll::Ready(Err(timed_out()));
        }
        let mut cx = this.shared.writers.context(cx);
        this.poll_session(|session| session.poll_write(&mut cx, buf))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.write_deadline.poll_expired(cx) {
            return Poll::Ready(Err(timed_out()));
        }
        let mut cx = this.shared.writers.context(cx);
        this.poll_session(|session| session.poll_flush(&mut cx))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.poll_flush(cx)
    }
}

/// Opens stream connections for a proxy client.
#[allow(async_fn_in_trait)]
pub trait ForwardDialer {
    type Conn: AsyncRead + AsyncWrite + Unpin + Send;

    async fn dial(&self, network: &str, address: &str) -> io::Result<Self::Conn>;
}

/// Where a [`BleDialer`] connects to.
#[derive(Debug, Clone)]
pub struct DialTarget {
    pub device_name: String,
    pub service: Uuid128,
    pub channel_characteristic: Uuid128,
}

struct DialerState<C: Central, T: ChannelTransport> {
    connector: Connector<C, T>,
    cached: Option<BleConn<T>>,
}

/// Hands out clones of one cached connection, reconnecting only after it
/// has been closed.
pub struct BleDialer<C: Central, T: ChannelTransport> {
    state: tokio::sync::Mutex<DialerState<C, T>>,
    token: CancellationToken,
    target: DialTarget,
}

impl<C: Central, T: ChannelTransport> BleDialer<C, T> {
    pub fn new(connector: Connector<C, T>, target: DialTarget, token: CancellationToken) -> Self {
        BleDialer {
            state: tokio::sync::Mutex::new(DialerState {
                connector,
                cached: None,
            }),
            token,
            target,
        }
    }

    pub async fn connection(&self) -> io::Result<BleConn<T>> {
        let mut state = self.state.lock().await;

        if let Some(conn) = &state.cached {
            if !conn.is_closed() {
                return Ok(conn.clone());
            }
        }
        state.cached = None;

        state
            .connector
            .connect(
                &self.token,
                &self.target.device_name,
                self.target.service,
                self.target.channel_characteristic,
            )
            .await?;

        let conn = BleConn::new(state.connector.detach()?);
        state.cached = Some(conn.clone());
        Ok(conn)
    }
}

impl<C: Central, T: ChannelTransport> ForwardDialer for BleDialer<C, T>
where
    T: Send + Sync,
{
    type Conn = BleConn<T>;

    async fn dial(&self, network: &str, address: &str) -> io::Result<BleConn<T>> {
        debug!(network, address, "dialing over ble");
        self.connection().await
    }
}
