//! The peripheral side of the name hand-off: advertise, accept one name
//! through a write-only characteristic, and give it to the owner.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::communication::Uuid128;
use crate::error::{Error, Result};
use crate::gatt::{CharacteristicKind, LocalCharacteristic, LocalService};
use crate::handoff::{handoff_slot, HandoffSink, PendingHandoff};
use crate::peripheral::Peripheral;
use crate::radio::{Radio, RadioClaim, Role};

struct Advertising {
    token: CancellationToken,
    sink: HandoffSink,
    pending: PendingHandoff,
    _claim: RadioClaim,
}

impl Advertising {
    fn shut(&self) {
        self.token.cancel();
        self.sink.close();
    }
}

pub struct Advertiser<P: Peripheral> {
    radio: Radio,
    peripheral: P,
    shutdown: CancellationToken,
    state: Option<Advertising>,
}

impl<P: Peripheral> Advertiser<P> {
    pub fn new(radio: Radio, peripheral: P) -> Self {
        Advertiser {
            radio,
            peripheral,
            shutdown: CancellationToken::new(),
            state: None,
        }
    }

    /// Cancelling this token ends any [`await_handoff`](Self::await_handoff)
    /// with [`Error::HandoffTimedOut`] and drops further writes.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_advertising(&self) -> bool {
        self.state.is_some()
    }

    pub async fn advertise(
        &mut self,
        device_name: &str,
        service: Uuid128,
        inbound_characteristic: Uuid128,
    ) -> Result<()> {
        if self.state.is_some() {
            return Err(Error::AlreadyAdvertising);
        }

        let claim = self.radio.claim(Role::Peripheral)?;
        self.peripheral
            .enable()
            .await
            .map_err(|source| Error::RadioUnavailable { source })?;

        let token = self.shutdown.child_token();
        let (sink, pending) = handoff_slot(token.clone());
        let state = Advertising {
            token: token.clone(),
            sink: sink.clone(),
            pending,
            _claim: claim,
        };

        let local = LocalService {
            uuid: service,
            characteristics: vec![LocalCharacteristic {
                uuid: inbound_characteristic,
                kind: CharacteristicKind::Write(Arc::new(sink)),
            }],
        };

        let started = match self.peripheral.serve(local, token).await {
            Ok(()) => self.peripheral.advertise(device_name, service).await,
            Err(err) => Err(err),
        };
        if let Err(source) = started {
            state.shut();
            return Err(Error::AdvertiseFailed { source });
        }

        info!(device_name, %service, "waiting for a name");
        self.state = Some(state);
        Ok(())
    }

    /// Waits for the first accepted name. Ends with
    /// [`Error::HandoffTimedOut`] if `token` or the shutdown token fires
    /// first, and with [`Error::NotAdvertising`] once the name has been taken.
    pub async fn await_handoff(&mut self, token: &CancellationToken) -> Result<String> {
        let state = self.state.as_mut().ok_or(Error::NotAdvertising)?;
        state.pending.wait(token).await
    }

    pub async fn stop_advertise(&mut self) -> Result<()> {
        let state = self.state.take().ok_or(Error::NotAdvertising)?;
        state.shut();

        let stopped = self
            .peripheral
            .stop()
            .await
            .map_err(|source| Error::StopAdvertiseFailed { source });

        drop(state);
        debug!("advertiser stopped");
        stopped
    }
}

impl<P: Peripheral> Drop for Advertiser<P> {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            state.shut();
            debug!("advertiser dropped while advertising");
        }
    }
}
