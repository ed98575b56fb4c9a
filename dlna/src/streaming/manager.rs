use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::callback_server::{callback_path, CallbackServer, EventRouter};
use super::event::parse_property_set;
use super::subscription::{GenaClient, GenaTransport, SubscriptionError, SubscriptionResult};
use super::types::{CallbackTarget, RawEvent, SubscriptionConfig, SubscriptionId};
use crate::model::{Device, DeviceEvent, ServiceKind, Udn};

/// Public view of an active subscription
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionInfo {
    pub id: SubscriptionId,
    pub udn: Udn,
    pub service: ServiceKind,
    pub event_url: String,
    /// Granted duration; `None` for `Second-infinite`
    pub timeout: Option<Duration>,
    /// Events lost to sequence gaps since the subscription started
    pub missed_events: u32,
}

struct ActiveSubscription {
    info: SubscriptionInfo,
    callback_path: String,
    renewed_at: Instant,
    last_seq: Option<u32>,
}

#[derive(Debug, PartialEq, Eq)]
enum Sequence {
    InOrder,
    Gap(u32),
    Stale,
}

/// SEQ starts at 0 and wraps from `u32::MAX` to 1. A 0 after other values
/// means the device restarted the subscription.
fn check_sequence(last: Option<u32>, seq: u32) -> Sequence {
    let expected = match last {
        None => 0,
        Some(u32::MAX) => 1,
        Some(last) => last + 1,
    };

    if seq == expected || seq == 0 {
        Sequence::InOrder
    } else if seq > expected {
        Sequence::Gap(seq - expected)
    } else {
        Sequence::Stale
    }
}

/// Manages GENA subscriptions and turns NOTIFY bodies into [`DeviceEvent`]s
pub struct EventSubscriber {
    config: SubscriptionConfig,
    gena: Arc<dyn GenaTransport>,
    router: Arc<EventRouter>,
    callback_base: String,
    subscriptions: Mutex<HashMap<SubscriptionId, ActiveSubscription>>,
    /// Targets with a SUBSCRIBE in flight, and events that beat its response
    pending: Mutex<Vec<CallbackTarget>>,
    early_events: Mutex<Vec<RawEvent>>,
    events: mpsc::UnboundedSender<DeviceEvent>,
    server: tokio::sync::Mutex<Option<CallbackServer>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl EventSubscriber {
    /// Starts the callback server and the background dispatch and renewal tasks
    pub async fn start(
        config: SubscriptionConfig,
    ) -> SubscriptionResult<(Arc<Self>, mpsc::UnboundedReceiver<DeviceEvent>)> {
        config.validate().map_err(SubscriptionError::InvalidConfiguration)?;

        let gena = Arc::new(GenaClient::new(config.request_timeout)?);
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let router = Arc::new(EventRouter::new(raw_tx));
        let server = CallbackServer::start(&config, Arc::clone(&router)).await?;
        let callback_base = server.base_url().to_string();

        let (subscriber, events_rx) = Self::build(config, gena, router, callback_base, raw_rx);
        *subscriber.server.lock().await = Some(server);
        subscriber.spawn_renewal();

        Ok((subscriber, events_rx))
    }

    /// Builds a subscriber over a caller-supplied GENA transport without a
    /// callback server; events enter through [`EventSubscriber::router`].
    /// Must be called inside a tokio runtime.
    pub fn with_transport(
        config: SubscriptionConfig,
        gena: Arc<dyn GenaTransport>,
        callback_base: impl Into<String>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<DeviceEvent>) {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let router = Arc::new(EventRouter::new(raw_tx));
        Self::build(config, gena, router, callback_base.into(), raw_rx)
    }

    fn build(
        config: SubscriptionConfig,
        gena: Arc<dyn GenaTransport>,
        router: Arc<EventRouter>,
        callback_base: String,
        raw_rx: mpsc::UnboundedReceiver<RawEvent>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<DeviceEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let subscriber = Arc::new(Self {
            config,
            gena,
            router,
            callback_base: callback_base.trim_end_matches('/').to_string(),
            subscriptions: Mutex::new(HashMap::new()),
            pending: Mutex::new(Vec::new()),
            early_events: Mutex::new(Vec::new()),
            events: events_tx,
            server: tokio::sync::Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        });
        subscriber.spawn_dispatch(raw_rx);
        (subscriber, events_rx)
    }

    fn spawn_dispatch(self: &Arc<Self>, mut raw_rx: mpsc::UnboundedReceiver<RawEvent>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            while let Some(raw) = raw_rx.recv().await {
                let Some(subscriber) = weak.upgrade() else {
                    break;
                };
                subscriber.handle_raw_event(raw).await;
            }
        });
        self.lock_tasks().push(handle);
    }

    fn spawn_renewal(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = (self.config.renewal_threshold / 2).clamp(Duration::from_secs(1), Duration::from_secs(60));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let Some(subscriber) = weak.upgrade() else {
                    break;
                };
                for (id, result) in subscriber.renew_due(Instant::now()).await {
                    if let Err(e) = result {
                        log::warn!("Renewal of subscription {} failed: {}", id, e);
                    }
                }
            }
        });
        self.lock_tasks().push(handle);
    }

    /// Entry point for NOTIFY requests, shared with the callback server
    pub fn router(&self) -> &Arc<EventRouter> {
        &self.router
    }

    /// Subscribe to a service's events.
    ///
    /// `duration` overrides the configured subscription timeout. An existing
    /// subscription for the same device service is returned unchanged.
    pub async fn subscribe(
        &self,
        device: &Device,
        service: ServiceKind,
        duration: Option<Duration>,
    ) -> SubscriptionResult<SubscriptionInfo> {
        if let Some(existing) = self.find(&device.udn, service) {
            return Ok(existing);
        }

        let event_url = device
            .service(service)
            .map(|s| s.event_sub_url.clone())
            .filter(|url| !url.is_empty())
            .ok_or_else(|| SubscriptionError::ServiceNotSupported {
                udn: device.udn.to_string(),
                service: service.to_string(),
            })?;

        let target = CallbackTarget {
            udn: device.udn.clone(),
            service,
        };
        let path = callback_path(&device.udn, service);
        let timeout_seconds = duration
            .map(|d| d.as_secs().clamp(1, u32::MAX as u64) as u32)
            .unwrap_or(self.config.timeout_seconds);

        self.router.register(path.clone(), target.clone()).await;
        self.lock_pending().push(target.clone());

        let result = self
            .gena
            .subscribe(&event_url, &format!("{}{}", self.callback_base, path), timeout_seconds)
            .await;

        self.lock_pending().retain(|t| t != &target);

        let grant = match result {
            Ok(grant) => grant,
            Err(e) => {
                self.router.unregister(&path).await;
                self.lock_early().retain(|raw| raw.target != target);
                return Err(e);
            }
        };

        let info = SubscriptionInfo {
            id: grant.sid.clone(),
            udn: device.udn.clone(),
            service,
            event_url,
            timeout: grant.timeout,
            missed_events: 0,
        };

        self.lock_subscriptions().insert(
            grant.sid.clone(),
            ActiveSubscription {
                info: info.clone(),
                callback_path: path,
                renewed_at: Instant::now(),
                last_seq: None,
            },
        );
        log::info!("Subscribed to {} on {} ({})", service, device.udn, grant.sid);

        self.emit(DeviceEvent::Established {
            udn: device.udn.clone(),
            subscription_id: grant.sid.clone(),
        });

        let early: Vec<RawEvent> = {
            let mut buffered = self.lock_early();
            let (mine, rest): (Vec<_>, Vec<_>) = buffered
                .drain(..)
                .partition(|raw| raw.sid.as_ref() == Some(&grant.sid));
            *buffered = rest;
            mine
        };
        for raw in early {
            self.handle_raw_event(raw).await;
        }

        Ok(info)
    }

    /// Renew one subscription. A subscription the device no longer knows is
    /// ended.
    pub async fn renew(&self, id: &SubscriptionId) -> SubscriptionResult<()> {
        let event_url = self
            .lock_subscriptions()
            .get(id)
            .map(|sub| sub.info.event_url.clone())
            .ok_or_else(|| SubscriptionError::SubscriptionNotFound {
                subscription_id: id.clone(),
            })?;

        match self.gena.renew(&event_url, id, self.config.timeout_seconds).await {
            Ok(grant) => {
                if let Some(sub) = self.lock_subscriptions().get_mut(id) {
                    sub.renewed_at = Instant::now();
                    sub.info.timeout = grant.timeout;
                }
                log::debug!("Renewed subscription {}", id);
                Ok(())
            }
            Err(SubscriptionError::SubscriptionExpired) => {
                log::warn!("Subscription {} expired on the device", id);
                self.end(id).await;
                Err(SubscriptionError::SubscriptionExpired)
            }
            Err(e) => Err(e),
        }
    }

    /// Renew every subscription within the renewal threshold of expiry
    pub async fn renew_due(&self, now: Instant) -> Vec<(SubscriptionId, SubscriptionResult<()>)> {
        let threshold = self.config.renewal_threshold;
        let due: Vec<SubscriptionId> = self
            .lock_subscriptions()
            .values()
            .filter(|sub| match sub.info.timeout {
                Some(timeout) => now >= sub.renewed_at + timeout.saturating_sub(threshold),
                None => false,
            })
            .map(|sub| sub.info.id.clone())
            .collect();

        let mut results = Vec::with_capacity(due.len());
        for id in due {
            let result = self.renew(&id).await;
            results.push((id, result));
        }
        results
    }

    /// End a subscription and tell the device
    pub async fn unsubscribe(&self, id: &SubscriptionId) -> SubscriptionResult<()> {
        let info = self.end(id).await.ok_or_else(|| SubscriptionError::SubscriptionNotFound {
            subscription_id: id.clone(),
        })?;
        self.gena.unsubscribe(&info.event_url, id).await
    }

    /// End every subscription held for a device that left the network.
    /// UNSUBSCRIBE is attempted but failures are expected and ignored.
    pub async fn device_removed(&self, udn: &Udn) -> Vec<SubscriptionId> {
        let ids: Vec<SubscriptionId> = self
            .lock_subscriptions()
            .values()
            .filter(|sub| &sub.info.udn == udn)
            .map(|sub| sub.info.id.clone())
            .collect();

        for id in &ids {
            if let Some(info) = self.end(id).await {
                if let Err(e) = self.gena.unsubscribe(&info.event_url, id).await {
                    log::debug!("UNSUBSCRIBE {} for removed device {} failed: {}", id, udn, e);
                }
            }
        }
        ids
    }

    /// Unsubscribe everything and stop the callback server and background tasks
    pub async fn shutdown(&self) {
        let ids: Vec<SubscriptionId> = self.lock_subscriptions().keys().cloned().collect();
        for id in ids {
            if let Err(e) = self.unsubscribe(&id).await {
                log::warn!("Failed to unsubscribe {} during shutdown: {}", id, e);
            }
        }

        for task in self.lock_tasks().drain(..) {
            task.abort();
        }

        if let Some(mut server) = self.server.lock().await.take() {
            server.shutdown().await;
        }
    }

    pub fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.lock_subscriptions().values().map(|sub| sub.info.clone()).collect()
    }

    pub fn missed_events(&self, id: &SubscriptionId) -> Option<u32> {
        self.lock_subscriptions().get(id).map(|sub| sub.info.missed_events)
    }

    /// Decode one received NOTIFY and emit the events it produces
    pub async fn handle_raw_event(&self, raw: RawEvent) {
        let Some(sid) = raw.sid.clone() else {
            log::warn!("Dropping event without SID for {}", raw.target.udn);
            return;
        };

        let sequence = {
            let mut subscriptions = self.lock_subscriptions();
            match subscriptions.get_mut(&sid) {
                Some(sub) => {
                    let sequence = raw
                        .seq
                        .map(|seq| check_sequence(sub.last_seq, seq))
                        .unwrap_or(Sequence::InOrder);
                    if sequence != Sequence::Stale {
                        if let Some(seq) = raw.seq {
                            sub.last_seq = Some(seq);
                        }
                    }
                    if let Sequence::Gap(missed) = sequence {
                        sub.info.missed_events = sub.info.missed_events.saturating_add(missed);
                    }
                    Some((sequence, sub.info.missed_events))
                }
                None => None,
            }
        };

        let Some((sequence, missed_total)) = sequence else {
            if self.lock_pending().contains(&raw.target) {
                log::debug!("Buffering early event for {}", sid);
                self.lock_early().push(raw);
            } else {
                log::debug!("Dropping event for unknown subscription {}", sid);
            }
            return;
        };

        let udn = raw.target.udn.clone();
        match sequence {
            Sequence::Stale => {
                log::debug!("Ignoring out-of-order event {:?} on {}", raw.seq, sid);
                return;
            }
            Sequence::Gap(missed) => {
                log::warn!("Missed {} event(s) on subscription {} for {}", missed, sid, udn);
                self.emit(DeviceEvent::EventsMissed {
                    udn: udn.clone(),
                    subscription_id: sid.clone(),
                    missed: missed_total,
                });
            }
            Sequence::InOrder => {}
        }

        match parse_property_set(&raw.event_xml) {
            Ok(changes) => {
                for change in changes {
                    self.emit(DeviceEvent::Changed {
                        udn: udn.clone(),
                        change,
                    });
                }
            }
            Err(e) => log::warn!("Failed to parse event from {}: {}", udn, e),
        }
    }

    fn find(&self, udn: &Udn, service: ServiceKind) -> Option<SubscriptionInfo> {
        self.lock_subscriptions()
            .values()
            .find(|sub| &sub.info.udn == udn && sub.info.service == service)
            .map(|sub| sub.info.clone())
    }

    /// Forget a subscription locally and announce its end
    async fn end(&self, id: &SubscriptionId) -> Option<SubscriptionInfo> {
        let removed = self.lock_subscriptions().remove(id)?;
        self.router.unregister(&removed.callback_path).await;
        log::info!("Subscription {} for {} ended", id, removed.info.udn);
        self.emit(DeviceEvent::Ended {
            udn: removed.info.udn.clone(),
            subscription_id: id.clone(),
        });
        Some(removed.info)
    }

    fn emit(&self, event: DeviceEvent) {
        if self.events.send(event).is_err() {
            log::debug!("Event receiver dropped");
        }
    }

    fn lock_subscriptions(&self) -> std::sync::MutexGuard<'_, HashMap<SubscriptionId, ActiveSubscription>> {
        self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Vec<CallbackTarget>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_early(&self) -> std::sync::MutexGuard<'_, Vec<RawEvent>> {
        self.early_events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for EventSubscriber {
    fn drop(&mut self) {
        for task in self.lock_tasks().drain(..) {
            task.abort();
        }
    }
}
