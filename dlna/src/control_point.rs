use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use tokio::sync::mpsc;

use crate::config::{ControlConfig, OnlineProbe};
use crate::controller::{MediaController, VolumeController};
use crate::error::{ControlError, Result};
use crate::invoker::ActionInvoker;
use crate::model::{ActionOutcome, Device, DeviceEvent, MediaMetadata, ServiceKind, Udn};
use crate::registry::{is_excluded_device_type, Admission, Announcement, DeviceRegistry};
use crate::streaming::{EventSubscriber, SubscriptionConfig, SubscriptionId, SubscriptionInfo};
use crate::transport::description::DescriptionFetcher;
use crate::transport::discovery::{Discovery, SEARCH_ALL};
use crate::transport::soap::{SoapClient, SoapTransport};
use crate::transport::ssdp::SsdpMessage;

/// Entry point tying discovery, the registry, both controllers and the
/// optional event subscriber together
pub struct ControlPoint {
    config: Arc<ControlConfig>,
    registry: DeviceRegistry,
    invoker: ActionInvoker,
    media: MediaController,
    volume: VolumeController,
    fetcher: Option<DescriptionFetcher>,
    /// Devices whose description turned out not to be a media device, until
    /// their announcement expires
    rejected: Mutex<HashMap<Udn, Instant>>,
    events: RwLock<Option<Arc<EventSubscriber>>>,
}

impl ControlPoint {
    /// Control point speaking SOAP over HTTP
    pub fn new(config: ControlConfig) -> Result<Self> {
        config.validate().map_err(ControlError::InvalidConfiguration)?;

        let soap = SoapClient::new(config.http_timeout).map_err(|e| ControlError::CommunicationError(e.to_string()))?;
        let fetcher = DescriptionFetcher::new(config.http_timeout)?;

        let mut control_point = Self::with_transport(config, Arc::new(soap));
        control_point.fetcher = Some(fetcher);
        Ok(control_point)
    }

    /// Control point over a caller-supplied SOAP transport. SSDP alive
    /// messages for unknown devices cannot be resolved without a description
    /// fetcher; use [`ControlPoint::admit`] with resolved announcements.
    pub fn with_transport(config: ControlConfig, transport: Arc<dyn SoapTransport>) -> Self {
        let config = Arc::new(config);
        let registry = DeviceRegistry::new();
        let invoker = ActionInvoker::new(transport);

        Self {
            media: MediaController::new(registry.clone(), invoker.clone(), Arc::clone(&config)),
            volume: VolumeController::new(registry.clone(), invoker.clone(), Arc::clone(&config)),
            config,
            registry,
            invoker,
            fetcher: None,
            rejected: Mutex::new(HashMap::new()),
            events: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &ControlConfig {
        &self.config
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn media(&self) -> &MediaController {
        &self.media
    }

    pub fn volume(&self) -> &VolumeController {
        &self.volume
    }

    pub fn devices(&self) -> Vec<Device> {
        self.registry.list()
    }

    /// Run an SSDP search and admit every media device found
    pub async fn discover(&self, timeout: Duration) -> Result<Vec<Device>> {
        let announcements = Discovery::new(timeout)?.search(SEARCH_ALL).await?;
        let now = Instant::now();

        let admitted = announcements
            .into_iter()
            .filter_map(|announcement| {
                let device = announcement.device.clone();
                match self.registry.add_or_update(announcement, now) {
                    Admission::Rejected => None,
                    _ => Some(device),
                }
            })
            .collect::<Vec<_>>();

        info!("Discovery found {} media device(s)", admitted.len());
        Ok(admitted)
    }

    /// Admit a resolved announcement
    pub fn admit(&self, announcement: Announcement) -> Admission {
        self.registry.add_or_update(announcement, Instant::now())
    }

    /// Apply an SSDP NOTIFY or search response.
    ///
    /// A re-announcement of a known device only refreshes its expiry; the
    /// description is fetched for devices not seen before. A device whose
    /// description was rejected is not fetched again until its max-age runs out.
    pub async fn handle_ssdp(&self, message: SsdpMessage) -> Result<Admission> {
        match message {
            SsdpMessage::Alive(announcement) => {
                if is_excluded_device_type(&announcement.target) {
                    return Ok(Admission::Rejected);
                }

                let now = Instant::now();
                if self.recently_rejected(&announcement.udn, now) {
                    debug!("Ignoring alive from non-media device {}", announcement.udn);
                    return Ok(Admission::Rejected);
                }

                let device = match self.registry.get(announcement.udn.as_str()) {
                    Ok(known) => known,
                    Err(_) => {
                        let fetcher = self.fetcher.as_ref().ok_or_else(|| {
                            ControlError::DiscoveryFailed(format!(
                                "cannot resolve {} without a description fetcher",
                                announcement.location
                            ))
                        })?;
                        fetcher.fetch_device(&announcement.location).await?
                    }
                };

                let admission = self.admit(Announcement::new(device, announcement.max_age));
                if admission == Admission::Rejected {
                    self.rejected_udns().insert(announcement.udn, now + announcement.max_age);
                }
                Ok(admission)
            }
            SsdpMessage::ByeBye { udn, .. } => {
                self.rejected_udns().remove(&udn);
                self.remove_device(&udn).await;
                Ok(Admission::Rejected)
            }
        }
    }

    /// Forget a device along with its cached state and subscriptions
    pub async fn remove_device(&self, udn: &Udn) -> bool {
        let removed = self.registry.remove(udn.as_str());
        self.forget(udn).await;
        removed
    }

    fn rejected_udns(&self) -> std::sync::MutexGuard<'_, HashMap<Udn, Instant>> {
        self.rejected.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn recently_rejected(&self, udn: &Udn, now: Instant) -> bool {
        self.rejected_udns().get(udn).is_some_and(|until| *until >= now)
    }

    /// Drop devices whose announcement expired before `now`
    pub async fn sweep_expired(&self, now: Instant) -> Vec<Udn> {
        self.rejected_udns().retain(|_, until| *until >= now);
        let expired = self.registry.sweep_expired(now);
        for udn in &expired {
            self.forget(udn).await;
        }
        expired
    }

    async fn forget(&self, udn: &Udn) {
        self.media.forget(udn.as_str());
        self.volume.forget(udn.as_str());
        if let Some(events) = self.subscriber() {
            events.device_removed(udn).await;
        }
    }

    /// Runs the configured probes in order; the first that succeeds decides
    pub async fn is_device_online(&self, udn: &str) -> bool {
        if !self.registry.contains(udn) {
            return false;
        }

        for probe in &self.config.online_probes {
            let result = match probe {
                OnlineProbe::TransportInfo => self.media.get_transport_state(udn).await.map(|_| ()),
                OnlineProbe::Volume => self.volume.get_volume(udn).await.map(|_| ()),
                OnlineProbe::ProtocolInfo => self.probe_protocol_info(udn).await,
                OnlineProbe::RegistryPresence => {
                    if self.registry.contains(udn) {
                        Ok(())
                    } else {
                        Err(ControlError::DeviceNotFound(udn.to_string()))
                    }
                }
            };

            match result {
                Ok(()) => {
                    debug!("{} is online ({:?})", udn, probe);
                    return true;
                }
                Err(e) => debug!("Online probe {:?} for {} failed: {}", probe, udn, e),
            }
        }

        false
    }

    async fn probe_protocol_info(&self, udn: &str) -> Result<()> {
        let service = self.registry.service(udn, ServiceKind::ConnectionManager)?;
        self.invoker
            .invoke(&service, "GetProtocolInfo", &[], self.config.query_timeout)
            .await?;
        Ok(())
    }

    /// Load `uri` and start playing it once the renderer is ready
    pub async fn cast(&self, udn: &str, uri: &str, metadata: Option<&MediaMetadata>) -> Result<ActionOutcome> {
        self.media.set_media_uri(udn, uri, metadata).await?;
        self.media.wait_until_ready(udn).await;
        self.media.play(udn).await
    }

    /// Start the event subscriber and route its events into the controllers'
    /// caches. Events are also forwarded on the returned channel.
    pub async fn enable_events(&self, config: SubscriptionConfig) -> Result<mpsc::UnboundedReceiver<DeviceEvent>> {
        let (subscriber, events) = EventSubscriber::start(config).await?;
        Ok(self.attach_events(subscriber, events))
    }

    /// Use an already built subscriber
    pub fn attach_events(
        &self,
        subscriber: Arc<EventSubscriber>,
        mut events: mpsc::UnboundedReceiver<DeviceEvent>,
    ) -> mpsc::UnboundedReceiver<DeviceEvent> {
        let previous = self
            .events
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(subscriber);
        if previous.is_some() {
            warn!("Replacing the active event subscriber");
        }

        let (forward_tx, forward_rx) = mpsc::unbounded_channel();
        let media = self.media.clone();
        let volume = self.volume.clone();

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let DeviceEvent::Changed { udn, change } = &event {
                    media.apply_change(udn.as_str(), change);
                    volume.apply_change(udn.as_str(), change);
                }
                if forward_tx.send(event).is_err() {
                    debug!("Device event receiver dropped");
                }
            }
        });

        forward_rx
    }

    fn subscriber(&self) -> Option<Arc<EventSubscriber>> {
        self.events.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Subscribe to a device service's events
    pub async fn subscribe(&self, udn: &str, service: ServiceKind, duration: Option<Duration>) -> Result<SubscriptionInfo> {
        let events = self
            .subscriber()
            .ok_or_else(|| ControlError::PreconditionFailed("event subscriptions are not enabled".to_string()))?;
        let device = self.registry.get(udn)?;
        Ok(events.subscribe(&device, service, duration).await?)
    }

    pub async fn unsubscribe(&self, id: &SubscriptionId) -> Result<()> {
        let events = self
            .subscriber()
            .ok_or_else(|| ControlError::PreconditionFailed("event subscriptions are not enabled".to_string()))?;
        Ok(events.unsubscribe(id).await?)
    }

    /// End all subscriptions and stop the callback server
    pub async fn shutdown(&self) {
        let subscriber = self.events.write().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(events) = subscriber {
            events.shutdown().await;
        }
    }
}
