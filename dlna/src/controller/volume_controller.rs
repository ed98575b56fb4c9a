use std::sync::Arc;

use log::info;

use crate::config::ControlConfig;
use crate::error::Result;
use crate::invoker::ActionInvoker;
use crate::model::{parse_upnp_bool, Service, ServiceKind, StateChange, VolumeInfo};
use crate::registry::DeviceRegistry;
use crate::state::StateCache;

/// Volume and mute over RenderingControl, Master channel
#[derive(Clone)]
pub struct VolumeController {
    registry: DeviceRegistry,
    invoker: ActionInvoker,
    config: Arc<ControlConfig>,
    cache: StateCache<VolumeInfo>,
}

impl VolumeController {
    pub fn new(registry: DeviceRegistry, invoker: ActionInvoker, config: Arc<ControlConfig>) -> Self {
        Self {
            registry,
            invoker,
            config,
            cache: StateCache::new(),
        }
    }

    fn rendering_control(&self, udn: &str) -> Result<Service> {
        self.registry.service(udn, ServiceKind::RenderingControl)
    }

    /// Last queried or set volume, if any
    pub fn cached(&self, udn: &str) -> Option<VolumeInfo> {
        self.cache.get(udn)
    }

    /// Set the volume; out-of-range levels are clamped to 0..=100
    pub async fn set_volume(&self, udn: &str, level: i64) -> Result<u8> {
        let service = self.rendering_control(udn)?;
        let level = VolumeInfo::clamp_level(level);
        let desired = level.to_string();

        let ticket = self.cache.begin(udn);
        self.invoker
            .invoke(
                &service,
                "SetVolume",
                &[("InstanceID", "0"), ("Channel", "Master"), ("DesiredVolume", desired.as_str())],
                self.config.action_timeout,
            )
            .await?;

        self.cache.commit(&ticket, |info| info.level = level);
        info!("Volume of {} set to {}", udn, level);
        Ok(level)
    }

    /// Mute or unmute
    pub async fn set_mute(&self, udn: &str, muted: bool) -> Result<()> {
        let service = self.rendering_control(udn)?;

        let ticket = self.cache.begin(udn);
        self.invoker
            .invoke(
                &service,
                "SetMute",
                &[
                    ("InstanceID", "0"),
                    ("Channel", "Master"),
                    ("DesiredMute", if muted { "1" } else { "0" }),
                ],
                self.config.action_timeout,
            )
            .await?;

        self.cache.commit(&ticket, |info| info.muted = muted);
        info!("{} {}", if muted { "Muted" } else { "Unmuted" }, udn);
        Ok(())
    }

    pub async fn get_volume(&self, udn: &str) -> Result<u8> {
        let service = self.rendering_control(udn)?;
        let ticket = self.cache.begin(udn);
        let level = self.query_volume(&service).await?;
        self.cache.commit(&ticket, |info| info.level = level);
        Ok(level)
    }

    pub async fn get_mute(&self, udn: &str) -> Result<bool> {
        let service = self.rendering_control(udn)?;
        let ticket = self.cache.begin(udn);
        let muted = self.query_mute(&service).await?;
        self.cache.commit(&ticket, |info| info.muted = muted);
        Ok(muted)
    }

    /// Volume and mute, queried concurrently
    pub async fn get_volume_info(&self, udn: &str) -> Result<VolumeInfo> {
        let service = self.rendering_control(udn)?;
        let ticket = self.cache.begin(udn);

        let (level, muted) = tokio::join!(self.query_volume(&service), self.query_mute(&service));
        let info = VolumeInfo {
            level: level?,
            muted: muted?,
        };

        self.cache.commit(&ticket, |cached| *cached = info);
        Ok(info)
    }

    async fn query_volume(&self, service: &Service) -> Result<u8> {
        let response = self
            .invoker
            .invoke(
                service,
                "GetVolume",
                &[("InstanceID", "0"), ("Channel", "Master")],
                self.config.query_timeout,
            )
            .await?;
        Ok(VolumeInfo::parse_level(response.get_or_empty("CurrentVolume")))
    }

    async fn query_mute(&self, service: &Service) -> Result<bool> {
        let response = self
            .invoker
            .invoke(
                service,
                "GetMute",
                &[("InstanceID", "0"), ("Channel", "Master")],
                self.config.query_timeout,
            )
            .await?;
        Ok(parse_upnp_bool(response.get_or_empty("CurrentMute")))
    }

    /// Apply an evented change through the same mapping polling uses
    pub fn apply_change(&self, udn: &str, change: &StateChange) {
        match change {
            StateChange::Volume(level) => {
                let level = *level;
                self.cache.update(udn, |info| info.level = level);
            }
            StateChange::Mute(muted) => {
                let muted = *muted;
                self.cache.update(udn, |info| info.muted = muted);
            }
            _ => {}
        }
    }

    pub fn forget(&self, udn: &str) {
        self.cache.remove(udn);
    }
}
