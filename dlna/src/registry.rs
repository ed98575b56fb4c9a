use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use crate::error::{ControlError, Result};
use crate::model::{Device, Service, ServiceKind, Udn};

/// Device types admitted by exact match
pub const MEDIA_DEVICE_TYPES: &[&str] = &[
    "urn:schemas-upnp-org:device:MediaRenderer:1",
    "urn:schemas-upnp-org:device:MediaRenderer:2",
    "urn:schemas-upnp-org:device:MediaRenderer:3",
    "urn:schemas-upnp-org:device:MediaServer:1",
    "urn:schemas-upnp-org:device:MediaServer:2",
    "urn:schemas-upnp-org:device:MediaServer:3",
    "urn:schemas-upnp-org:device:MediaServer:4",
];

const MEDIA_DEVICE_PREFIXES: &[&str] = &["MediaRenderer", "MediaServer"];

/// Checked before anything else; a match here always rejects
const EXCLUDED_DEVICE_TYPES: &[&str] = &["InternetGatewayDevice", "WANDevice", "LANDevice", "WFADevice"];

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_ascii_lowercase().contains(&needle.to_ascii_lowercase())
}

pub fn is_excluded_device_type(device_type: &str) -> bool {
    EXCLUDED_DEVICE_TYPES
        .iter()
        .any(|excluded| contains_ignore_case(device_type, excluded))
}

/// Whether a device type belongs to the MediaRenderer/MediaServer family
pub fn is_media_device_type(device_type: &str) -> bool {
    if is_excluded_device_type(device_type) {
        return false;
    }

    MEDIA_DEVICE_TYPES.contains(&device_type)
        || MEDIA_DEVICE_PREFIXES
            .iter()
            .any(|prefix| contains_ignore_case(device_type, prefix))
}

/// A resolved device announcement, ready for admission
#[derive(Debug, Clone, PartialEq)]
pub struct Announcement {
    pub device: Device,
    /// How long the announcement stays valid without renewal
    pub max_age: Duration,
}

impl Announcement {
    pub fn new(device: Device, max_age: Duration) -> Self {
        Self { device, max_age }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Added,
    Updated,
    Rejected,
}

#[derive(Debug, Clone)]
struct Entry {
    device: Device,
    expires_at: Instant,
}

/// The set of known media devices.
///
/// The registry is passive: expiry only happens when the owner calls
/// [`DeviceRegistry::sweep_expired`]. Clones share the same map.
pub struct DeviceRegistry {
    devices: Arc<RwLock<HashMap<Udn, Entry>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            devices: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Upsert keyed by UDN. Non-media device types are rejected.
    pub fn add_or_update(&self, announcement: Announcement, now: Instant) -> Admission {
        let device_type = &announcement.device.device_type;
        if !is_media_device_type(device_type) {
            log::debug!(
                "Rejecting {} ({}): not a media device",
                announcement.device.udn,
                device_type
            );
            return Admission::Rejected;
        }

        let udn = announcement.device.udn.clone();
        let entry = Entry {
            device: announcement.device,
            expires_at: now + announcement.max_age,
        };

        let mut devices = self.devices.write().unwrap_or_else(PoisonError::into_inner);
        match devices.insert(udn.clone(), entry) {
            Some(_) => {
                log::debug!("Updated device {}", udn);
                Admission::Updated
            }
            None => {
                log::info!("Added device {}", udn);
                Admission::Added
            }
        }
    }

    /// Removes a device. Removing an absent UDN is not an error; the return
    /// value tells whether anything was removed.
    pub fn remove(&self, udn: &str) -> bool {
        let removed = self
            .devices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(udn)
            .is_some();

        if removed {
            log::info!("Removed device {}", udn);
        }
        removed
    }

    pub fn get(&self, udn: &str) -> Result<Device> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(udn)
            .map(|entry| entry.device.clone())
            .ok_or_else(|| ControlError::DeviceNotFound(udn.to_string()))
    }

    pub fn contains(&self, udn: &str) -> bool {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(udn)
    }

    /// Snapshot of all known devices, in no particular order
    pub fn list(&self) -> Vec<Device> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|entry| entry.device.clone())
            .collect()
    }

    /// Resolve a service of a present device
    pub fn service(&self, udn: &str, kind: ServiceKind) -> Result<Service> {
        let device = self.get(udn)?;
        device
            .service(kind)
            .cloned()
            .ok_or_else(|| ControlError::ServiceNotFound {
                udn: udn.to_string(),
                service: kind.id().to_string(),
            })
    }

    pub fn has_service(&self, udn: &str, kind: ServiceKind) -> bool {
        self.service(udn, kind).is_ok()
    }

    /// Removes every device whose max-age elapsed strictly before `now`
    pub fn sweep_expired(&self, now: Instant) -> Vec<Udn> {
        let mut devices = self.devices.write().unwrap_or_else(PoisonError::into_inner);

        let expired: Vec<Udn> = devices
            .iter()
            .filter(|(_, entry)| now > entry.expires_at)
            .map(|(udn, _)| udn.clone())
            .collect();

        for udn in &expired {
            devices.remove(udn);
            log::info!("Device {} expired", udn);
        }

        expired
    }

    pub fn len(&self) -> usize {
        self.devices.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for DeviceRegistry {
    fn clone(&self) -> Self {
        Self {
            devices: self.devices.clone(),
        }
    }
}
