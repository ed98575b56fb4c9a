use super::description::DescriptionFetcher;
use super::ssdp::{SsdpAnnouncement, SsdpClient};
use crate::error::{ControlError, Result};
use crate::registry::{is_excluded_device_type, Announcement};
use std::collections::HashSet;
use std::time::Duration;

/// Search target covering every UPnP device
pub const SEARCH_ALL: &str = "ssdp:all";

/// Discovery service for finding DLNA media devices on the network
pub struct Discovery {
    timeout: Duration,
    fetcher: DescriptionFetcher,
}

impl Discovery {
    /// Create a new discovery service with the specified timeout
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            timeout,
            fetcher: DescriptionFetcher::new(timeout)?,
        })
    }

    /// Search for devices and resolve each response into an announcement.
    ///
    /// The result is not filtered by device type; the registry decides
    /// admission.
    pub async fn search(&self, search_target: &str) -> Result<Vec<Announcement>> {
        let client = SsdpClient::new(self.timeout).await.map_err(|e| {
            ControlError::DiscoveryFailed(format!("Failed to create SSDP client: {}", e))
        })?;

        let responses = client
            .search(search_target)
            .await
            .map_err(|e| ControlError::DiscoveryFailed(format!("SSDP search failed: {}", e)))?;

        let mut announcements = Vec::new();
        let mut seen_locations = HashSet::new();

        for response in responses {
            // Devices answer once per embedded device and service
            if !seen_locations.insert(response.location.clone()) {
                continue;
            }

            if is_excluded_device_type(&response.target) {
                log::debug!("Skipping {} ({})", response.location, response.target);
                continue;
            }

            match self.resolve(&response).await {
                Ok(announcement) => announcements.push(announcement),
                Err(e) => log::debug!("Could not resolve {}: {}", response.location, e),
            }
        }

        Ok(announcements)
    }

    /// Fetch the description behind an SSDP announcement
    pub async fn resolve(&self, response: &SsdpAnnouncement) -> Result<Announcement> {
        let device = self.fetcher.fetch_device(&response.location).await?;
        Ok(Announcement::new(device, response.max_age))
    }
}

/// Convenience function for a one-shot search with the default timeout
pub async fn discover_devices() -> Result<Vec<Announcement>> {
    discover_devices_with_timeout(Duration::from_secs(3)).await
}

pub async fn discover_devices_with_timeout(timeout: Duration) -> Result<Vec<Announcement>> {
    Discovery::new(timeout)?.search(SEARCH_ALL).await
}
