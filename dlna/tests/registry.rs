mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{control_point_with, device, renderer, RENDERER};
use dlna::model::{StateChange, TransportState, Udn};
use dlna::registry::{Admission, Announcement, DeviceRegistry};
use dlna::transport::ssdp::{SsdpAnnouncement, SsdpMessage};
use dlna::{ControlConfig, ControlError, ControlPoint, ServiceKind};
use warp::Filter;

#[test]
fn test_max_age_expiry() {
    let registry = DeviceRegistry::new();
    let announced_at = Instant::now();
    let announcement = Announcement::new(renderer("uuid:a"), Duration::from_secs(60));

    assert_eq!(registry.add_or_update(announcement, announced_at), Admission::Added);

    assert!(registry.sweep_expired(announced_at + Duration::from_secs(30)).is_empty());
    assert!(registry.sweep_expired(announced_at + Duration::from_secs(60)).is_empty());
    assert!(registry.contains("uuid:a"));

    let expired = registry.sweep_expired(announced_at + Duration::from_secs(61));
    assert_eq!(expired, vec![Udn::new("uuid:a")]);
    assert!(!registry.contains("uuid:a"));
}

#[test]
fn test_reannouncement_extends_expiry() {
    let registry = DeviceRegistry::new();
    let start = Instant::now();
    let max_age = Duration::from_secs(60);

    registry.add_or_update(Announcement::new(renderer("uuid:a"), max_age), start);
    let again = registry.add_or_update(
        Announcement::new(renderer("uuid:a"), max_age),
        start + Duration::from_secs(50),
    );
    assert_eq!(again, Admission::Updated);

    assert!(registry.sweep_expired(start + Duration::from_secs(100)).is_empty());
    assert_eq!(registry.sweep_expired(start + Duration::from_secs(111)).len(), 1);
}

#[test]
fn test_upsert_keeps_latest_name() {
    let registry = DeviceRegistry::new();
    let now = Instant::now();

    registry.add_or_update(common::announce(device("uuid:a", "Kitchen", RENDERER)), now);
    registry.add_or_update(common::announce(device("uuid:a", "Kitchen Speaker", RENDERER)), now);

    let devices = registry.list();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].friendly_name, "Kitchen Speaker");
}

#[test]
fn test_device_type_filter() {
    let registry = DeviceRegistry::new();
    let now = Instant::now();

    let admitted = registry.add_or_update(common::announce(renderer("uuid:renderer")), now);
    assert_eq!(admitted, Admission::Added);

    let gateway = device(
        "uuid:gateway",
        "Router",
        "urn:schemas-upnp-org:device:InternetGatewayDevice:1:MediaRenderer",
    );
    assert_eq!(registry.add_or_update(common::announce(gateway), now), Admission::Rejected);

    let printer = device("uuid:printer", "Printer", "urn:schemas-upnp-org:device:Printer:1");
    assert_eq!(registry.add_or_update(common::announce(printer), now), Admission::Rejected);

    assert_eq!(registry.len(), 1);
}

#[test]
fn test_lookups() {
    let registry = DeviceRegistry::new();
    registry.add_or_update(common::announce(renderer("uuid:a")), Instant::now());

    assert_eq!(registry.get("uuid:a").unwrap().friendly_name, "Living Room");
    assert!(matches!(registry.get("uuid:b"), Err(ControlError::DeviceNotFound(_))));

    let service = registry.service("uuid:a", ServiceKind::RenderingControl).unwrap();
    assert_eq!(service.short_id(), "RenderingControl");
    assert!(matches!(
        registry.service("uuid:a", ServiceKind::ContentDirectory),
        Err(ControlError::ServiceNotFound { .. })
    ));
    assert!(!registry.has_service("uuid:b", ServiceKind::AVTransport));
}

#[test]
fn test_remove_absent_device_is_not_an_error() {
    let registry = DeviceRegistry::new();
    assert!(!registry.remove("uuid:nobody"));

    registry.add_or_update(common::announce(renderer("uuid:a")), Instant::now());
    assert!(registry.remove("uuid:a"));
    assert!(registry.is_empty());
}

#[test]
fn test_clones_share_state() {
    let registry = DeviceRegistry::new();
    let view = registry.clone();

    registry.add_or_update(common::announce(renderer("uuid:a")), Instant::now());
    assert!(view.contains("uuid:a"));
}

#[tokio::test]
async fn test_byebye_forgets_cached_state() {
    let (control_point, _transport) = control_point_with(renderer("uuid:a"));
    control_point
        .media()
        .apply_change("uuid:a", &StateChange::TransportState(TransportState::Playing));
    assert_eq!(control_point.media().cached_state("uuid:a"), TransportState::Playing);

    control_point
        .handle_ssdp(SsdpMessage::ByeBye {
            udn: Udn::new("uuid:a"),
            usn: "uuid:a::urn:schemas-upnp-org:device:MediaRenderer:1".to_string(),
            target: RENDERER.to_string(),
        })
        .await
        .unwrap();

    assert!(control_point.devices().is_empty());
    assert_eq!(control_point.media().cached_state("uuid:a"), TransportState::Stopped);
}

#[tokio::test]
async fn test_alive_for_known_device_refreshes_without_fetch() {
    let (control_point, _transport) = control_point_with(renderer("uuid:a"));

    let admission = control_point
        .handle_ssdp(SsdpMessage::Alive(SsdpAnnouncement {
            location: "http://192.168.1.50:49152/description.xml".to_string(),
            target: RENDERER.to_string(),
            usn: "uuid:a::urn:schemas-upnp-org:device:MediaRenderer:1".to_string(),
            udn: Udn::new("uuid:a"),
            server: None,
            max_age: Duration::from_secs(900),
        }))
        .await
        .unwrap();

    assert_eq!(admission, Admission::Updated);
}

#[tokio::test]
async fn test_alive_from_excluded_type_is_ignored() {
    let (control_point, transport) = control_point_with(renderer("uuid:a"));

    let admission = control_point
        .handle_ssdp(SsdpMessage::Alive(SsdpAnnouncement {
            location: "http://192.168.1.1:5000/rootDesc.xml".to_string(),
            target: "urn:schemas-upnp-org:device:InternetGatewayDevice:1".to_string(),
            usn: "uuid:gw::urn:schemas-upnp-org:device:InternetGatewayDevice:1".to_string(),
            udn: Udn::new("uuid:gw"),
            server: None,
            max_age: Duration::from_secs(1800),
        }))
        .await
        .unwrap();

    assert_eq!(admission, Admission::Rejected);
    assert_eq!(control_point.devices().len(), 1);
    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn test_sweep_through_control_point() {
    let (control_point, _transport) = control_point_with(renderer("uuid:a"));

    let expired = control_point
        .sweep_expired(Instant::now() + Duration::from_secs(3600))
        .await;
    assert_eq!(expired, vec![Udn::new("uuid:a")]);
    assert!(control_point.devices().is_empty());
}

const PRINTER_DESCRIPTION: &str = r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
  <device>
    <deviceType>urn:schemas-upnp-org:device:Printer:1</deviceType>
    <friendlyName>Office Printer</friendlyName>
    <UDN>uuid:printer</UDN>
  </device>
</root>"#;

/// Serves the printer description on loopback and counts the requests
fn serve_printer_description() -> (String, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let route = warp::path("desc.xml").map(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        PRINTER_DESCRIPTION
    });

    let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);
    (format!("http://{}/desc.xml", addr), hits)
}

fn printer_alive(location: &str, max_age: Duration) -> SsdpMessage {
    SsdpMessage::Alive(SsdpAnnouncement {
        location: location.to_string(),
        target: "upnp:rootdevice".to_string(),
        usn: "uuid:printer::upnp:rootdevice".to_string(),
        udn: Udn::new("uuid:printer"),
        server: None,
        max_age,
    })
}

#[tokio::test]
async fn test_rejected_device_is_fetched_once_per_announcement() {
    let (location, hits) = serve_printer_description();
    let control_point = ControlPoint::new(ControlConfig::fast()).unwrap();

    for _ in 0..3 {
        let admission = control_point
            .handle_ssdp(printer_alive(&location, Duration::from_secs(1800)))
            .await
            .unwrap();
        assert_eq!(admission, Admission::Rejected);
    }

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(control_point.devices().is_empty());
}

#[tokio::test]
async fn test_rejected_device_is_fetched_again_after_expiry() {
    let (location, hits) = serve_printer_description();
    let control_point = ControlPoint::new(ControlConfig::fast()).unwrap();

    control_point
        .handle_ssdp(printer_alive(&location, Duration::ZERO))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    control_point.sweep_expired(Instant::now()).await;

    control_point
        .handle_ssdp(printer_alive(&location, Duration::ZERO))
        .await
        .unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}
