mod common;

use std::time::Duration;

use common::{control_point_with, renderer};
use dlna::model::{StateChange, VolumeInfo};
use dlna::ControlError;

const UDN: &str = "uuid:volume-1";

#[tokio::test]
async fn test_set_volume_clamps_before_sending() {
    let (control_point, transport) = control_point_with(renderer(UDN));
    let volume = control_point.volume();

    assert_eq!(volume.set_volume(UDN, 150).await.unwrap(), 100);
    let call = transport.last("SetVolume").unwrap();
    assert_eq!(call.arg("DesiredVolume"), Some("100"));
    assert_eq!(call.arg("Channel"), Some("Master"));
    assert_eq!(call.arg("InstanceID"), Some("0"));

    assert_eq!(volume.set_volume(UDN, -5).await.unwrap(), 0);
    assert_eq!(transport.last("SetVolume").unwrap().arg("DesiredVolume"), Some("0"));
    assert_eq!(volume.cached(UDN).map(|v| v.level), Some(0));
}

#[tokio::test]
async fn test_set_mute() {
    let (control_point, transport) = control_point_with(renderer(UDN));

    control_point.volume().set_mute(UDN, true).await.unwrap();
    assert_eq!(transport.last("SetMute").unwrap().arg("DesiredMute"), Some("1"));

    control_point.volume().set_mute(UDN, false).await.unwrap();
    assert_eq!(transport.last("SetMute").unwrap().arg("DesiredMute"), Some("0"));
    assert_eq!(control_point.volume().cached(UDN).map(|v| v.muted), Some(false));
}

#[tokio::test]
async fn test_volume_info_queries_concurrently() {
    let (control_point, transport) = control_point_with(renderer(UDN));
    transport.reply("GetVolume", &[("CurrentVolume", "37")]);
    transport.reply("GetMute", &[("CurrentMute", "1")]);
    transport.delay("GetVolume", Duration::from_millis(150));
    transport.delay("GetMute", Duration::from_millis(150));

    let started = tokio::time::Instant::now();
    let info = control_point.volume().get_volume_info(UDN).await.unwrap();

    assert_eq!(info, VolumeInfo { level: 37, muted: true });
    assert!(started.elapsed() < Duration::from_millis(290));
    assert_eq!(control_point.volume().cached(UDN), Some(info));
}

#[tokio::test]
async fn test_reported_volume_is_clamped() {
    let (control_point, transport) = control_point_with(renderer(UDN));
    transport.reply("GetVolume", &[("CurrentVolume", "250")]);
    assert_eq!(control_point.volume().get_volume(UDN).await.unwrap(), 100);

    transport.reply("GetVolume", &[("CurrentVolume", "loud")]);
    assert_eq!(control_point.volume().get_volume(UDN).await.unwrap(), 0);
}

#[tokio::test]
async fn test_volume_info_fails_when_either_query_fails() {
    let (control_point, transport) = control_point_with(renderer(UDN));
    transport.reply("GetVolume", &[("CurrentVolume", "20")]);
    transport.fault("GetMute", 402, "Invalid Args");

    let err = control_point.volume().get_volume_info(UDN).await.unwrap_err();
    assert!(matches!(err, ControlError::DeviceRejected { status: 402, .. }));
    assert_eq!(control_point.volume().cached(UDN).map(|v| v.level), Some(0));
}

#[tokio::test]
async fn test_evented_changes_update_cache() {
    let (control_point, _transport) = control_point_with(renderer(UDN));
    let volume = control_point.volume();

    volume.apply_change(UDN, &StateChange::Volume(64));
    volume.apply_change(UDN, &StateChange::Mute(true));
    assert_eq!(volume.cached(UDN), Some(VolumeInfo { level: 64, muted: true }));

    volume.forget(UDN);
    assert_eq!(volume.cached(UDN), None);
}
