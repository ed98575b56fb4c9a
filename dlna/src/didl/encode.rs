use std::fmt::Write;

use quick_xml::escape::escape;
use url::Url;

use super::mime::{infer_kind, mime_type_for, protocol_info, subtitle_protocol_info};
use super::{DC_NS, DIDL_NS, DLNA_NS, UPNP_NS};
use crate::error::ControlError;
use crate::model::{AudioMetadata, ImageMetadata, MediaKind, MediaMetadata, SubtitleTrack, VideoMetadata};
use crate::time::format_seconds;

const AUDIO_CLASS: &str = "object.item.audioItem.musicTrack";
const VIDEO_CLASS: &str = "object.item.videoItem";
const IMAGE_CLASS: &str = "object.item.imageItem";
const GENERIC_CLASS: &str = "object.item";

/// Encode metadata for `uri` as a DIDL-Lite document.
///
/// Returns an empty string, which devices accept as "no metadata", when the
/// document cannot be built.
pub fn encode(metadata: Option<&MediaMetadata>, uri: &str, subtitles: &[SubtitleTrack]) -> String {
  match try_encode(metadata, uri, subtitles) {
    Ok(didl) => didl,
    Err(e) => {
      log::warn!("{}", e);
      String::new()
    }
  }
}

pub fn try_encode(metadata: Option<&MediaMetadata>, uri: &str, subtitles: &[SubtitleTrack]) -> Result<String, ControlError> {
  if uri.trim().is_empty() {
    return Err(ControlError::MetadataEncodingFailed("media URI is empty".to_string()));
  }

  let mut item = String::new();
  write_item_body(&mut item, metadata, uri).map_err(|e| ControlError::MetadataEncodingFailed(e.to_string()))?;

  for track in subtitles {
    if track.uri.trim().is_empty() {
      log::warn!("Skipping subtitle track {} without URI", track.id);
      continue;
    }
    write!(
      item,
      "<res protocolInfo=\"{}\">{}</res>",
      escape(subtitle_protocol_info(&track.mime_type).as_str()),
      escape(track.uri.as_str())
    )
    .map_err(|e| ControlError::MetadataEncodingFailed(e.to_string()))?;
  }

  Ok(format!(
    "<DIDL-Lite xmlns=\"{}\" xmlns:dc=\"{}\" xmlns:upnp=\"{}\" xmlns:dlna=\"{}\">\
     <item id=\"{}\" parentID=\"0\" restricted=\"1\">{}</item></DIDL-Lite>",
    DIDL_NS,
    DC_NS,
    UPNP_NS,
    DLNA_NS,
    uuid::Uuid::new_v4(),
    item
  ))
}

fn write_item_body(out: &mut String, metadata: Option<&MediaMetadata>, uri: &str) -> std::fmt::Result {
  match metadata {
    Some(MediaMetadata::Audio(audio)) => write_audio(out, audio, uri),
    Some(MediaMetadata::Video(video)) => write_video(out, video, uri),
    Some(MediaMetadata::Image(image)) => write_image(out, image, uri),
    Some(MediaMetadata::Generic { title }) => write_generic(out, title, uri),
    None => write_generic(out, &title_from_uri(uri), uri),
  }
}

fn write_element(out: &mut String, name: &str, value: &str) -> std::fmt::Result {
  write!(out, "<{}>{}</{}>", name, escape(value), name)
}

fn write_optional(out: &mut String, name: &str, value: Option<&str>) -> std::fmt::Result {
  match value.map(str::trim).filter(|v| !v.is_empty()) {
    Some(value) => write_element(out, name, value),
    None => Ok(()),
  }
}

/// Writes an art/thumbnail URI, dropping values that are not absolute URLs
fn write_uri(out: &mut String, name: &str, value: Option<&str>) -> std::fmt::Result {
  let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
    return Ok(());
  };
  if !is_absolute_url(value) {
    log::warn!("Omitting invalid {} {:?}", name, value);
    return Ok(());
  }
  write_element(out, name, value)
}

fn write_resource(
  out: &mut String,
  uri: &str,
  mime: &str,
  duration: Option<u64>,
  bitrate: Option<u32>,
  resolution: Option<&str>,
) -> std::fmt::Result {
  write!(out, "<res protocolInfo=\"{}\"", escape(protocol_info(mime).as_str()))?;
  if let Some(duration) = duration {
    write!(out, " duration=\"{}\"", format_seconds(duration))?;
  }
  if let Some(bitrate) = bitrate {
    write!(out, " bitrate=\"{}\"", bitrate)?;
  }
  if let Some(resolution) = resolution.map(str::trim).filter(|r| is_resolution(r)) {
    write!(out, " resolution=\"{}\"", escape(resolution))?;
  }
  write!(out, ">{}</res>", escape(uri))
}

fn write_audio(out: &mut String, audio: &AudioMetadata, uri: &str) -> std::fmt::Result {
  let artist = audio.artist.as_deref().filter(|a| !a.trim().is_empty()).unwrap_or("Unknown Artist");
  let album = audio.album.as_deref().filter(|a| !a.trim().is_empty()).unwrap_or("Unknown Album");

  write_element(out, "dc:title", &audio.title)?;
  write_element(out, "upnp:class", AUDIO_CLASS)?;
  write_element(out, "dc:creator", artist)?;
  write_element(out, "upnp:artist", artist)?;
  write_element(out, "upnp:album", album)?;
  write_optional(out, "upnp:genre", audio.genre.as_deref())?;
  write_uri(out, "upnp:albumArtURI", audio.album_art_uri.as_deref())?;
  write_optional(out, "dc:description", audio.description.as_deref())?;
  if let Some(track) = audio.track_number {
    write!(out, "<upnp:originalTrackNumber>{}</upnp:originalTrackNumber>", track)?;
  }
  write_resource(out, uri, mime_type_for(uri, MediaKind::Audio), audio.duration, None, None)
}

fn write_video(out: &mut String, video: &VideoMetadata, uri: &str) -> std::fmt::Result {
  write_element(out, "dc:title", &video.title)?;
  write_element(out, "upnp:class", VIDEO_CLASS)?;
  write_optional(out, "upnp:genre", video.genre.as_deref())?;
  write_optional(out, "dc:description", video.description.as_deref())?;
  write_uri(out, "upnp:albumArtURI", video.thumbnail_uri.as_deref())?;
  write_resource(
    out,
    uri,
    mime_type_for(uri, MediaKind::Video),
    video.duration,
    video.bitrate,
    video.resolution.as_deref(),
  )
}

fn write_image(out: &mut String, image: &ImageMetadata, uri: &str) -> std::fmt::Result {
  write_element(out, "dc:title", &image.title)?;
  write_element(out, "upnp:class", IMAGE_CLASS)?;
  write_optional(out, "dc:description", image.description.as_deref())?;
  write_optional(out, "dc:date", image.date.as_deref())?;
  write_uri(out, "upnp:albumArtURI", image.thumbnail_uri.as_deref())?;
  write_resource(out, uri, mime_type_for(uri, MediaKind::Image), None, None, image.resolution.as_deref())
}

/// Class and MIME type follow the URI's extension when it is recognized
fn write_generic(out: &mut String, title: &str, uri: &str) -> std::fmt::Result {
  let (class, mime) = match infer_kind(uri) {
    Some(MediaKind::Audio) => (AUDIO_CLASS, mime_type_for(uri, MediaKind::Audio)),
    Some(MediaKind::Video) => (VIDEO_CLASS, mime_type_for(uri, MediaKind::Video)),
    Some(MediaKind::Image) => (IMAGE_CLASS, mime_type_for(uri, MediaKind::Image)),
    None => (GENERIC_CLASS, "*"),
  };

  write_element(out, "dc:title", title)?;
  write_element(out, "upnp:class", class)?;
  write_resource(out, uri, mime, None, None, None)
}

fn title_from_uri(uri: &str) -> String {
  uri.split(|c: char| c == '?' || c == '#')
    .next()
    .and_then(|path| path.rsplit('/').next())
    .filter(|name| !name.is_empty())
    .unwrap_or("Unknown")
    .to_string()
}

fn is_absolute_url(value: &str) -> bool {
  !value.chars().any(char::is_whitespace) && Url::parse(value).is_ok_and(|url| url.has_host())
}

fn is_resolution(value: &str) -> bool {
  match value.split_once('x') {
    Some((w, h)) => w.parse::<u32>().is_ok() && h.parse::<u32>().is_ok(),
    None => false,
  }
}
