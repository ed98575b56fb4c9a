use crate::model::MediaKind;

const AUDIO_TYPES: &[(&str, &str)] = &[
  ("mp3", "audio/mpeg"),
  ("wav", "audio/wav"),
  ("flac", "audio/flac"),
  ("aac", "audio/aac"),
  ("m4a", "audio/mp4"),
  ("ogg", "audio/ogg"),
  ("wma", "audio/x-ms-wma"),
];

const VIDEO_TYPES: &[(&str, &str)] = &[
  ("mp4", "video/mp4"),
  ("avi", "video/x-msvideo"),
  ("mkv", "video/x-matroska"),
  ("mov", "video/quicktime"),
  ("wmv", "video/x-ms-wmv"),
  ("flv", "video/x-flv"),
  ("webm", "video/webm"),
  ("m4v", "video/mp4"),
];

const IMAGE_TYPES: &[(&str, &str)] = &[
  ("jpg", "image/jpeg"),
  ("jpeg", "image/jpeg"),
  ("png", "image/png"),
  ("gif", "image/gif"),
  ("bmp", "image/bmp"),
  ("webp", "image/webp"),
  ("tiff", "image/tiff"),
  ("tif", "image/tiff"),
];

fn table(kind: MediaKind) -> &'static [(&'static str, &'static str)] {
  match kind {
    MediaKind::Audio => AUDIO_TYPES,
    MediaKind::Video => VIDEO_TYPES,
    MediaKind::Image => IMAGE_TYPES,
  }
}

pub fn default_mime_type(kind: MediaKind) -> &'static str {
  match kind {
    MediaKind::Audio => "audio/mpeg",
    MediaKind::Video => "video/mp4",
    MediaKind::Image => "image/jpeg",
  }
}

/// Lowercased file extension of a URI, ignoring query and fragment
pub fn extension(uri: &str) -> Option<String> {
  let path = uri.split(|c: char| c == '?' || c == '#').next().unwrap_or(uri);
  let file = path.rsplit('/').next()?;
  let (_, ext) = file.rsplit_once('.')?;
  if ext.is_empty() {
    return None;
  }
  Some(ext.to_ascii_lowercase())
}

/// MIME type for `uri` within a media kind, falling back to the kind's default
pub fn mime_type_for(uri: &str, kind: MediaKind) -> &'static str {
  extension(uri)
    .and_then(|ext| {
      table(kind)
        .iter()
        .find(|(known, _)| *known == ext)
        .map(|(_, mime)| *mime)
    })
    .unwrap_or_else(|| default_mime_type(kind))
}

/// The media kind whose table knows the URI's extension
pub fn infer_kind(uri: &str) -> Option<MediaKind> {
  let ext = extension(uri)?;
  [MediaKind::Audio, MediaKind::Video, MediaKind::Image]
    .into_iter()
    .find(|kind| table(*kind).iter().any(|(known, _)| *known == ext))
}

/// Media kind from a MIME type's top-level type
pub fn kind_of_mime(mime: &str) -> Option<MediaKind> {
  let mime = mime.trim().to_ascii_lowercase();
  if mime.starts_with("audio/") {
    Some(MediaKind::Audio)
  } else if mime.starts_with("video/") {
    Some(MediaKind::Video)
  } else if mime.starts_with("image/") {
    Some(MediaKind::Image)
  } else {
    None
  }
}

pub fn protocol_info(mime: &str) -> String {
  format!("http-get:*:{}:*", mime)
}

/// protocolInfo for a subtitle resource, selecting a DLNA profile when known
pub fn subtitle_protocol_info(mime: &str) -> String {
  let lower = mime.to_ascii_lowercase();
  if lower.contains("srt") {
    "http-get:*:text/srt:DLNA.ORG_PN=TEXT_SRT".to_string()
  } else if lower.contains("vtt") {
    "http-get:*:text/vtt:DLNA.ORG_PN=TEXT_VTT".to_string()
  } else if lower.contains("sub") {
    "http-get:*:text/sub:*".to_string()
  } else if lower.contains("ass") {
    "http-get:*:text/ass:*".to_string()
  } else {
    protocol_info(mime)
  }
}

/// Third field of a protocolInfo string (`protocol:network:contentFormat:info`)
pub fn content_format(protocol_info: &str) -> Option<&str> {
  protocol_info.split(':').nth(2).filter(|f| !f.is_empty())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_extension() {
    assert_eq!(extension("http://x/a.MP3"), Some("mp3".to_string()));
    assert_eq!(extension("http://x/movie.mkv?token=a.b#t=10"), Some("mkv".to_string()));
    assert_eq!(extension("http://x/stream"), None);
    assert_eq!(extension("http://x/dir.d/"), None);
  }

  #[test]
  fn test_mime_type_for() {
    assert_eq!(mime_type_for("http://x/a.flac", MediaKind::Audio), "audio/flac");
    assert_eq!(mime_type_for("http://x/a.m4a", MediaKind::Audio), "audio/mp4");
    assert_eq!(mime_type_for("http://x/a.mov", MediaKind::Video), "video/quicktime");
    assert_eq!(mime_type_for("http://x/a.tif", MediaKind::Image), "image/tiff");
  }

  #[test]
  fn test_mime_type_for_unknown_extension_uses_default() {
    assert_eq!(mime_type_for("http://x/a.xyz", MediaKind::Audio), "audio/mpeg");
    assert_eq!(mime_type_for("http://x/live", MediaKind::Video), "video/mp4");
    assert_eq!(mime_type_for("http://x/a.mp3", MediaKind::Image), "image/jpeg");
  }

  #[test]
  fn test_infer_kind() {
    assert_eq!(infer_kind("http://x/a.ogg"), Some(MediaKind::Audio));
    assert_eq!(infer_kind("http://x/a.webm"), Some(MediaKind::Video));
    assert_eq!(infer_kind("http://x/a.jpeg"), Some(MediaKind::Image));
    assert_eq!(infer_kind("http://x/a.txt"), None);
  }

  #[test]
  fn test_subtitle_protocol_info() {
    assert_eq!(subtitle_protocol_info("text/srt"), "http-get:*:text/srt:DLNA.ORG_PN=TEXT_SRT");
    assert_eq!(subtitle_protocol_info("application/x-subrip+srt"), "http-get:*:text/srt:DLNA.ORG_PN=TEXT_SRT");
    assert_eq!(subtitle_protocol_info("text/vtt"), "http-get:*:text/vtt:DLNA.ORG_PN=TEXT_VTT");
    assert_eq!(subtitle_protocol_info("text/x-ssa"), "http-get:*:text/x-ssa:*");
    assert_eq!(subtitle_protocol_info("text/ass"), "http-get:*:text/ass:*");
  }

  #[test]
  fn test_content_format() {
    assert_eq!(content_format("http-get:*:audio/mpeg:*"), Some("audio/mpeg"));
    assert_eq!(content_format("http-get:*:text/srt:DLNA.ORG_PN=TEXT_SRT"), Some("text/srt"));
    assert_eq!(content_format("bogus"), None);
  }
}
