/// Descriptive metadata for a media item, one variant per DIDL-Lite class
#[derive(Debug, Clone, PartialEq)]
pub enum MediaMetadata {
  Audio(AudioMetadata),
  Video(VideoMetadata),
  Image(ImageMetadata),
  /// Title only; the item class is inferred from the media URI
  Generic { title: String },
}

impl MediaMetadata {
  pub fn title(&self) -> &str {
    match self {
      MediaMetadata::Audio(m) => &m.title,
      MediaMetadata::Video(m) => &m.title,
      MediaMetadata::Image(m) => &m.title,
      MediaMetadata::Generic { title } => title,
    }
  }

  pub fn kind(&self) -> Option<MediaKind> {
    match self {
      MediaMetadata::Audio(_) => Some(MediaKind::Audio),
      MediaMetadata::Video(_) => Some(MediaKind::Video),
      MediaMetadata::Image(_) => Some(MediaKind::Image),
      MediaMetadata::Generic { .. } => None,
    }
  }
}

impl From<AudioMetadata> for MediaMetadata {
  fn from(m: AudioMetadata) -> Self {
    MediaMetadata::Audio(m)
  }
}

impl From<VideoMetadata> for MediaMetadata {
  fn from(m: VideoMetadata) -> Self {
    MediaMetadata::Video(m)
  }
}

impl From<ImageMetadata> for MediaMetadata {
  fn from(m: ImageMetadata) -> Self {
    MediaMetadata::Image(m)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
  Audio,
  Video,
  Image,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioMetadata {
  pub title: String,
  pub artist: Option<String>,
  pub album: Option<String>,
  pub genre: Option<String>,
  /// Duration in seconds
  pub duration: Option<u64>,
  pub album_art_uri: Option<String>,
  pub description: Option<String>,
  pub track_number: Option<u32>,
}

impl AudioMetadata {
  pub fn new(title: impl Into<String>) -> Self {
    Self { title: title.into(), ..Default::default() }
  }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoMetadata {
  pub title: String,
  pub description: Option<String>,
  pub genre: Option<String>,
  /// `WIDTHxHEIGHT`
  pub resolution: Option<String>,
  pub duration: Option<u64>,
  pub thumbnail_uri: Option<String>,
  /// Bytes per second, as carried by the DIDL-Lite `res@bitrate` attribute
  pub bitrate: Option<u32>,
}

impl VideoMetadata {
  pub fn new(title: impl Into<String>) -> Self {
    Self { title: title.into(), ..Default::default() }
  }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageMetadata {
  pub title: String,
  pub description: Option<String>,
  pub resolution: Option<String>,
  pub thumbnail_uri: Option<String>,
  pub date: Option<String>,
}

impl ImageMetadata {
  pub fn new(title: impl Into<String>) -> Self {
    Self { title: title.into(), ..Default::default() }
  }
}

/// A subtitle resource attached to a media item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleTrack {
  pub id: String,
  pub uri: String,
  pub mime_type: String,
  pub language: String,
  pub title: Option<String>,
  pub is_default: bool,
}

impl SubtitleTrack {
  pub fn new(id: impl Into<String>, uri: impl Into<String>, mime_type: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      uri: uri.into(),
      mime_type: mime_type.into(),
      language: "unknown".to_string(),
      title: None,
      is_default: false,
    }
  }
}
