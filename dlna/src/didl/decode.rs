use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::mime::content_format;
use crate::error::ControlError;
use crate::model::{AudioMetadata, ImageMetadata, MediaMetadata, SubtitleTrack, VideoMetadata};
use crate::time::try_parse_time_string;

/// A `<res>` element of a DIDL-Lite item
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DidlResource {
    pub uri: String,
    pub protocol_info: Option<String>,
    pub duration: Option<String>,
    pub bitrate: Option<u32>,
    pub resolution: Option<String>,
    pub size: Option<u64>,
}

impl DidlResource {
    /// MIME type from the resource's protocolInfo
    pub fn content_format(&self) -> Option<&str> {
        self.protocol_info.as_deref().and_then(content_format)
    }

    pub fn is_text(&self) -> bool {
        self.content_format()
            .map(|f| f.to_ascii_lowercase().starts_with("text/"))
            .unwrap_or(false)
    }
}

/// A DIDL-Lite `<item>` with the properties this crate reads
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DidlItem {
    pub id: Option<String>,
    pub parent_id: Option<String>,
    pub title: Option<String>,
    pub class: Option<String>,
    pub creator: Option<String>,
    pub artists: Vec<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub album_art_uri: Option<String>,
    pub description: Option<String>,
    pub date: Option<String>,
    pub original_track_number: Option<u32>,
    pub resources: Vec<DidlResource>,
}

impl DidlItem {
    /// First non-subtitle resource
    pub fn primary_resource(&self) -> Option<&DidlResource> {
        self.resources.iter().find(|r| !r.is_text())
    }

    fn class_contains(&self, needle: &str) -> bool {
        self.class.as_deref().map(|c| c.contains(needle)).unwrap_or(false)
    }

    fn set_property(&mut self, element: &str, text: String) {
        let text = text.trim().to_string();
        if text.is_empty() {
            return;
        }

        match element {
            "title" => self.title = Some(text),
            "class" => self.class = Some(text),
            "creator" => self.creator = Some(text),
            "artist" => self.artists.push(text),
            "album" => self.album = Some(text),
            "genre" => self.genre = Some(text),
            "albumArtURI" => self.album_art_uri = Some(text),
            "description" | "longDescription" => {
                if self.description.is_none() {
                    self.description = Some(text);
                }
            }
            "date" => self.date = Some(text),
            "originalTrackNumber" => self.original_track_number = text.parse().ok(),
            _ => {}
        }
    }
}

fn attribute(element: &BytesStart, name: &str) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|attr| attr.key.local_name().as_ref() == name.as_bytes())
        .and_then(|attr| attr.unescape_value().ok().map(|v| v.into_owned()))
}

fn resource_from(element: &BytesStart) -> DidlResource {
    DidlResource {
        uri: String::new(),
        protocol_info: attribute(element, "protocolInfo"),
        duration: attribute(element, "duration"),
        bitrate: attribute(element, "bitrate").and_then(|b| b.trim().parse().ok()),
        resolution: attribute(element, "resolution"),
        size: attribute(element, "size").and_then(|s| s.trim().parse().ok()),
    }
}

/// Parse every `<item>` of a DIDL-Lite document
pub fn parse_items(xml: &str) -> Result<Vec<DidlItem>, ControlError> {
    let mut reader = Reader::from_str(xml);

    let mut items = Vec::new();
    let mut item: Option<DidlItem> = None;
    let mut resource: Option<DidlResource> = None;
    let mut element: Option<String> = None;
    let mut text = String::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| ControlError::MetadataDecodingFailed(e.to_string()))?;

        match event {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                match name.as_str() {
                    "item" => {
                        item = Some(DidlItem {
                            id: attribute(&e, "id"),
                            parent_id: attribute(&e, "parentID"),
                            ..Default::default()
                        });
                    }
                    "res" if item.is_some() => resource = Some(resource_from(&e)),
                    _ if item.is_some() => element = Some(name),
                    _ => {}
                }
                text.clear();
            }
            Event::Empty(e) => {
                if e.local_name().as_ref() == b"res" {
                    if let Some(current) = item.as_mut() {
                        current.resources.push(resource_from(&e));
                    }
                }
            }
            Event::Text(t) => {
                match t.unescape() {
                    Ok(unescaped) => text.push_str(&unescaped),
                    Err(_) => {
                        let raw = String::from_utf8_lossy(&t).into_owned();
                        text.push_str(&html_escape::decode_html_entities(&raw));
                    }
                }
            }
            Event::CData(c) => text.push_str(&String::from_utf8_lossy(&c.into_inner())),
            Event::End(e) => {
                let name = e.local_name();
                match name.as_ref() {
                    b"item" => {
                        if let Some(done) = item.take() {
                            items.push(done);
                        }
                    }
                    b"res" => {
                        if let (Some(mut res), Some(current)) = (resource.take(), item.as_mut()) {
                            res.uri = text.trim().to_string();
                            current.resources.push(res);
                        }
                    }
                    _ => {
                        if let (Some(el), Some(current)) = (element.take(), item.as_mut()) {
                            current.set_property(&el, std::mem::take(&mut text));
                        }
                    }
                }
                text.clear();
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(items)
}

fn fallback(title: Option<String>) -> MediaMetadata {
    MediaMetadata::Audio(AudioMetadata {
        title: title.unwrap_or_else(|| "Unknown".to_string()),
        artist: Some("Unknown".to_string()),
        album: Some("Unknown".to_string()),
        ..Default::default()
    })
}

/// Decode the first item of a DIDL-Lite document.
///
/// Blank input or a document without items yields `None`. Unparseable input
/// yields a minimal fallback rather than an error.
pub fn decode(xml: &str) -> Option<MediaMetadata> {
    if xml.trim().is_empty() {
        return None;
    }

    let items = match parse_items(xml) {
        Ok(items) => items,
        Err(e) => {
            log::warn!("{}; using fallback metadata", e);
            return Some(fallback(None));
        }
    };

    let item = items.into_iter().next()?;
    Some(item_to_metadata(item))
}

fn item_to_metadata(item: DidlItem) -> MediaMetadata {
    let primary = item.primary_resource().cloned().unwrap_or_default();
    let duration = primary.duration.as_deref().and_then(try_parse_time_string);

    if item.class_contains("audioItem") {
        let artist = item.artists.first().cloned().or(item.creator);
        MediaMetadata::Audio(AudioMetadata {
            title: item.title.unwrap_or_else(|| "Unknown".to_string()),
            artist,
            album: item.album,
            genre: item.genre,
            duration,
            album_art_uri: item.album_art_uri,
            description: item.description,
            track_number: item.original_track_number,
        })
    } else if item.class_contains("videoItem") {
        MediaMetadata::Video(VideoMetadata {
            title: item.title.unwrap_or_else(|| "Unknown".to_string()),
            description: item.description,
            genre: item.genre,
            resolution: primary.resolution,
            duration,
            thumbnail_uri: item.album_art_uri,
            bitrate: primary.bitrate,
        })
    } else if item.class_contains("imageItem") {
        MediaMetadata::Image(ImageMetadata {
            title: item.title.unwrap_or_else(|| "Unknown".to_string()),
            description: item.description,
            resolution: primary.resolution,
            thumbnail_uri: item.album_art_uri,
            date: item.date,
        })
    } else {
        fallback(item.title)
    }
}

/// One subtitle track per `text/*` resource of the first item; the first
/// match is flagged as default
pub fn decode_subtitle_tracks(xml: &str) -> Vec<SubtitleTrack> {
    if xml.trim().is_empty() {
        return Vec::new();
    }

    let items = match parse_items(xml) {
        Ok(items) => items,
        Err(e) => {
            log::warn!("Cannot read subtitle tracks: {}", e);
            return Vec::new();
        }
    };

    let Some(item) = items.into_iter().next() else {
        return Vec::new();
    };

    item.resources
        .iter()
        .enumerate()
        .filter(|(_, res)| res.is_text())
        .enumerate()
        .map(|(n, (index, res))| SubtitleTrack {
            id: format!("track_{}", index),
            uri: res.uri.clone(),
            mime_type: res.content_format().unwrap_or("text/plain").to_string(),
            language: "unknown".to_string(),
            title: None,
            is_default: n == 0,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MUSIC_TRACK: &str = r#"<DIDL-Lite xmlns="urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/" xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:upnp="urn:schemas-upnp-org:metadata-1-0/upnp/">
      <item id="1" parentID="0" restricted="1">
        <dc:title>Song &amp; Dance</dc:title>
        <dc:creator>The Creators</dc:creator>
        <upnp:album>First Album</upnp:album>
        <upnp:genre>Rock</upnp:genre>
        <upnp:albumArtURI>http://x/art.jpg</upnp:albumArtURI>
        <upnp:originalTrackNumber>7</upnp:originalTrackNumber>
        <upnp:class>object.item.audioItem.musicTrack</upnp:class>
        <res protocolInfo="http-get:*:audio/mpeg:*" duration="0:03:25.000">http://x/song.mp3</res>
      </item>
    </DIDL-Lite>"#;

    #[test]
    fn test_parse_items() {
        let items = parse_items(MUSIC_TRACK).unwrap();
        assert_eq!(items.len(), 1);

        let item = &items[0];
        assert_eq!(item.id.as_deref(), Some("1"));
        assert_eq!(item.parent_id.as_deref(), Some("0"));
        assert_eq!(item.title.as_deref(), Some("Song & Dance"));
        assert_eq!(item.resources.len(), 1);
        assert_eq!(item.resources[0].uri, "http://x/song.mp3");
        assert_eq!(item.resources[0].content_format(), Some("audio/mpeg"));
    }

    #[test]
    fn test_decode_music_track() {
        let Some(MediaMetadata::Audio(audio)) = decode(MUSIC_TRACK) else {
            panic!("expected audio metadata");
        };

        assert_eq!(audio.title, "Song & Dance");
        assert_eq!(audio.artist.as_deref(), Some("The Creators"));
        assert_eq!(audio.album.as_deref(), Some("First Album"));
        assert_eq!(audio.genre.as_deref(), Some("Rock"));
        assert_eq!(audio.album_art_uri.as_deref(), Some("http://x/art.jpg"));
        assert_eq!(audio.track_number, Some(7));
        assert_eq!(audio.duration, Some(205));
    }

    #[test]
    fn test_decode_video_item() {
        let xml = r#"<DIDL-Lite xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:upnp="urn:schemas-upnp-org:metadata-1-0/upnp/">
          <item id="v" parentID="0">
            <dc:title>Clip</dc:title>
            <dc:description>A clip</dc:description>
            <upnp:class>object.item.videoItem.movie</upnp:class>
            <res protocolInfo="http-get:*:video/mp4:*" resolution="1920x1080" bitrate="500000" duration="01:30:00">http://x/clip.mp4</res>
            <res protocolInfo="http-get:*:text/srt:*">http://x/clip.srt</res>
          </item>
        </DIDL-Lite>"#;

        let Some(MediaMetadata::Video(video)) = decode(xml) else {
            panic!("expected video metadata");
        };

        assert_eq!(video.title, "Clip");
        assert_eq!(video.description.as_deref(), Some("A clip"));
        assert_eq!(video.resolution.as_deref(), Some("1920x1080"));
        assert_eq!(video.bitrate, Some(500_000));
        assert_eq!(video.duration, Some(5400));
    }

    #[test]
    fn test_decode_unknown_class_falls_back() {
        let xml = r#"<DIDL-Lite><item id="1"><dc:title>Thing</dc:title><upnp:class>object.item.playlistItem</upnp:class></item></DIDL-Lite>"#;

        let Some(MediaMetadata::Audio(audio)) = decode(xml) else {
            panic!("expected fallback audio metadata");
        };
        assert_eq!(audio.title, "Thing");
        assert_eq!(audio.artist.as_deref(), Some("Unknown"));
        assert_eq!(audio.album.as_deref(), Some("Unknown"));
    }

    #[test]
    fn test_decode_empty_and_itemless() {
        assert_eq!(decode(""), None);
        assert_eq!(decode("   "), None);
        assert_eq!(decode("<DIDL-Lite></DIDL-Lite>"), None);
    }

    #[test]
    fn test_decode_html_entity_keeps_other_properties() {
        let xml = MUSIC_TRACK.replace("Song &amp; Dance", "Late&nbsp;Night &eacute;dition");
        let Some(MediaMetadata::Audio(audio)) = decode(&xml) else {
            panic!("expected audio metadata");
        };

        assert_eq!(audio.title, "Late\u{a0}Night \u{e9}dition");
        assert_eq!(audio.artist.as_deref(), Some("The Creators"));
        assert_eq!(audio.album.as_deref(), Some("First Album"));
        assert_eq!(audio.duration, Some(205));
    }

    #[test]
    fn test_decode_malformed_yields_fallback() {
        let Some(MediaMetadata::Audio(audio)) = decode("<DIDL-Lite><item><dc:title>x</wrong></item>") else {
            panic!("expected fallback audio metadata");
        };
        assert_eq!(audio.title, "Unknown");
    }

    #[test]
    fn test_decode_subtitle_tracks() {
        let xml = r#"<DIDL-Lite><item id="1">
            <res protocolInfo="http-get:*:video/mp4:*">http://x/movie.mp4</res>
            <res protocolInfo="http-get:*:text/srt:DLNA.ORG_PN=TEXT_SRT">http://x/en.srt</res>
            <res protocolInfo="http-get:*:text/vtt:DLNA.ORG_PN=TEXT_VTT">http://x/fr.vtt</res>
        </item></DIDL-Lite>"#;

        let tracks = decode_subtitle_tracks(xml);

        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].id, "track_1");
        assert_eq!(tracks[0].uri, "http://x/en.srt");
        assert_eq!(tracks[0].mime_type, "text/srt");
        assert_eq!(tracks[0].language, "unknown");
        assert!(tracks[0].is_default);
        assert_eq!(tracks[1].id, "track_2");
        assert!(!tracks[1].is_default);
    }

    #[test]
    fn test_decode_subtitle_tracks_none() {
        assert!(decode_subtitle_tracks("").is_empty());
        assert!(decode_subtitle_tracks(MUSIC_TRACK).is_empty());
    }
}
