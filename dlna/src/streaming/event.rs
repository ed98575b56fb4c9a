//! Decoding of GENA `NOTIFY` bodies.
//!
//! A body is an `e:propertyset` whose `e:property` children each carry one
//! state variable. AVTransport and RenderingControl wrap their variables in a
//! single `LastChange` property holding an escaped `<Event>` document, where
//! each variable is an element inside `InstanceID` with a `val` attribute.

use std::borrow::Cow;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::subscription::{SubscriptionError, SubscriptionResult};
use crate::model::StateChange;

/// Decodes a NOTIFY body into the state changes it carries, in document order
pub fn parse_property_set(xml: &str) -> SubscriptionResult<Vec<StateChange>> {
    let mut changes = Vec::new();
    for (name, value) in read_properties(xml)? {
        if name == "LastChange" {
            changes.extend(parse_last_change(&value)?);
        } else if let Some(change) = StateChange::from_variable(&name, &value) {
            changes.push(change);
        }
    }
    Ok(changes)
}

/// Decodes a `LastChange` value. Only `InstanceID` 0 is read; volume and mute
/// are taken from the `Master` channel.
pub fn parse_last_change(xml: &str) -> SubscriptionResult<Vec<StateChange>> {
    let xml = unescape_nested(xml);
    let mut reader = Reader::from_str(&xml);
    reader.config_mut().trim_text(true);

    let mut changes = Vec::new();
    let mut instance: Option<String> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.local_name().as_ref() == b"InstanceID" => {
                instance = Some(attribute(&e, "val")?.unwrap_or_default());
            }
            Event::End(e) if e.local_name().as_ref() == b"InstanceID" => instance = None,
            Event::Start(e) | Event::Empty(e) => {
                if instance.as_deref().map(str::trim) != Some("0") {
                    continue;
                }
                if let Some(change) = variable_change(&e)? {
                    changes.push(change);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(changes)
}

fn variable_change(e: &BytesStart) -> SubscriptionResult<Option<StateChange>> {
    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
    let Some(value) = attribute(e, "val")? else {
        return Ok(None);
    };

    if matches!(name.as_str(), "Volume" | "Mute") {
        let channel = attribute(e, "channel")?;
        if channel.is_some_and(|c| !c.eq_ignore_ascii_case("Master")) {
            return Ok(None);
        }
    }

    Ok(StateChange::from_variable(&name, &value))
}

/// Reads `(name, text)` for every `e:property` child
fn read_properties(xml: &str) -> SubscriptionResult<Vec<(String, String)>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut properties = Vec::new();
    let mut in_property = false;
    let mut current: Option<String> = None;
    let mut text = String::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.local_name();
                if name.as_ref() == b"property" {
                    in_property = true;
                } else if in_property && current.is_none() {
                    current = Some(String::from_utf8_lossy(name.as_ref()).into_owned());
                    text.clear();
                }
            }
            Event::Empty(e) => {
                if in_property && current.is_none() {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    properties.push((name, String::new()));
                }
            }
            Event::Text(t) => {
                if current.is_some() {
                    match t.unescape() {
                        Ok(value) => text.push_str(&value),
                        // Devices occasionally send HTML entities XML does not define
                        Err(_) => {
                            let raw = String::from_utf8_lossy(&t).into_owned();
                            text.push_str(&html_escape::decode_html_entities(&raw));
                        }
                    }
                }
            }
            Event::CData(c) => {
                if current.is_some() {
                    text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::End(e) => {
                let name = e.local_name();
                if name.as_ref() == b"property" {
                    in_property = false;
                } else if current.as_deref().map(str::as_bytes) == Some(name.as_ref()) {
                    if let Some(name) = current.take() {
                        properties.push((name, std::mem::take(&mut text)));
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(properties)
}

fn attribute(e: &BytesStart, name: &str) -> SubscriptionResult<Option<String>> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| SubscriptionError::XmlParseError(err.to_string()))?;
        if attr.key.local_name().as_ref().eq_ignore_ascii_case(name.as_bytes()) {
            let value = attr
                .unescape_value()
                .map(Cow::into_owned)
                .unwrap_or_else(|_| {
                    html_escape::decode_html_entities(&String::from_utf8_lossy(&attr.value)).into_owned()
                });
            return Ok(Some(value));
        }
    }
    Ok(None)
}

/// Some renderers escape the LastChange document twice
fn unescape_nested(xml: &str) -> Cow<'_, str> {
    let trimmed = xml.trim_start();
    if trimmed.starts_with("&lt;") {
        html_escape::decode_html_entities(trimmed)
    } else {
        Cow::Borrowed(xml)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MediaMetadata, TransportState};

    const AVT_EVENT: &str = r#"<?xml version="1.0"?>
<e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0">
  <e:property>
    <LastChange>&lt;Event xmlns=&quot;urn:schemas-upnp-org:metadata-1-0/AVT/&quot;&gt;&lt;InstanceID val=&quot;0&quot;&gt;&lt;TransportState val=&quot;PLAYING&quot;/&gt;&lt;CurrentTrackURI val=&quot;http://x/a.mp3&quot;/&gt;&lt;CurrentTrackMetaData val=&quot;&amp;lt;DIDL-Lite xmlns=&amp;quot;urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/&amp;quot; xmlns:dc=&amp;quot;http://purl.org/dc/elements/1.1/&amp;quot; xmlns:upnp=&amp;quot;urn:schemas-upnp-org:metadata-1-0/upnp/&amp;quot;&amp;gt;&amp;lt;item id=&amp;quot;1&amp;quot; parentID=&amp;quot;0&amp;quot; restricted=&amp;quot;1&amp;quot;&amp;gt;&amp;lt;dc:title&amp;gt;Song&amp;lt;/dc:title&amp;gt;&amp;lt;upnp:class&amp;gt;object.item.audioItem.musicTrack&amp;lt;/upnp:class&amp;gt;&amp;lt;/item&amp;gt;&amp;lt;/DIDL-Lite&amp;gt;&quot;/&gt;&lt;/InstanceID&gt;&lt;/Event&gt;</LastChange>
  </e:property>
</e:propertyset>"#;

    #[test]
    fn test_parse_av_transport_last_change() {
        let changes = parse_property_set(AVT_EVENT).unwrap();

        assert_eq!(changes.len(), 3);
        assert_eq!(changes[0], StateChange::TransportState(TransportState::Playing));
        assert_eq!(changes[1], StateChange::CurrentTrackUri("http://x/a.mp3".to_string()));
        match &changes[2] {
            StateChange::CurrentTrackMetadata(Some(MediaMetadata::Audio(audio))) => assert_eq!(audio.title, "Song"),
            other => panic!("unexpected change {:?}", other),
        }
    }

    #[test]
    fn test_parse_rendering_control_master_channel_only() {
        let last_change = r#"<Event xmlns="urn:schemas-upnp-org:metadata-1-0/RCS/">
  <InstanceID val="0">
    <Volume channel="LF" val="10"/>
    <Volume channel="Master" val="42"/>
    <Mute channel="Master" val="1"/>
  </InstanceID>
</Event>"#;

        let changes = parse_last_change(last_change).unwrap();
        assert_eq!(changes, vec![StateChange::Volume(42), StateChange::Mute(true)]);
    }

    #[test]
    fn test_parse_ignores_other_instances() {
        let last_change = r#"<Event><InstanceID val="1"><TransportState val="PLAYING"/></InstanceID><InstanceID val="0"><TransportState val="STOPPED"/></InstanceID></Event>"#;

        let changes = parse_last_change(last_change).unwrap();
        assert_eq!(changes, vec![StateChange::TransportState(TransportState::Stopped)]);
    }

    #[test]
    fn test_parse_direct_properties() {
        let xml = r#"<e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0">
  <e:property><Volume>15</Volume></e:property>
  <e:property><SourceProtocolInfo>http-get:*:*:*</SourceProtocolInfo></e:property>
  <e:property><Mute>0</Mute></e:property>
</e:propertyset>"#;

        let changes = parse_property_set(xml).unwrap();
        assert_eq!(changes, vec![StateChange::Volume(15), StateChange::Mute(false)]);
    }

    #[test]
    fn test_parse_double_escaped_last_change() {
        let xml = "&lt;Event&gt;&lt;InstanceID val=\"0\"&gt;&lt;TransportState val=\"PAUSED_PLAYBACK\"/&gt;&lt;/InstanceID&gt;&lt;/Event&gt;";

        let changes = parse_last_change(xml).unwrap();
        assert_eq!(changes, vec![StateChange::TransportState(TransportState::Paused)]);
    }

    #[test]
    fn test_parse_malformed_body() {
        assert!(parse_property_set("<e:propertyset><e:property><Volume>1</Mute>").is_err());
    }
}
