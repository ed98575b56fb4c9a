//! DIDL-Lite metadata codec.
//!
//! [`encode`] builds the single-item document sent with `SetAVTransportURI`;
//! [`decode`] reads back what devices report in `TrackMetaData` and
//! `CurrentURIMetaData`. Both degrade instead of failing: encoding yields an
//! empty string, decoding yields a minimal fallback.

mod decode;
mod encode;
pub mod mime;

pub use decode::{decode, decode_subtitle_tracks, parse_items, DidlItem, DidlResource};
pub use encode::{encode, try_encode};

pub const DIDL_NS: &str = "urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/";
pub const DC_NS: &str = "http://purl.org/dc/elements/1.1/";
pub const UPNP_NS: &str = "urn:schemas-upnp-org:metadata-1-0/upnp/";
pub const DLNA_NS: &str = "urn:schemas-dlna-org:metadata-1-0/";
