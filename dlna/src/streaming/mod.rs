//! GENA event subscriptions.

pub mod callback_server;
pub mod event;
pub mod manager;
pub mod subscription;
pub mod types;

pub use callback_server::{callback_path, CallbackServer, EventRouter};
pub use event::{parse_last_change, parse_property_set};
pub use manager::{EventSubscriber, SubscriptionInfo};
pub use subscription::{parse_timeout_header, GenaClient, GenaTransport, Grant, SubscriptionError, SubscriptionResult};
pub use types::{CallbackTarget, RawEvent, SubscriptionConfig, SubscriptionId};
