//! In-process presence and typing indicators.

pub mod hub;

pub use hub::{PresenceHub, PresenceMember, PresenceMeta, PresenceSnapshot};
