//! Message bus implementations
pub mod broadcaster;

pub use broadcaster::{EventBroadcaster, Notification, OrgEvent};
