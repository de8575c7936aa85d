//! Notifier: derived views of the store pushed to live observers.
//!
//! `snapshot` builds the views, `hub` owns the subscribers and the lazily
//! started ticker that refreshes them.

pub mod hub;
pub mod snapshot;

pub use hub::{HubSettings, LiveHub, Subscription};
pub use snapshot::{BatchView, ResultView, SnapshotEvent, Summary};
