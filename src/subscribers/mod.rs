//! Event bus subscribers: session logging, metrics, the async-check soft
//! gate, and user-profile learning. Each owns its own background task and
//! attaches itself to an [`EventBus`](crate::event_bus::EventBus) via
//! `attach`.

pub mod async_check;
pub mod metrics;
pub mod session_log;
pub mod user_profile;

pub use async_check::AsyncCheckSubscriber;
pub use metrics::MetricsSubscriber;
pub use session_log::SessionLogSubscriber;
pub use user_profile::UserProfileSubscriber;
