pub mod claim;
pub mod decision;
pub mod event;
pub mod keeper;
pub mod message;
pub mod metric;
pub mod provider;
pub mod query;
pub mod task;
pub mod team;

pub use claim::*;
pub use decision::*;
pub use event::*;
pub use keeper::*;
pub use message::*;
pub use metric::*;
pub use provider::*;
pub use query::*;
pub use task::*;
pub use team::*;

/// Milliseconds since the Unix epoch, clamped at zero.
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
