use chrono::{DateTime, Utc};

/// Something the engine recorded (a ledger entry) or announced (a signal).
///
/// Values are immutable once built. `event_type` is the routing key external
/// collectors filter on and `version` tracks the payload schema.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Dotted key such as `"stock.lock_timeout"`.
    fn event_type(&self) -> &'static str;

    fn version(&self) -> u32;

    fn occurred_at(&self) -> DateTime<Utc>;
}
