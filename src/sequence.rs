use parking_lot::Mutex;

/// Monotonic request id generator.
///
/// Ids follow the wall clock in milliseconds. When two calls land in the same
/// millisecond the previous id is bumped by one, so ids may run ahead of the
/// clock under sustained bursts.
#[derive(Debug, Default)]
pub struct TaskIdGenerator {
    last: Mutex<i64>,
}

impl TaskIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generate(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        let mut last = self.last.lock();
        let next = if now > *last { now } else { *last + 1 };
        *last = next;
        next
    }
}
