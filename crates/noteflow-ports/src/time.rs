/// Monotonic wall clock in milliseconds, read once per frame.
///
/// Only differences between readings are meaningful.
pub trait TimeSource: Send + Sync {
    fn now_ms(&self) -> f64;
}
