/// Minimum period a unit may run with, in seconds.
/// Anything faster would turn the store into a busy-polling target.
pub const MIN_PERIOD_SECS: f64 = 0.01;

/// Lower bound of every scalar reading, encoded input and query element.
pub const UNIT_MIN: f64 = 0.0;

/// Upper bound of every scalar reading, encoded input and query element.
pub const UNIT_MAX: f64 = 1.0;
