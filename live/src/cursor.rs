//! Resume position of the event stream.

use std::fmt;

/// Highest server timestamp (seconds since the epoch) received so far.
/// It only moves forward; a reconnect asks the server to replay from here.
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd)]
pub struct StreamCursor(f64);

impl StreamCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    /// Record `ts`. Returns true when the cursor moved.
    pub fn advance(&mut self, ts: f64) -> bool {
        if ts.is_finite() && ts > self.0 {
            self.0 = ts;
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.0 = 0.0;
    }
}

/// Renders the query parameter value; whole seconds print without a fraction.
impl fmt::Display for StreamCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_is_monotonic() {
        let mut cursor = StreamCursor::new();

        for ts in [10.0, 25.0, 40.0, 40.0, 12.0] {
            cursor.advance(ts);
        }

        assert_eq!(cursor.value(), 40.0);
    }

    #[test]
    fn test_rejects_non_finite_timestamps() {
        let mut cursor = StreamCursor::new();
        assert!(!cursor.advance(f64::NAN));
        assert!(!cursor.advance(f64::INFINITY));
        assert_eq!(cursor.value(), 0.0);
    }

    #[test]
    fn test_display() {
        let mut cursor = StreamCursor::new();
        assert_eq!(cursor.to_string(), "0");
        cursor.advance(40.0);
        assert_eq!(cursor.to_string(), "40");
        cursor.advance(1712345678.25);
        assert_eq!(cursor.to_string(), "1712345678.25");
    }

    #[test]
    fn test_reset() {
        let mut cursor = StreamCursor::new();
        cursor.advance(55.0);
        cursor.reset();
        assert_eq!(cursor.value(), 0.0);
    }
}
