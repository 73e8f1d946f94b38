//! Core scalar types shared across the protocol.

use std::time::{SystemTime, UNIX_EPOCH};

/// Update sequence number.
///
/// Every mutable entity and every grave carries one. The server's counter
/// only moves forward; a client that has seen everything below some `usn`
/// asks only for what is at or above it.
pub type Usn = i32;

/// Sentinel stamped on entities that have not been synced yet.
pub const UNSYNCED_USN: Usn = -1;

/// Identifier of a card, note, deck, deck config or note type.
pub type ObjectId = i64;

/// Current Unix time in seconds.
pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Current Unix time in milliseconds.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_units_agree() {
        let secs = now_secs();
        let millis = now_millis();
        assert!((millis / 1000 - secs).abs() <= 1);
    }
}
