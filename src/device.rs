//! Device identity
//!
//! Eight immutable bytes sourced from the MCU's unique ID at startup.
//! Modeled as a `lazy_static` global behind a lock the way the teacher
//! keeps `SERIAL1` (its UART) as a `lazy_static!` + `spin::Mutex` singleton
//! (`kernel/src/serial.rs`) — identity here is read-only after init, so the
//! lock only ever guards the one-time write.

use spin::Mutex;

lazy_static::lazy_static! {
    static ref IDENTITY: Mutex<[u8; 8]> = Mutex::new([0u8; 8]);
}

/// Seed the device identity from a host-supplied unique ID source. On real
/// hardware this reads the MCU's factory-programmed unique ID register; in
/// the simulator / tests it is whatever the caller provides.
pub fn init_from(unique_id: [u8; 8]) {
    *IDENTITY.lock() = unique_id;
}

/// Current device identity.
pub fn get() -> [u8; 8] {
    *IDENTITY.lock()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_round_trips() {
        init_from([1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(get(), [1, 2, 3, 4, 5, 6, 7, 8]);
    }
}
