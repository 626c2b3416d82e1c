use std::cell::RefCell;

use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};

use crate::codec::record_file::MARKER_LEN;

thread_local! {
    static MARKER_RNG: RefCell<SmallRng> = RefCell::new(SmallRng::from_os_rng());
}

/// Reseed the marker generator of the calling thread.
pub fn set_seed(seed: u64) {
    MARKER_RNG.with(|rng| *rng.borrow_mut() = SmallRng::seed_from_u64(seed));
}

/// A fresh record marker, never all `0xff` so it cannot be mistaken for its prefix.
pub fn random_marker() -> [u8; MARKER_LEN] {
    MARKER_RNG.with(|rng| {
        let mut rng = rng.borrow_mut();
        let mut marker = [0xff; MARKER_LEN];
        while marker == [0xff; MARKER_LEN] {
            rng.fill_bytes(&mut marker);
        }
        marker
    })
}
