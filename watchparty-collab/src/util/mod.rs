mod id;

pub use id::*;

use rand::{distributions::Alphanumeric, thread_rng, Rng};

/// Server wall-clock milliseconds since the epoch, as stamped on every
/// outbound frame.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub fn random_string(length: usize) -> String {
    let mut rng = thread_rng();

    std::iter::repeat(())
        .map(|_| rng.sample(Alphanumeric) as char)
        .take(length)
        .collect()
}
