//! Time-ordered unique keys in the realtime database push-id format.

use rand::Rng;
use std::sync::Mutex;

const PUSH_CHARS: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

/// Generates 20-character keys: 8 characters of millisecond timestamp
/// followed by 12 random characters. Keys sort lexicographically in
/// creation order, including keys created within the same millisecond.
#[derive(Debug, Default)]
pub struct PushIdGenerator {
    state: Mutex<PushIdState>,
}

#[derive(Debug, Default)]
struct PushIdState {
    last_time: i64,
    last_random: [u8; 12],
}

impl PushIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a key for the current time.
    pub fn next_id(&self) -> String {
        self.next_id_at(crate::now_millis())
    }

    /// Generate a key for the given epoch milliseconds.
    pub fn next_id_at(&self, now: i64) -> String {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if now == state.last_time {
            // Same millisecond: increment the previous random suffix.
            for i in (0..12).rev() {
                if state.last_random[i] == 63 {
                    state.last_random[i] = 0;
                } else {
                    state.last_random[i] += 1;
                    break;
                }
            }
        } else {
            let mut rng = rand::rng();
            for slot in state.last_random.iter_mut() {
                *slot = rng.random_range(0..64);
            }
            state.last_time = now;
        }

        let mut id = String::with_capacity(20);
        let mut time = now.max(0);
        let mut time_chars = [0u8; 8];
        for slot in time_chars.iter_mut().rev() {
            *slot = PUSH_CHARS[(time % 64) as usize];
            time /= 64;
        }
        id.extend(time_chars.iter().map(|&b| b as char));
        id.extend(state.last_random.iter().map(|&i| PUSH_CHARS[i as usize] as char));
        id
    }
}
