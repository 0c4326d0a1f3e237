//! Chronologically ordered push keys.
//!
//! A key is 8 characters of millisecond timestamp followed by 12 random
//! characters. Keys generated within the same millisecond increment the random
//! part so they still sort in creation order.

use std::sync::Mutex;

use rand::Rng;

const PUSH_CHARS: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

pub const PUSH_KEY_LEN: usize = 20;

#[derive(Debug)]
pub struct PushIdState {
    last_millis: i64,
    last_random: [u8; 12],
}

impl PushIdState {
    pub const fn new() -> Self {
        Self {
            last_millis: -1,
            last_random: [0; 12],
        }
    }

    pub fn next_key<R: Rng>(&mut self, now_millis: i64, rng: &mut R) -> String {
        if now_millis == self.last_millis {
            // carry through trailing maxed-out digits
            for digit in self.last_random.iter_mut().rev() {
                if *digit == 63 {
                    *digit = 0;
                } else {
                    *digit += 1;
                    break;
                }
            }
        } else {
            for digit in self.last_random.iter_mut() {
                *digit = rng.random_range(0..64);
            }
        }
        self.last_millis = now_millis;

        let mut key = [0u8; PUSH_KEY_LEN];
        let mut remaining = now_millis.max(0) as u64;
        for slot in key[..8].iter_mut().rev() {
            *slot = PUSH_CHARS[(remaining % 64) as usize];
            remaining /= 64;
        }
        for (slot, digit) in key[8..].iter_mut().zip(self.last_random.iter()) {
            *slot = PUSH_CHARS[*digit as usize];
        }

        key.iter().map(|b| *b as char).collect()
    }
}

impl Default for PushIdState {
    fn default() -> Self {
        Self::new()
    }
}

static STATE: Mutex<PushIdState> = Mutex::new(PushIdState::new());

pub fn generate() -> String {
    let now = chrono::Utc::now().timestamp_millis();
    let mut state = STATE.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    state.next_key(now, &mut rand::rng())
}
