//! Display name and message ID generation
//!
//! Display names are assigned server-side on admission and are the only
//! identity a connection has. They are drawn from a CSPRNG; uniqueness is
//! not enforced (collisions are astronomically unlikely at 16 chars over a
//! 62-symbol alphabet and carry no correctness weight).

use rand::RngExt;
use uuid::Uuid;

/// Alphabet for generated display names
const NAME_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Length of generated display names
pub const USERNAME_LENGTH: usize = 16;

/// Generate a random display name
pub fn generate_username() -> String {
    let mut rng = rand::rng();
    (0..USERNAME_LENGTH)
        .map(|_| {
            let idx: usize = rng.random_range(0..NAME_CHARS.len());
            NAME_CHARS[idx] as char
        })
        .collect()
}

/// Generate a unique message ID (UUID v4)
pub fn generate_message_id() -> String {
    Uuid::new_v4().to_string()
}
