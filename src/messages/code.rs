//! Correlation codes tying an outbound message to its replies.

use rand::Rng;
use rand::distributions::Alphanumeric;
use tracing::warn;

use crate::error::{Error, ReconcileError};
use crate::messages::model::MESSAGE_CODE_LEN;
use crate::store::Database;

/// Collisions tolerated before giving up.
pub const MAX_CODE_ATTEMPTS: usize = 64;

/// Draw a random 16-character alphanumeric string.
pub fn draw_code() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(MESSAGE_CODE_LEN)
        .map(char::from)
        .collect()
}

/// Generate a code not used by any stored message.
///
/// Checked against the live store at call time; nothing is reserved, so a
/// caller must insert the message before the next call can see it.
pub async fn generate_unique_message_code(db: &dyn Database) -> Result<String, Error> {
    for attempt in 1..=MAX_CODE_ATTEMPTS {
        let code = draw_code();
        if !db.message_code_exists(&code).await? {
            return Ok(code);
        }
        warn!(attempt, "Message code collision, drawing again");
    }
    Err(ReconcileError::CodeSpaceExhausted {
        attempts: MAX_CODE_ATTEMPTS,
    }
    .into())
}

/// Whether `s` has the shape of a correlation code.
pub fn is_valid_code(s: &str) -> bool {
    s.len() == MESSAGE_CODE_LEN && s.bytes().all(|b| b.is_ascii_alphanumeric())
}
