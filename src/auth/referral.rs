use rand::{rngs::OsRng, RngCore};
use tracing::{debug, warn};

use crate::auth::repo::UserStore;
use crate::error::AuthError;

/// Random bytes per code; hex-encoded this gives 10 characters.
pub const CODE_BYTES: usize = 5;

/// Upper bound on generate-and-check rounds. With 2^40 codes a real
/// collision streak this long means the store is answering wrongly.
const MAX_ATTEMPTS: usize = 32;

pub fn random_code() -> String {
    let mut bytes = [0u8; CODE_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Draws codes until the store reports one nobody holds.
///
/// This is check-then-act: two registrations can still draw the same free
/// code concurrently. The unique constraint on `partner_code` catches that.
pub async fn generate(store: &dyn UserStore) -> Result<String, AuthError> {
    generate_with(store, random_code).await
}

async fn generate_with(
    store: &dyn UserStore,
    mut candidate: impl FnMut() -> String + Send,
) -> Result<String, AuthError> {
    for attempt in 1..=MAX_ATTEMPTS {
        let code = candidate();
        if !store.partner_code_exists(&code).await? {
            debug!(attempt, "partner code allocated");
            return Ok(code);
        }
        warn!(attempt, "partner code collision, retrying");
    }
    Err(AuthError::Internal(anyhow::anyhow!(
        "no free partner code after {MAX_ATTEMPTS} attempts"
    )))
}
