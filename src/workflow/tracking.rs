//! Tracking code generation

use rand::Rng;
use tracing::debug;

use crate::error::{Error, Result};
use crate::storage::WorkflowStore;
use crate::types::TrackingCode;

/// Draws before giving up on finding a free code
pub const MAX_ATTEMPTS: usize = 32;

/// Uniformly random 8-digit code
pub fn random_code<R: Rng + ?Sized>(rng: &mut R) -> Result<TrackingCode> {
    TrackingCode::new(rng.gen_range(TrackingCode::MIN..=TrackingCode::MAX))
}

/// A code not yet used by any stored manuscript.
/// The insert itself still rejects a duplicate that appears in between.
pub async fn generate_unique(store: &dyn WorkflowStore) -> Result<TrackingCode> {
    for attempt in 1..=MAX_ATTEMPTS {
        let code = random_code(&mut rand::thread_rng())?;
        if !store.tracking_code_exists(code).await? {
            return Ok(code);
        }
        debug!("Tracking code collision on attempt {}", attempt);
    }
    Err(Error::PersistenceConflict(format!(
        "no free tracking code after {} attempts",
        MAX_ATTEMPTS
    )))
}
