//! Exponential backoff for transient capability failures.

use std::future::Future;

use metaevo_core::RetryConfig;
use tracing::{debug, warn};

use crate::capability::{GenerateRequest, GenerationCapability};
use crate::error::CapabilityError;

/// Run `op` until it succeeds, fails permanently, or exhausts `policy.max_attempts`.
///
/// Only [`CapabilityError::is_retryable`] errors are retried.
pub async fn with_backoff<T, F, Fut>(
    policy: &RetryConfig,
    what: &str,
    mut op: F,
) -> Result<T, CapabilityError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CapabilityError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "{} hit a transient failure (attempt {}/{}): {}; retrying in {:?}",
                    what,
                    attempt + 1,
                    policy.max_attempts,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                debug!("{} failed after {} attempt(s): {}", what, attempt + 1, e);
                return Err(e);
            }
        }
    }
}

/// Generate with backoff.
pub async fn generate_with_retry(
    capability: &dyn GenerationCapability,
    request: &GenerateRequest,
    policy: &RetryConfig,
) -> Result<String, CapabilityError> {
    with_backoff(policy, "generate", move || capability.generate(request)).await
}
