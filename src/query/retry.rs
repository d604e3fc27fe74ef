//! Retry-once policy shared by every query site

use std::future::Future;

use crate::error::Result;

/// Run `op`, and run it exactly once more if the first attempt fails
///
/// `op` receives the attempt number (0 or 1). The first failure is logged
/// as a warning naming `label`; the second failure is returned to the
/// caller, who decides whether it is fatal.
pub async fn with_one_retry<T, F, Fut>(label: &str, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match op(0).await {
        Ok(value) => Ok(value),
        Err(first) => {
            log::warn!("{label} failed, retrying once: {first}");
            op(1).await
        }
    }
}
