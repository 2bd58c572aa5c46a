//! Bounded polling: used by the provisioner to wait out readiness checks
//! against a fixed retry cadence and a caller-supplied deadline.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};

use crate::error::{ErrorKind, Result};

/// Poll `check` every `interval` until it returns `Ok(true)`, `Err`, or
/// `timeout` elapses. A timed-out wait surfaces as `ErrorKind::Internal` so
/// callers can decide whether to retry the whole operation or fail it.
pub async fn poll_until<F, Fut>(timeout: Duration, interval: Duration, mut check: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if check().await? {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(ErrorKind::Internal(format!("readiness check did not pass within {:?}", timeout)).into());
        }
        sleep(interval).await;
    }
}
