pub mod dispatch_coordinator;
pub mod location_reporter;
pub mod order_catalog;
pub mod order_lifecycle;
pub mod presence;
pub mod stats_poller;
pub mod ui_handler;

use common::errors::DispatchError;
use std::future::Future;
use std::time::Duration;

/// Runs a backend call under the engine deadline. An elapsed deadline is
/// reported as `Timeout` and handled like any other failure.
pub(crate) async fn with_deadline<T, F>(
    deadline: Duration,
    operation: &'static str,
    call: F,
) -> Result<T, DispatchError>
where
    F: Future<Output = Result<T, DispatchError>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(DispatchError::timeout(format!(
            "{} did not answer within {:?}",
            operation, deadline
        ))),
    }
}
