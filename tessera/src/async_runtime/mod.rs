use std::future::Future;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::error::TesseraError;

/// Spawns the future on the given runtime, or on the runtime of the current thread if no runtime
/// is given.
pub fn spawn<T>(runtime: Option<&Handle>, future: T) -> Result<JoinHandle<T::Output>, TesseraError>
where
    T: Future + Send + 'static,
    T::Output: Send + 'static,
{
    match runtime {
        Some(runtime) => Ok(runtime.spawn(future)),
        None => {
            let runtime = Handle::try_current().map_err(|_| TesseraError::NoRuntime)?;
            Ok(runtime.spawn(future))
        }
    }
}
