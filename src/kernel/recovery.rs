//! Panic recovery for actor handlers.
//!
//! A panicking handler must not take the dispatcher down with it, and the
//! dispatch that triggered it still has to record its outcome metric.
//! [`with_recovery_async`] turns a panic into [`Error::Internal`].

use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use crate::types::{Error, Result};

/// Await `future`, converting a panic at any poll into an error.
pub async fn with_recovery_async<Fut, T>(future: Fut, operation_name: &str) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(recovered(operation_name, payload.as_ref())),
    }
}

fn recovered(operation_name: &str, payload: &(dyn Any + Send)) -> Error {
    let panic_msg = extract_panic_message(payload);
    tracing::error!(
        "panic_recovered: operation={}, panic={}",
        operation_name,
        panic_msg
    );
    Error::internal(format!("panic in {}: {}", operation_name, panic_msg))
}

fn extract_panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic (no message)".to_string()
    }
}
