//! Tokio runtime shared by every blocking storage call

use crate::location::Backend;
use crate::{Error, Result};
use std::sync::{Arc, OnceLock};
use tokio::runtime::Runtime;

static RUNTIME: OnceLock<Arc<Runtime>> = OnceLock::new();

/// Get or create the shared runtime used to drive `object_store` futures
pub(crate) fn shared_runtime() -> Result<Arc<Runtime>> {
    if let Some(runtime) = RUNTIME.get() {
        return Ok(runtime.clone());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .thread_name("tilestore-io")
        .build()
        .map_err(|e| Error::storage_with_source(Backend::S3, "failed to start I/O runtime", e))?;

    // A concurrent caller may have won the race; its runtime is kept
    Ok(RUNTIME.get_or_init(|| Arc::new(runtime)).clone())
}
