use std::{future::Future, time::Duration};

use anyhow::Result;

/// Trackers sample on blocking threads while the sink writes, so the agent wants real
/// parallelism.
pub fn multi_thread_runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?)
}

/// Runs `future` to completion, then waits at most `grace` for leftover blocking tasks. A
/// provider stuck in a system call would otherwise keep the process alive when the runtime
/// drops.
pub fn block_on_with_grace<F: Future>(future: F, grace: Duration) -> Result<F::Output> {
    let runtime = multi_thread_runtime()?;
    let output = runtime.block_on(future);
    runtime.shutdown_timeout(grace);
    Ok(output)
}
