use std::sync::Arc;

use lockmgr::LockManager;

use crate::{AnyResult, CommandKind, parse_number};

pub mod async_waiters;
pub mod fairness;
pub mod stress;

pub(crate) async fn dispatch(mgr: &Arc<LockManager>, command: CommandKind) -> AnyResult<()> {
    match command {
        CommandKind::Stress {
            threads,
            iterations,
            timeout_ms,
        } => {
            let options = stress::Options {
                threads: optional_number("--threads", threads, 8)?,
                iterations: optional_number("--iterations", iterations, 10_000)?,
                timeout_ms: optional_number("--timeout-ms", timeout_ms, 500)?,
            };
            let mgr = Arc::clone(mgr);
            tokio::task::spawn_blocking(move || stress::run(&mgr, options))
                .await
                .map_err(|e| format!("stress scenario panicked: {e}"))?
        }
        CommandKind::Fairness => fairness::run(mgr),
        CommandKind::AsyncWaiters { tasks } => {
            let tasks = optional_number("--tasks", tasks, 8)?;
            async_waiters::run(mgr, tasks).await
        }
    }
}

fn optional_number<T>(flag: &str, value: Option<String>, default: T) -> AnyResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(value) => parse_number(flag, &value),
        None => Ok(default),
    }
}
