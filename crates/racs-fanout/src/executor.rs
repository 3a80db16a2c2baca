//! Concurrent fan-out with quorum/anti-quorum semantics (§4.3).
//!
//! One `FanoutExecutor::run` call drives N workers, each independently
//! succeeding or failing, until either enough have succeeded (quorum)
//! or too many have failed for quorum to still be reachable
//! (anti-quorum). Every handler callback is delivered under a single
//! internal lock, so a handler never needs to guard its own state
//! against concurrent invocation from this executor.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use racs_common::RacsError;
use tokio::sync::{Mutex, Semaphore};

/// Policy knobs for one [`FanoutExecutor::run`] invocation.
pub struct FanoutPolicy {
    /// Minimum number of successes required. Defaults to the full
    /// parameter count if left unset by the caller.
    pub quorum: usize,
    /// Maximum parallel workers.
    pub n_concurrent: usize,
    /// When true, a failure sets a shared abort flag; workers that
    /// have not yet started skip their query function entirely.
    pub abort_on_exception: bool,
}

/// Outcome of a run: which params succeeded or failed, and whether
/// quorum was reached.
pub struct FanoutOutcome<P, T> {
    pub results: HashMap<P, T>,
    pub exceptions: HashMap<P, RacsError>,
    pub quorum_reached: bool,
}

struct SharedState<P, T> {
    results: HashMap<P, T>,
    exceptions: HashMap<P, RacsError>,
    finished: bool,
    quorum_reached: bool,
}

/// Runs one fan-out query across `params`, invoking `query` once per
/// param (bounded by `policy.n_concurrent`), and resolving to quorum or
/// anti-quorum per §4.3's state machine.
///
/// `rollback` is invoked, at most once per param, for every param that
/// had already succeeded when the run ends in anti-quorum with
/// `abort_on_exception` set — mirroring the source's rollback-on-abort
/// behavior. Handler exceptions (rollback included) are logged and
/// otherwise ignored; they cannot prevent termination.
pub async fn run<P, T, Q, QFut, C, E, R>(
    params: Vec<P>,
    policy: FanoutPolicy,
    query: Q,
    on_completion: Option<C>,
    on_exception: Option<E>,
    rollback: Option<R>,
) -> FanoutOutcome<P, T>
where
    P: Clone + Eq + Hash + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    Q: Fn(P) -> QFut + Send + Sync + 'static,
    QFut: Future<Output = Result<T, RacsError>> + Send + 'static,
    C: Fn(&P, &T) + Send + Sync + 'static,
    E: Fn(&P, &RacsError) + Send + Sync + 'static,
    R: Fn(&P, &T) + Send + Sync + 'static,
{
    let total = params.len();
    let quorum = policy.quorum.min(total).max(if total == 0 { 0 } else { 1 });
    let n_concurrent = policy.n_concurrent.max(1);
    let abort_on_exception = policy.abort_on_exception;

    let state = Arc::new(Mutex::new(SharedState::<P, T> {
        results: HashMap::new(),
        exceptions: HashMap::new(),
        finished: false,
        quorum_reached: false,
    }));
    let abort = Arc::new(AtomicBool::new(false));
    let semaphore = Arc::new(Semaphore::new(n_concurrent));
    let query = Arc::new(query);
    let on_completion = Arc::new(on_completion);
    let on_exception = Arc::new(on_exception);

    let mut handles = Vec::with_capacity(total);
    for param in params {
        let permit_src = semaphore.clone();
        let state = state.clone();
        let abort = abort.clone();
        let query = query.clone();
        let on_completion = on_completion.clone();
        let on_exception = on_exception.clone();

        handles.push(tokio::spawn(async move {
            let _permit = permit_src.acquire_owned().await.expect("semaphore not closed");

            if abort_on_exception && abort.load(Ordering::Acquire) {
                return;
            }

            match query(param.clone()).await {
                Ok(value) => {
                    let mut guard = state.lock().await;
                    if guard.finished {
                        return;
                    }
                    guard.results.insert(param.clone(), value.clone());
                    if let Some(cb) = on_completion.as_ref() {
                        invoke_handler("completion", || cb(&param, &value));
                    }
                    check_quorum(&mut guard, total, quorum);
                }
                Err(err) => {
                    if abort_on_exception {
                        abort.store(true, Ordering::Release);
                    }
                    let mut guard = state.lock().await;
                    if guard.finished {
                        return;
                    }
                    if let Some(cb) = on_exception.as_ref() {
                        invoke_handler("exception", || cb(&param, &err));
                    }
                    guard.exceptions.insert(param, err);
                    check_quorum(&mut guard, total, quorum);
                }
            }
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }

    let mut guard = state.lock().await;
    if !guard.finished {
        check_quorum(&mut guard, total, quorum);
    }
    let quorum_reached = guard.quorum_reached;

    if !quorum_reached {
        if let Some(rb) = rollback {
            let params: Vec<(P, T)> = guard.results.iter().map(|(p, v)| (p.clone(), v.clone())).collect();
            for (param, value) in params {
                invoke_handler("rollback", || rb(&param, &value));
            }
        }
    }

    FanoutOutcome {
        results: std::mem::take(&mut guard.results),
        exceptions: std::mem::take(&mut guard.exceptions),
        quorum_reached,
    }
}

/// Runs one handler callback (completion/exception/rollback), catching
/// and logging a panic rather than letting it escape into the worker
/// task (§4.3: "exceptions raised from any handler are swallowed and
/// logged; handler bugs may not prevent termination").
fn invoke_handler<F: FnOnce()>(kind: &str, f: F) {
    if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        tracing::error!(handler = kind, %message, "fan-out handler panicked, swallowing");
    }
}

fn check_quorum<P, T>(state: &mut SharedState<P, T>, total: usize, quorum: usize) {
    if state.finished {
        return;
    }
    let n_succeed = state.results.len();
    let n_fail = state.exceptions.len();
    if n_succeed >= quorum {
        state.finished = true;
        state.quorum_reached = true;
    } else if total - n_fail < quorum {
        state.finished = true;
        state.quorum_reached = false;
    }
}

impl Default for FanoutPolicy {
    fn default() -> Self {
        Self {
            quorum: usize::MAX,
            n_concurrent: 15,
            abort_on_exception: false,
        }
    }
}
