// Concurrent request runner for remote stores.
//
// Each submitted request runs on its own thread. `wait_all` blocks until
// every outstanding request has finished or the runner's timeout expires;
// on timeout the remaining requests are cancelled and their results read
// as `Error::Abandoned`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    /// id -> name of every request still running.
    pending: BTreeMap<u64, String>,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
    cv: Condvar,
    cancelled: Arc<AtomicBool>,
}

/// Handed to every request body so long operations can give up early once
/// the runner has timed out.
#[derive(Debug, Clone)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// `Err(Abandoned)` once cancelled.
    pub fn check(&self, what: &str) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Abandoned(what.to_string()));
        }
        Ok(())
    }
}

/// Handle to one submitted request.
#[derive(Debug)]
pub struct Request<T> {
    name: String,
    slot: Arc<Mutex<Option<Result<T>>>>,
}

impl<T> Request<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_done(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// The request's result. Requests that never finished report
    /// `Error::Abandoned`.
    pub fn take_result(&self) -> Result<T> {
        self.slot
            .lock()
            .take()
            .unwrap_or_else(|| Err(Error::Abandoned(self.name.clone())))
    }
}

/// Runs requests concurrently and joins them under one deadline.
#[derive(Debug)]
pub struct RequestRunner {
    shared: Arc<Shared>,
    timeout: Duration,
}

impl RequestRunner {
    pub fn new(timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn pending(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::Acquire)
    }

    /// Ask every running request to stop. Requests finishing after this are
    /// still recorded.
    pub fn cancel(&self) {
        self.shared.cancelled.store(true, Ordering::Release);
    }

    /// Start `body` on a new thread.
    pub fn submit<T, F>(&self, name: impl Into<String>, body: F) -> Result<Request<T>>
    where
        T: Send + 'static,
        F: FnOnce(&CancelToken) -> Result<T> + Send + 'static,
    {
        let name = name.into();
        if self.is_cancelled() {
            return Err(Error::Abandoned(name));
        }
        let slot = Arc::new(Mutex::new(None));
        let id = {
            let mut state = self.shared.state.lock();
            let id = state.next_id;
            state.next_id += 1;
            state.pending.insert(id, name.clone());
            id
        };

        let shared = Arc::clone(&self.shared);
        let result_slot = Arc::clone(&slot);
        let token = CancelToken(Arc::clone(&self.shared.cancelled));
        let task_name = name.clone();
        let spawned = thread::Builder::new()
            .name(format!("wormarc-{id}"))
            .spawn(move || {
                let result = body(&token);
                if let Err(e) = &result {
                    log::debug!("runner: request {task_name} failed: {e}");
                }
                *result_slot.lock() = Some(result);
                let mut state = shared.state.lock();
                state.pending.remove(&id);
                shared.cv.notify_all();
            });

        if let Err(e) = spawned {
            self.shared.state.lock().pending.remove(&id);
            return Err(e.into());
        }
        log::trace!("runner: submitted {name}");
        Ok(Request { name, slot })
    }

    /// Block until every submitted request has finished. On timeout the
    /// runner is cancelled and `Error::Timeout` names the stragglers.
    ///
    /// A timeout too large to add to the current instant never expires.
    pub fn wait_all(&self) -> Result<()> {
        let deadline = Instant::now().checked_add(self.timeout);
        let mut state = self.shared.state.lock();
        while !state.pending.is_empty() {
            let Some(deadline) = deadline else {
                self.shared.cv.wait(&mut state);
                continue;
            };
            if self.shared.cv.wait_until(&mut state, deadline).timed_out() && !state.pending.is_empty() {
                let names: Vec<&str> = state.pending.values().map(String::as_str).collect();
                let msg = format!("{} request(s) after {:?}: {}", names.len(), self.timeout, names.join(", "));
                drop(state);
                self.cancel();
                log::warn!("runner: timed out waiting for {msg}");
                return Err(Error::Timeout(msg));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn runs_all_requests() {
        let runner = RequestRunner::new(Duration::from_secs(10));
        let requests: Vec<_> = (0..8u32)
            .map(|i| runner.submit(format!("r{i}"), move |_| Ok(i * i)).unwrap())
            .collect();
        runner.wait_all().unwrap();
        assert_eq!(runner.pending(), 0);
        let results: Vec<u32> = requests.iter().map(|r| r.take_result().unwrap()).collect();
        assert_eq!(results, [0, 1, 4, 9, 16, 25, 36, 49]);
    }

    #[test]
    fn failures_are_per_request() {
        let runner = RequestRunner::new(Duration::from_secs(10));
        let ok = runner.submit("ok", |_| Ok(1)).unwrap();
        let bad = runner
            .submit("bad", |_| -> Result<i32> { Err(Error::NotFound("gone".into())) })
            .unwrap();
        runner.wait_all().unwrap();
        assert_eq!(ok.take_result().unwrap(), 1);
        assert_eq!(bad.take_result().unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn timeout_abandons_stragglers() {
        let runner = RequestRunner::new(Duration::from_millis(50));
        let fast = runner.submit("fast", |_| Ok(())).unwrap();
        let slow = runner
            .submit("slow", |token| {
                let start = Instant::now();
                while start.elapsed() < Duration::from_secs(5) {
                    token.check("slow")?;
                    thread::sleep(Duration::from_millis(5));
                }
                Ok(())
            })
            .unwrap();

        let err = runner.wait_all().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.to_string().contains("slow"));
        assert!(runner.is_cancelled());
        assert!(fast.take_result().is_ok());
        assert_eq!(slow.take_result().unwrap_err().kind(), ErrorKind::Timeout);
        assert!(runner.submit("late", |_| Ok(())).is_err());
    }

    #[test]
    fn unbounded_timeout_waits_for_completion() {
        let runner = RequestRunner::new(Duration::MAX);
        let request = runner
            .submit("sleepy", |_| {
                thread::sleep(Duration::from_millis(20));
                Ok(7)
            })
            .unwrap();
        runner.wait_all().unwrap();
        assert_eq!(request.take_result().unwrap(), 7);
        assert!(!runner.is_cancelled());
    }

    #[test]
    fn nothing_to_wait_for() {
        RequestRunner::new(Duration::from_millis(1)).wait_all().unwrap();
    }
}
