//! Supervised execution units.
//!
//! Readers and workers run as named threads behind a `Supervised` handle. A unit
//! owns nothing but the channel handles it was moved at spawn and a `StopFlag`;
//! cancellation is cooperative and checked once per loop iteration. Stopping is
//! bounded: a unit that ignores its flag past the timeout is detached and reported
//! as unresponsive.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::error::PipelineError;

/// Cooperative stop signal shared between the supervisor and one unit.
#[derive(Clone, Debug, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How a unit ended.
#[derive(Debug)]
pub enum UnitExit<T> {
    /// Returned normally with its exit report.
    Finished(T),
    /// Returned a fatal error.
    Failed(anyhow::Error),
    Panicked,
    /// Ignored the stop flag past the timeout and was detached.
    Unresponsive,
}

impl<T> UnitExit<T> {
    pub fn is_clean(&self) -> bool {
        matches!(self, UnitExit::Finished(_))
    }
}

pub struct Supervised<T> {
    name: String,
    stop: StopFlag,
    handle: Option<JoinHandle<Result<T>>>,
    done: Receiver<()>,
}

impl<T: Send + 'static> Supervised<T> {
    /// Spawn `body` on a new named thread. The body receives its own stop flag.
    pub fn spawn<F>(name: impl Into<String>, body: F) -> Result<Self>
    where
        F: FnOnce(StopFlag) -> Result<T> + Send + 'static,
    {
        let name = name.into();
        let stop = StopFlag::new();
        let unit_stop = stop.clone();
        // Dropped when the body returns or unwinds, which disconnects `done`.
        let (done_tx, done) = crossbeam_channel::bounded::<()>(1);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let _done_tx = done_tx;
                body(unit_stop)
            })
            .with_context(|| format!("failed to spawn {}", name))?;
        Ok(Self {
            name,
            stop,
            handle: Some(handle),
            done,
        })
    }
}

impl<T> Supervised<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True once the unit has returned (or was already collected).
    pub fn is_finished(&self) -> bool {
        self.handle
            .as_ref()
            .map_or(true, |handle| handle.is_finished())
    }

    pub fn signal(&self) {
        self.stop.raise();
    }

    /// Signal and wait at most `timeout`. `None` if the unit was already collected.
    pub fn stop(&mut self, timeout: Duration) -> Option<UnitExit<T>> {
        self.signal();
        self.join_until(Instant::now() + timeout)
    }

    /// Collect the unit, waiting until `deadline` at the latest.
    pub fn join_until(&mut self, deadline: Instant) -> Option<UnitExit<T>> {
        let handle = self.handle.take()?;
        let remaining = deadline.saturating_duration_since(Instant::now());
        match self.done.recv_timeout(remaining) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => Some(collect(handle)),
            Err(RecvTimeoutError::Timeout) if handle.is_finished() => Some(collect(handle)),
            Err(RecvTimeoutError::Timeout) => {
                let err = PipelineError::ProcessUnresponsive {
                    unit: self.name.clone(),
                    timeout_ms: remaining.as_millis(),
                };
                log::warn!("{}; detaching", err);
                Some(UnitExit::Unresponsive)
            }
        }
    }

    /// Collect a unit that has already returned without waiting.
    pub fn try_collect(&mut self) -> Option<UnitExit<T>> {
        if !self.is_finished() {
            return None;
        }
        self.handle.take().map(collect)
    }
}

impl<T> Drop for Supervised<T> {
    fn drop(&mut self) {
        self.stop.raise();
    }
}

fn collect<T>(handle: JoinHandle<Result<T>>) -> UnitExit<T> {
    match handle.join() {
        Ok(Ok(report)) => UnitExit::Finished(report),
        Ok(Err(err)) => UnitExit::Failed(err),
        Err(_) => UnitExit::Panicked,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cooperative_unit_stops_cleanly() {
        let mut unit = Supervised::spawn("test-loop", |stop| {
            let mut turns = 0u64;
            while !stop.is_raised() {
                turns += 1;
                thread::sleep(Duration::from_millis(1));
            }
            Ok(turns)
        })
        .unwrap();
        thread::sleep(Duration::from_millis(10));
        match unit.stop(Duration::from_secs(1)) {
            Some(UnitExit::Finished(turns)) => assert!(turns > 0),
            other => panic!("unexpected exit: {:?}", other),
        }
        assert!(unit.stop(Duration::from_secs(1)).is_none());
    }

    #[test]
    fn unresponsive_unit_is_detached_after_timeout() {
        let mut unit = Supervised::spawn("test-stuck", |_stop| {
            thread::sleep(Duration::from_millis(300));
            Ok(())
        })
        .unwrap();
        let started = Instant::now();
        let exit = unit.stop(Duration::from_millis(20));
        assert!(matches!(exit, Some(UnitExit::Unresponsive)));
        assert!(started.elapsed() < Duration::from_millis(250));
    }

    #[test]
    fn failing_unit_reports_error() {
        let mut unit: Supervised<()> =
            Supervised::spawn("test-fail", |_stop| Err(anyhow::anyhow!("boom"))).unwrap();
        match unit.stop(Duration::from_secs(1)) {
            Some(UnitExit::Failed(err)) => assert_eq!(err.to_string(), "boom"),
            other => panic!("unexpected exit: {:?}", other),
        }
    }

    #[test]
    fn finished_unit_is_collected_without_waiting() {
        let mut unit = Supervised::spawn("test-quick", |_stop| Ok(7u8)).unwrap();
        let deadline = Instant::now() + Duration::from_secs(1);
        while !unit.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(matches!(unit.try_collect(), Some(UnitExit::Finished(7))));
    }
}
