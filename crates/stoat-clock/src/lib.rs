//! Virtual clock: simulated timers, microtasks, and animation frames.
//!
//! One [`ClockService`] exists per process. A test acquires it through
//! [`ClockService::acquire`], which suspends until the caller is the sole
//! owner, resets the simulated state, and hands back a [`ClockHandle`].
//! Advancing time fires due timer callbacks synchronously; microtasks
//! drain in bounded rounds; animation frames fire in registration order.
//! Nothing here touches the wall clock.

#![warn(clippy::all)]

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use stoat_core::error::{CoreResult, TestError};
use tokio::sync::{Mutex as OwnerMutex, OwnedMutexGuard};

/// Upper bound on scheduler steps one `drain` call may take before it is
/// declared stalled. Each microtask round, frame burst, and timer advance
/// counts as one step.
const DRAIN_STEP_LIMIT: usize = 10_000;

/// A callback scheduled on the clock. Receives a scheduling handle so it
/// can enqueue further work without re-entering the clock lock.
pub type ClockTask = Box<dyn FnOnce(&ClockScheduler) + Send>;

struct TimerEntry {
    id: u64,
    when: u64,
    /// Insertion order, breaks ties between timers due at the same instant.
    seq: u64,
    callback: ClockTask,
    cancelled: bool,
}

struct FrameEntry {
    id: u64,
    callback: ClockTask,
    cancelled: bool,
}

struct ClockState {
    now: u64,
    next_id: u64,
    next_seq: u64,
    timers: Vec<TimerEntry>,
    microtasks: VecDeque<ClockTask>,
    frames: VecDeque<FrameEntry>,
    /// Bumped on every ownership change; handles from lapsed ownerships
    /// fail rather than mutate a later owner's state.
    epoch: u64,
}

impl ClockState {
    fn fresh(epoch: u64) -> Self {
        Self {
            now: 0,
            next_id: 1,
            next_seq: 0,
            timers: Vec::new(),
            microtasks: VecDeque::new(),
            frames: VecDeque::new(),
            epoch,
        }
    }

    fn next_due(&self, limit: Option<u64>) -> Option<usize> {
        self.timers
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.cancelled && limit.is_none_or(|l| t.when <= l))
            .min_by_key(|(_, t)| (t.when, t.seq))
            .map(|(i, _)| i)
    }
}

/// Scheduling view of the clock, handed to callbacks.
#[derive(Clone)]
pub struct ClockScheduler {
    state: Arc<Mutex<ClockState>>,
    epoch: u64,
}

impl ClockScheduler {
    /// Schedule `callback` to fire once virtual time reaches now + `delay_ms`.
    pub fn set_timer(
        &self,
        delay_ms: u64,
        callback: impl FnOnce(&ClockScheduler) + Send + 'static,
    ) -> CoreResult<u64> {
        let mut st = self.lock()?;
        let id = st.next_id;
        st.next_id += 1;
        let seq = st.next_seq;
        st.next_seq += 1;
        let when = st.now + delay_ms;
        st.timers.push(TimerEntry {
            id,
            when,
            seq,
            callback: Box::new(callback),
            cancelled: false,
        });
        Ok(id)
    }

    /// Cancel a pending timer. Returns whether the id was still pending.
    pub fn clear_timer(&self, id: u64) -> CoreResult<bool> {
        let mut st = self.lock()?;
        match st.timers.iter_mut().find(|t| t.id == id && !t.cancelled) {
            Some(timer) => {
                timer.cancelled = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Queue a microtask for the next `tick` round.
    pub fn queue_microtask(
        &self,
        callback: impl FnOnce(&ClockScheduler) + Send + 'static,
    ) -> CoreResult<()> {
        self.lock()?.microtasks.push_back(Box::new(callback));
        Ok(())
    }

    /// Register an animation-frame callback.
    pub fn request_frame(
        &self,
        callback: impl FnOnce(&ClockScheduler) + Send + 'static,
    ) -> CoreResult<u64> {
        let mut st = self.lock()?;
        let id = st.next_id;
        st.next_id += 1;
        st.frames.push_back(FrameEntry {
            id,
            callback: Box::new(callback),
            cancelled: false,
        });
        Ok(id)
    }

    /// Cancel a pending animation-frame callback.
    pub fn cancel_frame(&self, id: u64) -> CoreResult<bool> {
        let mut st = self.lock()?;
        match st.frames.iter_mut().find(|f| f.id == id && !f.cancelled) {
            Some(frame) => {
                frame.cancelled = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Current virtual timestamp in milliseconds.
    pub fn now(&self) -> CoreResult<u64> {
        Ok(self.lock()?.now)
    }

    fn lock(&self) -> CoreResult<parking_lot::MutexGuard<'_, ClockState>> {
        let st = self.state.lock();
        if st.epoch != self.epoch {
            return Err(TestError::ClockRevoked);
        }
        Ok(st)
    }
}

/// Owner's view of the clock: scheduling plus time advancement.
#[derive(Clone)]
pub struct ClockHandle {
    sched: ClockScheduler,
}

impl ClockHandle {
    /// The scheduling view, as passed to callbacks.
    pub fn scheduler(&self) -> &ClockScheduler {
        &self.sched
    }

    pub fn set_timer(
        &self,
        delay_ms: u64,
        callback: impl FnOnce(&ClockScheduler) + Send + 'static,
    ) -> CoreResult<u64> {
        self.sched.set_timer(delay_ms, callback)
    }

    pub fn clear_timer(&self, id: u64) -> CoreResult<bool> {
        self.sched.clear_timer(id)
    }

    pub fn queue_microtask(
        &self,
        callback: impl FnOnce(&ClockScheduler) + Send + 'static,
    ) -> CoreResult<()> {
        self.sched.queue_microtask(callback)
    }

    pub fn request_frame(
        &self,
        callback: impl FnOnce(&ClockScheduler) + Send + 'static,
    ) -> CoreResult<u64> {
        self.sched.request_frame(callback)
    }

    pub fn cancel_frame(&self, id: u64) -> CoreResult<bool> {
        self.sched.cancel_frame(id)
    }

    pub fn now(&self) -> CoreResult<u64> {
        self.sched.now()
    }

    /// Advance virtual time by `ms`, synchronously firing every timer due
    /// within the window in (scheduled-time, insertion) order. Timers a
    /// callback schedules inside the window fire in the same advance.
    /// Returns the number of callbacks fired.
    pub fn time(&self, ms: u64) -> CoreResult<usize> {
        let target = {
            let st = self.sched.lock()?;
            st.now + ms
        };
        let mut fired = 0;
        loop {
            let task = {
                let mut st = self.sched.lock()?;
                st.timers.retain(|t| !t.cancelled);
                match st.next_due(Some(target)) {
                    Some(idx) => {
                        let timer = st.timers.remove(idx);
                        st.now = st.now.max(timer.when);
                        Some(timer.callback)
                    }
                    None => {
                        st.now = target;
                        None
                    }
                }
            };
            match task {
                Some(callback) => {
                    callback(&self.sched);
                    fired += 1;
                }
                None => break,
            }
        }
        Ok(fired)
    }

    /// Drain `rounds` rounds of microtasks. Each round runs only the tasks
    /// queued strictly before it began, so a self-requeuing task cannot
    /// block a round forever. Returns the number of tasks run.
    pub fn tick(&self, rounds: usize) -> CoreResult<usize> {
        let mut ran = 0;
        for _ in 0..rounds {
            let queued = self.sched.lock()?.microtasks.len();
            for _ in 0..queued {
                let task = self.sched.lock()?.microtasks.pop_front();
                let Some(task) = task else { break };
                task(&self.sched);
                ran += 1;
            }
        }
        Ok(ran)
    }

    /// Fire up to `count` pending animation-frame callbacks in registration
    /// order. Callbacks registered mid-call join the back of the queue and
    /// are eligible if the count allows. Returns the number fired.
    pub fn frame(&self, count: usize) -> CoreResult<usize> {
        let mut fired = 0;
        while fired < count {
            let task = {
                let mut st = self.sched.lock()?;
                loop {
                    match st.frames.pop_front() {
                        Some(frame) if frame.cancelled => continue,
                        Some(frame) => break Some(frame.callback),
                        None => break None,
                    }
                }
            };
            match task {
                Some(callback) => {
                    callback(&self.sched);
                    fired += 1;
                }
                None => break,
            }
        }
        Ok(fired)
    }

    /// Repeatedly flush microtasks, frames, and the nearest pending timer
    /// until nothing remains pending. Fails with `ClockStalled` once the
    /// step budget is exceeded, which guards against callbacks that
    /// perpetually reschedule work.
    pub fn drain(&self) -> CoreResult<usize> {
        let mut ran = 0;
        for _ in 0..DRAIN_STEP_LIMIT {
            enum Step {
                Microtasks,
                Frames(usize),
                Timer(u64),
                Done,
            }
            let step = {
                let st = self.sched.lock()?;
                if !st.microtasks.is_empty() {
                    Step::Microtasks
                } else {
                    let frames = st.frames.iter().filter(|f| !f.cancelled).count();
                    if frames > 0 {
                        Step::Frames(frames)
                    } else {
                        match st.next_due(None) {
                            Some(idx) => Step::Timer(st.timers[idx].when.saturating_sub(st.now)),
                            None => Step::Done,
                        }
                    }
                }
            };
            match step {
                Step::Microtasks => ran += self.tick(1)?,
                Step::Frames(count) => ran += self.frame(count)?,
                Step::Timer(delta) => ran += self.time(delta)?,
                Step::Done => return Ok(ran),
            }
        }
        tracing::warn!(
            steps = DRAIN_STEP_LIMIT,
            "virtual clock drain exceeded its step budget"
        );
        Err(TestError::ClockStalled(DRAIN_STEP_LIMIT))
    }
}

/// Guard representing clock ownership. Dropping it revokes outstanding
/// handles and lets the next waiter acquire the clock.
pub struct ClockOwnership {
    state: Arc<Mutex<ClockState>>,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for ClockOwnership {
    fn drop(&mut self) {
        self.state.lock().epoch += 1;
    }
}

/// Per-process clock service. At most one test owns the clock at a time;
/// waiters are served in arrival order.
pub struct ClockService {
    state: Arc<Mutex<ClockState>>,
    owner: Arc<OwnerMutex<()>>,
}

impl Default for ClockService {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockService {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ClockState::fresh(0))),
            owner: Arc::new(OwnerMutex::new(())),
        }
    }

    /// Suspend until the caller is sole owner of the clock, then reset the
    /// simulated state and return a handle plus the ownership guard.
    pub async fn acquire(&self) -> (ClockHandle, ClockOwnership) {
        let guard = Arc::clone(&self.owner).lock_owned().await;
        let epoch = {
            let mut st = self.state.lock();
            let epoch = st.epoch + 1;
            *st = ClockState::fresh(epoch);
            epoch
        };
        tracing::debug!(epoch, "virtual clock acquired");
        (
            ClockHandle {
                sched: ClockScheduler {
                    state: Arc::clone(&self.state),
                    epoch,
                },
            },
            ClockOwnership {
                state: Arc::clone(&self.state),
                _guard: guard,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn owned_clock(service: &ClockService) -> (ClockHandle, ClockOwnership) {
        service.acquire().await
    }

    #[tokio::test]
    async fn timer_fires_exactly_once_at_due_time() {
        let service = ClockService::new();
        let (clock, _own) = owned_clock(&service).await;
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        clock
            .set_timer(100, move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .expect("set timer");

        assert_eq!(clock.time(99).expect("advance"), 0);
        assert_eq!(clock.time(1).expect("advance"), 1);
        assert_eq!(clock.time(1000).expect("advance"), 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn split_advances_match_one_big_advance() {
        let service = ClockService::new();
        let (clock, _own) = owned_clock(&service).await;
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        clock
            .set_timer(100, move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .expect("set timer");

        clock.time(50).expect("advance");
        assert_eq!(count.load(Ordering::SeqCst), 0);
        clock.time(50).expect("advance");
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timers_fire_in_time_then_insertion_order() {
        let service = ClockService::new();
        let (clock, _own) = owned_clock(&service).await;
        let order = Arc::new(Mutex::new(Vec::new()));
        for (delay, label) in [(20u64, "b1"), (10, "a"), (20, "b2")] {
            let order = Arc::clone(&order);
            clock
                .set_timer(delay, move |_| order.lock().push(label))
                .expect("set timer");
        }
        clock.time(30).expect("advance");
        assert_eq!(*order.lock(), vec!["a", "b1", "b2"]);
    }

    #[tokio::test]
    async fn nested_timer_within_window_fires_in_same_advance() {
        let service = ClockService::new();
        let (clock, _own) = owned_clock(&service).await;
        let order = Arc::new(Mutex::new(Vec::new()));
        let outer = Arc::clone(&order);
        clock
            .set_timer(10, move |s| {
                outer.lock().push("outer");
                let inner = Arc::clone(&outer);
                s.set_timer(5, move |_| inner.lock().push("inner"))
                    .expect("nested timer");
            })
            .expect("set timer");

        clock.time(20).expect("advance");
        assert_eq!(*order.lock(), vec!["outer", "inner"]);
        assert_eq!(clock.now().expect("now"), 20);
    }

    #[tokio::test]
    async fn cleared_timer_never_fires() {
        let service = ClockService::new();
        let (clock, _own) = owned_clock(&service).await;
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let id = clock
            .set_timer(10, move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .expect("set timer");
        assert!(clock.clear_timer(id).expect("clear"));
        assert!(!clock.clear_timer(id).expect("second clear"));
        clock.time(100).expect("advance");
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn tick_runs_one_round_at_a_time() {
        let service = ClockService::new();
        let (clock, _own) = owned_clock(&service).await;
        let count = Arc::new(AtomicUsize::new(0));

        fn requeue(s: &ClockScheduler, count: Arc<AtomicUsize>) {
            s.queue_microtask(move |s2| {
                count.fetch_add(1, Ordering::SeqCst);
                requeue(s2, Arc::clone(&count));
            })
            .expect("queue microtask");
        }
        requeue(clock.scheduler(), Arc::clone(&count));

        assert_eq!(clock.tick(1).expect("tick"), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(clock.tick(3).expect("tick"), 3);
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn frames_fire_in_registration_order() {
        let service = ClockService::new();
        let (clock, _own) = owned_clock(&service).await;
        let order = Arc::new(Mutex::new(Vec::new()));
        for label in ["f1", "f2", "f3"] {
            let order = Arc::clone(&order);
            clock
                .request_frame(move |_| order.lock().push(label))
                .expect("request frame");
        }
        assert_eq!(clock.frame(2).expect("frame"), 2);
        assert_eq!(*order.lock(), vec!["f1", "f2"]);
        assert_eq!(clock.frame(5).expect("frame"), 1);
        assert_eq!(*order.lock(), vec!["f1", "f2", "f3"]);
    }

    #[tokio::test]
    async fn cancelled_frame_is_skipped() {
        let service = ClockService::new();
        let (clock, _own) = owned_clock(&service).await;
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let id = clock
            .request_frame(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .expect("request frame");
        assert!(clock.cancel_frame(id).expect("cancel"));
        assert_eq!(clock.frame(1).expect("frame"), 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn drain_settles_mixed_workloads() {
        let service = ClockService::new();
        let (clock, _own) = owned_clock(&service).await;
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = Arc::clone(&order);
        clock
            .set_timer(10, move |s| {
                o.lock().push("timer");
                let o2 = Arc::clone(&o);
                s.queue_microtask(move |_| o2.lock().push("micro"))
                    .expect("queue microtask");
            })
            .expect("set timer");
        let o = Arc::clone(&order);
        clock
            .request_frame(move |_| o.lock().push("frame"))
            .expect("request frame");

        let ran = clock.drain().expect("drain");
        assert_eq!(ran, 3);
        assert_eq!(*order.lock(), vec!["frame", "timer", "micro"]);
    }

    #[tokio::test]
    async fn drain_reports_stall_for_perpetual_reschedulers() {
        let service = ClockService::new();
        let (clock, _own) = owned_clock(&service).await;

        fn perpetual(s: &ClockScheduler) {
            s.set_timer(1, perpetual).expect("reschedule");
        }
        clock.set_timer(1, perpetual).expect("seed timer");

        match clock.drain() {
            Err(TestError::ClockStalled(_)) => {}
            other => panic!("expected ClockStalled, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn second_owner_waits_for_settlement() {
        let service = Arc::new(ClockService::new());
        let (clock, ownership) = service.acquire().await;
        clock.set_timer(5, |_| {}).expect("set timer");

        let service2 = Arc::clone(&service);
        let second = tokio::spawn(async move {
            let (clock2, _own2) = service2.acquire().await;
            clock2.now().expect("fresh clock")
        });

        // Give the contender a chance to park on the ownership lock.
        tokio::task::yield_now().await;
        assert!(!second.is_finished());

        clock.time(5).expect("advance");
        drop(ownership);

        let now = second.await.expect("second owner");
        assert_eq!(now, 0, "state resets for each owner");
    }

    #[tokio::test]
    async fn lapsed_handle_is_revoked() {
        let service = ClockService::new();
        let (clock, ownership) = service.acquire().await;
        drop(ownership);
        match clock.time(10) {
            Err(TestError::ClockRevoked) => {}
            other => panic!("expected ClockRevoked, got {other:?}"),
        }
    }
}
