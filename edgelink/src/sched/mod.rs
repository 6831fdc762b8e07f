//! Cooperative job scheduler.
//!
//! A single-threaded delay queue: callers enqueue jobs to run now or after a
//! delay, receive a cancellable [`JobHandle`], and periodically drain due
//! jobs from their event loop. Jobs never run concurrently with anything
//! else; the event loop alternates between waiting (bounded by
//! [`Scheduler::time_to_next`]) and draining.
//!
//! Jobs are `FnOnce(&mut Ctx)` closures. By convention they capture plain
//! identifiers and re-resolve them against `Ctx` when they run, so that a
//! job firing after its target was torn down observes "not found" instead
//! of a dangling reference.
//!
//! # Ordering
//!
//! Jobs run in deadline order; jobs sharing a deadline run in enqueue order
//! (FIFO, via a monotonic sequence number).

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

/// A job owned by the scheduler until it runs or is cancelled.
pub type Job<Ctx> = Box<dyn FnOnce(&mut Ctx)>;

/// Handle to a pending job, usable to cancel it.
///
/// Handles are never reused by a scheduler instance. Cancelling a handle
/// whose job already ran (or was already cancelled) is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobHandle(u64);

struct ScheduledJob<Ctx> {
    due_at: Instant,
    sequence: u64,
    handle: JobHandle,
    run: Job<Ctx>,
}

// Ordering for BinaryHeap: earliest deadline first, then lowest sequence
// (oldest) first. BinaryHeap is a max-heap, so both comparisons are
// reversed.
impl<Ctx> PartialEq for ScheduledJob<Ctx> {
    fn eq(&self, other: &Self) -> bool {
        self.due_at == other.due_at && self.sequence == other.sequence
    }
}

impl<Ctx> Eq for ScheduledJob<Ctx> {}

impl<Ctx> PartialOrd for ScheduledJob<Ctx> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<Ctx> Ord for ScheduledJob<Ctx> {
    fn cmp(&self, other: &Self) -> Ordering {
        match other.due_at.cmp(&self.due_at) {
            Ordering::Equal => other.sequence.cmp(&self.sequence),
            ordering => ordering,
        }
    }
}

/// Single-threaded cooperative job queue.
pub struct Scheduler<Ctx> {
    heap: BinaryHeap<ScheduledJob<Ctx>>,
    next_handle: u64,
    next_sequence: u64,
}

impl<Ctx> Scheduler<Ctx> {
    /// Creates an empty scheduler.
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_handle: 1,
            next_sequence: 0,
        }
    }

    /// Schedules a job for immediate execution at the next drain.
    pub fn schedule_now(&mut self, job: Job<Ctx>) -> JobHandle {
        self.schedule_after(Duration::ZERO, job)
    }

    /// Schedules a job to run once `delay` has elapsed.
    pub fn schedule_after(&mut self, delay: Duration, job: Job<Ctx>) -> JobHandle {
        let handle = JobHandle(self.next_handle);
        self.next_handle += 1;
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(ScheduledJob {
            due_at: Instant::now() + delay,
            sequence,
            handle,
            run: job,
        });
        handle
    }

    /// Removes a pending job.
    ///
    /// Returns true if the job was still pending. A handle whose job
    /// already ran (or was cancelled before) is not found and this is a
    /// no-op returning false.
    pub fn cancel(&mut self, handle: JobHandle) -> bool {
        let before = self.heap.len();
        let remaining: Vec<_> = self.heap.drain().filter(|job| job.handle != handle).collect();
        let removed = before != remaining.len();
        self.heap = BinaryHeap::from(remaining);
        removed
    }

    /// Returns the time until the next job is due, or `None` when the
    /// queue is empty. An overdue job reports `Duration::ZERO`.
    ///
    /// The caller's event loop bounds its wait step by this value.
    pub fn time_to_next(&self) -> Option<Duration> {
        let now = Instant::now();
        self.heap
            .peek()
            .map(|job| job.due_at.saturating_duration_since(now))
    }

    /// Moves every currently-due job out of the queue and returns them in
    /// execution order.
    ///
    /// Draining before running means a job may freely schedule or cancel
    /// other jobs on this scheduler; jobs scheduled while the drained batch
    /// executes run no earlier than the next drain.
    pub fn take_due(&mut self) -> Vec<Job<Ctx>> {
        let now = Instant::now();
        let mut due = Vec::new();
        while self.heap.peek().is_some_and(|job| job.due_at <= now) {
            if let Some(job) = self.heap.pop() {
                due.push(job.run);
            }
        }
        due
    }

    /// Number of pending jobs.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// True when no jobs are pending.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl<Ctx> Default for Scheduler<Ctx> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Ctx> std::fmt::Debug for Scheduler<Ctx> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending", &self.heap.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain_into(sched: &mut Scheduler<Vec<&'static str>>, log: &mut Vec<&'static str>) {
        for job in sched.take_due() {
            job(log);
        }
    }

    #[test]
    fn test_fifo_among_equal_deadlines() {
        let mut sched = Scheduler::new();
        sched.schedule_now(Box::new(|log: &mut Vec<_>| log.push("first")));
        sched.schedule_now(Box::new(|log: &mut Vec<_>| log.push("second")));
        sched.schedule_now(Box::new(|log: &mut Vec<_>| log.push("third")));

        let mut log = Vec::new();
        drain_into(&mut sched, &mut log);
        assert_eq!(log, vec!["first", "second", "third"]);
        assert!(sched.is_empty());
    }

    #[test]
    fn test_delayed_job_not_due_yet() {
        let mut sched = Scheduler::new();
        sched.schedule_now(Box::new(|log: &mut Vec<_>| log.push("now")));
        sched.schedule_after(
            Duration::from_secs(3600),
            Box::new(|log: &mut Vec<_>| log.push("later")),
        );

        let mut log = Vec::new();
        drain_into(&mut sched, &mut log);
        assert_eq!(log, vec!["now"]);
        assert_eq!(sched.len(), 1);
    }

    #[test]
    fn test_cancel_prevents_execution() {
        let mut sched = Scheduler::new();
        let keep = sched.schedule_now(Box::new(|log: &mut Vec<_>| log.push("keep")));
        let drop = sched.schedule_now(Box::new(|log: &mut Vec<_>| log.push("drop")));

        assert!(sched.cancel(drop));
        // Cancelling again is a no-op.
        assert!(!sched.cancel(drop));
        let _ = keep;

        let mut log = Vec::new();
        drain_into(&mut sched, &mut log);
        assert_eq!(log, vec!["keep"]);
    }

    #[test]
    fn test_cancel_after_run_is_noop() {
        let mut sched = Scheduler::new();
        let handle = sched.schedule_now(Box::new(|log: &mut Vec<_>| log.push("ran")));

        let mut log = Vec::new();
        drain_into(&mut sched, &mut log);
        assert_eq!(log, vec!["ran"]);
        assert!(!sched.cancel(handle));
    }

    #[test]
    fn test_time_to_next() {
        let mut sched: Scheduler<Vec<&'static str>> = Scheduler::new();
        assert_eq!(sched.time_to_next(), None);

        sched.schedule_after(Duration::from_secs(60), Box::new(|_| {}));
        let remaining = sched.time_to_next().unwrap();
        assert!(remaining <= Duration::from_secs(60));
        assert!(remaining > Duration::from_secs(59));

        sched.schedule_now(Box::new(|_| {}));
        assert_eq!(sched.time_to_next(), Some(Duration::ZERO));
    }

    #[test]
    fn test_job_scheduled_while_draining_waits_for_next_drain() {
        // Jobs are moved out before execution, so a job enqueued by a
        // running job lands in the queue for the next drain.
        struct Ctx {
            sched: Scheduler<Ctx>,
            log: Vec<&'static str>,
        }
        let mut ctx = Ctx {
            sched: Scheduler::new(),
            log: Vec::new(),
        };
        ctx.sched.schedule_now(Box::new(|ctx: &mut Ctx| {
            ctx.log.push("outer");
            ctx.sched
                .schedule_now(Box::new(|ctx: &mut Ctx| ctx.log.push("inner")));
        }));

        let due = ctx.sched.take_due();
        for job in due {
            job(&mut ctx);
        }
        assert_eq!(ctx.log, vec!["outer"]);

        let due = ctx.sched.take_due();
        for job in due {
            job(&mut ctx);
        }
        assert_eq!(ctx.log, vec!["outer", "inner"]);
    }

    #[test]
    fn test_deadline_order_over_insertion_order() {
        let mut sched = Scheduler::new();
        sched.schedule_after(
            Duration::from_millis(5),
            Box::new(|log: &mut Vec<_>| log.push("later")),
        );
        sched.schedule_now(Box::new(|log: &mut Vec<_>| log.push("sooner")));

        std::thread::sleep(Duration::from_millis(10));
        let mut log = Vec::new();
        drain_into(&mut sched, &mut log);
        assert_eq!(log, vec!["sooner", "later"]);
    }
}
