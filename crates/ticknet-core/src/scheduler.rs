//! Tick-indexed task scheduler
//!
//! Callbacks are indexed by the absolute tick at which they must run, so
//! finding the tasks due this tick is a single map lookup no matter how many
//! timers are outstanding. One scheduler instance is created per game session
//! and handed to the loops that need it.
//!
//! Execution order within one call to [`Scheduler::process_tasks`]:
//!
//! 1. the immediate CRITICAL queue, in submission order
//! 2. tasks indexed under the current tick, CRITICAL → HIGH → NORMAL → LOW,
//!    submission order within a band
//! 3. repeating tasks that fired are re-indexed at `tick + interval`
//!
//! A failing callback (error or panic) is logged and does not stop the tasks
//! after it.

use crate::time::Tick;
use crate::{Error, Result, TaskId};
use indexmap::IndexSet;
use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use tracing::{trace, warn};

/// Error returned by a task callback
pub type TaskError = Box<dyn std::error::Error + Send + Sync>;

/// Result returned by a task callback
pub type TaskResult = std::result::Result<(), TaskError>;

type Callback = Box<dyn FnMut(Tick) -> TaskResult>;

/// Priority band of a scheduled task
///
/// Ordering follows urgency: `Critical > High > Normal > Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    /// Runs before everything else and, for immediate tasks, even while the
    /// owning loop is paused
    Critical,
}

struct ScheduledTask {
    callback: Callback,
    priority: Priority,
    /// Repeat interval in ticks, `None` for one-shot tasks
    interval: Option<u64>,
    /// Tick the task is indexed under, `None` while in the critical queue
    due_tick: Option<Tick>,
}

/// Summary of one processing pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Tick that was processed
    pub tick: Tick,
    /// Callbacks that completed successfully
    pub executed: usize,
    /// Callbacks that returned an error or panicked
    pub failed: usize,
}

impl TickReport {
    /// Total callbacks invoked
    pub fn ran(&self) -> usize {
        self.executed + self.failed
    }
}

/// Deterministic tick-indexed scheduler
pub struct Scheduler {
    /// Tick the next `process_tasks` call will execute
    current_tick: Tick,
    next_id: u64,
    tasks: HashMap<TaskId, ScheduledTask>,
    /// Tick → tasks due at that tick (insertion ordered)
    by_tick: HashMap<Tick, IndexSet<TaskId>>,
    /// Immediate CRITICAL tasks
    critical_queue: VecDeque<TaskId>,
}

impl Scheduler {
    /// Create a scheduler positioned at tick 0
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Create a scheduler whose next processed tick is `tick`
    pub fn starting_at(tick: Tick) -> Self {
        Self {
            current_tick: tick,
            next_id: 0,
            tasks: HashMap::new(),
            by_tick: HashMap::new(),
            critical_queue: VecDeque::new(),
        }
    }

    /// Schedule a one-shot task for the next processing pass
    ///
    /// CRITICAL tasks go to the immediate queue, which is also drained by
    /// [`Scheduler::process_critical`] while the owning loop is paused.
    pub fn schedule_once<F>(&mut self, callback: F, priority: Priority) -> TaskId
    where
        F: FnMut(Tick) -> TaskResult + 'static,
    {
        if priority == Priority::Critical {
            let id = self.allocate_id();
            self.tasks.insert(
                id,
                ScheduledTask {
                    callback: Box::new(callback),
                    priority,
                    interval: None,
                    due_tick: None,
                },
            );
            self.critical_queue.push_back(id);
            id
        } else {
            self.schedule_task(callback, priority, 0)
        }
    }

    /// Schedule a one-shot task `delay_ticks` after the current tick
    pub fn schedule_task<F>(&mut self, callback: F, priority: Priority, delay_ticks: u64) -> TaskId
    where
        F: FnMut(Tick) -> TaskResult + 'static,
    {
        let id = self.allocate_id();
        self.insert_at(
            id,
            ScheduledTask {
                callback: Box::new(callback),
                priority,
                interval: None,
                due_tick: None,
            },
            self.current_tick + delay_ticks,
        );
        id
    }

    /// Schedule a task that fires every `interval_ticks`, first after
    /// `initial_delay_ticks`
    ///
    /// The cadence is counted in ticks from the first firing, so a task first
    /// due at T fires at T, T+I, T+2I, … however long individual ticks take.
    pub fn schedule_repeating<F>(
        &mut self,
        callback: F,
        interval_ticks: u64,
        initial_delay_ticks: u64,
        priority: Priority,
    ) -> Result<TaskId>
    where
        F: FnMut(Tick) -> TaskResult + 'static,
    {
        if interval_ticks == 0 {
            return Err(Error::InvalidInterval);
        }
        let id = self.allocate_id();
        self.insert_at(
            id,
            ScheduledTask {
                callback: Box::new(callback),
                priority,
                interval: Some(interval_ticks),
                due_tick: None,
            },
            self.current_tick + initial_delay_ticks,
        );
        Ok(id)
    }

    /// Cancel a task
    ///
    /// Returns `false` if the task is unknown or a one-shot task that already
    /// fired. A cancelled repeating task is never re-registered.
    pub fn cancel(&mut self, id: TaskId) -> bool {
        let Some(task) = self.tasks.remove(&id) else {
            return false;
        };
        match task.due_tick {
            Some(tick) => {
                if let Some(slot) = self.by_tick.get_mut(&tick) {
                    slot.shift_remove(&id);
                    if slot.is_empty() {
                        self.by_tick.remove(&tick);
                    }
                }
            }
            None => self.critical_queue.retain(|queued| *queued != id),
        }
        true
    }

    /// Drain the immediate CRITICAL queue without advancing the tick
    pub fn process_critical(&mut self) -> TickReport {
        let tick = self.current_tick;
        let mut report = TickReport {
            tick,
            ..TickReport::default()
        };
        while let Some(id) = self.critical_queue.pop_front() {
            self.run(id, tick, &mut report);
        }
        report
    }

    /// Run everything due this tick, then advance to the next tick
    ///
    /// Called exactly once per tick by the owning loop.
    pub fn process_tasks(&mut self) -> TickReport {
        let mut report = self.process_critical();
        let tick = self.current_tick;

        if let Some(slot) = self.by_tick.remove(&tick) {
            let mut due: Vec<(Priority, TaskId)> = slot
                .into_iter()
                .filter_map(|id| self.tasks.get(&id).map(|task| (task.priority, id)))
                .collect();
            // Stable: submission order is kept within a band
            due.sort_by(|a, b| b.0.cmp(&a.0));

            for (_, id) in due {
                self.run(id, tick, &mut report);
            }
        }

        trace!(tick, executed = report.executed, failed = report.failed, "processed tick");
        self.current_tick += 1;
        report
    }

    /// Tick the next `process_tasks` call will execute
    pub fn current_tick(&self) -> Tick {
        self.current_tick
    }

    /// Tick at which a task will next fire
    ///
    /// Returns `None` for unknown tasks and for tasks in the immediate queue.
    pub fn next_fire_tick(&self, id: TaskId) -> Option<Tick> {
        self.tasks.get(&id).and_then(|task| task.due_tick)
    }

    /// Check if a task is still registered
    pub fn is_scheduled(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    /// Number of tasks indexed under `tick`
    pub fn due_at(&self, tick: Tick) -> usize {
        self.by_tick.get(&tick).map_or(0, IndexSet::len)
    }

    /// Number of outstanding tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Check if no tasks are outstanding
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Drop every outstanding task
    pub fn clear(&mut self) {
        self.tasks.clear();
        self.by_tick.clear();
        self.critical_queue.clear();
    }

    fn allocate_id(&mut self) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        id
    }

    fn insert_at(&mut self, id: TaskId, mut task: ScheduledTask, tick: Tick) {
        task.due_tick = Some(tick);
        self.by_tick.entry(tick).or_default().insert(id);
        self.tasks.insert(id, task);
    }

    fn run(&mut self, id: TaskId, tick: Tick, report: &mut TickReport) {
        let Some(mut task) = self.tasks.remove(&id) else {
            return;
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| (task.callback)(tick)));
        match outcome {
            Ok(Ok(())) => report.executed += 1,
            Ok(Err(error)) => {
                report.failed += 1;
                warn!(task = %id, tick, %error, "scheduled task failed");
            }
            Err(_) => {
                report.failed += 1;
                warn!(task = %id, tick, "scheduled task panicked");
            }
        }

        if let Some(interval) = task.interval {
            self.insert_at(id, task, tick + interval);
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("current_tick", &self.current_tick)
            .field("tasks", &self.tasks.len())
            .field("indexed_ticks", &self.by_tick.len())
            .field("critical_queue", &self.critical_queue.len())
            .finish()
    }
}
