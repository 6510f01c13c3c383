//! Process-local ready-set priority queue.
//!
//! Min-score-first: `priority_score = -priority - urgency(deadline) -
//! aging_boost`, where the aging boost grows with queue age so no task
//! starves. Overdue deadlines subtract a large constant and trump
//! everything else. The configured strategy governs drain order only;
//! the ready predicate (dependencies satisfied, retry backoff elapsed)
//! is the same for all strategies.
//!
//! The scheduler loop drives the queue through `peek_ready` /
//! `may_assign` / `note_assignment`; entries leave the set via `remove`
//! once assigned or cancelled.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use uuid::Uuid;

use crate::domain::models::{AgentType, SchedulingStrategy};

/// Score penalty applied to tasks whose deadline has already passed.
const OVERDUE_PENALTY: f64 = 1000.0;

/// Compute a task's scheduling score. Lower runs first.
pub fn priority_score(
    priority: i8,
    deadline: Option<DateTime<Utc>>,
    aging_boost: f64,
    deadline_weight: f64,
    now: DateTime<Utc>,
) -> f64 {
    let mut score = -f64::from(priority);

    if let Some(deadline) = deadline {
        let seconds_left = (deadline - now).num_seconds();
        if seconds_left <= 0 {
            score -= OVERDUE_PENALTY;
        } else {
            let hours_left = seconds_left as f64 / 3600.0;
            let urgency = 1.0 / (hours_left + 1.0);
            score -= urgency * deadline_weight * 100.0;
        }
    }

    score - aging_boost
}

/// A task waiting in the ready set.
#[derive(Debug, Clone)]
pub struct QueuedTask {
    pub task_id: Uuid,
    pub priority: i8,
    pub created_at: DateTime<Utc>,
    pub deadline: Option<DateTime<Utc>>,
    pub agent_type: Option<AgentType>,
    /// Unfinished upstream tasks; empty means unblocked.
    pub dependencies: HashSet<Uuid>,
    /// Retry backoff gate; the task is not eligible before this instant.
    pub not_before: Option<DateTime<Utc>>,
    pub priority_score: f64,
}

impl QueuedTask {
    pub fn new(task_id: Uuid, priority: i8, created_at: DateTime<Utc>) -> Self {
        Self {
            task_id,
            priority,
            created_at,
            deadline: None,
            agent_type: None,
            dependencies: HashSet::new(),
            not_before: None,
            priority_score: 0.0,
        }
    }

    /// Ready to be offered to an agent: unblocked and past any backoff.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.dependencies.is_empty() && !self.not_before.is_some_and(|t| t > now)
    }
}

/// Agent capacity snapshot used by ML-optimized agent selection.
#[derive(Debug, Clone)]
pub struct AgentCapacity {
    pub agent_id: Uuid,
    pub agent_type: AgentType,
    pub max_concurrent: u32,
    pub current_load: u32,
    pub success_rate: f64,
    pub avg_execution_time_ms: f64,
}

/// Ready-set statistics for the queue stats endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct QueueStats {
    pub total_tasks: usize,
    pub by_priority: HashMap<i8, usize>,
    pub by_agent_type: HashMap<String, usize>,
    pub oldest_task_age_seconds: f64,
    pub avg_wait_time_seconds: f64,
}

struct Inner {
    tasks: HashMap<Uuid, QueuedTask>,
    /// Tasks handed to each agent recently; drives fair-share and
    /// round-robin gating and the ML fairness factor.
    agent_task_counts: HashMap<Uuid, u64>,
}

/// The mutex guards structure manipulation only; no I/O happens under it.
pub struct ReadyQueue {
    strategy: SchedulingStrategy,
    max_size: usize,
    aging_factor: f64,
    deadline_weight: f64,
    round_robin_quantum: u64,
    inner: Mutex<Inner>,
}

impl ReadyQueue {
    pub fn new(
        strategy: SchedulingStrategy,
        max_size: usize,
        aging_factor: f64,
        deadline_weight: f64,
        round_robin_quantum: u64,
    ) -> Self {
        Self {
            strategy,
            max_size,
            aging_factor,
            deadline_weight,
            round_robin_quantum,
            inner: Mutex::new(Inner {
                tasks: HashMap::new(),
                agent_task_counts: HashMap::new(),
            }),
        }
    }

    pub fn strategy(&self) -> SchedulingStrategy {
        self.strategy
    }

    /// Add a task to the ready set. Returns false when the queue is full
    /// or the task is already queued.
    pub fn enqueue(&self, mut task: QueuedTask) -> bool {
        let now = Utc::now();
        let mut inner = self.inner.lock().expect("ready queue poisoned");
        if inner.tasks.len() >= self.max_size || inner.tasks.contains_key(&task.task_id) {
            return false;
        }

        task.priority_score =
            priority_score(task.priority, task.deadline, 0.0, self.deadline_weight, now);
        inner.tasks.insert(task.task_id, task);
        true
    }

    pub fn contains(&self, task_id: Uuid) -> bool {
        self.inner.lock().expect("ready queue poisoned").tasks.contains_key(&task_id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("ready queue poisoned").tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove a task (cancellation or assignment).
    pub fn remove(&self, task_id: Uuid) -> bool {
        let mut inner = self.inner.lock().expect("ready queue poisoned");
        inner.tasks.remove(&task_id).is_some()
    }

    /// Re-score a task after a priority change.
    pub fn update_priority(&self, task_id: Uuid, new_priority: i8) -> bool {
        let now = Utc::now();
        let deadline_weight = self.deadline_weight;
        let mut inner = self.inner.lock().expect("ready queue poisoned");
        match inner.tasks.get_mut(&task_id) {
            Some(task) => {
                task.priority = new_priority;
                task.priority_score =
                    priority_score(new_priority, task.deadline, 0.0, deadline_weight, now);
                true
            }
            None => false,
        }
    }

    /// Block a queued task on another task.
    pub fn add_dependency(&self, task_id: Uuid, dep: Uuid) -> bool {
        let mut inner = self.inner.lock().expect("ready queue poisoned");
        match inner.tasks.get_mut(&task_id) {
            Some(task) => {
                task.dependencies.insert(dep);
                true
            }
            None => false,
        }
    }

    /// Drop `completed` from every dependency set, unblocking dependents.
    pub fn resolve_dependency(&self, completed: Uuid) -> usize {
        let mut inner = self.inner.lock().expect("ready queue poisoned");
        let mut unblocked = 0;
        for task in inner.tasks.values_mut() {
            if task.dependencies.remove(&completed) && task.dependencies.is_empty() {
                unblocked += 1;
            }
        }
        unblocked
    }

    /// Recompute every score with the current age boost. Called once per
    /// scheduler tick.
    pub fn apply_aging(&self, now: DateTime<Utc>) {
        let mut inner = self.inner.lock().expect("ready queue poisoned");
        for task in inner.tasks.values_mut() {
            let age_minutes = (now - task.created_at).num_seconds().max(0) as f64 / 60.0;
            let aging_boost = age_minutes * self.aging_factor;
            task.priority_score = priority_score(
                task.priority,
                task.deadline,
                aging_boost,
                self.deadline_weight,
                now,
            );
        }
    }

    /// Ready tasks in strategy order, up to `limit`. Does not remove;
    /// the scheduler removes entries once assignment succeeds.
    pub fn peek_ready(&self, limit: usize, now: DateTime<Utc>) -> Vec<QueuedTask> {
        let inner = self.inner.lock().expect("ready queue poisoned");
        let mut ready: Vec<&QueuedTask> =
            inner.tasks.values().filter(|t| t.is_ready(now)).collect();

        match self.strategy {
            SchedulingStrategy::Fifo => ready.sort_by_key(|t| t.created_at),
            SchedulingStrategy::Deadline => ready.sort_by(|a, b| match (a.deadline, b.deadline) {
                (Some(da), Some(db)) => da.cmp(&db),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => a.priority_score.total_cmp(&b.priority_score),
            }),
            _ => ready.sort_by(|a, b| {
                a.priority_score
                    .total_cmp(&b.priority_score)
                    .then_with(|| a.created_at.cmp(&b.created_at))
            }),
        }

        ready.into_iter().take(limit).cloned().collect()
    }

    /// Strategy gate consulted before handing a task to `agent_id`.
    pub fn may_assign(&self, agent_id: Uuid) -> bool {
        let mut inner = self.inner.lock().expect("ready queue poisoned");
        match self.strategy {
            SchedulingStrategy::FairShare => {
                let min = inner.agent_task_counts.values().copied().min().unwrap_or(0);
                inner.agent_task_counts.get(&agent_id).copied().unwrap_or(0) <= min + 1
            }
            SchedulingStrategy::RoundRobin => {
                let count = inner.agent_task_counts.entry(agent_id).or_insert(0);
                if *count >= self.round_robin_quantum {
                    // Quantum spent; reset and let other agents pull first.
                    *count = 0;
                }
                true
            }
            _ => true,
        }
    }

    /// Record a completed hand-off to an agent.
    pub fn note_assignment(&self, agent_id: Uuid) {
        let mut inner = self.inner.lock().expect("ready queue poisoned");
        *inner.agent_task_counts.entry(agent_id).or_insert(0) += 1;
    }

    /// Score agents for a task under the ML-optimized strategy:
    /// availability 30%, success rate 40%, speed 20%, fairness 10%.
    pub fn best_agent(&self, task: &QueuedTask, capacities: &[AgentCapacity]) -> Option<Uuid> {
        let counts = {
            let inner = self.inner.lock().expect("ready queue poisoned");
            inner.agent_task_counts.clone()
        };
        let max_count = counts.values().copied().max().unwrap_or(1).max(1);

        capacities
            .iter()
            .filter(|c| task.agent_type.is_none_or(|t| t == c.agent_type))
            .filter(|c| c.current_load < c.max_concurrent)
            .map(|c| {
                let availability =
                    f64::from(c.max_concurrent - c.current_load) / f64::from(c.max_concurrent);
                let mut score = availability * 30.0 + c.success_rate * 40.0;
                if c.avg_execution_time_ms > 0.0 {
                    let speed = (1.0 - c.avg_execution_time_ms / 5000.0).max(0.0);
                    score += speed * 20.0;
                }
                let count = counts.get(&c.agent_id).copied().unwrap_or(0);
                let fairness = 1.0 - count as f64 / max_count as f64;
                score += fairness * 10.0;
                (c.agent_id, score)
            })
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(id, _)| id)
    }

    pub fn stats(&self, now: DateTime<Utc>) -> QueueStats {
        let inner = self.inner.lock().expect("ready queue poisoned");
        let mut by_priority: HashMap<i8, usize> = HashMap::new();
        let mut by_agent_type: HashMap<String, usize> = HashMap::new();
        let mut ages = Vec::with_capacity(inner.tasks.len());

        for task in inner.tasks.values() {
            *by_priority.entry(task.priority).or_insert(0) += 1;
            let type_key = task
                .agent_type
                .map_or_else(|| "any".to_string(), |t| t.as_str().to_string());
            *by_agent_type.entry(type_key).or_insert(0) += 1;
            ages.push((now - task.created_at).num_milliseconds().max(0) as f64 / 1000.0);
        }

        let oldest = ages.iter().copied().fold(0.0, f64::max);
        let avg = if ages.is_empty() {
            0.0
        } else {
            ages.iter().sum::<f64>() / ages.len() as f64
        };

        QueueStats {
            total_tasks: inner.tasks.len(),
            by_priority,
            by_agent_type,
            oldest_task_age_seconds: oldest,
            avg_wait_time_seconds: avg,
        }
    }
}
