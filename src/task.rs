//! Task queue: the work-item state machine behind the `task_*`
//! transaction and wire-message types (`spec.md` §6), detailed in
//! `SPEC_FULL.md`'s supplemented-features section and grounded on
//! `original_source/.../models/task.py`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::hashing::hash_json;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    OptimaeVerification,
    InferenceRequest,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Claimed,
    Completed,
    Failed,
    Expired,
}

/// Reason recorded on a task whose plugin call ran past its deadline
/// (`spec.md` §5 "Cancellation & timeouts").
pub const DEADLINE_EXCEEDED: &str = "deadline_exceeded";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,
    pub task_type: TaskType,
    pub domain_id: String,
    pub status: TaskStatus,
    pub requester_id: String,
    pub evaluator_id: Option<String>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    pub optimae_id: Option<String>,
    pub reported_performance: Option<f64>,
    pub result: Option<Map<String, Value>>,
    pub verified_performance: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Lower is higher priority; verification tasks default ahead of
    /// inference tasks.
    pub priority: i32,
    /// Past this point an unfinished task is expired rather than claimed
    /// or completed (`spec.md` §5's plugin-call deadline).
    pub deadline: DateTime<Utc>,
}

#[derive(Serialize)]
struct TaskIdPayload<'a> {
    task_type: TaskType,
    domain_id: &'a str,
    requester_id: &'a str,
    parameters: &'a Map<String, Value>,
    created_at: String,
}

const DEFAULT_PRIORITY: i32 = 10;

impl Task {
    pub fn compute_id(
        task_type: TaskType,
        domain_id: &str,
        requester_id: &str,
        parameters: &Map<String, Value>,
        created_at: DateTime<Utc>,
    ) -> String {
        hash_json(&TaskIdPayload {
            task_type,
            domain_id,
            requester_id,
            parameters,
            created_at: created_at.to_rfc3339(),
        })
    }

    pub fn new(
        task_type: TaskType,
        domain_id: String,
        requester_id: String,
        parameters: Map<String, Value>,
        created_at: DateTime<Utc>,
        deadline: DateTime<Utc>,
    ) -> Self {
        let id = Self::compute_id(task_type, &domain_id, &requester_id, &parameters, created_at);
        Self {
            id,
            task_type,
            domain_id,
            status: TaskStatus::Pending,
            requester_id,
            evaluator_id: None,
            parameters,
            optimae_id: None,
            reported_performance: None,
            result: None,
            verified_performance: None,
            created_at,
            claimed_at: None,
            completed_at: None,
            priority: DEFAULT_PRIORITY,
            deadline,
        }
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, TaskStatus::Pending | TaskStatus::Claimed) && now >= self.deadline
    }

    /// Expires a task whose plugin call ran past `deadline` (`spec.md` §5).
    pub fn expire(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Expired;
        let mut result = Map::new();
        result.insert("error".into(), Value::String(DEADLINE_EXCEEDED.to_string()));
        self.result = Some(result);
        self.completed_at = Some(now);
    }

    pub fn claim(&mut self, evaluator_id: String, now: DateTime<Utc>) {
        self.status = TaskStatus::Claimed;
        self.evaluator_id = Some(evaluator_id);
        self.claimed_at = Some(now);
    }

    pub fn complete(
        &mut self,
        verified_performance: Option<f64>,
        result: Option<Map<String, Value>>,
        now: DateTime<Utc>,
    ) {
        self.status = TaskStatus::Completed;
        self.verified_performance = verified_performance;
        self.result = result;
        self.completed_at = Some(now);
    }

    pub fn fail(&mut self, reason: &str, now: DateTime<Utc>) {
        self.status = TaskStatus::Failed;
        let mut result = Map::new();
        result.insert("error".into(), Value::String(reason.to_string()));
        self.result = Some(result);
        self.completed_at = Some(now);
    }
}

/// In-memory ordered task queue for a node. Tasks are ordered by
/// `(priority, created_at)`; evaluators pull the highest-priority pending
/// task for domains they support.
#[derive(Default)]
pub struct TaskQueue {
    tasks: BTreeMap<String, Task>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, task: Task) {
        self.tasks.insert(task.id.clone(), task);
    }

    pub fn get(&self, task_id: &str) -> Option<&Task> {
        self.tasks.get(task_id)
    }

    /// Finds the task tracking a given optimae's verification (set by the
    /// caller via `task.optimae_id` at creation time).
    pub fn find_by_optimae_id(&self, optimae_id: &str) -> Option<&Task> {
        self.tasks.values().find(|t| t.optimae_id.as_deref() == Some(optimae_id))
    }

    /// Completes the verification task tracking `optimae_id`, regardless of
    /// whether any single evaluator claimed it — quorum verification tasks
    /// are resolved by the quorum decision, not a single claimant.
    pub fn complete_verification(
        &mut self,
        optimae_id: &str,
        verified_performance: Option<f64>,
        result: Option<Map<String, Value>>,
        now: DateTime<Utc>,
    ) -> Option<&Task> {
        let id = self.find_by_optimae_id(optimae_id)?.id.clone();
        let task = self.tasks.get_mut(&id)?;
        if !matches!(task.status, TaskStatus::Pending | TaskStatus::Claimed) {
            return None;
        }
        task.complete(verified_performance, result, now);
        Some(&*task)
    }

    /// Pending tasks, optionally filtered to a single domain, sorted by
    /// `(priority, created_at)`, truncated to `limit`.
    pub fn pending(&self, domain_id: Option<&str>, limit: usize) -> Vec<&Task> {
        let mut pending: Vec<&Task> = self
            .tasks
            .values()
            .filter(|t| {
                t.status == TaskStatus::Pending
                    && domain_id.map_or(true, |d| t.domain_id == d)
            })
            .collect();
        pending.sort_by_key(|t| (t.priority, t.created_at));
        pending.truncate(limit);
        pending
    }

    /// Pending tasks for any of `domain_ids`, sorted the same way.
    pub fn pending_for_domains(&self, domain_ids: &[String], limit: usize) -> Vec<&Task> {
        let mut pending: Vec<&Task> = self
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending && domain_ids.iter().any(|d| d == &t.domain_id))
            .collect();
        pending.sort_by_key(|t| (t.priority, t.created_at));
        pending.truncate(limit);
        pending
    }

    /// Claims a pending task. Returns `None` if missing or already claimed.
    pub fn claim(&mut self, task_id: &str, evaluator_id: String, now: DateTime<Utc>) -> Option<&Task> {
        let task = self.tasks.get_mut(task_id)?;
        if task.status != TaskStatus::Pending {
            return None;
        }
        task.claim(evaluator_id, now);
        Some(&*task)
    }

    /// Completes a claimed task. Returns `None` if missing or not claimed.
    pub fn complete(
        &mut self,
        task_id: &str,
        verified_performance: Option<f64>,
        result: Option<Map<String, Value>>,
        now: DateTime<Utc>,
    ) -> Option<&Task> {
        let task = self.tasks.get_mut(task_id)?;
        if task.status != TaskStatus::Claimed {
            return None;
        }
        task.complete(verified_performance, result, now);
        Some(&*task)
    }

    /// Sweeps pending/claimed tasks whose deadline has passed into
    /// `Expired`, returning the ids that were expired.
    pub fn expire_overdue(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let mut expired = Vec::new();
        for task in self.tasks.values_mut() {
            if task.is_overdue(now) {
                task.expire(now);
                expired.push(task.id.clone());
            }
        }
        expired
    }

    pub fn pending_count(&self) -> usize {
        self.tasks.values().filter(|t| t.status == TaskStatus::Pending).count()
    }

    pub fn claimed_count(&self) -> usize {
        self.tasks.values().filter(|t| t.status == TaskStatus::Claimed).count()
    }

    pub fn completed_count(&self) -> usize {
        self.tasks.values().filter(|t| t.status == TaskStatus::Completed).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(priority: i32, created_at: DateTime<Utc>) -> Task {
        let mut t = Task::new(
            TaskType::OptimaeVerification,
            "d".into(),
            "req".into(),
            Map::new(),
            created_at,
            created_at + chrono::Duration::seconds(60),
        );
        t.priority = priority;
        t
    }

    #[test]
    fn pending_sorted_by_priority_then_age() {
        let mut q = TaskQueue::new();
        let t0 = Utc::now();
        q.add(task(5, t0));
        q.add(task(1, t0 + chrono::Duration::seconds(1)));
        q.add(task(1, t0));
        let pending = q.pending(None, 10);
        assert_eq!(pending.len(), 3);
        assert_eq!(pending[0].priority, 1);
        assert_eq!(pending[1].priority, 1);
        assert_eq!(pending[2].priority, 5);
    }

    #[test]
    fn claim_then_complete_lifecycle() {
        let mut q = TaskQueue::new();
        let t = task(1, Utc::now());
        let id = t.id.clone();
        q.add(t);
        let now = Utc::now();
        assert!(q.claim(&id, "eval-1".into(), now).is_some());
        assert!(q.claim(&id, "eval-2".into(), now).is_none());
        assert!(q.complete(&id, Some(0.9), None, now).is_some());
        assert_eq!(q.completed_count(), 1);
    }

    #[test]
    fn overdue_pending_task_expires_with_deadline_exceeded_reason() {
        let mut q = TaskQueue::new();
        let t0 = Utc::now();
        let t = task(1, t0);
        let id = t.id.clone();
        let deadline = t.deadline;
        q.add(t);

        assert!(q.expire_overdue(deadline - chrono::Duration::seconds(1)).is_empty());

        let expired = q.expire_overdue(deadline);
        assert_eq!(expired, vec![id.clone()]);
        let t = q.get(&id).unwrap();
        assert_eq!(t.status, TaskStatus::Expired);
        assert_eq!(
            t.result.as_ref().unwrap().get("error").and_then(|v| v.as_str()),
            Some(DEADLINE_EXCEEDED)
        );

        // Already-expired tasks are not re-swept.
        assert!(q.expire_overdue(deadline + chrono::Duration::seconds(1)).is_empty());
    }

    #[test]
    fn claiming_or_completing_an_already_expired_task_is_rejected() {
        let mut q = TaskQueue::new();
        let t0 = Utc::now();
        let t = task(1, t0);
        let id = t.id.clone();
        let deadline = t.deadline;
        q.add(t);
        q.expire_overdue(deadline);

        assert!(q.claim(&id, "eval-1".into(), deadline).is_none());
    }
}
