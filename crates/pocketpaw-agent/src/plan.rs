//! Plan Manager — per-session tool-approval state machine.
//!
//! ```text
//!      add_step          approve            execute
//! proposed ──────► proposed ──────► approved ──────► executing ──► completed
//!     │                   │
//!     │ reject            │ timeout (5 min)
//!     ▼                   ▼
//! rejected              (cleared)
//! ```
//!
//! Creating a new plan for a `session_key` that already has one **replaces**
//! it regardless of status; any waiter on the prior plan is released with
//! `Rejected`.

use std::collections::HashMap;

use pocketpaw_core::types::{ExecutionPlan, PlanStatus, PlanStep};
use tokio::sync::{oneshot, Mutex};

const APPROVAL_WINDOW: chrono::Duration = chrono::Duration::minutes(5);

/// Outcome of `wait_for_approval`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    Approved,
    Rejected,
    Timeout,
}

struct PlanEntry {
    plan: ExecutionPlan,
    waiters: Vec<oneshot::Sender<PlanStatus>>,
}

/// Per-process plan manager, one entry per session key.
pub struct PlanManager {
    plans: Mutex<HashMap<String, PlanEntry>>,
}

impl PlanManager {
    pub fn new() -> Self {
        PlanManager {
            plans: Mutex::new(HashMap::new()),
        }
    }

    /// Append a tool invocation to the session's plan, creating a fresh
    /// `proposed` plan if none exists or the existing one has expired.
    pub async fn add_step_to_plan(&self, session_key: &str, step: PlanStep) -> ExecutionPlan {
        let mut plans = self.plans.lock().await;
        self.expire_locked(&mut plans, session_key);

        let entry = plans.entry(session_key.to_string()).or_insert_with(|| PlanEntry {
            plan: ExecutionPlan::new(session_key),
            waiters: Vec::new(),
        });
        entry.plan.steps.push(step);
        entry.plan.clone()
    }

    /// Approve the active plan for `session_key`, releasing any waiters.
    /// Returns `false` if there is no active plan.
    pub async fn approve_plan(&self, session_key: &str) -> bool {
        self.resolve(session_key, PlanStatus::Approved).await
    }

    /// Reject the active plan for `session_key`, releasing any waiters.
    /// Returns `false` if there is no active plan.
    pub async fn reject_plan(&self, session_key: &str) -> bool {
        self.resolve(session_key, PlanStatus::Rejected).await
    }

    async fn resolve(&self, session_key: &str, status: PlanStatus) -> bool {
        let mut plans = self.plans.lock().await;
        self.expire_locked(&mut plans, session_key);

        let Some(entry) = plans.get_mut(session_key) else {
            return false;
        };
        if entry.plan.status != PlanStatus::Proposed {
            return false;
        }
        entry.plan.status = status;
        for waiter in entry.waiters.drain(..) {
            let _ = waiter.send(status);
        }
        true
    }

    /// Mark the plan as executing. Called by the agent loop just before it
    /// begins running the approved steps.
    pub async fn mark_executing(&self, session_key: &str) {
        let mut plans = self.plans.lock().await;
        if let Some(entry) = plans.get_mut(session_key) {
            if entry.plan.status == PlanStatus::Approved {
                entry.plan.status = PlanStatus::Executing;
            }
        }
    }

    /// Mark the plan completed and drop it from the map.
    pub async fn mark_completed(&self, session_key: &str) {
        self.plans.lock().await.remove(session_key);
    }

    /// Block until the session's plan leaves `proposed`, or the approval
    /// window elapses.
    pub async fn wait_for_approval(&self, session_key: &str, timeout: std::time::Duration) -> WaitOutcome {
        let rx = {
            let mut plans = self.plans.lock().await;
            self.expire_locked(&mut plans, session_key);

            match plans.get_mut(session_key) {
                Some(entry) if entry.plan.status == PlanStatus::Proposed => {
                    let (tx, rx) = oneshot::channel();
                    entry.waiters.push(tx);
                    rx
                }
                Some(entry) => {
                    return match entry.plan.status {
                        PlanStatus::Approved | PlanStatus::Executing | PlanStatus::Completed => {
                            WaitOutcome::Approved
                        }
                        PlanStatus::Rejected => WaitOutcome::Rejected,
                        PlanStatus::Proposed => unreachable!(),
                    };
                }
                None => return WaitOutcome::Timeout,
            }
        };

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(PlanStatus::Approved)) => WaitOutcome::Approved,
            Ok(Ok(_)) => WaitOutcome::Rejected,
            Ok(Err(_)) => WaitOutcome::Timeout,
            Err(_) => WaitOutcome::Timeout,
        }
    }

    /// Fetch the active plan for a session, or `None` if absent or expired.
    /// Lazily purges the entry on expiry.
    pub async fn get_active_plan(&self, session_key: &str) -> Option<ExecutionPlan> {
        let mut plans = self.plans.lock().await;
        self.expire_locked(&mut plans, session_key);
        plans.get(session_key).map(|e| e.plan.clone())
    }

    /// Replace any existing plan for `session_key` with a brand-new one,
    /// releasing prior waiters with `Rejected` regardless of the old plan's
    /// status.
    pub async fn replace_plan(&self, session_key: &str) -> ExecutionPlan {
        let mut plans = self.plans.lock().await;
        if let Some(mut old) = plans.remove(session_key) {
            for waiter in old.waiters.drain(..) {
                let _ = waiter.send(PlanStatus::Rejected);
            }
        }
        let plan = ExecutionPlan::new(session_key);
        plans.insert(
            session_key.to_string(),
            PlanEntry {
                plan: plan.clone(),
                waiters: Vec::new(),
            },
        );
        plan
    }

    fn expire_locked(&self, plans: &mut HashMap<String, PlanEntry>, session_key: &str) {
        let now = chrono::Utc::now();
        let expired = plans
            .get(session_key)
            .map(|e| e.plan.status == PlanStatus::Proposed && now - e.plan.created_at > APPROVAL_WINDOW)
            .unwrap_or(false);
        if expired {
            plans.remove(session_key);
        }
    }
}

impl Default for PlanManager {
    fn default() -> Self {
        Self::new()
    }
}

fn _step(tool_name: &str, tool_input: serde_json::Value, preview: &str) -> PlanStep {
    PlanStep {
        tool_name: tool_name.to_string(),
        tool_input,
        preview: preview.to_string(),
    }
}
