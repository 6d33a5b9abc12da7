//! Task claim engine and completion.
//!
//! # Responsibility
//! - Select the next task by priority, age and id, honoring scope and
//!   direct-claim semantics.
//! - Move the chosen task to `in-progress` atomically, and later to `done`.
//!
//! # Invariants
//! - Selection runs on a snapshot; the transition re-reads the record under
//!   its lock and fails with `ClaimConflict` if anything changed.
//! - Prerequisite state is re-read from disk at the decision point.
//! - Scope claims never return standalone tasks.
//! - Conflicts are reported, never retried internally.

use crate::graph::{builder, Graph, GraphNode};
use crate::identity::{ResolveError, ResolvedKind};
use crate::model::id::ObjectId;
use crate::model::object::{ObjectKind, ObjectStatus, Priority, WorkObject};
use crate::repo::record_store::RecordStore;
use crate::repo::StoreError;
use crate::service::planner::{queue_order, Planner};
use crate::service::{PlanError, PlanResult};
use chrono::{DateTime, SecondsFormat, Utc};
use log::{info, warn};
use serde::Serialize;

const LOG_HEADING: &str = "### Log";

/// Claim request parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimRequest {
    /// Project, epic or feature whose descendants are eligible.
    pub scope: Option<String>,
    /// Claim this task directly.
    pub task_id: Option<String>,
    /// Skip status and prerequisite checks on a direct claim.
    pub force_claim: bool,
    /// Worktree recorded on the claimed task.
    pub worktree: Option<String>,
}

impl ClaimRequest {
    pub fn scoped(scope: impl Into<String>) -> Self {
        Self {
            scope: Some(scope.into()),
            ..Self::default()
        }
    }

    pub fn direct(task_id: impl Into<String>) -> Self {
        Self {
            task_id: Some(task_id.into()),
            ..Self::default()
        }
    }

    pub fn forced(mut self) -> Self {
        self.force_claim = true;
        self
    }

    pub fn with_worktree(mut self, worktree: impl Into<String>) -> Self {
        self.worktree = Some(worktree.into());
        self
    }
}

/// Selection result waiting for [`Planner::commit_claim`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimTicket {
    task_id: ObjectId,
    observed_updated: DateTime<Utc>,
    force: bool,
    worktree: Option<String>,
}

impl ClaimTicket {
    pub fn task_id(&self) -> &ObjectId {
        &self.task_id
    }
}

/// Outcome of a successful claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimedTask {
    pub id: ObjectId,
    pub title: String,
    pub status: ObjectStatus,
    pub priority: Priority,
    pub parent: Option<ObjectId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worktree: Option<String>,
}

impl From<&WorkObject> for ClaimedTask {
    fn from(object: &WorkObject) -> Self {
        Self {
            id: object.id.clone(),
            title: object.title.clone(),
            status: object.status,
            priority: object.priority,
            parent: object.parent.clone(),
            worktree: object.worktree.clone(),
        }
    }
}

impl<S: RecordStore> Planner<S> {
    /// Selects and claims a task in one call.
    pub fn claim_next(&self, request: ClaimRequest) -> PlanResult<ClaimedTask> {
        let ticket = self.prepare_claim(request)?;
        self.commit_claim(ticket)
    }

    /// Validates parameters and picks a task from a snapshot. Writes nothing.
    pub fn prepare_claim(&self, request: ClaimRequest) -> PlanResult<ClaimTicket> {
        if request.scope.is_some() && request.task_id.is_some() {
            return Err(PlanError::ParameterConflict(
                "`scope` and `task_id` cannot be combined",
            ));
        }
        if request.force_claim && request.task_id.is_none() {
            return Err(PlanError::ParameterConflict("`force_claim` requires `task_id`"));
        }

        let selected = match (&request.scope, &request.task_id) {
            (_, Some(task_id)) => self.select_direct(task_id, request.force_claim)?,
            (Some(scope), None) => self.select_scoped(scope)?,
            (None, None) => {
                let graph = self.graph()?;
                first_eligible(&graph, |_| true).ok_or(PlanError::NoEligibleTask)?
            }
        };
        Ok(ClaimTicket {
            task_id: selected.id,
            observed_updated: selected.updated,
            force: request.force_claim,
            worktree: request.worktree,
        })
    }

    /// Transitions the ticket's task to `in-progress` under its record lock.
    pub fn commit_claim(&self, ticket: ClaimTicket) -> PlanResult<ClaimedTask> {
        let id = ticket.task_id;
        let _lock = self.lock_record(&id)?;
        let mut task = match self.store.load(&id) {
            Ok(task) => task,
            Err(StoreError::NotFound(_)) => return Err(PlanError::TaskNotFound(id)),
            Err(err) => return Err(err.into()),
        };
        if task.updated != ticket.observed_updated {
            warn!("event=claim module=claim status=conflict task_id={id}");
            return Err(PlanError::ClaimConflict(id));
        }
        if !ticket.force {
            let blocked_by = self.blockers_on_disk(&task)?;
            if task.status != ObjectStatus::Open || !blocked_by.is_empty() {
                return Err(PlanError::TaskNotAvailable {
                    id,
                    status: task.status,
                    blocked_by,
                });
            }
        }

        let from = task.status;
        task.status = ObjectStatus::InProgress;
        if let Some(worktree) = ticket.worktree {
            task.worktree = Some(worktree);
        }
        task.touch();
        self.store.save(&task)?;
        self.cache.invalidate_write(&task.id, false);

        info!(
            "event=claim module=claim status=ok task_id={} from={} force={} priority={}",
            task.id, from, ticket.force, task.priority
        );
        Ok(ClaimedTask::from(&task))
    }

    /// Marks an `in-progress` or `review` task done, appending a log entry,
    /// and relocates it to the done directory.
    pub fn complete_task(
        &self,
        task_id: &str,
        summary: Option<&str>,
        files_changed: &[String],
    ) -> PlanResult<()> {
        let id = self.resolve_task(task_id)?;
        let _lock = self.lock_record(&id)?;
        let mut task = self.store.load(&id)?;
        if !matches!(task.status, ObjectStatus::InProgress | ObjectStatus::Review) {
            return Err(PlanError::InvalidState {
                id,
                status: task.status,
            });
        }

        task.status = ObjectStatus::Done;
        task.touch();
        append_log_entry(&mut task.body, task.updated, summary, files_changed);
        self.store.save(&task)?;
        self.cache.invalidate_write(&task.id, false);

        info!(
            "event=complete module=claim status=ok task_id={} files_changed={}",
            task.id,
            files_changed.len()
        );
        Ok(())
    }

    fn select_direct(&self, raw: &str, force: bool) -> PlanResult<GraphNode> {
        let id = self.resolve_task(raw)?;
        let task = self.store.load(&id)?;
        if !force {
            let graph = self.graph()?;
            let blocked_by = graph.blockers(&id);
            if task.status != ObjectStatus::Open || !blocked_by.is_empty() {
                return Err(PlanError::TaskNotAvailable {
                    id,
                    status: task.status,
                    blocked_by,
                });
            }
        }
        Ok(GraphNode::from(&task))
    }

    fn select_scoped(&self, raw: &str) -> PlanResult<GraphNode> {
        let scope = self.resolve_scope(raw)?;
        let graph = builder::build(&self.store, &self.resolver(), Some(&scope))?;
        first_eligible(&graph, |node| {
            !node.is_standalone() && graph.is_descendant_of(&node.id, &scope.id)
        })
        .ok_or(PlanError::NoEligibleTask)
    }

    fn resolve_task(&self, raw: &str) -> PlanResult<ObjectId> {
        match self.resolver().resolve_str(raw) {
            Ok(resolved) => match resolved.kind {
                ResolvedKind::Task { .. } => Ok(resolved.id),
                _ => Err(PlanError::TaskNotFound(resolved.id)),
            },
            Err(ResolveError::NotFound(id)) => Err(PlanError::TaskNotFound(id)),
            Err(err) => Err(err.into()),
        }
    }

    /// Unfinished prerequisites of `task`, read fresh from the store.
    fn blockers_on_disk(&self, task: &WorkObject) -> PlanResult<Vec<ObjectId>> {
        let resolver = self.resolver();
        let mut blocked_by = Vec::new();
        for prerequisite in &task.prerequisites {
            let done = match resolver.resolve(prerequisite) {
                Ok(resolved) => {
                    self.store.load_at(&resolved.location)?.status == ObjectStatus::Done
                }
                Err(ResolveError::Store(err)) => return Err(err.into()),
                Err(_) => false,
            };
            if !done {
                blocked_by.push(prerequisite.clone());
            }
        }
        Ok(blocked_by)
    }
}

/// First open, unblocked task in queue order that passes `filter`.
fn first_eligible(graph: &Graph, filter: impl Fn(&GraphNode) -> bool) -> Option<GraphNode> {
    let mut candidates: Vec<&GraphNode> = graph
        .nodes()
        .filter(|node| node.kind == ObjectKind::Task && node.status == ObjectStatus::Open)
        .filter(|node| filter(node))
        .collect();
    candidates.sort_by(|a, b| queue_order(a, b));
    candidates
        .into_iter()
        .find(|node| graph.is_unblocked(&node.id))
        .cloned()
}

fn append_log_entry(
    body: &mut String,
    at: DateTime<Utc>,
    summary: Option<&str>,
    files_changed: &[String],
) {
    if !body.contains(LOG_HEADING) {
        if !body.is_empty() && !body.ends_with('\n') {
            body.push('\n');
        }
        if !body.is_empty() {
            body.push('\n');
        }
        body.push_str(LOG_HEADING);
        body.push('\n');
    }
    if !body.ends_with('\n') {
        body.push('\n');
    }
    body.push_str(&format!(
        "\n**{}** {}\n",
        at.to_rfc3339_opts(SecondsFormat::Secs, true),
        summary.map(str::trim).filter(|s| !s.is_empty()).unwrap_or("Completed.")
    ));
    if !files_changed.is_empty() {
        body.push_str(&format!("- files changed: {}\n", files_changed.join(", ")));
    }
}

#[cfg(test)]
mod tests {
    use super::append_log_entry;
    use chrono::{TimeZone, Utc};

    #[test]
    fn log_entry_adds_heading_once() {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let mut body = "Implement the thing.".to_string();
        append_log_entry(&mut body, at, Some("first pass"), &["src/a.rs".to_string()]);
        append_log_entry(&mut body, at, None, &[]);

        assert_eq!(
            body,
            "Implement the thing.\n\n### Log\n\n**2026-01-01T12:00:00Z** first pass\n- files changed: src/a.rs\n\n**2026-01-01T12:00:00Z** Completed.\n"
        );
        assert_eq!(body.matches("### Log").count(), 1);
    }
}
