//! Status state machines for tasks and notifications.
//!
//! Task transitions:
//! - CREATED -> PLANNED, IN_PROGRESS, CANCELLED
//! - PLANNED -> IN_PROGRESS, BLOCKED, CANCELLED
//! - IN_PROGRESS -> BLOCKED, REVIEW, COMPLETED, CANCELLED
//! - BLOCKED -> IN_PROGRESS, CANCELLED
//! - REVIEW -> IN_PROGRESS, COMPLETED, CANCELLED
//! - COMPLETED -> IN_PROGRESS, CANCELLED
//! - CANCELLED -> CREATED, PLANNED
//!
//! Notification transitions:
//! - PENDING -> DELIVERED, DISMISSED, EXPIRED
//! - DELIVERED -> READ, ACTED_UPON, DISMISSED, EXPIRED
//! - READ -> ACTED_UPON, DISMISSED
//! - ACTED_UPON, DISMISSED, EXPIRED are terminal
//!
//! Staying in the same state is always allowed.

use thiserror::Error;

use crate::types::{NotificationStatus, TaskStatus};

/// A rejected status change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid {entity} transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub entity: &'static str,
    pub from: String,
    pub to: String,
}

impl InvalidTransition {
    pub fn new(entity: &'static str, from: impl ToString, to: impl ToString) -> Self {
        Self {
            entity,
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

/// States reachable from `from` in one step, excluding `from` itself.
pub fn task_successors(from: TaskStatus) -> &'static [TaskStatus] {
    use TaskStatus::*;
    match from {
        Created => &[Planned, InProgress, Cancelled],
        Planned => &[InProgress, Blocked, Cancelled],
        InProgress => &[Blocked, Review, Completed, Cancelled],
        Blocked => &[InProgress, Cancelled],
        Review => &[InProgress, Completed, Cancelled],
        Completed => &[InProgress, Cancelled],
        Cancelled => &[Created, Planned],
    }
}

pub fn validate_task_transition(
    from: TaskStatus,
    to: TaskStatus,
) -> Result<(), InvalidTransition> {
    if from == to || task_successors(from).contains(&to) {
        Ok(())
    } else {
        Err(InvalidTransition::new("task", from, to))
    }
}

pub fn notification_successors(from: NotificationStatus) -> &'static [NotificationStatus] {
    use NotificationStatus::*;
    match from {
        Pending => &[Delivered, Dismissed, Expired],
        Delivered => &[Read, ActedUpon, Dismissed, Expired],
        Read => &[ActedUpon, Dismissed],
        ActedUpon | Dismissed | Expired => &[],
    }
}

pub fn validate_notification_transition(
    from: NotificationStatus,
    to: NotificationStatus,
) -> Result<(), InvalidTransition> {
    if from == to || notification_successors(from).contains(&to) {
        Ok(())
    } else {
        Err(InvalidTransition::new("notification", from, to))
    }
}
