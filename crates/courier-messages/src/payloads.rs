//! Message payloads exchanged over the bridge.
//!
//! Each request/reply pair shares a single struct: the caller fills the
//! identifying fields, the responder fills the answer fields and sends
//! the same shape back. Answer fields default on decode so a bare query
//! stays valid.

use courier_rpc::MessageKind;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Existence check exchanged over [`queues::CHECK_EXISTENCE`](crate::queues::CHECK_EXISTENCE).
///
/// Sent with `is_exists: false`; the auth service flips it to `true`
/// when the user is known and returns the same payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserExistence {
    pub user_id: Uuid,
    #[serde(default)]
    pub is_exists: bool,
}

impl UserExistence {
    /// Query form: existence unknown until the reply comes back.
    #[must_use]
    pub fn query(user_id: Uuid) -> Self {
        Self {
            user_id,
            is_exists: false,
        }
    }

    /// Reply form.
    #[must_use]
    pub fn confirmed(user_id: Uuid, is_exists: bool) -> Self {
        Self { user_id, is_exists }
    }
}

impl MessageKind for UserExistence {
    const KIND: &'static str = "user_exists";
}

/// Per-user task counts exchanged over [`queues::TASKS_COUNT`](crate::queues::TASKS_COUNT).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TasksCount {
    pub user_id: Uuid,
    #[serde(default)]
    pub count_authored_tasks: u64,
    #[serde(default)]
    pub count_assigned_tasks: u64,
}

impl TasksCount {
    /// Query form with zeroed counts.
    #[must_use]
    pub fn query(user_id: Uuid) -> Self {
        Self {
            user_id,
            count_authored_tasks: 0,
            count_assigned_tasks: 0,
        }
    }
}

impl MessageKind for TasksCount {
    const KIND: &'static str = "tasks_count";
}

/// Outbound email notification, one-way over
/// [`queues::EMAIL_NOTIFICATIONS`](crate::queues::EMAIL_NOTIFICATIONS).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailNotification {
    pub email_to: String,
    pub email_from: String,
    pub subject: String,
    pub message: String,
}

impl MessageKind for EmailNotification {
    const KIND: &'static str = "email_notifications";
}
