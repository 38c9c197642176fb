//! Well-known queue names, agreed between services out of band.

/// The auth service answers user-existence checks here.
pub const CHECK_EXISTENCE: &str = "check_existence";

/// The task service answers per-user task counts here.
pub const TASKS_COUNT: &str = "tasks_count";

/// The email service consumes outbound notifications here. One-way; no
/// replies travel back.
pub const EMAIL_NOTIFICATIONS: &str = "email_notifications";
