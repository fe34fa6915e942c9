use serde::Serialize;

/// Entitlement giving a user access to a course, created the first time any
/// of the three settlement paths observes the purchase paid.
///
/// At most one active grant exists per (user, course) pair; creation is
/// idempotent at the store level.
#[derive(Debug, Clone, Serialize)]
pub struct AccessGrant {
    pub id: String,
    pub user_id: String,
    pub course_id: String,
    /// Purchase that produced this grant.
    pub purchase_id: String,
    pub status: String,
    pub granted_at: i64,
}
