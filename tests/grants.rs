//! Access grant idempotency, legacy-schema fallback, and soft failure.

mod common;
use common::*;

use coursepay::grants::grant_course_access;

#[test]
fn test_grant_is_idempotent() {
    let state = create_test_app_state(None);
    let conn = state.db.get().unwrap();
    let pur_x = create_pending_purchase(&state, "user-1", "course-1", "pay-x");
    let pur_y = create_pending_purchase(&state, "user-1", "course-1", "pay-y");

    assert!(grant_course_access(&conn, "user-1", "course-1", &pur_x.id));
    assert!(grant_course_access(&conn, "user-1", "course-1", &pur_x.id));
    assert!(grant_course_access(&conn, "user-1", "course-1", &pur_y.id));

    // One active grant, attributed to the first purchase that won.
    let grants = queries::list_grants_for_user(&conn, "user-1").unwrap();
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0].course_id, "course-1");
    assert_eq!(grants[0].purchase_id, pur_x.id);
    assert_eq!(grants[0].status, "active");
}

#[test]
fn test_distinct_pairs_get_distinct_grants() {
    let state = create_test_app_state(None);
    let conn = state.db.get().unwrap();

    let pur_a = create_pending_purchase(&state, "user-1", "course-1", "pay-a");
    let pur_b = create_pending_purchase(&state, "user-1", "course-2", "pay-b");
    let pur_c = create_pending_purchase(&state, "user-2", "course-1", "pay-c");

    assert!(grant_course_access(&conn, "user-1", "course-1", &pur_a.id));
    assert!(grant_course_access(&conn, "user-1", "course-2", &pur_b.id));
    assert!(grant_course_access(&conn, "user-2", "course-1", &pur_c.id));

    assert_eq!(queries::list_grants_for_user(&conn, "user-1").unwrap().len(), 2);
    assert_eq!(queries::list_grants_for_user(&conn, "user-2").unwrap().len(), 1);
    assert_eq!(count_grants(&state, "user-1", "course-1"), 1);
    assert_eq!(count_grants(&state, "user-1", "course-2"), 1);
    assert_eq!(count_grants(&state, "user-2", "course-1"), 1);
}

#[test]
fn test_legacy_schema_without_unique_constraint_falls_back() {
    let state = create_test_app_state(None);
    let conn = state.db.get().unwrap();

    // Recreate the table the way old deployments had it: no UNIQUE pair.
    conn.execute_batch(
        r#"
        DROP TABLE access_grants;
        CREATE TABLE access_grants (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            purchase_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            granted_at INTEGER NOT NULL
        );
        "#,
    )
    .unwrap();

    assert!(grant_course_access(&conn, "user-1", "course-1", "cp_pur_x"));
    assert!(grant_course_access(&conn, "user-1", "course-1", "cp_pur_x"));

    assert_eq!(count_grants(&state, "user-1", "course-1"), 1);
}

#[test]
fn test_store_failure_is_soft() {
    let state = create_test_app_state(None);
    let conn = state.db.get().unwrap();

    conn.execute_batch("DROP TABLE access_grants;").unwrap();

    assert!(!grant_course_access(&conn, "user-1", "course-1", "cp_pur_x"));
}
