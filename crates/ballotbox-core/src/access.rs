use ballotbox_db::Database;
use ballotbox_types::models::{Poll, Role};
use uuid::Uuid;

use crate::error::PollError;

/// Decides whether a requester may see or vote on a poll.
///
/// The allow-list is heterogeneous: entries may be user ids, emails, or
/// usernames, depending on what the creating admin supplied. Each form is
/// matched as its own rule, first match wins. No side effects — safe to
/// call speculatively before deciding how to answer a request.
pub fn can_access(
    db: &Database,
    poll: &Poll,
    requester_id: Option<Uuid>,
    requester_email: Option<&str>,
) -> Result<bool, PollError> {
    // Rule 1: public polls are open to everyone, including anonymous callers.
    if !poll.is_private {
        return Ok(true);
    }

    if let Some(id) = requester_id {
        if let Some(user) = db.get_user_by_id(&id.to_string())? {
            // Rule 2: admins see every poll, allow-listed or not.
            if Role::parse(&user.role).is_some_and(Role::is_admin) {
                return Ok(true);
            }
            // Rule 3: allow-list entry matching the resolved username.
            if poll.allowed_users.iter().any(|a| *a == user.username) {
                return Ok(true);
            }
        }
    }

    // Rule 4: allow-list entry matching the raw requester id or email.
    let raw_id = requester_id.map(|id| id.to_string());
    if poll.allowed_users.iter().any(|a| {
        Some(a.as_str()) == raw_id.as_deref() || Some(a.as_str()) == requester_email
    }) {
        return Ok(true);
    }

    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ballotbox_types::models::PollOption;
    use chrono::Utc;
    use std::sync::Arc;

    fn test_db() -> Arc<Database> {
        Arc::new(Database::open_in_memory().unwrap())
    }

    fn add_user(db: &Database, username: &str, role: &str) -> Uuid {
        let id = Uuid::new_v4();
        db.create_user(
            &id.to_string(),
            username,
            &format!("{username}@example.com"),
            "hash",
            role,
            &Utc::now().to_rfc3339(),
        )
        .unwrap();
        id
    }

    fn poll(is_private: bool, allowed: &[&str]) -> Poll {
        let now = Utc::now();
        Poll {
            id: Uuid::new_v4(),
            title: "Lunch spot".into(),
            options: vec![
                PollOption { text: "Tacos".into(), votes: 0 },
                PollOption { text: "Ramen".into(), votes: 0 },
            ],
            created_by: Uuid::new_v4(),
            created_by_username: None,
            duration_minutes: 60,
            expires_at: now + chrono::Duration::minutes(60),
            is_private,
            allowed_users: allowed.iter().map(|s| s.to_string()).collect(),
            voters: vec![],
            created_at: now,
        }
    }

    #[test]
    fn public_poll_grants_anonymous() {
        let db = test_db();
        assert!(can_access(&db, &poll(false, &[]), None, None).unwrap());
    }

    #[test]
    fn private_poll_denies_anonymous() {
        let db = test_db();
        assert!(!can_access(&db, &poll(true, &["alice"]), None, None).unwrap());
    }

    #[test]
    fn admin_bypasses_allow_list() {
        let db = test_db();
        let admin = add_user(&db, "root", "admin");
        assert!(can_access(&db, &poll(true, &[]), Some(admin), None).unwrap());
    }

    #[test]
    fn username_entry_grants() {
        let db = test_db();
        let alice = add_user(&db, "alice", "user");
        assert!(can_access(&db, &poll(true, &["alice"]), Some(alice), None).unwrap());
    }

    #[test]
    fn raw_id_entry_grants() {
        let db = test_db();
        let alice = add_user(&db, "alice", "user");
        let p = poll(true, &[&alice.to_string()]);
        assert!(can_access(&db, &p, Some(alice), None).unwrap());
    }

    #[test]
    fn email_entry_grants_even_without_resolvable_user() {
        let db = test_db();
        // Requester id doesn't resolve, but the email matches an entry.
        let p = poll(true, &["bob@example.com"]);
        assert!(can_access(&db, &p, Some(Uuid::new_v4()), Some("bob@example.com")).unwrap());
    }

    #[test]
    fn unlisted_user_denied() {
        let db = test_db();
        let bob = add_user(&db, "bob", "user");
        let p = poll(true, &["alice"]);
        assert!(!can_access(&db, &p, Some(bob), Some("bob@example.com")).unwrap());
    }
}
