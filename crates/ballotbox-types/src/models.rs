use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn is_admin(self) -> bool {
        matches!(self, Role::Admin)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }

    /// Case-insensitive parse of a stored role string.
    pub fn parse(s: &str) -> Option<Role> {
        match s.to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "user" => Some(Role::User),
            _ => None,
        }
    }
}

/// One selectable choice within a poll, with its running vote counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollOption {
    pub text: String,
    pub votes: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Poll {
    pub id: Uuid,
    pub title: String,
    pub options: Vec<PollOption>,
    pub created_by: Uuid,
    /// Display name of the creator, resolved by a separate user lookup.
    /// Absent on paths that never render it.
    pub created_by_username: Option<String>,
    pub duration_minutes: u32,
    pub expires_at: DateTime<Utc>,
    pub is_private: bool,
    pub allowed_users: Vec<String>,
    /// Users who have cast a vote. Membership means exactly one counted
    /// vote for that user over the poll's lifetime.
    pub voters: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Poll {
    /// A vote placed at exactly `expires_at` is still accepted.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn total_votes(&self) -> u32 {
        self.options.iter().map(|o| o.votes).sum()
    }

    pub fn has_voted(&self, user_id: Uuid) -> bool {
        self.voters.contains(&user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn role_parse_is_case_insensitive() {
        assert_eq!(Role::parse("Admin"), Some(Role::Admin));
        assert_eq!(Role::parse("USER"), Some(Role::User));
        assert_eq!(Role::parse("moderator"), None);
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let now = Utc::now();
        let poll = Poll {
            id: Uuid::new_v4(),
            title: "t".into(),
            options: vec![
                PollOption { text: "a".into(), votes: 0 },
                PollOption { text: "b".into(), votes: 0 },
            ],
            created_by: Uuid::new_v4(),
            created_by_username: None,
            duration_minutes: 60,
            expires_at: now,
            is_private: false,
            allowed_users: vec![],
            voters: vec![],
            created_at: now,
        };
        assert!(!poll.is_expired(now));
        assert!(poll.is_expired(now + Duration::seconds(1)));
    }
}
