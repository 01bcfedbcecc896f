/// Database row types — these map directly to SQLite rows.
/// Distinct from ballotbox-types API models to keep the DB layer independent.

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub role: String,
    pub created_at: String,
}

pub struct PollRow {
    pub id: String,
    pub title: String,
    pub created_by: String,
    pub duration_minutes: i64,
    pub expires_at: String,
    pub is_private: bool,
    pub created_at: String,
}

pub struct OptionRow {
    pub idx: i64,
    pub text: String,
    pub votes: i64,
}

/// Outcome of the conditional voter-set insert.
#[derive(Debug, PartialEq, Eq)]
pub enum VoteInsert {
    Applied,
    /// The (poll, user) pair already existed; nothing was changed.
    Duplicate,
}
