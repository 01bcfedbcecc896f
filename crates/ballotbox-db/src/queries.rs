use crate::Database;
use crate::models::{OptionRow, PollRow, UserRow, VoteInsert};
use anyhow::{Result, anyhow};
use rusqlite::Connection;

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        username: &str,
        email: &str,
        password_hash: &str,
        role: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, email, password, role, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                (id, username, email, password_hash, role, created_at),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_username_by_id(&self, id: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row("SELECT username FROM users WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()
        })
    }

    pub fn update_user_password(&self, id: &str, password_hash: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE users SET password = ?1 WHERE id = ?2",
                (password_hash, id),
            )?;
            if changed != 1 {
                return Err(anyhow!("User not found: {}", id));
            }
            Ok(())
        })
    }

    pub fn delete_user(&self, id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let deleted = conn.execute("DELETE FROM users WHERE id = ?1", [id])?;
            Ok(deleted > 0)
        })
    }

    pub fn list_users_by_role(&self, role: &str) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, username, email, password, role, created_at
                 FROM users WHERE role = ?1 ORDER BY username",
            )?;
            let rows = stmt
                .query_map([role], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Poll ids from the caller's reverse index, newest poll first.
    pub fn voted_poll_ids(&self, user_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT v.poll_id FROM voted_polls v
                 JOIN polls p ON p.id = v.poll_id
                 WHERE v.user_id = ?1
                 ORDER BY p.seq DESC",
            )?;
            let rows = stmt
                .query_map([user_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Polls --

    /// Insert a poll with its options and allow-list in one transaction.
    pub fn insert_poll(
        &self,
        poll: &PollRow,
        options: &[OptionRow],
        allowed: &[String],
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO polls (id, title, created_by, duration_minutes, expires_at, is_private, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                (
                    &poll.id,
                    &poll.title,
                    &poll.created_by,
                    poll.duration_minutes,
                    &poll.expires_at,
                    poll.is_private,
                    &poll.created_at,
                ),
            )?;
            insert_children(&tx, &poll.id, options, allowed)?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Replace a poll's mutable fields, options, and allow-list. The voter
    /// set is untouched; option counters are whatever the caller computed.
    pub fn update_poll(
        &self,
        poll: &PollRow,
        options: &[OptionRow],
        allowed: &[String],
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let changed = tx.execute(
                "UPDATE polls SET title = ?1, duration_minutes = ?2, expires_at = ?3, is_private = ?4
                 WHERE id = ?5",
                (
                    &poll.title,
                    poll.duration_minutes,
                    &poll.expires_at,
                    poll.is_private,
                    &poll.id,
                ),
            )?;
            if changed != 1 {
                return Err(anyhow!("Poll not found: {}", poll.id));
            }
            tx.execute("DELETE FROM poll_options WHERE poll_id = ?1", [&poll.id])?;
            tx.execute("DELETE FROM poll_allowed_users WHERE poll_id = ?1", [&poll.id])?;
            insert_children(&tx, &poll.id, options, allowed)?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_poll(&self, id: &str) -> Result<Option<PollRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, title, created_by, duration_minutes, expires_at, is_private, created_at
                 FROM polls WHERE id = ?1",
                [id],
                poll_from_row,
            )
            .optional()
        })
    }

    pub fn get_poll_options(&self, poll_id: &str) -> Result<Vec<OptionRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT idx, text, votes FROM poll_options WHERE poll_id = ?1 ORDER BY idx",
            )?;
            let rows = stmt
                .query_map([poll_id], |row| {
                    Ok(OptionRow {
                        idx: row.get(0)?,
                        text: row.get(1)?,
                        votes: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_poll_voters(&self, poll_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT user_id FROM poll_voters WHERE poll_id = ?1")?;
            let rows = stmt
                .query_map([poll_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_poll_allowed(&self, poll_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT ident FROM poll_allowed_users WHERE poll_id = ?1")?;
            let rows = stmt
                .query_map([poll_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn list_all_polls(&self) -> Result<Vec<PollRow>> {
        self.with_conn(|conn| query_polls(conn, "", &[]))
    }

    pub fn list_public_polls(&self) -> Result<Vec<PollRow>> {
        self.with_conn(|conn| query_polls(conn, "WHERE is_private = 0", &[]))
    }

    /// Public polls plus private polls whose allow-list contains any of the
    /// given identifiers (id, email, or username of the requester).
    pub fn list_visible_polls(&self, idents: &[String]) -> Result<Vec<PollRow>> {
        if idents.is_empty() {
            return self.list_public_polls();
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (1..=idents.len()).map(|i| format!("?{}", i)).collect();
            let clause = format!(
                "WHERE is_private = 0
                    OR id IN (SELECT poll_id FROM poll_allowed_users WHERE ident IN ({}))",
                placeholders.join(", ")
            );
            let params: Vec<&dyn rusqlite::types::ToSql> = idents
                .iter()
                .map(|s| s as &dyn rusqlite::types::ToSql)
                .collect();
            query_polls(conn, &clause, params.as_slice())
        })
    }

    /// Hard delete. Child tables cascade. Returns false if the poll was
    /// already gone.
    pub fn delete_poll(&self, id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let deleted = conn.execute("DELETE FROM polls WHERE id = ?1", [id])?;
            Ok(deleted > 0)
        })
    }

    // -- Votes --

    /// Apply one vote as a single transaction: insert into the voter set,
    /// bump the chosen option's counter, add the poll to the voter's
    /// reverse index. The voter-set primary key makes the insert
    /// conditional — a second vote by the same user rolls back with
    /// `VoteInsert::Duplicate` and no observable partial state.
    pub fn record_vote(
        &self,
        poll_id: &str,
        user_id: &str,
        option_index: i64,
    ) -> Result<VoteInsert> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            match tx.execute(
                "INSERT INTO poll_voters (poll_id, user_id) VALUES (?1, ?2)",
                (poll_id, user_id),
            ) {
                Ok(_) => {}
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    return Ok(VoteInsert::Duplicate);
                }
                Err(e) => return Err(e.into()),
            }

            let changed = tx.execute(
                "UPDATE poll_options SET votes = votes + 1 WHERE poll_id = ?1 AND idx = ?2",
                (poll_id, option_index),
            )?;
            if changed != 1 {
                return Err(anyhow!(
                    "Option {} missing on poll {}",
                    option_index,
                    poll_id
                ));
            }

            tx.execute(
                "INSERT OR IGNORE INTO voted_polls (user_id, poll_id) VALUES (?1, ?2)",
                (user_id, poll_id),
            )?;

            tx.commit()?;
            Ok(VoteInsert::Applied)
        })
    }
}

fn insert_children(
    tx: &rusqlite::Transaction<'_>,
    poll_id: &str,
    options: &[OptionRow],
    allowed: &[String],
) -> Result<()> {
    for opt in options {
        tx.execute(
            "INSERT INTO poll_options (poll_id, idx, text, votes) VALUES (?1, ?2, ?3, ?4)",
            (poll_id, opt.idx, &opt.text, opt.votes),
        )?;
    }
    for ident in allowed {
        tx.execute(
            "INSERT OR IGNORE INTO poll_allowed_users (poll_id, ident) VALUES (?1, ?2)",
            (poll_id, ident),
        )?;
    }
    Ok(())
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    // `column` is one of the fixed callers above, never user input.
    let sql = format!(
        "SELECT id, username, email, password, role, created_at FROM users WHERE {} = ?1",
        column
    );
    let mut stmt = conn.prepare(&sql)?;
    let row = stmt.query_row([value], user_from_row).optional()?;
    Ok(row)
}

fn query_polls(
    conn: &Connection,
    where_clause: &str,
    params: &[&dyn rusqlite::types::ToSql],
) -> Result<Vec<PollRow>> {
    let sql = format!(
        "SELECT id, title, created_by, duration_minutes, expires_at, is_private, created_at
         FROM polls {} ORDER BY seq DESC",
        where_clause
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params, poll_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password: row.get(3)?,
        role: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn poll_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PollRow> {
    Ok(PollRow {
        id: row.get(0)?,
        title: row.get(1)?,
        created_by: row.get(2)?,
        duration_minutes: row.get(3)?,
        expires_at: row.get(4)?,
        is_private: row.get(5)?,
        created_at: row.get(6)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn add_user(db: &Database, id: &str, username: &str, email: &str, role: &str) {
        db.create_user(id, username, email, "hash", role, "2026-01-01T00:00:00Z")
            .unwrap();
    }

    fn add_poll(db: &Database, id: &str, created_by: &str, is_private: bool, allowed: &[&str]) {
        let row = PollRow {
            id: id.into(),
            title: "Favorite color".into(),
            created_by: created_by.into(),
            duration_minutes: 60,
            expires_at: "2026-01-01T01:00:00Z".into(),
            is_private,
            created_at: "2026-01-01T00:00:00Z".into(),
        };
        let options = vec![
            OptionRow { idx: 0, text: "Red".into(), votes: 0 },
            OptionRow { idx: 1, text: "Blue".into(), votes: 0 },
        ];
        let allowed: Vec<String> = allowed.iter().map(|s| s.to_string()).collect();
        db.insert_poll(&row, &options, &allowed).unwrap();
    }

    #[test]
    fn duplicate_username_or_email_rejected() {
        let db = test_db();
        add_user(&db, "u1", "alice", "alice@example.com", "user");
        assert!(
            db.create_user("u2", "alice", "other@example.com", "hash", "user", "t")
                .is_err()
        );
        assert!(
            db.create_user("u3", "other", "alice@example.com", "hash", "user", "t")
                .is_err()
        );
    }

    #[test]
    fn record_vote_applies_once() {
        let db = test_db();
        add_user(&db, "admin", "root", "root@example.com", "admin");
        add_user(&db, "u1", "alice", "alice@example.com", "user");
        add_poll(&db, "p1", "admin", false, &[]);

        assert_eq!(db.record_vote("p1", "u1", 0).unwrap(), VoteInsert::Applied);
        assert_eq!(db.record_vote("p1", "u1", 1).unwrap(), VoteInsert::Duplicate);

        let options = db.get_poll_options("p1").unwrap();
        assert_eq!(options[0].votes, 1);
        assert_eq!(options[1].votes, 0);
        assert_eq!(db.get_poll_voters("p1").unwrap(), vec!["u1".to_string()]);
        assert_eq!(db.voted_poll_ids("u1").unwrap(), vec!["p1".to_string()]);
    }

    #[test]
    fn duplicate_vote_leaves_no_partial_state() {
        let db = test_db();
        add_user(&db, "admin", "root", "root@example.com", "admin");
        add_user(&db, "u1", "alice", "alice@example.com", "user");
        add_poll(&db, "p1", "admin", false, &[]);

        db.record_vote("p1", "u1", 0).unwrap();
        db.record_vote("p1", "u1", 1).unwrap();

        // Counter sum still equals voter count after the rejected attempt.
        let total: i64 = db
            .get_poll_options("p1")
            .unwrap()
            .iter()
            .map(|o| o.votes)
            .sum();
        assert_eq!(total, db.get_poll_voters("p1").unwrap().len() as i64);
    }

    #[test]
    fn delete_poll_cascades() {
        let db = test_db();
        add_user(&db, "admin", "root", "root@example.com", "admin");
        add_user(&db, "u1", "alice", "alice@example.com", "user");
        add_poll(&db, "p1", "admin", true, &["alice"]);
        db.record_vote("p1", "u1", 0).unwrap();

        assert!(db.delete_poll("p1").unwrap());
        assert!(db.get_poll("p1").unwrap().is_none());
        assert!(db.get_poll_options("p1").unwrap().is_empty());
        assert!(db.get_poll_voters("p1").unwrap().is_empty());
        assert!(db.get_poll_allowed("p1").unwrap().is_empty());
        // Hard delete also drops the poll from voting histories.
        assert!(db.voted_poll_ids("u1").unwrap().is_empty());

        assert!(!db.delete_poll("p1").unwrap());
    }

    #[test]
    fn deleting_a_user_preserves_cast_votes() {
        let db = test_db();
        add_user(&db, "admin", "root", "root@example.com", "admin");
        add_user(&db, "u1", "alice", "alice@example.com", "user");
        add_poll(&db, "p1", "admin", false, &[]);
        db.record_vote("p1", "u1", 0).unwrap();

        assert!(db.delete_user("u1").unwrap());
        // The vote is history: counter and voter set survive, only the
        // user's own reverse index goes away.
        assert_eq!(db.get_poll_options("p1").unwrap()[0].votes, 1);
        assert_eq!(db.get_poll_voters("p1").unwrap(), vec!["u1".to_string()]);
        assert!(db.voted_poll_ids("u1").unwrap().is_empty());
    }

    #[test]
    fn listing_order_is_most_recent_first() {
        let db = test_db();
        add_user(&db, "admin", "root", "root@example.com", "admin");
        add_poll(&db, "p1", "admin", false, &[]);
        add_poll(&db, "p2", "admin", false, &[]);
        add_poll(&db, "p3", "admin", false, &[]);

        let ids: Vec<String> = db.list_all_polls().unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["p3", "p2", "p1"]);
    }

    #[test]
    fn visible_polls_respect_allow_list() {
        let db = test_db();
        add_user(&db, "admin", "root", "root@example.com", "admin");
        add_poll(&db, "pub", "admin", false, &[]);
        add_poll(&db, "priv", "admin", true, &["alice", "bob@example.com"]);

        let visible = |idents: &[&str]| -> Vec<String> {
            let idents: Vec<String> = idents.iter().map(|s| s.to_string()).collect();
            db.list_visible_polls(&idents)
                .unwrap()
                .into_iter()
                .map(|p| p.id)
                .collect()
        };

        assert_eq!(visible(&["carol"]), vec!["pub"]);
        assert_eq!(visible(&["alice"]), vec!["priv", "pub"]);
        assert_eq!(visible(&["bob@example.com"]), vec!["priv", "pub"]);
    }
}
