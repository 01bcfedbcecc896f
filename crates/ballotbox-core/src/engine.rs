use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::info;
use uuid::Uuid;

use ballotbox_db::Database;
use ballotbox_db::models::{OptionRow, PollRow, VoteInsert};
use ballotbox_types::api::PollResults;
use ballotbox_types::models::{Poll, PollOption, Role};

use crate::access::can_access;
use crate::error::PollError;

const DEFAULT_DURATION_MINUTES: u32 = 60;
const MIN_DURATION_MINUTES: u32 = 1;
const MAX_DURATION_MINUTES: u32 = 120;

/// Partial replacement set for [`PollEngine::update`]. `None` leaves a
/// field untouched.
#[derive(Debug, Default)]
pub struct PollUpdate {
    pub title: Option<String>,
    pub options: Option<Vec<String>>,
    pub duration_minutes: Option<u32>,
    pub is_private: Option<bool>,
    pub allowed_users: Option<Vec<String>>,
}

/// Poll lifecycle and vote engine — the only path through which poll state
/// changes. Every visibility-sensitive read and every mutation consults
/// [`can_access`] first. Expiry is a lazy comparison against the stored
/// timestamp; there is no background sweep, so an expired poll keeps its
/// frozen counters until an explicit delete.
#[derive(Clone)]
pub struct PollEngine {
    db: Arc<Database>,
}

impl PollEngine {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn create(
        &self,
        creator_id: Uuid,
        title: &str,
        options: &[String],
        duration_minutes: Option<u32>,
        explicit_expiry: Option<DateTime<Utc>>,
        is_private: Option<bool>,
        allowed_users: Option<Vec<String>>,
    ) -> Result<Poll, PollError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(PollError::Validation("Title is required"));
        }
        // Count check happens before any trimming: an option whose text
        // trims to empty still counts toward the minimum of two.
        if options.len() < 2 {
            return Err(PollError::Validation("At least 2 options are required"));
        }
        let duration = duration_minutes.unwrap_or(DEFAULT_DURATION_MINUTES);
        if !(MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES).contains(&duration) {
            return Err(PollError::Validation(
                "Duration must be between 1 and 120 minutes",
            ));
        }

        let now = Utc::now();
        let expires_at =
            explicit_expiry.unwrap_or_else(|| now + Duration::minutes(duration as i64));

        let poll = Poll {
            id: Uuid::new_v4(),
            title: title.to_string(),
            options: options
                .iter()
                .map(|text| PollOption { text: text.trim().to_string(), votes: 0 })
                .collect(),
            created_by: creator_id,
            created_by_username: None,
            duration_minutes: duration,
            expires_at,
            is_private: is_private.unwrap_or(false),
            allowed_users: allowed_users.unwrap_or_default(),
            voters: vec![],
            created_at: now,
        };

        self.db
            .insert_poll(&poll_row(&poll), &option_rows(&poll.options), &poll.allowed_users)?;
        info!("Poll {} created by {}", poll.id, creator_id);
        Ok(poll)
    }

    /// Apply one vote. Preconditions are checked in a fixed order, each
    /// with its own failure kind: poll exists, voter exists and is not an
    /// admin, access granted, not expired, not already voted, option index
    /// in range.
    pub fn vote(
        &self,
        voter_id: Uuid,
        poll_id: Uuid,
        option_index: usize,
        voter_email: Option<&str>,
    ) -> Result<Poll, PollError> {
        let poll = self
            .load(poll_id)?
            .ok_or(PollError::NotFound("Poll not found"))?;

        let voter = self
            .db
            .get_user_by_id(&voter_id.to_string())?
            .ok_or(PollError::NotFound("User not found"))?;
        // Admins manage polls; they never vote, visibility notwithstanding.
        if Role::parse(&voter.role).is_some_and(Role::is_admin) {
            return Err(PollError::AccessDenied(
                "Admins cannot vote. You can only view results",
            ));
        }

        if !can_access(&self.db, &poll, Some(voter_id), voter_email)? {
            return Err(PollError::AccessDenied(
                "You do not have access to this private poll",
            ));
        }

        if poll.is_expired(Utc::now()) {
            return Err(PollError::Expired(
                "This poll has expired. Voting is no longer allowed",
            ));
        }

        // Membership in the voter set is the authority, not the counters.
        if poll.has_voted(voter_id) {
            return Err(PollError::DuplicateVote);
        }

        if option_index >= poll.options.len() {
            return Err(PollError::Validation("Invalid option selected"));
        }

        // Voter insert, counter bump, and reverse-index entry commit as one
        // transaction; the voter-set key catches a concurrent duplicate
        // that raced past the check above.
        match self.db.record_vote(
            &poll_id.to_string(),
            &voter_id.to_string(),
            option_index as i64,
        )? {
            VoteInsert::Applied => {}
            VoteInsert::Duplicate => return Err(PollError::DuplicateVote),
        }

        info!("Vote by {} on poll {} option {}", voter_id, poll_id, option_index);
        self.load(poll_id)?
            .ok_or(PollError::NotFound("Poll not found"))
    }

    pub fn get(
        &self,
        poll_id: Uuid,
        requester_id: Option<Uuid>,
        requester_email: Option<&str>,
    ) -> Result<Poll, PollError> {
        let mut poll = self
            .load(poll_id)?
            .ok_or(PollError::NotFound("Poll not found"))?;

        if !can_access(&self.db, &poll, requester_id, requester_email)? {
            return Err(PollError::AccessDenied(
                "You do not have access to this private poll",
            ));
        }

        // Creator display name is a separate lookup, not a join.
        poll.created_by_username = self.db.get_username_by_id(&poll.created_by.to_string())?;
        Ok(poll)
    }

    /// Aggregated results. Deliberately skips the access evaluator: result
    /// data is not treated as sensitive, even for private polls.
    pub fn results(&self, poll_id: Uuid) -> Result<PollResults, PollError> {
        let poll = self
            .load(poll_id)?
            .ok_or(PollError::NotFound("Poll not found"))?;

        let votes: Vec<u32> = poll.options.iter().map(|o| o.votes).collect();
        let total: u32 = votes.iter().sum();
        let percentages = if total == 0 {
            vec![0; votes.len()]
        } else {
            votes
                .iter()
                .map(|&v| ((v as f64) * 100.0 / (total as f64)).round() as u32)
                .collect()
        };

        Ok(PollResults {
            options: poll.options.into_iter().map(|o| o.text).collect(),
            votes,
            percentages,
        })
    }

    /// Three-tier visibility: anonymous callers get public polls, admins
    /// get everything, other users get public polls plus private ones
    /// whose allow-list mentions their id, email, or username. Newest
    /// first.
    pub fn list(
        &self,
        requester_id: Option<Uuid>,
        requester_email: Option<&str>,
    ) -> Result<Vec<Poll>, PollError> {
        let rows = match requester_id {
            None => self.db.list_public_polls()?,
            Some(id) => {
                let user = self.db.get_user_by_id(&id.to_string())?;
                let is_admin = user
                    .as_ref()
                    .and_then(|u| Role::parse(&u.role))
                    .is_some_and(Role::is_admin);
                if is_admin {
                    self.db.list_all_polls()?
                } else {
                    let mut idents = vec![id.to_string()];
                    if let Some(email) = requester_email {
                        idents.push(email.to_string());
                    }
                    if let Some(user) = &user {
                        idents.push(user.username.clone());
                    }
                    self.db.list_visible_polls(&idents)?
                }
            }
        };

        rows.into_iter().map(|row| self.assemble(row, true)).collect()
    }

    pub fn update(&self, poll_id: Uuid, update: PollUpdate) -> Result<Poll, PollError> {
        let mut poll = self
            .load(poll_id)?
            .ok_or(PollError::NotFound("Poll not found"))?;

        // No edits to a closed poll, even by an admin.
        if poll.is_expired(Utc::now()) {
            return Err(PollError::Expired("Cannot edit an expired poll"));
        }

        if let Some(title) = update.title {
            let title = title.trim();
            if title.is_empty() {
                return Err(PollError::Validation("Title is required"));
            }
            poll.title = title.to_string();
        }

        if let Some(options) = update.options {
            if options.len() < 2 {
                return Err(PollError::Validation("At least 2 options are required"));
            }
            // Rename-preserving merge: an entry whose trimmed text exactly
            // matches an existing option keeps that option's count; any
            // other text starts over at zero.
            let merged: Vec<PollOption> = options
                .iter()
                .map(|text| {
                    let text = text.trim();
                    let votes = poll
                        .options
                        .iter()
                        .find(|o| o.text == text)
                        .map(|o| o.votes)
                        .unwrap_or(0);
                    PollOption { text: text.to_string(), votes }
                })
                .collect();
            poll.options = merged;
        }

        if let Some(duration) = update.duration_minutes {
            if !(MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES).contains(&duration) {
                return Err(PollError::Validation(
                    "Duration must be between 1 and 120 minutes",
                ));
            }
            // An edited duration restarts the clock from now, discarding
            // the creation-relative expiry.
            poll.duration_minutes = duration;
            poll.expires_at = Utc::now() + Duration::minutes(duration as i64);
        }

        if let Some(is_private) = update.is_private {
            poll.is_private = is_private;
        }

        if let Some(allowed) = update.allowed_users {
            // Wholesale replacement, not a merge.
            poll.allowed_users = allowed;
        }

        self.db
            .update_poll(&poll_row(&poll), &option_rows(&poll.options), &poll.allowed_users)?;
        Ok(poll)
    }

    /// Hard delete, admin-trusted: no grace period, no tombstone, no check
    /// on existing votes.
    pub fn delete(&self, poll_id: Uuid) -> Result<(), PollError> {
        if !self.db.delete_poll(&poll_id.to_string())? {
            return Err(PollError::NotFound("Poll not found"));
        }
        info!("Poll {} deleted", poll_id);
        Ok(())
    }

    /// The caller's voting history from the reverse index. No access
    /// check: having voted implies the poll was visible when the vote was
    /// cast, and the history stays readable even if the allow-list later
    /// changed.
    pub fn voted_polls(&self, user_id: Uuid) -> Result<Vec<Poll>, PollError> {
        let ids = self.db.voted_poll_ids(&user_id.to_string())?;
        let mut polls = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(row) = self.db.get_poll(&id)? {
                polls.push(self.assemble(row, false)?);
            }
        }
        Ok(polls)
    }

    fn load(&self, poll_id: Uuid) -> Result<Option<Poll>, PollError> {
        match self.db.get_poll(&poll_id.to_string())? {
            Some(row) => Ok(Some(self.assemble(row, false)?)),
            None => Ok(None),
        }
    }

    /// Compose a poll from its row and child tables; the creator's display
    /// name is its own lookup, fetched only where it will be rendered.
    fn assemble(&self, row: PollRow, with_creator_name: bool) -> Result<Poll, PollError> {
        let options = self.db.get_poll_options(&row.id)?;
        let voters = self.db.get_poll_voters(&row.id)?;
        let allowed = self.db.get_poll_allowed(&row.id)?;

        let created_by_username = if with_creator_name {
            self.db.get_username_by_id(&row.created_by)?
        } else {
            None
        };

        Ok(Poll {
            id: parse_uuid(&row.id)?,
            title: row.title,
            options: options
                .into_iter()
                .map(|o| PollOption { text: o.text, votes: o.votes as u32 })
                .collect(),
            created_by: parse_uuid(&row.created_by)?,
            created_by_username,
            duration_minutes: row.duration_minutes as u32,
            expires_at: parse_ts(&row.expires_at)?,
            is_private: row.is_private,
            allowed_users: allowed,
            voters: voters
                .iter()
                .map(|v| parse_uuid(v))
                .collect::<Result<_, _>>()?,
            created_at: parse_ts(&row.created_at)?,
        })
    }
}

fn poll_row(poll: &Poll) -> PollRow {
    PollRow {
        id: poll.id.to_string(),
        title: poll.title.clone(),
        created_by: poll.created_by.to_string(),
        duration_minutes: poll.duration_minutes as i64,
        expires_at: poll.expires_at.to_rfc3339(),
        is_private: poll.is_private,
        created_at: poll.created_at.to_rfc3339(),
    }
}

fn option_rows(options: &[PollOption]) -> Vec<OptionRow> {
    options
        .iter()
        .enumerate()
        .map(|(idx, o)| OptionRow {
            idx: idx as i64,
            text: o.text.clone(),
            votes: o.votes as i64,
        })
        .collect()
}

fn parse_uuid(s: &str) -> Result<Uuid, PollError> {
    s.parse()
        .map_err(|e| anyhow::anyhow!("Corrupt uuid '{}': {}", s, e).into())
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, PollError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| anyhow::anyhow!("Corrupt timestamp '{}': {}", s, e).into())
}
