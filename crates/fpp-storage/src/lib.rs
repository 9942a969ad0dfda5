//! Persistence for users, fixtures, predictions, snapshots and aggregates.
//!
//! [`PredictionStore`] is the single seam the pipeline and the web layer talk
//! to. Every mutating operation is one unit of work: either all of its writes
//! land or none do.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fpp_core::{
    AggregateSummary, Fixture, FixturePrediction, FixtureResult, FixtureScoreSummary, LeaderboardRow,
    Matchday, MatchdayPredictionRow, MatchdayStanding, MatchdayTracker, NewFixture, NewUser,
    ResultsSnapshot, SubmissionError, SubmissionRules, SubmittedPrediction, User, UserId, FixtureId,
};
use thiserror::Error;

mod memory;
mod pg;

pub use memory::MemoryStore;
pub use pg::PgStore;

pub const CRATE_NAME: &str = "fpp-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("snapshot encoding: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("{0} already exists")]
    Conflict(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of a rejected or failed submission.
#[derive(Debug, Error)]
pub enum SubmitFailure {
    #[error(transparent)]
    Rejected(#[from] SubmissionError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<sqlx::Error> for SubmitFailure {
    fn from(err: sqlx::Error) -> Self {
        Self::Store(StoreError::Database(err))
    }
}

/// Which users a removal may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalScope {
    PendingOnly,
    Any,
}

#[async_trait]
pub trait PredictionStore: Send + Sync {
    async fn create_user(&self, user: NewUser) -> StoreResult<User>;
    async fn user(&self, user_id: UserId) -> StoreResult<Option<User>>;
    async fn pending_users(&self) -> StoreResult<Vec<User>>;
    async fn approved_users(&self) -> StoreResult<Vec<User>>;
    async fn approve_user(&self, username: &str) -> StoreResult<bool>;
    /// Deletes the user's predictions, then the user, in one transaction.
    async fn remove_user(&self, username: &str, scope: RemovalScope) -> StoreResult<bool>;

    async fn tracker(&self) -> StoreResult<MatchdayTracker>;
    /// Installs a matchday's fixtures and moves `current_matchday` to it.
    /// Any previous data stored under the same matchday number is removed first.
    async fn install_matchday(
        &self,
        matchday: Matchday,
        fixtures: &[NewFixture],
        now: DateTime<Utc>,
    ) -> StoreResult<()>;

    async fn fixtures_for_matchday(&self, matchday: Matchday) -> StoreResult<Vec<Fixture>>;
    async fn all_fixtures(&self) -> StoreResult<Vec<Fixture>>;
    async fn add_fixture(&self, fixture: NewFixture) -> StoreResult<Fixture>;
    async fn last_kickoff(&self) -> StoreResult<Option<DateTime<Utc>>>;
    /// Earliest matchday (by latest kickoff) whose latest kickoff is before
    /// `kicked_off_before` and which has no results snapshot.
    async fn matchday_awaiting_results(
        &self,
        kicked_off_before: DateTime<Utc>,
    ) -> StoreResult<Option<Matchday>>;

    async fn save_results_snapshot(
        &self,
        matchday: Matchday,
        snapshot: &ResultsSnapshot,
        now: DateTime<Utc>,
    ) -> StoreResult<()>;
    async fn results_snapshot(&self, matchday: Matchday) -> StoreResult<Option<ResultsSnapshot>>;
    async fn unscored_snapshot_matchdays(&self) -> StoreResult<Vec<Matchday>>;

    /// Validates and upserts a full matchday of predictions atomically.
    async fn submit_predictions(
        &self,
        user_id: UserId,
        entries: &[SubmittedPrediction],
        rules: SubmissionRules,
        now: DateTime<Utc>,
    ) -> Result<Matchday, SubmitFailure>;

    async fn close_matchday(
        &self,
        matchday: Matchday,
        now: DateTime<Utc>,
    ) -> StoreResult<AggregateSummary>;
    /// Sets one fixture's result and rescores it. Returns `None` for an unknown fixture.
    async fn post_fixture_result(
        &self,
        fixture_id: FixtureId,
        result: FixtureResult,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<FixtureScoreSummary>>;

    async fn user_matchday_predictions(
        &self,
        user_id: UserId,
        matchday: Matchday,
    ) -> StoreResult<Vec<FixturePrediction>>;
    async fn matchday_predictions(&self, matchday: Matchday) -> StoreResult<Vec<MatchdayPredictionRow>>;
    async fn matchday_standings(&self, matchday: Matchday) -> StoreResult<Vec<MatchdayStanding>>;
    async fn leaderboard(&self) -> StoreResult<Vec<LeaderboardRow>>;

    async fn reset_season(&self, now: DateTime<Utc>) -> StoreResult<()>;
}

fn warn_unmatched_entries(matchday: Matchday, fixtures: &[Fixture], snapshot: &ResultsSnapshot) {
    for entry in &snapshot.entries {
        if !fixtures.iter().any(|f| entry.matches(f)) {
            tracing::warn!(
                matchday,
                home = %entry.home,
                away = %entry.away,
                kickoff = %entry.kickoff,
                "snapshot entry matches no fixture; skipped"
            );
        }
    }
}
