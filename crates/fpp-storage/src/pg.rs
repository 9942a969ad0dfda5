use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fpp_core::{
    matchday_totals, rank_standings, resolve_matchday_results, score_prediction, AggregateSummary,
    Fixture, FixtureId, FixturePrediction, FixtureResult, FixtureScoreSummary, LeaderboardRow,
    Matchday, MatchdayPredictionRow, MatchdayStanding, MatchdayTracker, NewFixture, NewUser,
    ResolutionSource, ResultsSnapshot, SubmissionError, SubmissionRules, SubmittedPrediction, User,
    UserId,
};
use sqlx::postgres::{PgConnection, PgPoolOptions};
use sqlx::PgPool;
use tracing::{debug, info};

use crate::{
    warn_unmatched_entries, PredictionStore, RemovalScope, StoreError, StoreResult, SubmitFailure,
};

const FIXTURE_COLUMNS: &str = "fixture_id, matchday, home_team, away_team, kickoff_time, result";

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: i64,
    username: String,
    credential_hash: String,
    full_name: Option<String>,
    team: Option<String>,
    is_approved: bool,
    is_admin: bool,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            username: row.username,
            credential_hash: row.credential_hash,
            full_name: row.full_name,
            team: row.team,
            is_approved: row.is_approved,
            is_admin: row.is_admin,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct FixtureRow {
    fixture_id: i64,
    matchday: i32,
    home_team: String,
    away_team: String,
    kickoff_time: DateTime<Utc>,
    result: Option<String>,
}

impl From<FixtureRow> for Fixture {
    fn from(row: FixtureRow) -> Self {
        Fixture {
            fixture_id: row.fixture_id,
            matchday: row.matchday,
            home_team: row.home_team,
            away_team: row.away_team,
            kickoff_time: row.kickoff_time,
            result: row.result,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TrackerRow {
    current_matchday: i32,
    last_completed_matchday: i32,
    last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, sqlx::FromRow)]
struct ScorablePredictionRow {
    id: i64,
    fixture_id: i64,
    predicted_result: String,
}

#[derive(Debug, sqlx::FromRow)]
struct FixturePredictionRow {
    fixture_id: i64,
    home_team: String,
    away_team: String,
    kickoff_time: DateTime<Utc>,
    predicted_result: Option<String>,
    final_result: Option<String>,
    points: i32,
}

#[derive(Debug, sqlx::FromRow)]
struct MatchdayPredictionDbRow {
    username: String,
    fixture_id: i64,
    home_team: String,
    away_team: String,
    predicted_result: String,
    points: i32,
    final_result: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct StandingRow {
    user_id: i64,
    username: String,
    full_name: Option<String>,
    points: i32,
}

#[derive(Debug, sqlx::FromRow)]
struct LeaderboardDbRow {
    user_id: i64,
    username: String,
    full_name: Option<String>,
    team: Option<String>,
    points: i32,
    current_matchday: Option<i32>,
    last_updated: Option<DateTime<Utc>>,
}

/// Postgres-backed store. Each mutating call runs in its own transaction.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

async fn matchday_fixtures(
    conn: &mut PgConnection,
    matchday: Matchday,
    lock: bool,
) -> Result<Vec<Fixture>, sqlx::Error> {
    let sql = format!(
        "SELECT {FIXTURE_COLUMNS} FROM fixtures WHERE matchday = $1 ORDER BY kickoff_time, fixture_id{}",
        if lock { " FOR UPDATE" } else { "" }
    );
    let rows = sqlx::query_as::<_, FixtureRow>(&sql)
        .bind(matchday)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows.into_iter().map(Fixture::from).collect())
}

async fn load_snapshot(
    conn: &mut PgConnection,
    matchday: Matchday,
) -> StoreResult<Option<ResultsSnapshot>> {
    let value: Option<serde_json::Value> =
        sqlx::query_scalar("SELECT results_json FROM results WHERE matchday = $1")
            .bind(matchday)
            .fetch_optional(&mut *conn)
            .await?;
    match value {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

async fn write_prediction_points(
    conn: &mut PgConnection,
    scored: &[(i64, i32, String)],
) -> Result<(), sqlx::Error> {
    if scored.is_empty() {
        return Ok(());
    }
    let ids: Vec<i64> = scored.iter().map(|(id, _, _)| *id).collect();
    let points: Vec<i32> = scored.iter().map(|(_, p, _)| *p).collect();
    let finals: Vec<String> = scored.iter().map(|(_, _, f)| f.clone()).collect();
    sqlx::query(
        r#"
        UPDATE predictions AS p
           SET points_awarded = s.points,
               final_result = s.final_result
          FROM UNNEST($1::BIGINT[], $2::INT[], $3::TEXT[]) AS s(id, points, final_result)
         WHERE p.id = s.id
        "#,
    )
    .bind(&ids[..])
    .bind(&points[..])
    .bind(&finals[..])
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Replaces the matchday's totals and refreshes the participants' leaderboard rows.
async fn retotal_matchday(
    conn: &mut PgConnection,
    matchday: Matchday,
    now: DateTime<Utc>,
) -> Result<usize, sqlx::Error> {
    let scored: Vec<(i64, i32)> = sqlx::query_as(
        r#"
        SELECT p.user_id, p.points_awarded
          FROM predictions p
          JOIN fixtures f ON f.fixture_id = p.fixture_id
         WHERE f.matchday = $1
        "#,
    )
    .bind(matchday)
    .fetch_all(&mut *conn)
    .await?;
    let approved: Vec<i64> = sqlx::query_scalar("SELECT id FROM users WHERE is_approved")
        .fetch_all(&mut *conn)
        .await?;

    let participants = approved
        .into_iter()
        .chain(scored.iter().map(|(user_id, _)| *user_id))
        .collect::<Vec<_>>();
    let totals = matchday_totals(participants, scored);
    let user_ids: Vec<i64> = totals.keys().copied().collect();
    let points: Vec<i32> = totals.values().copied().collect();

    sqlx::query("DELETE FROM matchday_results WHERE matchday = $1")
        .bind(matchday)
        .execute(&mut *conn)
        .await?;
    sqlx::query(
        r#"
        INSERT INTO matchday_results (matchday, user_id, points)
        SELECT $1, t.user_id, t.points
          FROM UNNEST($2::BIGINT[], $3::INT[]) AS t(user_id, points)
        "#,
    )
    .bind(matchday)
    .bind(&user_ids[..])
    .bind(&points[..])
    .execute(&mut *conn)
    .await?;
    sqlx::query(
        r#"
        INSERT INTO leaderboard (user_id, points, current_matchday, last_updated)
        SELECT u.user_id, COALESCE(SUM(mr.points), 0)::INT, $2, $3
          FROM UNNEST($1::BIGINT[]) AS u(user_id)
          LEFT JOIN matchday_results mr ON mr.user_id = u.user_id
         GROUP BY u.user_id
        ON CONFLICT (user_id) DO UPDATE
           SET points = EXCLUDED.points,
               current_matchday = EXCLUDED.current_matchday,
               last_updated = EXCLUDED.last_updated
        "#,
    )
    .bind(&user_ids[..])
    .bind(matchday)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(totals.len())
}

#[async_trait]
impl PredictionStore for PgStore {
    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        let inserted = sqlx::query_as::<_, UserRow>(
            r#"
            INSERT INTO users (username, credential_hash, full_name, team, is_approved, is_admin)
            VALUES ($1, $2, $3, $4, $5, $5)
            RETURNING id, username, credential_hash, full_name, team, is_approved, is_admin
            "#,
        )
        .bind(&user.username)
        .bind(&user.credential_hash)
        .bind(&user.full_name)
        .bind(&user.team)
        .bind(user.is_admin)
        .fetch_one(&self.pool)
        .await;
        match inserted {
            Ok(row) => Ok(row.into()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::Conflict(format!("user {}", user.username)))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn user(&self, user_id: UserId) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, username, credential_hash, full_name, team, is_approved, is_admin FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(User::from))
    }

    async fn pending_users(&self) -> StoreResult<Vec<User>> {
        let rows = sqlx::query_as::<_, UserRow>(
            "SELECT id, username, credential_hash, full_name, team, is_approved, is_admin FROM users WHERE NOT is_approved ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(User::from).collect())
    }

    async fn approved_users(&self) -> StoreResult<Vec<User>> {
        let rows = sqlx::query_as::<_, UserRow>(
            "SELECT id, username, credential_hash, full_name, team, is_approved, is_admin FROM users WHERE is_approved ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(User::from).collect())
    }

    async fn approve_user(&self, username: &str) -> StoreResult<bool> {
        let done = sqlx::query("UPDATE users SET is_approved = TRUE WHERE username = $1")
            .bind(username)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn remove_user(&self, username: &str, scope: RemovalScope) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;
        let user_id: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM users WHERE username = $1 AND (NOT is_approved OR $2) FOR UPDATE",
        )
        .bind(username)
        .bind(scope == RemovalScope::Any)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(user_id) = user_id else {
            return Ok(false);
        };

        let removed = sqlx::query("DELETE FROM predictions WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        debug!(username, predictions = removed, "removed user");
        Ok(true)
    }

    async fn tracker(&self) -> StoreResult<MatchdayTracker> {
        let row = sqlx::query_as::<_, TrackerRow>(
            "SELECT current_matchday, last_completed_matchday, last_updated FROM matchday_tracker WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row
            .map(|r| MatchdayTracker {
                current_matchday: r.current_matchday,
                last_completed_matchday: r.last_completed_matchday,
                last_updated: r.last_updated,
            })
            .unwrap_or_default())
    }

    async fn install_matchday(
        &self,
        matchday: Matchday,
        fixtures: &[NewFixture],
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO matchday_tracker (id, current_matchday, last_completed_matchday)
            VALUES (1, 0, 0)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .execute(&mut *tx)
        .await?;
        sqlx::query("SELECT id FROM matchday_tracker WHERE id = 1 FOR UPDATE")
            .execute(&mut *tx)
            .await?;

        let affected: Vec<i64> =
            sqlx::query_scalar("SELECT user_id FROM matchday_results WHERE matchday = $1")
                .bind(matchday)
                .fetch_all(&mut *tx)
                .await?;
        sqlx::query(
            "DELETE FROM predictions WHERE fixture_id IN (SELECT fixture_id FROM fixtures WHERE matchday = $1)",
        )
        .bind(matchday)
        .execute(&mut *tx)
        .await?;
        for table in ["fixtures", "results", "matchday_results"] {
            sqlx::query(&format!("DELETE FROM {table} WHERE matchday = $1"))
                .bind(matchday)
                .execute(&mut *tx)
                .await?;
        }
        if !affected.is_empty() {
            sqlx::query(
                r#"
                UPDATE leaderboard AS l
                   SET points = COALESCE(
                           (SELECT SUM(mr.points) FROM matchday_results mr WHERE mr.user_id = l.user_id),
                           0)::INT,
                       last_updated = $2
                 WHERE l.user_id = ANY($1)
                "#,
            )
            .bind(&affected[..])
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        let ids: Vec<i64> = fixtures.iter().map(|f| f.fixture_id).collect();
        let homes: Vec<String> = fixtures.iter().map(|f| f.home_team.clone()).collect();
        let aways: Vec<String> = fixtures.iter().map(|f| f.away_team.clone()).collect();
        let kickoffs: Vec<DateTime<Utc>> = fixtures.iter().map(|f| f.kickoff_time).collect();
        sqlx::query(
            r#"
            INSERT INTO fixtures (fixture_id, matchday, home_team, away_team, kickoff_time, result)
            SELECT n.fixture_id, $1, n.home_team, n.away_team, n.kickoff_time, NULL
              FROM UNNEST($2::BIGINT[], $3::TEXT[], $4::TEXT[], $5::TIMESTAMPTZ[])
                   AS n(fixture_id, home_team, away_team, kickoff_time)
            ON CONFLICT (fixture_id) DO UPDATE
               SET matchday = EXCLUDED.matchday,
                   home_team = EXCLUDED.home_team,
                   away_team = EXCLUDED.away_team,
                   kickoff_time = EXCLUDED.kickoff_time,
                   result = NULL
            "#,
        )
        .bind(matchday)
        .bind(&ids[..])
        .bind(&homes[..])
        .bind(&aways[..])
        .bind(&kickoffs[..])
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE matchday_tracker SET current_matchday = $1, last_updated = $2 WHERE id = 1",
        )
        .bind(matchday)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        info!(matchday, fixtures = fixtures.len(), "installed matchday");
        Ok(())
    }

    async fn fixtures_for_matchday(&self, matchday: Matchday) -> StoreResult<Vec<Fixture>> {
        let mut conn = self.pool.acquire().await?;
        Ok(matchday_fixtures(&mut conn, matchday, false).await?)
    }

    async fn all_fixtures(&self) -> StoreResult<Vec<Fixture>> {
        let sql = format!(
            "SELECT {FIXTURE_COLUMNS} FROM fixtures ORDER BY matchday, kickoff_time, fixture_id"
        );
        let rows = sqlx::query_as::<_, FixtureRow>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Fixture::from).collect())
    }

    async fn add_fixture(&self, fixture: NewFixture) -> StoreResult<Fixture> {
        let sql = format!(
            r#"
            INSERT INTO fixtures (fixture_id, matchday, home_team, away_team, kickoff_time, result)
            VALUES ($1, $2, $3, $4, $5, NULL)
            ON CONFLICT (fixture_id) DO UPDATE
               SET matchday = EXCLUDED.matchday,
                   home_team = EXCLUDED.home_team,
                   away_team = EXCLUDED.away_team,
                   kickoff_time = EXCLUDED.kickoff_time
            RETURNING {FIXTURE_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, FixtureRow>(&sql)
            .bind(fixture.fixture_id)
            .bind(fixture.matchday)
            .bind(&fixture.home_team)
            .bind(&fixture.away_team)
            .bind(fixture.kickoff_time)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.into())
    }

    async fn last_kickoff(&self) -> StoreResult<Option<DateTime<Utc>>> {
        let last: Option<DateTime<Utc>> = sqlx::query_scalar("SELECT MAX(kickoff_time) FROM fixtures")
            .fetch_one(&self.pool)
            .await?;
        Ok(last)
    }

    async fn matchday_awaiting_results(
        &self,
        kicked_off_before: DateTime<Utc>,
    ) -> StoreResult<Option<Matchday>> {
        let matchday: Option<i32> = sqlx::query_scalar(
            r#"
            SELECT f.matchday
              FROM fixtures f
             WHERE NOT EXISTS (SELECT 1 FROM results r WHERE r.matchday = f.matchday)
             GROUP BY f.matchday
            HAVING MAX(f.kickoff_time) < $1
             ORDER BY MAX(f.kickoff_time) ASC, f.matchday ASC
             LIMIT 1
            "#,
        )
        .bind(kicked_off_before)
        .fetch_optional(&self.pool)
        .await?;
        Ok(matchday)
    }

    async fn save_results_snapshot(
        &self,
        matchday: Matchday,
        snapshot: &ResultsSnapshot,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let json = serde_json::to_value(snapshot)?;
        sqlx::query(
            r#"
            INSERT INTO results (matchday, results_json, results_text, updated_at, scored_at)
            VALUES ($1, $2, $3, $4, NULL)
            ON CONFLICT (matchday) DO UPDATE
               SET results_json = EXCLUDED.results_json,
                   results_text = EXCLUDED.results_text,
                   updated_at = EXCLUDED.updated_at,
                   scored_at = NULL
            "#,
        )
        .bind(matchday)
        .bind(json)
        .bind(snapshot.human_readable())
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn results_snapshot(&self, matchday: Matchday) -> StoreResult<Option<ResultsSnapshot>> {
        let mut conn = self.pool.acquire().await?;
        load_snapshot(&mut conn, matchday).await
    }

    async fn unscored_snapshot_matchdays(&self) -> StoreResult<Vec<Matchday>> {
        let matchdays: Vec<i32> = sqlx::query_scalar(
            "SELECT matchday FROM results WHERE scored_at IS NULL ORDER BY updated_at, matchday",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(matchdays)
    }

    async fn submit_predictions(
        &self,
        user_id: UserId,
        entries: &[SubmittedPrediction],
        rules: SubmissionRules,
        now: DateTime<Utc>,
    ) -> Result<Matchday, SubmitFailure> {
        rules.check_entries(entries)?;

        let mut tx = self.pool.begin().await?;
        let user: Option<i64> = sqlx::query_scalar("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?;
        if user.is_none() {
            return Err(SubmissionError::UnknownUser.into());
        }

        let ids: Vec<i64> = entries.iter().map(|e| e.fixture_id).collect();
        let sql = format!("SELECT {FIXTURE_COLUMNS} FROM fixtures WHERE fixture_id = ANY($1)");
        let named: Vec<Fixture> = sqlx::query_as::<_, FixtureRow>(&sql)
            .bind(&ids[..])
            .fetch_all(&mut *tx)
            .await?
            .into_iter()
            .map(Fixture::from)
            .collect();
        let matchday = rules.resolve_matchday(entries, &named)?;
        let all = matchday_fixtures(&mut tx, matchday, false).await?;
        rules.check_matchday(matchday, entries, &all, now)?;

        let results: HashMap<FixtureId, FixtureResult> = all
            .iter()
            .filter_map(|f| f.parsed_result().map(|r| (f.fixture_id, r)))
            .collect();
        let mut scores = Vec::with_capacity(entries.len());
        let mut points = Vec::with_capacity(entries.len());
        let mut finals: Vec<Option<String>> = Vec::with_capacity(entries.len());
        for entry in entries {
            scores.push(entry.predicted_result.clone());
            match results.get(&entry.fixture_id) {
                Some(result) => {
                    points.push(score_prediction(Some(entry.predicted_result.as_str()), result));
                    finals.push(Some(result.as_stored()));
                }
                None => {
                    points.push(0);
                    finals.push(None);
                }
            }
        }
        sqlx::query(
            r#"
            INSERT INTO predictions (user_id, fixture_id, predicted_result, points_awarded, final_result, updated_at)
            SELECT $1, s.fixture_id, s.predicted_result, s.points_awarded, s.final_result, $4
              FROM UNNEST($2::BIGINT[], $3::TEXT[], $5::INT[], $6::TEXT[])
                   AS s(fixture_id, predicted_result, points_awarded, final_result)
            ON CONFLICT (user_id, fixture_id) DO UPDATE
               SET predicted_result = EXCLUDED.predicted_result,
                   points_awarded = EXCLUDED.points_awarded,
                   final_result = EXCLUDED.final_result,
                   updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(user_id)
        .bind(&ids[..])
        .bind(&scores[..])
        .bind(now)
        .bind(&points[..])
        .bind(&finals[..])
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(matchday)
    }

    async fn close_matchday(
        &self,
        matchday: Matchday,
        now: DateTime<Utc>,
    ) -> StoreResult<AggregateSummary> {
        let mut tx = self.pool.begin().await?;
        let fixtures = matchday_fixtures(&mut tx, matchday, true).await?;
        let snapshot = load_snapshot(&mut tx, matchday).await?.unwrap_or_default();
        warn_unmatched_entries(matchday, &fixtures, &snapshot);

        let mut summary = AggregateSummary {
            matchday,
            ..Default::default()
        };
        let resolved = resolve_matchday_results(&fixtures, &snapshot);
        for r in &resolved {
            match r.source {
                ResolutionSource::Snapshot => summary.fixtures_from_snapshot += 1,
                ResolutionSource::Voided => summary.fixtures_voided += 1,
                ResolutionSource::Existing => {}
            }
        }
        let ids: Vec<i64> = resolved.iter().map(|r| r.fixture_id).collect();
        let stored: Vec<String> = resolved.iter().map(|r| r.result.as_stored()).collect();
        sqlx::query(
            r#"
            UPDATE fixtures AS f
               SET result = r.result
              FROM UNNEST($1::BIGINT[], $2::TEXT[]) AS r(fixture_id, result)
             WHERE f.fixture_id = r.fixture_id
            "#,
        )
        .bind(&ids[..])
        .bind(&stored[..])
        .execute(&mut *tx)
        .await?;

        let by_fixture: HashMap<FixtureId, FixtureResult> =
            resolved.iter().map(|r| (r.fixture_id, r.result)).collect();
        let predictions = sqlx::query_as::<_, ScorablePredictionRow>(
            r#"
            SELECT p.id, p.fixture_id, p.predicted_result
              FROM predictions p
              JOIN fixtures f ON f.fixture_id = p.fixture_id
             WHERE f.matchday = $1
            "#,
        )
        .bind(matchday)
        .fetch_all(&mut *tx)
        .await?;
        let scored: Vec<(i64, i32, String)> = predictions
            .iter()
            .filter_map(|p| {
                by_fixture.get(&p.fixture_id).map(|result| {
                    (
                        p.id,
                        score_prediction(Some(p.predicted_result.as_str()), result),
                        result.as_stored(),
                    )
                })
            })
            .collect();
        summary.predictions_scored = scored.len();
        write_prediction_points(&mut tx, &scored).await?;

        summary.users_totalled = retotal_matchday(&mut tx, matchday, now).await?;
        sqlx::query("UPDATE results SET scored_at = $2 WHERE matchday = $1")
            .bind(matchday)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "UPDATE matchday_tracker SET last_completed_matchday = $1, last_updated = $2 WHERE id = 1",
        )
        .bind(matchday)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(summary)
    }

    async fn post_fixture_result(
        &self,
        fixture_id: FixtureId,
        result: FixtureResult,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<FixtureScoreSummary>> {
        let mut tx = self.pool.begin().await?;
        let stored = result.as_stored();
        let sql = format!(
            "UPDATE fixtures SET result = $2 WHERE fixture_id = $1 RETURNING {FIXTURE_COLUMNS}"
        );
        let fixture: Option<Fixture> = sqlx::query_as::<_, FixtureRow>(&sql)
            .bind(fixture_id)
            .bind(&stored)
            .fetch_optional(&mut *tx)
            .await?
            .map(Fixture::from);
        let Some(fixture) = fixture else {
            return Ok(None);
        };
        let matchday = fixture.matchday;

        if let Some(mut snapshot) = load_snapshot(&mut tx, matchday).await? {
            if snapshot.forget_fixture(&fixture) {
                sqlx::query(
                    "UPDATE results SET results_json = $2, results_text = $3, updated_at = $4 WHERE matchday = $1",
                )
                .bind(matchday)
                .bind(serde_json::to_value(&snapshot)?)
                .bind(snapshot.human_readable())
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }
        }

        let predictions: Vec<(i64, String)> =
            sqlx::query_as("SELECT id, predicted_result FROM predictions WHERE fixture_id = $1")
                .bind(fixture_id)
                .fetch_all(&mut *tx)
                .await?;
        let scored: Vec<(i64, i32, String)> = predictions
            .iter()
            .map(|(id, predicted)| (*id, score_prediction(Some(predicted.as_str()), &result), stored.clone()))
            .collect();
        write_prediction_points(&mut tx, &scored).await?;

        let closed: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (SELECT 1 FROM results WHERE matchday = $1 AND scored_at IS NOT NULL)
                OR EXISTS (SELECT 1 FROM matchday_results WHERE matchday = $1)
            "#,
        )
        .bind(matchday)
        .fetch_one(&mut *tx)
        .await?;
        if closed {
            retotal_matchday(&mut tx, matchday, now).await?;
        }
        tx.commit().await?;

        Ok(Some(FixtureScoreSummary {
            fixture_id,
            matchday,
            predictions_scored: scored.len(),
            matchday_retotalled: closed,
        }))
    }

    async fn user_matchday_predictions(
        &self,
        user_id: UserId,
        matchday: Matchday,
    ) -> StoreResult<Vec<FixturePrediction>> {
        let rows = sqlx::query_as::<_, FixturePredictionRow>(
            r#"
            SELECT f.fixture_id, f.home_team, f.away_team, f.kickoff_time,
                   p.predicted_result, f.result AS final_result,
                   COALESCE(p.points_awarded, 0) AS points
              FROM fixtures f
              LEFT JOIN predictions p ON p.fixture_id = f.fixture_id AND p.user_id = $1
             WHERE f.matchday = $2
             ORDER BY f.kickoff_time, f.fixture_id
            "#,
        )
        .bind(user_id)
        .bind(matchday)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| FixturePrediction {
                fixture_id: r.fixture_id,
                home_team: r.home_team,
                away_team: r.away_team,
                kickoff_time: r.kickoff_time,
                predicted_result: r.predicted_result,
                final_result: r.final_result,
                points: r.points,
            })
            .collect())
    }

    async fn matchday_predictions(&self, matchday: Matchday) -> StoreResult<Vec<MatchdayPredictionRow>> {
        let rows = sqlx::query_as::<_, MatchdayPredictionDbRow>(
            r#"
            SELECT u.username, f.fixture_id, f.home_team, f.away_team,
                   p.predicted_result, p.points_awarded AS points, f.result AS final_result
              FROM predictions p
              JOIN users u ON u.id = p.user_id
              JOIN fixtures f ON f.fixture_id = p.fixture_id
             WHERE f.matchday = $1
             ORDER BY u.username, f.kickoff_time, f.fixture_id
            "#,
        )
        .bind(matchday)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| MatchdayPredictionRow {
                username: r.username,
                fixture_id: r.fixture_id,
                home_team: r.home_team,
                away_team: r.away_team,
                predicted_result: r.predicted_result,
                points: r.points,
                final_result: r.final_result,
            })
            .collect())
    }

    async fn matchday_standings(&self, matchday: Matchday) -> StoreResult<Vec<MatchdayStanding>> {
        let rows = sqlx::query_as::<_, StandingRow>(
            r#"
            SELECT mr.user_id, u.username, u.full_name, mr.points
              FROM matchday_results mr
              JOIN users u ON u.id = mr.user_id
             WHERE mr.matchday = $1
            "#,
        )
        .bind(matchday)
        .fetch_all(&self.pool)
        .await?;
        let totals = rows
            .into_iter()
            .map(|r| (r.user_id, r.username, r.full_name, r.points))
            .collect();
        Ok(rank_standings(matchday, totals))
    }

    async fn leaderboard(&self) -> StoreResult<Vec<LeaderboardRow>> {
        let rows = sqlx::query_as::<_, LeaderboardDbRow>(
            r#"
            SELECT u.id AS user_id, u.username, u.full_name, u.team,
                   COALESCE(l.points, 0) AS points, l.current_matchday, l.last_updated
              FROM users u
              LEFT JOIN leaderboard l ON l.user_id = u.id
             WHERE u.is_approved
             ORDER BY COALESCE(l.points, 0) DESC, u.username ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| LeaderboardRow {
                user_id: r.user_id,
                username: r.username,
                full_name: r.full_name,
                team: r.team,
                points: r.points,
                current_matchday: r.current_matchday,
                last_updated: r.last_updated,
            })
            .collect())
    }

    async fn reset_season(&self, now: DateTime<Utc>) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        for table in ["predictions", "matchday_results", "leaderboard", "results", "fixtures"] {
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query(
            r#"
            INSERT INTO matchday_tracker (id, current_matchday, last_completed_matchday, last_updated)
            VALUES (1, 0, 0, $1)
            ON CONFLICT (id) DO UPDATE
               SET current_matchday = 0,
                   last_completed_matchday = 0,
                   last_updated = EXCLUDED.last_updated
            "#,
        )
        .bind(now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        info!("season reset");
        Ok(())
    }
}
