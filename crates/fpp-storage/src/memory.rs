use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fpp_core::{
    matchday_totals, rank_standings, resolve_matchday_results, score_prediction, sort_leaderboard,
    AggregateSummary, Fixture, FixtureId, FixturePrediction, FixtureResult, FixtureScoreSummary,
    LeaderboardRow, Matchday, MatchdayPredictionRow, MatchdayStanding, MatchdayTracker, NewFixture,
    NewUser, Prediction, ResolutionSource, ResultsSnapshot, SubmissionError, SubmissionRules,
    SubmittedPrediction, User, UserId,
};
use tokio::sync::Mutex;

use crate::{
    warn_unmatched_entries, PredictionStore, RemovalScope, StoreError, StoreResult, SubmitFailure,
};

#[derive(Debug, Clone)]
struct SnapshotRecord {
    snapshot: ResultsSnapshot,
    updated_at: DateTime<Utc>,
    scored_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct Standing {
    points: i32,
    current_matchday: Option<Matchday>,
    last_updated: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    users: BTreeMap<UserId, User>,
    next_user_id: UserId,
    fixtures: BTreeMap<FixtureId, Fixture>,
    predictions: BTreeMap<(UserId, FixtureId), Prediction>,
    next_prediction_id: i64,
    tracker: MatchdayTracker,
    snapshots: BTreeMap<Matchday, SnapshotRecord>,
    matchday_results: BTreeMap<(Matchday, UserId), i32>,
    leaderboard: BTreeMap<UserId, Standing>,
}

impl State {
    fn matchday_fixtures(&self, matchday: Matchday) -> Vec<Fixture> {
        let mut fixtures: Vec<Fixture> = self
            .fixtures
            .values()
            .filter(|f| f.matchday == matchday)
            .cloned()
            .collect();
        fixtures.sort_by(|a, b| {
            a.kickoff_time
                .cmp(&b.kickoff_time)
                .then(a.fixture_id.cmp(&b.fixture_id))
        });
        fixtures
    }

    fn matchday_fixture_ids(&self, matchday: Matchday) -> BTreeSet<FixtureId> {
        self.fixtures
            .values()
            .filter(|f| f.matchday == matchday)
            .map(|f| f.fixture_id)
            .collect()
    }

    fn is_closed(&self, matchday: Matchday) -> bool {
        self.snapshots
            .get(&matchday)
            .is_some_and(|r| r.scored_at.is_some())
            || self.matchday_results.keys().any(|(md, _)| *md == matchday)
    }

    /// Replaces the matchday's totals and refreshes the participants' leaderboard rows.
    fn retotal(&mut self, matchday: Matchday, now: DateTime<Utc>) -> usize {
        let ids = self.matchday_fixture_ids(matchday);
        let scored: Vec<(UserId, i32)> = self
            .predictions
            .values()
            .filter(|p| ids.contains(&p.fixture_id))
            .map(|p| (p.user_id, p.points_awarded))
            .collect();
        let participants: BTreeSet<UserId> = self
            .users
            .values()
            .filter(|u| u.is_approved)
            .map(|u| u.id)
            .chain(scored.iter().map(|(user_id, _)| *user_id))
            .collect();
        let totals = matchday_totals(participants, scored);

        self.matchday_results.retain(|(md, _), _| *md != matchday);
        for (user_id, points) in &totals {
            self.matchday_results.insert((matchday, *user_id), *points);
        }
        for user_id in totals.keys() {
            let points = self.total_points(*user_id);
            self.leaderboard.insert(
                *user_id,
                Standing {
                    points,
                    current_matchday: Some(matchday),
                    last_updated: now,
                },
            );
        }
        totals.len()
    }

    fn total_points(&self, user_id: UserId) -> i32 {
        self.matchday_results
            .iter()
            .filter(|((_, u), _)| *u == user_id)
            .map(|(_, points)| *points)
            .sum()
    }

    fn remove_matchday(&mut self, matchday: Matchday, now: DateTime<Utc>) {
        let ids = self.matchday_fixture_ids(matchday);
        let affected: BTreeSet<UserId> = self
            .matchday_results
            .keys()
            .filter(|(md, _)| *md == matchday)
            .map(|(_, u)| *u)
            .collect();

        self.predictions.retain(|(_, fixture_id), _| !ids.contains(fixture_id));
        self.fixtures.retain(|id, _| !ids.contains(id));
        self.snapshots.remove(&matchday);
        self.matchday_results.retain(|(md, _), _| *md != matchday);

        for user_id in affected {
            let points = self.total_points(user_id);
            if let Some(standing) = self.leaderboard.get_mut(&user_id) {
                standing.points = points;
                standing.last_updated = now;
            }
        }
    }
}

/// In-process store with the same semantics as [`crate::PgStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PredictionStore for MemoryStore {
    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        let mut state = self.state.lock().await;
        if state.users.values().any(|u| u.username == user.username) {
            return Err(StoreError::Conflict(format!("user {}", user.username)));
        }
        state.next_user_id += 1;
        let created = User {
            id: state.next_user_id,
            username: user.username,
            credential_hash: user.credential_hash,
            full_name: user.full_name,
            team: user.team,
            is_approved: user.is_admin,
            is_admin: user.is_admin,
        };
        state.users.insert(created.id, created.clone());
        Ok(created)
    }

    async fn user(&self, user_id: UserId) -> StoreResult<Option<User>> {
        Ok(self.state.lock().await.users.get(&user_id).cloned())
    }

    async fn pending_users(&self) -> StoreResult<Vec<User>> {
        let state = self.state.lock().await;
        Ok(state.users.values().filter(|u| !u.is_approved).cloned().collect())
    }

    async fn approved_users(&self) -> StoreResult<Vec<User>> {
        let state = self.state.lock().await;
        Ok(state.users.values().filter(|u| u.is_approved).cloned().collect())
    }

    async fn approve_user(&self, username: &str) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        match state.users.values_mut().find(|u| u.username == username) {
            Some(user) => {
                user.is_approved = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove_user(&self, username: &str, scope: RemovalScope) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        let Some(user_id) = state
            .users
            .values()
            .find(|u| u.username == username)
            .filter(|u| scope == RemovalScope::Any || !u.is_approved)
            .map(|u| u.id)
        else {
            return Ok(false);
        };
        state.predictions.retain(|(u, _), _| *u != user_id);
        state.matchday_results.retain(|(_, u), _| *u != user_id);
        state.leaderboard.remove(&user_id);
        state.users.remove(&user_id);
        Ok(true)
    }

    async fn tracker(&self) -> StoreResult<MatchdayTracker> {
        Ok(self.state.lock().await.tracker)
    }

    async fn install_matchday(
        &self,
        matchday: Matchday,
        fixtures: &[NewFixture],
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.remove_matchday(matchday, now);
        for fixture in fixtures {
            state.fixtures.insert(
                fixture.fixture_id,
                Fixture {
                    fixture_id: fixture.fixture_id,
                    matchday,
                    home_team: fixture.home_team.clone(),
                    away_team: fixture.away_team.clone(),
                    kickoff_time: fixture.kickoff_time,
                    result: None,
                },
            );
        }
        state.tracker.current_matchday = matchday;
        state.tracker.last_updated = Some(now);
        Ok(())
    }

    async fn fixtures_for_matchday(&self, matchday: Matchday) -> StoreResult<Vec<Fixture>> {
        Ok(self.state.lock().await.matchday_fixtures(matchday))
    }

    async fn all_fixtures(&self) -> StoreResult<Vec<Fixture>> {
        let state = self.state.lock().await;
        let mut fixtures: Vec<Fixture> = state.fixtures.values().cloned().collect();
        fixtures.sort_by(|a, b| {
            a.matchday
                .cmp(&b.matchday)
                .then(a.kickoff_time.cmp(&b.kickoff_time))
                .then(a.fixture_id.cmp(&b.fixture_id))
        });
        Ok(fixtures)
    }

    async fn add_fixture(&self, fixture: NewFixture) -> StoreResult<Fixture> {
        let mut state = self.state.lock().await;
        let stored = Fixture {
            fixture_id: fixture.fixture_id,
            matchday: fixture.matchday,
            home_team: fixture.home_team,
            away_team: fixture.away_team,
            kickoff_time: fixture.kickoff_time,
            result: state
                .fixtures
                .get(&fixture.fixture_id)
                .and_then(|existing| existing.result.clone()),
        };
        state.fixtures.insert(stored.fixture_id, stored.clone());
        Ok(stored)
    }

    async fn last_kickoff(&self) -> StoreResult<Option<DateTime<Utc>>> {
        let state = self.state.lock().await;
        Ok(state.fixtures.values().map(|f| f.kickoff_time).max())
    }

    async fn matchday_awaiting_results(
        &self,
        kicked_off_before: DateTime<Utc>,
    ) -> StoreResult<Option<Matchday>> {
        let state = self.state.lock().await;
        let mut latest: HashMap<Matchday, DateTime<Utc>> = HashMap::new();
        for fixture in state.fixtures.values() {
            let entry = latest.entry(fixture.matchday).or_insert(fixture.kickoff_time);
            *entry = (*entry).max(fixture.kickoff_time);
        }
        Ok(latest
            .into_iter()
            .filter(|(md, last)| *last < kicked_off_before && !state.snapshots.contains_key(md))
            .min_by_key(|(md, last)| (*last, *md))
            .map(|(md, _)| md))
    }

    async fn save_results_snapshot(
        &self,
        matchday: Matchday,
        snapshot: &ResultsSnapshot,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.snapshots.insert(
            matchday,
            SnapshotRecord {
                snapshot: snapshot.clone(),
                updated_at: now,
                scored_at: None,
            },
        );
        Ok(())
    }

    async fn results_snapshot(&self, matchday: Matchday) -> StoreResult<Option<ResultsSnapshot>> {
        let state = self.state.lock().await;
        Ok(state.snapshots.get(&matchday).map(|r| r.snapshot.clone()))
    }

    async fn unscored_snapshot_matchdays(&self) -> StoreResult<Vec<Matchday>> {
        let state = self.state.lock().await;
        let mut pending: Vec<(DateTime<Utc>, Matchday)> = state
            .snapshots
            .iter()
            .filter(|(_, r)| r.scored_at.is_none())
            .map(|(md, r)| (r.updated_at, *md))
            .collect();
        pending.sort();
        Ok(pending.into_iter().map(|(_, md)| md).collect())
    }

    async fn submit_predictions(
        &self,
        user_id: UserId,
        entries: &[SubmittedPrediction],
        rules: SubmissionRules,
        now: DateTime<Utc>,
    ) -> Result<Matchday, SubmitFailure> {
        rules.check_entries(entries)?;
        let mut state = self.state.lock().await;
        if !state.users.contains_key(&user_id) {
            return Err(SubmissionError::UnknownUser.into());
        }
        let named: Vec<Fixture> = entries
            .iter()
            .filter_map(|e| state.fixtures.get(&e.fixture_id).cloned())
            .collect();
        let matchday = rules.resolve_matchday(entries, &named)?;
        let all = state.matchday_fixtures(matchday);
        rules.check_matchday(matchday, entries, &all, now)?;

        let results: HashMap<FixtureId, FixtureResult> = all
            .iter()
            .filter_map(|f| f.parsed_result().map(|r| (f.fixture_id, r)))
            .collect();
        for entry in entries {
            let (points_awarded, final_result) = match results.get(&entry.fixture_id) {
                Some(result) => (
                    score_prediction(Some(entry.predicted_result.as_str()), result),
                    Some(result.as_stored()),
                ),
                None => (0, None),
            };
            match state.predictions.get_mut(&(user_id, entry.fixture_id)) {
                Some(existing) => {
                    existing.predicted_result = entry.predicted_result.clone();
                    existing.points_awarded = points_awarded;
                    existing.final_result = final_result;
                }
                None => {
                    state.next_prediction_id += 1;
                    let id = state.next_prediction_id;
                    state.predictions.insert(
                        (user_id, entry.fixture_id),
                        Prediction {
                            id,
                            user_id,
                            fixture_id: entry.fixture_id,
                            predicted_result: entry.predicted_result.clone(),
                            points_awarded,
                            final_result,
                        },
                    );
                }
            }
        }
        Ok(matchday)
    }

    async fn close_matchday(
        &self,
        matchday: Matchday,
        now: DateTime<Utc>,
    ) -> StoreResult<AggregateSummary> {
        let mut state = self.state.lock().await;
        let fixtures = state.matchday_fixtures(matchday);
        let snapshot = state
            .snapshots
            .get(&matchday)
            .map(|r| r.snapshot.clone())
            .unwrap_or_default();
        warn_unmatched_entries(matchday, &fixtures, &snapshot);

        let mut summary = AggregateSummary {
            matchday,
            ..Default::default()
        };
        let resolved = resolve_matchday_results(&fixtures, &snapshot);
        let mut by_fixture: HashMap<FixtureId, FixtureResult> = HashMap::new();
        for r in &resolved {
            match r.source {
                ResolutionSource::Snapshot => summary.fixtures_from_snapshot += 1,
                ResolutionSource::Voided => summary.fixtures_voided += 1,
                ResolutionSource::Existing => {}
            }
            if let Some(fixture) = state.fixtures.get_mut(&r.fixture_id) {
                fixture.result = Some(r.result.as_stored());
            }
            by_fixture.insert(r.fixture_id, r.result);
        }

        for prediction in state.predictions.values_mut() {
            if let Some(result) = by_fixture.get(&prediction.fixture_id) {
                prediction.points_awarded = score_prediction(Some(prediction.predicted_result.as_str()), result);
                prediction.final_result = Some(result.as_stored());
                summary.predictions_scored += 1;
            }
        }

        summary.users_totalled = state.retotal(matchday, now);
        if let Some(record) = state.snapshots.get_mut(&matchday) {
            record.scored_at = Some(now);
        }
        state.tracker.last_completed_matchday = matchday;
        state.tracker.last_updated = Some(now);
        Ok(summary)
    }

    async fn post_fixture_result(
        &self,
        fixture_id: FixtureId,
        result: FixtureResult,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<FixtureScoreSummary>> {
        let mut state = self.state.lock().await;
        let Some(fixture) = state.fixtures.get_mut(&fixture_id) else {
            return Ok(None);
        };
        fixture.result = Some(result.as_stored());
        let matchday = fixture.matchday;
        let overridden = fixture.clone();
        if let Some(record) = state.snapshots.get_mut(&matchday) {
            if record.snapshot.forget_fixture(&overridden) {
                record.updated_at = now;
            }
        }

        let mut predictions_scored = 0;
        for prediction in state.predictions.values_mut().filter(|p| p.fixture_id == fixture_id) {
            prediction.points_awarded = score_prediction(Some(prediction.predicted_result.as_str()), &result);
            prediction.final_result = Some(result.as_stored());
            predictions_scored += 1;
        }

        let matchday_retotalled = state.is_closed(matchday);
        if matchday_retotalled {
            state.retotal(matchday, now);
        }
        Ok(Some(FixtureScoreSummary {
            fixture_id,
            matchday,
            predictions_scored,
            matchday_retotalled,
        }))
    }

    async fn user_matchday_predictions(
        &self,
        user_id: UserId,
        matchday: Matchday,
    ) -> StoreResult<Vec<FixturePrediction>> {
        let state = self.state.lock().await;
        Ok(state
            .matchday_fixtures(matchday)
            .into_iter()
            .map(|f| {
                let prediction = state.predictions.get(&(user_id, f.fixture_id));
                FixturePrediction {
                    fixture_id: f.fixture_id,
                    home_team: f.home_team,
                    away_team: f.away_team,
                    kickoff_time: f.kickoff_time,
                    predicted_result: prediction.map(|p| p.predicted_result.clone()),
                    final_result: f.result,
                    points: prediction.map(|p| p.points_awarded).unwrap_or(0),
                }
            })
            .collect())
    }

    async fn matchday_predictions(&self, matchday: Matchday) -> StoreResult<Vec<MatchdayPredictionRow>> {
        let state = self.state.lock().await;
        let fixtures = state.matchday_fixtures(matchday);
        let mut rows = Vec::new();
        for user in state.users.values() {
            for fixture in &fixtures {
                if let Some(p) = state.predictions.get(&(user.id, fixture.fixture_id)) {
                    rows.push(MatchdayPredictionRow {
                        username: user.username.clone(),
                        fixture_id: fixture.fixture_id,
                        home_team: fixture.home_team.clone(),
                        away_team: fixture.away_team.clone(),
                        predicted_result: p.predicted_result.clone(),
                        points: p.points_awarded,
                        final_result: fixture.result.clone(),
                    });
                }
            }
        }
        rows.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(rows)
    }

    async fn matchday_standings(&self, matchday: Matchday) -> StoreResult<Vec<MatchdayStanding>> {
        let state = self.state.lock().await;
        let totals = state
            .matchday_results
            .iter()
            .filter(|((md, _), _)| *md == matchday)
            .filter_map(|((_, user_id), points)| {
                state
                    .users
                    .get(user_id)
                    .map(|u| (u.id, u.username.clone(), u.full_name.clone(), *points))
            })
            .collect();
        Ok(rank_standings(matchday, totals))
    }

    async fn leaderboard(&self) -> StoreResult<Vec<LeaderboardRow>> {
        let state = self.state.lock().await;
        let mut rows: Vec<LeaderboardRow> = state
            .users
            .values()
            .filter(|u| u.is_approved)
            .map(|u| {
                let standing = state.leaderboard.get(&u.id);
                LeaderboardRow {
                    user_id: u.id,
                    username: u.username.clone(),
                    full_name: u.full_name.clone(),
                    team: u.team.clone(),
                    points: standing.map(|s| s.points).unwrap_or(0),
                    current_matchday: standing.and_then(|s| s.current_matchday),
                    last_updated: standing.map(|s| s.last_updated),
                }
            })
            .collect();
        sort_leaderboard(&mut rows);
        Ok(rows)
    }

    async fn reset_season(&self, now: DateTime<Utc>) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.predictions.clear();
        state.fixtures.clear();
        state.snapshots.clear();
        state.matchday_results.clear();
        state.leaderboard.clear();
        state.tracker = MatchdayTracker {
            current_matchday: 0,
            last_completed_matchday: 0,
            last_updated: Some(now),
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use fpp_core::{FullTimeScore, Score, SnapshotEntry, SnapshotScore};

    fn kickoff() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 13, 14, 0, 0).single().unwrap()
    }

    fn new_user(username: &str, approved: bool) -> NewUser {
        NewUser {
            username: username.to_string(),
            credential_hash: "hash".to_string(),
            full_name: Some(username.to_uppercase()),
            team: None,
            is_admin: approved,
        }
    }

    fn new_fixture(id: FixtureId, offset_hours: i64) -> NewFixture {
        NewFixture {
            fixture_id: id,
            matchday: 5,
            home_team: format!("Home {id}"),
            away_team: format!("Away {id}"),
            kickoff_time: kickoff() + Duration::hours(offset_hours),
        }
    }

    fn pick(id: FixtureId, score: &str) -> SubmittedPrediction {
        SubmittedPrediction {
            fixture_id: id,
            predicted_result: score.to_string(),
        }
    }

    fn snapshot_for(fixture: &NewFixture, home: u16, away: u16) -> SnapshotEntry {
        SnapshotEntry {
            fixture_id: Some(fixture.fixture_id),
            home: fixture.home_team.clone(),
            away: fixture.away_team.clone(),
            kickoff: fixture.kickoff_time,
            score: SnapshotScore {
                fulltime: FullTimeScore { home, away },
            },
        }
    }

    async fn seeded() -> (MemoryStore, User, Vec<NewFixture>) {
        let store = MemoryStore::new();
        let user = store.create_user(new_user("uma", false)).await.unwrap();
        store.approve_user("uma").await.unwrap();
        let fixtures = vec![new_fixture(51, 0), new_fixture(52, 2)];
        store.install_matchday(5, &fixtures, kickoff() - Duration::days(3)).await.unwrap();
        (store, user, fixtures)
    }

    #[tokio::test]
    async fn partial_submission_writes_nothing() {
        let (store, user, _) = seeded().await;
        let err = store
            .submit_predictions(user.id, &[pick(51, "2-1")], SubmissionRules::default(), kickoff() - Duration::hours(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitFailure::Rejected(SubmissionError::IncompleteMatchday { .. })));
        let rows = store.user_matchday_predictions(user.id, 5).await.unwrap();
        assert!(rows.iter().all(|r| r.predicted_result.is_none()));
    }

    #[tokio::test]
    async fn late_submission_is_rejected_whole() {
        let (store, user, _) = seeded().await;
        let err = store
            .submit_predictions(
                user.id,
                &[pick(51, "2-1"), pick(52, "0-0")],
                SubmissionRules::default(),
                kickoff() - Duration::minutes(20),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitFailure::Rejected(SubmissionError::WindowClosed(51))));
        assert!(store.matchday_predictions(5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn resubmission_overwrites() {
        let (store, user, _) = seeded().await;
        let at = kickoff() - Duration::hours(2);
        let rules = SubmissionRules::default();
        store.submit_predictions(user.id, &[pick(51, "2-1"), pick(52, "0-0")], rules, at).await.unwrap();
        store.submit_predictions(user.id, &[pick(51, "3-3"), pick(52, "0-0")], rules, at).await.unwrap();
        let rows = store.matchday_predictions(5).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows.iter().find(|r| r.fixture_id == 51).unwrap().predicted_result, "3-3");
    }

    #[tokio::test]
    async fn unknown_user_is_rejected() {
        let (store, _, _) = seeded().await;
        let err = store
            .submit_predictions(999, &[pick(51, "1-0"), pick(52, "1-0")], SubmissionRules::default(), kickoff())
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitFailure::Rejected(SubmissionError::UnknownUser)));
    }

    #[tokio::test]
    async fn closing_is_idempotent_and_voids_missing_results() {
        let (store, user, fixtures) = seeded().await;
        let rules = SubmissionRules::default();
        store
            .submit_predictions(user.id, &[pick(51, "2-1"), pick(52, "0-0")], rules, kickoff() - Duration::hours(1))
            .await
            .unwrap();
        let snapshot = ResultsSnapshot {
            entries: vec![snapshot_for(&fixtures[0], 2, 1)],
        };
        let closed_at = kickoff() + Duration::hours(8);
        store.save_results_snapshot(5, &snapshot, closed_at).await.unwrap();

        let first = store.close_matchday(5, closed_at).await.unwrap();
        assert_eq!(first.fixtures_from_snapshot, 1);
        assert_eq!(first.fixtures_voided, 1);
        let board_once = store.leaderboard().await.unwrap();
        let standings_once = store.matchday_standings(5).await.unwrap();

        store.close_matchday(5, closed_at).await.unwrap();
        assert_eq!(store.leaderboard().await.unwrap(), board_once);
        assert_eq!(store.matchday_standings(5).await.unwrap(), standings_once);
        assert_eq!(board_once[0].points, 5);

        let fixtures = store.fixtures_for_matchday(5).await.unwrap();
        assert_eq!(fixtures[1].parsed_result(), Some(FixtureResult::Void));
        assert!(store.unscored_snapshot_matchdays().await.unwrap().is_empty());
        assert_eq!(store.tracker().await.unwrap().last_completed_matchday, 5);
    }

    #[tokio::test]
    async fn override_after_close_retotals() {
        let (store, user, fixtures) = seeded().await;
        store
            .submit_predictions(
                user.id,
                &[pick(51, "2-1"), pick(52, "0-0")],
                SubmissionRules::default(),
                kickoff() - Duration::hours(1),
            )
            .await
            .unwrap();
        let at = kickoff() + Duration::hours(8);
        store
            .save_results_snapshot(5, &ResultsSnapshot { entries: vec![snapshot_for(&fixtures[0], 2, 1)] }, at)
            .await
            .unwrap();
        store.close_matchday(5, at).await.unwrap();

        let summary = store
            .post_fixture_result(52, FixtureResult::Final(Score::new(1, 1)), at)
            .await
            .unwrap()
            .unwrap();
        assert!(summary.matchday_retotalled);
        let standings = store.matchday_standings(5).await.unwrap();
        assert_eq!(standings[0].points, 7);
        assert_eq!(store.leaderboard().await.unwrap()[0].points, 7);
        assert!(store.post_fixture_result(404, FixtureResult::Void, at).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn submission_after_posted_result_is_scored() {
        let (store, user, _) = seeded().await;
        store
            .post_fixture_result(51, FixtureResult::Final(Score::new(2, 1)), kickoff() - Duration::days(1))
            .await
            .unwrap();
        store
            .submit_predictions(
                user.id,
                &[pick(51, "2-1"), pick(52, "0-0")],
                SubmissionRules::default(),
                kickoff() - Duration::hours(2),
            )
            .await
            .unwrap();

        let rows = store.user_matchday_predictions(user.id, 5).await.unwrap();
        assert_eq!((rows[0].points, rows[0].final_result.as_deref()), (5, Some("2-1")));
        assert_eq!((rows[1].points, rows[1].final_result.as_deref()), (0, None));

        store
            .submit_predictions(
                user.id,
                &[pick(51, "0-1"), pick(52, "0-0")],
                SubmissionRules::default(),
                kickoff() - Duration::hours(1),
            )
            .await
            .unwrap();
        let rows = store.user_matchday_predictions(user.id, 5).await.unwrap();
        assert_eq!((rows[0].points, rows[0].final_result.as_deref()), (0, Some("2-1")));
    }

    #[tokio::test]
    async fn re_adding_a_fixture_keeps_its_result() {
        let (store, _, fixtures) = seeded().await;
        store
            .post_fixture_result(51, FixtureResult::Final(Score::new(3, 0)), kickoff() + Duration::hours(3))
            .await
            .unwrap();

        let mut moved = fixtures[0].clone();
        moved.kickoff_time += Duration::minutes(15);
        let stored = store.add_fixture(moved).await.unwrap();
        assert_eq!(stored.result.as_deref(), Some("3-0"));
        assert_eq!(stored.kickoff_time, kickoff() + Duration::minutes(15));

        let fresh = store.add_fixture(new_fixture(53, 4)).await.unwrap();
        assert_eq!(fresh.result, None);
    }

    #[tokio::test]
    async fn override_survives_reclosing() {
        let (store, user, fixtures) = seeded().await;
        store
            .submit_predictions(
                user.id,
                &[pick(51, "2-1"), pick(52, "0-0")],
                SubmissionRules::default(),
                kickoff() - Duration::hours(1),
            )
            .await
            .unwrap();
        let at = kickoff() + Duration::hours(8);
        let snapshot = ResultsSnapshot {
            entries: vec![snapshot_for(&fixtures[0], 2, 1), snapshot_for(&fixtures[1], 0, 0)],
        };
        store.save_results_snapshot(5, &snapshot, at).await.unwrap();
        store.close_matchday(5, at).await.unwrap();
        assert_eq!(store.leaderboard().await.unwrap()[0].points, 10);

        store
            .post_fixture_result(51, FixtureResult::Final(Score::new(1, 1)), at)
            .await
            .unwrap();
        assert_eq!(store.leaderboard().await.unwrap()[0].points, 5);
        let kept = store.results_snapshot(5).await.unwrap().unwrap();
        assert_eq!(kept.entries, vec![snapshot_for(&fixtures[1], 0, 0)]);

        let summary = store.close_matchday(5, at + Duration::hours(1)).await.unwrap();
        assert_eq!(summary.fixtures_from_snapshot, 1);
        assert_eq!(store.leaderboard().await.unwrap()[0].points, 5);
        let rows = store.user_matchday_predictions(user.id, 5).await.unwrap();
        assert_eq!(rows[0].final_result.as_deref(), Some("1-1"));
    }

    #[tokio::test]
    async fn rejecting_removes_predictions_and_user() {
        let store = MemoryStore::new();
        let pending = store.create_user(new_user("pat", false)).await.unwrap();
        store.install_matchday(5, &[new_fixture(51, 0)], kickoff() - Duration::days(2)).await.unwrap();
        store
            .submit_predictions(pending.id, &[pick(51, "1-0")], SubmissionRules::default(), kickoff() - Duration::days(1))
            .await
            .unwrap();

        assert!(store.remove_user("pat", RemovalScope::PendingOnly).await.unwrap());
        assert!(store.user(pending.id).await.unwrap().is_none());
        assert!(store.matchday_predictions(5).await.unwrap().is_empty());
        assert!(!store.remove_user("pat", RemovalScope::Any).await.unwrap());
    }

    #[tokio::test]
    async fn leaderboard_lists_only_approved_users() {
        let store = MemoryStore::new();
        store.create_user(new_user("zoe", false)).await.unwrap();
        store.create_user(new_user("abe", false)).await.unwrap();
        store.approve_user("abe").await.unwrap();
        let board = store.leaderboard().await.unwrap();
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].username, "abe");
        assert_eq!(board[0].points, 0);
        assert!(matches!(
            store.create_user(new_user("abe", false)).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn awaiting_results_needs_grace_and_no_snapshot() {
        let (store, _, fixtures) = seeded().await;
        let last = fixtures[1].kickoff_time;
        assert_eq!(store.matchday_awaiting_results(last).await.unwrap(), None);
        assert_eq!(
            store.matchday_awaiting_results(last + Duration::minutes(1)).await.unwrap(),
            Some(5)
        );
        store
            .save_results_snapshot(5, &ResultsSnapshot { entries: vec![snapshot_for(&fixtures[0], 0, 0)] }, last)
            .await
            .unwrap();
        assert_eq!(store.matchday_awaiting_results(last + Duration::hours(9)).await.unwrap(), None);
        assert_eq!(store.unscored_snapshot_matchdays().await.unwrap(), vec![5]);
    }

    #[tokio::test]
    async fn reinstall_replaces_old_matchday_data() {
        let (store, user, fixtures) = seeded().await;
        store
            .submit_predictions(user.id, &[pick(51, "2-1"), pick(52, "0-0")], SubmissionRules::default(), kickoff() - Duration::hours(1))
            .await
            .unwrap();
        let at = kickoff() + Duration::hours(8);
        store
            .save_results_snapshot(5, &ResultsSnapshot { entries: vec![snapshot_for(&fixtures[0], 2, 1)] }, at)
            .await
            .unwrap();
        store.close_matchday(5, at).await.unwrap();
        assert_eq!(store.leaderboard().await.unwrap()[0].points, 5);

        store.install_matchday(5, &[new_fixture(51, 200)], at).await.unwrap();
        assert_eq!(store.fixtures_for_matchday(5).await.unwrap().len(), 1);
        assert!(store.results_snapshot(5).await.unwrap().is_none());
        assert!(store.matchday_standings(5).await.unwrap().is_empty());
        assert_eq!(store.leaderboard().await.unwrap()[0].points, 0);
    }

    #[tokio::test]
    async fn reset_season_wipes_everything() {
        let (store, user, _) = seeded().await;
        store
            .submit_predictions(user.id, &[pick(51, "2-1"), pick(52, "0-0")], SubmissionRules::default(), kickoff() - Duration::hours(1))
            .await
            .unwrap();
        store.close_matchday(5, kickoff() + Duration::hours(8)).await.unwrap();
        store.reset_season(kickoff() + Duration::days(1)).await.unwrap();

        assert!(store.all_fixtures().await.unwrap().is_empty());
        assert!(store.matchday_predictions(5).await.unwrap().is_empty());
        let tracker = store.tracker().await.unwrap();
        assert_eq!((tracker.current_matchday, tracker.last_completed_matchday), (0, 0));
        assert!(store.user(user.id).await.unwrap().is_some());
    }
}
