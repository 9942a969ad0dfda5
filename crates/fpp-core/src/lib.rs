//! Core domain model, scoring rules and matchday math for the prediction platform.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "fpp-core";

pub type UserId = i64;
pub type FixtureId = i64;
pub type Matchday = i32;

pub const SEASON_LENGTH: Matchday = 38;
pub const FIXTURES_PER_MATCHDAY: usize = 6;
pub const SUBMISSION_CUTOFF_MINUTES: i64 = 30;
pub const RESULTS_GRACE_HOURS: i64 = 4;
pub const INTAKE_COOLDOWN_HOURS: i64 = 14;
pub const RUN_IN_MATCHDAY: Matchday = 30;

pub const EXACT_SCORE_POINTS: i32 = 5;
pub const CORRECT_OUTCOME_POINTS: i32 = 2;

/// Stored in `fixtures.result` for a match that was closed without a usable score.
pub const VOID_RESULT: &str = "void";

static PREDICTED_SCORE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,2}-\d{1,2}$").expect("static score pattern"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    #[serde(skip_serializing)]
    pub credential_hash: String,
    pub full_name: Option<String>,
    pub team: Option<String>,
    pub is_approved: bool,
    pub is_admin: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub credential_hash: String,
    pub full_name: Option<String>,
    pub team: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fixture {
    pub fixture_id: FixtureId,
    pub matchday: Matchday,
    pub home_team: String,
    pub away_team: String,
    pub kickoff_time: DateTime<Utc>,
    pub result: Option<String>,
}

impl Fixture {
    pub fn submission_deadline(&self, cutoff: Duration) -> DateTime<Utc> {
        self.kickoff_time - cutoff
    }

    /// Parsed stored result; `None` when unset or not a recognised value.
    pub fn parsed_result(&self) -> Option<FixtureResult> {
        self.result.as_deref().and_then(FixtureResult::parse)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFixture {
    pub fixture_id: FixtureId,
    pub matchday: Matchday,
    pub home_team: String,
    pub away_team: String,
    pub kickoff_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchdayTracker {
    pub current_matchday: Matchday,
    pub last_completed_matchday: Matchday,
    pub last_updated: Option<DateTime<Utc>>,
}

impl Default for MatchdayTracker {
    fn default() -> Self {
        Self {
            current_matchday: 0,
            last_completed_matchday: 0,
            last_updated: None,
        }
    }
}

impl MatchdayTracker {
    pub fn latest_scored(&self) -> Option<Matchday> {
        (self.last_completed_matchday > 0).then_some(self.last_completed_matchday)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prediction {
    pub id: i64,
    pub user_id: UserId,
    pub fixture_id: FixtureId,
    pub predicted_result: String,
    pub points_awarded: i32,
    pub final_result: Option<String>,
}

/// Next matchday number for intake, wrapping after the last matchday of the season.
pub fn next_matchday(current: Matchday, season_length: Matchday) -> Matchday {
    let next = current + 1;
    if next > season_length || next < 1 {
        1
    } else {
        next
    }
}

pub fn is_run_in(latest_scored: Option<Matchday>, threshold: Matchday) -> bool {
    latest_scored.is_some_and(|md| md >= threshold)
}

// ---------------------------------------------------------------------------
// Scores and scoring
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Score {
    pub home: u16,
    pub away: u16,
}

impl Score {
    pub fn new(home: u16, away: u16) -> Self {
        Self { home, away }
    }

    /// Home-side outcome: `Greater` is a home win, `Equal` a draw.
    pub fn outcome(&self) -> Ordering {
        self.home.cmp(&self.away)
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.home, self.away)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("not a score: {0:?}")]
pub struct ScoreParseError(pub String);

impl FromStr for Score {
    type Err = ScoreParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ScoreParseError(s.to_string());
        let (home, away) = s.trim().split_once('-').ok_or_else(err)?;
        let home = home.trim();
        let away = away.trim();
        if home.is_empty()
            || away.is_empty()
            || !home.bytes().all(|b| b.is_ascii_digit())
            || !away.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(err());
        }
        Ok(Score {
            home: home.parse().map_err(|_| err())?,
            away: away.parse().map_err(|_| err())?,
        })
    }
}

/// Submission-format check: one or two digits per side.
pub fn is_valid_predicted_score(value: &str) -> bool {
    PREDICTED_SCORE_RE.is_match(value)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FixtureResult {
    Final(Score),
    Void,
}

impl FixtureResult {
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.eq_ignore_ascii_case(VOID_RESULT) {
            return Some(Self::Void);
        }
        value.parse().ok().map(Self::Final)
    }

    pub fn as_stored(&self) -> String {
        match self {
            Self::Final(score) => score.to_string(),
            Self::Void => VOID_RESULT.to_string(),
        }
    }
}

/// Points for one prediction. Missing, malformed or voided inputs score zero.
pub fn score_prediction(predicted: Option<&str>, actual: &FixtureResult) -> i32 {
    let FixtureResult::Final(actual) = actual else {
        return 0;
    };
    let Some(predicted) = predicted.and_then(|p| p.parse::<Score>().ok()) else {
        return 0;
    };
    if predicted == *actual {
        EXACT_SCORE_POINTS
    } else if predicted.outcome() == actual.outcome() {
        CORRECT_OUTCOME_POINTS
    } else {
        0
    }
}

/// Points for every `(prediction_id, predicted_result)` on a fixture.
pub fn score_fixture_predictions(
    actual: &FixtureResult,
    predictions: &[(i64, Option<String>)],
) -> Vec<(i64, i32)> {
    predictions
        .iter()
        .map(|(id, predicted)| (*id, score_prediction(predicted.as_deref(), actual)))
        .collect()
}

// ---------------------------------------------------------------------------
// Submission validation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedPrediction {
    pub fixture_id: FixtureId,
    pub predicted_result: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmissionError {
    #[error("Missing user_id or predictions")]
    MissingFields,
    #[error("Duplicate fixture_id {0}")]
    DuplicateFixture(FixtureId),
    #[error("Invalid score format for fixture {0}")]
    BadScoreFormat(FixtureId),
    #[error("Invalid user_id")]
    UnknownUser,
    #[error("Unknown fixture_id(s): {0:?}")]
    UnknownFixture(Vec<FixtureId>),
    #[error("All predictions must be for one matchday")]
    MixedMatchdays,
    #[error("Must submit ALL fixtures in matchday {matchday} (missing {missing:?})")]
    IncompleteMatchday {
        matchday: Matchday,
        missing: Vec<FixtureId>,
    },
    #[error("Submission closed for fixture {0}")]
    WindowClosed(FixtureId),
}

impl SubmissionError {
    /// Stable machine-readable reason.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingFields => "missing_fields",
            Self::DuplicateFixture(_) => "duplicate_fixture",
            Self::BadScoreFormat(_) => "bad_score_format",
            Self::UnknownUser => "unknown_user",
            Self::UnknownFixture(_) => "unknown_fixture",
            Self::MixedMatchdays => "mixed_matchdays",
            Self::IncompleteMatchday { .. } => "incomplete_matchday",
            Self::WindowClosed(_) => "window_closed",
        }
    }
}

/// Submission rules, applied in three passes so a store can run the
/// fixture-dependent checks inside the transaction that writes the rows.
#[derive(Debug, Clone, Copy)]
pub struct SubmissionRules {
    pub cutoff: Duration,
}

impl Default for SubmissionRules {
    fn default() -> Self {
        Self {
            cutoff: Duration::minutes(SUBMISSION_CUTOFF_MINUTES),
        }
    }
}

impl SubmissionRules {
    pub fn new(cutoff: Duration) -> Self {
        Self { cutoff }
    }

    /// Checks that need no stored state.
    pub fn check_entries(&self, entries: &[SubmittedPrediction]) -> Result<(), SubmissionError> {
        if entries.is_empty() {
            return Err(SubmissionError::MissingFields);
        }
        let mut seen = HashSet::with_capacity(entries.len());
        for entry in entries {
            if !seen.insert(entry.fixture_id) {
                return Err(SubmissionError::DuplicateFixture(entry.fixture_id));
            }
        }
        for entry in entries {
            if !is_valid_predicted_score(&entry.predicted_result) {
                return Err(SubmissionError::BadScoreFormat(entry.fixture_id));
            }
        }
        Ok(())
    }

    /// Infers the matchday from the fixtures the entries name.
    pub fn resolve_matchday(
        &self,
        entries: &[SubmittedPrediction],
        named: &[Fixture],
    ) -> Result<Matchday, SubmissionError> {
        let by_id: HashMap<FixtureId, &Fixture> =
            named.iter().map(|f| (f.fixture_id, f)).collect();
        let unknown: Vec<FixtureId> = entries
            .iter()
            .map(|e| e.fixture_id)
            .filter(|id| !by_id.contains_key(id))
            .collect();
        if !unknown.is_empty() {
            return Err(SubmissionError::UnknownFixture(unknown));
        }

        let mut matchdays = entries.iter().filter_map(|e| by_id.get(&e.fixture_id)).map(|f| f.matchday);
        let first = matchdays.next().ok_or(SubmissionError::MissingFields)?;
        if matchdays.any(|md| md != first) {
            return Err(SubmissionError::MixedMatchdays);
        }
        Ok(first)
    }

    /// Completeness and deadline checks against every fixture of the matchday.
    pub fn check_matchday(
        &self,
        matchday: Matchday,
        entries: &[SubmittedPrediction],
        matchday_fixtures: &[Fixture],
        now: DateTime<Utc>,
    ) -> Result<(), SubmissionError> {
        let named: HashSet<FixtureId> = entries.iter().map(|e| e.fixture_id).collect();
        let mut missing: Vec<FixtureId> = matchday_fixtures
            .iter()
            .map(|f| f.fixture_id)
            .filter(|id| !named.contains(id))
            .collect();
        if !missing.is_empty() {
            missing.sort_unstable();
            return Err(SubmissionError::IncompleteMatchday { matchday, missing });
        }

        let kickoff_by_id: HashMap<FixtureId, &Fixture> =
            matchday_fixtures.iter().map(|f| (f.fixture_id, f)).collect();
        for entry in entries {
            let open = kickoff_by_id
                .get(&entry.fixture_id)
                .is_some_and(|f| now < f.submission_deadline(self.cutoff));
            if !open {
                return Err(SubmissionError::WindowClosed(entry.fixture_id));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Results snapshots
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullTimeScore {
    pub home: u16,
    pub away: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotScore {
    pub fulltime: FullTimeScore,
}

/// One matched feed result, self-contained so scoring never needs the feed again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    #[serde(default)]
    pub fixture_id: Option<FixtureId>,
    pub home: String,
    pub away: String,
    pub kickoff: DateTime<Utc>,
    pub score: SnapshotScore,
}

impl SnapshotEntry {
    pub fn final_score(&self) -> Score {
        Score::new(self.score.fulltime.home, self.score.fulltime.away)
    }

    pub fn matches(&self, fixture: &Fixture) -> bool {
        self.kickoff == fixture.kickoff_time
            && self.home.to_lowercase() == fixture.home_team.to_lowercase()
            && self.away.to_lowercase() == fixture.away_team.to_lowercase()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultsSnapshot {
    pub entries: Vec<SnapshotEntry>,
}

impl ResultsSnapshot {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops the entries describing `fixture`; returns whether any were removed.
    pub fn forget_fixture(&mut self, fixture: &Fixture) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| !e.matches(fixture));
        self.entries.len() != before
    }

    pub fn human_readable(&self) -> String {
        self.entries
            .iter()
            .map(|e| {
                format!(
                    "{} {} - {} {}",
                    e.home, e.score.fulltime.home, e.score.fulltime.away, e.away
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResolutionSource {
    Snapshot,
    Existing,
    Voided,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResolvedFixture {
    pub fixture_id: FixtureId,
    pub result: FixtureResult,
    pub source: ResolutionSource,
}

/// Final result of every fixture of a matchday being closed: snapshot matches
/// win, a previously stored score is kept, everything else is voided.
pub fn resolve_matchday_results(
    fixtures: &[Fixture],
    snapshot: &ResultsSnapshot,
) -> Vec<ResolvedFixture> {
    fixtures
        .iter()
        .map(|fixture| {
            if let Some(entry) = snapshot.entries.iter().find(|e| e.matches(fixture)) {
                return ResolvedFixture {
                    fixture_id: fixture.fixture_id,
                    result: FixtureResult::Final(entry.final_score()),
                    source: ResolutionSource::Snapshot,
                };
            }
            match fixture.parsed_result() {
                Some(FixtureResult::Final(score)) => ResolvedFixture {
                    fixture_id: fixture.fixture_id,
                    result: FixtureResult::Final(score),
                    source: ResolutionSource::Existing,
                },
                _ => ResolvedFixture {
                    fixture_id: fixture.fixture_id,
                    result: FixtureResult::Void,
                    source: ResolutionSource::Voided,
                },
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Aggregation and ranking
// ---------------------------------------------------------------------------

/// Per-user matchday totals. Every participant gets a row, even with no points.
pub fn matchday_totals(
    participants: impl IntoIterator<Item = UserId>,
    scored: impl IntoIterator<Item = (UserId, i32)>,
) -> BTreeMap<UserId, i32> {
    let mut totals: BTreeMap<UserId, i32> = participants.into_iter().map(|u| (u, 0)).collect();
    for (user_id, points) in scored {
        *totals.entry(user_id).or_default() += points;
    }
    totals
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ranked<K> {
    pub key: K,
    pub points: i32,
    pub rank: u32,
}

/// Standard competition ranking ("1224"): ties share a rank and the next
/// distinct score skips ahead. Ties keep the order of `tiebreak`.
pub fn competition_rank<K: Clone, T: Ord>(
    rows: &[(K, i32)],
    tiebreak: impl Fn(&K) -> T,
) -> Vec<Ranked<K>> {
    let mut sorted: Vec<&(K, i32)> = rows.iter().collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| tiebreak(&a.0).cmp(&tiebreak(&b.0))));

    let mut out: Vec<Ranked<K>> = Vec::with_capacity(sorted.len());
    for (idx, (key, points)) in sorted.into_iter().enumerate() {
        let rank = match out.last() {
            Some(prev) if prev.points == *points => prev.rank,
            _ => u32::try_from(idx + 1).unwrap_or(u32::MAX),
        };
        out.push(Ranked {
            key: key.clone(),
            points: *points,
            rank,
        });
    }
    out
}

// ---------------------------------------------------------------------------
// Read models
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardRow {
    pub user_id: UserId,
    pub username: String,
    pub full_name: Option<String>,
    pub team: Option<String>,
    pub points: i32,
    pub current_matchday: Option<Matchday>,
    pub last_updated: Option<DateTime<Utc>>,
}

pub fn sort_leaderboard(rows: &mut [LeaderboardRow]) {
    rows.sort_by(|a, b| b.points.cmp(&a.points).then_with(|| a.username.cmp(&b.username)));
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardView {
    pub current_matchday: Option<Matchday>,
    pub run_in: bool,
    pub leaderboard: Vec<LeaderboardRow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchdayStanding {
    pub matchday: Matchday,
    pub user_id: UserId,
    pub username: String,
    pub full_name: Option<String>,
    pub points: i32,
    pub rank: u32,
}

/// Ranks the stored totals of one matchday.
pub fn rank_standings(
    matchday: Matchday,
    totals: Vec<(UserId, String, Option<String>, i32)>,
) -> Vec<MatchdayStanding> {
    let rows: Vec<((UserId, String, Option<String>), i32)> = totals
        .into_iter()
        .map(|(id, username, full_name, points)| ((id, username, full_name), points))
        .collect();
    competition_rank(&rows, |(_, username, _)| username.clone())
        .into_iter()
        .map(|r| MatchdayStanding {
            matchday,
            user_id: r.key.0,
            username: r.key.1,
            full_name: r.key.2,
            points: r.points,
            rank: r.rank,
        })
        .collect()
}

/// A fixture joined with one user's prediction on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FixturePrediction {
    pub fixture_id: FixtureId,
    pub home_team: String,
    pub away_team: String,
    pub kickoff_time: DateTime<Utc>,
    pub predicted_result: Option<String>,
    pub final_result: Option<String>,
    pub points: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserMatchdayPerformance {
    pub matchday: Option<Matchday>,
    pub fixtures: Vec<FixturePrediction>,
    pub total_points: i32,
    pub rank: Option<u32>,
}

impl UserMatchdayPerformance {
    pub fn empty(matchday: Option<Matchday>) -> Self {
        Self {
            matchday,
            fixtures: Vec::new(),
            total_points: 0,
            rank: None,
        }
    }

    pub fn build(
        matchday: Matchday,
        fixtures: Vec<FixturePrediction>,
        standings: &[MatchdayStanding],
        user_id: UserId,
    ) -> Self {
        let total_points = fixtures.iter().map(|f| f.points).sum();
        let rank = standings.iter().find(|s| s.user_id == user_id).map(|s| s.rank);
        Self {
            matchday: Some(matchday),
            fixtures,
            total_points,
            rank,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchdayPredictionRow {
    pub username: String,
    pub fixture_id: FixtureId,
    pub home_team: String,
    pub away_team: String,
    pub predicted_result: String,
    pub points: i32,
    pub final_result: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchdayFixtures {
    pub matchday: Matchday,
    pub fixtures: Vec<Fixture>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AggregateSummary {
    pub matchday: Matchday,
    pub fixtures_from_snapshot: usize,
    pub fixtures_voided: usize,
    pub predictions_scored: usize,
    pub users_totalled: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FixtureScoreSummary {
    pub fixture_id: FixtureId,
    pub matchday: Matchday,
    pub predictions_scored: usize,
    pub matchday_retotalled: bool,
}
