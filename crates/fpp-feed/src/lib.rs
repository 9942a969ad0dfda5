//! Results-feed adapter: HTTP fetching with retry, payload schema and fixture matching.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use fpp_core::{Fixture, FullTimeScore, Score, SnapshotEntry, SnapshotScore};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "fpp-feed";

pub const DEFAULT_FEED_BASE_URL: &str =
    "https://web-cdn.api.bbci.co.uk/wc-poll-data/container/sport-data-scores-fixtures";
pub const DEFAULT_FEED_URN: &str = "urn:bbc:sportsdata:football:tournament-collection:collated";

const FINISHED_STATUSES: [&str; 2] = ["Result", "PostEvent"];

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("invalid feed url: {0}")]
    InvalidUrl(String),
    #[error("decoding feed payload from {origin}: {source}")]
    Decode {
        origin: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("reading recording {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let shift = u32::try_from(attempt_index).unwrap_or(u32::MAX);
        let factor = 1u32.checked_shl(shift).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Thin reqwest wrapper: per-request timeout plus bounded retries.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            backoff: config.backoff,
        })
    }

    pub async fn get_bytes(&self, url: reqwest::Url) -> Result<Vec<u8>, FeedError> {
        let mut attempt = 0;
        loop {
            let retry = match self.client.get(url.clone()).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(resp.bytes().await?.to_vec());
                    }
                    if classify_status(status) == RetryDisposition::NonRetryable
                        || attempt >= self.backoff.max_retries
                    {
                        return Err(FeedError::HttpStatus {
                            status: status.as_u16(),
                            url: resp.url().to_string(),
                        });
                    }
                    format!("status {status}")
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::NonRetryable
                        || attempt >= self.backoff.max_retries
                    {
                        return Err(FeedError::Request(err));
                    }
                    err.to_string()
                }
            };
            let delay = self.backoff.delay_for_attempt(attempt);
            debug!(attempt, ?delay, reason = %retry, "retrying feed request");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct FeedPayload {
    event_groups: Vec<EventGroup>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct EventGroup {
    display_label: Option<String>,
    secondary_groups: Vec<SecondaryGroup>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SecondaryGroup {
    events: Vec<JsonValue>,
}

/// Full-time goals arrive as either `"2"` or `2`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawGoals {
    Number(u64),
    Text(String),
}

impl RawGoals {
    pub fn goals(&self) -> Option<u16> {
        match self {
            Self::Number(n) => u16::try_from(*n).ok(),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunningScores {
    pub fulltime: Option<RawGoals>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub full_name: String,
    #[serde(default)]
    pub running_scores: RunningScores,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedEvent {
    #[serde(default)]
    pub status: Option<String>,
    pub start_date_time: String,
    pub home: Participant,
    pub away: Participant,
    /// Label of the event group the event was listed under.
    #[serde(skip)]
    pub competition: Option<String>,
}

impl FeedEvent {
    pub fn is_finished(&self) -> bool {
        self.status
            .as_deref()
            .is_some_and(|s| FINISHED_STATUSES.contains(&s))
    }

    pub fn fulltime_score(&self) -> Option<Score> {
        let home = self.home.running_scores.fulltime.as_ref()?.goals()?;
        let away = self.away.running_scores.fulltime.as_ref()?.goals()?;
        Some(Score::new(home, away))
    }

    pub fn kickoff(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.start_date_time)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Same teams (case-insensitive) on the fixture's kickoff date.
    pub fn matches_fixture(&self, fixture: &Fixture) -> bool {
        let date = fixture.kickoff_time.format("%Y-%m-%d").to_string();
        self.home.full_name.to_lowercase() == fixture.home_team.to_lowercase()
            && self.away.full_name.to_lowercase() == fixture.away_team.to_lowercase()
            && self.start_date_time.get(..10) == Some(date.as_str())
    }
}

/// Flattens a feed response into events. Events that fail to decode are
/// skipped one by one; a payload that is not JSON at all is an error.
pub fn parse_feed_payload(body: &[u8], origin: &str) -> Result<Vec<FeedEvent>, FeedError> {
    let payload: FeedPayload = serde_json::from_slice(body).map_err(|source| FeedError::Decode {
        origin: origin.to_string(),
        source,
    })?;

    let mut events = Vec::new();
    for group in payload.event_groups {
        for secondary in group.secondary_groups {
            for raw in secondary.events {
                match serde_json::from_value::<FeedEvent>(raw) {
                    Ok(mut event) => {
                        event.competition = group.display_label.clone();
                        events.push(event);
                    }
                    Err(err) => warn!(origin, error = %err, "skipping malformed feed event"),
                }
            }
        }
    }
    Ok(events)
}

/// Snapshot entry for the first finished event matching the fixture.
pub fn snapshot_entry_for(fixture: &Fixture, events: &[FeedEvent]) -> Option<SnapshotEntry> {
    events
        .iter()
        .filter(|e| e.is_finished() && e.matches_fixture(fixture))
        .find_map(|e| e.fulltime_score())
        .map(|score| SnapshotEntry {
            fixture_id: Some(fixture.fixture_id),
            home: fixture.home_team.clone(),
            away: fixture.away_team.clone(),
            kickoff: fixture.kickoff_time,
            score: SnapshotScore {
                fulltime: FullTimeScore {
                    home: score.home,
                    away: score.away,
                },
            },
        })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedFixture {
    pub home: String,
    pub away: String,
    pub kickoff: DateTime<Utc>,
}

/// Picks up to `target` fixtures of one competition, marquee-team fixtures first.
pub fn select_priority_fixtures(
    events: &[FeedEvent],
    competition_label: &str,
    marquee: &[String],
    target: usize,
) -> Vec<FeedFixture> {
    let (top, others): (Vec<FeedFixture>, Vec<FeedFixture>) = events
        .iter()
        .filter(|e| e.competition.as_deref() == Some(competition_label))
        .filter_map(|e| {
            e.kickoff().map(|kickoff| FeedFixture {
                home: e.home.full_name.clone(),
                away: e.away.full_name.clone(),
                kickoff,
            })
        })
        .partition(|f| marquee.contains(&f.home) || marquee.contains(&f.away));

    let mut selected: Vec<FeedFixture> = top.into_iter().take(target).collect();
    let missing = target.saturating_sub(selected.len());
    selected.extend(others.into_iter().take(missing));
    selected
}

// ---------------------------------------------------------------------------
// Adapters
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ResultsFeed: Send + Sync {
    fn name(&self) -> &'static str;

    /// All events the feed lists for one calendar day.
    async fn events_for_date(&self, run_id: Uuid, date: NaiveDate) -> Result<Vec<FeedEvent>, FeedError>;
}

#[derive(Debug, Clone)]
pub struct HttpResultsFeed {
    http: HttpFetcher,
    base_url: String,
    urn: String,
}

impl HttpResultsFeed {
    pub fn new(http: HttpFetcher, base_url: impl Into<String>, urn: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            urn: urn.into(),
        }
    }

    pub fn day_url(&self, date: NaiveDate, today: NaiveDate) -> Result<reqwest::Url, FeedError> {
        let day = date.format("%Y-%m-%d").to_string();
        let today = today.format("%Y-%m-%d").to_string();
        reqwest::Url::parse_with_params(
            &self.base_url,
            [
                ("selectedStartDate", day.as_str()),
                ("selectedEndDate", day.as_str()),
                ("todayDate", today.as_str()),
                ("urn", self.urn.as_str()),
            ],
        )
        .map_err(|err| FeedError::InvalidUrl(format!("{}: {err}", self.base_url)))
    }
}

#[async_trait]
impl ResultsFeed for HttpResultsFeed {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn events_for_date(&self, run_id: Uuid, date: NaiveDate) -> Result<Vec<FeedEvent>, FeedError> {
        let url = self.day_url(date, Utc::now().date_naive())?;
        let span = info_span!("http_fetch", %run_id, %date, url = %url);
        async {
            let body = self.http.get_bytes(url.clone()).await?;
            parse_feed_payload(&body, url.as_str())
        }
        .instrument(span)
        .await
    }
}

/// Replays captured responses stored as `<dir>/YYYY-MM-DD.json`. A missing
/// file means the feed listed nothing that day.
#[derive(Debug, Clone)]
pub struct RecordedFeed {
    dir: PathBuf,
}

impl RecordedFeed {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.json", date.format("%Y-%m-%d")))
    }
}

#[async_trait]
impl ResultsFeed for RecordedFeed {
    fn name(&self) -> &'static str {
        "recorded"
    }

    async fn events_for_date(&self, run_id: Uuid, date: NaiveDate) -> Result<Vec<FeedEvent>, FeedError> {
        let path = self.path_for(date);
        match tokio::fs::read(&path).await {
            Ok(body) => parse_feed_payload(&body, &path.display().to_string()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(%run_id, %date, "no recording for date");
                Ok(Vec::new())
            }
            Err(source) => Err(FeedError::Io {
                path: path.display().to_string(),
                source,
            }),
        }
    }
}
