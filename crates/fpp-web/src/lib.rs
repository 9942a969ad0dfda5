//! JSON API over the prediction store: submissions, read-side queries and
//! admin operations.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;
use fpp_core::{
    is_run_in, FixtureId, FixtureResult, LeaderboardView, Matchday, MatchdayFixtures, NewFixture,
    SubmissionError, SubmittedPrediction, UserId, UserMatchdayPerformance,
};
use fpp_storage::{PredictionStore, RemovalScope, SubmitFailure};
use fpp_sync::Pipeline;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info};

pub const CRATE_NAME: &str = "fpp-web";

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }

    fn store(&self) -> &Arc<dyn PredictionStore> {
        self.pipeline.store()
    }
}

#[derive(Debug, Deserialize)]
struct SubmitRequest {
    user_id: Option<UserId>,
    predictions: Option<Vec<SubmittedPrediction>>,
}

#[derive(Debug, Deserialize)]
struct UserQuery {
    user_id: UserId,
}

#[derive(Debug, Deserialize)]
struct ResultRequest {
    fixture_id: FixtureId,
    result: String,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/fixtures/current-matchday", get(current_matchday_handler))
        .route(
            "/api/predictions/submit-matchday-predictions",
            post(submit_predictions_handler),
        )
        .route(
            "/api/predictions/user-matchday-predictions/{user_id}/{matchday}",
            get(user_matchday_predictions_handler),
        )
        .route(
            "/api/predictions/predictions-by-matchday/{matchday}",
            get(matchday_predictions_handler),
        )
        .route("/api/predictions/user/previous-matchday", get(previous_matchday_handler))
        .route("/api/leaderboard", get(leaderboard_handler))
        .route("/api/results/final-round", get(final_round_handler))
        .route("/api/admin/pending-users", get(pending_users_handler))
        .route("/api/admin/approved-users", get(approved_users_handler))
        .route("/api/admin/approve-user/{username}", post(approve_user_handler))
        .route("/api/admin/reject-user/{username}", post(reject_user_handler))
        .route("/api/admin/delete-user/{username}", delete(delete_user_handler))
        .route("/api/admin/results", post(post_result_handler))
        .route("/api/admin/fixtures", get(fixtures_handler).post(add_fixture_handler))
        .route("/api/admin/reset-season", post(reset_season_handler))
        .route("/api/admin/process-latest-matchday", post(process_latest_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "web api listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn current_matchday_handler(State(state): State<Arc<AppState>>) -> Response {
    let tracker = match state.store().tracker().await {
        Ok(tracker) => tracker,
        Err(err) => return server_error(err.into()),
    };
    let matchday = tracker.current_matchday;
    if matchday == 0 {
        return Json(MatchdayFixtures { matchday, fixtures: Vec::new() }).into_response();
    }
    match state.store().fixtures_for_matchday(matchday).await {
        Ok(fixtures) => Json(MatchdayFixtures { matchday, fixtures }).into_response(),
        Err(err) => server_error(err.into()),
    }
}

async fn submit_predictions_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SubmitRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(request)) = body else {
        return rejected(SubmissionError::MissingFields);
    };
    let (Some(user_id), Some(predictions)) = (request.user_id, request.predictions) else {
        return rejected(SubmissionError::MissingFields);
    };
    let rules = state.pipeline.league().submission_rules();
    match state
        .store()
        .submit_predictions(user_id, &predictions, rules, Utc::now())
        .await
    {
        Ok(matchday) => {
            info!(user_id, matchday, count = predictions.len(), "predictions saved");
            (
                StatusCode::CREATED,
                Json(json!({ "message": "Predictions saved", "matchday": matchday })),
            )
                .into_response()
        }
        Err(SubmitFailure::Rejected(err)) => rejected(err),
        Err(SubmitFailure::Store(err)) => server_error(err.into()),
    }
}

async fn user_matchday_predictions_handler(
    State(state): State<Arc<AppState>>,
    Path((user_id, matchday)): Path<(UserId, Matchday)>,
) -> Response {
    let store = state.store();
    let fixtures = match store.user_matchday_predictions(user_id, matchday).await {
        Ok(fixtures) => fixtures,
        Err(err) => return server_error(err.into()),
    };
    match store.matchday_standings(matchday).await {
        Ok(standings) => {
            Json(UserMatchdayPerformance::build(matchday, fixtures, &standings, user_id)).into_response()
        }
        Err(err) => server_error(err.into()),
    }
}

async fn matchday_predictions_handler(
    State(state): State<Arc<AppState>>,
    Path(matchday): Path<Matchday>,
) -> Response {
    match state.store().matchday_predictions(matchday).await {
        Ok(rows) => Json(rows).into_response(),
        Err(err) => server_error(err.into()),
    }
}

/// The user's fixtures, total and rank in the latest scored matchday.
async fn previous_matchday_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UserQuery>,
) -> Response {
    let store = state.store();
    let latest = match store.tracker().await {
        Ok(tracker) => tracker.latest_scored(),
        Err(err) => return server_error(err.into()),
    };
    let Some(matchday) = latest else {
        return Json(UserMatchdayPerformance::empty(None)).into_response();
    };
    let fixtures = match store.user_matchday_predictions(query.user_id, matchday).await {
        Ok(fixtures) => fixtures,
        Err(err) => return server_error(err.into()),
    };
    match store.matchday_standings(matchday).await {
        Ok(standings) => {
            Json(UserMatchdayPerformance::build(matchday, fixtures, &standings, query.user_id))
                .into_response()
        }
        Err(err) => server_error(err.into()),
    }
}

async fn leaderboard_handler(State(state): State<Arc<AppState>>) -> Response {
    let store = state.store();
    let latest = match store.tracker().await {
        Ok(tracker) => tracker.latest_scored(),
        Err(err) => return server_error(err.into()),
    };
    match store.leaderboard().await {
        Ok(leaderboard) => Json(LeaderboardView {
            current_matchday: latest,
            run_in: is_run_in(latest, state.pipeline.league().run_in_matchday),
            leaderboard,
        })
        .into_response(),
        Err(err) => server_error(err.into()),
    }
}

async fn final_round_handler(State(state): State<Arc<AppState>>) -> Response {
    let store = state.store();
    let latest = match store.tracker().await {
        Ok(tracker) => tracker.latest_scored(),
        Err(err) => return server_error(err.into()),
    };
    let Some(matchday) = latest else {
        return Json(json!({ "matchday": null, "standings": [] })).into_response();
    };
    match store.matchday_standings(matchday).await {
        Ok(standings) => Json(json!({ "matchday": matchday, "standings": standings })).into_response(),
        Err(err) => server_error(err.into()),
    }
}

async fn pending_users_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.store().pending_users().await {
        Ok(users) => Json(users).into_response(),
        Err(err) => server_error(err.into()),
    }
}

async fn approved_users_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.store().approved_users().await {
        Ok(users) => Json(users).into_response(),
        Err(err) => server_error(err.into()),
    }
}

async fn approve_user_handler(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
) -> Response {
    match state.store().approve_user(&username).await {
        Ok(true) => {
            info!(%username, "user approved");
            Json(json!({ "message": format!("User {username} approved") })).into_response()
        }
        Ok(false) => not_found("user_not_found", format!("No user named {username}")),
        Err(err) => server_error(err.into()),
    }
}

async fn reject_user_handler(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
) -> Response {
    match state.store().remove_user(&username, RemovalScope::PendingOnly).await {
        Ok(true) => {
            info!(%username, "pending user rejected");
            Json(json!({ "message": format!("User {username} rejected") })).into_response()
        }
        Ok(false) => not_found("user_not_found", format!("No pending user named {username}")),
        Err(err) => server_error(err.into()),
    }
}

async fn delete_user_handler(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
) -> Response {
    match state.store().remove_user(&username, RemovalScope::Any).await {
        Ok(true) => {
            info!(%username, "user deleted");
            Json(json!({ "message": format!("User {username} deleted") })).into_response()
        }
        Ok(false) => not_found("user_not_found", format!("No user named {username}")),
        Err(err) => server_error(err.into()),
    }
}

/// Manual result entry; scores the fixture immediately.
async fn post_result_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ResultRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(request)) = body else {
        return bad_request("missing_fields", "Missing fixture_id or result".to_string());
    };
    let Some(result) = FixtureResult::parse(&request.result) else {
        return bad_request(
            "bad_score_format",
            format!("Result must be H-A or void, got {:?}", request.result),
        );
    };
    match state
        .store()
        .post_fixture_result(request.fixture_id, result, Utc::now())
        .await
    {
        Ok(Some(summary)) => {
            info!(
                fixture_id = summary.fixture_id,
                matchday = summary.matchday,
                predictions = summary.predictions_scored,
                retotalled = summary.matchday_retotalled,
                "fixture result posted"
            );
            Json(summary).into_response()
        }
        Ok(None) => not_found(
            "unknown_fixture",
            format!("No fixture with id {}", request.fixture_id),
        ),
        Err(err) => server_error(err.into()),
    }
}

async fn fixtures_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.store().all_fixtures().await {
        Ok(fixtures) => Json(fixtures).into_response(),
        Err(err) => server_error(err.into()),
    }
}

async fn add_fixture_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<NewFixture>, JsonRejection>,
) -> Response {
    let Ok(Json(fixture)) = body else {
        return bad_request(
            "missing_fields",
            "Fixture needs fixture_id, matchday, home_team, away_team and an RFC 3339 kickoff_time"
                .to_string(),
        );
    };
    let season_length = state.pipeline.league().season_length;
    if !(1..=season_length).contains(&fixture.matchday) {
        return bad_request(
            "invalid_matchday",
            format!("Matchday must be between 1 and {season_length}"),
        );
    }
    if fixture.home_team.trim().is_empty() || fixture.away_team.trim().is_empty() {
        return bad_request("missing_fields", "Team names must not be empty".to_string());
    }
    match state.store().add_fixture(fixture).await {
        Ok(stored) => (StatusCode::CREATED, Json(stored)).into_response(),
        Err(err) => server_error(err.into()),
    }
}

async fn reset_season_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.store().reset_season(Utc::now()).await {
        Ok(()) => {
            info!("season reset");
            Json(json!({ "message": "Season reset" })).into_response()
        }
        Err(err) => server_error(err.into()),
    }
}

async fn process_latest_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.pipeline.reprocess_latest(Utc::now()).await {
        Ok(Some(summary)) => Json(summary).into_response(),
        Ok(None) => Json(json!({ "message": "No matchday has been scored yet" })).into_response(),
        Err(err) => server_error(err),
    }
}

fn rejected(err: SubmissionError) -> Response {
    bad_request(err.code(), err.to_string())
}

fn bad_request(code: &str, message: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": code, "message": message }))).into_response()
}

fn not_found(code: &str, message: String) -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": code, "message": message }))).into_response()
}

fn server_error(err: anyhow::Error) -> Response {
    error!(error = %format!("{err:#}"), "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "internal_error", "message": "Internal server error" })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::{DateTime, Duration};
    use fpp_core::NewUser;
    use fpp_feed::RecordedFeed;
    use fpp_storage::MemoryStore;
    use fpp_sync::LeagueConfig;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct Harness {
        app: Router,
        store: Arc<MemoryStore>,
        _recordings: TempDir,
    }

    fn harness() -> Harness {
        let recordings = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let pipeline = Pipeline::new(
            store.clone(),
            Arc::new(RecordedFeed::new(recordings.path())),
            LeagueConfig::default(),
        );
        Harness {
            app: app(AppState::new(Arc::new(pipeline))),
            store,
            _recordings: recordings,
        }
    }

    fn upcoming() -> DateTime<Utc> {
        Utc::now() + Duration::days(2)
    }

    fn fixture(id: FixtureId, home: &str, away: &str, kickoff: DateTime<Utc>) -> NewFixture {
        NewFixture {
            fixture_id: id,
            matchday: 3,
            home_team: home.to_string(),
            away_team: away.to_string(),
            kickoff_time: kickoff,
        }
    }

    async fn seed_matchday(store: &MemoryStore) {
        let kickoff = upcoming();
        store
            .install_matchday(
                3,
                &[
                    fixture(31, "Arsenal", "Chelsea", kickoff),
                    fixture(32, "Everton", "Fulham", kickoff + Duration::hours(2)),
                ],
                Utc::now(),
            )
            .await
            .unwrap();
    }

    async fn seed_user(store: &MemoryStore, username: &str, approve: bool) -> UserId {
        let user = store
            .create_user(NewUser {
                username: username.to_string(),
                credential_hash: "hash".to_string(),
                full_name: Some(format!("{username} full")),
                team: None,
                is_admin: false,
            })
            .await
            .unwrap();
        if approve {
            store.approve_user(username).await.unwrap();
        }
        user.id
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let resp = app.clone().oneshot(request).await.unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let value = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, value)
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn json_req(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn empty_req(method: &str, uri: &str) -> Request<Body> {
        Request::builder().method(method).uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn current_matchday_lists_installed_fixtures() {
        let h = harness();
        let (status, body) = send(&h.app, get_req("/api/fixtures/current-matchday")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["matchday"], 0);
        assert_eq!(body["fixtures"].as_array().unwrap().len(), 0);

        seed_matchday(&h.store).await;
        let (_, body) = send(&h.app, get_req("/api/fixtures/current-matchday")).await;
        assert_eq!(body["matchday"], 3);
        assert_eq!(body["fixtures"][0]["fixture_id"], 31);
        assert_eq!(body["fixtures"][1]["home_team"], "Everton");
    }

    #[tokio::test]
    async fn submission_contract() {
        let h = harness();
        seed_matchday(&h.store).await;
        let user_id = seed_user(&h.store, "ann", true).await;
        let uri = "/api/predictions/submit-matchday-predictions";

        let (status, body) = send(
            &h.app,
            json_req(
                "POST",
                uri,
                json!({ "user_id": user_id, "predictions": [
                    { "fixture_id": 31, "predicted_result": "2-1" },
                    { "fixture_id": 32, "predicted_result": "0-0" }
                ]}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["matchday"], 3);

        let (status, body) = send(
            &h.app,
            json_req(
                "POST",
                uri,
                json!({ "user_id": user_id, "predictions": [
                    { "fixture_id": 31, "predicted_result": "2:1" },
                    { "fixture_id": 32, "predicted_result": "0-0" }
                ]}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "bad_score_format");

        let (status, body) = send(
            &h.app,
            json_req(
                "POST",
                uri,
                json!({ "user_id": user_id, "predictions": [
                    { "fixture_id": 31, "predicted_result": "1-1" }
                ]}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "incomplete_matchday");

        let (status, body) = send(&h.app, json_req("POST", uri, json!({ "user_id": user_id }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "missing_fields");

        // rejected submissions leave the accepted one in place
        let (status, body) = send(
            &h.app,
            get_req(&format!("/api/predictions/user-matchday-predictions/{user_id}/3")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["fixtures"][0]["predicted_result"], "2-1");
        assert_eq!(body["fixtures"][1]["predicted_result"], "0-0");
        assert_eq!(body["total_points"], 0);
    }

    #[tokio::test]
    async fn scored_matchday_reaches_leaderboard_and_final_round() {
        let h = harness();
        seed_matchday(&h.store).await;
        let ann = seed_user(&h.store, "ann", true).await;
        let bob = seed_user(&h.store, "bob", true).await;
        let predictions = [
            SubmittedPrediction { fixture_id: 31, predicted_result: "2-1".into() },
            SubmittedPrediction { fixture_id: 32, predicted_result: "0-0".into() },
        ];
        h.store
            .submit_predictions(ann, &predictions, Default::default(), Utc::now())
            .await
            .unwrap();

        for (fixture_id, result) in [(31, "2-1"), (32, "1-0")] {
            let (status, body) = send(
                &h.app,
                json_req("POST", "/api/admin/results", json!({ "fixture_id": fixture_id, "result": result })),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["matchday_retotalled"], false);
        }
        h.store.close_matchday(3, Utc::now()).await.unwrap();

        let (_, board) = send(&h.app, get_req("/api/leaderboard")).await;
        assert_eq!(board["current_matchday"], 3);
        assert_eq!(board["run_in"], false);
        assert_eq!(board["leaderboard"][0]["username"], "ann");
        assert_eq!(board["leaderboard"][0]["points"], 5);
        assert_eq!(board["leaderboard"][1]["points"], 0);

        let (_, round) = send(&h.app, get_req("/api/results/final-round")).await;
        assert_eq!(round["matchday"], 3);
        assert_eq!(round["standings"][0]["rank"], 1);
        assert_eq!(round["standings"][1]["username"], "bob");

        let (_, previous) = send(
            &h.app,
            get_req(&format!("/api/predictions/user/previous-matchday?user_id={bob}")),
        )
        .await;
        assert_eq!(previous["matchday"], 3);
        assert_eq!(previous["total_points"], 0);
        assert_eq!(previous["rank"], 2);

        let (_, rows) = send(&h.app, get_req("/api/predictions/predictions-by-matchday/3")).await;
        assert_eq!(rows.as_array().unwrap().len(), 2);

        // an override on a closed matchday retotals it
        let (_, summary) = send(
            &h.app,
            json_req("POST", "/api/admin/results", json!({ "fixture_id": 32, "result": "0-0" })),
        )
        .await;
        assert_eq!(summary["matchday_retotalled"], true);
        let (_, board) = send(&h.app, get_req("/api/leaderboard")).await;
        assert_eq!(board["leaderboard"][0]["points"], 10);

        let (status, summary) = send(&h.app, empty_req("POST", "/api/admin/process-latest-matchday")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(summary["matchday"], 3);
        let (_, board) = send(&h.app, get_req("/api/leaderboard")).await;
        assert_eq!(board["leaderboard"][0]["points"], 10);
    }

    #[tokio::test]
    async fn admin_result_validation() {
        let h = harness();
        seed_matchday(&h.store).await;
        let (status, body) = send(
            &h.app,
            json_req("POST", "/api/admin/results", json!({ "fixture_id": 31, "result": "two-one" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "bad_score_format");

        let (status, _) = send(
            &h.app,
            json_req("POST", "/api/admin/results", json!({ "fixture_id": 99, "result": "void" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn user_approval_flow() {
        let h = harness();
        seed_user(&h.store, "pat", false).await;
        seed_user(&h.store, "sam", true).await;

        let (_, pending) = send(&h.app, get_req("/api/admin/pending-users")).await;
        assert_eq!(pending[0]["username"], "pat");
        assert!(pending[0].get("credential_hash").is_none());

        let (status, _) = send(&h.app, empty_req("POST", "/api/admin/reject-user/sam")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&h.app, empty_req("POST", "/api/admin/approve-user/pat")).await;
        assert_eq!(status, StatusCode::OK);
        let (_, approved) = send(&h.app, get_req("/api/admin/approved-users")).await;
        assert_eq!(approved.as_array().unwrap().len(), 2);

        let (status, _) = send(&h.app, empty_req("DELETE", "/api/admin/delete-user/sam")).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&h.app, empty_req("DELETE", "/api/admin/delete-user/sam")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&h.app, empty_req("POST", "/api/admin/approve-user/nobody")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn fixtures_can_be_added_and_season_reset() {
        let h = harness();
        let (status, body) = send(
            &h.app,
            json_req(
                "POST",
                "/api/admin/fixtures",
                json!({
                    "fixture_id": 11, "matchday": 1, "home_team": "Leeds",
                    "away_team": "Wolves", "kickoff_time": "2025-08-16T14:00:00Z"
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["result"], Value::Null);

        let (status, body) = send(
            &h.app,
            json_req(
                "POST",
                "/api/admin/fixtures",
                json!({
                    "fixture_id": 12, "matchday": 40, "home_team": "Leeds",
                    "away_team": "Wolves", "kickoff_time": "2025-08-16T14:00:00Z"
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_matchday");

        let (_, fixtures) = send(&h.app, get_req("/api/admin/fixtures")).await;
        assert_eq!(fixtures.as_array().unwrap().len(), 1);

        let (status, _) = send(&h.app, empty_req("POST", "/api/admin/reset-season")).await;
        assert_eq!(status, StatusCode::OK);
        let (_, fixtures) = send(&h.app, get_req("/api/admin/fixtures")).await;
        assert!(fixtures.as_array().unwrap().is_empty());
        let (_, body) = send(&h.app, empty_req("POST", "/api/admin/process-latest-matchday")).await;
        assert!(body["message"].is_string());
    }
}
