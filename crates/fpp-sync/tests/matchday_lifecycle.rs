use std::sync::Arc;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use fpp_core::{FixtureResult, NewFixture, NewUser, Score, SubmittedPrediction};
use fpp_feed::RecordedFeed;
use fpp_storage::{MemoryStore, PredictionStore};
use fpp_sync::{IngestOutcome, LeagueConfig, Pipeline};
use tempfile::tempdir;

fn kickoff() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 10, 4, 14, 0, 0).single().unwrap()
}

fn feed_day() -> String {
    feed_payload(&[
        ("2025-10-04T14:00:00.000Z", "Liverpool", "2", "Chelsea", "1"),
        ("2025-10-04T16:00:00.000Z", "Aston Villa", "1", "Burnley", "0"),
    ])
}

fn feed_payload(events: &[(&str, &str, &str, &str, &str)]) -> String {
    let events: Vec<String> = events
        .iter()
        .map(|(start, home, hs, away, aws)| {
            format!(
                r#"{{"status":"PostEvent","startDateTime":"{start}","home":{{"fullName":"{home}","runningScores":{{"fulltime":"{hs}"}}}},"away":{{"fullName":"{away}","runningScores":{{"fulltime":"{aws}"}}}}}}"#
            )
        })
        .collect();
    format!(
        r#"{{"eventGroups":[{{"displayLabel":"Premier League","secondaryGroups":[{{"events":[{}]}}]}}]}}"#,
        events.join(",")
    )
}

fn pick(fixture_id: i64, score: &str) -> SubmittedPrediction {
    SubmittedPrediction {
        fixture_id,
        predicted_result: score.to_string(),
    }
}

async fn user(store: &MemoryStore, username: &str) -> i64 {
    let created = store
        .create_user(NewUser {
            username: username.to_string(),
            credential_hash: "x".to_string(),
            full_name: None,
            team: None,
            is_admin: false,
        })
        .await
        .unwrap();
    store.approve_user(username).await.unwrap();
    created.id
}

#[tokio::test]
async fn submission_to_leaderboard() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("2025-10-04.json"), feed_day()).unwrap();

    let store = Arc::new(MemoryStore::new());
    let pipeline = Pipeline::new(
        store.clone(),
        Arc::new(RecordedFeed::new(dir.path())),
        LeagueConfig::default(),
    );
    let rules = pipeline.league().submission_rules();

    let fixtures = vec![
        NewFixture {
            fixture_id: 51,
            matchday: 5,
            home_team: "Liverpool".into(),
            away_team: "Chelsea".into(),
            kickoff_time: kickoff(),
        },
        NewFixture {
            fixture_id: 52,
            matchday: 5,
            home_team: "Aston Villa".into(),
            away_team: "Burnley".into(),
            kickoff_time: kickoff() + TimeDelta::hours(2),
        },
    ];
    store
        .install_matchday(5, &fixtures, kickoff() - TimeDelta::days(4))
        .await
        .unwrap();

    let uma = user(&store, "uma").await;
    let bob = user(&store, "bob").await;

    let matchday = store
        .submit_predictions(
            uma,
            &[pick(51, "2-1"), pick(52, "0-0")],
            rules,
            kickoff() - TimeDelta::hours(1),
        )
        .await
        .unwrap();
    assert_eq!(matchday, 5);

    let ingest_at = kickoff() + TimeDelta::hours(7);
    assert_eq!(
        pipeline.run_results_ingestion(ingest_at).await.unwrap(),
        IngestOutcome::Stored { matchday: 5, matched: 2, fixtures: 2 }
    );

    let outcome = pipeline.run_aggregation(ingest_at).await.unwrap();
    assert_eq!(outcome.closed.len(), 1);
    assert!(outcome.failed.is_empty());

    let standings = store.matchday_standings(5).await.unwrap();
    let uma_row = standings.iter().find(|s| s.user_id == uma).unwrap();
    let bob_row = standings.iter().find(|s| s.user_id == bob).unwrap();
    assert_eq!((uma_row.points, uma_row.rank), (5, 1));
    assert_eq!((bob_row.points, bob_row.rank), (0, 2));

    let board = store.leaderboard().await.unwrap();
    assert_eq!(board[0].username, "uma");
    assert_eq!(board[0].points, 5);
    assert_eq!(board[0].current_matchday, Some(5));

    let picks = store.user_matchday_predictions(uma, 5).await.unwrap();
    assert_eq!(picks[0].final_result.as_deref(), Some("2-1"));
    assert_eq!(picks[0].points, 5);
    assert_eq!(picks[1].final_result.as_deref(), Some("1-0"));
    assert_eq!(picks[1].points, 0);

    // nothing left to aggregate; an explicit re-run changes nothing
    assert!(pipeline.run_aggregation(ingest_at).await.unwrap().closed.is_empty());
    pipeline.reprocess_latest(ingest_at).await.unwrap().unwrap();
    assert_eq!(store.leaderboard().await.unwrap(), board);
    assert_eq!(store.matchday_standings(5).await.unwrap(), standings);

    // a manual correction flows through to the totals
    store
        .post_fixture_result(52, FixtureResult::Final(Score::new(0, 0)), ingest_at)
        .await
        .unwrap();
    assert_eq!(store.leaderboard().await.unwrap()[0].points, 10);
}
