//! End-to-end account processing against a mocked metadata API.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

use clip_harvester::config::Config;
use clip_harvester::db::{
    count_posts_for_account, get_post, Database, NewPost, PoolSettings, PooledConnection,
    RetryPolicy,
};
use clip_harvester::harvest::{Harvester, StopReason};
use clip_harvester::hiker::{HikerClient, CLIPS_PATH};
use clip_harvester::HarvestError;

async fn setup_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("harvest.sqlite");
    let db = Database::new(&db_path)
        .await
        .expect("Failed to create database");
    (db, temp_dir)
}

fn harvester(server: &MockServer, db: &Database, config: Config) -> Arc<Harvester> {
    let config = Config {
        api_base_url: server.uri(),
        ..config
    };
    let client = HikerClient::new(&config).unwrap();
    Arc::new(Harvester::new(&config, client, db.clone(), None))
}

fn days_ago(days: i64) -> i64 {
    (Utc::now() - TimeDelta::days(days)).timestamp()
}

fn clip(pk: &str, owner: &str, taken_at: i64) -> Value {
    json!({
        "media": {
            "pk": pk,
            "code": format!("C{pk}"),
            "taken_at": taken_at,
            "user": {"pk": owner, "username": format!("user{owner}")},
            "caption": {"text": format!("clip {pk}")},
            "play_count": 100,
            "like_count": 10,
            "video_versions": [{"url": format!("https://origin.example/{pk}.mp4")}],
            "image_versions2": {"candidates": [{"url": format!("https://origin.example/{pk}.jpg")}]}
        }
    })
}

fn page(items: Vec<Value>, next_page_id: Option<&str>) -> Value {
    json!({
        "response": {"items": items},
        "next_page_id": next_page_id
    })
}

async fn mount_page(server: &MockServer, user_id: &str, page_id: Option<&str>, body: Value) {
    let mock = Mock::given(method("GET"))
        .and(path(CLIPS_PATH))
        .and(query_param("user_id", user_id));
    let mock = match page_id {
        Some(page_id) => mock.and(query_param("page_id", page_id)),
        None => mock.and(query_param_is_missing("page_id")),
    };
    mock.respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_stops_on_page_with_old_timestamp() {
    let server = MockServer::start().await;
    let (db, _temp_dir) = setup_db().await;

    mount_page(&server, "1001", None, page(vec![clip("1", "1001", days_ago(1))], Some("p2"))).await;
    mount_page(
        &server,
        "1001",
        Some("p2"),
        page(
            vec![clip("2", "1001", days_ago(5)), clip("3", "1001", days_ago(200))],
            Some("p3"),
        ),
    )
    .await;
    let last = page(vec![clip("4", "1001", days_ago(300))], None);
    mount_page(&server, "1001", Some("p3"), last).await;

    let harvester = harvester(&server, &db, Config::for_testing());
    let report = harvester.process_account("1001").await;

    assert!(report.is_success(), "unexpected error: {:?}", report.error);
    assert_eq!(report.stop, Some(StopReason::FoundOld));
    assert_eq!(report.pages, 2);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);

    // Every post on the stopping page is stored, old ones included.
    assert_eq!(report.written, 3);
    let pool = db.pool();
    assert_eq!(count_posts_for_account(&pool, "1001").await.unwrap(), 3);
    assert!(get_post(&pool, "4").await.unwrap().is_none());

    let stored = get_post(&pool, "1").await.unwrap().unwrap();
    assert_eq!(stored.username.as_deref(), Some("user1001"));
    assert_eq!(stored.play_count, 100);
    assert_eq!(stored.video_url.as_deref(), Some("https://origin.example/1.mp4"));
    assert_eq!(stored.cover_url.as_deref(), Some("https://origin.example/1.jpg"));
    assert_eq!(
        stored.post_url.as_deref(),
        Some("https://www.instagram.com/reel/C1/")
    );
}

#[tokio::test]
async fn test_stops_when_tokens_run_out() {
    let server = MockServer::start().await;
    let (db, _temp_dir) = setup_db().await;

    mount_page(&server, "1001", None, page(vec![clip("1", "1001", days_ago(1))], Some("p2"))).await;
    mount_page(&server, "1001", Some("p2"), page(vec![clip("2", "1001", days_ago(2))], None)).await;

    let report = harvester(&server, &db, Config::for_testing())
        .process_account("1001")
        .await;

    assert_eq!(report.stop, Some(StopReason::Exhausted));
    assert_eq!(report.pages, 2);
    assert_eq!(report.written, 2);
}

#[tokio::test]
async fn test_page_limit_bounds_pagination() {
    let server = MockServer::start().await;
    let (db, _temp_dir) = setup_db().await;

    mount_page(&server, "1001", None, page(vec![clip("1", "1001", days_ago(1))], Some("p2"))).await;
    for (token, pk, next) in [("p2", "2", "p3"), ("p3", "3", "p4")] {
        let body = page(vec![clip(pk, "1001", days_ago(1))], Some(next));
        mount_page(&server, "1001", Some(token), body).await;
    }

    let config = Config {
        max_pages: 2,
        ..Config::for_testing()
    };
    let report = harvester(&server, &db, config).process_account("1001").await;

    assert_eq!(report.stop, Some(StopReason::PageLimit));
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
    assert_eq!(report.written, 2);
}

#[tokio::test]
async fn test_posts_outside_allow_set_are_dropped() {
    let server = MockServer::start().await;
    let (db, _temp_dir) = setup_db().await;

    mount_page(
        &server,
        "1001",
        None,
        page(
            vec![
                clip("1", "1001", days_ago(1)),
                clip("2", "9999", days_ago(1)),
                clip("3", "1001", days_ago(2)),
            ],
            None,
        ),
    )
    .await;

    let report = harvester(&server, &db, Config::for_testing())
        .process_account("1001")
        .await;

    assert_eq!(report.kept, 2);
    assert_eq!(report.dropped, 1);
    let pool = db.pool();
    assert_eq!(count_posts_for_account(&pool, "1001").await.unwrap(), 2);
    assert_eq!(count_posts_for_account(&pool, "9999").await.unwrap(), 0);
}

#[tokio::test]
async fn test_account_outside_allow_set_writes_nothing() {
    let server = MockServer::start().await;
    let (db, _temp_dir) = setup_db().await;

    mount_page(&server, "2002", None, page(vec![clip("1", "2002", days_ago(1))], None)).await;

    let report = harvester(&server, &db, Config::for_testing())
        .process_account("2002")
        .await;

    assert!(report.is_success());
    assert_eq!(report.written, 0);
    assert_eq!(count_posts_for_account(&db.pool(), "2002").await.unwrap(), 0);
}

#[tokio::test]
async fn test_fetch_failure_keeps_earlier_pages() {
    let server = MockServer::start().await;
    let (db, _temp_dir) = setup_db().await;

    mount_page(&server, "1001", None, page(vec![clip("1", "1001", days_ago(1))], Some("p2"))).await;
    Mock::given(method("GET"))
        .and(path(CLIPS_PATH))
        .and(query_param("page_id", "p2"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .mount(&server)
        .await;

    let report = harvester(&server, &db, Config::for_testing())
        .process_account("1001")
        .await;

    assert_eq!(report.stop, Some(StopReason::FetchFailed));
    assert!(report.error.as_deref().unwrap().contains("500"));
    assert_eq!(report.written, 1);
    assert!(get_post(&db.pool(), "1").await.unwrap().is_some());
}

#[tokio::test]
async fn test_failing_account_does_not_affect_others() {
    let server = MockServer::start().await;
    let (db, _temp_dir) = setup_db().await;

    mount_page(&server, "1001", None, page(vec![clip("1", "1001", days_ago(1))], None)).await;
    mount_page(&server, "1002", None, page(vec![clip("2", "1002", days_ago(1))], None)).await;
    Mock::given(method("GET"))
        .and(path(CLIPS_PATH))
        .and(query_param("user_id", "1003"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let config = Config {
        allowed_user_ids: vec!["1001".into(), "1002".into(), "1003".into()],
        ..Config::for_testing()
    };
    let accounts = vec!["1001".to_string(), "1003".to_string(), "1002".to_string()];
    let reports = harvester(&server, &db, config).run_accounts(&accounts).await;

    let order: Vec<&str> = reports.iter().map(|r| r.account.as_str()).collect();
    assert_eq!(order, vec!["1001", "1003", "1002"]);
    assert!(reports[0].is_success());
    assert!(!reports[1].is_success());
    assert!(reports[2].is_success());

    let pool = db.pool();
    assert_eq!(count_posts_for_account(&pool, "1001").await.unwrap(), 1);
    assert_eq!(count_posts_for_account(&pool, "1002").await.unwrap(), 1);
}

#[tokio::test]
async fn test_rerun_updates_counters_in_place() {
    let server = MockServer::start().await;
    let (db, _temp_dir) = setup_db().await;

    let mut updated = clip("1", "1001", days_ago(1));
    updated["media"]["play_count"] = json!(500);

    mount_page(&server, "1001", None, page(vec![clip("1", "1001", days_ago(1))], None)).await;
    let harvester = harvester(&server, &db, Config::for_testing());
    harvester.process_account("1001").await;

    server.reset().await;
    mount_page(&server, "1001", None, page(vec![updated], None)).await;
    harvester.process_account("1001").await;

    let pool = db.pool();
    assert_eq!(count_posts_for_account(&pool, "1001").await.unwrap(), 1);
    assert_eq!(get_post(&pool, "1").await.unwrap().unwrap().play_count, 500);
}

#[tokio::test]
async fn test_audit_dumps_each_page() {
    let server = MockServer::start().await;
    let (db, temp_dir) = setup_db().await;

    mount_page(&server, "1001", None, page(vec![clip("1", "1001", days_ago(1))], Some("p2"))).await;
    mount_page(&server, "1001", Some("p2"), page(vec![], None)).await;

    let audit_dir = temp_dir.path().join("audit");
    let config = Config {
        audit_dir: Some(audit_dir.clone()),
        ..Config::for_testing()
    };
    harvester(&server, &db, config).process_account("1001").await;

    let dumps = std::fs::read_dir(audit_dir.join("1001")).unwrap().count();
    assert_eq!(dumps, 2);
}

/// Database whose writers give up on a held lock quickly, with a retry
/// budget of three attempts 200ms apart.
async fn setup_contended_db(temp_dir: &TempDir) -> Database {
    let settings = PoolSettings {
        path: temp_dir.path().join("contended.sqlite"),
        max_connections: 3,
        min_connections: 0,
        acquire_timeout: Duration::from_secs(1),
        busy_timeout: Duration::from_millis(50),
        retry: RetryPolicy {
            attempts: 3,
            delay: Duration::from_millis(200),
        },
    };
    Database::with_settings(settings)
        .await
        .expect("Failed to create database")
}

/// Take the database write lock on a separate connection.
async fn hold_write_lock(db: &Database) -> PooledConnection {
    let mut conn = db.acquire().await.unwrap();
    sqlx::query("BEGIN IMMEDIATE")
        .execute(&mut *conn)
        .await
        .unwrap();
    conn
}

async fn release_write_lock(mut conn: PooledConnection) {
    sqlx::query("ROLLBACK").execute(&mut *conn).await.unwrap();
    conn.release();
}

fn new_post(post_id: &str) -> NewPost {
    NewPost {
        post_id: post_id.to_string(),
        user_id: "1001".to_string(),
        username: None,
        caption: None,
        play_count: 1,
        comment_count: 0,
        like_count: 0,
        save_count: 0,
        share_count: 0,
        video_url: None,
        cover_url: None,
        post_url: None,
        taken_at: None,
    }
}

#[tokio::test]
async fn test_locked_write_succeeds_after_retry() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    let db = setup_contended_db(&temp_dir).await;

    mount_page(&server, "1001", None, page(vec![clip("1", "1001", days_ago(1))], None)).await;

    // The first attempt hits the lock; it is gone before the second.
    let locker = hold_write_lock(&db).await;
    let unlock = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        release_write_lock(locker).await;
    });

    let report = harvester(&server, &db, Config::for_testing())
        .process_account("1001")
        .await;
    unlock.await.unwrap();

    assert!(report.is_success(), "unexpected error: {:?}", report.error);
    assert_eq!(report.written, 1);
    assert!(get_post(&db.pool(), "1").await.unwrap().is_some());
}

#[tokio::test]
async fn test_locked_write_exhausts_retries() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    let db = setup_contended_db(&temp_dir).await;

    mount_page(&server, "1001", None, page(vec![clip("1", "1001", days_ago(1))], None)).await;
    let harvester = harvester(&server, &db, Config::for_testing());
    let locker = hold_write_lock(&db).await;

    let err = harvester.flush(&[new_post("9")]).await.unwrap_err();
    assert!(
        matches!(err, HarvestError::TransientDb { attempts: 3, .. }),
        "unexpected error: {err:?}"
    );

    let report = harvester.process_account("1001").await;
    assert!(!report.is_success());
    assert!(report
        .error
        .as_deref()
        .unwrap()
        .contains("after 3 attempts"));
    assert_eq!(report.written, 0);

    release_write_lock(locker).await;
    let pool = db.pool();
    assert!(get_post(&pool, "9").await.unwrap().is_none());
    assert_eq!(count_posts_for_account(&pool, "1001").await.unwrap(), 0);
}
