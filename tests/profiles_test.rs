use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use clip_harvester::config::Config;
use clip_harvester::db::{get_profile, Database};
use clip_harvester::hiker::{HikerClient, PROFILE_PATH};
use clip_harvester::profiles::refresh_profiles;

#[tokio::test]
async fn test_refresh_profiles_isolates_failures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(PROFILE_PATH))
        .and(query_param("id", "1001"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "pk": "1001",
            "username": "fuel",
            "full_name": "Fuel Club",
            "media_count": 40,
            "follower_count": 1200,
            "following_count": 3
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(PROFILE_PATH))
        .and(query_param("id", "1002"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let db = Database::new(&temp_dir.path().join("profiles.sqlite"))
        .await
        .unwrap();
    let config = Config {
        api_base_url: server.uri(),
        ..Config::for_testing()
    };
    let client = HikerClient::new(&config).unwrap();

    let failed = refresh_profiles(&client, &db, &["1001".to_string(), "1002".to_string()]).await;
    assert_eq!(failed, vec!["1002".to_string()]);

    let stored = get_profile(&db.pool(), "1001").await.unwrap().unwrap();
    assert_eq!(stored.username.as_deref(), Some("fuel"));
    assert_eq!(stored.follower_count, Some(1200));
    assert!(get_profile(&db.pool(), "1002").await.unwrap().is_none());
}
