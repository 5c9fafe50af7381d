use axum::body::Body;
use axum::http::{Request, StatusCode};
use referral_ledger::api::{create_router, AppState};
use referral_ledger::config::Config;
use referral_ledger::datasource::{MockVaultReader, VaultReader};
use referral_ledger::db::{init_db, Repository};
use referral_ledger::domain::{Address, Decimal, DepositEvent, EventPosition, ReferralCode};
use referral_ledger::orchestration::Pipeline;
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

async fn setup() -> (TempDir, Arc<Repository>, axum::Router) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("api.db").to_string_lossy().to_string();
    let pool = init_db(&db_path).await.unwrap();
    let repo = Arc::new(Repository::new(pool));

    let env = HashMap::from([
        ("DATABASE_PATH".to_string(), db_path),
        ("RPC_URL".to_string(), "http://localhost:0".to_string()),
        ("NETWORK".to_string(), "sepolia".to_string()),
        (
            "REFERRERS_FILE".to_string(),
            temp_dir.path().join("referrers.json").to_string_lossy().to_string(),
        ),
    ]);
    let config = Config::from_env_map(env).unwrap();
    let reader: Arc<dyn VaultReader> = Arc::new(
        MockVaultReader::new()
            .with_block(1, 1_000, 1_000)
            .with_block(2, 1_100, 1_000),
    );
    let pipeline = Arc::new(Pipeline::new(repo.clone(), reader, config));
    let app = create_router(AppState::new(repo.clone(), pipeline));
    (temp_dir, repo, app)
}

async fn send(app: &axum::Router, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn deposit(block: i64, assets: i64) -> DepositEvent {
    let owner = Address::parse("0xabc").unwrap();
    DepositEvent {
        position: EventPosition::new(block, 0, 0),
        timestamp: 1_700_000_000 + block,
        sender: owner.clone(),
        owner,
        assets: Decimal::from_i64(assets),
        shares: Decimal::from_i64(assets),
        referral_code: ReferralCode::new("9EFE5"),
    }
}

#[tokio::test]
async fn test_health_and_ready() {
    let (_dir, _repo, app) = setup().await;

    let (status, body) = send(&app, "GET", "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = send(&app, "GET", "/ready").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
}

#[tokio::test]
async fn test_trigger_endpoints_run_the_pipeline() {
    let (dir, repo, app) = setup().await;
    std::fs::write(
        dir.path().join("referrers.json"),
        r#"[{"referral_code":"9EFE5","percentage":1000}]"#,
    )
    .unwrap();
    repo.insert_deposits(&[deposit(1, 100), deposit(2, 50)])
        .await
        .unwrap();

    let (status, body) = send(&app, "POST", "/v1/referrers/import").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["inserted"], 1);

    let (status, body) = send(&app, "POST", "/v1/sync/ledger").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["events_processed"], 2);
    assert_eq!(body["entries_written"], 2);

    let (status, body) = send(&app, "POST", "/v1/sync/commissions").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["exchangeRates"]["samples_written"], 2);
    assert_eq!(body["commissions"]["commissions_written"], 1);

    let (status, body) = send(&app, "GET", "/v1/commissions?referralCode=9EFE5").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalCommission"], "0.15");
    assert_eq!(body["commissions"].as_array().unwrap().len(), 1);
    assert_eq!(body["commissions"][0]["isPaid"], false);

    // Nothing new upstream.
    let (status, body) = send(&app, "POST", "/v1/sync/ledger").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["entries_written"], 0);
    let (_, body) = send(&app, "POST", "/v1/sync/exchange-rates").await;
    assert_eq!(body["samples_written"], 0);
}

#[tokio::test]
async fn test_export_writes_referrers_file() {
    let (dir, repo, app) = setup().await;
    repo.upsert_referrers(&[referral_ledger::domain::Referrer {
        referral_code: ReferralCode::new("ABC").unwrap(),
        percentage_bps: 250,
    }])
    .await
    .unwrap();

    let (status, body) = send(&app, "POST", "/v1/referrers/export").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["exported"], 1);

    let raw = std::fs::read_to_string(dir.path().join("referrers.json")).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(parsed[0]["referral_code"], "ABC");
    assert_eq!(parsed[0]["percentage"], 250);
}

#[tokio::test]
async fn test_import_errors_map_to_status_codes() {
    let (dir, _repo, app) = setup().await;
    let path = dir.path().join("referrers.json");

    std::fs::write(&path, r#"[{"referral_code":"A","percentage":10001}]"#).unwrap();
    let (status, body) = send(&app, "POST", "/v1/referrers/import").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("10001"));

    std::fs::write(&path, r#"[{"referral_code":"A","percentage":100}]"#).unwrap();
    send(&app, "POST", "/v1/referrers/import").await;
    std::fs::write(&path, r#"[{"referral_code":"A","percentage":200}]"#).unwrap();
    let (status, _) = send(&app, "POST", "/v1/referrers/import").await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_blank_referral_code_query_is_rejected() {
    let (_dir, _repo, app) = setup().await;
    let (status, body) = send(&app, "GET", "/v1/commissions?referralCode=%20").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, body) = send(&app, "GET", "/v1/commissions").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalCommission"], "0");
}

#[tokio::test]
async fn test_unknown_referral_code_is_not_found() {
    let (_dir, repo, app) = setup().await;
    let (status, body) = send(&app, "GET", "/v1/commissions?referralCode=NOPE").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("NOPE"));

    repo.upsert_referrers(&[referral_ledger::domain::Referrer {
        referral_code: ReferralCode::new("NOPE").unwrap(),
        percentage_bps: 100,
    }])
    .await
    .unwrap();
    let (status, body) = send(&app, "GET", "/v1/commissions?referralCode=NOPE").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalCommission"], "0");
}
