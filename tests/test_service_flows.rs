//! Ingestion and dashboard flows through `AnalyticsService`
//!
//! Runs against SQLite in a temp dir as well as the memory fallback.

use chainscope::aggregates::fixed_clock;
use chainscope::dashboard::{DashboardPeriod, PageActivity};
use chainscope::service::{StartSessionPayload, TrackEventPayload};
use chainscope::store::PersistenceGateway;
use chainscope::types::EventType;
use chainscope::AnalyticsService;
use chrono::{TimeZone, Utc};
use std::sync::Arc;
use tempfile::tempdir;

fn noon() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 20, 12, 0, 0).unwrap()
}

#[tokio::test]
async fn test_durable_state_survives_reopen() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("nested").join("analytics.db");

    {
        let gateway = Arc::new(PersistenceGateway::from_config(true, &db_path));
        assert_eq!(gateway.durable_backend_type(), Some("sqlite"));
        let service = AnalyticsService::with_clock(gateway, 20, fixed_clock(noon()));

        service
            .start_session(StartSessionPayload {
                wallet_address: Some("0xFeed".to_string()),
                entry_page: Some("/".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        let mut click = TrackEventPayload::new(EventType::ButtonClick);
        click.wallet_address = Some("0xfeed".to_string());
        service.track_ui_event(click).await.unwrap();
    }

    let gateway = Arc::new(PersistenceGateway::from_config(true, &db_path));
    let service = AnalyticsService::with_clock(gateway.clone(), 20, fixed_clock(noon()));
    let user = service.users().get_by_wallet("0xFEED").await.unwrap().unwrap();
    assert_eq!(user.total_sessions, 1);
    assert_eq!(user.total_interactions, 1);
    assert_eq!(gateway.fallback_count(), 0);
}

#[tokio::test]
async fn test_unopenable_store_degrades_to_memory() {
    let gateway = Arc::new(PersistenceGateway::from_config(true, "/proc/chainscope/analytics.db"));
    assert_eq!(gateway.durable_backend_type(), None);

    let service = AnalyticsService::new(gateway, 20);
    let session = service.start_session(StartSessionPayload::default()).await.unwrap();
    assert!(service.sessions().get_session(&session.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_realtime_top_pages() {
    let service = AnalyticsService::with_clock(
        Arc::new(PersistenceGateway::memory_only()),
        20,
        fixed_clock(noon()),
    );

    for page in ["/home", "/home", "/profile"] {
        let session = service.start_session(StartSessionPayload::default()).await.unwrap();
        let mut view = TrackEventPayload::new(EventType::PageView);
        view.session_id = Some(session.id.clone());
        view.url = Some(page.to_string());
        service.track_ui_event(view).await.unwrap();
    }

    let realtime = service.get_realtime_analytics().await.unwrap();
    assert_eq!(realtime.active_sessions, 3);
    assert_eq!(realtime.events_in_last_hour, 3);
    assert_eq!(
        realtime.top_current_pages,
        vec![
            PageActivity {
                url: "/home".to_string(),
                users: 2
            },
            PageActivity {
                url: "/profile".to_string(),
                users: 1
            },
        ]
    );
}

#[tokio::test]
async fn test_dashboard_stats_after_snapshot() {
    let dir = tempdir().unwrap();
    let gateway = Arc::new(PersistenceGateway::from_config(true, dir.path().join("a.db")));
    let service = AnalyticsService::with_clock(gateway, 20, fixed_clock(noon()));

    let session = service
        .start_session(StartSessionPayload {
            wallet_address: Some("0xaa".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    service.end_session(&session.id, Some("/bye")).await.unwrap();

    let today = service.snapshots().today();
    let first = service.snapshots().create_daily_snapshot(today).await.unwrap();
    let second = service.snapshots().create_daily_snapshot(today).await.unwrap();
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );

    let stats = service.get_dashboard_stats(DashboardPeriod::Week).await.unwrap();
    assert_eq!(stats.snapshots.len(), 1);
    assert_eq!(stats.totals.sessions, 1);
    assert_eq!(stats.active_users, 1);
    assert_eq!(stats.end_date, today);
}
