use super::*;
use chrono::{Duration, TimeZone};

fn at(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + seconds, 0)
        .single()
        .expect("timestamp")
}

async fn memory_storage() -> Storage {
    Storage::new("sqlite::memory:").await.expect("db")
}

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let storage = memory_storage().await;
    storage.health_check().await.expect("health check");
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("nested").join("capture.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let storage = Storage::new(&database_url).await.expect("db");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );
}

#[tokio::test]
async fn session_ids_are_unique_and_round_trip() {
    let storage = memory_storage().await;
    let first = storage
        .create_session(&NewSession {
            name: "trial1".to_string(),
            start_time: at(0),
        })
        .await
        .expect("first");
    let second = storage
        .create_session(&NewSession {
            name: "trial2".to_string(),
            start_time: at(60),
        })
        .await
        .expect("second");
    assert_ne!(first, second);

    let loaded = storage
        .get_session_by_id(first)
        .await
        .expect("load")
        .expect("session exists");
    assert_eq!(loaded.name, "trial1");
    assert_eq!(loaded.start_time, at(0));
    assert_eq!(loaded.end_time, None);
    assert!(!loaded.is_ended());

    assert!(storage
        .get_session_by_id(SessionId(9_999))
        .await
        .expect("load")
        .is_none());
}

#[tokio::test]
async fn end_session_sets_end_time_exactly_once() {
    let storage = memory_storage().await;
    let id = storage
        .create_session(&NewSession {
            name: "trial1".to_string(),
            start_time: at(0),
        })
        .await
        .expect("create");

    storage.end_session(id, at(30)).await.expect("end");
    let err = storage
        .end_session(id, at(90))
        .await
        .expect_err("second end must fail");
    assert!(err.to_string().contains("already ended"), "{err}");

    let loaded = storage
        .get_session_by_id(id)
        .await
        .expect("load")
        .expect("exists");
    assert_eq!(loaded.end_time, Some(at(30)));
}

#[tokio::test]
async fn end_session_rejects_unknown_id() {
    let storage = memory_storage().await;
    storage
        .end_session(SessionId(42), at(0))
        .await
        .expect_err("unknown session");
}

#[tokio::test]
async fn lists_sessions_newest_first() {
    let storage = memory_storage().await;
    for (name, offset) in [("old", 0), ("newest", 120), ("middle", 60)] {
        storage
            .create_session(&NewSession {
                name: name.to_string(),
                start_time: at(offset),
            })
            .await
            .expect("create");
    }

    let names: Vec<String> = storage
        .get_all_sessions()
        .await
        .expect("list")
        .into_iter()
        .map(|s| s.name)
        .collect();
    assert_eq!(names, vec!["newest", "middle", "old"]);
}

#[tokio::test]
async fn stores_files_per_session_in_creation_order() {
    let storage = memory_storage().await;
    let session = storage
        .create_session(&NewSession {
            name: "trial1".to_string(),
            start_time: at(0),
        })
        .await
        .expect("create");
    let other = storage
        .create_session(&NewSession {
            name: "trial2".to_string(),
            start_time: at(0),
        })
        .await
        .expect("create");

    for (path, kind, offset) in [
        ("trial1/b.jpg", FileKind::Jpg, 2),
        ("trial1/a.bmp", FileKind::Bmp, 1),
        ("trial1/cloud.json", FileKind::PointCloud, 3),
    ] {
        storage
            .insert_session_file(&NewSessionFile {
                session_id: session,
                file_path: path.to_string(),
                file_type: kind,
                created_at: at(offset),
            })
            .await
            .expect("insert file");
    }
    storage
        .insert_session_file(&NewSessionFile {
            session_id: other,
            file_path: "trial2/x.jpg".to_string(),
            file_type: FileKind::Jpg,
            created_at: at(0),
        })
        .await
        .expect("insert other");

    let files = storage.get_files_for_session(session).await.expect("files");
    let paths: Vec<&str> = files.iter().map(|f| f.file_path.as_str()).collect();
    assert_eq!(paths, vec!["trial1/a.bmp", "trial1/b.jpg", "trial1/cloud.json"]);
    assert_eq!(files[2].file_type, FileKind::PointCloud);
    assert!(files.iter().all(|f| f.session_id == session));
}

#[tokio::test]
async fn session_file_requires_existing_session() {
    let storage = memory_storage().await;
    storage
        .insert_session_file(&NewSessionFile {
            session_id: SessionId(77),
            file_path: "ghost/a.jpg".to_string(),
            file_type: FileKind::Jpg,
            created_at: at(0),
        })
        .await
        .expect_err("foreign key must reject orphan file");
}

#[tokio::test]
async fn sensor_readings_keep_absent_session_distinct() {
    let storage = memory_storage().await;
    let session = storage
        .create_session(&NewSession {
            name: "trial1".to_string(),
            start_time: at(0),
        })
        .await
        .expect("create");

    storage
        .insert_sensor_reading(&NewSensorReading {
            session_id: None,
            ekg: 65.0,
            pressure: 110.0,
            timestamp: at(0),
        })
        .await
        .expect("idle reading");
    let in_session = storage
        .insert_sensor_reading(&NewSensorReading {
            session_id: Some(session),
            ekg: 70.0,
            pressure: 120.0,
            timestamp: at(0) + Duration::seconds(1),
        })
        .await
        .expect("session reading");

    let scoped = storage
        .get_sensor_readings_for_session(session)
        .await
        .expect("scoped");
    assert_eq!(scoped.len(), 1);
    assert_eq!(scoped[0].id, in_session);
    assert_eq!(scoped[0].ekg, 70.0);

    let all = storage.get_all_sensor_readings().await.expect("all");
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].session_id, None);
    assert_eq!(all[1].session_id, Some(session));
}

#[test]
fn sqlite_path_ignores_memory_and_foreign_urls() {
    assert_eq!(sqlite_path("sqlite::memory:"), None);
    assert_eq!(sqlite_path("postgres://db/capture"), None);
    assert_eq!(
        sqlite_path("sqlite://./data/capture.db?mode=rwc"),
        Some(PathBuf::from("./data/capture.db"))
    );
}
