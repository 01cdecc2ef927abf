use serde_json::json;
use tempfile::NamedTempFile;

use super::DatabaseManager;
use super::models::{Guest, Hotel, NewGuest, NewHotel};
use crate::config::DatabaseConfig;

/// Migrated SQLite database in a temp file; keep the file handle alive for
/// the duration of the test.
pub(crate) async fn sqlite_manager() -> (DatabaseManager, NamedTempFile) {
    let file = NamedTempFile::new().expect("temp sqlite file");
    let config = DatabaseConfig {
        url: None,
        filename: Some(file.path().to_string_lossy().to_string()),
        max_connections: Some(1),
        min_connections: Some(1),
    };
    let manager = DatabaseManager::new(&config).await.expect("db manager");
    manager.migrate().await.expect("migrate");
    (manager, file)
}

pub(crate) fn new_hotel(number: &str, instance: &str) -> NewHotel {
    NewHotel {
        name: format!("Hotel {number}"),
        whatsapp_number: number.to_string(),
        green_api_instance_id: Some(instance.to_string()),
        green_api_token: Some("token".to_string()),
        settings: json!({ "timezone": "UTC" }),
    }
}

pub(crate) async fn seed_hotel(db: &DatabaseManager, number: &str, instance: &str) -> Hotel {
    db.hotel_store()
        .create_hotel(&new_hotel(number, instance))
        .await
        .expect("seed hotel")
}

pub(crate) async fn seed_guest(db: &DatabaseManager, hotel_id: i64, phone: &str) -> Guest {
    db.guest_store()
        .create_guest(
            hotel_id,
            &NewGuest::from_phone(phone, Some(format!("Guest {phone}"))),
        )
        .await
        .expect("seed guest")
}
