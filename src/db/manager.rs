use std::sync::Arc;

use crate::config::{DatabaseConfig, DbType};
use crate::db::stores::{
    ConversationStore, GuestStore, HotelStore, NotificationStore, SqlConversationStore,
    SqlGuestStore, SqlHotelStore, SqlNotificationStore, SqlTriggerStore, TriggerStore,
};
use crate::db::DatabaseError;

use diesel::r2d2::{self, ConnectionManager};
use diesel::RunQueryDsl;
#[cfg(feature = "sqlite")]
use diesel::connection::SimpleConnection;

#[cfg(feature = "postgres")]
use diesel::pg::PgConnection;
#[cfg(feature = "sqlite")]
use diesel::sqlite::SqliteConnection;

#[cfg(feature = "postgres")]
pub type PgPool = r2d2::Pool<ConnectionManager<PgConnection>>;
#[cfg(feature = "sqlite")]
pub type SqlitePool = r2d2::Pool<ConnectionManager<SqliteConnection>>;

#[derive(Clone)]
pub enum DbPool {
    #[cfg(feature = "postgres")]
    Postgres(PgPool),
    #[cfg(feature = "sqlite")]
    Sqlite(SqlitePool),
}

/// Runs a blocking diesel operation on a pooled connection off the async
/// runtime. The body is compiled once per enabled backend, with `$conn`
/// bound to that backend's connection.
macro_rules! with_connection {
    ($pool:expr, |$conn:ident| $body:expr) => {{
        let pool = $pool.clone();
        tokio::task::spawn_blocking(move || -> Result<_, $crate::db::DatabaseError> {
            match pool {
                #[cfg(feature = "postgres")]
                $crate::db::DbPool::Postgres(pool) => {
                    let mut pooled = pool
                        .get()
                        .map_err(|e| $crate::db::DatabaseError::Connection(e.to_string()))?;
                    let $conn = &mut *pooled;
                    $body
                }
                #[cfg(feature = "sqlite")]
                $crate::db::DbPool::Sqlite(pool) => {
                    let mut pooled = pool
                        .get()
                        .map_err(|e| $crate::db::DatabaseError::Connection(e.to_string()))?;
                    let $conn = &mut *pooled;
                    $body
                }
            }
        })
        .await
        .map_err(|e| $crate::db::DatabaseError::Query(format!("database task failed: {e}")))?
    }};
}

#[cfg(feature = "sqlite")]
#[derive(Debug)]
struct SqliteConnectionCustomizer;

#[cfg(feature = "sqlite")]
impl r2d2::CustomizeConnection<SqliteConnection, r2d2::Error> for SqliteConnectionCustomizer {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), r2d2::Error> {
        conn.batch_execute("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")
            .map_err(r2d2::Error::QueryError)
    }
}

#[derive(Clone)]
pub struct DatabaseManager {
    pool: DbPool,
    hotel_store: Arc<dyn HotelStore>,
    guest_store: Arc<dyn GuestStore>,
    conversation_store: Arc<dyn ConversationStore>,
    trigger_store: Arc<dyn TriggerStore>,
    notification_store: Arc<dyn NotificationStore>,
    db_type: DbType,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let db_type = config.db_type();
        let max_connections = config.max_connections();
        let min_connections = config.min_connections();

        let pool = match db_type {
            #[cfg(feature = "postgres")]
            DbType::Postgres => {
                let manager = ConnectionManager::<PgConnection>::new(config.connection_string());
                let pool = r2d2::Pool::builder()
                    .max_size(max_connections)
                    .min_idle(Some(min_connections))
                    .build(manager)
                    .map_err(|e| DatabaseError::Connection(e.to_string()))?;
                DbPool::Postgres(pool)
            }
            #[cfg(feature = "sqlite")]
            DbType::Sqlite => {
                let path = config
                    .sqlite_path()
                    .ok_or_else(|| DatabaseError::Connection("missing sqlite path".to_string()))?;
                let manager = ConnectionManager::<SqliteConnection>::new(path);
                let pool = r2d2::Pool::builder()
                    .max_size(max_connections)
                    .min_idle(Some(min_connections))
                    .connection_customizer(Box::new(SqliteConnectionCustomizer))
                    .build(manager)
                    .map_err(|e| DatabaseError::Connection(e.to_string()))?;
                DbPool::Sqlite(pool)
            }
            #[cfg(not(feature = "postgres"))]
            DbType::Postgres => {
                return Err(DatabaseError::Connection(
                    "PostgreSQL feature not enabled".to_string(),
                ));
            }
            #[cfg(not(feature = "sqlite"))]
            DbType::Sqlite => {
                return Err(DatabaseError::Connection(
                    "SQLite feature not enabled".to_string(),
                ));
            }
        };

        Ok(Self {
            hotel_store: Arc::new(SqlHotelStore::new(pool.clone())),
            guest_store: Arc::new(SqlGuestStore::new(pool.clone())),
            conversation_store: Arc::new(SqlConversationStore::new(pool.clone())),
            trigger_store: Arc::new(SqlTriggerStore::new(pool.clone())),
            notification_store: Arc::new(SqlNotificationStore::new(pool.clone())),
            pool,
            db_type,
        })
    }

    pub async fn migrate(&self) -> Result<(), DatabaseError> {
        let statements: &'static [&'static str] = match self.db_type {
            DbType::Postgres => POSTGRES_MIGRATIONS,
            DbType::Sqlite => SQLITE_MIGRATIONS,
        };

        with_connection!(self.pool, |conn| {
            for statement in statements {
                diesel::sql_query(*statement)
                    .execute(conn)
                    .map_err(|e| DatabaseError::Migration(e.to_string()))?;
            }
            Ok(())
        })
    }

    /// Cheap round trip used by the readiness probe.
    pub async fn ping(&self) -> Result<(), DatabaseError> {
        with_connection!(self.pool, |conn| {
            diesel::sql_query("SELECT 1").execute(conn)?;
            Ok(())
        })
    }

    pub fn hotel_store(&self) -> Arc<dyn HotelStore> {
        self.hotel_store.clone()
    }

    pub fn guest_store(&self) -> Arc<dyn GuestStore> {
        self.guest_store.clone()
    }

    pub fn conversation_store(&self) -> Arc<dyn ConversationStore> {
        self.conversation_store.clone()
    }

    pub fn trigger_store(&self) -> Arc<dyn TriggerStore> {
        self.trigger_store.clone()
    }

    pub fn notification_store(&self) -> Arc<dyn NotificationStore> {
        self.notification_store.clone()
    }

    pub fn db_type(&self) -> DbType {
        self.db_type
    }
}

const POSTGRES_MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS hotels (
        id BIGSERIAL PRIMARY KEY,
        name TEXT NOT NULL,
        whatsapp_number TEXT NOT NULL UNIQUE,
        green_api_instance_id TEXT,
        green_api_token TEXT,
        settings TEXT NOT NULL DEFAULT '{}',
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        created_at TIMESTAMP NOT NULL DEFAULT (NOW() AT TIME ZONE 'utc'),
        updated_at TIMESTAMP NOT NULL DEFAULT (NOW() AT TIME ZONE 'utc')
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS guests (
        id BIGSERIAL PRIMARY KEY,
        hotel_id BIGINT NOT NULL REFERENCES hotels(id) ON DELETE CASCADE,
        phone_number TEXT NOT NULL,
        name TEXT,
        check_in_date TIMESTAMP,
        check_out_date TIMESTAMP,
        room_number TEXT,
        preferences TEXT NOT NULL DEFAULT '{}',
        last_interaction_at TIMESTAMP,
        created_at TIMESTAMP NOT NULL DEFAULT (NOW() AT TIME ZONE 'utc'),
        updated_at TIMESTAMP NOT NULL DEFAULT (NOW() AT TIME ZONE 'utc'),
        UNIQUE (hotel_id, phone_number)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS conversations (
        id BIGSERIAL PRIMARY KEY,
        hotel_id BIGINT NOT NULL REFERENCES hotels(id) ON DELETE CASCADE,
        guest_id BIGINT NOT NULL REFERENCES guests(id) ON DELETE CASCADE,
        message_id TEXT UNIQUE,
        direction TEXT NOT NULL,
        content TEXT NOT NULL,
        sentiment_score DOUBLE PRECISION,
        sentiment_label TEXT,
        requires_attention BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TIMESTAMP NOT NULL DEFAULT (NOW() AT TIME ZONE 'utc')
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS triggers (
        id BIGSERIAL PRIMARY KEY,
        hotel_id BIGINT NOT NULL REFERENCES hotels(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        trigger_type TEXT NOT NULL,
        conditions TEXT NOT NULL DEFAULT '{}',
        message_template TEXT NOT NULL,
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        priority INTEGER NOT NULL DEFAULT 0,
        created_at TIMESTAMP NOT NULL DEFAULT (NOW() AT TIME ZONE 'utc'),
        updated_at TIMESTAMP NOT NULL DEFAULT (NOW() AT TIME ZONE 'utc')
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS trigger_executions (
        id BIGSERIAL PRIMARY KEY,
        hotel_id BIGINT NOT NULL REFERENCES hotels(id) ON DELETE CASCADE,
        trigger_id BIGINT NOT NULL REFERENCES triggers(id) ON DELETE CASCADE,
        guest_id BIGINT NOT NULL REFERENCES guests(id) ON DELETE CASCADE,
        executed_at TIMESTAMP NOT NULL DEFAULT (NOW() AT TIME ZONE 'utc'),
        UNIQUE (trigger_id, guest_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS staff_notifications (
        id BIGSERIAL PRIMARY KEY,
        hotel_id BIGINT NOT NULL REFERENCES hotels(id) ON DELETE CASCADE,
        guest_id BIGINT REFERENCES guests(id) ON DELETE SET NULL,
        conversation_id BIGINT REFERENCES conversations(id) ON DELETE SET NULL,
        notification_type TEXT NOT NULL,
        message TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        acknowledged_at TIMESTAMP,
        created_at TIMESTAMP NOT NULL DEFAULT (NOW() AT TIME ZONE 'utc'),
        updated_at TIMESTAMP NOT NULL DEFAULT (NOW() AT TIME ZONE 'utc')
    )
    "#,
    "DROP INDEX IF EXISTS idx_hotels_instance",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_hotels_instance_unique ON hotels(green_api_instance_id) WHERE green_api_instance_id IS NOT NULL",
    "CREATE INDEX IF NOT EXISTS idx_guests_hotel ON guests(hotel_id)",
    "CREATE INDEX IF NOT EXISTS idx_conversations_guest ON conversations(hotel_id, guest_id)",
    "CREATE INDEX IF NOT EXISTS idx_conversations_attention ON conversations(hotel_id, requires_attention)",
    "CREATE INDEX IF NOT EXISTS idx_triggers_hotel ON triggers(hotel_id, trigger_type)",
    "CREATE INDEX IF NOT EXISTS idx_staff_notifications_hotel ON staff_notifications(hotel_id, status)",
];

const SQLITE_MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS hotels (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        whatsapp_number TEXT NOT NULL UNIQUE,
        green_api_instance_id TEXT,
        green_api_token TEXT,
        settings TEXT NOT NULL DEFAULT '{}',
        is_active BOOLEAN NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL DEFAULT (datetime('now')),
        updated_at TEXT NOT NULL DEFAULT (datetime('now'))
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS guests (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        hotel_id INTEGER NOT NULL REFERENCES hotels(id) ON DELETE CASCADE,
        phone_number TEXT NOT NULL,
        name TEXT,
        check_in_date TEXT,
        check_out_date TEXT,
        room_number TEXT,
        preferences TEXT NOT NULL DEFAULT '{}',
        last_interaction_at TEXT,
        created_at TEXT NOT NULL DEFAULT (datetime('now')),
        updated_at TEXT NOT NULL DEFAULT (datetime('now')),
        UNIQUE (hotel_id, phone_number)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS conversations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        hotel_id INTEGER NOT NULL REFERENCES hotels(id) ON DELETE CASCADE,
        guest_id INTEGER NOT NULL REFERENCES guests(id) ON DELETE CASCADE,
        message_id TEXT UNIQUE,
        direction TEXT NOT NULL,
        content TEXT NOT NULL,
        sentiment_score REAL,
        sentiment_label TEXT,
        requires_attention BOOLEAN NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS triggers (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        hotel_id INTEGER NOT NULL REFERENCES hotels(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        trigger_type TEXT NOT NULL,
        conditions TEXT NOT NULL DEFAULT '{}',
        message_template TEXT NOT NULL,
        is_active BOOLEAN NOT NULL DEFAULT 1,
        priority INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL DEFAULT (datetime('now')),
        updated_at TEXT NOT NULL DEFAULT (datetime('now'))
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS trigger_executions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        hotel_id INTEGER NOT NULL REFERENCES hotels(id) ON DELETE CASCADE,
        trigger_id INTEGER NOT NULL REFERENCES triggers(id) ON DELETE CASCADE,
        guest_id INTEGER NOT NULL REFERENCES guests(id) ON DELETE CASCADE,
        executed_at TEXT NOT NULL DEFAULT (datetime('now')),
        UNIQUE (trigger_id, guest_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS staff_notifications (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        hotel_id INTEGER NOT NULL REFERENCES hotels(id) ON DELETE CASCADE,
        guest_id INTEGER REFERENCES guests(id) ON DELETE SET NULL,
        conversation_id INTEGER REFERENCES conversations(id) ON DELETE SET NULL,
        notification_type TEXT NOT NULL,
        message TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        acknowledged_at TEXT,
        created_at TEXT NOT NULL DEFAULT (datetime('now')),
        updated_at TEXT NOT NULL DEFAULT (datetime('now'))
    )
    "#,
    "DROP INDEX IF EXISTS idx_hotels_instance",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_hotels_instance_unique ON hotels(green_api_instance_id) WHERE green_api_instance_id IS NOT NULL",
    "CREATE INDEX IF NOT EXISTS idx_guests_hotel ON guests(hotel_id)",
    "CREATE INDEX IF NOT EXISTS idx_conversations_guest ON conversations(hotel_id, guest_id)",
    "CREATE INDEX IF NOT EXISTS idx_conversations_attention ON conversations(hotel_id, requires_attention)",
    "CREATE INDEX IF NOT EXISTS idx_triggers_hotel ON triggers(hotel_id, trigger_type)",
    "CREATE INDEX IF NOT EXISTS idx_staff_notifications_hotel ON staff_notifications(hotel_id, status)",
];

#[cfg(test)]
mod tests {
    use crate::db::testing::sqlite_manager;

    #[tokio::test]
    async fn migrate_is_idempotent_and_ping_succeeds() {
        let (manager, _file) = sqlite_manager().await;
        manager.migrate().await.expect("second migrate");
        manager.ping().await.expect("ping");
    }
}
