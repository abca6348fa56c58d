use diesel::connection::SimpleConnection;
use diesel::r2d2::{self, ConnectionManager, CustomizeConnection};
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use thiserror::Error;

pub type DbPool = r2d2::Pool<ConnectionManager<SqliteConnection>>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Failed to create pool: {0}")]
    Pool(#[from] r2d2::PoolError),
    #[error("Migration error: {0}")]
    Migration(String),
}

/// Applied on every checkout so concurrent writers wait on the lock instead
/// of failing with SQLITE_BUSY.
#[derive(Debug, Clone, Copy)]
struct SqlitePragmas {
    busy_timeout_ms: u32,
}

impl CustomizeConnection<SqliteConnection, r2d2::Error> for SqlitePragmas {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), r2d2::Error> {
        conn.batch_execute(&format!(
            "PRAGMA busy_timeout = {}; PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;",
            self.busy_timeout_ms
        ))
        .map_err(r2d2::Error::QueryError)
    }
}

/// Builds the SQLite pool and applies pending migrations.
pub fn establish_pool(database_url: &str, max_connections: u32) -> Result<DbPool, DbError> {
    let manager = ConnectionManager::<SqliteConnection>::new(database_url);
    let pool = r2d2::Pool::builder()
        .max_size(max_connections)
        .connection_customizer(Box::new(SqlitePragmas { busy_timeout_ms: 5_000 }))
        .build(manager)?;

    let mut conn = pool.get()?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| DbError::Migration(e.to_string()))?;
    tracing::info!("Database ready at {}", database_url);

    Ok(pool)
}
