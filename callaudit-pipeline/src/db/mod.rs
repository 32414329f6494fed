//! Database access for the call-audit pipeline
//!
//! SQLite via sqlx. Every persisted entity has a typed record struct and
//! free-function repository in its own module; no positional row access
//! anywhere.

pub mod audit;
pub mod batches;
pub mod call_metadata;
pub mod calls;
pub mod conversations;
pub mod events;
pub mod markers;
pub mod trades;

use anyhow::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // mode=rwc: read, write, create
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;

    Ok(pool)
}

/// In-memory pool for tests
///
/// Pinned to one connection: every pooled connection to `:memory:` would
/// otherwise open its own private database.
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Create pipeline tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    let statements = [
        r#"
        CREATE TABLE IF NOT EXISTS batches (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            batch_date TEXT NOT NULL,
            current_batch INTEGER NOT NULL DEFAULT 0,
            batch_status TEXT NOT NULL DEFAULT 'Created',
            total_files INTEGER NOT NULL DEFAULT 0,
            db_insertion_status TEXT NOT NULL DEFAULT 'Pending',
            db_insertion_start_time TEXT,
            db_insertion_end_time TEXT,
            denoise_status TEXT NOT NULL DEFAULT 'Pending',
            denoise_start_time TEXT,
            denoise_end_time TEXT,
            ivr_status TEXT NOT NULL DEFAULT 'Pending',
            ivr_start_time TEXT,
            ivr_end_time TEXT,
            lid_status TEXT NOT NULL DEFAULT 'Pending',
            lid_start_time TEXT,
            lid_end_time TEXT,
            stt_status TEXT NOT NULL DEFAULT 'Pending',
            stt_start_time TEXT,
            stt_end_time TEXT,
            audit_status TEXT NOT NULL DEFAULT 'Pending',
            audit_start_time TEXT,
            audit_end_time TEXT,
            triaging_status TEXT NOT NULL DEFAULT 'Pending',
            triaging_start_time TEXT,
            triaging_end_time TEXT,
            call_metadata_done INTEGER NOT NULL DEFAULT 0,
            trade_metadata_done INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(batch_date)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS calls (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            audio_name TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'Pending',
            language TEXT,
            language_id INTEGER,
            audio_duration REAL NOT NULL DEFAULT 0,
            ip TEXT,
            process_id INTEGER NOT NULL DEFAULT 1,
            category_mapping_id INTEGER NOT NULL DEFAULT 1,
            batch_id INTEGER NOT NULL,
            meta_data TEXT,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(audio_name, batch_id)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS call_metadata (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            recording_file_name TEXT NOT NULL,
            client_mobile_number TEXT,
            client_id TEXT,
            call_start_date TEXT,
            call_start_time TEXT,
            call_end_date TEXT,
            call_end_time TEXT,
            batch_id INTEGER NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS trade_metadata (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            order_id TEXT NOT NULL,
            client_code TEXT NOT NULL DEFAULT '',
            al_number TEXT,
            reg_number TEXT,
            trade_date TEXT NOT NULL,
            order_placed_time TEXT NOT NULL,
            symbol TEXT,
            scrip_name TEXT,
            strike_price REAL,
            trade_quantity INTEGER NOT NULL DEFAULT 0,
            trade_price REAL NOT NULL DEFAULT 0,
            batch_id INTEGER NOT NULL,
            voice_recording_confirmations TEXT,
            matching_status TEXT,
            data_missing TEXT,
            audio_file_name TEXT,
            audio_call_ref INTEGER
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS trade_audio_mappings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            trade_metadata_id INTEGER NOT NULL,
            order_id TEXT NOT NULL,
            client_code TEXT NOT NULL DEFAULT '',
            al_number TEXT,
            reg_number TEXT,
            trade_date TEXT NOT NULL,
            order_placed_time TEXT NOT NULL,
            symbol TEXT,
            scrip_name TEXT,
            strike_price REAL,
            trade_quantity INTEGER NOT NULL DEFAULT 0,
            trade_price REAL NOT NULL DEFAULT 0,
            is_script INTEGER NOT NULL DEFAULT 0,
            is_price INTEGER NOT NULL DEFAULT 0,
            is_quantity INTEGER NOT NULL DEFAULT 0,
            voice_recording_confirmations TEXT NOT NULL DEFAULT '',
            audio_file_name TEXT NOT NULL,
            batch_id INTEGER NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS call_conversations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            call_id INTEGER NOT NULL,
            script_name TEXT NOT NULL DEFAULT '',
            lot_quantity REAL,
            trade_price REAL,
            strike_price REAL,
            current_market_price TEXT,
            batch_id INTEGER NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS lot_quantity_mappings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            symbol TEXT NOT NULL,
            script_name TEXT,
            variation1 TEXT,
            variation2 TEXT,
            variation3 TEXT,
            quantity INTEGER
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS stage_markers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            stage TEXT NOT NULL,
            audio_name TEXT NOT NULL,
            batch_id INTEGER NOT NULL,
            ip TEXT,
            language TEXT,
            audio_duration REAL,
            error TEXT,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(stage, audio_name, batch_id)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS file_distributions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_name TEXT NOT NULL,
            ip TEXT NOT NULL,
            batch_id INTEGER NOT NULL,
            denoise_done INTEGER NOT NULL DEFAULT 0,
            ivr_done INTEGER NOT NULL DEFAULT 0,
            lid_done INTEGER NOT NULL DEFAULT 0,
            stt_done INTEGER NOT NULL DEFAULT 0,
            UNIQUE(file_name, batch_id)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS transcript_segments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            call_id INTEGER NOT NULL,
            start_time REAL NOT NULL DEFAULT 0,
            end_time REAL NOT NULL DEFAULT 0,
            speaker TEXT NOT NULL DEFAULT '',
            text TEXT NOT NULL DEFAULT '',
            confidence REAL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS audit_answers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            process_id INTEGER NOT NULL,
            call_id INTEGER NOT NULL,
            section_id INTEGER NOT NULL,
            sub_section_id INTEGER NOT NULL,
            question_id INTEGER NOT NULL,
            answer TEXT NOT NULL DEFAULT '',
            scored INTEGER NOT NULL DEFAULT 0,
            score INTEGER NOT NULL DEFAULT 0
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS audit_timings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            start_time REAL NOT NULL DEFAULT 0,
            end_time REAL NOT NULL DEFAULT 0,
            speaker TEXT NOT NULL DEFAULT '',
            text TEXT NOT NULL DEFAULT '',
            audit_answer_id INTEGER NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            batch_id INTEGER NOT NULL,
            stage TEXT,
            event_type TEXT NOT NULL,
            file TEXT,
            message TEXT,
            payload TEXT,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    ];

    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }

    tracing::info!("Database tables initialized");
    Ok(())
}
