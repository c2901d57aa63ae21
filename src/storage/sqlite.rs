use rusqlite::{Connection, Result as SqliteResult};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::models::{HarnessReport, ReportSummary};

/// SQLite store for harness reports
/// Uses tokio::Mutex for async-friendly locking
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Open (or create) the report store
    pub async fn new<P: AsRef<Path>>(db_path: P) -> SqliteResult<Self> {
        // Accept SQLite URL format (sqlite:./path or sqlite://path)
        let path_str = db_path.as_ref().to_string_lossy();
        let clean_path: &str = if path_str.starts_with("sqlite:") {
            path_str.trim_start_matches("sqlite:").trim_start_matches("//")
        } else {
            path_str.as_ref()
        };

        let conn = Connection::open(clean_path)?;
        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> SqliteResult<()> {
        let conn = self.conn.lock().await;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS evaluation_reports (
                id TEXT PRIMARY KEY,
                table_name TEXT NOT NULL,
                recommended_strategy TEXT,
                query_count INTEGER NOT NULL,
                generated_at TEXT NOT NULL,
                report_json TEXT NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_evaluation_reports_generated ON evaluation_reports(generated_at DESC)",
            [],
        )?;

        Ok(())
    }

    /// Persist a report, replacing any earlier report with the same id
    pub async fn save_report(&self, report: &HarnessReport) -> SqliteResult<()> {
        let report_json =
            serde_json::to_string(report).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;

        let db_conn = self.conn.lock().await;
        db_conn.execute(
            r#"
            INSERT OR REPLACE INTO evaluation_reports
            (id, table_name, recommended_strategy, query_count, generated_at, report_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            rusqlite::params![
                report.id,
                report.table_name,
                report.recommended_strategy,
                report.comparisons.len() as i64,
                report.generated_at.to_rfc3339(),
                report_json,
            ],
        )?;
        Ok(())
    }

    /// Get a report by ID
    pub async fn get_report(&self, id: &str) -> SqliteResult<Option<HarnessReport>> {
        let db_conn = self.conn.lock().await;
        let mut stmt = db_conn.prepare("SELECT report_json FROM evaluation_reports WHERE id = ?1")?;

        let result = stmt.query_row(rusqlite::params![id], |row| {
            let report_json: String = row.get(0)?;
            serde_json::from_str::<HarnessReport>(&report_json)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
        });

        match result {
            Ok(report) => Ok(Some(report)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// List stored reports, newest first
    pub async fn list_reports(&self) -> SqliteResult<Vec<ReportSummary>> {
        let db_conn = self.conn.lock().await;
        let mut stmt = db_conn.prepare(
            "SELECT id, table_name, recommended_strategy, query_count, generated_at FROM evaluation_reports ORDER BY generated_at DESC",
        )?;

        let rows = stmt.query_map([], |row| {
            let generated_at: String = row.get(4)?;
            Ok(ReportSummary {
                id: row.get(0)?,
                table_name: row.get(1)?,
                recommended_strategy: row.get(2)?,
                query_count: row.get::<_, i64>(3)? as usize,
                generated_at: chrono::DateTime::parse_from_rfc3339(&generated_at)
                    .map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
                    })?
                    .with_timezone(&chrono::Utc),
            })
        })?;

        let mut reports = Vec::new();
        for row in rows {
            reports.push(row?);
        }
        Ok(reports)
    }

    /// Delete a report
    pub async fn delete_report(&self, id: &str) -> SqliteResult<bool> {
        let db_conn = self.conn.lock().await;
        let rows_affected = db_conn.execute("DELETE FROM evaluation_reports WHERE id = ?1", rusqlite::params![id])?;
        Ok(rows_affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use tempfile::tempdir;

    fn report(id: &str, minutes_ago: i64) -> HarnessReport {
        HarnessReport {
            id: id.to_string(),
            generated_at: Utc::now() - Duration::minutes(minutes_ago),
            table_name: "financial_data".to_string(),
            strategies: vec!["pattern".to_string()],
            comparisons: Vec::new(),
            summaries: Vec::new(),
            recommended_strategy: Some("pattern".to_string()),
        }
    }

    #[test]
    fn test_sqlite_storage_creation() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let rt = tokio::runtime::Runtime::new().unwrap();
        let storage = rt.block_on(async { SqliteStorage::new(&db_path).await });
        assert!(storage.is_ok());
    }

    #[test]
    fn test_schema_initialization() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let rt = tokio::runtime::Runtime::new().unwrap();
        let storage = rt.block_on(async { SqliteStorage::new(&db_path).await.unwrap() });

        let conn = rt.block_on(async { storage.conn.lock().await });
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name = 'evaluation_reports'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_report_round_trip() {
        let dir = tempdir().unwrap();
        let storage = SqliteStorage::new(dir.path().join("reports.db")).await.unwrap();

        let saved = report("r-1", 0);
        storage.save_report(&saved).await.unwrap();

        let loaded = storage.get_report("r-1").await.unwrap();
        assert_eq!(loaded.as_ref().map(|r| r.id.as_str()), Some("r-1"));
        assert_eq!(loaded.unwrap().recommended_strategy.as_deref(), Some("pattern"));
        assert!(storage.get_report("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_reports_newest_first() {
        let dir = tempdir().unwrap();
        let storage = SqliteStorage::new(dir.path().join("reports.db")).await.unwrap();

        storage.save_report(&report("older", 30)).await.unwrap();
        storage.save_report(&report("newer", 1)).await.unwrap();

        let reports = storage.list_reports().await.unwrap();
        let ids: Vec<&str> = reports.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["newer", "older"]);
        assert_eq!(reports[0].table_name, "financial_data");
        assert_eq!(reports[0].query_count, 0);
    }

    #[tokio::test]
    async fn test_delete_report() {
        let dir = tempdir().unwrap();
        let storage = SqliteStorage::new(format!("sqlite:{}", dir.path().join("reports.db").display()))
            .await
            .unwrap();

        storage.save_report(&report("gone", 0)).await.unwrap();
        assert!(storage.delete_report("gone").await.unwrap());
        assert!(!storage.delete_report("gone").await.unwrap());
        assert!(storage.list_reports().await.unwrap().is_empty());
    }
}
