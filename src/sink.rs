use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::Connection;
use thiserror::Error;
use tracing::{error, info};

use crate::db;
use crate::model::InterestRow;

const UPSERT_CHUNK: usize = 500;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("upsert rejected with HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("missing configuration: {0}")]
    Config(&'static str),
}

/// Bulk upsert keyed by `interest_id`; last write wins.
pub trait Sink {
    fn name(&self) -> &'static str;

    async fn upsert(&self, rows: &[InterestRow]) -> Result<usize, SinkError>;
}

// ── Local SQLite table ──

pub struct SqliteSink {
    conn: Connection,
}

impl SqliteSink {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = db::connect(path)?;
        db::init_schema(&conn)?;
        Ok(SqliteSink { conn })
    }
}

impl Sink for SqliteSink {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn upsert(&self, rows: &[InterestRow]) -> Result<usize, SinkError> {
        Ok(db::upsert_interests(&self.conn, rows)?)
    }
}

// ── Supabase (PostgREST) table ──

pub struct SupabaseSink {
    client: reqwest::Client,
    endpoint: String,
    key: String,
}

impl SupabaseSink {
    pub fn new(url: Option<&str>, key: Option<&str>, table: &str) -> Result<Self, SinkError> {
        let url = url.ok_or(SinkError::Config("PARLIAMENT_SUPABASE_URL"))?;
        let key = key.ok_or(SinkError::Config("PARLIAMENT_SUPABASE_KEY"))?;
        Ok(SupabaseSink {
            client: reqwest::Client::new(),
            endpoint: upsert_endpoint(url, table),
            key: key.to_string(),
        })
    }
}

impl Sink for SupabaseSink {
    fn name(&self) -> &'static str {
        "supabase"
    }

    async fn upsert(&self, rows: &[InterestRow]) -> Result<usize, SinkError> {
        let mut written = 0;
        for chunk in rows.chunks(UPSERT_CHUNK) {
            let response = self
                .client
                .post(&self.endpoint)
                .header("apikey", &self.key)
                .bearer_auth(&self.key)
                .header("Prefer", "resolution=merge-duplicates,return=minimal")
                .json(chunk)
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(SinkError::Status {
                    status: status.as_u16(),
                    body,
                });
            }
            written += chunk.len();
            info!("Upserted {}/{} rows", written, rows.len());
        }
        Ok(written)
    }
}

fn upsert_endpoint(base: &str, table: &str) -> String {
    format!(
        "{}/rest/v1/{}?on_conflict=interest_id",
        base.trim_end_matches('/'),
        table
    )
}

/// Hand rows to the sink; on failure dump them to `fallback_dir` so nothing is lost.
pub async fn deliver<S: Sink>(
    sink: &S,
    rows: &[InterestRow],
    fallback_dir: &Path,
) -> anyhow::Result<usize> {
    info!("Writing {} records to {}", rows.len(), sink.name());
    match sink.upsert(rows).await {
        Ok(n) => Ok(n),
        Err(e) => {
            error!("{} write failed: {}", sink.name(), e);
            match dump_rows(rows, fallback_dir) {
                Ok(path) => error!("Unwritten records saved to {:?}; re-run delivery from there", path),
                Err(dump_err) => error!("Could not save unwritten records either: {}", dump_err),
            }
            Err(e.into())
        }
    }
}

fn dump_rows(rows: &[InterestRow], dir: &Path) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("unwritten-{}.json", Utc::now().format("%Y%m%d-%H%M%S")));
    std::fs::write(&path, serde_json::to_vec_pretty(rows)?)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i64) -> InterestRow {
        InterestRow {
            interest_id: id,
            mp_name: "A Member".into(),
            mp_id: 1,
            constituency: "Here".into(),
            party: "Green".into(),
            category: "Gifts".into(),
            category_id: 3,
            date_registered: Some("2024-05-01".into()),
            date_published: None,
            summary: "Hamper - £90".into(),
            companies: "Hamper".into(),
            amounts: "90".into(),
            company_count: 1,
            amount_count: 1,
            collected_at: "2024-05-02T10:00:00Z".into(),
        }
    }

    struct Failing;

    impl Sink for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn upsert(&self, _rows: &[InterestRow]) -> Result<usize, SinkError> {
            Err(SinkError::Status {
                status: 503,
                body: "down".into(),
            })
        }
    }

    #[test]
    fn endpoint_shape() {
        assert_eq!(
            upsert_endpoint("https://abc.supabase.co/", "parliament_interests"),
            "https://abc.supabase.co/rest/v1/parliament_interests?on_conflict=interest_id"
        );
    }

    #[test]
    fn supabase_requires_credentials() {
        assert!(matches!(
            SupabaseSink::new(None, Some("k"), "t"),
            Err(SinkError::Config(_))
        ));
        assert!(SupabaseSink::new(Some("https://x.supabase.co"), Some("k"), "t").is_ok());
    }

    #[test]
    fn rows_serialize_flat() {
        let v = serde_json::to_value(row(4)).unwrap();
        assert_eq!(v["interest_id"], 4);
        assert_eq!(v["amounts"], "90");
        assert!(v["date_published"].is_null());
    }

    #[tokio::test]
    async fn sqlite_sink_upserts() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SqliteSink::open(&dir.path().join("db/interests.sqlite")).unwrap();
        let n = deliver(&sink, &[row(1), row(2)], dir.path()).await.unwrap();
        assert_eq!(n, 2);
        deliver(&sink, &[row(2)], dir.path()).await.unwrap();
        assert_eq!(db::get_stats(&sink.conn).unwrap().total, 2);
    }

    #[tokio::test]
    async fn failed_delivery_dumps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let result = deliver(&Failing, &[row(1), row(2)], dir.path()).await;
        assert!(result.is_err());

        let dumped: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(dumped.len(), 1);
        let path = dumped[0].as_ref().unwrap().path();
        let rows: Vec<InterestRow> =
            serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(rows, vec![row(1), row(2)]);
    }
}
