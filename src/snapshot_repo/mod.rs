// SQLite snapshot store. One row per completed non-dry-run job, keyed by job id.
// Port tables are wincode blobs for rollback; full states, diff and meta are JSON text.

mod blob;

use crate::models::{JobKind, PortRecord, Snapshot, SnapshotMeta, SnapshotSummary};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::instrument;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

pub struct SnapshotRepo {
    pool: SqlitePool,
    retention_ms: i64,
}

fn encode_ports(ports: &[PortRecord]) -> anyhow::Result<Vec<u8>> {
    let payload =
        wincode::serialize(&ports.to_vec()).map_err(|e| anyhow::anyhow!("wincode: {}", e))?;
    Ok(blob::with_version_prefix(blob::BLOB_VERSION_PORTS, payload))
}

fn decode_ports(bytes: &[u8]) -> anyhow::Result<Vec<PortRecord>> {
    let payload = blob::blob_payload(bytes, blob::BLOB_VERSION_PORTS).ok_or_else(|| {
        anyhow::anyhow!(
            "unsupported port blob version {}",
            blob::blob_version(bytes)
        )
    })?;
    wincode::deserialize(payload).map_err(|e| anyhow::anyhow!("wincode deserialize ports: {}", e))
}

impl SnapshotRepo {
    pub async fn connect(path: &str, retention_days: u32) -> anyhow::Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new().connect_with(opts).await?;
        let retention_ms = i64::from(retention_days) * DAY_MS;
        Ok(Self { pool, retention_ms })
    }

    pub async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS snapshots (
                job_id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                completed_at INTEGER NOT NULL,
                pre_ports BLOB NOT NULL,
                post_ports BLOB NOT NULL,
                pre_state TEXT NOT NULL,
                post_state TEXT NOT NULL,
                diff TEXT NOT NULL,
                meta TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_snapshots_completed_at ON snapshots(completed_at)",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(
        skip(self, snapshot),
        fields(
            repo = "snapshots",
            operation = "save",
            job_id = %snapshot.job_id
        )
    )]
    pub async fn save(&self, snapshot: &Snapshot) -> anyhow::Result<()> {
        let pre_ports = encode_ports(&snapshot.pre_state.port_records())?;
        let post_ports = encode_ports(&snapshot.post_state.port_records())?;
        sqlx::query(
            "INSERT OR REPLACE INTO snapshots (job_id, kind, completed_at, pre_ports, post_ports, pre_state, post_state, diff, meta) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(&snapshot.job_id)
        .bind(snapshot.kind.as_str())
        .bind(snapshot.completed_at)
        .bind(&pre_ports)
        .bind(&post_ports)
        .bind(serde_json::to_string(&snapshot.pre_state)?)
        .bind(serde_json::to_string(&snapshot.post_state)?)
        .bind(serde_json::to_string(&snapshot.diff)?)
        .bind(serde_json::to_string(&snapshot.meta)?)
        .execute(&self.pool)
        .await?;
        tracing::debug!(changes = snapshot.diff.len(), "snapshot saved");
        Ok(())
    }

    /// Summaries, newest first.
    #[instrument(skip(self), fields(repo = "snapshots", operation = "list"))]
    pub async fn list(&self) -> anyhow::Result<Vec<SnapshotSummary>> {
        let rows = sqlx::query(
            "SELECT job_id, kind, completed_at, diff, meta FROM snapshots ORDER BY completed_at DESC, job_id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let diff: Vec<serde_json::Value> =
                serde_json::from_str(&row.try_get::<String, _>("diff")?)?;
            let meta: SnapshotMeta = serde_json::from_str(&row.try_get::<String, _>("meta")?)?;
            out.push(SnapshotSummary {
                job_id: row.try_get("job_id")?,
                kind: parse_kind(&row)?,
                completed_at: row.try_get("completed_at")?,
                change_count: diff.len(),
                meta,
            });
        }
        Ok(out)
    }

    #[instrument(skip(self), fields(repo = "snapshots", operation = "load"))]
    pub async fn load(&self, job_id: &str) -> anyhow::Result<Option<Snapshot>> {
        let row = sqlx::query(
            "SELECT job_id, kind, completed_at, pre_state, post_state, diff, meta FROM snapshots WHERE job_id = $1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(Snapshot {
            job_id: row.try_get("job_id")?,
            kind: parse_kind(&row)?,
            completed_at: row.try_get("completed_at")?,
            pre_state: serde_json::from_str(&row.try_get::<String, _>("pre_state")?)?,
            post_state: serde_json::from_str(&row.try_get::<String, _>("post_state")?)?,
            diff: serde_json::from_str(&row.try_get::<String, _>("diff")?)?,
            meta: serde_json::from_str(&row.try_get::<String, _>("meta")?)?,
        }))
    }

    /// Pre and post port tables of one job, without decoding the full states.
    #[instrument(skip(self), fields(repo = "snapshots", operation = "load_ports"))]
    pub async fn load_ports(
        &self,
        job_id: &str,
    ) -> anyhow::Result<Option<(Vec<PortRecord>, Vec<PortRecord>)>> {
        let row = sqlx::query("SELECT pre_ports, post_ports FROM snapshots WHERE job_id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let pre: Vec<u8> = row.try_get("pre_ports")?;
        let post: Vec<u8> = row.try_get("post_ports")?;
        Ok(Some((decode_ports(&pre)?, decode_ports(&post)?)))
    }

    /// Delete snapshots completed more than `max_age` ago; returns rows removed.
    #[instrument(skip(self), fields(repo = "snapshots", operation = "cleanup_older_than"))]
    pub async fn cleanup_older_than(&self, max_age: Duration) -> anyhow::Result<u64> {
        let max_age_ms = i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);
        let cutoff = crate::now_ms().saturating_sub(max_age_ms);
        let result = sqlx::query("DELETE FROM snapshots WHERE completed_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Apply the configured retention.
    #[instrument(skip(self), fields(repo = "snapshots", operation = "prune_old_data"))]
    pub async fn prune_old_data(&self) -> anyhow::Result<u64> {
        let retention = Duration::from_millis(u64::try_from(self.retention_ms).unwrap_or(0));
        self.cleanup_older_than(retention).await
    }
}

/// `olderThanDays` as a Duration.
pub fn days(n: u32) -> Duration {
    Duration::from_secs(u64::from(n) * 24 * 60 * 60)
}

fn parse_kind(row: &SqliteRow) -> anyhow::Result<JobKind> {
    let kind: String = row.try_get("kind")?;
    JobKind::parse(&kind).ok_or_else(|| anyhow::anyhow!("unknown snapshot kind '{}'", kind))
}
