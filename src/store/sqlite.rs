//! SQLite 推荐存储（async-sqlite 特性）

use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::store::{RecommendationBatch, RecommendationSink, StoreError};

pub struct SqliteRecommendationSink {
    pool: SqlitePool,
}

impl SqliteRecommendationSink {
    /// 打开（或创建）数据库并建表
    pub async fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());

        let pool = SqlitePoolOptions::new()
            .max_connections(3)
            .connect(&db_url)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS recommendations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                agent_id TEXT NOT NULL,
                org_slug TEXT NOT NULL,
                task_id TEXT NOT NULL,
                produced_at INTEGER NOT NULL,
                instrument TEXT,
                action TEXT NOT NULL,
                confidence REAL,
                rationale TEXT,
                payload TEXT
            )",
        )
        .execute(&pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_recommendations_agent ON recommendations(agent_id, produced_at)")
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }

    pub async fn count_for_agent(&self, agent_id: &str) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM recommendations WHERE agent_id = ?")
            .bind(agent_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl RecommendationSink for SqliteRecommendationSink {
    async fn store(&self, batch: RecommendationBatch) -> Result<(), StoreError> {
        let task_id = batch.task_id.to_string();
        let mut tx = self.pool.begin().await?;
        for rec in &batch.recommendations {
            let payload = serde_json::to_string(&rec.payload)?;
            sqlx::query(
                "INSERT INTO recommendations
                 (agent_id, org_slug, task_id, produced_at, instrument, action, confidence, rationale, payload)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&batch.agent_id)
            .bind(&batch.org_slug)
            .bind(&task_id)
            .bind(batch.produced_at)
            .bind(&rec.instrument)
            .bind(&rec.action)
            .bind(rec.confidence)
            .bind(&rec.rationale)
            .bind(&payload)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::Recommendation;

    #[tokio::test]
    async fn test_store_batch() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SqliteRecommendationSink::open(dir.path().join("recs.db"))
            .await
            .unwrap();
        let batch = RecommendationBatch {
            agent_id: "a1".into(),
            org_slug: "acme".into(),
            task_id: uuid::Uuid::new_v4(),
            produced_at: chrono::Utc::now().timestamp_millis(),
            recommendations: vec![
                Recommendation::new("buy").for_instrument("BTC"),
                Recommendation::new("sell").for_instrument("ETH"),
            ],
        };
        sink.store(batch).await.unwrap();
        assert_eq!(sink.count_for_agent("a1").await.unwrap(), 2);
        assert_eq!(sink.count_for_agent("a2").await.unwrap(), 0);
    }
}
