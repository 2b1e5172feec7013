use std::collections::HashMap;

use sqlx::PgPool;

use crate::models::SiteConfig;

#[derive(Clone)]
pub struct SiteConfigRepository {
    pool: PgPool,
}

impl SiteConfigRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 現時点のサイト設定スナップショットを取得
    ///
    /// 認証試行・メール送信のたびに読み直す。行が1つも無くても
    /// エラーにせず空のスナップショットを返す（全機能デフォルト動作）。
    pub async fn snapshot(&self) -> Result<SiteConfig, sqlx::Error> {
        let rows: Vec<(String, serde_json::Value)> = sqlx::query_as(
            r#"
            SELECT key, value
            FROM site_settings
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let values: HashMap<String, serde_json::Value> = rows.into_iter().collect();
        Ok(SiteConfig::new(values))
    }

    /// 設定値をupsert（管理操作）
    pub async fn set(&self, key: &str, value: &serde_json::Value) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO site_settings (key, value, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (key)
            DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
