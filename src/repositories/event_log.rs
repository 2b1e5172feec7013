use sqlx::PgPool;

use crate::models::event_log::EVENT_LOGIN_FAILED;

#[derive(Clone)]
pub struct EventLogRepository {
    pool: PgPool,
}

impl EventLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// ログイン失敗イベントを追記
    ///
    /// テーブルは追記専用。削除・更新は行わない。
    pub async fn record_login_failure(
        &self,
        username: &str,
        ip: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO event_logs (event_type, username, ip)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(EVENT_LOGIN_FAILED)
        .bind(username)
        .bind(ip)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// 直近 window_secs 秒間のログイン失敗回数（ユーザー名単位）
    ///
    /// CAPTCHAゲートのリスクシグナル。ユーザー名は大文字小文字を
    /// 区別せず数える。
    pub async fn login_failures_since(
        &self,
        username: &str,
        window_secs: i64,
    ) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM event_logs
            WHERE event_type = $1
              AND LOWER(username) = LOWER($2)
              AND created_at > NOW() - make_interval(secs => $3)
            "#,
        )
        .bind(EVENT_LOGIN_FAILED)
        .bind(username)
        .bind(window_secs as f64)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}
