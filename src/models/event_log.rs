use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;

/// 認証失敗イベント（追記専用）
///
/// CAPTCHA要否のリスクシグナルとして参照される。
/// ゲート側はこのテーブルを読むだけで、書き込みはログイン失敗処理が行う。
#[derive(Debug, FromRow, Serialize)]
pub struct EventLog {
    pub id: i64,
    pub event_type: String,
    pub username: String,
    pub ip: Option<String>,
    pub created_at: OffsetDateTime,
}

/// イベント種別: ログイン失敗
pub const EVENT_LOGIN_FAILED: &str = "login_failed";
