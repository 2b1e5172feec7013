use std::collections::BTreeMap;

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::site_config::{KEY_EMAIL_PASS, KEY_RECAPTCHA_SECRET_KEY};
use crate::state::AppState;

/// 読み出し時に値を伏せるキー
const SENSITIVE_KEYS: &[&str] = &[KEY_EMAIL_PASS, KEY_RECAPTCHA_SECRET_KEY];
const REDACTED: &str = "********";

#[derive(Debug, Serialize)]
pub struct SettingsResponse {
    pub settings: BTreeMap<String, serde_json::Value>,
}

/// サイト設定の一覧取得（管理操作）
///
/// GET /api/settings
///
/// シークレット値は設定有無だけ分かるよう伏せ字で返す
pub async fn get_settings(
    State(state): State<AppState>,
) -> Result<Json<SettingsResponse>, AppError> {
    let config = state.site_config_repo.snapshot().await?;

    let settings: BTreeMap<String, serde_json::Value> = config
        .entries()
        .map(|(key, value)| {
            let value = if SENSITIVE_KEYS.contains(&key.as_str()) {
                serde_json::Value::String(REDACTED.to_string())
            } else {
                value.clone()
            };
            (key.clone(), value)
        })
        .collect();

    Ok(Json(SettingsResponse { settings }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateSettingRequest {
    pub key: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct UpdateSettingResponse {
    pub key: String,
}

/// サイト設定の更新（管理操作）
///
/// PUT /api/settings
///
/// 変更は次回スナップショットから再起動なしで反映される
pub async fn update_setting(
    State(state): State<AppState>,
    Json(request): Json<UpdateSettingRequest>,
) -> Result<Json<UpdateSettingResponse>, AppError> {
    let key = request.key.trim();
    if key.is_empty() {
        return Err(AppError::Validation("key は必須です".to_string()));
    }

    state.site_config_repo.set(key, &request.value).await?;

    // 値はシークレットの可能性があるためログに出さない
    tracing::info!(key = %key, "サイト設定を更新");

    Ok(Json(UpdateSettingResponse {
        key: key.to_string(),
    }))
}
