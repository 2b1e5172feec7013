use axum::{Json, extract::State};
use serde::Serialize;

use crate::error::AppError;
use crate::models::IdentityProvider;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct IdentityProviderList {
    pub providers: Vec<IdentityProvider>,
}

/// SAML IdP 一覧
///
/// GET /api/saml/providers
///
/// 設定レコードをそのまま返すだけ（メタデータのパースはしない）
pub async fn list_identity_providers(
    State(state): State<AppState>,
) -> Result<Json<IdentityProviderList>, AppError> {
    let providers = state.idp_repo.list().await?;
    Ok(Json(IdentityProviderList { providers }))
}
