use sqlx::PgPool;

use crate::models::IdentityProvider;

const IDP_COLUMNS: &str =
    "id, shortname, entity_id, sso_url, slo_url, signing_cert, encryption_cert, created_at";

#[derive(Clone)]
pub struct IdentityProviderRepository {
    pool: PgPool,
}

impl IdentityProviderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 登録済みの SAML IdP を一覧
    pub async fn list(&self) -> Result<Vec<IdentityProvider>, sqlx::Error> {
        sqlx::query_as::<_, IdentityProvider>(&format!(
            r#"
            SELECT {IDP_COLUMNS}
            FROM identity_providers
            ORDER BY shortname
            "#,
        ))
        .fetch_all(&self.pool)
        .await
    }

    /// IdP レコードを作成（証明書は空文字列可）
    pub async fn create(
        &self,
        shortname: &str,
        entity_id: &str,
        sso_url: &str,
        slo_url: Option<&str>,
        signing_cert: &str,
        encryption_cert: &str,
    ) -> Result<IdentityProvider, sqlx::Error> {
        sqlx::query_as::<_, IdentityProvider>(&format!(
            r#"
            INSERT INTO identity_providers
                (shortname, entity_id, sso_url, slo_url, signing_cert, encryption_cert)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {IDP_COLUMNS}
            "#,
        ))
        .bind(shortname)
        .bind(entity_id)
        .bind(sso_url)
        .bind(slo_url)
        .bind(signing_cert)
        .bind(encryption_cert)
        .fetch_one(&self.pool)
        .await
    }
}
