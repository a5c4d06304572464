//! Read-only access to the `source_database` catalog (owned by the
//! external CRUD collaborator; `spec.md` §6).

use sqlx::Row;

use crate::domain::SourceDatabase;
use crate::error::{EngineError, EngineResult};

use super::Store;

impl Store {
    pub async fn get_source_database(&self, source_code: &str) -> EngineResult<Option<SourceDatabase>> {
        let row = sqlx::query(
            r#"
            SELECT source_code, host, port, database_name, db_type, username,
                   encrypted_password_ciphertext, encrypted_password_nonce
            FROM source_database
            WHERE source_code = $1
            "#,
        )
        .bind(source_code)
        .fetch_optional(self.pool())
        .await?;

        let Some(row) = row else { return Ok(None) };

        let db_type: String = row.try_get("db_type")?;
        let port: i32 = row.try_get("port")?;

        Ok(Some(SourceDatabase {
            source_code: row.try_get("source_code")?,
            host: row.try_get("host")?,
            port: port as u16,
            database_name: row.try_get("database_name")?,
            db_type: db_type.parse().map_err(EngineError::InvalidConfig)?,
            username: row.try_get("username")?,
            encrypted_password_ciphertext: row.try_get("encrypted_password_ciphertext")?,
            encrypted_password_nonce: row.try_get("encrypted_password_nonce")?,
        }))
    }

    pub async fn upsert_source_database(&self, db: &SourceDatabase) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO source_database
                (source_code, host, port, database_name, db_type, username,
                 encrypted_password_ciphertext, encrypted_password_nonce)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (source_code) DO UPDATE SET
                host = EXCLUDED.host,
                port = EXCLUDED.port,
                database_name = EXCLUDED.database_name,
                db_type = EXCLUDED.db_type,
                username = EXCLUDED.username,
                encrypted_password_ciphertext = EXCLUDED.encrypted_password_ciphertext,
                encrypted_password_nonce = EXCLUDED.encrypted_password_nonce
            "#,
        )
        .bind(&db.source_code)
        .bind(&db.host)
        .bind(db.port as i32)
        .bind(&db.database_name)
        .bind(db.db_type.to_string())
        .bind(&db.username)
        .bind(&db.encrypted_password_ciphertext)
        .bind(&db.encrypted_password_nonce)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}
