use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use sqlx::{sqlite::SqliteRow, Row};

use procura_core::domain::email::{EmailConfig, EmailConfigId};

use super::codec::{format_timestamp, parse_timestamp, parse_u16};
use super::{EmailConfigRepository, RepositoryError};
use crate::DbPool;

/// Mailbox credentials used by the ingestion channel and the outbound mailer.
#[derive(Clone)]
pub struct SqlEmailConfigRepository {
    pool: DbPool,
}

impl SqlEmailConfigRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EmailConfigRepository for SqlEmailConfigRepository {
    async fn active_email_config(&self) -> Result<Option<EmailConfig>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, address, app_password, imap_host, imap_port, smtp_host, smtp_port, active, created_at
             FROM email_config
             WHERE active = 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        row.map(email_config_from_row).transpose()
    }

    async fn save_email_config(&self, config: EmailConfig) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        if config.active {
            sqlx::query("UPDATE email_config SET active = 0 WHERE active = 1 AND id <> ?")
                .bind(&config.id.0)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(
            "INSERT INTO email_config (
                id, address, app_password, imap_host, imap_port, smtp_host, smtp_port, active, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                address = excluded.address,
                app_password = excluded.app_password,
                imap_host = excluded.imap_host,
                imap_port = excluded.imap_port,
                smtp_host = excluded.smtp_host,
                smtp_port = excluded.smtp_port,
                active = excluded.active",
        )
        .bind(&config.id.0)
        .bind(config.address.trim())
        .bind(config.app_password.expose_secret())
        .bind(&config.imap_host)
        .bind(i64::from(config.imap_port))
        .bind(&config.smtp_host)
        .bind(i64::from(config.smtp_port))
        .bind(config.active)
        .bind(format_timestamp(config.created_at))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn activate_email_config(&self, id: &EmailConfigId) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<String> = sqlx::query_scalar("SELECT id FROM email_config WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(RepositoryError::not_found("email_config", id.0.clone()));
        }

        sqlx::query("UPDATE email_config SET active = 0 WHERE active = 1")
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE email_config SET active = 1 WHERE id = ?")
            .bind(&id.0)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

fn email_config_from_row(row: SqliteRow) -> Result<EmailConfig, RepositoryError> {
    let password: String = row.try_get("app_password")?;
    Ok(EmailConfig {
        id: EmailConfigId(row.try_get("id")?),
        address: row.try_get("address")?,
        app_password: SecretString::from(password),
        imap_host: row.try_get("imap_host")?,
        imap_port: parse_u16("imap_port", row.try_get("imap_port")?)?,
        smtp_host: row.try_get("smtp_host")?,
        smtp_port: parse_u16("smtp_port", row.try_get("smtp_port")?)?,
        active: row.try_get("active")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use procura_core::chrono::Utc;
    use procura_core::domain::email::{EmailConfig, EmailConfigId};
    use secrecy::{ExposeSecret, SecretString};

    use super::SqlEmailConfigRepository;
    use crate::repositories::test_support::setup_store;
    use crate::repositories::{EmailConfigRepository, RepositoryError};

    fn config(address: &str, active: bool) -> EmailConfig {
        EmailConfig {
            id: EmailConfigId::generate(),
            address: address.to_string(),
            app_password: SecretString::from("app-password".to_string()),
            imap_host: "imap.mail.example".to_string(),
            imap_port: 993,
            smtp_host: "smtp.mail.example".to_string(),
            smtp_port: 465,
            active,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn only_one_configuration_stays_active() {
        let store = setup_store().await;
        let repository = SqlEmailConfigRepository::new(store.pool().clone());

        let first = config("buyer@procura.example", true);
        let second = config("backup@procura.example", true);
        repository.save_email_config(first.clone()).await.expect("first");
        repository.save_email_config(second.clone()).await.expect("second");

        let active = repository.active_email_config().await.expect("active").expect("present");
        assert_eq!(active.id, second.id);
        assert_eq!(active.app_password.expose_secret(), "app-password");

        repository.activate_email_config(&first.id).await.expect("activate");
        let active = repository.active_email_config().await.expect("active").expect("present");
        assert_eq!(active.id, first.id);
    }

    #[tokio::test]
    async fn activating_unknown_configuration_is_not_found() {
        let store = setup_store().await;
        let repository = SqlEmailConfigRepository::new(store.pool().clone());

        let error = repository
            .activate_email_config(&EmailConfigId("missing".to_string()))
            .await
            .expect_err("missing");
        assert!(matches!(error, RepositoryError::NotFound { entity: "email_config", .. }));
        assert!(repository.active_email_config().await.expect("query").is_none());
    }
}
