use crate::config::settings::DatabaseAdminSettings;
use crate::domain::{CommandRunner, CommandSpec, Presence};
use crate::utils::error::Result;
use crate::utils::validation::validate_sql_identifier;
use std::sync::Arc;

/// SQL 字串常值：單引號加倍
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// SQL 識別字：雙引號加倍
pub fn quote_ident(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

fn is_local(host: &str) -> bool {
    matches!(host, "" | "localhost" | "127.0.0.1" | "::1")
}

/// 以 psql 管理部署用的角色與資料庫
pub struct PostgresAdmin {
    runner: Arc<dyn CommandRunner>,
    superuser: String,
    superuser_password: Option<String>,
    host: String,
    port: String,
}

impl PostgresAdmin {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        settings: &DatabaseAdminSettings,
        host: &str,
        port: &str,
    ) -> Self {
        Self {
            runner,
            superuser: settings.superuser.clone(),
            superuser_password: settings.superuser_password.clone(),
            host: host.to_string(),
            port: port.to_string(),
        }
    }

    /// 本機走 peer 認證（`sudo -u postgres`），遠端用 `-h -p -U` 與 PGPASSWORD
    fn psql(&self, sql: &str) -> CommandSpec {
        let query = ["-v", "ON_ERROR_STOP=1", "-d", "postgres", "-tAc", sql];

        if is_local(&self.host) {
            return CommandSpec::new("sudo")
                .args(["-u", self.superuser.as_str(), "psql"])
                .args(query);
        }

        let spec = CommandSpec::new("psql")
            .args(["-h", self.host.as_str(), "-p", self.port.as_str(), "-U", self.superuser.as_str()])
            .args(query);
        match &self.superuser_password {
            Some(password) => spec.env("PGPASSWORD", password.as_str()),
            None => spec,
        }
    }

    async fn exists(&self, sql: &str) -> Result<Presence> {
        let output = self.runner.run_checked(&self.psql(sql)).await?;
        if output.stdout.trim() == "1" {
            Ok(Presence::Present)
        } else {
            Ok(Presence::Absent)
        }
    }

    pub async fn role_presence(&self, role: &str) -> Result<Presence> {
        self.exists(&format!(
            "SELECT 1 FROM pg_roles WHERE rolname = {}",
            quote_literal(role)
        ))
        .await
    }

    pub async fn database_presence(&self, database: &str) -> Result<Presence> {
        self.exists(&format!(
            "SELECT 1 FROM pg_database WHERE datname = {}",
            quote_literal(database)
        ))
        .await
    }

    pub async fn create_role(&self, role: &str, password: &str) -> Result<()> {
        validate_sql_identifier("database.user", role)?;
        let sql = format!(
            "CREATE ROLE {} WITH LOGIN PASSWORD {}",
            quote_ident(role),
            quote_literal(password)
        );
        self.runner.run_checked(&self.psql(&sql)).await?;
        tracing::info!("🗄️ Created database role {}", role);
        Ok(())
    }

    pub async fn create_database(&self, database: &str, owner: &str) -> Result<()> {
        validate_sql_identifier("database.name", database)?;
        validate_sql_identifier("database.user", owner)?;
        let sql = format!(
            "CREATE DATABASE {} OWNER {}",
            quote_ident(database),
            quote_ident(owner)
        );
        self.runner.run_checked(&self.psql(&sql)).await?;
        tracing::info!("🗄️ Created database {} (owner {})", database, owner);
        Ok(())
    }

    pub async fn grant_all(&self, database: &str, role: &str) -> Result<()> {
        let sql = format!(
            "GRANT ALL PRIVILEGES ON DATABASE {} TO {}",
            quote_ident(database),
            quote_ident(role)
        );
        self.runner.run_checked(&self.psql(&sql)).await?;
        Ok(())
    }
}
