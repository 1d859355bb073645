// ABOUTME: SQLite persistence for instance rows
// ABOUTME: Single-row CRUD plus the serialized port-pair allocator

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::{Instance, InstanceStatus, NewInstance, RegistryError, Result};

/// Durable store of instance records. All writes are single-row; the one
/// multi-step operation (port allocation + insert) is serialized behind
/// `alloc_lock` so concurrent creates cannot compute the same port pair.
pub struct InstanceRegistry {
    pool: SqlitePool,
    alloc_lock: Mutex<()>,
    port_base: u16,
}

impl InstanceRegistry {
    pub fn new(pool: SqlitePool, port_base: u16) -> Self {
        Self {
            pool,
            alloc_lock: Mutex::new(()),
            port_base,
        }
    }

    /// Allocate a port pair, insert a `stopped` row, return the new instance.
    ///
    /// Both ports come off one shared counter: ssh = max+1, gateway = max+2.
    /// The UNIQUE constraints on subdomain and both port columns backstop
    /// anything that slips past the in-process lock.
    pub async fn create(&self, new: NewInstance) -> Result<Instance> {
        let _guard = self.alloc_lock.lock().await;

        let (ssh_port, gateway_port) = self.next_port_pair_locked().await?;
        let instance = Instance {
            id: Uuid::new_v4().to_string(),
            owner_id: new.owner_id,
            subdomain: new.subdomain,
            ssh_port,
            gateway_port,
            container_ref: None,
            status: InstanceStatus::Stopped,
            created_at: Utc::now(),
            last_started_at: None,
            last_stopped_at: None,
        };

        let result = sqlx::query(
            r#"
            INSERT INTO instances (
                id, owner_id, subdomain, ssh_port, gateway_port,
                container_ref, status, created_at, last_started_at, last_stopped_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&instance.id)
        .bind(&instance.owner_id)
        .bind(&instance.subdomain)
        .bind(instance.ssh_port as i64)
        .bind(instance.gateway_port as i64)
        .bind(&instance.container_ref)
        .bind(instance.status.as_str())
        .bind(instance.created_at)
        .bind(instance.last_started_at)
        .bind(instance.last_stopped_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!(
                    "Registered instance {} (subdomain={}, ports={}/{})",
                    instance.id, instance.subdomain, instance.ssh_port, instance.gateway_port
                );
                Ok(instance)
            }
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(RegistryError::SubdomainTaken(instance.subdomain))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Compute the next free port pair. Caller must hold `alloc_lock`.
    async fn next_port_pair_locked(&self) -> Result<(u16, u16)> {
        let row = sqlx::query(
            "SELECT COALESCE(MAX(MAX(ssh_port, gateway_port)), ?) AS high FROM instances",
        )
        .bind(self.port_base as i64 - 1)
        .fetch_one(&self.pool)
        .await?;

        let high: i64 = row.try_get("high")?;
        let ssh = high + 1;
        let gateway = high + 2;
        if gateway > u16::MAX as i64 {
            return Err(RegistryError::InvalidRow(format!(
                "Port space exhausted at {}",
                high
            )));
        }
        Ok((ssh as u16, gateway as u16))
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<Instance>> {
        let row = sqlx::query("SELECT * FROM instances WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_instance).transpose()
    }

    pub async fn find_by_slug(&self, subdomain: &str) -> Result<Option<Instance>> {
        let row = sqlx::query("SELECT * FROM instances WHERE subdomain = ?")
            .bind(subdomain)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_instance).transpose()
    }

    pub async fn find_by_owner(&self, owner_id: &str) -> Result<Vec<Instance>> {
        let rows = sqlx::query("SELECT * FROM instances WHERE owner_id = ? ORDER BY created_at")
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_instance).collect()
    }

    pub async fn count_by_owner(&self, owner_id: &str) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM instances WHERE owner_id = ?")
            .bind(owner_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }

    /// Update the status, stamping last_started_at/last_stopped_at on the
    /// matching transitions only.
    pub async fn update_status(&self, id: &str, status: InstanceStatus) -> Result<()> {
        let now = Utc::now();
        let query = match status {
            InstanceStatus::Running => {
                sqlx::query("UPDATE instances SET status = ?, last_started_at = ? WHERE id = ?")
                    .bind(status.as_str())
                    .bind(now)
                    .bind(id)
            }
            InstanceStatus::Stopped => {
                sqlx::query("UPDATE instances SET status = ?, last_stopped_at = ? WHERE id = ?")
                    .bind(status.as_str())
                    .bind(now)
                    .bind(id)
            }
            _ => sqlx::query("UPDATE instances SET status = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(id),
        };

        let result = query.execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(RegistryError::NotFound(id.to_string()));
        }
        Ok(())
    }

    pub async fn update_container_ref(&self, id: &str, container_ref: &str) -> Result<()> {
        let result = sqlx::query("UPDATE instances SET container_ref = ? WHERE id = ?")
            .bind(container_ref)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RegistryError::NotFound(id.to_string()));
        }
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM instances WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RegistryError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

fn row_to_instance(row: SqliteRow) -> Result<Instance> {
    let status_raw: String = row.try_get("status")?;
    let status = InstanceStatus::parse(&status_raw)
        .ok_or_else(|| RegistryError::InvalidRow(format!("Unknown status '{}'", status_raw)))?;

    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    let last_started_at: Option<DateTime<Utc>> = row.try_get("last_started_at")?;
    let last_stopped_at: Option<DateTime<Utc>> = row.try_get("last_stopped_at")?;
    let ssh_port: i64 = row.try_get("ssh_port")?;
    let gateway_port: i64 = row.try_get("gateway_port")?;

    Ok(Instance {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        subdomain: row.try_get("subdomain")?,
        ssh_port: ssh_port as u16,
        gateway_port: gateway_port as u16,
        container_ref: row.try_get("container_ref")?,
        status,
        created_at,
        last_started_at,
        last_stopped_at,
    })
}
