//! SQLite repository implementation
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Checks read while the admin path writes
//! - **Connection pooling**: Shared by every running check
//! - **Migrations**: Schema versioning with sqlx, service catalog seeded there
//!
//! Timestamps are stored as Unix milliseconds.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument};

use super::backend::Repository;
use super::error::{RepositoryError, RepositoryResult};
use crate::{Event, Host, HostService, Service, Status, StatusCounts};

const PAIR_SELECT: &str = r#"
    SELECT hs.id, hs.host_id, hs.service_id, hs.active, hs.schedule_number,
           hs.schedule_unit, hs.status, hs.last_message, hs.last_check,
           hs.created_at, hs.updated_at,
           h.host_name,
           s.service_name, s.icon, s.active AS service_active
    FROM host_services hs
    JOIN hosts h ON h.id = hs.host_id
    JOIN services s ON s.id = hs.service_id
"#;

const HOST_SELECT: &str = r#"
    SELECT id, host_name, canonical_name, url, ip, ipv6, location, os,
           active, created_at, updated_at
    FROM hosts
"#;

/// Schedule given to freshly provisioned pairs
const DEFAULT_SCHEDULE_NUMBER: i64 = 3;

/// SQLite repository
pub struct SqliteRepository {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteRepository {
    /// Open (or create) the database file and run migrations
    ///
    /// ```no_run
    /// # use vigil::storage::sqlite::SqliteRepository;
    /// # async fn example() -> anyhow::Result<()> {
    /// let repository = SqliteRepository::new("./vigil.db").await?;
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> RepositoryResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite repository at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| RepositoryError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    fn timestamp_to_millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    fn millis_to_timestamp(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
    }

    fn host_from_row(row: &SqliteRow) -> RepositoryResult<Host> {
        Ok(Host {
            id: row.try_get("id")?,
            host_name: row.try_get("host_name")?,
            canonical_name: row.try_get("canonical_name")?,
            url: row.try_get("url")?,
            ip: row.try_get("ip")?,
            ipv6: row.try_get("ipv6")?,
            location: row.try_get("location")?,
            os: row.try_get("os")?,
            active: row.try_get("active")?,
            created_at: Self::millis_to_timestamp(row.try_get("created_at")?),
            updated_at: Self::millis_to_timestamp(row.try_get("updated_at")?),
            host_services: Vec::new(),
        })
    }

    fn pair_from_row(row: &SqliteRow) -> RepositoryResult<HostService> {
        let status: String = row.try_get("status")?;
        let unit: String = row.try_get("schedule_unit")?;
        let service_id: i32 = row.try_get("service_id")?;

        Ok(HostService {
            id: row.try_get("id")?,
            host_id: row.try_get("host_id")?,
            service_id,
            active: row.try_get("active")?,
            schedule_number: row.try_get("schedule_number")?,
            schedule_unit: unit
                .parse()
                .map_err(|e| RepositoryError::SerializationError(format!("{e}")))?,
            status: status
                .parse()
                .map_err(|e| RepositoryError::SerializationError(format!("{e}")))?,
            last_message: row.try_get("last_message")?,
            last_check: row
                .try_get::<Option<i64>, _>("last_check")?
                .map(Self::millis_to_timestamp),
            created_at: Self::millis_to_timestamp(row.try_get("created_at")?),
            updated_at: Self::millis_to_timestamp(row.try_get("updated_at")?),
            host_name: row.try_get("host_name")?,
            service: Service {
                id: service_id,
                service_name: row.try_get("service_name")?,
                icon: row.try_get("icon")?,
                active: row.try_get("service_active")?,
            },
        })
    }

    fn event_from_row(row: &SqliteRow) -> RepositoryResult<Event> {
        let event_type: String = row.try_get("event_type")?;

        Ok(Event {
            id: row.try_get("id")?,
            event_type: event_type
                .parse()
                .map_err(|e| RepositoryError::SerializationError(format!("{e}")))?,
            host_service_id: row.try_get("host_service_id")?,
            host_id: row.try_get("host_id")?,
            service_name: row.try_get("service_name")?,
            host_name: row.try_get("host_name")?,
            message: row.try_get("message")?,
            created_at: Self::millis_to_timestamp(row.try_get("created_at")?),
            updated_at: Self::millis_to_timestamp(row.try_get("updated_at")?),
        })
    }

    async fn fetch_pairs(
        &self,
        sql: &str,
        status: Option<Status>,
    ) -> RepositoryResult<Vec<HostService>> {
        let mut query = sqlx::query(sql);
        if let Some(status) = status {
            query = query.bind(status.as_str());
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(Self::pair_from_row).collect()
    }
}

#[async_trait]
impl Repository for SqliteRepository {
    #[instrument(skip(self))]
    async fn get_host_by_id(&self, id: i64) -> RepositoryResult<Host> {
        let row = sqlx::query(&format!("{HOST_SELECT} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(RepositoryError::NotFound { entity: "host", id })?;

        let mut host = Self::host_from_row(&row)?;

        let rows = sqlx::query(&format!(
            "{PAIR_SELECT} WHERE hs.host_id = ? ORDER BY hs.service_id"
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        host.host_services = rows
            .iter()
            .map(Self::pair_from_row)
            .collect::<RepositoryResult<_>>()?;

        Ok(host)
    }

    async fn all_hosts(&self) -> RepositoryResult<Vec<Host>> {
        let rows = sqlx::query(&format!("{HOST_SELECT} ORDER BY host_name"))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::host_from_row).collect()
    }

    #[instrument(skip(self, host), fields(host_name = %host.host_name))]
    async fn insert_host(&self, host: &Host) -> RepositoryResult<i64> {
        let now = Self::timestamp_to_millis(&Utc::now());
        let mut tx = self.pool.begin().await?;

        let host_id = sqlx::query(
            r#"
            INSERT INTO hosts (
                host_name, canonical_name, url, ip, ipv6, location, os,
                active, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&host.host_name)
        .bind(&host.canonical_name)
        .bind(&host.url)
        .bind(&host.ip)
        .bind(&host.ipv6)
        .bind(&host.location)
        .bind(&host.os)
        .bind(host.active)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        let service_ids: Vec<i64> = sqlx::query("SELECT id FROM services WHERE active = 1")
            .fetch_all(&mut *tx)
            .await?
            .iter()
            .map(|row| row.try_get("id"))
            .collect::<Result<_, _>>()?;

        for service_id in service_ids {
            sqlx::query(
                r#"
                INSERT INTO host_services (
                    host_id, service_id, active, schedule_number, schedule_unit,
                    status, last_message, created_at, updated_at
                )
                VALUES (?, ?, 0, ?, 'm', 'pending', '', ?, ?)
                "#,
            )
            .bind(host_id)
            .bind(service_id)
            .bind(DEFAULT_SCHEDULE_NUMBER)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!("inserted host {}", host_id);
        Ok(host_id)
    }

    async fn get_host_service_by_id(&self, id: i64) -> RepositoryResult<HostService> {
        let row = sqlx::query(&format!("{PAIR_SELECT} WHERE hs.id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(RepositoryError::NotFound {
                entity: "host service",
                id,
            })?;

        Self::pair_from_row(&row)
    }

    async fn get_host_service_by_host_id_service_id(
        &self,
        host_id: i64,
        service_id: i32,
    ) -> RepositoryResult<HostService> {
        let row = sqlx::query(&format!(
            "{PAIR_SELECT} WHERE hs.host_id = ? AND hs.service_id = ?"
        ))
        .bind(host_id)
        .bind(service_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(RepositoryError::NotFound {
            entity: "host service for host",
            id: host_id,
        })?;

        Self::pair_from_row(&row)
    }

    #[instrument(skip(self, pair), fields(host_service_id = pair.id))]
    async fn update_host_service(&self, pair: &HostService) -> RepositoryResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE host_services
            SET active = ?, schedule_number = ?, schedule_unit = ?, status = ?,
                last_message = ?, last_check = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(pair.active)
        .bind(pair.schedule_number)
        .bind(pair.schedule_unit.as_str())
        .bind(pair.status.as_str())
        .bind(&pair.last_message)
        .bind(pair.last_check.as_ref().map(Self::timestamp_to_millis))
        .bind(Self::timestamp_to_millis(&Utc::now()))
        .bind(pair.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound {
                entity: "host service",
                id: pair.id,
            });
        }

        Ok(())
    }

    #[instrument(skip(self, last_message))]
    async fn update_host_service_check_result(
        &self,
        id: i64,
        status: Status,
        last_message: &str,
        last_check: DateTime<Utc>,
    ) -> RepositoryResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE host_services
            SET status = ?, last_message = ?, last_check = ?, updated_at = ?
            WHERE id = ? AND active = 1
            "#,
        )
        .bind(status.as_str())
        .bind(last_message)
        .bind(Self::timestamp_to_millis(&last_check))
        .bind(Self::timestamp_to_millis(&Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }

        sqlx::query("SELECT id FROM host_services WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(RepositoryError::NotFound {
                entity: "host service",
                id,
            })?;

        debug!("host service {} is inactive, check result dropped", id);
        Ok(false)
    }

    async fn update_host_service_status(
        &self,
        host_id: i64,
        service_id: i32,
        active: bool,
        status: Status,
    ) -> RepositoryResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE host_services
            SET active = ?, status = ?, updated_at = ?
            WHERE host_id = ? AND service_id = ?
            "#,
        )
        .bind(active)
        .bind(status.as_str())
        .bind(Self::timestamp_to_millis(&Utc::now()))
        .bind(host_id)
        .bind(service_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound {
                entity: "host service for host",
                id: host_id,
            });
        }

        Ok(())
    }

    async fn get_services_to_monitor(&self) -> RepositoryResult<Vec<HostService>> {
        self.fetch_pairs(
            &format!("{PAIR_SELECT} WHERE h.active = 1 AND hs.active = 1 ORDER BY hs.id"),
            None,
        )
        .await
    }

    async fn get_services_by_status(&self, status: Status) -> RepositoryResult<Vec<HostService>> {
        self.fetch_pairs(
            &format!(
                "{PAIR_SELECT} WHERE hs.active = 1 AND hs.status = ? ORDER BY h.host_name, s.service_name"
            ),
            Some(status),
        )
        .await
    }

    async fn get_all_service_status_counts(&self) -> RepositoryResult<StatusCounts> {
        let rows = sqlx::query(
            "SELECT status, COUNT(id) AS total FROM host_services WHERE active = 1 GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let total: i64 = row.try_get("total")?;
            match status.parse::<Status>() {
                Ok(Status::Pending) => counts.pending = total,
                Ok(Status::Healthy) => counts.healthy = total,
                Ok(Status::Warning) => counts.warning = total,
                Ok(Status::Problem) => counts.problem = total,
                Err(e) => return Err(RepositoryError::SerializationError(e.to_string())),
            }
        }

        Ok(counts)
    }

    async fn get_service_status_counts(&self, status: Status) -> RepositoryResult<i64> {
        let row = sqlx::query(
            "SELECT COUNT(id) AS total FROM host_services WHERE active = 1 AND status = ?",
        )
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("total")?)
    }

    #[instrument(skip(self, event), fields(host_service_id = event.host_service_id))]
    async fn insert_event(&self, event: &Event) -> RepositoryResult<i64> {
        let id = sqlx::query(
            r#"
            INSERT INTO events (
                event_type, host_service_id, host_id, service_name, host_name,
                message, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.event_type.as_str())
        .bind(event.host_service_id)
        .bind(event.host_id)
        .bind(&event.service_name)
        .bind(&event.host_name)
        .bind(&event.message)
        .bind(Self::timestamp_to_millis(&event.created_at))
        .bind(Self::timestamp_to_millis(&event.updated_at))
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(id)
    }

    async fn get_all_events(&self) -> RepositoryResult<Vec<Event>> {
        let rows = sqlx::query(
            r#"
            SELECT id, event_type, host_service_id, host_id, service_name,
                   host_name, message, created_at, updated_at
            FROM events
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::event_from_row).collect()
    }

    async fn all_preferences(&self) -> RepositoryResult<HashMap<String, String>> {
        let rows = sqlx::query("SELECT name, preference FROM preferences")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> RepositoryResult<(String, String)> {
                Ok((row.try_get("name")?, row.try_get("preference")?))
            })
            .collect()
    }

    async fn set_system_pref(&self, name: &str, value: &str) -> RepositoryResult<()> {
        let mut preferences = HashMap::new();
        preferences.insert(name.to_string(), value.to_string());
        self.insert_or_update_preferences(&preferences).await
    }

    async fn insert_or_update_preferences(
        &self,
        preferences: &HashMap<String, String>,
    ) -> RepositoryResult<()> {
        let now = Self::timestamp_to_millis(&Utc::now());
        let mut tx = self.pool.begin().await?;

        for (name, value) in preferences {
            sqlx::query(
                r#"
                INSERT INTO preferences (name, preference, created_at, updated_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT (name) DO UPDATE SET
                    preference = excluded.preference,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(name)
            .bind(value)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn close(&self) {
        info!("closing SQLite repository at {}", self.db_path);
        self.pool.close().await;
    }
}
