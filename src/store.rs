//!
//! pointgate store adapter
//! -----------------------
//! The portal consumes its backing store through the narrow `PortalStore`
//! capability: a parameterized credential lookup, the freshest vehicle
//! position, and parameterized roster insert/list/delete operations. How the
//! store is organized beyond that is not this crate's concern.
//!
//! Two implementations live here:
//! - `PgStore`: the real adapter over tokio-postgres. A connection is opened
//!   per request, used, and dropped at the end; nothing is held open across
//!   requests. Connect and query are both bounded by the configured
//!   timeouts, and any failure is fatal to that single request only.
//! - `MemStore`: an in-memory store for the `POINTGATE_STORE=memory` mode
//!   and for tests. It counts credential lookups so callers can assert that
//!   format-rejected identifiers never reach the store.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_postgres::{NoTls, Row};
use tracing::debug;

use crate::config::StoreConfig;
use crate::identity::{Attrs, Principal, Role};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection failed: {0}")]
    Unavailable(String),
    #[error("store query failed: {0}")]
    Query(String),
    #[error("store operation timed out")]
    Timeout,
    #[error("record already exists: {0}")]
    Duplicate(String),
}

/// Latest known vehicle position. Timestamps stay inside the store; only the
/// coordinate pair is surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentRecord {
    pub student_id: String,
    pub name: String,
    pub point_no: String,
    pub phone: String,
    pub fee_status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_id: Option<String>,
}

impl StudentRecord {
    pub fn principal(&self) -> Principal {
        Principal {
            identifier: self.student_id.clone(),
            name: self.name.clone(),
            role: Role::Student,
            attrs: Attrs {
                point_no: Some(self.point_no.clone()),
                phone: Some(self.phone.clone()),
                fee_status: Some(self.fee_status.clone()),
                driver_id: self.driver_id.clone(),
                ..Default::default()
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverRecord {
    pub driver_id: String,
    pub name: String,
    pub route: String,
    pub point_no: String,
    pub phone: String,
}

fn admin_principal(email: &str) -> Principal {
    Principal {
        identifier: email.to_string(),
        name: email.to_string(),
        role: Role::Admin,
        attrs: Attrs { email: Some(email.to_string()), ..Default::default() },
    }
}

/// Read/write capability the portal core needs from its backing store.
#[async_trait]
pub trait PortalStore: Send + Sync {
    /// All rows matching the identifier+secret conjunction for the role's
    /// credential table. The verifier decides what row counts mean.
    async fn lookup_principal(
        &self,
        role: Role,
        identifier: &str,
        secret: &str,
    ) -> Result<Vec<Principal>, StoreError>;

    async fn latest_position(&self) -> Result<Option<PositionSample>, StoreError>;
    async fn record_position(&self, sample: PositionSample) -> Result<(), StoreError>;

    async fn list_students(&self) -> Result<Vec<StudentRecord>, StoreError>;
    async fn add_student(&self, record: &StudentRecord) -> Result<(), StoreError>;
    async fn delete_student(&self, student_id: &str) -> Result<bool, StoreError>;

    async fn list_drivers(&self) -> Result<Vec<DriverRecord>, StoreError>;
    async fn add_driver(&self, record: &DriverRecord) -> Result<(), StoreError>;
    async fn delete_driver(&self, driver_id: &str) -> Result<bool, StoreError>;
}

// ---------------------------------------------------------------------------
// Postgres adapter
// ---------------------------------------------------------------------------

pub struct PgStore {
    cfg: StoreConfig,
}

impl PgStore {
    pub fn new(cfg: StoreConfig) -> Self { Self { cfg } }

    /// Open a connection for one request. The connection task is driven in
    /// the background and ends when the returned client is dropped.
    async fn connect(&self) -> Result<tokio_postgres::Client, StoreError> {
        let mut pg = tokio_postgres::Config::new();
        pg.host(&self.cfg.host)
            .port(self.cfg.port)
            .user(&self.cfg.user)
            .password(&self.cfg.password)
            .dbname(&self.cfg.dbname);
        let connected = tokio::time::timeout(self.cfg.connect_timeout, pg.connect(NoTls))
            .await
            .map_err(|_| StoreError::Timeout)?;
        let (client, conn) = connected.map_err(|e| StoreError::Unavailable(e.to_string()))?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(target: "store", "connection closed: {e}");
            }
        });
        Ok(client)
    }

    async fn bounded<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, tokio_postgres::Error>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.cfg.query_timeout, fut).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(StoreError::Query(e.to_string())),
            Err(_) => Err(StoreError::Timeout),
        }
    }
}

fn col<T>(res: Result<T, tokio_postgres::Error>) -> Result<T, StoreError> {
    res.map_err(|e| StoreError::Query(e.to_string()))
}

fn student_from_row(row: &Row) -> Result<StudentRecord, StoreError> {
    Ok(StudentRecord {
        student_id: col(row.try_get("student_id"))?,
        name: col(row.try_get("name"))?,
        point_no: col(row.try_get("point_no"))?,
        phone: col(row.try_get("phone"))?,
        fee_status: col(row.try_get("fee_status"))?,
        driver_id: col(row.try_get("driver_id"))?,
    })
}

fn driver_from_row(row: &Row) -> Result<DriverRecord, StoreError> {
    Ok(DriverRecord {
        driver_id: col(row.try_get("driver_id"))?,
        name: col(row.try_get("name"))?,
        route: col(row.try_get("route"))?,
        point_no: col(row.try_get("point_no"))?,
        phone: col(row.try_get("phone"))?,
    })
}

#[async_trait]
impl PortalStore for PgStore {
    async fn lookup_principal(
        &self,
        role: Role,
        identifier: &str,
        secret: &str,
    ) -> Result<Vec<Principal>, StoreError> {
        let client = self.connect().await?;
        match role {
            Role::Student => {
                let rows = self
                    .bounded(client.query(
                        "SELECT student_id, name, point_no, phone, fee_status, driver_id \
                         FROM student WHERE student_id = $1 AND student_password = $2",
                        &[&identifier, &secret],
                    ))
                    .await?;
                rows.iter()
                    .map(|r| student_from_row(r).map(|rec| rec.principal()))
                    .collect()
            }
            Role::Admin => {
                let rows = self
                    .bounded(client.query(
                        "SELECT email FROM admin_login WHERE email = $1 AND admin_password = $2",
                        &[&identifier, &secret],
                    ))
                    .await?;
                rows.iter()
                    .map(|r| col(r.try_get::<_, String>("email")).map(|e| admin_principal(&e)))
                    .collect()
            }
        }
    }

    async fn latest_position(&self) -> Result<Option<PositionSample>, StoreError> {
        let client = self.connect().await?;
        let row = self
            .bounded(client.query_opt(
                "SELECT latitude, longitude FROM locations ORDER BY recorded_at DESC LIMIT 1",
                &[],
            ))
            .await?;
        match row {
            Some(r) => Ok(Some(PositionSample {
                lat: col(r.try_get("latitude"))?,
                lng: col(r.try_get("longitude"))?,
            })),
            None => Ok(None),
        }
    }

    async fn record_position(&self, sample: PositionSample) -> Result<(), StoreError> {
        let client = self.connect().await?;
        let now_ms = chrono::Utc::now().timestamp_millis();
        self.bounded(client.execute(
            "INSERT INTO locations (latitude, longitude, recorded_at) VALUES ($1, $2, $3)",
            &[&sample.lat, &sample.lng, &now_ms],
        ))
        .await?;
        Ok(())
    }

    async fn list_students(&self) -> Result<Vec<StudentRecord>, StoreError> {
        let client = self.connect().await?;
        let rows = self
            .bounded(client.query(
                "SELECT student_id, name, point_no, phone, fee_status, driver_id FROM student",
                &[],
            ))
            .await?;
        rows.iter().map(student_from_row).collect()
    }

    async fn add_student(&self, record: &StudentRecord) -> Result<(), StoreError> {
        let client = self.connect().await?;
        let existing = self
            .bounded(client.query_opt(
                "SELECT student_id FROM student WHERE student_id = $1",
                &[&record.student_id],
            ))
            .await?;
        if existing.is_some() {
            return Err(StoreError::Duplicate(record.student_id.clone()));
        }
        self.bounded(client.execute(
            "INSERT INTO student (student_id, name, point_no, phone, fee_status, driver_id) \
             VALUES ($1, $2, $3, $4, $5, $6)",
            &[
                &record.student_id,
                &record.name,
                &record.point_no,
                &record.phone,
                &record.fee_status,
                &record.driver_id,
            ],
        ))
        .await?;
        Ok(())
    }

    async fn delete_student(&self, student_id: &str) -> Result<bool, StoreError> {
        let client = self.connect().await?;
        let n = self
            .bounded(client.execute("DELETE FROM student WHERE student_id = $1", &[&student_id]))
            .await?;
        Ok(n > 0)
    }

    async fn list_drivers(&self) -> Result<Vec<DriverRecord>, StoreError> {
        let client = self.connect().await?;
        let rows = self
            .bounded(client.query(
                "SELECT driver_id, name, route, point_no, phone FROM driver",
                &[],
            ))
            .await?;
        rows.iter().map(driver_from_row).collect()
    }

    async fn add_driver(&self, record: &DriverRecord) -> Result<(), StoreError> {
        let client = self.connect().await?;
        let existing = self
            .bounded(client.query_opt(
                "SELECT driver_id FROM driver WHERE driver_id = $1",
                &[&record.driver_id],
            ))
            .await?;
        if existing.is_some() {
            return Err(StoreError::Duplicate(record.driver_id.clone()));
        }
        self.bounded(client.execute(
            "INSERT INTO driver (driver_id, name, route, point_no, phone) \
             VALUES ($1, $2, $3, $4, $5)",
            &[
                &record.driver_id,
                &record.name,
                &record.route,
                &record.point_no,
                &record.phone,
            ],
        ))
        .await?;
        Ok(())
    }

    async fn delete_driver(&self, driver_id: &str) -> Result<bool, StoreError> {
        let client = self.connect().await?;
        let n = self
            .bounded(client.execute("DELETE FROM driver WHERE driver_id = $1", &[&driver_id]))
            .await?;
        Ok(n > 0)
    }
}

// ---------------------------------------------------------------------------
// In-memory store (memory mode and tests)
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemStore {
    students: RwLock<Vec<(StudentRecord, String)>>,
    admins: RwLock<Vec<(String, String)>>,
    drivers: RwLock<Vec<DriverRecord>>,
    positions: RwLock<Vec<(PositionSample, i64)>>,
    lookup_calls: AtomicUsize,
}

impl MemStore {
    pub fn new() -> Self { Self::default() }

    /// Add a student credential row. Duplicate rows are allowed on purpose:
    /// the verifier treats a multi-row match as invalid credentials and
    /// tests exercise exactly that.
    pub fn seed_student(&self, record: StudentRecord, secret: &str) {
        self.students.write().push((record, secret.to_string()));
    }

    pub fn seed_admin(&self, email: &str, secret: &str) {
        self.admins.write().push((email.to_string(), secret.to_string()));
    }

    /// Number of credential lookups performed against this store.
    pub fn lookup_calls(&self) -> usize {
        self.lookup_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PortalStore for MemStore {
    async fn lookup_principal(
        &self,
        role: Role,
        identifier: &str,
        secret: &str,
    ) -> Result<Vec<Principal>, StoreError> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        match role {
            Role::Student => Ok(self
                .students
                .read()
                .iter()
                .filter(|(rec, pw)| rec.student_id == identifier && pw == secret)
                .map(|(rec, _)| rec.principal())
                .collect()),
            Role::Admin => Ok(self
                .admins
                .read()
                .iter()
                .filter(|(email, pw)| email == identifier && pw == secret)
                .map(|(email, _)| admin_principal(email))
                .collect()),
        }
    }

    async fn latest_position(&self) -> Result<Option<PositionSample>, StoreError> {
        Ok(self.positions.read().last().map(|(s, _)| *s))
    }

    async fn record_position(&self, sample: PositionSample) -> Result<(), StoreError> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        self.positions.write().push((sample, now_ms));
        Ok(())
    }

    async fn list_students(&self) -> Result<Vec<StudentRecord>, StoreError> {
        Ok(self.students.read().iter().map(|(rec, _)| rec.clone()).collect())
    }

    async fn add_student(&self, record: &StudentRecord) -> Result<(), StoreError> {
        let mut students = self.students.write();
        if students.iter().any(|(rec, _)| rec.student_id == record.student_id) {
            return Err(StoreError::Duplicate(record.student_id.clone()));
        }
        // Roster inserts carry no secret; login rows are seeded separately.
        students.push((record.clone(), String::new()));
        Ok(())
    }

    async fn delete_student(&self, student_id: &str) -> Result<bool, StoreError> {
        let mut students = self.students.write();
        let before = students.len();
        students.retain(|(rec, _)| rec.student_id != student_id);
        Ok(students.len() < before)
    }

    async fn list_drivers(&self) -> Result<Vec<DriverRecord>, StoreError> {
        Ok(self.drivers.read().clone())
    }

    async fn add_driver(&self, record: &DriverRecord) -> Result<(), StoreError> {
        let mut drivers = self.drivers.write();
        if drivers.iter().any(|rec| rec.driver_id == record.driver_id) {
            return Err(StoreError::Duplicate(record.driver_id.clone()));
        }
        drivers.push(record.clone());
        Ok(())
    }

    async fn delete_driver(&self, driver_id: &str) -> Result<bool, StoreError> {
        let mut drivers = self.drivers.write();
        let before = drivers.len();
        drivers.retain(|rec| rec.driver_id != driver_id);
        Ok(drivers.len() < before)
    }
}
