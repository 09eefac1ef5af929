//! Device repository backing the fleet inventory

use std::collections::BTreeMap;

use super::DbPool;
use crate::fleet::{Device, FleetStore};
use crate::{Error, Result};

/// Device repository for CRUD operations on the fleet inventory
#[derive(Clone)]
pub struct DeviceRepo {
    pool: DbPool,
}

impl DeviceRepo {
    /// Create a new device repository
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Number of devices in the inventory
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn count(&self) -> Result<u64> {
        let conn = super::conn(&self.pool)?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM devices", [], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    fn row_to_device(row: &rusqlite::Row<'_>) -> rusqlite::Result<Device> {
        let labels_json: String = row.get(4)?;
        let config_json: String = row.get(5)?;

        let labels: BTreeMap<String, String> =
            serde_json::from_str(&labels_json).unwrap_or_default();
        let config: serde_json::Value =
            serde_json::from_str(&config_json).unwrap_or(serde_json::Value::Null);

        Ok(Device {
            id: row.get(0)?,
            name: row.get(1)?,
            model: row.get(2)?,
            firmware: row.get(3)?,
            labels,
            config,
        })
    }
}

impl FleetStore for DeviceRepo {
    fn list_devices(&self) -> Result<Vec<Device>> {
        let conn = super::conn(&self.pool)?;

        let mut stmt = conn.prepare(
            "SELECT id, name, model, firmware, labels, config FROM devices ORDER BY id",
        )?;

        let devices = stmt
            .query_map([], Self::row_to_device)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(devices)
    }

    fn get_device(&self, id: &str) -> Result<Option<Device>> {
        let conn = super::conn(&self.pool)?;

        let result = conn.query_row(
            "SELECT id, name, model, firmware, labels, config FROM devices WHERE id = ?1",
            rusqlite::params![id],
            Self::row_to_device,
        );

        match result {
            Ok(device) => Ok(Some(device)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Error::Database(e.to_string())),
        }
    }

    fn upsert_device(&self, device: &Device) -> Result<()> {
        let conn = super::conn(&self.pool)?;

        let labels_json = serde_json::to_string(&device.labels)?;
        let config_json = serde_json::to_string(&device.config)?;

        conn.execute(
            r"
            INSERT INTO devices (id, name, model, firmware, labels, config, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, datetime('now'))
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                model = excluded.model,
                firmware = excluded.firmware,
                labels = excluded.labels,
                config = excluded.config,
                updated_at = excluded.updated_at
            ",
            rusqlite::params![
                device.id,
                device.name,
                device.model,
                device.firmware,
                labels_json,
                config_json,
            ],
        )?;

        tracing::debug!(device_id = %device.id, "device upserted");
        Ok(())
    }

    fn delete_device(&self, id: &str) -> Result<bool> {
        let conn = super::conn(&self.pool)?;
        let rows = conn.execute("DELETE FROM devices WHERE id = ?1", rusqlite::params![id])?;

        if rows > 0 {
            tracing::debug!(device_id = %id, "device deleted");
        }

        Ok(rows > 0)
    }
}
