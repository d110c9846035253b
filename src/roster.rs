use crate::error::{Error, Result};
use crate::types::{Fleet, Roster, Vehicle};
use async_trait::async_trait;
use log::info;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, Row};

#[async_trait]
pub trait RosterSource: Send + Sync {
    /// Vehicles currently assigned to drivers, keyed by plate.
    async fn fetch_roster(&self, fleet: &Fleet) -> Result<Roster>;
}

const ROSTER_QUERY: &str = r#"
    WITH cars AS (
        SELECT "Car_No", "Marka", "Year", "Color", "Signal"
        FROM "Cars"
    ),
    assignments AS (
        SELECT "Signal", "Open_Time", "Duty", "Driver_No"
        FROM "DriverCar"
        WHERE "Signal" IN (SELECT "Signal" FROM cars)
    )
    SELECT a."Signal", c."Car_No", c."Marka", c."Year", c."Color", a."Open_Time", a."Duty",
           d."F", d."I", d."O", d."Phone1", d."Phone2", d."MPhone"
    FROM assignments a
    JOIN cars c ON a."Signal" = c."Signal"
    JOIN "Drivers" d ON a."Driver_No" = d."Driver_No"
"#;

/// Reads a fleet's dispatch database file (`Fleet::database`) read-only.
pub struct SqliteRoster;

impl SqliteRoster {
    fn query(fleet: &Fleet) -> rusqlite::Result<Roster> {
        let conn = Connection::open_with_flags(&fleet.database, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        let mut stmt = conn.prepare(ROSTER_QUERY)?;
        let mut rows = stmt.query([])?;
        let mut roster = Roster::new();
        while let Some(row) = rows.next()? {
            let Some(plate) = text(row, 1)? else {
                continue;
            };
            let vehicle = Vehicle {
                signal: text(row, 0)?.unwrap_or_default(),
                make: text(row, 2)?.unwrap_or_default(),
                year: text(row, 3)?.unwrap_or_default(),
                color: text(row, 4)?.unwrap_or_default(),
                open_time: text(row, 5)?,
                balance: number(row, 6)?,
                surname: text(row, 7)?,
                first_name: text(row, 8)?,
                patronymic: text(row, 9)?,
                phones: vec![text(row, 12)?, text(row, 11)?, text(row, 10)?],
            };
            roster.insert(plate, vehicle);
        }
        Ok(roster)
    }
}

#[async_trait]
impl RosterSource for SqliteRoster {
    async fn fetch_roster(&self, fleet: &Fleet) -> Result<Roster> {
        info!("Fetching roster of {} from {}", fleet.key, fleet.host);
        let owned = fleet.clone();
        let roster = tokio::task::spawn_blocking(move || SqliteRoster::query(&owned))
            .await
            .map_err(|e| Error::Roster {
                fleet: fleet.key.clone(),
                reason: e.to_string(),
            })?
            .map_err(|e| Error::Roster {
                fleet: fleet.key.clone(),
                reason: e.to_string(),
            })?;
        info!("Roster of {} has {} vehicles", fleet.key, roster.len());
        Ok(roster)
    }
}

fn text(row: &Row<'_>, index: usize) -> rusqlite::Result<Option<String>> {
    Ok(match row.get_ref(index)? {
        ValueRef::Null => None,
        ValueRef::Integer(value) => Some(value.to_string()),
        ValueRef::Real(value) => Some(value.to_string()),
        ValueRef::Text(value) | ValueRef::Blob(value) => {
            Some(String::from_utf8_lossy(value).trim().to_string())
        }
    })
}

fn number(row: &Row<'_>, index: usize) -> rusqlite::Result<f64> {
    Ok(match row.get_ref(index)? {
        ValueRef::Integer(value) => value as f64,
        ValueRef::Real(value) => value,
        ValueRef::Text(value) => String::from_utf8_lossy(value).trim().parse().unwrap_or(0.0),
        ValueRef::Null | ValueRef::Blob(_) => 0.0,
    })
}
