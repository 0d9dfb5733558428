//! Declared-calendar metadata storage (spec §3).

use rusqlite::{params, Row};

use crate::error::Result;
use crate::ids::{AccountId, CalendarId};
use crate::model::calendar::{Calendar, CalendarType};

use super::Store;

fn row_to_calendar(row: &Row) -> rusqlite::Result<Calendar> {
    let kind: String = row.get("calendar_type")?;
    Ok(Calendar {
        calendar_id: CalendarId::parse(row.get::<_, String>("calendar_id")?),
        account_id: AccountId::from(row.get::<_, String>("account_id")?),
        name: row.get("external_calendar_id")?,
        kind: CalendarType::parse(&kind).unwrap_or(CalendarType::Primary),
    })
}

impl Store {
    pub fn insert_calendar(&self, calendar: &Calendar) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO calendars (calendar_id, account_id, external_calendar_id, calendar_type) VALUES (?1,?2,?3,?4)",
                params![
                    calendar.calendar_id.as_str(),
                    calendar.account_id.as_str(),
                    calendar.name,
                    calendar.kind.as_str(),
                ],
            )?;
            Ok(())
        })
    }

    pub fn list_calendars_for_account(&self, account_id: &AccountId) -> Result<Vec<Calendar>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT calendar_id, account_id, external_calendar_id, calendar_type FROM calendars WHERE account_id = ?1",
            )?;
            let rows = stmt.query_map(params![account_id.as_str()], row_to_calendar)?.collect::<rusqlite::Result<_>>()?;
            Ok(rows)
        })
    }

    pub fn delete_calendars_for_account(&self, account_id: &AccountId) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM calendars WHERE account_id = ?1", params![account_id.as_str()])?;
            Ok(())
        })
    }
}
