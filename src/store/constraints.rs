//! Constraint storage (spec §3, §4.4).

use rusqlite::{params, OptionalExtension, Row};

use crate::error::Result;
use crate::ids::ConstraintId;
use crate::model::constraint::{Constraint, ConstraintKind};

use super::Store;

fn row_to_constraint(row: &Row) -> rusqlite::Result<Constraint> {
    let kind: String = row.get("kind")?;
    let config_json: String = row.get("config_json")?;
    Ok(Constraint {
        constraint_id: ConstraintId::parse(row.get::<_, String>("constraint_id")?),
        kind: ConstraintKind::parse(&kind).unwrap_or(ConstraintKind::Override),
        config: serde_json::from_str(&config_json).unwrap_or(serde_json::Value::Null),
        active_from: row.get("active_from")?,
        active_to: row.get("active_to")?,
    })
}

const COLUMNS: &str = "constraint_id, kind, config_json, active_from, active_to";

impl Store {
    pub fn insert_constraint(&self, constraint: &Constraint) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                &format!("INSERT INTO constraints ({COLUMNS}) VALUES (?1,?2,?3,?4,?5)"),
                params![
                    constraint.constraint_id.as_str(),
                    constraint.kind.as_str(),
                    serde_json::to_string(&constraint.config).unwrap_or_default(),
                    constraint.active_from,
                    constraint.active_to,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_constraint(&self, id: &ConstraintId) -> Result<Option<Constraint>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM constraints WHERE constraint_id = ?1"))?;
            Ok(stmt.query_row(params![id.as_str()], row_to_constraint).optional()?)
        })
    }

    pub fn list_constraints(&self, kind: Option<ConstraintKind>) -> Result<Vec<Constraint>> {
        self.with_conn(|conn| {
            if let Some(kind) = kind {
                let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM constraints WHERE kind = ?1"))?;
                let rows = stmt.query_map(params![kind.as_str()], row_to_constraint)?.collect::<rusqlite::Result<_>>()?;
                Ok(rows)
            } else {
                let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM constraints"))?;
                let rows = stmt.query_map([], row_to_constraint)?.collect::<rusqlite::Result<_>>()?;
                Ok(rows)
            }
        })
    }

    pub fn delete_constraint(&self, id: &ConstraintId) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM constraints WHERE constraint_id = ?1", params![id.as_str()])?;
            Ok(n > 0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn insert_list_and_delete() {
        let store = Store::open_in_memory().unwrap();
        let c = Constraint {
            constraint_id: ConstraintId::new(),
            kind: ConstraintKind::Buffer,
            config: json!({"type": "travel", "minutes": 15, "applies_to": "all"}),
            active_from: None,
            active_to: None,
        };
        store.insert_constraint(&c).unwrap();
        assert_eq!(store.list_constraints(Some(ConstraintKind::Buffer)).unwrap().len(), 1);
        assert_eq!(store.list_constraints(Some(ConstraintKind::Trip)).unwrap().len(), 0);
        assert!(store.delete_constraint(&c.constraint_id).unwrap());
        assert!(store.get_constraint(&c.constraint_id).unwrap().is_none());
    }
}
