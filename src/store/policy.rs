//! Policy and policy edge storage (spec §3, §4.2).

use rusqlite::{params, OptionalExtension, Row};

use crate::error::Result;
use crate::ids::{AccountId, PolicyId};
use crate::model::policy::{CalendarKind, DetailLevel, Policy, PolicyEdge, PolicyWithEdges};
use crate::store::bool_to_sql;

use super::Store;

fn row_to_policy(row: &Row) -> rusqlite::Result<Policy> {
    let is_default: i64 = row.get("is_default")?;
    Ok(Policy {
        policy_id: PolicyId::parse(row.get::<_, String>("policy_id")?),
        name: row.get("name")?,
        is_default: is_default != 0,
    })
}

fn row_to_edge(row: &Row) -> rusqlite::Result<PolicyEdge> {
    let detail_level: String = row.get("detail_level")?;
    let calendar_kind: String = row.get("calendar_kind")?;
    Ok(PolicyEdge {
        from_account_id: AccountId::from(row.get::<_, String>("from_account_id")?),
        to_account_id: AccountId::from(row.get::<_, String>("to_account_id")?),
        detail_level: DetailLevel::parse(&detail_level).unwrap_or(DetailLevel::Busy),
        calendar_kind: CalendarKind::parse(&calendar_kind).unwrap_or(CalendarKind::BusyOverlay),
    })
}

impl Store {
    pub fn insert_policy(&self, policy: &Policy) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO policies (policy_id, name, is_default) VALUES (?1, ?2, ?3)",
                params![policy.policy_id.as_str(), policy.name, bool_to_sql(policy.is_default)],
            )?;
            Ok(())
        })
    }

    pub fn list_policies(&self) -> Result<Vec<Policy>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT policy_id, name, is_default FROM policies ORDER BY policy_id ASC")?;
            let rows = stmt.query_map([], row_to_policy)?.collect::<rusqlite::Result<_>>()?;
            Ok(rows)
        })
    }

    pub fn get_default_policy(&self) -> Result<Option<Policy>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row("SELECT policy_id, name, is_default FROM policies WHERE is_default = 1 LIMIT 1", [], row_to_policy)
                .optional()?)
        })
    }

    pub fn get_policy_with_edges(&self, id: &PolicyId) -> Result<Option<PolicyWithEdges>> {
        self.with_conn(|conn| {
            let policy = conn
                .query_row(
                    "SELECT policy_id, name, is_default FROM policies WHERE policy_id = ?1",
                    params![id.as_str()],
                    row_to_policy,
                )
                .optional()?;
            let Some(policy) = policy else { return Ok(None) };
            let mut stmt = conn.prepare(
                "SELECT from_account_id, to_account_id, detail_level, calendar_kind FROM policy_edges WHERE policy_id = ?1",
            )?;
            let edges = stmt.query_map(params![id.as_str()], row_to_edge)?.collect::<rusqlite::Result<_>>()?;
            Ok(Some(PolicyWithEdges { policy, edges }))
        })
    }

    pub fn get_policy_edges(&self, id: &PolicyId) -> Result<Vec<PolicyEdge>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT from_account_id, to_account_id, detail_level, calendar_kind FROM policy_edges WHERE policy_id = ?1",
            )?;
            let rows = stmt.query_map(params![id.as_str()], row_to_edge)?.collect::<rusqlite::Result<_>>()?;
            Ok(rows)
        })
    }

    /// Replaces the edge set for `policy_id` atomically.
    pub fn replace_policy_edges(&self, policy_id: &PolicyId, edges: &[PolicyEdge]) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute("DELETE FROM policy_edges WHERE policy_id = ?1", params![policy_id.as_str()])?;
            for edge in edges {
                tx.execute(
                    "INSERT INTO policy_edges (policy_id, from_account_id, to_account_id, detail_level, calendar_kind) \
                     VALUES (?1,?2,?3,?4,?5)",
                    params![
                        policy_id.as_str(),
                        edge.from_account_id.as_str(),
                        edge.to_account_id.as_str(),
                        edge.detail_level.as_str(),
                        edge.calendar_kind.as_str(),
                    ],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn upsert_policy_edge(&self, policy_id: &PolicyId, edge: &PolicyEdge) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO policy_edges (policy_id, from_account_id, to_account_id, detail_level, calendar_kind) \
                 VALUES (?1,?2,?3,?4,?5) \
                 ON CONFLICT(policy_id, from_account_id, to_account_id) DO NOTHING",
                params![
                    policy_id.as_str(),
                    edge.from_account_id.as_str(),
                    edge.to_account_id.as_str(),
                    edge.detail_level.as_str(),
                    edge.calendar_kind.as_str(),
                ],
            )?;
            Ok(())
        })
    }

    pub fn delete_policy_edges_for_account(&self, account_id: &AccountId) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM policy_edges WHERE from_account_id = ?1 OR to_account_id = ?1",
                params![account_id.as_str()],
            )?;
            Ok(())
        })
    }

    /// All outgoing edges across every policy whose `from_account_id`
    /// matches `account_id` (spec §4.3 step 4 "For each outgoing policy
    /// edge").
    pub fn outgoing_edges_for_account(&self, account_id: &AccountId) -> Result<Vec<PolicyEdge>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT from_account_id, to_account_id, detail_level, calendar_kind FROM policy_edges WHERE from_account_id = ?1",
            )?;
            let rows = stmt.query_map(params![account_id.as_str()], row_to_edge)?.collect::<rusqlite::Result<_>>()?;
            Ok(rows)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_edges_is_atomic_and_overwrites() {
        let store = Store::open_in_memory().unwrap();
        let policy = Policy {
            policy_id: PolicyId::new(),
            name: "default".into(),
            is_default: true,
        };
        store.insert_policy(&policy).unwrap();
        let edge_a = PolicyEdge {
            from_account_id: AccountId::from("acc_a"),
            to_account_id: AccountId::from("acc_b"),
            detail_level: DetailLevel::Busy,
            calendar_kind: CalendarKind::BusyOverlay,
        };
        store.replace_policy_edges(&policy.policy_id, &[edge_a.clone()]).unwrap();
        assert_eq!(store.get_policy_edges(&policy.policy_id).unwrap().len(), 1);

        store.replace_policy_edges(&policy.policy_id, &[]).unwrap();
        assert_eq!(store.get_policy_edges(&policy.policy_id).unwrap().len(), 0);
    }
}
