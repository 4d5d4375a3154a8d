//! Action queue database operations (action_queue)
//!
//! Items are created `pending` by detector processes and move to `approved`
//! or `rejected` exactly once.

use memory_hub_types::{ActionQueueItem, ActionStatus};
use rusqlite::params;
use serde_json::Value;

use super::super::{now_timestamp, Db};
use crate::error::{HubError, HubResult};

impl Db {
    /// Insert a new pending action
    pub fn enqueue_action(
        &self,
        action_type: &str,
        description: &str,
        payload: &Value,
        priority: i64,
    ) -> HubResult<i64> {
        if action_type.trim().is_empty() {
            return Err(HubError::Validation("action_type must not be empty".to_string()));
        }
        let payload_json = serde_json::to_string(payload)?;
        let conn = self.conn();
        conn.execute(
            "INSERT INTO action_queue (action_type, description, payload, status, priority, detected_at)
             VALUES (?1, ?2, ?3, 'pending', ?4, ?5)",
            params![action_type, description, payload_json, priority, now_timestamp()],
        )?;
        let id = conn.last_insert_rowid();
        log::info!("[QUEUE] Enqueued action #{} ({}, priority {})", id, action_type, priority);
        Ok(id)
    }

    /// List actions in one status, ordered by priority DESC, detected_at ASC
    pub fn list_actions(&self, status: ActionStatus) -> HubResult<Vec<ActionQueueItem>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, action_type, description, payload, status, priority, detected_at, approved_at
             FROM action_queue WHERE status = ?1
             ORDER BY priority DESC, detected_at ASC, id ASC",
        )?;
        let items = stmt
            .query_map([status.as_str()], row_to_action)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    pub fn get_action(&self, id: i64) -> HubResult<Option<ActionQueueItem>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, action_type, description, payload, status, priority, detected_at, approved_at
             FROM action_queue WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map([id], row_to_action)?;
        Ok(rows.next().transpose()?)
    }

    pub fn approve_action(&self, id: i64) -> HubResult<()> {
        self.transition_action(id, ActionStatus::Approved)
    }

    pub fn reject_action(&self, id: i64) -> HubResult<()> {
        self.transition_action(id, ActionStatus::Rejected)
    }

    /// Test-and-set from pending. Missing ids and already-decided items are
    /// indistinguishable to the caller.
    fn transition_action(&self, id: i64, to: ActionStatus) -> HubResult<()> {
        let conn = self.conn();
        let rows = match to {
            ActionStatus::Approved => conn.execute(
                "UPDATE action_queue SET status = 'approved', approved_at = ?1
                 WHERE id = ?2 AND status = 'pending'",
                params![now_timestamp(), id],
            )?,
            ActionStatus::Rejected => conn.execute(
                "UPDATE action_queue SET status = 'rejected'
                 WHERE id = ?1 AND status = 'pending'",
                [id],
            )?,
            ActionStatus::Pending => {
                return Err(HubError::Validation("cannot move an action back to pending".to_string()));
            }
        };

        if rows == 0 {
            return Err(HubError::NotFound(format!("pending action #{}", id)));
        }
        log::info!("[QUEUE] Action #{} {}", id, to.as_str());
        Ok(())
    }
}

fn row_to_action(row: &rusqlite::Row) -> rusqlite::Result<ActionQueueItem> {
    let payload: Option<String> = row.get(3)?;
    let status: String = row.get(4)?;
    Ok(ActionQueueItem {
        id: row.get(0)?,
        action_type: row.get(1)?,
        description: row.get(2)?,
        payload: payload
            .and_then(|p| serde_json::from_str(&p).ok())
            .unwrap_or(Value::Null),
        status: ActionStatus::from_name(&status).unwrap_or(ActionStatus::Pending),
        priority: row.get(5)?,
        detected_at: row.get(6)?,
        approved_at: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn open() -> Db {
        Db::open(":memory:").unwrap()
    }

    #[test]
    fn test_approve_sets_timestamp_once() {
        let db = open();
        let id = db
            .enqueue_action("follow_up", "Reply to Sam about auth", &json!({"to": "sam"}), 1)
            .unwrap();

        db.approve_action(id).unwrap();
        let item = db.get_action(id).unwrap().unwrap();
        assert_eq!(item.status, ActionStatus::Approved);
        assert!(item.approved_at.is_some());
        assert_eq!(item.payload["to"], "sam");

        let err = db.approve_action(id).unwrap_err();
        assert!(matches!(err, HubError::NotFound(_)));
    }

    #[test]
    fn test_reject_is_terminal() {
        let db = open();
        let id = db.enqueue_action("reminder", "Renew domain", &json!({}), 0).unwrap();

        db.reject_action(id).unwrap();
        let item = db.get_action(id).unwrap().unwrap();
        assert_eq!(item.status, ActionStatus::Rejected);
        assert!(item.approved_at.is_none());

        assert!(matches!(db.approve_action(id), Err(HubError::NotFound(_))));
        assert!(matches!(db.reject_action(id), Err(HubError::NotFound(_))));
    }

    #[test]
    fn test_racing_decisions_have_one_winner() {
        use std::sync::{Arc, Barrier};
        use std::thread;

        let db = Arc::new(open());
        for round in 0..20 {
            let id = db
                .enqueue_action("follow_up", &format!("race {}", round), &json!({}), 0)
                .unwrap();
            let barrier = Arc::new(Barrier::new(2));

            let approver = {
                let (db, barrier) = (Arc::clone(&db), Arc::clone(&barrier));
                thread::spawn(move || {
                    barrier.wait();
                    db.approve_action(id)
                })
            };
            let rejecter = {
                let (db, barrier) = (Arc::clone(&db), Arc::clone(&barrier));
                thread::spawn(move || {
                    barrier.wait();
                    db.reject_action(id)
                })
            };
            let approved = approver.join().unwrap();
            let rejected = rejecter.join().unwrap();

            let item = db.get_action(id).unwrap().unwrap();
            match (approved, rejected) {
                (Ok(()), Err(HubError::NotFound(_))) => {
                    assert_eq!(item.status, ActionStatus::Approved);
                    assert!(item.approved_at.is_some());
                }
                (Err(HubError::NotFound(_)), Ok(())) => {
                    assert_eq!(item.status, ActionStatus::Rejected);
                    assert!(item.approved_at.is_none());
                }
                (a, r) => panic!("expected one winner, got {:?} and {:?}", a, r),
            }
        }
    }

    #[test]
    fn test_missing_action_is_not_found() {
        let db = open();
        assert!(matches!(db.approve_action(77), Err(HubError::NotFound(_))));
    }

    #[test]
    fn test_list_orders_by_priority_then_age() {
        let db = open();
        let low = db.enqueue_action("a", "low", &json!(null), 0).unwrap();
        let high_old = db.enqueue_action("b", "high old", &json!(null), 5).unwrap();
        let high_new = db.enqueue_action("c", "high new", &json!(null), 5).unwrap();
        let decided = db.enqueue_action("d", "decided", &json!(null), 9).unwrap();
        db.approve_action(decided).unwrap();

        let pending = db.list_actions(ActionStatus::Pending).unwrap();
        let ids: Vec<i64> = pending.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![high_old, high_new, low]);

        let approved = db.list_actions(ActionStatus::Approved).unwrap();
        assert_eq!(approved.len(), 1);
        assert_eq!(approved[0].id, decided);
    }

    #[test]
    fn test_enqueue_requires_type() {
        let db = open();
        assert!(matches!(
            db.enqueue_action(" ", "x", &json!({}), 0),
            Err(HubError::Validation(_))
        ));
    }
}
