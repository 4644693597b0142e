//! # Stage Tracker
//!
//! The highest pipeline stage each entity or edge has completed. Marks
//! never decrease except through an explicit clear.

use super::store::AuditStore;
use super::tables::{STAGES, key_of_stage, stage_key, storage};
use crate::types::{AuditError, DataKey};
use redb::{ReadableTable, WriteTransaction};
use std::collections::BTreeSet;

impl AuditStore {
    /// Record that `key` finished `stage`. Lower stages are ignored.
    pub fn mark_stage_finished(&self, key: &DataKey, stage: u32) -> Result<(), AuditError> {
        self.write(|txn| mark_in(txn, key, stage))
    }

    pub fn mark_stage_finished_many(&self, keys: &[DataKey], stage: u32) -> Result<(), AuditError> {
        self.write(|txn| {
            for key in keys {
                mark_in(txn, key, stage)?;
            }
            Ok(())
        })
    }

    /// Last completed stage of `key`, 0 if never marked.
    pub fn stage_of(&self, key: &DataKey) -> Result<u32, AuditError> {
        let key = key.canonical();
        self.read(|txn, _| {
            let stages = txn.open_table(STAGES).map_err(storage)?;
            Ok(stages
                .get(stage_key(&key))
                .map_err(storage)?
                .map_or(0, |v| v.value()))
        })
    }

    /// Reset the mark of `key` to 0.
    pub fn clear_stage_mark(&self, key: &DataKey) -> Result<(), AuditError> {
        let key = key.canonical();
        self.write(|txn| {
            let mut stages = txn.open_table(STAGES).map_err(storage)?;
            let k = stage_key(&key);
            if stages.get(k).map_err(storage)?.is_some() {
                stages.insert(k, 0).map_err(storage)?;
            }
            Ok(())
        })
    }

    /// Reset every mark to 0.
    pub fn clear_all_stage_marks(&self) -> Result<(), AuditError> {
        self.write(|txn| {
            let mut stages = txn.open_table(STAGES).map_err(storage)?;
            let marked: Vec<(String, String)> = {
                let mut marked = Vec::new();
                for entry in stages.iter().map_err(storage)? {
                    let (k, v) = entry.map_err(storage)?;
                    if v.value() != 0 {
                        let (a, b) = k.value();
                        marked.push((a.to_string(), b.to_string()));
                    }
                }
                marked
            };
            for (a, b) in &marked {
                stages.insert((a.as_str(), b.as_str()), 0).map_err(storage)?;
            }
            Ok(())
        })
    }

    /// Keys whose mark is below `stage`.
    pub fn pending_below(&self, stage: u32) -> Result<BTreeSet<DataKey>, AuditError> {
        self.read(|txn, _| {
            let stages = txn.open_table(STAGES).map_err(storage)?;
            let mut pending = BTreeSet::new();
            for entry in stages.iter().map_err(storage)? {
                let (k, v) = entry.map_err(storage)?;
                if v.value() < stage {
                    let (a, b) = k.value();
                    pending.insert(key_of_stage(a, b));
                }
            }
            Ok(pending)
        })
    }
}

fn mark_in(txn: &WriteTransaction, key: &DataKey, stage: u32) -> Result<(), AuditError> {
    let key = key.canonical();
    let k = stage_key(&key);
    let mut stages = txn.open_table(STAGES).map_err(storage)?;
    let current = stages.get(k).map_err(storage)?.map_or(0, |v| v.value());
    if stage > current {
        stages.insert(k, stage).map_err(storage)?;
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{Entity, Identity, Properties};

    fn id(s: &str) -> Identity {
        Identity::new(s).expect("valid identity")
    }

    fn store_with(ids: &[&str]) -> AuditStore {
        let s = AuditStore::in_memory("stage-tests").expect("store");
        for name in ids {
            s.add(Entity::new(id(name), "information/html", Properties::new()).unwrap())
                .unwrap();
        }
        s
    }

    #[test]
    fn marks_never_decrease() {
        let s = store_with(&["a"]);
        let key = DataKey::Plain(id("a"));
        s.mark_stage_finished(&key, 3).unwrap();
        s.mark_stage_finished(&key, 1).unwrap();
        assert_eq!(s.stage_of(&key).unwrap(), 3);
    }

    #[test]
    fn clear_resets_to_zero() {
        let s = store_with(&["a", "b"]);
        let a = DataKey::Plain(id("a"));
        let b = DataKey::Plain(id("b"));
        s.mark_stage_finished_many(&[a.clone(), b.clone()], 4).unwrap();
        s.clear_stage_mark(&a).unwrap();
        assert_eq!(s.stage_of(&a).unwrap(), 0);
        assert_eq!(s.stage_of(&b).unwrap(), 4);

        s.clear_all_stage_marks().unwrap();
        assert_eq!(s.stage_of(&b).unwrap(), 0);
        assert_eq!(s.pending_below(1).unwrap().len(), 2);
    }

    #[test]
    fn edges_are_tracked_once_marked() {
        let s = store_with(&["a", "b"]);
        let edge = DataKey::edge(id("b"), id("a"));
        assert!(!s.pending_below(1).unwrap().contains(&edge));
        s.mark_stage_finished(&DataKey::Edge(id("b"), id("a")), 2).unwrap();
        assert_eq!(s.stage_of(&edge).unwrap(), 2);
        assert!(s.pending_below(3).unwrap().contains(&edge));
    }

    #[test]
    fn new_entities_are_pending() {
        let s = store_with(&["a"]);
        assert_eq!(
            s.pending_below(1).unwrap(),
            BTreeSet::from([DataKey::Plain(id("a"))])
        );
        assert!(s.pending_below(0).unwrap().is_empty());
    }
}
