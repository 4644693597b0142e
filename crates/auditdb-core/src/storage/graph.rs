//! # Graph Store
//!
//! Entities and the undirected edges between them.
//!
//! Re-adding an identity merges into the stored entity instead of creating
//! a duplicate. Edges are stored once per unordered pair; an entity's links
//! are rebuilt from both edge tables on every fetch.

use super::registry::TypeRegistry;
use super::store::AuditStore;
use super::tables::{
    DATA, DATA_INDEX, EntityRow, HISTORY, LINKS, LINKS_REVERSE, STAGES, edge_pair, from_row,
    next_rowid, storage, to_row,
};
use crate::formats::codec;
use crate::types::{
    AddOutcome, AuditError, DataKey, DataType, Entity, Identity, Payload, Record, Relationship,
};
use redb::{ReadTransaction, ReadableTable, ReadableTableMetadata, WriteTransaction};
use std::collections::BTreeSet;

/// Which entities a keys/count query selects.
enum Filter {
    All,
    Family(DataType),
    Subtype(DataType, u32),
    /// A subtype that was never registered.
    Nothing,
}

impl AuditStore {
    /// Add an entity, merging it into the stored one if the identity exists.
    pub fn add<P: Payload>(&self, entity: Entity<P>) -> Result<AddOutcome, AuditError> {
        self.transact(|txn, registry| add_in(txn, registry, entity))
    }

    /// Add several entities in one transaction.
    pub fn add_many<P: Payload>(
        &self,
        entities: impl IntoIterator<Item = Entity<P>>,
    ) -> Result<Vec<AddOutcome>, AuditError> {
        self.transact(|txn, registry| {
            entities
                .into_iter()
                .map(|entity| add_in(txn, registry, entity))
                .collect()
        })
    }

    /// Whether an entity or relationship exists.
    ///
    /// A relationship exists when its edge is stored and both endpoint
    /// entities exist, the same condition under which [`get`](Self::get)
    /// returns it.
    pub fn has(&self, key: &DataKey) -> Result<bool, AuditError> {
        self.read(|txn, _| {
            let data = txn.open_table(DATA).map_err(storage)?;
            match key.canonical() {
                DataKey::Plain(id) => Ok(data.get(id.as_str()).map_err(storage)?.is_some()),
                DataKey::Edge(lo, hi) => {
                    let links = txn.open_table(LINKS).map_err(storage)?;
                    Ok(links.get((lo.as_str(), hi.as_str())).map_err(storage)?.is_some()
                        && data.get(lo.as_str()).map_err(storage)?.is_some()
                        && data.get(hi.as_str()).map_err(storage)?.is_some())
                }
            }
        })
    }

    /// Fetch an entity, or both ends of an edge.
    pub fn get<P: Payload>(&self, key: &DataKey) -> Result<Option<Record<P>>, AuditError> {
        self.read(|txn, registry| get_in(txn, registry, key))
    }

    /// Fetch several records, skipping keys that resolve to nothing.
    pub fn get_many<P: Payload>(&self, keys: &[DataKey]) -> Result<Vec<Record<P>>, AuditError> {
        self.read(|txn, registry| {
            let mut records = Vec::with_capacity(keys.len());
            for key in keys {
                if let Some(record) = get_in(txn, registry, key)? {
                    records.push(record);
                }
            }
            Ok(records)
        })
    }

    /// Remove an entity with all its edges, or a single edge.
    ///
    /// Removing a plain identity also drops edges declared toward it by
    /// other entities, its stage mark and its plugin history, even when the
    /// entity itself was never added. The result says whether the entity
    /// (or edge) was stored.
    pub fn remove(&self, key: &DataKey) -> Result<bool, AuditError> {
        self.write(|txn| remove_in(txn, key))
    }

    /// Remove several keys, returning how many existed.
    pub fn remove_many(&self, keys: &[DataKey]) -> Result<usize, AuditError> {
        self.write(|txn| {
            let mut removed = 0;
            for key in keys {
                if remove_in(txn, key)? {
                    removed += 1;
                }
            }
            Ok(removed)
        })
    }

    /// Identities of the selected entities.
    pub fn keys(
        &self,
        data_type: Option<DataType>,
        subtype: Option<&str>,
    ) -> Result<BTreeSet<Identity>, AuditError> {
        self.read(|txn, registry| {
            let mut keys = BTreeSet::new();
            match resolve_filter(registry, data_type, subtype)? {
                Filter::Nothing => {}
                Filter::All => {
                    let data = txn.open_table(DATA).map_err(storage)?;
                    for entry in data.iter().map_err(storage)? {
                        let (id, _) = entry.map_err(storage)?;
                        keys.insert(Identity::from_stored(id.value()));
                    }
                }
                Filter::Family(family) => {
                    let index = txn.open_table(DATA_INDEX).map_err(storage)?;
                    for entry in index.range((family.code(), 0u32, "")..).map_err(storage)? {
                        let (k, _) = entry.map_err(storage)?;
                        let (f, _, id) = k.value();
                        if f != family.code() {
                            break;
                        }
                        keys.insert(Identity::from_stored(id));
                    }
                }
                Filter::Subtype(family, subtype) => {
                    let index = txn.open_table(DATA_INDEX).map_err(storage)?;
                    for entry in index.range((family.code(), subtype, "")..).map_err(storage)? {
                        let (k, _) = entry.map_err(storage)?;
                        let (f, s, id) = k.value();
                        if f != family.code() || s != subtype {
                            break;
                        }
                        keys.insert(Identity::from_stored(id));
                    }
                }
            }
            Ok(keys)
        })
    }

    /// Number of selected entities.
    pub fn count(&self, data_type: Option<DataType>, subtype: Option<&str>) -> Result<usize, AuditError> {
        if data_type.is_none() && subtype.is_none() {
            return self.read(|txn, _| {
                let data = txn.open_table(DATA).map_err(storage)?;
                Ok(data.len().map_err(storage)? as usize)
            });
        }
        self.keys(data_type, subtype).map(|keys| keys.len())
    }

    /// Family and subtype of each existing identity.
    pub fn types_of(&self, identities: &[Identity]) -> Result<BTreeSet<(DataType, String)>, AuditError> {
        self.read(|txn, registry| {
            let data = txn.open_table(DATA).map_err(storage)?;
            let mut types = BTreeSet::new();
            for id in identities {
                let Some(bytes) = data.get(id.as_str()).map_err(storage)? else {
                    continue;
                };
                let row: EntityRow = from_row(bytes.value())?;
                types.insert(row_type(registry, &row)?);
            }
            Ok(types)
        })
    }
}

// =============================================================================
// TRANSACTION BODIES
// =============================================================================

fn add_in<P: Payload>(
    txn: &WriteTransaction,
    registry: &mut TypeRegistry,
    entity: Entity<P>,
) -> Result<AddOutcome, AuditError> {
    entity.validate()?;
    let Entity {
        identity,
        data_type,
        subtype,
        payload,
        links,
    } = entity;
    let id = identity.as_str();

    let stored = {
        let data = txn.open_table(DATA).map_err(storage)?;
        let bytes = data.get(id).map_err(storage)?.map(|v| v.value().to_vec());
        bytes.map(|b| from_row::<EntityRow>(&b)).transpose()?
    };

    let outcome = match stored {
        Some(row) => {
            let (stored_type, stored_subtype) = row_type(registry, &row)?;
            if stored_type != data_type || stored_subtype != subtype {
                return Err(AuditError::Validation(format!(
                    "Entity '{}' is stored as '{}', not '{}'",
                    identity, stored_subtype, subtype
                )));
            }
            let old: P = codec::decode(&row.data)?;
            let merged = EntityRow {
                data: codec::encode(&old.merge(payload))?,
                ..row
            };
            let mut data = txn.open_table(DATA).map_err(storage)?;
            data.insert(id, to_row(&merged)?.as_slice()).map_err(storage)?;
            AddOutcome::Merged
        }
        None => {
            let subtype_id = registry.intern(txn, &subtype)?;
            let rowid = next_rowid(txn)?;
            let row = EntityRow {
                rowid,
                family: data_type.code(),
                subtype: subtype_id,
                data: codec::encode(&payload)?,
            };
            txn.open_table(DATA)
                .map_err(storage)?
                .insert(id, to_row(&row)?.as_slice())
                .map_err(storage)?;
            txn.open_table(DATA_INDEX)
                .map_err(storage)?
                .insert((data_type.code(), subtype_id, id), rowid)
                .map_err(storage)?;
            let mut stages = txn.open_table(STAGES).map_err(storage)?;
            if stages.get((id, "")).map_err(storage)?.is_none() {
                stages.insert((id, ""), 0).map_err(storage)?;
            }
            AddOutcome::Inserted
        }
    };

    for other in links.iter().filter(|other| **other != identity) {
        insert_edge(txn, id, other.as_str())?;
    }
    Ok(outcome)
}

fn insert_edge(txn: &WriteTransaction, a: &str, b: &str) -> Result<(), AuditError> {
    let (lo, hi) = edge_pair(a, b);
    let exists = {
        let links = txn.open_table(LINKS).map_err(storage)?;
        links.get((lo, hi)).map_err(storage)?.is_some()
    };
    if exists {
        return Ok(());
    }
    let rowid = next_rowid(txn)?;
    txn.open_table(LINKS)
        .map_err(storage)?
        .insert((lo, hi), rowid)
        .map_err(storage)?;
    txn.open_table(LINKS_REVERSE)
        .map_err(storage)?
        .insert((hi, lo), rowid)
        .map_err(storage)?;
    Ok(())
}

fn get_in<P: Payload>(
    txn: &ReadTransaction,
    registry: &TypeRegistry,
    key: &DataKey,
) -> Result<Option<Record<P>>, AuditError> {
    match key.canonical() {
        DataKey::Plain(id) => Ok(entity_in(txn, registry, &id)?.map(Record::Entity)),
        DataKey::Edge(lo, hi) => {
            let exists = {
                let links = txn.open_table(LINKS).map_err(storage)?;
                links
                    .get((lo.as_str(), hi.as_str()))
                    .map_err(storage)?
                    .is_some()
            };
            if !exists {
                return Ok(None);
            }
            let left = entity_in(txn, registry, &lo)?;
            let right = entity_in(txn, registry, &hi)?;
            Ok(left
                .zip(right)
                .map(|(left, right)| Record::Relationship(Relationship { left, right })))
        }
    }
}

fn entity_in<P: Payload>(
    txn: &ReadTransaction,
    registry: &TypeRegistry,
    id: &Identity,
) -> Result<Option<Entity<P>>, AuditError> {
    let row: EntityRow = {
        let data = txn.open_table(DATA).map_err(storage)?;
        match data.get(id.as_str()).map_err(storage)? {
            Some(bytes) => from_row(bytes.value())?,
            None => return Ok(None),
        }
    };
    let (data_type, subtype) = row_type(registry, &row)?;
    let forward = txn.open_table(LINKS).map_err(storage)?;
    let backward = txn.open_table(LINKS_REVERSE).map_err(storage)?;
    let mut links = linked_from(&forward, id.as_str())?;
    links.extend(linked_from(&backward, id.as_str())?);
    Ok(Some(Entity {
        identity: id.clone(),
        data_type,
        subtype,
        payload: codec::decode(&row.data)?,
        links,
    }))
}

/// Second components of every `(id, *)` row.
pub(crate) fn linked_from<T>(table: &T, id: &str) -> Result<BTreeSet<Identity>, AuditError>
where
    T: ReadableTable<(&'static str, &'static str), u64>,
{
    let mut out = BTreeSet::new();
    for entry in table.range((id, "")..).map_err(storage)? {
        let (k, _) = entry.map_err(storage)?;
        let (first, second) = k.value();
        if first != id {
            break;
        }
        out.insert(Identity::from_stored(second));
    }
    Ok(out)
}

fn remove_in(txn: &WriteTransaction, key: &DataKey) -> Result<bool, AuditError> {
    match key.canonical() {
        DataKey::Edge(lo, hi) => remove_edge(txn, lo.as_str(), hi.as_str()),
        DataKey::Plain(id) => {
            let id = id.as_str();
            let row = {
                let mut data = txn.open_table(DATA).map_err(storage)?;
                let removed = data.remove(id).map_err(storage)?.map(|v| v.value().to_vec());
                removed
            };
            let existed = row.is_some();
            if let Some(row) = row {
                let row: EntityRow = from_row(&row)?;
                txn.open_table(DATA_INDEX)
                    .map_err(storage)?
                    .remove((row.family, row.subtype, id))
                    .map_err(storage)?;
            }

            let neighbours = {
                let forward = txn.open_table(LINKS).map_err(storage)?;
                let backward = txn.open_table(LINKS_REVERSE).map_err(storage)?;
                let mut all = linked_from(&forward, id)?;
                all.extend(linked_from(&backward, id)?);
                all
            };
            for other in &neighbours {
                let (lo, hi) = edge_pair(id, other.as_str());
                remove_edge(txn, lo, hi)?;
            }

            txn.open_table(STAGES)
                .map_err(storage)?
                .remove((id, ""))
                .map_err(storage)?;

            let mut history = txn.open_table(HISTORY).map_err(storage)?;
            let plugins: Vec<u64> = {
                let mut plugins = Vec::new();
                for entry in history.range((id, 0u64)..).map_err(storage)? {
                    let (k, _) = entry.map_err(storage)?;
                    let (ident, plugin) = k.value();
                    if ident != id {
                        break;
                    }
                    plugins.push(plugin);
                }
                plugins
            };
            for plugin in plugins {
                history.remove((id, plugin)).map_err(storage)?;
            }
            Ok(existed)
        }
    }
}

fn remove_edge(txn: &WriteTransaction, lo: &str, hi: &str) -> Result<bool, AuditError> {
    let existed = txn
        .open_table(LINKS)
        .map_err(storage)?
        .remove((lo, hi))
        .map_err(storage)?
        .is_some();
    if existed {
        txn.open_table(LINKS_REVERSE)
            .map_err(storage)?
            .remove((hi, lo))
            .map_err(storage)?;
        txn.open_table(STAGES)
            .map_err(storage)?
            .remove((lo, hi))
            .map_err(storage)?;
    }
    Ok(existed)
}

// =============================================================================
// HELPERS
// =============================================================================

fn row_type(registry: &TypeRegistry, row: &EntityRow) -> Result<(DataType, String), AuditError> {
    let family = DataType::from_code(row.family)
        .ok_or_else(|| AuditError::Deserialization(format!("Unknown family code {}", row.family)))?;
    let subtype = registry
        .reverse(row.subtype)
        .ok_or_else(|| AuditError::Deserialization(format!("Unknown subtype id {}", row.subtype)))?;
    Ok((family, subtype.to_string()))
}

fn resolve_filter(
    registry: &TypeRegistry,
    data_type: Option<DataType>,
    subtype: Option<&str>,
) -> Result<Filter, AuditError> {
    match (data_type, subtype) {
        (None, None) => Ok(Filter::All),
        (Some(family), None) => Ok(Filter::Family(family)),
        (declared, Some(subtype)) => {
            let family = DataType::of_subtype(subtype)?;
            if let Some(declared) = declared {
                declared.validate_subtype(subtype)?;
            }
            Ok(registry
                .id_of(subtype)
                .map_or(Filter::Nothing, |id| Filter::Subtype(family, id)))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::types::{Properties, SharedValue};

    fn id(s: &str) -> Identity {
        Identity::new(s).expect("valid identity")
    }

    fn url(name: &str) -> Entity {
        Entity::new(id(name), "resource/url", Properties::new().with("url", name)).unwrap()
    }

    fn store() -> AuditStore {
        AuditStore::in_memory("graph-tests").expect("store")
    }

    #[test]
    fn add_then_get() {
        let s = store();
        assert_eq!(s.add(url("a")).unwrap(), AddOutcome::Inserted);
        let record: Record = s.get(&DataKey::Plain(id("a"))).unwrap().unwrap();
        let entity = record.into_entity().unwrap();
        assert_eq!(entity.subtype, "resource/url");
        assert_eq!(entity.payload.get("url"), Some(&SharedValue::from("a")));
    }

    #[test]
    fn get_missing_is_none() {
        let s = store();
        assert!(s.get::<Properties>(&DataKey::Plain(id("nope"))).unwrap().is_none());
    }

    #[test]
    fn readd_merges_payload() {
        let s = store();
        s.add(url("a")).unwrap();
        let again = Entity::new(id("a"), "resource/url", Properties::new().with("depth", 2i64)).unwrap();
        assert_eq!(s.add(again).unwrap(), AddOutcome::Merged);
        let e = s
            .get::<Properties>(&DataKey::Plain(id("a")))
            .unwrap()
            .unwrap()
            .into_entity()
            .unwrap();
        assert_eq!(e.payload.len(), 2);
        assert_eq!(s.count(None, None).unwrap(), 1);
    }

    #[test]
    fn readd_with_other_subtype_fails_and_rolls_back() {
        let s = store();
        s.add(url("a")).unwrap();
        let clash = Entity::new(id("a"), "resource/domain", Properties::new())
            .unwrap()
            .with_link(id("b"));
        assert!(matches!(s.add(clash), Err(AuditError::Validation(_))));
        assert!(!s.has(&DataKey::edge(id("a"), id("b"))).unwrap());
        assert!(s.keys(None, Some("resource/domain")).unwrap().is_empty());
    }

    #[test]
    fn relationship_requires_both_ends() {
        let s = store();
        s.add(url("a").with_link(id("b"))).unwrap();
        let edge = DataKey::edge(id("b"), id("a"));
        assert!(!s.has(&edge).unwrap());
        assert!(s.get::<Properties>(&edge).unwrap().is_none());

        s.add(url("b")).unwrap();
        assert!(s.has(&edge).unwrap());
        match s.get::<Properties>(&edge).unwrap() {
            Some(Record::Relationship(r)) => {
                assert_eq!(r.left.identity, id("a"));
                assert_eq!(r.right.identity, id("b"));
            }
            other => panic!("expected relationship, got {:?}", other),
        }
    }

    #[test]
    fn removing_missing_endpoint_drops_dangling_edge() {
        let s = store();
        s.add(url("a").with_link(id("b"))).unwrap();
        s.mark_stage_finished(&DataKey::Plain(id("b")), 2).unwrap();

        assert!(!s.remove(&DataKey::Plain(id("b"))).unwrap());
        let a = s
            .get::<Properties>(&DataKey::Plain(id("a")))
            .unwrap()
            .unwrap()
            .into_entity()
            .unwrap();
        assert!(a.links.is_empty());
        assert!(!s.pending_below(10).unwrap().contains(&DataKey::Plain(id("b"))));

        // a later add of `b` starts fresh and does not resurrect the edge
        s.add(url("b")).unwrap();
        assert_eq!(s.stage_of(&DataKey::Plain(id("b"))).unwrap(), 0);
        assert!(!s.has(&DataKey::edge(id("a"), id("b"))).unwrap());
    }

    #[test]
    fn remove_edge_keeps_entities() {
        let s = store();
        s.add(url("a").with_link(id("b"))).unwrap();
        s.add(url("b")).unwrap();
        assert!(s.remove(&DataKey::edge(id("a"), id("b"))).unwrap());
        assert!(s.has(&DataKey::Plain(id("a"))).unwrap());
        assert!(s.has(&DataKey::Plain(id("b"))).unwrap());
        let b = s
            .get::<Properties>(&DataKey::Plain(id("b")))
            .unwrap()
            .unwrap()
            .into_entity()
            .unwrap();
        assert!(b.links.is_empty());
        assert!(!s.remove(&DataKey::edge(id("a"), id("b"))).unwrap());
    }

    #[test]
    fn self_links_are_ignored() {
        let s = store();
        s.add(url("a").with_link(id("a"))).unwrap();
        let a = s
            .get::<Properties>(&DataKey::Plain(id("a")))
            .unwrap()
            .unwrap()
            .into_entity()
            .unwrap();
        assert!(a.links.is_empty());
    }

    #[test]
    fn keys_and_counts_by_type() {
        let s = store();
        s.add(url("u1")).unwrap();
        s.add(url("u2")).unwrap();
        s.add(Entity::new(id("d1"), "resource/domain", Properties::new()).unwrap())
            .unwrap();
        s.add(Entity::new(id("v1"), "vulnerability/xss", Properties::new()).unwrap())
            .unwrap();

        assert_eq!(s.count(None, None).unwrap(), 4);
        assert_eq!(s.count(Some(DataType::Resource), None).unwrap(), 3);
        assert_eq!(s.count(None, Some("resource/url")).unwrap(), 2);
        assert_eq!(
            s.count(Some(DataType::Resource), Some("resource/domain")).unwrap(),
            1
        );
        assert_eq!(s.count(Some(DataType::Information), None).unwrap(), 0);
        assert_eq!(s.count(None, Some("information/never")).unwrap(), 0);
        assert_eq!(
            s.keys(Some(DataType::Vulnerability), None).unwrap(),
            BTreeSet::from([id("v1")])
        );
    }

    #[test]
    fn subtype_family_mismatch_is_validation() {
        let s = store();
        assert!(matches!(
            s.keys(Some(DataType::Vulnerability), Some("resource/url")),
            Err(AuditError::Validation(_))
        ));
    }

    #[test]
    fn types_of_skips_missing() {
        let s = store();
        s.add(url("u1")).unwrap();
        let types = s.types_of(&[id("u1"), id("ghost")]).unwrap();
        assert_eq!(
            types,
            BTreeSet::from([(DataType::Resource, "resource/url".to_string())])
        );
    }

    #[test]
    fn get_many_and_remove_many() {
        let s = store();
        s.add_many(vec![url("a"), url("b"), url("c")]).unwrap();
        let keys = [
            DataKey::Plain(id("a")),
            DataKey::Plain(id("zz")),
            DataKey::Plain(id("c")),
        ];
        assert_eq!(s.get_many::<Properties>(&keys).unwrap().len(), 2);
        assert_eq!(s.remove_many(&keys).unwrap(), 2);
        assert_eq!(s.count(None, None).unwrap(), 1);
    }
}
