//! Diff a stored to-many collection against an incoming payload array by composite key.

use std::collections::HashMap;
use std::hash::Hash;

/// Partition of existing instances and payload elements.
///
/// Every existing instance lands in exactly one of `to_update` / `to_remove`;
/// every payload element in exactly one of `to_update` / `to_create`.
#[derive(Debug, PartialEq)]
pub struct Reconciliation<E, P> {
    /// Matched pairs: existing instance with the payload element that targets it.
    pub to_update: Vec<(E, P)>,
    /// Payload elements with no matching existing instance.
    pub to_create: Vec<P>,
    /// Existing instances absent from the payload, in their original order.
    pub to_remove: Vec<E>,
}

/// Two payload elements named the same existing instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateKey<K>(pub K);

/// Partition `existing` against `payload`.
///
/// `identity` keys stored instances; `payload_identity` keys payload elements from
/// the target's primary key fields only, returning `None` when they are incomplete
/// (such elements are always creations).
pub fn reconcile<E, P, K>(
    existing: Vec<E>,
    payload: Vec<P>,
    identity: impl Fn(&E) -> Option<K>,
    payload_identity: impl Fn(&P) -> Option<K>,
) -> Result<Reconciliation<E, P>, DuplicateKey<K>>
where
    K: Hash + Eq + Clone,
{
    let mut index: HashMap<K, usize> = HashMap::with_capacity(existing.len());
    for (i, e) in existing.iter().enumerate() {
        if let Some(k) = identity(e) {
            index.entry(k).or_insert(i);
        }
    }
    let mut removal_candidates: Vec<Option<E>> = existing.into_iter().map(Some).collect();
    let mut claimed = vec![false; removal_candidates.len()];

    let mut matched: Vec<(usize, P)> = Vec::new();
    let mut to_create = Vec::new();
    for element in payload {
        let hit = payload_identity(&element).and_then(|k| index.get(&k).map(|&i| (k, i)));
        match hit {
            Some((key, i)) => {
                if claimed[i] {
                    return Err(DuplicateKey(key));
                }
                claimed[i] = true;
                matched.push((i, element));
            }
            None => to_create.push(element),
        }
    }

    let to_update = matched
        .into_iter()
        .filter_map(|(i, element)| removal_candidates[i].take().map(|instance| (instance, element)))
        .collect();
    let to_remove = removal_candidates.into_iter().flatten().collect();
    Ok(Reconciliation {
        to_update,
        to_create,
        to_remove,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn key(v: &Value) -> Option<(String, String)> {
        Some((v.get("order")?.to_string(), v.get("sku")?.as_str()?.to_string()))
    }

    fn run(existing: Vec<Value>, payload: Vec<Value>) -> Reconciliation<Value, Value> {
        reconcile(existing, payload, key, key).unwrap()
    }

    #[test]
    fn partitions_by_composite_key() {
        let existing = vec![
            json!({ "order": 1, "sku": "a", "qty": 1 }),
            json!({ "order": 1, "sku": "b", "qty": 1 }),
        ];
        let payload = vec![json!({ "order": 1, "sku": "a", "qty": 5 }), json!({ "order": 1, "sku": "c" })];
        let r = run(existing, payload);
        assert_eq!(r.to_update.len(), 1);
        assert_eq!(r.to_update[0].0["qty"], json!(1));
        assert_eq!(r.to_update[0].1["qty"], json!(5));
        assert_eq!(r.to_create, vec![json!({ "order": 1, "sku": "c" })]);
        assert_eq!(r.to_remove, vec![json!({ "order": 1, "sku": "b", "qty": 1 })]);
    }

    #[test]
    fn mirrored_payload_only_updates() {
        let existing: Vec<Value> = (0..4).map(|i| json!({ "order": 9, "sku": format!("s{}", i) })).collect();
        let r = run(existing.clone(), existing.clone());
        assert!(r.to_create.is_empty());
        assert!(r.to_remove.is_empty());
        assert_eq!(r.to_update.len(), 4);
    }

    #[test]
    fn cardinalities_hold() {
        let existing: Vec<Value> = (0..5).map(|i| json!({ "order": 1, "sku": format!("k{}", i) })).collect();
        let payload: Vec<Value> = [1, 3, 7, 8]
            .iter()
            .map(|i| json!({ "order": 1, "sku": format!("k{}", i) }))
            .chain(std::iter::once(json!({ "sku": "no-order" })))
            .collect();
        let (e, p) = (existing.len(), payload.len());
        let r = run(existing, payload);
        assert_eq!(r.to_update.len() + r.to_remove.len(), e);
        assert_eq!(r.to_update.len() + r.to_create.len(), p);
        assert_eq!(r.to_create.len(), 3);
        let removed: Vec<_> = r.to_remove.iter().map(|v| v["sku"].clone()).collect();
        assert_eq!(removed, vec![json!("k0"), json!("k2"), json!("k4")]);
    }

    #[test]
    fn empty_payload_removes_everything() {
        let existing = vec![json!({ "order": 1, "sku": "a" })];
        let r = run(existing.clone(), vec![]);
        assert_eq!(r.to_remove, existing);
        assert!(r.to_update.is_empty() && r.to_create.is_empty());
    }

    #[test]
    fn payload_naming_one_instance_twice_is_rejected() {
        let existing = vec![json!({ "order": 1, "sku": "a" })];
        let payload = vec![json!({ "order": 1, "sku": "a" }), json!({ "order": 1, "sku": "a", "qty": 2 })];
        let err = reconcile(existing, payload, key, key).unwrap_err();
        assert_eq!(err, DuplicateKey(("1".to_string(), "a".to_string())));
    }
}
