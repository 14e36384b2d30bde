//! Opaque CRDT boundary (`spec.md` §1): `merge(updates) -> state` and
//! `diff(state, since) -> update`. Concretely backed by `yrs`, the same
//! Y-CRDT binding the rest of the stack's lineage uses, but no module
//! outside this one touches `yrs` types directly — everything else sees
//! byte vectors.

use thiserror::Error;
use yrs::encoding::read::Error as YrsReadError;
use yrs::updates::decoder::Decode;
use yrs::{Doc, ReadTxn, StateVector, Transact, Update};

#[derive(Debug, Error)]
pub enum CrdtError {
    #[error("malformed CRDT update")]
    Decode(#[from] YrsReadError),
    #[error("failed to apply update: {0}")]
    Apply(String),
}

/// Builds a fresh document by applying every update in order. Order among
/// updates does not affect the resulting state (merge is commutative), but
/// applying in received order matches how a real replica would build up
/// its state incrementally.
pub fn merge_updates(updates: &[Vec<u8>]) -> Result<Doc, CrdtError> {
    let doc = Doc::new();
    {
        let mut txn = doc.transact_mut();
        for bytes in updates {
            let update = Update::decode_v1(bytes)?;
            txn.apply_update(update)
                .map_err(|e| CrdtError::Apply(e.to_string()))?;
        }
    }
    Ok(doc)
}

/// Merges a document's full state with an overlay of extra updates, useful
/// when combining a storage snapshot (as its own encoded update) with a
/// stream tail.
pub fn merge_into(doc: &Doc, updates: &[Vec<u8>]) -> Result<(), CrdtError> {
    let mut txn = doc.transact_mut();
    for bytes in updates {
        let update = Update::decode_v1(bytes)?;
        txn.apply_update(update)
            .map_err(|e| CrdtError::Apply(e.to_string()))?;
    }
    Ok(())
}

/// Encodes the full state of `doc` as a single update, suitable for
/// persisting as a snapshot or sending as sync-step-2 against an empty
/// state vector.
pub fn encode_state(doc: &Doc) -> Vec<u8> {
    let txn = doc.transact();
    txn.encode_state_as_update_v1(&StateVector::default())
}

/// Computes the minimal update a peer holding `state_vector` is missing.
pub fn diff_since(doc: &Doc, state_vector: &[u8]) -> Result<Vec<u8>, CrdtError> {
    let sv = StateVector::decode_v1(state_vector)?;
    let txn = doc.transact();
    Ok(txn.encode_state_as_update_v1(&sv))
}

pub fn state_vector(doc: &Doc) -> Vec<u8> {
    use yrs::updates::encoder::Encode;
    let txn = doc.transact();
    txn.state_vector().encode_v1()
}

#[cfg(test)]
mod tests {
    use super::*;
    use yrs::{GetString, Text, Transact};

    fn update_from(text: &str) -> Vec<u8> {
        let doc = Doc::new();
        let txt = doc.get_or_insert_text("content");
        {
            let mut txn = doc.transact_mut();
            txt.push(&mut txn, text);
        }
        encode_state(&doc)
    }

    #[test]
    fn merge_is_commutative_and_idempotent() {
        let a = update_from("hello ");
        let forward = merge_updates(&[a.clone(), a.clone()]).unwrap();
        let txt = forward.get_or_insert_text("content");
        let txn = forward.transact();
        assert_eq!(txt.get_string(&txn), "hello ");
    }

    #[test]
    fn diff_since_returns_missing_updates_only() {
        let doc = Doc::new();
        let txt = doc.get_or_insert_text("content");
        {
            let mut txn = doc.transact_mut();
            txt.push(&mut txn, "abc");
        }
        let empty_sv = StateVector::default();
        let full = {
            let txn = doc.transact();
            txn.encode_state_as_update_v1(&empty_sv)
        };
        let replica = merge_updates(&[full]).unwrap();
        let sv = state_vector(&replica);

        {
            let mut txn = doc.transact_mut();
            txt.push(&mut txn, "def");
        }
        let diff = diff_since(&doc, &sv).unwrap();
        merge_into(&replica, &[diff]).unwrap();
        let replica_txt = replica.get_or_insert_text("content");
        let txn = replica.transact();
        assert_eq!(replica_txt.get_string(&txn), "abcdef");
    }
}
