//! On-chain transactions (`spec.md` §3 "Transaction", §6 "Transaction
//! types on-chain").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::hashing::hash_json;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TxType {
    OptimaeAnnounced,
    OptimaeAccepted,
    OptimaeRejected,
    TaskCreated,
    TaskClaimed,
    TaskCompleted,
    TaskFailed,
    EvaluationServed,
    DomainRegistered,
    DomainUpdated,
    /// Coinbase reward distribution; always the first transaction of a
    /// block (`spec.md` §3 Block invariant).
    Coinbase,
    /// A balance-to-balance transfer (`spec.md` §4.M `apply_transfer`).
    Transfer,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub id: String,
    pub tx_type: TxType,
    pub domain_id: Option<String>,
    pub peer_id: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize)]
struct TxIdPayload<'a> {
    tx_type: TxType,
    domain_id: &'a Option<String>,
    peer_id: &'a str,
    payload: &'a Value,
    timestamp: String,
}

impl Transaction {
    pub fn compute_id(
        tx_type: TxType,
        domain_id: &Option<String>,
        peer_id: &str,
        payload: &Value,
        timestamp: DateTime<Utc>,
    ) -> String {
        hash_json(&TxIdPayload {
            tx_type,
            domain_id,
            peer_id,
            payload,
            timestamp: timestamp.to_rfc3339(),
        })
    }

    pub fn new(
        tx_type: TxType,
        domain_id: Option<String>,
        peer_id: String,
        payload: Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let id = Self::compute_id(tx_type, &domain_id, &peer_id, &payload, timestamp);
        Self {
            id,
            tx_type,
            domain_id,
            peer_id,
            payload,
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_stable_given_identical_inputs() {
        let ts = Utc::now();
        let a = Transaction::compute_id(TxType::OptimaeAccepted, &None, "p1", &Value::Null, ts);
        let b = Transaction::compute_id(TxType::OptimaeAccepted, &None, "p1", &Value::Null, ts);
        assert_eq!(a, b);
    }

    #[test]
    fn differing_tx_type_changes_id() {
        let ts = Utc::now();
        let a = Transaction::compute_id(TxType::OptimaeAccepted, &None, "p1", &Value::Null, ts);
        let b = Transaction::compute_id(TxType::OptimaeRejected, &None, "p1", &Value::Null, ts);
        assert_ne!(a, b);
    }
}
