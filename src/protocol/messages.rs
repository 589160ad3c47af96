//! P2P message envelope and payloads (`spec.md` §6 "Wire messages").
//! All messages are flooded and JSON-serialized; `ttl` bounds the
//! flood, duplicates are deduped by content hash at the transport
//! layer (out of scope here).
//!
//! Grounded on `original_source/.../protocol/messages.py`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    OptimaeCommit,
    OptimaeReveal,
    OptimaeAnnouncement,
    TaskCreated,
    TaskClaimed,
    TaskCompleted,
    BlockAnnouncement,
    ChainStatus,
    BlockRequest,
    BlockResponse,
    PeerDiscovery,
    ChampionRequest,
    ChampionResponse,
    EvaluationRequest,
    EvaluationResponse,
}

const DEFAULT_TTL: u32 = 7;

/// Envelope every protocol message travels in.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub msg_type: MessageType,
    pub sender_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default = "default_ttl")]
    pub ttl: u32,
    #[serde(default)]
    pub payload: Value,
}

fn default_ttl() -> u32 {
    DEFAULT_TTL
}

impl Message {
    pub fn new(msg_type: MessageType, sender_id: String, timestamp: DateTime<Utc>, payload: Value) -> Self {
        Self {
            msg_type,
            sender_id,
            timestamp,
            ttl: DEFAULT_TTL,
            payload,
        }
    }

    /// Decrements `ttl` by one hop. Returns `None` once it reaches zero
    /// (the message should be dropped rather than re-flooded).
    pub fn forwarded(mut self) -> Option<Self> {
        if self.ttl == 0 {
            return None;
        }
        self.ttl -= 1;
        Some(self)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct OptimaeCommit {
    pub commitment_hash: String,
    pub domain_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct OptimaeReveal {
    pub commitment_hash: String,
    pub domain_id: String,
    pub optimae_id: String,
    pub parameters: Map<String, Value>,
    pub reported_performance: f64,
    pub nonce: String,
}

/// Legacy direct-submission mode without commit-reveal front-running
/// protection.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct OptimaeAnnouncement {
    pub domain_id: String,
    pub optimae_id: String,
    pub parameters: Map<String, Value>,
    pub reported_performance: f64,
    #[serde(default)]
    pub previous_best_performance: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EvaluationRequest {
    pub domain_id: String,
    pub input_data: Map<String, Value>,
    pub request_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EvaluationResponse {
    pub request_id: String,
    pub domain_id: String,
    pub result: Map<String, Value>,
    pub optimae_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BlockAnnouncement {
    pub block_index: u64,
    pub block_hash: String,
    pub previous_hash: String,
    pub generator_id: String,
    pub transaction_count: u64,
    pub weighted_performance_sum: f64,
    pub threshold: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TaskCreatedMsg {
    pub task_id: String,
    pub task_type: String,
    pub domain_id: String,
    pub requester_id: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub optimae_id: Option<String>,
    #[serde(default)]
    pub reported_performance: Option<f64>,
    #[serde(default = "default_priority")]
    pub priority: i32,
}

fn default_priority() -> i32 {
    10
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TaskClaimedMsg {
    pub task_id: String,
    pub evaluator_id: String,
    pub domain_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TaskCompletedMsg {
    pub task_id: String,
    pub evaluator_id: String,
    pub domain_id: String,
    #[serde(default)]
    pub verified_performance: Option<f64>,
    #[serde(default)]
    pub result: Option<Map<String, Value>>,
    #[serde(default)]
    pub optimae_id: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChainStatus {
    pub chain_height: u64,
    pub tip_hash: String,
    pub tip_index: u64,
    #[serde(default)]
    pub finalized_height: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BlockRequest {
    pub from_index: u64,
    pub to_index: u64,
    #[serde(default)]
    pub request_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BlockResponse {
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub blocks: Vec<Value>,
    #[serde(default)]
    pub has_more: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChampionRequest {
    pub domain_id: String,
    #[serde(default)]
    pub request_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChampionResponse {
    pub domain_id: String,
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub parameters: Option<Map<String, Value>>,
    #[serde(default)]
    pub performance: Option<f64>,
    #[serde(default)]
    pub has_champion: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PeerDiscovery {
    pub peer_id: String,
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_decrements_and_expires_at_zero() {
        let msg = Message::new(MessageType::PeerDiscovery, "p1".into(), Utc::now(), Value::Null);
        let mut current = msg;
        for _ in 0..DEFAULT_TTL {
            current = current.forwarded().expect("should still have hops left");
        }
        assert!(current.forwarded().is_none());
    }

    #[test]
    fn message_round_trips_through_json() {
        let msg = Message::new(
            MessageType::BlockAnnouncement,
            "peer".into(),
            Utc::now(),
            serde_json::to_value(BlockAnnouncement {
                block_index: 1,
                block_hash: "h".into(),
                previous_hash: "p".into(),
                generator_id: "g".into(),
                transaction_count: 0,
                weighted_performance_sum: 1.0,
                threshold: 1.0,
            })
            .unwrap(),
        );
        let json = serde_json::to_string(&msg).unwrap();
        let parsed: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, msg);
    }
}
