//! Off-chain payment channels (`spec.md` §4.O): bidirectional
//! micropayment channels with cooperative close and a dispute window.
//!
//! Grounded on `original_source/.../models/payment_channel.py`.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use tracing::{info, warn};

use crate::hashing::hash_json;

const BALANCE_EPSILON: f64 = 1e-10;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    Opening,
    Open,
    Closing,
    Disputed,
    Closed,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PaymentUpdate {
    pub channel_id: String,
    pub nonce: u64,
    pub sender_balance: f64,
    pub receiver_balance: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub sender_signature: String,
    #[serde(default)]
    pub receiver_signature: String,
}

#[derive(Serialize)]
struct PaymentUpdateHashPayload<'a> {
    channel_id: &'a str,
    nonce: u64,
    sender_balance: f64,
    receiver_balance: f64,
}

impl PaymentUpdate {
    /// Hash of the payment state, signed off-chain by both parties.
    pub fn state_hash(&self) -> String {
        hash_json(&PaymentUpdateHashPayload {
            channel_id: &self.channel_id,
            nonce: self.nonce,
            sender_balance: self.sender_balance,
            receiver_balance: self.receiver_balance,
        })
    }

    pub fn total(&self) -> f64 {
        self.sender_balance + self.receiver_balance
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PaymentChannel {
    pub channel_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub deposit: f64,
    pub state: ChannelState,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub dispute_period: Duration,
    pub sender_balance: f64,
    pub receiver_balance: f64,
    pub nonce: u64,
    pub latest_update: Option<PaymentUpdate>,
    pub dispute_deadline: Option<DateTime<Utc>>,
    pub disputed_by: Option<String>,
}

impl PaymentChannel {
    pub fn is_active(&self) -> bool {
        self.state == ChannelState::Open
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn total_paid(&self) -> f64 {
        self.deposit - self.sender_balance
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChannelConfig {
    pub min_deposit: f64,
    pub max_deposit: f64,
    pub default_expiry: Duration,
    pub dispute_period: Duration,
    pub max_channels_per_peer: usize,
    pub settlement_fee_fraction: f64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            min_deposit: 1.0,
            max_deposit: 10_000.0,
            default_expiry: Duration::hours(24),
            dispute_period: Duration::hours(1),
            max_channels_per_peer: 10,
            settlement_fee_fraction: 0.001,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Settlement {
    pub channel_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub sender_refund: f64,
    pub receiver_payout: f64,
    pub fee: f64,
    pub nonce: u64,
    pub total_paid: f64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("deposit {0} below minimum {1}")]
    DepositTooLow(String, String),
    #[error("deposit {0} above maximum {1}")]
    DepositTooHigh(String, String),
    #[error("channel {0} already exists")]
    AlreadyExists(String),
    #[error("cannot open channel with yourself")]
    SelfChannel,
    #[error("peer has too many channels")]
    TooManyChannels,
    #[error("channel {0} not found")]
    NotFound(String),
    #[error("channel not active")]
    NotActive,
    #[error("channel expired")]
    Expired,
    #[error("only the sender can make payments")]
    NotSender,
    #[error("payment amount must be positive")]
    NonPositiveAmount,
    #[error("insufficient balance")]
    InsufficientBalance,
    #[error("channel already closed")]
    AlreadyClosed,
    #[error("only channel participants can act")]
    NotParticipant,
    #[error("dispute nonce {0} not newer than {1}")]
    StaleDispute(u64, u64),
    #[error("balance totals don't match deposit")]
    BalanceMismatch,
}

/// Manages payment channel lifecycle: open, pay, close, dispute.
pub struct PaymentChannelManager {
    config: ChannelConfig,
    channels: HashMap<String, PaymentChannel>,
    peer_channels: HashMap<String, Vec<String>>,
    total_locked: f64,
    total_settled: f64,
    total_fees: f64,
}

impl PaymentChannelManager {
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            config,
            channels: HashMap::new(),
            peer_channels: HashMap::new(),
            total_locked: 0.0,
            total_settled: 0.0,
            total_fees: 0.0,
        }
    }

    pub fn active_channel_count(&self) -> usize {
        self.channels.values().filter(|c| c.is_active()).count()
    }

    pub fn total_locked(&self) -> f64 {
        self.total_locked
    }

    pub fn open_channel(
        &mut self,
        channel_id: String,
        sender_id: String,
        receiver_id: String,
        deposit: f64,
        expiry: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Result<&PaymentChannel, ChannelError> {
        if deposit < self.config.min_deposit {
            return Err(ChannelError::DepositTooLow(format!("{deposit}"), format!("{}", self.config.min_deposit)));
        }
        if deposit > self.config.max_deposit {
            return Err(ChannelError::DepositTooHigh(format!("{deposit}"), format!("{}", self.config.max_deposit)));
        }
        if self.channels.contains_key(&channel_id) {
            return Err(ChannelError::AlreadyExists(channel_id));
        }
        if sender_id == receiver_id {
            return Err(ChannelError::SelfChannel);
        }
        if self.peer_channels.get(&sender_id).map(|v| v.len()).unwrap_or(0) >= self.config.max_channels_per_peer {
            return Err(ChannelError::TooManyChannels);
        }

        let channel = PaymentChannel {
            channel_id: channel_id.clone(),
            sender_id: sender_id.clone(),
            receiver_id: receiver_id.clone(),
            deposit,
            state: ChannelState::Open,
            created_at: now,
            expires_at: now + expiry.unwrap_or(self.config.default_expiry),
            dispute_period: self.config.dispute_period,
            sender_balance: deposit,
            receiver_balance: 0.0,
            nonce: 0,
            latest_update: None,
            dispute_deadline: None,
            disputed_by: None,
        };

        self.channels.insert(channel_id.clone(), channel);
        self.peer_channels.entry(sender_id).or_default().push(channel_id.clone());
        self.peer_channels.entry(receiver_id).or_default().push(channel_id.clone());
        self.total_locked += deposit;

        Ok(self.channels.get(&channel_id).expect("just inserted"))
    }

    pub fn pay(&mut self, channel_id: &str, amount: f64, sender_id: &str, now: DateTime<Utc>) -> Result<PaymentUpdate, ChannelError> {
        let channel = self.channels.get_mut(channel_id).ok_or_else(|| ChannelError::NotFound(channel_id.to_string()))?;
        if !channel.is_active() {
            return Err(ChannelError::NotActive);
        }
        if channel.is_expired(now) {
            return Err(ChannelError::Expired);
        }
        if sender_id != channel.sender_id {
            return Err(ChannelError::NotSender);
        }
        if amount <= 0.0 {
            return Err(ChannelError::NonPositiveAmount);
        }
        if amount > channel.sender_balance {
            return Err(ChannelError::InsufficientBalance);
        }

        channel.sender_balance -= amount;
        channel.receiver_balance += amount;
        channel.nonce += 1;

        let update = PaymentUpdate {
            channel_id: channel_id.to_string(),
            nonce: channel.nonce,
            sender_balance: channel.sender_balance,
            receiver_balance: channel.receiver_balance,
            timestamp: now,
            sender_signature: String::new(),
            receiver_signature: String::new(),
        };
        channel.latest_update = Some(update.clone());

        Ok(update)
    }

    pub fn close_channel(&mut self, channel_id: &str, closer_id: &str) -> Result<Settlement, ChannelError> {
        let channel = self.channels.get(channel_id).ok_or_else(|| ChannelError::NotFound(channel_id.to_string()))?;
        if channel.state == ChannelState::Closed {
            return Err(ChannelError::AlreadyClosed);
        }
        if closer_id != channel.sender_id && closer_id != channel.receiver_id {
            return Err(ChannelError::NotParticipant);
        }
        self.settle(channel_id)
    }

    pub fn dispute(&mut self, channel_id: &str, disputer_id: &str, update: PaymentUpdate, now: DateTime<Utc>) -> Result<(), ChannelError> {
        let channel = self.channels.get_mut(channel_id).ok_or_else(|| ChannelError::NotFound(channel_id.to_string()))?;
        if disputer_id != channel.sender_id && disputer_id != channel.receiver_id {
            return Err(ChannelError::NotParticipant);
        }
        if channel.state == ChannelState::Closed {
            return Err(ChannelError::AlreadyClosed);
        }
        if update.nonce <= channel.nonce {
            return Err(ChannelError::StaleDispute(update.nonce, channel.nonce));
        }
        if (update.total() - channel.deposit).abs() > BALANCE_EPSILON {
            return Err(ChannelError::BalanceMismatch);
        }

        channel.state = ChannelState::Disputed;
        channel.sender_balance = update.sender_balance;
        channel.receiver_balance = update.receiver_balance;
        channel.nonce = update.nonce;
        channel.dispute_deadline = Some(now + channel.dispute_period);
        channel.disputed_by = Some(disputer_id.to_string());
        channel.latest_update = Some(update);

        warn!(channel_id, disputer_id, "payment channel disputed");
        Ok(())
    }

    /// Settles any disputed channel whose dispute window has elapsed.
    pub fn resolve_disputes(&mut self, now: DateTime<Utc>) -> Vec<Settlement> {
        let due: Vec<String> = self
            .channels
            .values()
            .filter(|c| c.state == ChannelState::Disputed && c.dispute_deadline.is_some_and(|d| now >= d))
            .map(|c| c.channel_id.clone())
            .collect();

        due.into_iter()
            .filter_map(|id| match self.settle(&id) {
                Ok(settlement) => {
                    info!(channel_id = %id, "disputed channel settled");
                    Some(settlement)
                }
                Err(_) => None,
            })
            .collect()
    }

    fn settle(&mut self, channel_id: &str) -> Result<Settlement, ChannelError> {
        let channel = self.channels.get_mut(channel_id).ok_or_else(|| ChannelError::NotFound(channel_id.to_string()))?;

        let fee = channel.receiver_balance * self.config.settlement_fee_fraction;
        let receiver_payout = channel.receiver_balance - fee;
        let sender_refund = channel.sender_balance;
        let total_paid = channel.total_paid();

        let settlement = Settlement {
            channel_id: channel.channel_id.clone(),
            sender_id: channel.sender_id.clone(),
            receiver_id: channel.receiver_id.clone(),
            sender_refund,
            receiver_payout,
            fee,
            nonce: channel.nonce,
            total_paid,
        };

        channel.state = ChannelState::Closed;
        self.total_locked -= channel.deposit;
        self.total_settled += total_paid;
        self.total_fees += fee;

        Ok(settlement)
    }

    pub fn get_channel(&self, channel_id: &str) -> Option<&PaymentChannel> {
        self.channels.get(channel_id)
    }

    pub fn get_peer_channels(&self, peer_id: &str, active_only: bool) -> Vec<&PaymentChannel> {
        self.peer_channels
            .get(peer_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.channels.get(id))
            .filter(|c| !active_only || c.is_active())
            .collect()
    }

    pub fn get_channel_between(&self, sender_id: &str, receiver_id: &str) -> Option<&PaymentChannel> {
        self.get_peer_channels(sender_id, true).into_iter().find(|c| c.receiver_id == receiver_id)
    }

    pub fn cleanup_expired(&mut self, now: DateTime<Utc>) -> usize {
        let expired: Vec<String> = self
            .channels
            .values()
            .filter(|c| c.is_active() && c.is_expired(now))
            .map(|c| c.channel_id.clone())
            .collect();
        let count = expired.len();
        for id in expired {
            let _ = self.settle(&id);
        }
        count
    }

    pub fn stats(&self) -> Value {
        serde_json::json!({
            "total_channels": self.channels.len(),
            "active_channels": self.active_channel_count(),
            "total_locked": self.total_locked,
            "total_settled": self.total_settled,
            "total_fees": self.total_fees,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(seconds: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(seconds, 0).unwrap()
    }

    #[test]
    fn open_pay_and_cooperative_close() {
        let mut mgr = PaymentChannelManager::new(ChannelConfig::default());
        mgr.open_channel("c1".into(), "alice".into(), "bob".into(), 100.0, None, at(0)).unwrap();
        mgr.pay("c1", 30.0, "alice", at(1)).unwrap();

        let settlement = mgr.close_channel("c1", "bob").unwrap();
        assert!((settlement.receiver_payout - (30.0 - 30.0 * 0.001)).abs() < 1e-9);
        assert!((settlement.sender_refund - 70.0).abs() < 1e-9);
        assert_eq!(mgr.get_channel("c1").unwrap().state, ChannelState::Closed);
    }

    #[test]
    fn only_sender_can_pay() {
        let mut mgr = PaymentChannelManager::new(ChannelConfig::default());
        mgr.open_channel("c1".into(), "alice".into(), "bob".into(), 100.0, None, at(0)).unwrap();
        let err = mgr.pay("c1", 10.0, "bob", at(1)).unwrap_err();
        assert_eq!(err, ChannelError::NotSender);
    }

    #[test]
    fn dispute_requires_higher_nonce_and_matching_total() {
        let mut mgr = PaymentChannelManager::new(ChannelConfig::default());
        mgr.open_channel("c1".into(), "alice".into(), "bob".into(), 100.0, None, at(0)).unwrap();
        mgr.pay("c1", 10.0, "alice", at(1)).unwrap();

        let stale = PaymentUpdate {
            channel_id: "c1".into(),
            nonce: 1,
            sender_balance: 90.0,
            receiver_balance: 10.0,
            timestamp: at(2),
            sender_signature: String::new(),
            receiver_signature: String::new(),
        };
        assert!(mgr.dispute("c1", "bob", stale, at(2)).is_err());

        let fresh = PaymentUpdate {
            channel_id: "c1".into(),
            nonce: 2,
            sender_balance: 80.0,
            receiver_balance: 20.0,
            timestamp: at(2),
            sender_signature: String::new(),
            receiver_signature: String::new(),
        };
        mgr.dispute("c1", "bob", fresh, at(2)).unwrap();
        assert_eq!(mgr.get_channel("c1").unwrap().state, ChannelState::Disputed);
    }

    #[test]
    fn dispute_resolves_after_window_elapses() {
        let mut mgr = PaymentChannelManager::new(ChannelConfig {
            dispute_period: Duration::seconds(10),
            ..Default::default()
        });
        mgr.open_channel("c1".into(), "alice".into(), "bob".into(), 100.0, None, at(0)).unwrap();
        let update = PaymentUpdate {
            channel_id: "c1".into(),
            nonce: 5,
            sender_balance: 60.0,
            receiver_balance: 40.0,
            timestamp: at(1),
            sender_signature: String::new(),
            receiver_signature: String::new(),
        };
        mgr.dispute("c1", "alice", update, at(1)).unwrap();

        assert!(mgr.resolve_disputes(at(5)).is_empty());
        let settled = mgr.resolve_disputes(at(12));
        assert_eq!(settled.len(), 1);
        assert_eq!(mgr.get_channel("c1").unwrap().state, ChannelState::Closed);
    }

    #[test]
    fn deposit_bounds_enforced() {
        let mut mgr = PaymentChannelManager::new(ChannelConfig::default());
        assert!(mgr.open_channel("c1".into(), "a".into(), "b".into(), 0.1, None, at(0)).is_err());
        assert!(mgr.open_channel("c2".into(), "a".into(), "b".into(), 50_000.0, None, at(0)).is_err());
    }
}
