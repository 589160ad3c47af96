//! Integration / block assembly (`spec.md` §4.Q): the block-production
//! loop that ties every other component into one logical state machine.
//!
//! Grounded on `original_source`'s top-level wiring (no single file owns
//! this in the Python reference — each consensus/model module is
//! instantiated and driven by the node layer) plus the teacher's
//! single-writer-over-shared-state pattern used throughout `blockchain/*`
//! (a struct owning the mutable state, `parking_lot` guarding concurrent
//! access at the node boundary). [`Engine`] is the single-writer owner;
//! [`SharedEngine`] is the thin `parking_lot::RwLock` wrapper a node uses
//! so concurrent readers (gossip fan-out, RPC queries) never observe a
//! partially-applied mutation, per `spec.md` §5's shared-resource policy.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::bounds::{BoundsValidator, ResourceLimits};
use crate::channels::{ChannelError, PaymentChannelManager};
use crate::coin::{distribute_block_reward, BalanceTracker, ContributorRole, ContributorWork, TransferTransaction};
use crate::commit_reveal::{Commitment, CommitRevealError, CommitRevealManager, Reveal};
use crate::config::Config;
use crate::consensus::{ConsensusError, ProofOfOptimization};
use crate::domain::Domain;
use crate::dynamic_quorum::DynamicQuorum;
use crate::fee_market::FeeMarket;
use crate::finality::{ExternalAnchorManager, FinalityManager};
use crate::fork_choice::{ForkChoiceRule, ScoredBlock};
use crate::hashing::sha256_hex;
use crate::incentives::{compute_effective_increment, compute_reward_fraction};
use crate::optimae::{Optimae, OptimaeStatus};
use crate::plugins::{run_verification_plugins, InferencePlugin, SyntheticDataPlugin};
use crate::quorum::QuorumManager;
use crate::reputation::{reputation_factor, ReputationTracker};
use crate::seeds::DeterministicSeedPolicy;
use crate::task::{Task, TaskQueue, TaskType, DEADLINE_EXCEEDED};
use crate::transaction::{Transaction, TxType};
use crate::weights::VerifiedUtilityWeights;

use crate::block::Block;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown domain: {0}")]
    UnknownDomain(String),
    #[error("unknown optimae: {0}")]
    UnknownOptimae(String),
    #[error(transparent)]
    CommitReveal(#[from] CommitRevealError),
    #[error(transparent)]
    Consensus(#[from] ConsensusError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("{0}")]
    Validation(String),
}

impl From<String> for EngineError {
    fn from(reason: String) -> Self {
        EngineError::Validation(reason)
    }
}

/// The single logical owner of all consensus state: chain, mempool,
/// quorum tables, reputation, balances, channels, and difficulty
/// (`spec.md` §5 "Shared-resource policy").
pub struct Engine {
    config: Config,
    domains: HashMap<String, Domain>,
    optimae: HashMap<String, Optimae>,
    commit_reveal: CommitRevealManager,
    seed_policy: DeterministicSeedPolicy,
    bounds: BoundsValidator,
    resource_limits: ResourceLimits,
    quorum: QuorumManager,
    dynamic_quorum: DynamicQuorum,
    reputation: ReputationTracker,
    weights: VerifiedUtilityWeights,
    poo: ProofOfOptimization,
    fork_choice: ForkChoiceRule,
    finality: FinalityManager,
    anchors: ExternalAnchorManager,
    balances: BalanceTracker,
    fee_market: FeeMarket,
    channels: PaymentChannelManager,
    tasks: TaskQueue,
    blocks: Vec<Block>,
    pending_contributors: Vec<ContributorWork>,
    blocks_since_weight_reset: u64,
}

impl Engine {
    pub fn new(config: Config, generator_id: &str, now: DateTime<Utc>) -> Self {
        let genesis = Block::genesis(generator_id);
        let finality = FinalityManager::new(config.confirmation_depth);
        let anchors = ExternalAnchorManager::new(config.anchor_interval);
        Self {
            poo: ProofOfOptimization::new(config.target_block_time, 1.0, config.epoch_length, now),
            commit_reveal: CommitRevealManager::new(chrono::Duration::hours(24)),
            seed_policy: DeterministicSeedPolicy::new(false),
            bounds: BoundsValidator::new(HashMap::new()),
            resource_limits: ResourceLimits::default(),
            quorum: QuorumManager::new(config.quorum.clone()),
            dynamic_quorum: DynamicQuorum::new(config.dynamic_quorum.clone()),
            reputation: ReputationTracker::new(config.reputation.half_life()),
            weights: VerifiedUtilityWeights::new(config.weights.clone()),
            fork_choice: ForkChoiceRule::new(),
            finality,
            anchors,
            balances: BalanceTracker::new(),
            fee_market: FeeMarket::new(config.fees.clone()),
            channels: PaymentChannelManager::new(config.channels.clone()),
            tasks: TaskQueue::new(),
            domains: HashMap::new(),
            optimae: HashMap::new(),
            blocks: vec![genesis],
            pending_contributors: Vec::new(),
            blocks_since_weight_reset: 0,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn chain_tip(&self) -> &Block {
        self.blocks.last().expect("genesis is always present")
    }

    pub fn chain_height(&self) -> u64 {
        self.chain_tip().header.index
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn register_domain(&mut self, domain: Domain) {
        self.weights
            .register_domain(&domain.id, domain.weight, domain.supports_synthetic_data());
        self.domains.insert(domain.id.clone(), domain);
    }

    pub fn domain(&self, domain_id: &str) -> Option<&Domain> {
        self.domains.get(domain_id)
    }

    pub fn balances(&self) -> &BalanceTracker {
        &self.balances
    }

    pub fn channels(&self) -> &PaymentChannelManager {
        &self.channels
    }

    pub fn channels_mut(&mut self) -> &mut PaymentChannelManager {
        &mut self.channels
    }

    pub fn fee_market(&self) -> &FeeMarket {
        &self.fee_market
    }

    pub fn weights(&self) -> &VerifiedUtilityWeights {
        &self.weights
    }

    pub fn fee_market_mut(&mut self) -> &mut FeeMarket {
        &mut self.fee_market
    }

    pub fn tasks_mut(&mut self) -> &mut TaskQueue {
        &mut self.tasks
    }

    pub fn reputation_of(&self, peer_id: &str, now: DateTime<Utc>) -> f64 {
        self.reputation.get_score(peer_id, now)
    }

    // ---- B/D/C: commit -> reveal ----

    pub fn submit_commitment(&mut self, commitment: Commitment) -> Result<(), EngineError> {
        self.commit_reveal.add_commitment(commitment)?;
        Ok(())
    }

    /// Processes a reveal, validates bounds/resource limits, and opens a
    /// verification task. Returns the freshly revealed [`Optimae`].
    pub fn submit_reveal(
        &mut self,
        reveal: Reveal,
        resources: Option<&Map<String, Value>>,
        eligible_evaluators: &[String],
        now: DateTime<Utc>,
    ) -> Result<Optimae, EngineError> {
        self.commit_reveal.process_reveal(&reveal, now)?;

        let domain = self
            .domains
            .get(&reveal.domain_id)
            .ok_or_else(|| EngineError::UnknownDomain(reveal.domain_id.clone()))?
            .clone();

        self.bounds.validate(&reveal.parameters).map_err(EngineError::Validation)?;
        if let Some(resources) = resources {
            self.bounds
                .validate_resource_limits(resources, &self.resource_limits)
                .map_err(EngineError::Validation)?;
        }

        let mut optimae = Optimae::new(
            reveal.domain_id.clone(),
            reveal.optimizer_id.clone(),
            reveal.parameters.clone(),
            reveal.reported_performance,
            now,
        );
        optimae.status = OptimaeStatus::Revealed;
        optimae.commitment_hash = reveal.commitment_hash.clone();

        let announce_tx = Transaction::new(
            TxType::OptimaeAnnounced,
            Some(domain.id.clone()),
            reveal.optimizer_id.clone(),
            json!({ "optimae_id": optimae.id, "reported_performance": reveal.reported_performance }),
            now,
        );
        self.poo.record_transaction(announce_tx);

        let selected = self.quorum.select_evaluators(
            &optimae.id,
            &domain.id,
            &reveal.optimizer_id,
            reveal.reported_performance,
            eligible_evaluators,
            &self.chain_tip().hash,
        );
        optimae.status = OptimaeStatus::UnderVerification;

        let deadline = now + chrono::Duration::seconds(self.quorum.config().max_wait_seconds as i64);
        let mut task = Task::new(
            TaskType::OptimaeVerification,
            domain.id.clone(),
            reveal.optimizer_id.clone(),
            reveal.parameters.clone(),
            now,
            deadline,
        );
        task.optimae_id = Some(optimae.id.clone());
        task.reported_performance = Some(reveal.reported_performance);
        self.tasks.add(task);

        let stake = self.fee_market.get_suggested_fee("high").optimae_stake;
        self.fee_market.stake_for_optimae(&optimae.id, stake);

        info!(optimae_id = %optimae.id, evaluators = selected.len(), stake, "optimae revealed, quorum selected");
        self.optimae.insert(optimae.id.clone(), optimae.clone());
        Ok(optimae)
    }

    /// A per-evaluator synthetic-data seed for this optimae, unpredictable
    /// to the optimizer until evaluator selection fixes both the chain tip
    /// and the evaluator set (`spec.md` §4.C).
    pub fn synthetic_seed_for(&self, optimae_id: &str, domain_id: &str, evaluator_id: &str) -> Result<u32, EngineError> {
        let optimae = self
            .optimae
            .get(optimae_id)
            .ok_or_else(|| EngineError::UnknownOptimae(optimae_id.to_string()))?;
        Ok(self.seed_policy.seed_for_synthetic_data(
            &optimae.commitment_hash,
            domain_id,
            evaluator_id,
            &self.chain_tip().hash,
        ))
    }

    // ---- F: quorum vote intake + decision ----

    pub fn submit_vote(
        &mut self,
        optimae_id: &str,
        evaluator_id: &str,
        verified_performance: f64,
        used_synthetic: bool,
        synthetic_data_hash: String,
    ) -> bool {
        self.quorum
            .add_vote(optimae_id, evaluator_id, verified_performance, used_synthetic, synthetic_data_hash)
            .is_some()
    }

    /// Marks the verification task tracking `optimae_id` as completed and
    /// records the `task_completed` transaction the VUW demand signal
    /// (`spec.md` §4.H) reads back out of the chain.
    fn complete_verification_task(
        &mut self,
        optimae_id: &str,
        domain_id: &str,
        verified_performance: Option<f64>,
        now: DateTime<Utc>,
    ) {
        let Some(task) = self.tasks.complete_verification(optimae_id, verified_performance, None, now) else {
            return;
        };
        let tx = Transaction::new(
            TxType::TaskCompleted,
            Some(domain_id.to_string()),
            task.requester_id.clone(),
            json!({ "task_id": task.id, "task_type": "optimae_verification", "optimae_id": optimae_id }),
            now,
        );
        self.poo.record_transaction(tx);
    }

    /// Decides the quorum for `optimae_id`, applies the incentive model
    /// (E), reputation (G) and VUW inputs, and — if accepted — records
    /// the effective increment into the Proof-of-Optimization accumulator
    /// (J). Mirrors `spec.md` §5's per-block ordering item (1): reputation
    /// and VUW are updated at the moment the event is known, not batched.
    pub fn finalize_optimae(&mut self, optimae_id: &str, now: DateTime<Utc>) -> Result<bool, EngineError> {
        let result = self.quorum.evaluate_quorum(optimae_id);
        let state = self
            .quorum
            .get_state(optimae_id)
            .ok_or_else(|| EngineError::UnknownOptimae(optimae_id.to_string()))?
            .clone();

        self.complete_verification_task(optimae_id, &state.domain_id, result.median_performance, now);

        let optimae = self
            .optimae
            .get_mut(optimae_id)
            .ok_or_else(|| EngineError::UnknownOptimae(optimae_id.to_string()))?;

        for vote in &state.votes {
            let agreed = result.agreements.get(&vote.evaluator_id).copied().unwrap_or(false);
            self.reputation.record_evaluation_completed(&vote.evaluator_id, agreed, now);
            self.pending_contributors.push(ContributorWork {
                peer_id: vote.evaluator_id.clone(),
                role: ContributorRole::Evaluator,
                domain_id: state.domain_id.clone(),
                effective_increment: 0.0,
                reward_fraction: 0.0,
                agreed_with_quorum: agreed,
                evaluations_completed: 1,
            });
            let served = Transaction::new(
                TxType::EvaluationServed,
                Some(state.domain_id.clone()),
                vote.evaluator_id.clone(),
                json!({ "optimae_id": optimae_id, "agreed": agreed }),
                now,
            );
            self.poo.record_transaction(served);
        }

        if !result.accepted {
            optimae.status = OptimaeStatus::Rejected;
            self.reputation.record_optimae_rejected(&optimae.optimizer_id, now);
            let remainder = self.fee_market.resolve_optimae(optimae_id, false);
            if remainder > 0.0 {
                self.balances.credit(&state.optimizer_id, remainder);
            }
            let tx = Transaction::new(
                TxType::OptimaeRejected,
                Some(state.domain_id.clone()),
                state.optimizer_id.clone(),
                json!({ "optimae_id": optimae_id, "reason": result.reason }),
                now,
            );
            self.poo.record_transaction(tx);
            warn!(optimae_id, reason = %result.reason, "optimae rejected");
            self.quorum.cleanup_decided();
            return Ok(false);
        }

        let verified = result.median_performance.expect("accepted implies a median");
        optimae.verified_performance = Some(verified);
        optimae.status = OptimaeStatus::Accepted;

        let domain = self
            .domains
            .get_mut(&state.domain_id)
            .ok_or_else(|| EngineError::UnknownDomain(state.domain_id.clone()))?;

        let previous_best = domain.current_best_performance;
        let raw_increment = match previous_best {
            Some(best) if domain.higher_is_better => (verified - best).max(0.0),
            Some(best) => (best - verified).max(0.0),
            None => verified.abs(),
        };
        domain.consider_new_best(verified);
        optimae.performance_increment = raw_increment;

        let mut incentive_cfg = self.config.incentives.clone();
        incentive_cfg.higher_is_better = domain.higher_is_better;
        let phi = compute_reward_fraction(state.reported_performance, verified, &incentive_cfg);

        let weights = self.weights.compute_weights();
        let domain_weight = weights.get(&state.domain_id).copied().unwrap_or(domain.weight);
        let rep = self.reputation.get_score(&state.optimizer_id, now);
        let rep_factor = reputation_factor(rep);

        let effective_increment = compute_effective_increment(raw_increment, domain_weight, rep_factor, phi);

        self.reputation.record_optimae_accepted(&state.optimizer_id, now);
        self.pending_contributors.push(ContributorWork {
            peer_id: state.optimizer_id.clone(),
            role: ContributorRole::Optimizer,
            domain_id: state.domain_id.clone(),
            effective_increment,
            reward_fraction: 1.0,
            agreed_with_quorum: true,
            evaluations_completed: 0,
        });

        let refund = self.fee_market.resolve_optimae(optimae_id, true);
        if refund > 0.0 {
            self.balances.credit(&state.optimizer_id, refund);
        }

        // `ProofOfOptimization::record_optimae` takes `performance_increment`
        // as-is; the VUW-derived `effective_increment` already folds in the
        // dynamic domain weight, so it goes straight into the accumulator.
        let domain_snapshot = domain.clone();
        let mut optimae_for_poo = optimae.clone();
        optimae_for_poo.performance_increment = effective_increment;
        self.poo.record_optimae(&optimae_for_poo, &domain_snapshot, now)?;

        info!(optimae_id, effective_increment, "optimae accepted");
        self.quorum.cleanup_decided();
        Ok(true)
    }

    // ---- task lifecycle: inference requests ----

    /// Queues an inference request against `domain_id`'s deployed model,
    /// served by whichever evaluator claims it (`spec.md` §6's
    /// `task_created`). Verification tasks are created internally by
    /// [`Self::submit_reveal`]; this is the public entry point for the
    /// other task type.
    pub fn request_inference(
        &mut self,
        domain_id: &str,
        requester_id: &str,
        parameters: Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<Task, EngineError> {
        if !self.domains.contains_key(domain_id) {
            return Err(EngineError::UnknownDomain(domain_id.to_string()));
        }
        let deadline = now + chrono::Duration::seconds(self.quorum.config().max_wait_seconds as i64);
        let task = Task::new(
            TaskType::InferenceRequest,
            domain_id.to_string(),
            requester_id.to_string(),
            parameters,
            now,
            deadline,
        );
        let tx = Transaction::new(
            TxType::TaskCreated,
            Some(domain_id.to_string()),
            requester_id.to_string(),
            json!({ "task_id": task.id, "task_type": "inference_request" }),
            now,
        );
        self.poo.record_transaction(tx);
        self.tasks.add(task.clone());
        Ok(task)
    }

    pub fn claim_task(&mut self, task_id: &str, evaluator_id: &str, now: DateTime<Utc>) -> Result<(), EngineError> {
        let domain_id = self
            .tasks
            .claim(task_id, evaluator_id.to_string(), now)
            .map(|t| t.domain_id.clone())
            .ok_or_else(|| EngineError::Validation(format!("task {task_id} is not pending")))?;
        let tx = Transaction::new(
            TxType::TaskClaimed,
            Some(domain_id),
            evaluator_id.to_string(),
            json!({ "task_id": task_id }),
            now,
        );
        self.poo.record_transaction(tx);
        Ok(())
    }

    /// Records an evaluator's inference result, completing the task and
    /// emitting the `task_completed` transaction the VUW demand signal
    /// (`spec.md` §4.H) reads back.
    pub fn complete_inference(
        &mut self,
        task_id: &str,
        evaluator_id: &str,
        result: Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let domain_id = self
            .tasks
            .complete(task_id, None, Some(result.clone()), now)
            .map(|t| t.domain_id.clone())
            .ok_or_else(|| EngineError::Validation(format!("task {task_id} is not claimed")))?;
        let tx = Transaction::new(
            TxType::TaskCompleted,
            Some(domain_id),
            evaluator_id.to_string(),
            json!({ "task_id": task_id, "task_type": "inference_request", "result": result }),
            now,
        );
        self.poo.record_transaction(tx);
        Ok(())
    }

    /// Sweeps overdue tasks (verification or inference) into `expired`,
    /// marking each with reason `"deadline_exceeded"` (`spec.md` §5).
    pub fn expire_overdue_tasks(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let expired = self.tasks.expire_overdue(now);
        for task_id in &expired {
            if let Some(task) = self.tasks.get(task_id) {
                let tx = Transaction::new(
                    TxType::TaskFailed,
                    Some(task.domain_id.clone()),
                    task.requester_id.clone(),
                    json!({ "task_id": task_id, "reason": DEADLINE_EXCEEDED }),
                    now,
                );
                self.poo.record_transaction(tx);
            }
        }
        expired
    }

    // ---- N: mempool pass-through ----

    /// Validates a fee, applies rate limiting, and queues `tx` for the
    /// next block's fee-priority selection.
    pub fn submit_mempool_transaction(&mut self, tx: Transaction, fee: f64, is_optimae: bool, now: DateTime<Utc>) -> Result<(), EngineError> {
        let peer_id = tx.peer_id.clone();
        let payload = serde_json::to_value(&tx).unwrap_or(Value::Null);
        self.fee_market
            .add_to_mempool(tx.id.clone(), fee, payload, &peer_id, is_optimae, now)
            .map_err(EngineError::Validation)
    }

    pub fn record_transfer(&mut self, transfer: TransferTransaction, now: DateTime<Utc>) -> Result<(), EngineError> {
        self.balances.apply_transfer(&transfer).map_err(EngineError::Validation)?;
        let tx = Transaction::new(
            TxType::Transfer,
            None,
            transfer.sender.clone(),
            serde_json::to_value(&transfer).unwrap_or(Value::Null),
            now,
        );
        self.poo.record_transaction(tx);
        Ok(())
    }

    // ---- Q: block assembly ----

    pub fn can_generate_block(&self) -> bool {
        self.poo.can_generate_block()
    }

    /// Runs the §5 per-block ordering: pulls fee-priority mempool
    /// transactions, computes the coinbase (2), seals the block (3),
    /// advances difficulty (inside `generate_block`, item 4), attempts a
    /// finality checkpoint (5), and maybe emits an external anchor (6).
    pub fn produce_block(&mut self, generator_id: &str, now: DateTime<Utc>) -> Option<Block> {
        if !self.can_generate_block() {
            return None;
        }

        // Mempool entries are pre-formed transactions (already paid a fee to
        // queue); re-hydrate rather than re-wrapping so the original tx_type
        // and id survive into the block.
        let mempool_txs = self.fee_market.get_block_transactions(None);
        let tx_fees: f64 = mempool_txs.iter().map(|(_, fee, _)| fee).sum();
        for (tx_id, _fee, payload) in &mempool_txs {
            match serde_json::from_value::<Transaction>(payload.clone()) {
                Ok(tx) => self.poo.record_transaction(tx),
                Err(e) => warn!(tx_id, error = %e, "dropping malformed mempool entry"),
            }
        }

        let contributors = std::mem::take(&mut self.pending_contributors);
        let previous_index = self.chain_tip().header.index;
        let coinbase = distribute_block_reward(previous_index + 1, generator_id, &contributors, tx_fees, now);
        self.balances.apply_coinbase(&coinbase);

        let coinbase_tx = Transaction::new(
            TxType::Coinbase,
            None,
            generator_id.to_string(),
            json!({ "outputs": coinbase.outputs, "block_reward": coinbase.block_reward }),
            now,
        );
        self.poo.record_transaction(coinbase_tx);

        let previous = self.chain_tip().clone();
        let block = self.poo.generate_block(&previous, generator_id, now)?;

        self.weights.update_from_block(&block.transactions);
        self.blocks_since_weight_reset += 1;
        if self.blocks_since_weight_reset >= self.config.weights.lookback_blocks {
            self.weights.reset_stats();
            self.blocks_since_weight_reset = 0;
        }
        self.fee_market.adjust_base_fee(block.transactions.len() as u64);
        self.blocks.push(block.clone());

        let hash_at_depth = self
            .blocks
            .iter()
            .find(|b| b.header.index + self.config.confirmation_depth == block.header.index)
            .map(|b| b.hash.clone());
        self.finality.on_new_block(block.header.index, hash_at_depth.as_deref(), now);

        if self.anchors.should_anchor(block.header.index) {
            let hashes: Vec<String> = self.blocks.iter().map(|b| b.hash.clone()).collect();
            let state_hash = ExternalAnchorManager::compute_chain_state_hash(&hashes);
            self.anchors.create_anchor(block.header.index, block.hash.clone(), state_hash, now);
            info!(height = block.header.index, "external anchor created");
        }

        info!(height = block.header.index, hash = %block.hash, "block sealed");
        Some(block)
    }

    // ---- K: fork choice ----

    /// Scores a candidate fork against the current finality state and
    /// returns the best-known candidate tip hash, if any.
    pub fn evaluate_fork(&mut self, tip_hash: &str, blocks: &[ScoredBlock<'_>]) -> Option<String> {
        let height = blocks.last().map(|b| b.height).unwrap_or(0);
        self.fork_choice.score_chain(
            tip_hash,
            height,
            blocks,
            self.finality.finalized_height(),
            self.finality.latest_checkpoint().map(|c| c.block_hash.as_str()),
        );
        self.fork_choice.select_best().map(|s| s.tip_hash.clone())
    }

    // ---- P: dynamic quorum sizing consumer ----

    pub fn recommended_quorum_size(&self, optimizer_id: &str, active_evaluator_count: i64, domain_activity_level: f64, now: DateTime<Utc>) -> i64 {
        let rep = self.reputation.get_score(optimizer_id, now);
        self.dynamic_quorum.compute_quorum_size(rep, active_evaluator_count, domain_activity_level)
    }

    pub fn chain_tip_seed_hash(&self) -> String {
        sha256_hex(self.chain_tip().hash.as_bytes())
    }
}

/// Thread-safe handle a node wraps around [`Engine`]: concurrent readers
/// (RPC queries, gossip fan-out) take a read guard and never observe a
/// partial mutation; writers serialize through a single write guard.
/// No lock is ever held across a plugin or network I/O call — callers
/// resolve plugin results first, then take the write guard just to apply
/// them (`spec.md` §5).
#[derive(Clone)]
pub struct SharedEngine(Arc<RwLock<Engine>>);

impl SharedEngine {
    pub fn new(engine: Engine) -> Self {
        Self(Arc::new(RwLock::new(engine)))
    }

    pub fn read(&self) -> parking_lot::RwLockReadGuard<'_, Engine> {
        self.0.read()
    }

    pub fn write(&self) -> parking_lot::RwLockWriteGuard<'_, Engine> {
        self.0.write()
    }

    /// Serves one evaluator's verification vote for `optimae_id`: reads
    /// the evaluator's synthetic-data seed under a read guard, runs the
    /// synthetic-data and inference plugins off the lock bounded by
    /// `deadline`, then takes a write guard only to submit the resulting
    /// vote. Returns whether that vote completed the quorum.
    pub async fn serve_verification(
        &self,
        optimae_id: &str,
        domain_id: &str,
        evaluator_id: &str,
        parameters: Map<String, Value>,
        synthetic: Arc<dyn SyntheticDataPlugin>,
        inference: Arc<dyn InferencePlugin>,
        deadline: Duration,
    ) -> Result<bool, EngineError> {
        let seed = self.read().synthetic_seed_for(optimae_id, domain_id, evaluator_id)?;

        let (synthetic_hash, score) = run_verification_plugins(synthetic, inference, seed, parameters, deadline)
            .await
            .map_err(|e| EngineError::Validation(e.to_string()))?;

        Ok(self.write().submit_vote(optimae_id, evaluator_id, score, true, synthetic_hash))
    }
}
