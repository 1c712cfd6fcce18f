//! Micropayment channel ledger.
//!
//! Tracks one payment account per (caller, channel) pair: a monotonically
//! increasing nonce, the caller's remaining credit and the counterparty's
//! earned balance. Proofs arrive as `x402` headers on paid endpoints; a proof
//! that verifies advances the channel, anything else is rejected with a
//! distinct reason and leaves the channel untouched.
//!
//! Amounts are integer base units (micro-USD). The signature check is a
//! format-only placeholder; real verification over a canonical
//! (channel, nonce, balances) message has to land before this ledger can be
//! trusted with real funds.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Credit seeded into a channel the first time a caller shows up.
pub const INITIAL_CHANNEL_CREDIT: u64 = 10_000_000;

const HEADER_PREFIX: &str = "x402";

/// Price per logical endpoint, in base units. Requests below the mapped
/// price are rejected regardless of otherwise-valid proofs.
const PRICE_TABLE: &[(&str, u64)] = &[
    ("agent-insights", 10_000),
    ("market-report", 50_000),
    ("position-detail", 25_000),
];

pub fn price_for_endpoint(endpoint: &str) -> Option<u64> {
    PRICE_TABLE
        .iter()
        .find(|(name, _)| *name == endpoint)
        .map(|(_, price)| *price)
}

/// Inbound payment proof, one per paid request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentProof {
    pub channel_id: String,
    pub amount: u64,
    pub nonce: u64,
    pub new_balance: u64,
    pub signature: String,
    pub caller: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelState {
    pub channel_id: String,
    pub nonce: u64,
    pub caller_balance: u64,
    pub counterparty_balance: u64,
    pub last_update: DateTime<Utc>,
    pub last_signature: Option<String>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PaymentError {
    #[error("amount {paid} below required {required}")]
    AmountTooLow { required: u64, paid: u64 },
    #[error("stale nonce {proof}, channel is at {current}")]
    StaleNonce { current: u64, proof: u64 },
    #[error("insufficient balance {balance} for amount {amount}")]
    InsufficientBalance { balance: u64, amount: u64 },
    #[error("balance mismatch: expected {expected}, proof declares {declared}")]
    BalanceMismatch { expected: u64, declared: u64 },
    #[error("malformed signature")]
    MalformedSignature,
}

/// In-memory ledger. No persistence and no expiry; a restart forfeits
/// channel balances (demo-scope, matches the fee accumulator).
#[derive(Default)]
pub struct ChannelLedger {
    channels: RwLock<HashMap<String, ChannelState>>,
}

impl ChannelLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(caller: &str, channel_id: &str) -> String {
        format!("{}:{}", caller.to_lowercase(), channel_id)
    }

    /// Seed a channel with the initial credit. Idempotent: an existing
    /// channel is returned unchanged.
    pub fn create_channel(&self, caller: &str, channel_id: &str) -> ChannelState {
        let mut channels = self.channels.write();
        channels
            .entry(Self::key(caller, channel_id))
            .or_insert_with(|| ChannelState {
                channel_id: channel_id.to_string(),
                nonce: 0,
                caller_balance: INITIAL_CHANNEL_CREDIT,
                counterparty_balance: 0,
                last_update: Utc::now(),
                last_signature: None,
            })
            .clone()
    }

    /// Verify a payment proof against `required_amount` and, on success,
    /// advance the channel. Rejection leaves channel state untouched.
    pub fn verify_payment(
        &self,
        proof: &PaymentProof,
        required_amount: u64,
    ) -> Result<ChannelState, PaymentError> {
        if proof.signature.trim().is_empty() {
            return Err(PaymentError::MalformedSignature);
        }
        if proof.amount < required_amount {
            return Err(PaymentError::AmountTooLow {
                required: required_amount,
                paid: proof.amount,
            });
        }

        let key = Self::key(&proof.caller, &proof.channel_id);
        let mut channels = self.channels.write();
        let channel = channels.entry(key).or_insert_with(|| ChannelState {
            channel_id: proof.channel_id.clone(),
            nonce: 0,
            caller_balance: INITIAL_CHANNEL_CREDIT,
            counterparty_balance: 0,
            last_update: Utc::now(),
            last_signature: None,
        });

        if proof.nonce <= channel.nonce {
            return Err(PaymentError::StaleNonce {
                current: channel.nonce,
                proof: proof.nonce,
            });
        }
        if channel.caller_balance < proof.amount {
            return Err(PaymentError::InsufficientBalance {
                balance: channel.caller_balance,
                amount: proof.amount,
            });
        }
        let expected = channel.caller_balance - proof.amount;
        if proof.new_balance != expected {
            return Err(PaymentError::BalanceMismatch {
                expected,
                declared: proof.new_balance,
            });
        }

        channel.nonce = proof.nonce;
        channel.caller_balance = proof.new_balance;
        channel.counterparty_balance += proof.amount;
        channel.last_update = Utc::now();
        channel.last_signature = Some(proof.signature.clone());
        Ok(channel.clone())
    }

    pub fn channel_state(&self, caller: &str, channel_id: &str) -> Option<ChannelState> {
        self.channels
            .read()
            .get(&Self::key(caller, channel_id))
            .cloned()
    }

    pub fn all_channels(&self) -> Vec<ChannelState> {
        self.channels.read().values().cloned().collect()
    }
}

/// Parse an `x402:<channel>:<amount>:<nonce>:<newBalance>:<sig>:<caller>`
/// header. Any structural violation yields `None`, which callers must treat
/// as "reject the request", not "no payment".
pub fn parse_payment_header(header: &str) -> Option<PaymentProof> {
    let rest = header.strip_prefix(HEADER_PREFIX)?.strip_prefix(':')?;
    let parts: Vec<&str> = rest.split(':').collect();
    if parts.len() != 6 {
        return None;
    }
    let [channel_id, amount, nonce, new_balance, signature, caller] =
        [parts[0], parts[1], parts[2], parts[3], parts[4], parts[5]];
    if channel_id.is_empty() || signature.is_empty() || caller.is_empty() {
        return None;
    }
    Some(PaymentProof {
        channel_id: channel_id.to_string(),
        amount: amount.parse().ok()?,
        nonce: nonce.parse().ok()?,
        new_balance: new_balance.parse().ok()?,
        signature: signature.to_string(),
        caller: caller.to_string(),
    })
}

pub fn format_payment_header(proof: &PaymentProof) -> String {
    format!(
        "{}:{}:{}:{}:{}:{}:{}",
        HEADER_PREFIX,
        proof.channel_id,
        proof.amount,
        proof.nonce,
        proof.new_balance,
        proof.signature,
        proof.caller
    )
}
