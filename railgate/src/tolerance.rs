//! Transfer matching for pull rails.
//!
//! Pull rails (on-chain Bitcoin, USDT) have no invoice object upstream: the
//! adapter fetches the transfers that reached a receiving address and asks a
//! [`TransferMatcher`] whether one of them settles a given payment. A transfer
//! settles a payment when it is recent enough, its amount is within
//! [`Tolerance`], and no other payment has already claimed it in the
//! [`UsedTransactions`] set.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::error::{RailError, Result};
use crate::timestamp::UnixTimestamp;

/// Transfers may predate the payment record by this much (clock skew between
/// us and the explorer, or a wallet that broadcast before the page rendered).
pub const CLOCK_SKEW_SECS: u64 = 5 * 60;

/// Unmatched pull-rail payments expire after this long.
pub const PAYMENT_EXPIRY_SECS: u64 = 30 * 60;

/// How far a received amount may deviate from the expected one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tolerance {
    /// Relative deviation in basis points (100 = 1 %), inclusive.
    Relative {
        /// Allowed deviation, 1/10,000ths of the expected amount.
        basis_points: u32,
    },
    /// Absolute deviation in minor units, inclusive.
    Absolute {
        /// Allowed deviation in minor units.
        units: u64,
    },
}

impl Tolerance {
    /// 1 % either way, for bitcoin-denominated rails.
    pub const BITCOIN: Self = Self::Relative { basis_points: 100 };

    /// One cent either way in 6-decimal stablecoin units.
    pub const STABLECOIN: Self = Self::Absolute { units: 10_000 };

    /// No deviation at all.
    pub const EXACT: Self = Self::Absolute { units: 0 };

    /// Whether `received` is close enough to `expected`.
    #[must_use]
    pub fn accepts(&self, expected: u64, received: u64) -> bool {
        let diff = expected.abs_diff(received);
        match *self {
            Self::Relative { basis_points } => {
                u128::from(diff) * 10_000 <= u128::from(expected) * u128::from(basis_points)
            }
            Self::Absolute { units } => diff <= units,
        }
    }
}

/// One incoming transfer as reported by an explorer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    /// Provider transaction id (txid / hash).
    pub transaction_id: String,
    /// Amount in the rail's minor units.
    pub amount: u64,
    /// Block time, or first-seen time for unconfirmed transfers.
    pub timestamp: UnixTimestamp,
    /// Confirmation count if the source reports one.
    pub confirmations: Option<u64>,
}

/// Result of matching a payment against a batch of transfers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    /// A transfer matched and is now claimed by this payment.
    Confirmed(Transfer),
    /// Something arrived in the window, but for the wrong amount.
    Mismatched(Transfer),
    /// Nothing yet.
    Pending,
    /// Nothing arrived before the payment expired.
    Expired,
}

/// Inputs describing the payment being matched.
#[derive(Debug, Clone, Copy)]
pub struct MatchContext<'a> {
    /// Payment that would claim a matching transfer.
    pub payment_id: &'a str,
    /// Expected amount in minor units.
    pub expected: u64,
    /// Transfers older than this (minus skew) are ignored.
    pub since: UnixTimestamp,
    /// Expiry is measured from here.
    pub created_at: UnixTimestamp,
    /// Evaluation time.
    pub now: UnixTimestamp,
}

impl<'a> MatchContext<'a> {
    /// A context whose matching window and expiry both start at `created_at`.
    #[must_use]
    pub const fn new(
        payment_id: &'a str,
        expected: u64,
        created_at: UnixTimestamp,
        now: UnixTimestamp,
    ) -> Self {
        Self {
            payment_id,
            expected,
            since: created_at,
            created_at,
            now,
        }
    }

    /// Starts the matching window earlier than the record, e.g. at the
    /// moment a reused address was first handed out.
    #[must_use]
    pub fn with_window_start(mut self, since: UnixTimestamp) -> Self {
        self.since = since.min(self.created_at);
        self
    }
}

/// Process-lifetime map from transaction id to the payment that claimed it.
#[derive(Debug, Default)]
pub struct UsedTransactions {
    claims: DashMap<String, String>,
}

impl UsedTransactions {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically claims `transaction_id` for `payment_id`.
    ///
    /// Claiming again for the same payment succeeds, so re-polling a confirmed
    /// payment keeps confirming it.
    ///
    /// # Errors
    ///
    /// Returns [`RailError::DoubleCredit`] when another payment holds the claim.
    pub fn claim(&self, transaction_id: &str, payment_id: &str) -> Result<()> {
        match self.claims.entry(transaction_id.to_owned()) {
            Entry::Vacant(slot) => {
                slot.insert(payment_id.to_owned());
                Ok(())
            }
            Entry::Occupied(held) if held.get() == payment_id => Ok(()),
            Entry::Occupied(_) => Err(RailError::DoubleCredit(transaction_id.to_owned())),
        }
    }

    /// Payment holding the claim on `transaction_id`, if any.
    #[must_use]
    pub fn claimant(&self, transaction_id: &str) -> Option<String> {
        self.claims.get(transaction_id).map(|held| held.value().clone())
    }

    fn claimed_by_other(&self, transaction_id: &str, payment_id: &str) -> bool {
        self.claims
            .get(transaction_id)
            .is_some_and(|held| held.value() != payment_id)
    }

    /// Number of claimed transactions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.claims.len()
    }

    /// Whether nothing has been claimed yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }
}

/// Applies tolerance, time window, and anti-replay to incoming transfers.
#[derive(Debug, Clone, Copy)]
pub struct TransferMatcher {
    tolerance: Tolerance,
    skew_secs: u64,
    expiry_secs: u64,
}

impl TransferMatcher {
    /// A matcher with the default skew and expiry.
    #[must_use]
    pub const fn new(tolerance: Tolerance) -> Self {
        Self {
            tolerance,
            skew_secs: CLOCK_SKEW_SECS,
            expiry_secs: PAYMENT_EXPIRY_SECS,
        }
    }

    /// Overrides the expiry.
    #[must_use]
    pub const fn with_expiry_secs(mut self, expiry_secs: u64) -> Self {
        self.expiry_secs = expiry_secs;
        self
    }

    /// The configured tolerance.
    #[must_use]
    pub const fn tolerance(&self) -> Tolerance {
        self.tolerance
    }

    /// Matches and, on success, claims the transfer for `ctx.payment_id`.
    pub fn settle(
        &self,
        transfers: &[Transfer],
        ctx: &MatchContext<'_>,
        used: &UsedTransactions,
    ) -> MatchOutcome {
        self.evaluate(transfers, ctx, used, true)
    }

    /// Same rule as [`settle`](Self::settle) without claiming anything.
    pub fn peek(
        &self,
        transfers: &[Transfer],
        ctx: &MatchContext<'_>,
        used: &UsedTransactions,
    ) -> MatchOutcome {
        self.evaluate(transfers, ctx, used, false)
    }

    fn evaluate(
        &self,
        transfers: &[Transfer],
        ctx: &MatchContext<'_>,
        used: &UsedTransactions,
        claim: bool,
    ) -> MatchOutcome {
        let earliest = ctx.since - self.skew_secs;
        let mut mismatch: Option<&Transfer> = None;

        let candidates = transfers
            .iter()
            .filter(|t| t.amount > 0 && t.timestamp >= earliest)
            .filter(|t| !used.claimed_by_other(&t.transaction_id, ctx.payment_id));

        for transfer in candidates {
            if !self.tolerance.accepts(ctx.expected, transfer.amount) {
                mismatch.get_or_insert(transfer);
                continue;
            }
            if !claim {
                return MatchOutcome::Confirmed(transfer.clone());
            }
            match used.claim(&transfer.transaction_id, ctx.payment_id) {
                Ok(()) => return MatchOutcome::Confirmed(transfer.clone()),
                Err(err) => {
                    tracing::debug!(%err, payment_id = ctx.payment_id, "lost transfer claim race");
                }
            }
        }

        if let Some(transfer) = mismatch {
            return MatchOutcome::Mismatched(transfer.clone());
        }
        if ctx.now.secs_since(ctx.created_at) > self.expiry_secs {
            MatchOutcome::Expired
        } else {
            MatchOutcome::Pending
        }
    }
}
