//! In-memory payment records with secondary indexes.

use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;

use crate::assignment::normalize_identity;
use crate::error::{RailError, Result};
use crate::proto::{PaymentStatus, RailPayload, RailRequest};
use crate::rail::{PaymentMethod, Rail};
use crate::timestamp::UnixTimestamp;

/// One payment as the router tracks it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    /// Caller payment id.
    pub payment_id: String,
    /// Rail serving it.
    pub rail: Rail,
    /// Method requested.
    pub method: PaymentMethod,
    /// Network used.
    pub network: String,
    /// Normalized caller identity.
    pub email: String,
    /// Plan id.
    pub plan: String,
    /// Price in USD.
    pub amount_usd: Decimal,
    /// Lifecycle state.
    pub status: PaymentStatus,
    /// Expected amount in the rail currency.
    pub expected_amount: Decimal,
    /// Rail currency code.
    pub expected_currency: String,
    /// Creation time.
    pub created_at: UnixTimestamp,
    /// Last mutation time.
    pub updated_at: UnixTimestamp,
    /// Settlement time.
    pub confirmed_at: Option<UnixTimestamp>,
    /// Quote expiry.
    pub expires_at: UnixTimestamp,
    /// Settling transaction.
    pub txid: Option<String>,
    /// Last out-of-tolerance amount seen, for operators.
    pub received: Option<String>,
    /// Rail payload.
    pub payload: RailPayload,
}

impl PaymentRecord {
    /// A new pending record for `request` served by `payload`.
    #[must_use]
    pub fn new(request: &RailRequest, payload: RailPayload, now: UnixTimestamp) -> Self {
        let expected = payload.expected_amount();
        Self {
            payment_id: request.payment_id.clone(),
            rail: payload.rail(),
            method: request.method,
            network: request.network.clone(),
            email: normalize_identity(&request.email),
            plan: request.plan.clone(),
            amount_usd: request.amount_usd,
            status: PaymentStatus::Pending,
            expected_amount: expected.amount,
            expected_currency: expected.currency,
            created_at: now,
            updated_at: now,
            confirmed_at: None,
            expires_at: payload.expires_at(),
            txid: None,
            received: None,
            payload,
        }
    }

    /// Invoice id, if the rail has one.
    #[must_use]
    pub fn invoice_id(&self) -> Option<&str> {
        self.payload.invoice_id()
    }

    /// Provider payment id, if the rail has one.
    #[must_use]
    pub fn provider_payment_id(&self) -> Option<&str> {
        self.payload.provider_payment_id()
    }

    /// Receiving address, if the rail has one.
    #[must_use]
    pub fn address(&self) -> Option<&str> {
        self.payload.address()
    }
}

/// Result of [`PaymentRecordStore::transition`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The record moved to the new state.
    Applied(PaymentRecord),
    /// Pending to pending; only the transaction id may have been filled in.
    Unchanged(PaymentRecord),
    /// The record was already terminal and was left alone.
    AlreadyTerminal(PaymentRecord),
}

/// Filter for [`PaymentRecordStore::pending`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PendingFilter {
    /// Only this rail.
    pub rail: Option<Rail>,
    /// Only this method.
    pub method: Option<PaymentMethod>,
}

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<String, PaymentRecord>,
    by_invoice: HashMap<String, String>,
    by_provider: HashMap<String, String>,
    by_address: HashMap<String, String>,
}

impl Inner {
    fn index(&mut self, record: &PaymentRecord) {
        let id = &record.payment_id;
        if let Some(invoice) = record.invoice_id() {
            self.by_invoice.insert(invoice.to_owned(), id.clone());
        }
        if let Some(provider) = record.provider_payment_id() {
            self.by_provider.insert(provider.to_owned(), id.clone());
        }
        if let Some(address) = record.address() {
            self.by_address.insert(address.to_owned(), id.clone());
        }
    }

    fn unindex(&mut self, record: &PaymentRecord) {
        let id = record.payment_id.as_str();
        for (index, key) in [
            (&mut self.by_invoice, record.invoice_id()),
            (&mut self.by_provider, record.provider_payment_id()),
            (&mut self.by_address, record.address()),
        ] {
            if let Some(key) = key
                && index.get(key).is_some_and(|owner| owner == id)
            {
                index.remove(key);
            }
        }
    }

    fn lookup(&self, index: &HashMap<String, String>, key: &str) -> Option<PaymentRecord> {
        index.get(key).and_then(|id| self.records.get(id)).cloned()
    }
}

/// Primary store of payment records, owned by the router.
///
/// Secondary indexes point at the newest record for each invoice, provider
/// payment id, and address. Reused assignments share a correlation id, so an
/// index follows the latest insert.
#[derive(Debug, Default)]
pub struct PaymentRecordStore {
    inner: RwLock<Inner>,
}

impl PaymentRecordStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new record.
    ///
    /// # Errors
    ///
    /// Returns [`RailError::DuplicatePayment`] when the payment id exists.
    pub fn insert(&self, record: PaymentRecord) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.records.contains_key(&record.payment_id) {
            return Err(RailError::DuplicatePayment(record.payment_id));
        }
        inner.index(&record);
        inner.records.insert(record.payment_id.clone(), record);
        Ok(())
    }

    /// Record by payment id.
    #[must_use]
    pub fn get(&self, payment_id: &str) -> Option<PaymentRecord> {
        self.inner.read().records.get(payment_id).cloned()
    }

    /// Whether a record with this id exists.
    #[must_use]
    pub fn contains(&self, payment_id: &str) -> bool {
        self.inner.read().records.contains_key(payment_id)
    }

    /// Newest record for a gateway invoice.
    #[must_use]
    pub fn by_invoice_id(&self, invoice_id: &str) -> Option<PaymentRecord> {
        let inner = self.inner.read();
        inner.lookup(&inner.by_invoice, invoice_id)
    }

    /// Newest record for a processor or checkout id.
    #[must_use]
    pub fn by_provider_payment_id(&self, provider_payment_id: &str) -> Option<PaymentRecord> {
        let inner = self.inner.read();
        inner.lookup(&inner.by_provider, provider_payment_id)
    }

    /// Newest record for a receiving address.
    #[must_use]
    pub fn by_address(&self, address: &str) -> Option<PaymentRecord> {
        let inner = self.inner.read();
        inner.lookup(&inner.by_address, address)
    }

    /// Moves a record to `status`.
    ///
    /// Terminal records never change. A pending-to-pending transition only
    /// records `txid` when one is supplied.
    ///
    /// # Errors
    ///
    /// Returns [`RailError::PaymentNotFound`] for an unknown id.
    pub fn transition(
        &self,
        payment_id: &str,
        status: PaymentStatus,
        txid: Option<&str>,
        now: UnixTimestamp,
    ) -> Result<Transition> {
        let mut inner = self.inner.write();
        let record = inner
            .records
            .get_mut(payment_id)
            .ok_or_else(|| RailError::PaymentNotFound(payment_id.to_owned()))?;

        if record.status.is_terminal() {
            return Ok(Transition::AlreadyTerminal(record.clone()));
        }
        if let Some(txid) = txid {
            record.txid = Some(txid.to_owned());
        }
        if status == PaymentStatus::Pending {
            if txid.is_some() {
                record.updated_at = now;
            }
            return Ok(Transition::Unchanged(record.clone()));
        }

        record.status = status;
        record.updated_at = now;
        if status == PaymentStatus::Confirmed {
            record.confirmed_at = Some(now);
        }
        Ok(Transition::Applied(record.clone()))
    }

    /// Notes an out-of-tolerance amount on a pending record.
    ///
    /// # Errors
    ///
    /// Returns [`RailError::PaymentNotFound`] for an unknown id.
    pub fn note_received(
        &self,
        payment_id: &str,
        received: &str,
        txid: Option<&str>,
        now: UnixTimestamp,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        let record = inner
            .records
            .get_mut(payment_id)
            .ok_or_else(|| RailError::PaymentNotFound(payment_id.to_owned()))?;
        if record.status.is_terminal() {
            return Ok(());
        }
        record.received = Some(received.to_owned());
        if let Some(txid) = txid {
            record.txid = Some(txid.to_owned());
        }
        record.updated_at = now;
        Ok(())
    }

    /// Records for `email`, newest first.
    #[must_use]
    pub fn list_by_email(&self, email: &str) -> Vec<PaymentRecord> {
        let email = normalize_identity(email);
        let mut records: Vec<_> = self
            .inner
            .read()
            .records
            .values()
            .filter(|record| record.email == email)
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.payment_id.cmp(&a.payment_id))
        });
        records
    }

    /// Pending records matching `filter`, oldest first.
    #[must_use]
    pub fn pending(&self, filter: PendingFilter) -> Vec<PaymentRecord> {
        let mut records: Vec<_> = self
            .inner
            .read()
            .records
            .values()
            .filter(|record| record.status == PaymentStatus::Pending)
            .filter(|record| filter.rail.is_none_or(|rail| record.rail == rail))
            .filter(|record| filter.method.is_none_or(|method| record.method == method))
            .cloned()
            .collect();
        records.sort_by_key(|record| record.created_at);
        records
    }

    /// Expires older pending records of the same (email, plan, rail) that
    /// share `correlation_id`, keeping `keep`. Returns the expired ids.
    pub fn supersede(
        &self,
        keep: &PaymentRecord,
        correlation_id: &str,
        now: UnixTimestamp,
    ) -> Vec<String> {
        let mut inner = self.inner.write();
        let mut superseded = Vec::new();
        for record in inner.records.values_mut() {
            if record.payment_id != keep.payment_id
                && record.status == PaymentStatus::Pending
                && record.rail == keep.rail
                && record.email == keep.email
                && record.plan == keep.plan
                && record.payload.correlation_id() == correlation_id
            {
                record.status = PaymentStatus::Expired;
                record.updated_at = now;
                superseded.push(record.payment_id.clone());
            }
        }
        superseded
    }

    /// Removes expired records and pending records past `expires_at`.
    /// Returns how many were removed.
    pub fn purge_expired(&self, now: UnixTimestamp) -> usize {
        let mut inner = self.inner.write();
        let doomed: Vec<PaymentRecord> = inner
            .records
            .values()
            .filter(|record| match record.status {
                PaymentStatus::Expired => true,
                PaymentStatus::Pending => record.expires_at < now,
                _ => false,
            })
            .cloned()
            .collect();
        for record in &doomed {
            inner.unindex(record);
            inner.records.remove(&record.payment_id);
        }
        doomed.len()
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().records.is_empty()
    }
}
