use crate::api::{Payment, PaymentHash, PaymentState, Sats};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use secp256k1::{generate_keypair, rand};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// The native payment rail. Identifier mints are paid through it and the
/// accrued native balance is paid out through it.
#[async_trait]
pub trait FundingSource {
    async fn create_bolt11(&self, amount: Sats) -> Result<(PaymentHash, Payment)>;
    async fn pay_bolt11(&self, invoice: Payment, amount: Sats) -> Result<PaymentHash>;
    async fn check_bolt11(&self, hash: PaymentHash) -> Result<PaymentState>;
}

/// In-memory rail: every invoice it creates counts as settled right away.
#[derive(Debug, Default, Clone)]
pub struct TestFundingSource {
    bolt11: Arc<Mutex<HashMap<PaymentHash, PaymentState>>>,
    paid_out: Arc<Mutex<Vec<(Payment, Sats)>>>,
    reject_payouts: Arc<AtomicBool>,
}
impl TestFundingSource {
    /// Makes every following `pay_bolt11` fail, to simulate an unreachable node.
    pub fn reject_payouts(&self, reject: bool) {
        self.reject_payouts.store(reject, Ordering::SeqCst);
    }
    /// Registers a payment in an arbitrary state.
    pub fn insert(&self, hash: PaymentHash, state: PaymentState) -> Result<()> {
        self.bolt11
            .lock()
            .map_err(|_| anyhow!("funding source lock poisoned"))?
            .insert(hash, state);
        Ok(())
    }
    pub fn paid_out(&self) -> Result<Vec<(Payment, Sats)>> {
        Ok(self
            .paid_out
            .lock()
            .map_err(|_| anyhow!("funding source lock poisoned"))?
            .clone())
    }
}
#[async_trait]
impl FundingSource for TestFundingSource {
    async fn create_bolt11(&self, amount: Sats) -> Result<(PaymentHash, Payment)> {
        let (_, hash) = generate_keypair(&mut rand::thread_rng());
        let (_, invoice) = generate_keypair(&mut rand::thread_rng());
        let hash = hash.to_string();
        self.insert(hash.clone(), PaymentState::Settled(amount))?;
        Ok((hash, invoice.to_string()))
    }
    async fn pay_bolt11(&self, invoice: Payment, amount: Sats) -> Result<PaymentHash> {
        if self.reject_payouts.load(Ordering::SeqCst) {
            bail!("Couldn't pay invoice {}", invoice)
        }
        let (_, hash) = generate_keypair(&mut rand::thread_rng());
        let hash = hash.to_string();
        self.insert(hash.clone(), PaymentState::Settled(amount))?;
        self.paid_out
            .lock()
            .map_err(|_| anyhow!("funding source lock poisoned"))?
            .push((invoice, amount));
        Ok(hash)
    }
    async fn check_bolt11(&self, hash: PaymentHash) -> Result<PaymentState> {
        let tx = self
            .bolt11
            .lock()
            .map_err(|_| anyhow!("funding source lock poisoned"))?;
        if let Some(state) = tx.get(&hash) {
            Ok(state.clone())
        } else {
            bail!("Invoice doesn't exist")
        }
    }
}
