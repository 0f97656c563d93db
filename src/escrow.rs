//! Per-identifier escrow, withdrawals and post-reveal settlement.
use crate::api::*;
use crate::db::Store;
use crate::error::{GameError, GameResult};
use crate::identity::{require_admin, require_owner_or_admin};
use crate::ledger;
use log::debug;

/// Decides what happens to the deposits of a guess once it is revealed.
///
/// The returned payouts `(player id, amount)` move from the dealer's escrow
/// to whoever currently holds the player identifier, inside the reveal
/// transaction. Deposits locked on the dealer's other open guesses cannot be
/// paid out, so returning more than the withdrawable escrow fails the reveal.
pub trait SettlementPolicy: Send + Sync {
    fn payouts(&self, guess: &Guess, reveal: &GuessReveal) -> Vec<(NftId, Chips)>;
}

/// Deposits stay with the dealer. They become withdrawable from the dealer
/// identifier as soon as the guess is revealed.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeepInEscrow;
impl SettlementPolicy for KeepInEscrow {
    fn payouts(&self, _guess: &Guess, _reveal: &GuessReveal) -> Vec<(NftId, Chips)> {
        vec![]
    }
}

pub async fn escrow_balance_of(store: &mut dyn Store, id: NftId) -> GameResult<Chips> {
    Ok(store.get_escrow(id).await?)
}

pub async fn credit_escrow(store: &mut dyn Store, id: NftId, amount: Chips) -> GameResult<()> {
    let balance = store
        .get_escrow(id)
        .await?
        .checked_add(amount)
        .ok_or(GameError::ArithmeticOverflow)?;
    store.set_escrow(id, balance).await?;
    Ok(())
}

async fn debit_escrow(store: &mut dyn Store, id: NftId, amount: Chips) -> GameResult<()> {
    let available = store.get_escrow(id).await?;
    if available < amount {
        return Err(GameError::InsufficientBalance {
            needed: amount,
            available,
        });
    }
    store.set_escrow(id, available - amount).await?;
    Ok(())
}

/// Escrow of `id` that is not locked by deposits on unrevealed guesses.
pub async fn withdrawable(store: &mut dyn Store, id: NftId) -> GameResult<Chips> {
    let escrow = store.get_escrow(id).await?;
    let locked = store.outstanding_deposits(id).await?;
    Ok(u64::from(escrow).saturating_sub(locked) as Chips)
}

/// Moves chips from the caller's balance into the escrow of an issued identifier.
pub async fn fund_escrow(
    store: &mut dyn Store,
    caller: &UserPubKey,
    id: NftId,
    amount: Chips,
) -> GameResult<()> {
    if store.get_holder(id).await?.is_none() {
        return Err(GameError::NftDoesNotExistOrSenderNotOwner(id));
    }
    ledger::debit_credit(store, caller, amount).await?;
    credit_escrow(store, id, amount).await?;
    debug!("{} funded escrow of {} with {} chips", caller, id, amount);
    Ok(())
}

pub async fn withdraw_from_identifier(
    store: &mut dyn Store,
    config: &GameConfig,
    caller: &UserPubKey,
    id: NftId,
) -> GameResult<(Chips, Event)> {
    require_owner_or_admin(store, config, caller, id).await?;
    let amount = withdrawable(store, id).await?;
    if amount == 0 {
        return Err(GameError::NoFundsToWithdraw);
    }
    debit_escrow(store, id, amount).await?;
    ledger::credit(store, caller, amount).await?;
    Ok((
        amount,
        Event::Withdrawal {
            source: WithdrawalSource::Escrow(id),
            recipient: caller.to_string(),
            amount,
        },
    ))
}

/// Fees accrue on the administrator's balance. This sends all of it to `to`.
pub async fn withdraw_fee_sink(
    store: &mut dyn Store,
    config: &GameConfig,
    caller: &UserPubKey,
    to: &UserPubKey,
) -> GameResult<(Chips, Event)> {
    require_admin(config, caller)?;
    if to == caller {
        return Err(GameError::FeeSinkWithdrawalToSelf);
    }
    let amount = store.get_balance(caller).await?;
    if amount == 0 {
        return Err(GameError::NoChipsToWithdraw);
    }
    ledger::transfer_credit(store, caller, to, amount).await?;
    Ok((
        amount,
        Event::Withdrawal {
            source: WithdrawalSource::FeeSink,
            recipient: to.to_string(),
            amount,
        },
    ))
}

/// Zeroes the native balance. The payout itself happens after commit.
pub fn take_native_payments(config: &mut GameConfig, caller: &UserPubKey) -> GameResult<Sats> {
    require_admin(config, caller)?;
    if config.native_balance == 0 {
        return Err(GameError::NoNativePaymentsToWithdraw);
    }
    Ok(std::mem::take(&mut config.native_balance))
}

pub async fn apply_payouts(
    store: &mut dyn Store,
    dealer: NftId,
    payouts: Vec<(NftId, Chips)>,
) -> GameResult<()> {
    let total = payouts
        .iter()
        .try_fold(0 as Chips, |sum, (_, amount)| sum.checked_add(*amount))
        .ok_or(GameError::ArithmeticOverflow)?;
    let available = withdrawable(store, dealer).await?;
    if total > available {
        return Err(GameError::InsufficientBalance {
            needed: total,
            available,
        });
    }
    for (player, amount) in payouts {
        let holder = store
            .get_holder(player)
            .await?
            .ok_or(GameError::NftDoesNotExistOrSenderNotOwner(player))?;
        debit_escrow(store, dealer, amount).await?;
        ledger::credit(store, &holder, amount).await?;
        debug!(
            "Paid out {} chips from escrow of {} to player {}",
            amount, dealer, player
        );
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::GameSettings;
    use crate::db::{SQLite, DB};
    use crate::identity::issue_identifier;
    use secp256k1::{generate_keypair, rand};

    #[tokio::test]
    async fn escrow_withdrawal_needs_owner_and_funds() {
        let db = SQLite::new(None).await.unwrap();
        let mut store = db.begin().await.unwrap();
        let (_, admin) = generate_keypair(&mut rand::thread_rng());
        let (_, dealer) = generate_keypair(&mut rand::thread_rng());
        let (_, stranger) = generate_keypair(&mut rand::thread_rng());
        let mut config = GameSettings::with_admin(admin).to_config();
        let s = store.as_mut();

        let id = issue_identifier(s, &mut config, IdentityClass::Dealer, &dealer)
            .await
            .unwrap();
        assert!(matches!(
            withdraw_from_identifier(s, &config, &dealer, id).await,
            Err(GameError::NoFundsToWithdraw)
        ));

        ledger::mint_credit(s, &mut config, &stranger, 50).await.unwrap();
        fund_escrow(s, &stranger, id, 30).await.unwrap();
        assert_eq!(escrow_balance_of(s, id).await.unwrap(), 30);
        assert_eq!(ledger::credit_balance_of(s, &stranger).await.unwrap(), 20);
        assert!(matches!(
            fund_escrow(s, &stranger, id + 1, 1).await,
            Err(GameError::NftDoesNotExistOrSenderNotOwner(_))
        ));

        assert!(matches!(
            withdraw_from_identifier(s, &config, &stranger, id).await,
            Err(GameError::NftDoesNotExistOrSenderNotOwner(_))
        ));
        let (amount, event) = withdraw_from_identifier(s, &config, &dealer, id)
            .await
            .unwrap();
        assert_eq!(amount, 30);
        assert_eq!(
            event,
            Event::Withdrawal {
                source: WithdrawalSource::Escrow(id),
                recipient: dealer.to_string(),
                amount: 30,
            }
        );
        assert_eq!(escrow_balance_of(s, id).await.unwrap(), 0);
        assert_eq!(ledger::credit_balance_of(s, &dealer).await.unwrap(), 30);

        fund_escrow(s, &stranger, id, 20).await.unwrap();
        let admin_before = ledger::credit_balance_of(s, &admin).await.unwrap();
        let (amount, event) = withdraw_from_identifier(s, &config, &admin, id)
            .await
            .unwrap();
        assert_eq!(amount, 20);
        assert_eq!(
            event,
            Event::Withdrawal {
                source: WithdrawalSource::Escrow(id),
                recipient: admin.to_string(),
                amount: 20,
            }
        );
        assert_eq!(escrow_balance_of(s, id).await.unwrap(), 0);
        assert_eq!(
            ledger::credit_balance_of(s, &admin).await.unwrap(),
            admin_before + 20
        );
        assert_eq!(ledger::credit_balance_of(s, &dealer).await.unwrap(), 30);
    }

    #[tokio::test]
    async fn fee_sink_is_admin_only() {
        let db = SQLite::new(None).await.unwrap();
        let mut store = db.begin().await.unwrap();
        let (_, admin) = generate_keypair(&mut rand::thread_rng());
        let (_, treasury) = generate_keypair(&mut rand::thread_rng());
        let mut config = GameSettings::with_admin(admin).to_config();
        let s = store.as_mut();

        assert!(matches!(
            withdraw_fee_sink(s, &config, &admin, &treasury).await,
            Err(GameError::NoChipsToWithdraw)
        ));
        ledger::mint_credit(s, &mut config, &admin, 12).await.unwrap();
        assert!(matches!(
            withdraw_fee_sink(s, &config, &treasury, &treasury).await,
            Err(GameError::Unauthorized)
        ));
        assert!(matches!(
            withdraw_fee_sink(s, &config, &admin, &admin).await,
            Err(GameError::FeeSinkWithdrawalToSelf)
        ));
        assert_eq!(ledger::credit_balance_of(s, &admin).await.unwrap(), 12);
        let (amount, _) = withdraw_fee_sink(s, &config, &admin, &treasury)
            .await
            .unwrap();
        assert_eq!(amount, 12);
        assert_eq!(ledger::credit_balance_of(s, &treasury).await.unwrap(), 12);
        assert_eq!(ledger::credit_balance_of(s, &admin).await.unwrap(), 0);
    }

    #[test]
    fn native_payments_are_taken_once() {
        let (_, admin) = generate_keypair(&mut rand::thread_rng());
        let mut config = GameSettings::with_admin(admin).to_config();
        assert!(matches!(
            take_native_payments(&mut config, &admin),
            Err(GameError::NoNativePaymentsToWithdraw)
        ));
        config.native_balance = 1500;
        assert_eq!(take_native_payments(&mut config, &admin).unwrap(), 1500);
        assert_eq!(config.native_balance, 0);
    }
}
