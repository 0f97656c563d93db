//! Chip balances, identifier ownership and total issuance.
//!
//! Every function checks before it writes, so a failing call leaves the
//! store untouched even before the surrounding transaction is rolled back.
use crate::api::*;
use crate::db::Store;
use crate::error::{GameError, GameResult};
use log::trace;

pub async fn credit_balance_of(store: &mut dyn Store, holder: &UserPubKey) -> GameResult<Chips> {
    Ok(store.get_balance(holder).await?)
}

pub async fn identifier_balance_of(
    store: &mut dyn Store,
    holder: &UserPubKey,
    id: NftId,
) -> GameResult<u8> {
    match store.get_holder(id).await? {
        Some(current) if current == *holder => Ok(1),
        _ => Ok(0),
    }
}

pub async fn transfer_credit(
    store: &mut dyn Store,
    from: &UserPubKey,
    to: &UserPubKey,
    amount: Chips,
) -> GameResult<()> {
    let available = store.get_balance(from).await?;
    if available < amount {
        return Err(GameError::InsufficientBalance {
            needed: amount,
            available,
        });
    }
    if from == to || amount == 0 {
        return Ok(());
    }
    let received = store
        .get_balance(to)
        .await?
        .checked_add(amount)
        .ok_or(GameError::ArithmeticOverflow)?;
    store.set_balance(from, available - amount).await?;
    store.set_balance(to, received).await?;
    trace!("Transferred {} chips from {} to {}", amount, from, to);
    Ok(())
}

/// Takes chips out of a spendable balance, e.g. to move them into escrow.
pub async fn debit_credit(store: &mut dyn Store, from: &UserPubKey, amount: Chips) -> GameResult<()> {
    let available = store.get_balance(from).await?;
    if available < amount {
        return Err(GameError::InsufficientBalance {
            needed: amount,
            available,
        });
    }
    store.set_balance(from, available - amount).await?;
    Ok(())
}

/// Puts chips that already exist elsewhere (escrow) back into a spendable balance.
pub async fn credit(store: &mut dyn Store, to: &UserPubKey, amount: Chips) -> GameResult<()> {
    let balance = store
        .get_balance(to)
        .await?
        .checked_add(amount)
        .ok_or(GameError::ArithmeticOverflow)?;
    store.set_balance(to, balance).await?;
    Ok(())
}

pub async fn mint_identifier(
    store: &mut dyn Store,
    to: &UserPubKey,
    id: NftId,
    class: IdentityClass,
) -> GameResult<()> {
    if id == CHIPS_ID || store.get_holder(id).await?.is_some() {
        return Err(GameError::IdentifierAlreadyIssued(id));
    }
    store.insert_identifier(id, class, to).await?;
    trace!("Issued {} identifier {} to {}", class, id, to);
    Ok(())
}

pub async fn mint_credit(
    store: &mut dyn Store,
    config: &mut GameConfig,
    to: &UserPubKey,
    amount: Chips,
) -> GameResult<()> {
    let issued = config
        .issued
        .checked_add(amount)
        .filter(|issued| *issued <= config.max_supply)
        .ok_or(GameError::SupplyCapExceeded {
            requested: amount,
            max_supply: config.max_supply,
        })?;
    credit(store, to, amount).await?;
    config.issued = issued;
    trace!("Minted {} chips to {}, {} issued", amount, to, issued);
    Ok(())
}
