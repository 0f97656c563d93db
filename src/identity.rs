//! Role resolution from identifier holdings.
//!
//! Roles are never cached: every check reads the holdings visible to the
//! current transaction.
use crate::api::*;
use crate::db::Store;
use crate::error::{GameError, GameResult};
use crate::ledger;
use log::debug;

pub async fn role_of(
    store: &mut dyn Store,
    config: &GameConfig,
    caller: &UserPubKey,
) -> GameResult<Role> {
    if *caller == config.admin {
        return Ok(Role::Administrator);
    }
    let held = store.get_identifiers(caller).await?;
    if let Some(id) = held.iter().find(|id| config.dealer_range.contains(**id)) {
        return Ok(Role::Dealer(*id));
    }
    if let Some(id) = held.iter().find(|id| config.player_range.contains(**id)) {
        return Ok(Role::Player(*id));
    }
    Ok(Role::None)
}

pub fn require_admin(config: &GameConfig, caller: &UserPubKey) -> GameResult<()> {
    if *caller != config.admin {
        debug!("{} tried to use an administrator operation", caller);
        return Err(GameError::Unauthorized);
    }
    Ok(())
}

/// The caller must hold `id` and `id` must lie in the range of `class`.
pub async fn require_role(
    store: &mut dyn Store,
    config: &GameConfig,
    caller: &UserPubKey,
    class: IdentityClass,
    id: NftId,
) -> GameResult<()> {
    if !config.range(class).contains(id)
        || ledger::identifier_balance_of(store, caller, id).await? == 0
    {
        debug!("{} does not hold {} identifier {}", caller, class, id);
        return Err(GameError::Unauthorized);
    }
    Ok(())
}

pub async fn require_dealer(
    store: &mut dyn Store,
    config: &GameConfig,
    caller: &UserPubKey,
    id: NftId,
) -> GameResult<()> {
    require_role(store, config, caller, IdentityClass::Dealer, id).await
}

pub async fn require_player(
    store: &mut dyn Store,
    config: &GameConfig,
    caller: &UserPubKey,
    id: NftId,
) -> GameResult<()> {
    require_role(store, config, caller, IdentityClass::Player, id).await
}

/// Ownership of a single identifier: its current holder or the administrator.
/// Returns the holder.
pub async fn require_owner_or_admin(
    store: &mut dyn Store,
    config: &GameConfig,
    caller: &UserPubKey,
    id: NftId,
) -> GameResult<UserPubKey> {
    match store.get_holder(id).await? {
        Some(holder) if holder == *caller || *caller == config.admin => Ok(holder),
        _ => Err(GameError::NftDoesNotExistOrSenderNotOwner(id)),
    }
}

pub fn transfer_administration(
    config: &mut GameConfig,
    caller: &UserPubKey,
    new_admin: UserPubKey,
) -> GameResult<()> {
    require_admin(config, caller)?;
    config.admin = new_admin;
    Ok(())
}

/// Hands out the next identifier of `class` to `to`. Dealers also get their
/// record. Pricing is the caller's concern.
pub async fn issue_identifier(
    store: &mut dyn Store,
    config: &mut GameConfig,
    class: IdentityClass,
    to: &UserPubKey,
) -> GameResult<NftId> {
    let id = config.next_id(class);
    if id > config.range(class).last {
        return Err(GameError::exhausted(class));
    }
    ledger::mint_identifier(store, to, id, class).await?;
    if class == IdentityClass::Dealer {
        store
            .put_dealer(&Dealer {
                id,
                correct_guesses: 0,
                active_guesses: 0,
                next_guess_id: 0,
                guess_fee: None,
                reveal_fee: None,
            })
            .await?;
    }
    *config.next_id_mut(class) = id.checked_add(1).ok_or(GameError::ArithmeticOverflow)?;
    Ok(id)
}
