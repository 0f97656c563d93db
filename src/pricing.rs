//! Identifier mint prices, per-dealer fees and the administrator setters
//! that tune them.
use crate::api::*;
use crate::db::Store;
use crate::error::{GameError, GameResult};
use crate::identity::require_admin;
use log::debug;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, MathematicalOps};

/// `trunc(base * multiplier^(issued / tier_size))`, so the price steps up
/// once every `tier_size` identifiers.
pub fn mint_price(schedule: &PriceSchedule, issued: u32) -> GameResult<Sats> {
    if schedule.tier_size == 0 {
        return Err(GameError::InvalidConfiguration(
            "tier_size must be positive".to_string(),
        ));
    }
    let tier = issued / schedule.tier_size;
    let price = schedule
        .tier_multiplier
        .checked_powu(tier.into())
        .and_then(|factor| Decimal::from(schedule.base).checked_mul(factor))
        .ok_or(GameError::ArithmeticOverflow)?;
    price.trunc().to_u32().ok_or(GameError::ArithmeticOverflow)
}

pub fn current_mint_price(config: &GameConfig, class: IdentityClass) -> GameResult<Sats> {
    mint_price(config.schedule(class), config.issued_count(class))
}

pub fn guess_fee(config: &GameConfig, dealer: &Dealer) -> Chips {
    dealer.guess_fee.unwrap_or(config.default_guess_fee)
}

pub fn reveal_fee(config: &GameConfig, dealer: &Dealer) -> Chips {
    dealer.reveal_fee.unwrap_or(config.default_reveal_fee)
}

pub async fn get_dealer(store: &mut dyn Store, dealer: NftId) -> GameResult<Dealer> {
    store
        .get_dealer(dealer)
        .await?
        .ok_or(GameError::DealerDoesNotExist(dealer))
}

/// Sets or clears (`None`) both fee overrides of a dealer.
pub async fn set_fee_overrides(
    store: &mut dyn Store,
    config: &GameConfig,
    caller: &UserPubKey,
    dealer: NftId,
    guess_fee: Option<Chips>,
    reveal_fee: Option<Chips>,
) -> GameResult<()> {
    require_admin(config, caller)?;
    let mut record = get_dealer(store, dealer).await?;
    record.guess_fee = guess_fee;
    record.reveal_fee = reveal_fee;
    store.put_dealer(&record).await?;
    debug!(
        "Fee overrides of dealer {}: guess {:?}, reveal {:?}",
        dealer, guess_fee, reveal_fee
    );
    Ok(())
}

pub fn set_max_active_guesses(
    config: &mut GameConfig,
    caller: &UserPubKey,
    max: u32,
) -> GameResult<()> {
    require_admin(config, caller)?;
    config.max_active_guesses = max;
    Ok(())
}

/// Moves the next-issued tracker of a class. It may only land inside
/// `[first, last + 1]` and never below an identifier that was already issued.
pub async fn set_next_identifier(
    store: &mut dyn Store,
    config: &mut GameConfig,
    caller: &UserPubKey,
    class: IdentityClass,
    next: NftId,
) -> GameResult<()> {
    require_admin(config, caller)?;
    let range = config.range(class);
    if next < range.first || next > range.last.saturating_add(1) {
        return Err(GameError::InvalidConfiguration(format!(
            "next {} identifier {} is outside of {}",
            class, next, range
        )));
    }
    if let Some((_, highest)) = store.issued_bounds(class).await? {
        if next <= highest {
            return Err(GameError::InvalidConfiguration(format!(
                "{} identifier {} was already issued",
                class, highest
            )));
        }
    }
    *config.next_id_mut(class) = next;
    debug!("Next {} identifier set to {}", class, next);
    Ok(())
}

/// Replaces the range of a class. Issued identifiers have to stay inside it,
/// and the tracker is clamped into it.
pub async fn set_range(
    store: &mut dyn Store,
    config: &mut GameConfig,
    caller: &UserPubKey,
    class: IdentityClass,
    range: IdRange,
) -> GameResult<()> {
    require_admin(config, caller)?;
    if range.first == CHIPS_ID || range.first > range.last || range.last == NftId::MAX {
        return Err(GameError::InvalidConfiguration(format!(
            "{} is not a valid {} range",
            range, class
        )));
    }
    let other = match class {
        IdentityClass::Dealer => config.player_range,
        IdentityClass::Player => config.dealer_range,
    };
    if range.overlaps(&other) {
        return Err(GameError::InvalidConfiguration(format!(
            "{} range {} overlaps {}",
            class, range, other
        )));
    }
    if let Some((lowest, highest)) = store.issued_bounds(class).await? {
        if !range.contains(lowest) || !range.contains(highest) {
            return Err(GameError::InvalidConfiguration(format!(
                "{} identifiers {} to {} were already issued outside of {}",
                class, lowest, highest, range
            )));
        }
    }
    let next = config.next_id(class).clamp(range.first, range.last + 1);
    *config.range_mut(class) = range;
    *config.next_id_mut(class) = next;
    debug!("{} range set to {}, next identifier {}", class, range, next);
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::GameSettings;
    use crate::db::{SQLite, DB};
    use crate::identity::issue_identifier;
    use rust_decimal_macros::dec;
    use secp256k1::{generate_keypair, rand};

    fn schedule(base: Sats, multiplier: Decimal) -> PriceSchedule {
        PriceSchedule {
            base,
            tier_size: 10,
            tier_multiplier: multiplier,
        }
    }

    #[test]
    fn price_steps_per_tier() {
        let doubling = schedule(1000, dec!(2));
        assert_eq!(mint_price(&doubling, 0).unwrap(), 1000);
        assert_eq!(mint_price(&doubling, 9).unwrap(), 1000);
        assert_eq!(mint_price(&doubling, 10).unwrap(), 2000);
        assert_eq!(mint_price(&doubling, 25).unwrap(), 4000);

        let flat = schedule(1000, dec!(1));
        assert_eq!(mint_price(&flat, 1_000_000).unwrap(), 1000);

        let fractional = schedule(333, dec!(1.5));
        assert_eq!(mint_price(&fractional, 10).unwrap(), 499);
        assert_eq!(mint_price(&fractional, 20).unwrap(), 749);
    }

    #[test]
    fn price_overflow_is_an_error() {
        let doubling = schedule(1000, dec!(2));
        assert!(matches!(
            mint_price(&doubling, 10 * 40),
            Err(GameError::ArithmeticOverflow)
        ));
        let steep = PriceSchedule {
            base: 1,
            tier_size: 1,
            tier_multiplier: dec!(2),
        };
        assert!(matches!(
            mint_price(&steep, u32::MAX),
            Err(GameError::ArithmeticOverflow)
        ));
        let broken = PriceSchedule {
            base: 1,
            tier_size: 0,
            tier_multiplier: dec!(2),
        };
        assert!(matches!(
            mint_price(&broken, 1),
            Err(GameError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn fees_fall_back_to_defaults() {
        let (_, admin) = generate_keypair(&mut rand::thread_rng());
        let mut settings = GameSettings::with_admin(admin);
        settings.default_guess_fee = 3;
        settings.default_reveal_fee = 4;
        let config = settings.to_config();
        let mut dealer = Dealer {
            id: 1_000_000,
            correct_guesses: 0,
            active_guesses: 0,
            next_guess_id: 0,
            guess_fee: None,
            reveal_fee: None,
        };
        assert_eq!(guess_fee(&config, &dealer), 3);
        assert_eq!(reveal_fee(&config, &dealer), 4);
        dealer.guess_fee = Some(0);
        dealer.reveal_fee = Some(7);
        assert_eq!(guess_fee(&config, &dealer), 0);
        assert_eq!(reveal_fee(&config, &dealer), 7);
    }

    #[tokio::test]
    async fn recovery_setters_keep_issuance_monotonic() {
        let db = SQLite::new(None).await.unwrap();
        let mut store = db.begin().await.unwrap();
        let (_, admin) = generate_keypair(&mut rand::thread_rng());
        let (_, user) = generate_keypair(&mut rand::thread_rng());
        let mut config = GameSettings::with_admin(admin).to_config();
        let s = store.as_mut();

        for _ in 0..3 {
            issue_identifier(s, &mut config, IdentityClass::Dealer, &user)
                .await
                .unwrap();
        }
        assert_eq!(config.next_dealer, 1_000_003);

        // Only the administrator, and never backwards over issued ids.
        assert!(matches!(
            set_next_identifier(s, &mut config, &user, IdentityClass::Dealer, 1_000_010).await,
            Err(GameError::Unauthorized)
        ));
        set_next_identifier(s, &mut config, &admin, IdentityClass::Dealer, 1_000_002)
            .await
            .unwrap_err();
        set_next_identifier(s, &mut config, &admin, IdentityClass::Dealer, 1_001_001)
            .await
            .unwrap_err();
        set_next_identifier(s, &mut config, &admin, IdentityClass::Dealer, 1_000_010)
            .await
            .unwrap();
        let id = issue_identifier(s, &mut config, IdentityClass::Dealer, &user)
            .await
            .unwrap();
        assert_eq!(id, 1_000_010);

        // Ranges may not cut off issued ids or overlap the other class.
        let cut = IdRange {
            first: 1_000_001,
            last: 1_000_020,
        };
        set_range(s, &mut config, &admin, IdentityClass::Dealer, cut)
            .await
            .unwrap_err();
        let overlapping = IdRange {
            first: 1_000_000,
            last: 2_000_000,
        };
        set_range(s, &mut config, &admin, IdentityClass::Dealer, overlapping)
            .await
            .unwrap_err();
        let shrunk = IdRange {
            first: 1_000_000,
            last: 1_000_010,
        };
        set_range(s, &mut config, &admin, IdentityClass::Dealer, shrunk)
            .await
            .unwrap();
        assert_eq!(config.next_dealer, 1_000_011);
        assert!(matches!(
            issue_identifier(s, &mut config, IdentityClass::Dealer, &user).await,
            Err(GameError::AllDealerTokensMinted)
        ));
    }

    #[tokio::test]
    async fn fee_overrides_need_a_dealer() {
        let db = SQLite::new(None).await.unwrap();
        let mut store = db.begin().await.unwrap();
        let (_, admin) = generate_keypair(&mut rand::thread_rng());
        let mut config = GameSettings::with_admin(admin).to_config();
        let s = store.as_mut();

        assert!(matches!(
            set_fee_overrides(s, &config, &admin, 1_000_000, Some(5), None).await,
            Err(GameError::DealerDoesNotExist(1_000_000))
        ));
        let id = issue_identifier(s, &mut config, IdentityClass::Dealer, &admin)
            .await
            .unwrap();
        set_fee_overrides(s, &config, &admin, id, Some(5), None)
            .await
            .unwrap();
        let dealer = get_dealer(s, id).await.unwrap();
        assert_eq!(guess_fee(&config, &dealer), 5);
        assert_eq!(reveal_fee(&config, &dealer), config.default_reveal_fee);
    }
}
