//! Guess lifecycle: a dealer commits to a hidden value, players pay to see
//! it, and anyone who knows the secret reveals it.
//!
//! ```text
//! Committed --reveal_guess_to_player--> Committed (+1 participant)
//! Committed --reveal_price_for_guess--> Revealed (terminal)
//! ```
use crate::api::*;
use crate::db::Store;
use crate::error::{GameError, GameResult};
use crate::escrow::{self, SettlementPolicy};
use crate::identity::{require_admin, require_dealer, require_player};
use crate::ledger;
use crate::pricing;
use chrono::{DateTime, Utc};
use log::debug;
use rust_decimal::Decimal;

pub struct NewGuess {
    pub commitment: Commitment,
    pub dealer: NftId,
    pub asset: ExternalAsset,
    pub timestamp: DateTime<Utc>,
    pub initial_price: Decimal,
    pub needed_deposit: Chips,
}
impl From<AddGuessRequest> for NewGuess {
    fn from(r: AddGuessRequest) -> Self {
        Self {
            commitment: r.commitment,
            dealer: r.dealer,
            asset: r.asset,
            timestamp: r.timestamp,
            initial_price: r.initial_price,
            needed_deposit: r.needed_deposit,
        }
    }
}

pub async fn get_guess(store: &mut dyn Store, dealer: NftId, guess: GuessId) -> GameResult<Guess> {
    store
        .get_guess(dealer, guess)
        .await?
        .ok_or(GameError::GuessDoesNotExist { dealer, guess })
}

pub async fn add_guess(
    store: &mut dyn Store,
    config: &GameConfig,
    caller: &UserPubKey,
    new: NewGuess,
) -> GameResult<(GuessId, Event)> {
    require_dealer(store, config, caller, new.dealer).await?;
    let mut dealer = pricing::get_dealer(store, new.dealer).await?;
    if dealer.active_guesses >= config.max_active_guesses {
        return Err(GameError::DealerReachedMaxGuesses(dealer.id));
    }
    let fee = pricing::guess_fee(config, &dealer);
    let next_guess_id = dealer
        .next_guess_id
        .checked_add(1)
        .ok_or(GameError::ArithmeticOverflow)?;
    ledger::transfer_credit(store, caller, &config.admin, fee).await?;

    let guess = Guess {
        dealer: dealer.id,
        id: dealer.next_guess_id,
        asset: new.asset,
        created_at: new.timestamp,
        commitment: new.commitment,
        initial_price: new.initial_price,
        needed_deposit: new.needed_deposit,
        reveal: None,
        participants: vec![],
    };
    store.insert_guess(&guess).await?;
    dealer.next_guess_id = next_guess_id;
    dealer.active_guesses += 1;
    store.put_dealer(&dealer).await?;
    debug!(
        "Dealer {} committed guess {} ({} active)",
        dealer.id, guess.id, dealer.active_guesses
    );
    Ok((
        guess.id,
        Event::GuessCreated {
            dealer_holder: *caller,
            dealer: guess.dealer,
            guess: guess.id,
            commitment: guess.commitment,
            asset: guess.asset,
            created_at: guess.created_at,
            initial_price: guess.initial_price,
            needed_deposit: guess.needed_deposit,
            fee,
        },
    ))
}

pub async fn reveal_guess_to_player(
    store: &mut dyn Store,
    config: &GameConfig,
    caller: &UserPubKey,
    player: NftId,
    dealer: NftId,
    guess: GuessId,
) -> GameResult<Event> {
    require_player(store, config, caller, player).await?;
    let record = get_guess(store, dealer, guess).await?;
    if record.is_revealed() {
        return Err(GameError::PriceForGuessAlreadyRevealed);
    }
    if record.has_participant(player) {
        return Err(GameError::PlayerAlreadyParticipating {
            player,
            dealer,
            guess,
        });
    }
    let fee = pricing::reveal_fee(config, &pricing::get_dealer(store, dealer).await?);
    let needed = fee
        .checked_add(record.needed_deposit)
        .ok_or(GameError::ArithmeticOverflow)?;
    let available = ledger::credit_balance_of(store, caller).await?;
    if available < needed {
        return Err(GameError::NotEnoughTokensToRevealAndDeposit { needed, available });
    }

    ledger::transfer_credit(store, caller, &config.admin, fee).await?;
    ledger::debit_credit(store, caller, record.needed_deposit).await?;
    escrow::credit_escrow(store, dealer, record.needed_deposit).await?;
    store
        .add_participant(
            dealer,
            guess,
            &Participant {
                player,
                deposit: record.needed_deposit,
            },
        )
        .await?;
    debug!(
        "Player {} joined guess {} of dealer {} with {} chips",
        player, guess, dealer, record.needed_deposit
    );
    Ok(Event::GuessParticipation {
        player_holder: *caller,
        player,
        dealer,
        guess,
        asset: record.asset,
        initial_price: record.initial_price,
        deposit: record.needed_deposit,
        fee,
    })
}

pub struct Disclosure {
    pub end_price: Decimal,
    pub guessed_value: Decimal,
    pub nonce: Nonce,
}

/// Knowing the committed value and nonce is what authorises the reveal.
pub async fn reveal_price_for_guess(
    store: &mut dyn Store,
    settlement: &dyn SettlementPolicy,
    dealer: NftId,
    guess: GuessId,
    disclosure: Disclosure,
) -> GameResult<Event> {
    let record = get_guess(store, dealer, guess).await?;
    if record.is_revealed() {
        return Err(GameError::PriceForGuessAlreadyRevealed);
    }
    if !record
        .commitment
        .matches(&disclosure.guessed_value, disclosure.nonce)
    {
        return Err(GameError::GuessedPriceAndNonceDoNotMatchHash);
    }
    let mut dealer_record = pricing::get_dealer(store, dealer).await?;
    let reveal = GuessReveal {
        end_price: disclosure.end_price,
        guessed_value: disclosure.guessed_value,
        nonce: disclosure.nonce,
        correct: disclosure.guessed_value == disclosure.end_price,
    };
    dealer_record.active_guesses = dealer_record.active_guesses.saturating_sub(1);
    if reveal.correct {
        dealer_record.correct_guesses = dealer_record
            .correct_guesses
            .checked_add(1)
            .ok_or(GameError::ArithmeticOverflow)?;
    }
    store.set_reveal(dealer, guess, &reveal).await?;
    store.put_dealer(&dealer_record).await?;
    escrow::apply_payouts(store, dealer, settlement.payouts(&record, &reveal)).await?;
    debug!(
        "Guess {} of dealer {} revealed, correct: {}",
        guess, dealer, reveal.correct
    );
    Ok(Event::GuessRevealed {
        asset: record.asset,
        created_at: record.created_at,
        end_price: reveal.end_price,
        initial_price: record.initial_price,
        guessed_value: reveal.guessed_value,
        correct: reveal.correct,
        dealer,
        guess,
        participants: record.participants.len() as u32,
    })
}

pub async fn set_correct_guesses(
    store: &mut dyn Store,
    config: &GameConfig,
    caller: &UserPubKey,
    dealer: NftId,
    correct_guesses: u32,
) -> GameResult<()> {
    require_admin(config, caller)?;
    let mut record = pricing::get_dealer(store, dealer).await?;
    record.correct_guesses = correct_guesses;
    store.put_dealer(&record).await?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::GameSettings;
    use crate::db::{SQLite, DB};
    use crate::escrow::KeepInEscrow;
    use crate::identity::issue_identifier;
    use rust_decimal_macros::dec;
    use secp256k1::{generate_keypair, rand};

    fn new_guess(dealer: NftId, value: Decimal, nonce: Nonce, deposit: Chips) -> NewGuess {
        NewGuess {
            commitment: Commitment::of(&value, nonce),
            dealer,
            asset: ExternalAsset {
                address: "0xa324175E95Ef225dDCc1852F9F7939D997c0757d".into(),
                chain_id: 1,
            },
            timestamp: Utc::now(),
            initial_price: dec!(98.5),
            needed_deposit: deposit,
        }
    }

    #[tokio::test]
    async fn lifecycle_in_one_transaction() {
        let db = SQLite::new(None).await.unwrap();
        let mut store = db.begin().await.unwrap();
        let (_, admin) = generate_keypair(&mut rand::thread_rng());
        let (_, dealer) = generate_keypair(&mut rand::thread_rng());
        let (_, player) = generate_keypair(&mut rand::thread_rng());
        let mut config = GameSettings::with_admin(admin).to_config();
        let s = store.as_mut();

        let d = issue_identifier(s, &mut config, IdentityClass::Dealer, &dealer)
            .await
            .unwrap();
        let p = issue_identifier(s, &mut config, IdentityClass::Player, &player)
            .await
            .unwrap();
        ledger::mint_credit(s, &mut config, &dealer, 1).await.unwrap();
        ledger::mint_credit(s, &mut config, &player, 11).await.unwrap();

        let (id, _) = add_guess(s, &config, &dealer, new_guess(d, dec!(100), 1, 10))
            .await
            .unwrap();
        assert_eq!(id, 0);
        reveal_guess_to_player(s, &config, &player, p, d, id)
            .await
            .unwrap();
        assert!(matches!(
            reveal_guess_to_player(s, &config, &player, p, d, id).await,
            Err(GameError::PlayerAlreadyParticipating { .. })
        ));
        assert_eq!(ledger::credit_balance_of(s, &player).await.unwrap(), 0);
        assert_eq!(ledger::credit_balance_of(s, &admin).await.unwrap(), 2);
        assert_eq!(escrow::escrow_balance_of(s, d).await.unwrap(), 10);
        assert_eq!(escrow::withdrawable(s, d).await.unwrap(), 0);

        let disclosure = Disclosure {
            end_price: dec!(100.00),
            guessed_value: dec!(100),
            nonce: 1,
        };
        let event = reveal_price_for_guess(s, &KeepInEscrow, d, id, disclosure)
            .await
            .unwrap();
        match event {
            Event::GuessRevealed {
                correct,
                participants,
                ..
            } => {
                assert!(correct);
                assert_eq!(participants, 1);
            }
            e => panic!("unexpected event {:?}", e),
        }
        let record = pricing::get_dealer(s, d).await.unwrap();
        assert_eq!(record.active_guesses, 0);
        assert_eq!(record.correct_guesses, 1);
        assert_eq!(escrow::withdrawable(s, d).await.unwrap(), 10);

        set_correct_guesses(s, &config, &admin, d, 7).await.unwrap();
        assert!(matches!(
            set_correct_guesses(s, &config, &dealer, d, 8).await,
            Err(GameError::Unauthorized)
        ));
        assert_eq!(pricing::get_dealer(s, d).await.unwrap().correct_guesses, 7);
    }

    #[tokio::test]
    async fn missing_guess_is_not_found() {
        let db = SQLite::new(None).await.unwrap();
        let mut store = db.begin().await.unwrap();
        let (_, admin) = generate_keypair(&mut rand::thread_rng());
        let (_, player) = generate_keypair(&mut rand::thread_rng());
        let mut config = GameSettings::with_admin(admin).to_config();
        let s = store.as_mut();
        let p = issue_identifier(s, &mut config, IdentityClass::Player, &player)
            .await
            .unwrap();

        assert!(matches!(
            reveal_guess_to_player(s, &config, &player, p, 1_000_000, 0).await,
            Err(GameError::GuessDoesNotExist {
                dealer: 1_000_000,
                guess: 0
            })
        ));
        let disclosure = Disclosure {
            end_price: dec!(1),
            guessed_value: dec!(1),
            nonce: 0,
        };
        assert!(matches!(
            reveal_price_for_guess(s, &KeepInEscrow, 1_000_000, 0, disclosure).await,
            Err(GameError::GuessDoesNotExist { .. })
        ));
    }
}
