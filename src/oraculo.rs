use crate::api::*;
use crate::config::GameSettings;
use crate::db::{Store, DB};
use crate::error::{GameError, GameResult};
use crate::escrow::{self, KeepInEscrow, SettlementPolicy};
use crate::funding_source::FundingSource;
use crate::guess::{self, Disclosure, NewGuess};
use crate::identity;
use crate::ledger;
use crate::pricing;
use anyhow::{bail, Context, Result};
use chrono::{Duration, Utc};
use log::{debug, error, trace};
use secp256k1::ecdsa::Signature;
use secp256k1::hashes::sha256::Hash;
use secp256k1::rand::distributions::Alphanumeric;
use secp256k1::rand::Rng;
use secp256k1::{rand, Message};
use std::sync::Arc;

/// The game. Every public operation runs in its own storage transaction
/// and is committed only if it succeeds as a whole.
pub struct Oraculo {
    db: Arc<Box<dyn DB + Send + Sync>>,
    funding: Arc<Box<dyn FundingSource + Send + Sync>>,
    settlement: Box<dyn SettlementPolicy>,
}

impl Oraculo {
    /// Opens the game stored in `db`, or bootstraps a new one from `game`
    /// (including the initial chip supply for the administrator).
    pub async fn new(
        db: Box<dyn DB + Send + Sync>,
        funding: Box<dyn FundingSource + Send + Sync>,
        game: GameSettings,
    ) -> Result<Self> {
        let mut store = db.begin().await?;
        match store.get_config().await? {
            Some(config) => {
                debug!("Loaded game with administrator {}", config.admin);
            }
            None => {
                game.validate()?;
                let mut config = game.to_config();
                let admin = config.admin;
                ledger::mint_credit(store.as_mut(), &mut config, &admin, game.initial_chips)
                    .await?;
                store.put_config(&config).await?;
                store.commit().await?;
                debug!(
                    "Bootstrapped game with administrator {} and {} chips",
                    admin, game.initial_chips
                );
            }
        }
        Ok(Self {
            db: Arc::new(db),
            funding: Arc::new(funding),
            settlement: Box::new(KeepInEscrow),
        })
    }
    pub fn with_settlement(mut self, policy: impl SettlementPolicy + 'static) -> Self {
        self.settlement = Box::new(policy);
        self
    }

    async fn open(&self) -> GameResult<(Box<dyn Store>, GameConfig)> {
        let mut store = self.db.begin().await?;
        let config = store
            .get_config()
            .await?
            .context("game was never bootstrapped")?;
        Ok((store, config))
    }
    async fn finish(
        &self,
        mut store: Box<dyn Store>,
        config: &GameConfig,
        events: Vec<Event>,
    ) -> GameResult<()> {
        store.put_config(config).await?;
        let mut ids = Vec::with_capacity(events.len());
        for event in &events {
            ids.push(store.push_event(event).await?);
        }
        store.commit().await?;
        for (id, event) in ids.iter().zip(events) {
            debug!("Event {}: {:?}", id, event);
        }
        Ok(())
    }

    // Identifiers

    pub async fn request_mint_invoice(&self, class: IdentityClass) -> GameResult<MintInvoiceResponse> {
        let (_, config) = self.open().await?;
        if config.next_id(class) > config.range(class).last {
            return Err(GameError::exhausted(class));
        }
        let price = pricing::current_mint_price(&config, class)?;
        let (payment_hash, invoice) = self
            .funding
            .create_bolt11(price)
            .await
            .map_err(GameError::Payment)?;
        trace!("Mint invoice {} for {} sats", payment_hash, price);
        Ok(MintInvoiceResponse {
            payment_hash,
            invoice,
            price,
        })
    }
    /// Issues the next identifier of `class` to the caller against a settled payment.
    pub async fn mint_identifier(
        &self,
        caller: &UserPubKey,
        class: IdentityClass,
        payment: PaymentHash,
    ) -> GameResult<NftId> {
        let paid = match self.funding.check_bolt11(payment.clone()).await {
            Ok(PaymentState::Settled(paid)) => paid,
            Ok(state) => {
                debug!("Payment {} is {:?}", payment, state);
                return Err(GameError::PaymentNotSettled(payment));
            }
            Err(e) => {
                debug!("Couldn't check payment {}: {:#}", payment, e);
                return Err(GameError::PaymentNotSettled(payment));
            }
        };
        let (mut store, mut config) = self.open().await?;
        if config.next_id(class) > config.range(class).last {
            return Err(GameError::exhausted(class));
        }
        let price = pricing::current_mint_price(&config, class)?;
        if paid < price {
            return Err(GameError::NotEnoughPaymentForMinting { price, paid });
        }
        if !store.consume_payment(&payment, paid).await? {
            return Err(GameError::PaymentAlreadyUsed(payment));
        }
        let id = identity::issue_identifier(store.as_mut(), &mut config, class, caller).await?;
        config.native_balance = config
            .native_balance
            .checked_add(paid)
            .ok_or(GameError::ArithmeticOverflow)?;
        let event = Event::IdentifierMinted {
            class,
            id,
            to: *caller,
            paid,
        };
        self.finish(store, &config, vec![event]).await?;
        Ok(id)
    }
    /// Administrator free mint.
    pub async fn grant_identifier(
        &self,
        caller: &UserPubKey,
        class: IdentityClass,
        to: &UserPubKey,
    ) -> GameResult<NftId> {
        let (mut store, mut config) = self.open().await?;
        identity::require_admin(&config, caller)?;
        let id = identity::issue_identifier(store.as_mut(), &mut config, class, to).await?;
        let event = Event::IdentifierMinted {
            class,
            id,
            to: *to,
            paid: 0,
        };
        self.finish(store, &config, vec![event]).await?;
        Ok(id)
    }

    // Guesses

    pub async fn add_guess(&self, caller: &UserPubKey, new: NewGuess) -> GameResult<GuessId> {
        let (mut store, config) = self.open().await?;
        let (id, event) = guess::add_guess(store.as_mut(), &config, caller, new).await?;
        self.finish(store, &config, vec![event]).await?;
        Ok(id)
    }
    pub async fn reveal_guess_to_player(
        &self,
        caller: &UserPubKey,
        player: NftId,
        dealer: NftId,
        guess: GuessId,
    ) -> GameResult<()> {
        let (mut store, config) = self.open().await?;
        let event =
            guess::reveal_guess_to_player(store.as_mut(), &config, caller, player, dealer, guess)
                .await?;
        self.finish(store, &config, vec![event]).await
    }
    pub async fn reveal_price_for_guess(
        &self,
        dealer: NftId,
        guess: GuessId,
        disclosure: Disclosure,
    ) -> GameResult<bool> {
        let (mut store, config) = self.open().await?;
        let event = guess::reveal_price_for_guess(
            store.as_mut(),
            self.settlement.as_ref(),
            dealer,
            guess,
            disclosure,
        )
        .await?;
        let correct = matches!(event, Event::GuessRevealed { correct: true, .. });
        self.finish(store, &config, vec![event]).await?;
        Ok(correct)
    }

    // Withdrawals

    pub async fn withdraw_from_identifier(&self, caller: &UserPubKey, id: NftId) -> GameResult<Chips> {
        let (mut store, config) = self.open().await?;
        let (amount, event) =
            escrow::withdraw_from_identifier(store.as_mut(), &config, caller, id).await?;
        self.finish(store, &config, vec![event]).await?;
        Ok(amount)
    }
    pub async fn withdraw_fee_sink(&self, caller: &UserPubKey, to: &UserPubKey) -> GameResult<Chips> {
        let (mut store, config) = self.open().await?;
        let (amount, event) = escrow::withdraw_fee_sink(store.as_mut(), &config, caller, to).await?;
        self.finish(store, &config, vec![event]).await?;
        Ok(amount)
    }
    /// Pays the accrued mint payments out to `invoice`. The balance is
    /// zeroed before paying and restored if the payment fails.
    pub async fn withdraw_native_payments(
        &self,
        caller: &UserPubKey,
        invoice: Payment,
    ) -> GameResult<Sats> {
        let (store, mut config) = self.open().await?;
        let amount = escrow::take_native_payments(&mut config, caller)?;
        self.finish(store, &config, vec![]).await?;

        if let Err(e) = self.funding.pay_bolt11(invoice.clone(), amount).await {
            error!("Couldn't pay out {} sats to {}: {:#}", amount, invoice, e);
            let (store, mut config) = self.open().await?;
            config.native_balance = config
                .native_balance
                .checked_add(amount)
                .ok_or(GameError::ArithmeticOverflow)?;
            self.finish(store, &config, vec![]).await?;
            return Err(GameError::Payment(e));
        }
        let (store, config) = self.open().await?;
        let event = Event::Withdrawal {
            source: WithdrawalSource::NativePayments,
            recipient: invoice,
            amount,
        };
        self.finish(store, &config, vec![event]).await?;
        Ok(amount)
    }

    // Chips

    pub async fn transfer_chips(
        &self,
        caller: &UserPubKey,
        to: &UserPubKey,
        amount: Chips,
    ) -> GameResult<()> {
        let (mut store, config) = self.open().await?;
        ledger::transfer_credit(store.as_mut(), caller, to, amount).await?;
        self.finish(store, &config, vec![]).await
    }
    pub async fn fund_escrow(&self, caller: &UserPubKey, id: NftId, amount: Chips) -> GameResult<()> {
        let (mut store, config) = self.open().await?;
        escrow::fund_escrow(store.as_mut(), caller, id, amount).await?;
        self.finish(store, &config, vec![]).await
    }
    pub async fn mint_chips(
        &self,
        caller: &UserPubKey,
        to: &UserPubKey,
        amount: Chips,
    ) -> GameResult<()> {
        let (mut store, mut config) = self.open().await?;
        identity::require_admin(&config, caller)?;
        ledger::mint_credit(store.as_mut(), &mut config, to, amount).await?;
        self.finish(store, &config, vec![]).await
    }

    // Administration

    pub async fn set_fee_overrides(
        &self,
        caller: &UserPubKey,
        dealer: NftId,
        guess_fee: Option<Chips>,
        reveal_fee: Option<Chips>,
    ) -> GameResult<()> {
        let (mut store, config) = self.open().await?;
        pricing::set_fee_overrides(store.as_mut(), &config, caller, dealer, guess_fee, reveal_fee)
            .await?;
        self.finish(store, &config, vec![]).await
    }
    pub async fn set_max_active_guesses(&self, caller: &UserPubKey, max: u32) -> GameResult<()> {
        let (store, mut config) = self.open().await?;
        pricing::set_max_active_guesses(&mut config, caller, max)?;
        self.finish(store, &config, vec![]).await
    }
    pub async fn set_next_identifier(
        &self,
        caller: &UserPubKey,
        class: IdentityClass,
        next: NftId,
    ) -> GameResult<()> {
        let (mut store, mut config) = self.open().await?;
        pricing::set_next_identifier(store.as_mut(), &mut config, caller, class, next).await?;
        self.finish(store, &config, vec![]).await
    }
    pub async fn set_range(
        &self,
        caller: &UserPubKey,
        class: IdentityClass,
        range: IdRange,
    ) -> GameResult<()> {
        let (mut store, mut config) = self.open().await?;
        pricing::set_range(store.as_mut(), &mut config, caller, class, range).await?;
        self.finish(store, &config, vec![]).await
    }
    pub async fn set_correct_guesses(
        &self,
        caller: &UserPubKey,
        dealer: NftId,
        correct_guesses: u32,
    ) -> GameResult<()> {
        let (mut store, config) = self.open().await?;
        guess::set_correct_guesses(store.as_mut(), &config, caller, dealer, correct_guesses).await?;
        self.finish(store, &config, vec![]).await
    }
    pub async fn transfer_administration(
        &self,
        caller: &UserPubKey,
        new_admin: UserPubKey,
    ) -> GameResult<()> {
        let (store, mut config) = self.open().await?;
        identity::transfer_administration(&mut config, caller, new_admin)?;
        debug!("Administration moved from {} to {}", caller, new_admin);
        self.finish(store, &config, vec![]).await
    }

    // Accessors

    pub async fn credit_balance_of(&self, holder: &UserPubKey) -> GameResult<Chips> {
        let (mut store, _) = self.open().await?;
        ledger::credit_balance_of(store.as_mut(), holder).await
    }
    pub async fn identifier_holder(&self, id: NftId) -> GameResult<Option<UserPubKey>> {
        let (mut store, _) = self.open().await?;
        Ok(store.get_holder(id).await?)
    }
    pub async fn identifier_balance_of(&self, holder: &UserPubKey, id: NftId) -> GameResult<u8> {
        let (mut store, _) = self.open().await?;
        ledger::identifier_balance_of(store.as_mut(), holder, id).await
    }
    pub async fn role_of(&self, user: &UserPubKey) -> GameResult<Role> {
        let (mut store, config) = self.open().await?;
        identity::role_of(store.as_mut(), &config, user).await
    }
    pub async fn holder(&self, user: &UserPubKey) -> GameResult<HolderResponse> {
        let (mut store, config) = self.open().await?;
        Ok(HolderResponse {
            user: *user,
            role: identity::role_of(store.as_mut(), &config, user).await?,
            chips: ledger::credit_balance_of(store.as_mut(), user).await?,
        })
    }
    pub async fn escrow_balance_of(&self, id: NftId) -> GameResult<Chips> {
        let (mut store, _) = self.open().await?;
        escrow::escrow_balance_of(store.as_mut(), id).await
    }
    pub async fn get_guess(&self, dealer: NftId, guess: GuessId) -> GameResult<Guess> {
        let (mut store, _) = self.open().await?;
        guess::get_guess(store.as_mut(), dealer, guess).await
    }
    pub async fn get_guesses(&self, dealer: NftId) -> GameResult<Vec<Guess>> {
        let (mut store, _) = self.open().await?;
        pricing::get_dealer(store.as_mut(), dealer).await?;
        Ok(store.get_guesses(dealer).await?)
    }
    pub async fn get_dealer(&self, dealer: NftId) -> GameResult<Dealer> {
        let (mut store, _) = self.open().await?;
        pricing::get_dealer(store.as_mut(), dealer).await
    }
    /// Current mint prices, and the fees that apply to `dealer` (the defaults without one).
    pub async fn get_pricing(&self, dealer: Option<NftId>) -> GameResult<PricingResponse> {
        let (mut store, config) = self.open().await?;
        let (guess_fee, reveal_fee) = match dealer {
            Some(dealer) => {
                let dealer = pricing::get_dealer(store.as_mut(), dealer).await?;
                (
                    pricing::guess_fee(&config, &dealer),
                    pricing::reveal_fee(&config, &dealer),
                )
            }
            None => (config.default_guess_fee, config.default_reveal_fee),
        };
        Ok(PricingResponse {
            dealer_mint_price: pricing::current_mint_price(&config, IdentityClass::Dealer)?,
            player_mint_price: pricing::current_mint_price(&config, IdentityClass::Player)?,
            guess_fee,
            reveal_fee,
        })
    }
    pub async fn get_config(&self) -> GameResult<GameConfig> {
        let (_, config) = self.open().await?;
        Ok(config)
    }
    pub async fn get_events(&self, since: EventId, limit: u32) -> GameResult<Vec<EventRecord>> {
        let (mut store, _) = self.open().await?;
        Ok(store.get_events(since, limit).await?)
    }

    // Sessions

    pub async fn check_access(&self, access: AccessRequest) -> Result<UserPubKey> {
        let (db_sig, last_access) = self
            .db
            .get_last_access(access.user, access.challenge)
            .await
            .context("Error getting session from db")?;
        if access.sig != db_sig {
            debug!(
                "User {} tried to access with invalid access token",
                access.user
            );
            bail!("Access token for user {} is invalid", access.user)
        }
        if last_access < Utc::now() - Duration::days(7) {
            debug!(
                "User {} tried to access after more than 7 days",
                access.user
            );
            bail!("Last access was more than 7 days ago")
        }
        Ok(access.user)
    }
    pub async fn create_login_challenge(&self, user: UserPubKey) -> Result<String> {
        let challenge: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(30)
            .map(char::from)
            .collect();
        trace!("Generated login challenge {}", challenge);
        self.db.create_session(user, challenge.clone()).await?;
        Ok(challenge)
    }
    pub async fn try_login(&self, user: UserPubKey, sig: Signature, challenge: String) -> Result<()> {
        sig.verify(
            &Message::from_hashed_data::<Hash>(challenge.as_bytes()),
            &user,
        )?;
        self.db.update_access_token(user, sig, challenge).await?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::db::SQLite;
    use crate::funding_source::TestFundingSource;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use secp256k1::{generate_keypair, Secp256k1};

    struct Game {
        oraculo: Oraculo,
        funding: TestFundingSource,
        admin: UserPubKey,
    }

    async fn game_with(settings: impl FnOnce(&mut GameSettings)) -> Game {
        let (_, admin) = generate_keypair(&mut rand::thread_rng());
        let mut game = GameSettings::with_admin(admin);
        settings(&mut game);
        let funding = TestFundingSource::default();
        let oraculo = Oraculo::new(
            Box::new(SQLite::new(None).await.unwrap()),
            Box::new(funding.clone()),
            game,
        )
        .await
        .unwrap();
        Game {
            oraculo,
            funding,
            admin,
        }
    }
    async fn game() -> Game {
        game_with(|_| {}).await
    }

    impl Game {
        async fn buy(&self, user: &UserPubKey, class: IdentityClass) -> GameResult<NftId> {
            let invoice = self.oraculo.request_mint_invoice(class).await?;
            self.oraculo
                .mint_identifier(user, class, invoice.payment_hash)
                .await
        }
        async fn funded(&self, class: IdentityClass, chips: Chips) -> (UserPubKey, NftId) {
            let (_, user) = generate_keypair(&mut rand::thread_rng());
            let id = self.buy(&user, class).await.unwrap();
            if chips > 0 {
                self.oraculo
                    .transfer_chips(&self.admin, &user, chips)
                    .await
                    .unwrap();
            }
            (user, id)
        }
        async fn commit(&self, dealer: (&UserPubKey, NftId), value: Decimal, nonce: Nonce) -> GuessId {
            self.oraculo
                .add_guess(dealer.0, new_guess(dealer.1, value, nonce, 10))
                .await
                .unwrap()
        }
        async fn assert_supply(&self) {
            let mut store = self.oraculo.db.begin().await.unwrap();
            let config = store.get_config().await.unwrap().unwrap();
            let balances = store.sum_balances().await.unwrap();
            let escrow = store.sum_escrow().await.unwrap();
            assert_eq!(balances + escrow, u64::from(config.issued));
            assert!(config.issued <= config.max_supply);
        }
    }

    fn new_guess(dealer: NftId, value: Decimal, nonce: Nonce, deposit: Chips) -> NewGuess {
        NewGuess {
            commitment: Commitment::of(&value, nonce),
            dealer,
            asset: ExternalAsset {
                address: "0xa324175E95Ef225dDCc1852F9F7939D997c0757d".into(),
                chain_id: 1,
            },
            timestamp: Utc::now(),
            initial_price: dec!(97.12),
            needed_deposit: deposit,
        }
    }
    fn disclose(end_price: Decimal, guessed_value: Decimal, nonce: Nonce) -> Disclosure {
        Disclosure {
            end_price,
            guessed_value,
            nonce,
        }
    }

    #[tokio::test]
    async fn bootstrap_mints_initial_chips() {
        let g = game().await;
        assert_eq!(g.oraculo.credit_balance_of(&g.admin).await.unwrap(), 1_000_000);
        assert_eq!(g.oraculo.role_of(&g.admin).await.unwrap(), Role::Administrator);
        assert_eq!(g.oraculo.get_config().await.unwrap().issued, 1_000_000);
        g.assert_supply().await;
    }

    #[tokio::test]
    async fn commit_participate_reveal() {
        let g = game().await;
        let (dealer, d) = g.funded(IdentityClass::Dealer, 5).await;
        let (player, p) = g.funded(IdentityClass::Player, 11).await;
        assert_eq!(d, 1_000_000);

        let id = g.commit((&dealer, d), dec!(100), 1).await;
        assert_eq!(g.oraculo.get_dealer(d).await.unwrap().active_guesses, 1);
        g.oraculo
            .reveal_guess_to_player(&player, p, d, id)
            .await
            .unwrap();
        assert_eq!(g.oraculo.escrow_balance_of(d).await.unwrap(), 10);
        assert_eq!(g.oraculo.credit_balance_of(&player).await.unwrap(), 0);
        g.assert_supply().await;

        // The dealer cannot take deposits of a guess that is still open.
        assert!(matches!(
            g.oraculo.withdraw_from_identifier(&dealer, d).await,
            Err(GameError::NoFundsToWithdraw)
        ));

        let correct = g
            .oraculo
            .reveal_price_for_guess(d, id, disclose(dec!(100), dec!(100), 1))
            .await
            .unwrap();
        assert!(correct);
        let record = g.oraculo.get_dealer(d).await.unwrap();
        assert_eq!(record.active_guesses, 0);
        assert_eq!(record.correct_guesses, 1);
        let guess = g.oraculo.get_guess(d, id).await.unwrap();
        assert_eq!(guess.participants, vec![Participant { player: p, deposit: 10 }]);
        assert!(guess.reveal.unwrap().correct);

        assert_eq!(g.oraculo.withdraw_from_identifier(&dealer, d).await.unwrap(), 10);
        assert_eq!(g.oraculo.credit_balance_of(&dealer).await.unwrap(), 14);
        g.assert_supply().await;

        let events = g.oraculo.get_events(0, 100).await.unwrap();
        let revealed = events
            .iter()
            .filter(|r| matches!(r.event, Event::GuessRevealed { .. }))
            .count();
        assert_eq!(revealed, 1);
        assert!(events.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[tokio::test]
    async fn wrong_disclosure_keeps_guess_open() {
        let g = game().await;
        let (dealer, d) = g.funded(IdentityClass::Dealer, 5).await;
        let id = g.commit((&dealer, d), dec!(100), 1).await;

        assert!(matches!(
            g.oraculo
                .reveal_price_for_guess(d, id, disclose(dec!(100), dec!(101), 1))
                .await,
            Err(GameError::GuessedPriceAndNonceDoNotMatchHash)
        ));
        assert!(matches!(
            g.oraculo
                .reveal_price_for_guess(d, id, disclose(dec!(100), dec!(100), 2))
                .await,
            Err(GameError::GuessedPriceAndNonceDoNotMatchHash)
        ));
        assert!(!g.oraculo.get_guess(d, id).await.unwrap().is_revealed());
        assert_eq!(g.oraculo.get_dealer(d).await.unwrap().active_guesses, 1);

        // Trailing zeros do not change the committed value.
        let correct = g
            .oraculo
            .reveal_price_for_guess(d, id, disclose(dec!(99), dec!(100.000), 1))
            .await
            .unwrap();
        assert!(!correct);
        assert!(matches!(
            g.oraculo
                .reveal_price_for_guess(d, id, disclose(dec!(100), dec!(100), 1))
                .await,
            Err(GameError::PriceForGuessAlreadyRevealed)
        ));
        let record = g.oraculo.get_dealer(d).await.unwrap();
        assert_eq!(record.active_guesses, 0);
        assert_eq!(record.correct_guesses, 0);
    }

    #[tokio::test]
    async fn mint_price_doubles_per_tier() {
        let g = game().await;
        for i in 0..10 {
            let (_, user) = generate_keypair(&mut rand::thread_rng());
            let invoice = g.oraculo.request_mint_invoice(IdentityClass::Dealer).await.unwrap();
            assert_eq!(invoice.price, 1000);
            let id = g
                .oraculo
                .mint_identifier(&user, IdentityClass::Dealer, invoice.payment_hash)
                .await
                .unwrap();
            assert_eq!(id, 1_000_000 + i);
        }
        let (_, user) = generate_keypair(&mut rand::thread_rng());
        let (cheap, _) = g.funding.create_bolt11(1000).await.unwrap();
        assert!(matches!(
            g.oraculo
                .mint_identifier(&user, IdentityClass::Dealer, cheap)
                .await,
            Err(GameError::NotEnoughPaymentForMinting {
                price: 2000,
                paid: 1000
            })
        ));
        let invoice = g.oraculo.request_mint_invoice(IdentityClass::Dealer).await.unwrap();
        assert_eq!(invoice.price, 2000);
        let id = g
            .oraculo
            .mint_identifier(&user, IdentityClass::Dealer, invoice.payment_hash.clone())
            .await
            .unwrap();
        assert_eq!(id, 1_000_010);
        assert_eq!(g.oraculo.get_config().await.unwrap().native_balance, 12_000);

        // A payment buys one identifier only.
        assert!(matches!(
            g.oraculo
                .mint_identifier(&user, IdentityClass::Dealer, invoice.payment_hash)
                .await,
            Err(GameError::PaymentAlreadyUsed(_))
        ));
        let pending = "pending".to_string();
        g.funding.insert(pending.clone(), PaymentState::Created).unwrap();
        assert!(matches!(
            g.oraculo
                .mint_identifier(&user, IdentityClass::Player, pending)
                .await,
            Err(GameError::PaymentNotSettled(_))
        ));
    }

    #[tokio::test]
    async fn player_short_of_fee_and_deposit() {
        let g = game().await;
        let (dealer, d) = g.funded(IdentityClass::Dealer, 5).await;
        let (player, p) = g.funded(IdentityClass::Player, 10).await;
        let id = g.commit((&dealer, d), dec!(100), 1).await;

        assert!(matches!(
            g.oraculo.reveal_guess_to_player(&player, p, d, id).await,
            Err(GameError::NotEnoughTokensToRevealAndDeposit {
                needed: 11,
                available: 10
            })
        ));
        assert_eq!(g.oraculo.credit_balance_of(&player).await.unwrap(), 10);
        assert_eq!(g.oraculo.escrow_balance_of(d).await.unwrap(), 0);
        assert!(g.oraculo.get_guess(d, id).await.unwrap().participants.is_empty());
    }

    #[tokio::test]
    async fn roles_gate_guess_operations() {
        let g = game().await;
        let (dealer, d) = g.funded(IdentityClass::Dealer, 5).await;
        let (player, p) = g.funded(IdentityClass::Player, 50).await;
        let (_, nobody) = generate_keypair(&mut rand::thread_rng());

        for caller in [&player, &nobody] {
            assert!(matches!(
                g.oraculo.add_guess(caller, new_guess(d, dec!(1), 1, 10)).await,
                Err(GameError::Unauthorized)
            ));
        }
        // Holding a player id does not make the dealer a player.
        let id = g.commit((&dealer, d), dec!(1), 1).await;
        assert!(matches!(
            g.oraculo.reveal_guess_to_player(&dealer, p, d, id).await,
            Err(GameError::Unauthorized)
        ));
        assert!(matches!(
            g.oraculo.reveal_guess_to_player(&dealer, d, d, id).await,
            Err(GameError::Unauthorized)
        ));
        assert!(matches!(
            g.oraculo.withdraw_from_identifier(&player, d).await,
            Err(GameError::NftDoesNotExistOrSenderNotOwner(_))
        ));
        assert!(matches!(
            g.oraculo.set_max_active_guesses(&dealer, 100).await,
            Err(GameError::Unauthorized)
        ));
        assert!(matches!(
            g.oraculo.mint_chips(&dealer, &dealer, 100).await,
            Err(GameError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn active_guesses_are_capped() {
        let g = game_with(|game| game.max_active_guesses = 2).await;
        let (dealer, d) = g.funded(IdentityClass::Dealer, 5).await;
        let first = g.commit((&dealer, d), dec!(1), 1).await;
        g.commit((&dealer, d), dec!(2), 2).await;
        assert!(matches!(
            g.oraculo.add_guess(&dealer, new_guess(d, dec!(3), 3, 10)).await,
            Err(GameError::DealerReachedMaxGuesses(_))
        ));
        assert_eq!(g.oraculo.credit_balance_of(&dealer).await.unwrap(), 3);

        g.oraculo
            .reveal_price_for_guess(d, first, disclose(dec!(1), dec!(1), 1))
            .await
            .unwrap();
        let id = g.commit((&dealer, d), dec!(3), 3).await;
        assert_eq!(id, 2);
        assert_eq!(g.oraculo.get_guesses(d).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn small_range_runs_out() {
        let g = game().await;
        g.oraculo
            .set_range(
                &g.admin,
                IdentityClass::Player,
                IdRange {
                    first: 2_000_000,
                    last: 2_000_001,
                },
            )
            .await
            .unwrap();
        g.funded(IdentityClass::Player, 0).await;
        g.funded(IdentityClass::Player, 0).await;
        let (_, user) = generate_keypair(&mut rand::thread_rng());
        assert!(matches!(
            g.buy(&user, IdentityClass::Player).await,
            Err(GameError::AllPlayerTokensMinted)
        ));
        assert!(matches!(
            g.oraculo
                .grant_identifier(&g.admin, IdentityClass::Player, &user)
                .await,
            Err(GameError::AllPlayerTokensMinted)
        ));
        let id = g
            .oraculo
            .grant_identifier(&g.admin, IdentityClass::Dealer, &user)
            .await
            .unwrap();
        assert_eq!(g.oraculo.role_of(&user).await.unwrap(), Role::Dealer(id));
    }

    #[tokio::test]
    async fn concurrent_mints_get_distinct_ids() {
        let g = Arc::new(game().await);
        let mut handles = vec![];
        for _ in 0..5 {
            let g = g.clone();
            handles.push(tokio::spawn(async move {
                let (_, user) = generate_keypair(&mut rand::thread_rng());
                g.oraculo
                    .grant_identifier(&g.admin, IdentityClass::Player, &user)
                    .await
                    .unwrap()
            }));
        }
        let mut ids = vec![];
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.sort();
        assert_eq!(ids, (2_000_000..2_000_005).collect::<Vec<_>>());
    }

    struct ReturnDeposits;
    impl SettlementPolicy for ReturnDeposits {
        fn payouts(&self, guess: &Guess, _reveal: &GuessReveal) -> Vec<(NftId, Chips)> {
            guess
                .participants
                .iter()
                .map(|p| (p.player, p.deposit))
                .collect()
        }
    }

    #[tokio::test]
    async fn settlement_policy_pays_players() {
        let mut g = game().await;
        g.oraculo = g.oraculo.with_settlement(ReturnDeposits);
        let (dealer, d) = g.funded(IdentityClass::Dealer, 5).await;
        let (player, p) = g.funded(IdentityClass::Player, 11).await;
        let id = g.commit((&dealer, d), dec!(5), 9).await;
        g.oraculo
            .reveal_guess_to_player(&player, p, d, id)
            .await
            .unwrap();
        g.oraculo
            .reveal_price_for_guess(d, id, disclose(dec!(5), dec!(5), 9))
            .await
            .unwrap();
        assert_eq!(g.oraculo.credit_balance_of(&player).await.unwrap(), 10);
        assert_eq!(g.oraculo.escrow_balance_of(d).await.unwrap(), 0);
        g.assert_supply().await;
    }

    struct DoubleDeposits;
    impl SettlementPolicy for DoubleDeposits {
        fn payouts(&self, guess: &Guess, _reveal: &GuessReveal) -> Vec<(NftId, Chips)> {
            guess
                .participants
                .iter()
                .map(|p| (p.player, p.deposit * 2))
                .collect()
        }
    }

    #[tokio::test]
    async fn payouts_cannot_touch_open_guess_deposits() {
        let mut g = game().await;
        g.oraculo = g.oraculo.with_settlement(DoubleDeposits);
        let (dealer, d) = g.funded(IdentityClass::Dealer, 5).await;
        let (player, p) = g.funded(IdentityClass::Player, 22).await;
        let first = g.commit((&dealer, d), dec!(5), 1).await;
        let second = g.commit((&dealer, d), dec!(6), 2).await;
        for id in [first, second] {
            g.oraculo
                .reveal_guess_to_player(&player, p, d, id)
                .await
                .unwrap();
        }
        assert_eq!(g.oraculo.escrow_balance_of(d).await.unwrap(), 20);

        assert!(matches!(
            g.oraculo
                .reveal_price_for_guess(d, first, disclose(dec!(5), dec!(5), 1))
                .await,
            Err(GameError::InsufficientBalance {
                needed: 20,
                available: 10
            })
        ));
        assert_eq!(g.oraculo.escrow_balance_of(d).await.unwrap(), 20);
        assert!(g.oraculo.get_guess(d, first).await.unwrap().reveal.is_none());
        assert_eq!(g.oraculo.get_dealer(d).await.unwrap().active_guesses, 2);

        g.oraculo = g.oraculo.with_settlement(ReturnDeposits);
        g.oraculo
            .reveal_price_for_guess(d, first, disclose(dec!(5), dec!(5), 1))
            .await
            .unwrap();
        assert_eq!(g.oraculo.credit_balance_of(&player).await.unwrap(), 10);
        assert_eq!(g.oraculo.escrow_balance_of(d).await.unwrap(), 10);
        assert!(matches!(
            g.oraculo.withdraw_from_identifier(&dealer, d).await,
            Err(GameError::NoFundsToWithdraw)
        ));
        g.assert_supply().await;
    }

    #[tokio::test]
    async fn failed_native_payout_restores_balance() {
        let g = game().await;
        g.funded(IdentityClass::Dealer, 0).await;
        let (_, other) = generate_keypair(&mut rand::thread_rng());
        let invoice = "lnbc1000".to_string();
        assert!(matches!(
            g.oraculo.withdraw_native_payments(&other, invoice.clone()).await,
            Err(GameError::Unauthorized)
        ));

        g.funding.reject_payouts(true);
        assert!(matches!(
            g.oraculo.withdraw_native_payments(&g.admin, invoice.clone()).await,
            Err(GameError::Payment(_))
        ));
        assert_eq!(g.oraculo.get_config().await.unwrap().native_balance, 1000);

        g.funding.reject_payouts(false);
        assert_eq!(
            g.oraculo
                .withdraw_native_payments(&g.admin, invoice.clone())
                .await
                .unwrap(),
            1000
        );
        assert_eq!(g.funding.paid_out().unwrap(), vec![(invoice.clone(), 1000)]);
        assert!(matches!(
            g.oraculo.withdraw_native_payments(&g.admin, invoice).await,
            Err(GameError::NoNativePaymentsToWithdraw)
        ));
    }

    #[tokio::test]
    async fn fee_sink_and_administration() {
        let g = game().await;
        let (_, treasury) = generate_keypair(&mut rand::thread_rng());
        assert_eq!(
            g.oraculo.withdraw_fee_sink(&g.admin, &treasury).await.unwrap(),
            1_000_000
        );
        assert!(matches!(
            g.oraculo.withdraw_fee_sink(&g.admin, &treasury).await,
            Err(GameError::NoChipsToWithdraw)
        ));
        g.oraculo
            .transfer_administration(&g.admin, treasury)
            .await
            .unwrap();
        assert_eq!(g.oraculo.role_of(&treasury).await.unwrap(), Role::Administrator);
        assert!(matches!(
            g.oraculo.mint_chips(&g.admin, &g.admin, 1).await,
            Err(GameError::Unauthorized)
        ));
        assert!(matches!(
            g.oraculo.mint_chips(&treasury, &treasury, u32::MAX).await,
            Err(GameError::SupplyCapExceeded { .. })
        ));
        g.assert_supply().await;
    }

    #[tokio::test]
    async fn login_with_signed_challenge() {
        let g = game().await;
        let secp = Secp256k1::new();
        let (secret, user) = generate_keypair(&mut rand::thread_rng());
        let challenge = g.oraculo.create_login_challenge(user).await.unwrap();
        let sig = secp.sign_ecdsa(
            &Message::from_hashed_data::<Hash>(challenge.as_bytes()),
            &secret,
        );
        let access = AccessRequest {
            user,
            challenge: challenge.clone(),
            sig,
        };
        g.oraculo.check_access(access.clone()).await.unwrap_err();
        g.oraculo
            .try_login(user, sig, challenge.clone())
            .await
            .unwrap();
        assert_eq!(g.oraculo.check_access(access).await.unwrap(), user);

        let (_, other) = generate_keypair(&mut rand::thread_rng());
        g.oraculo.try_login(other, sig, challenge).await.unwrap_err();
    }
}
