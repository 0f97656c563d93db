use crate::api::*;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use secp256k1::ecdsa::Signature;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{query, Executor, Row, Sqlite, SqliteConnection, SqlitePool, Transaction};
use std::str::FromStr;

#[async_trait]
pub trait DB {
    /// Opens a unit of work. Nothing written through the returned [`Store`]
    /// is visible to others until [`Store::commit`], and dropping it rolls back.
    async fn begin(&self) -> Result<Box<dyn Store>>;

    async fn create_session(&self, user: UserPubKey, challenge: String) -> Result<()>;
    async fn update_access_token(
        &self,
        user: UserPubKey,
        sig: Signature,
        challenge: String,
    ) -> Result<()>;
    async fn get_last_access(
        &self,
        user: UserPubKey,
        challenge: String,
    ) -> Result<(Signature, DateTime<Utc>)>;
}

#[async_trait]
pub trait Store: Send {
    async fn get_config(&mut self) -> Result<Option<GameConfig>>;
    async fn put_config(&mut self, config: &GameConfig) -> Result<()>;

    async fn get_balance(&mut self, holder: &UserPubKey) -> Result<Chips>;
    async fn set_balance(&mut self, holder: &UserPubKey, amount: Chips) -> Result<()>;
    async fn sum_balances(&mut self) -> Result<u64>;

    async fn get_holder(&mut self, id: NftId) -> Result<Option<UserPubKey>>;
    async fn insert_identifier(
        &mut self,
        id: NftId,
        class: IdentityClass,
        holder: &UserPubKey,
    ) -> Result<()>;
    async fn get_identifiers(&mut self, holder: &UserPubKey) -> Result<Vec<NftId>>;
    /// Lowest and highest issued identifier of a class.
    async fn issued_bounds(&mut self, class: IdentityClass) -> Result<Option<(NftId, NftId)>>;

    async fn get_escrow(&mut self, id: NftId) -> Result<Chips>;
    async fn set_escrow(&mut self, id: NftId, amount: Chips) -> Result<()>;
    async fn sum_escrow(&mut self) -> Result<u64>;

    async fn get_dealer(&mut self, id: NftId) -> Result<Option<Dealer>>;
    async fn put_dealer(&mut self, dealer: &Dealer) -> Result<()>;

    async fn get_guess(&mut self, dealer: NftId, guess: GuessId) -> Result<Option<Guess>>;
    async fn get_guesses(&mut self, dealer: NftId) -> Result<Vec<Guess>>;
    async fn insert_guess(&mut self, guess: &Guess) -> Result<()>;
    async fn set_reveal(&mut self, dealer: NftId, guess: GuessId, reveal: &GuessReveal)
        -> Result<()>;
    async fn add_participant(
        &mut self,
        dealer: NftId,
        guess: GuessId,
        participant: &Participant,
    ) -> Result<()>;
    /// Sum of participant deposits on the unrevealed guesses of a dealer.
    async fn outstanding_deposits(&mut self, dealer: NftId) -> Result<u64>;

    /// Marks a settled payment as spent. Returns false if it already was.
    async fn consume_payment(&mut self, hash: &PaymentHash, amount: Sats) -> Result<bool>;

    async fn push_event(&mut self, event: &Event) -> Result<EventId>;
    async fn get_events(&mut self, since: EventId, limit: u32) -> Result<Vec<EventRecord>>;

    async fn commit(&mut self) -> Result<()>;
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS game_config (\
        id INTEGER PRIMARY KEY CHECK (id = 1),\
        config TEXT NOT NULL\
        )",
    "CREATE TABLE IF NOT EXISTS balances (\
        holder TEXT PRIMARY KEY,\
        amount INTEGER NOT NULL\
        )",
    "CREATE TABLE IF NOT EXISTS identifiers (\
        id INTEGER PRIMARY KEY,\
        class TEXT NOT NULL,\
        holder TEXT NOT NULL\
        )",
    "CREATE TABLE IF NOT EXISTS escrow (\
        id INTEGER PRIMARY KEY,\
        amount INTEGER NOT NULL\
        )",
    "CREATE TABLE IF NOT EXISTS dealers (\
        id INTEGER PRIMARY KEY,\
        correct_guesses INTEGER NOT NULL,\
        active_guesses INTEGER NOT NULL,\
        next_guess_id INTEGER NOT NULL,\
        guess_fee INTEGER,\
        reveal_fee INTEGER\
        )",
    "CREATE TABLE IF NOT EXISTS guesses (\
        dealer INTEGER NOT NULL,\
        id INTEGER NOT NULL,\
        asset_address TEXT NOT NULL,\
        chain_id INTEGER NOT NULL,\
        created_at TEXT NOT NULL,\
        commitment TEXT NOT NULL,\
        initial_price TEXT NOT NULL,\
        needed_deposit INTEGER NOT NULL,\
        end_price TEXT,\
        guessed_value TEXT,\
        nonce TEXT,\
        correct BOOLEAN,\
        PRIMARY KEY (dealer, id)\
        )",
    "CREATE TABLE IF NOT EXISTS participants (\
        dealer INTEGER NOT NULL,\
        guess INTEGER NOT NULL,\
        position INTEGER NOT NULL,\
        player INTEGER NOT NULL,\
        deposit INTEGER NOT NULL,\
        PRIMARY KEY (dealer, guess, player)\
        )",
    "CREATE TABLE IF NOT EXISTS payments (\
        hash TEXT PRIMARY KEY,\
        amount INTEGER NOT NULL\
        )",
    "CREATE TABLE IF NOT EXISTS events (\
        id INTEGER PRIMARY KEY AUTOINCREMENT,\
        event TEXT NOT NULL\
        )",
    "CREATE TABLE IF NOT EXISTS sessions (\
        pubkey TEXT NOT NULL,\
        challenge TEXT NOT NULL,\
        access_token TEXT,\
        last_access INTEGER,\
        PRIMARY KEY (pubkey, challenge)\
        )",
];

pub struct SQLite {
    connection: SqlitePool,
}
impl SQLite {
    pub async fn new(db_conn: Option<String>) -> Result<Self> {
        let url = db_conn.unwrap_or_else(|| "sqlite::memory:".to_string());
        let in_memory = url.contains(":memory:");
        let options = SqliteConnectOptions::from_str(&url)
            .with_context(|| format!("invalid database url {}", url))?
            .create_if_missing(true);
        // An in-memory database only lives as long as its one connection.
        let connection = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 4 })
            .idle_timeout(None::<std::time::Duration>)
            .max_lifetime(None::<std::time::Duration>)
            .connect_with(options)
            .await
            .with_context(|| format!("couldn't open database {}", url))?;
        for statement in SCHEMA {
            connection.execute(*statement).await?;
        }
        Ok(Self { connection })
    }
}
#[async_trait]
impl DB for SQLite {
    async fn begin(&self) -> Result<Box<dyn Store>> {
        let tx = self
            .connection
            .begin()
            .await
            .context("couldn't begin transaction")?;
        Ok(Box::new(SqliteStore { tx: Some(tx) }))
    }
    async fn create_session(&self, user: UserPubKey, challenge: String) -> Result<()> {
        let stmt = query(
            "INSERT OR IGNORE INTO sessions \
            (pubkey, challenge) VALUES (?,?)",
        );
        self.connection
            .execute(stmt.bind(user.to_string()).bind(challenge))
            .await?;
        Ok(())
    }
    async fn update_access_token(
        &self,
        user: UserPubKey,
        sig: Signature,
        challenge: String,
    ) -> Result<()> {
        let stmt = query(
            "UPDATE sessions SET \
            access_token = ?, \
            last_access = ? \
            WHERE pubkey = ? AND challenge = ?",
        );
        let result = self
            .connection
            .execute(
                stmt.bind(sig.to_string())
                    .bind(Utc::now().timestamp())
                    .bind(user.to_string())
                    .bind(challenge),
            )
            .await?;
        if result.rows_affected() == 0 {
            bail!("No login challenge issued for user {}", user)
        }
        Ok(())
    }
    async fn get_last_access(
        &self,
        user: UserPubKey,
        challenge: String,
    ) -> Result<(Signature, DateTime<Utc>)> {
        let stmt = query(
            "SELECT access_token, last_access \
            FROM sessions \
            WHERE pubkey = ? AND challenge = ?",
        );
        let row = self
            .connection
            .fetch_optional(stmt.bind(user.to_string()).bind(challenge))
            .await?
            .with_context(|| format!("no session for user {}", user))?;
        let token: Option<String> = row.get("access_token");
        let last_access: Option<i64> = row.get("last_access");
        match (token, last_access) {
            (Some(token), Some(last_access)) => Ok((
                Signature::from_str(token.as_str())?,
                DateTime::<Utc>::from_timestamp(last_access, 0)
                    .context("invalid last access timestamp")?,
            )),
            _ => bail!("User {} never completed the login", user),
        }
    }
}

pub struct SqliteStore {
    tx: Option<Transaction<'static, Sqlite>>,
}
impl SqliteStore {
    fn conn(&mut self) -> Result<&mut SqliteConnection> {
        match self.tx.as_mut() {
            Some(tx) => Ok(&mut **tx),
            None => bail!("transaction was already committed"),
        }
    }
    async fn participants(&mut self, dealer: NftId, guess: GuessId) -> Result<Vec<Participant>> {
        let rows = query(
            "SELECT player, deposit FROM participants \
            WHERE dealer = ? AND guess = ? \
            ORDER BY position",
        )
        .bind(dealer)
        .bind(guess)
        .fetch_all(self.conn()?)
        .await?;
        let mut participants = Vec::with_capacity(rows.len());
        for row in rows {
            participants.push(Participant {
                player: row.try_get("player")?,
                deposit: row.try_get("deposit")?,
            });
        }
        Ok(participants)
    }
}
fn guess_from_row(row: &SqliteRow) -> Result<Guess> {
    let commitment: String = row.try_get("commitment")?;
    let initial_price: String = row.try_get("initial_price")?;
    let end_price: Option<String> = row.try_get("end_price")?;
    let reveal = match end_price {
        Some(end_price) => {
            let guessed_value: String = row.try_get("guessed_value")?;
            let nonce: String = row.try_get("nonce")?;
            Some(GuessReveal {
                end_price: Decimal::from_str(&end_price)?,
                guessed_value: Decimal::from_str(&guessed_value)?,
                nonce: nonce.parse().context("invalid nonce in db")?,
                correct: row.try_get("correct")?,
            })
        }
        None => None,
    };
    Ok(Guess {
        dealer: row.try_get("dealer")?,
        id: row.try_get("id")?,
        asset: ExternalAsset {
            address: row.try_get("asset_address")?,
            chain_id: row.try_get("chain_id")?,
        },
        created_at: row.try_get("created_at")?,
        commitment: Commitment::from_str(&commitment)?,
        initial_price: Decimal::from_str(&initial_price)?,
        needed_deposit: row.try_get("needed_deposit")?,
        reveal,
        participants: vec![],
    })
}
#[async_trait]
impl Store for SqliteStore {
    async fn get_config(&mut self) -> Result<Option<GameConfig>> {
        let row = query("SELECT config FROM game_config WHERE id = 1")
            .fetch_optional(self.conn()?)
            .await?;
        match row {
            Some(row) => {
                let config: String = row.try_get("config")?;
                Ok(Some(
                    serde_json::from_str(&config).context("corrupt game config in db")?,
                ))
            }
            None => Ok(None),
        }
    }
    async fn put_config(&mut self, config: &GameConfig) -> Result<()> {
        query("INSERT OR REPLACE INTO game_config (id, config) VALUES (1, ?)")
            .bind(serde_json::to_string(config)?)
            .execute(self.conn()?)
            .await?;
        Ok(())
    }
    async fn get_balance(&mut self, holder: &UserPubKey) -> Result<Chips> {
        let row = query("SELECT amount FROM balances WHERE holder = ?")
            .bind(holder.to_string())
            .fetch_optional(self.conn()?)
            .await?;
        match row {
            Some(row) => Ok(row.try_get("amount")?),
            None => Ok(0),
        }
    }
    async fn set_balance(&mut self, holder: &UserPubKey, amount: Chips) -> Result<()> {
        query("INSERT OR REPLACE INTO balances (holder, amount) VALUES (?, ?)")
            .bind(holder.to_string())
            .bind(amount)
            .execute(self.conn()?)
            .await?;
        Ok(())
    }
    async fn sum_balances(&mut self) -> Result<u64> {
        let row = query("SELECT COALESCE(SUM(amount), 0) AS total FROM balances")
            .fetch_one(self.conn()?)
            .await?;
        let total: i64 = row.try_get("total")?;
        Ok(u64::try_from(total)?)
    }
    async fn get_holder(&mut self, id: NftId) -> Result<Option<UserPubKey>> {
        let row = query("SELECT holder FROM identifiers WHERE id = ?")
            .bind(id)
            .fetch_optional(self.conn()?)
            .await?;
        match row {
            Some(row) => {
                let holder: String = row.try_get("holder")?;
                Ok(Some(UserPubKey::from_str(&holder)?))
            }
            None => Ok(None),
        }
    }
    async fn insert_identifier(
        &mut self,
        id: NftId,
        class: IdentityClass,
        holder: &UserPubKey,
    ) -> Result<()> {
        query("INSERT INTO identifiers (id, class, holder) VALUES (?, ?, ?)")
            .bind(id)
            .bind(class.to_string())
            .bind(holder.to_string())
            .execute(self.conn()?)
            .await
            .with_context(|| format!("couldn't insert identifier {}", id))?;
        Ok(())
    }
    async fn get_identifiers(&mut self, holder: &UserPubKey) -> Result<Vec<NftId>> {
        let rows = query("SELECT id FROM identifiers WHERE holder = ? ORDER BY id")
            .bind(holder.to_string())
            .fetch_all(self.conn()?)
            .await?;
        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            ids.push(row.try_get("id")?);
        }
        Ok(ids)
    }
    async fn issued_bounds(&mut self, class: IdentityClass) -> Result<Option<(NftId, NftId)>> {
        let row = query("SELECT MIN(id) AS low, MAX(id) AS high FROM identifiers WHERE class = ?")
            .bind(class.to_string())
            .fetch_one(self.conn()?)
            .await?;
        let low: Option<NftId> = row.try_get("low")?;
        let high: Option<NftId> = row.try_get("high")?;
        Ok(low.zip(high))
    }
    async fn get_escrow(&mut self, id: NftId) -> Result<Chips> {
        let row = query("SELECT amount FROM escrow WHERE id = ?")
            .bind(id)
            .fetch_optional(self.conn()?)
            .await?;
        match row {
            Some(row) => Ok(row.try_get("amount")?),
            None => Ok(0),
        }
    }
    async fn set_escrow(&mut self, id: NftId, amount: Chips) -> Result<()> {
        query("INSERT OR REPLACE INTO escrow (id, amount) VALUES (?, ?)")
            .bind(id)
            .bind(amount)
            .execute(self.conn()?)
            .await?;
        Ok(())
    }
    async fn sum_escrow(&mut self) -> Result<u64> {
        let row = query("SELECT COALESCE(SUM(amount), 0) AS total FROM escrow")
            .fetch_one(self.conn()?)
            .await?;
        let total: i64 = row.try_get("total")?;
        Ok(u64::try_from(total)?)
    }
    async fn get_dealer(&mut self, id: NftId) -> Result<Option<Dealer>> {
        let row = query(
            "SELECT id, correct_guesses, active_guesses, next_guess_id, guess_fee, reveal_fee \
            FROM dealers WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.conn()?)
        .await?;
        match row {
            Some(row) => Ok(Some(Dealer {
                id: row.try_get("id")?,
                correct_guesses: row.try_get("correct_guesses")?,
                active_guesses: row.try_get("active_guesses")?,
                next_guess_id: row.try_get("next_guess_id")?,
                guess_fee: row.try_get("guess_fee")?,
                reveal_fee: row.try_get("reveal_fee")?,
            })),
            None => Ok(None),
        }
    }
    async fn put_dealer(&mut self, dealer: &Dealer) -> Result<()> {
        query(
            "INSERT OR REPLACE INTO dealers \
            (id, correct_guesses, active_guesses, next_guess_id, guess_fee, reveal_fee) \
            VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(dealer.id)
        .bind(dealer.correct_guesses)
        .bind(dealer.active_guesses)
        .bind(dealer.next_guess_id)
        .bind(dealer.guess_fee)
        .bind(dealer.reveal_fee)
        .execute(self.conn()?)
        .await?;
        Ok(())
    }
    async fn get_guess(&mut self, dealer: NftId, guess: GuessId) -> Result<Option<Guess>> {
        let row = query("SELECT * FROM guesses WHERE dealer = ? AND id = ?")
            .bind(dealer)
            .bind(guess)
            .fetch_optional(self.conn()?)
            .await?;
        match row {
            Some(row) => {
                let mut guess = guess_from_row(&row)?;
                guess.participants = self.participants(guess.dealer, guess.id).await?;
                Ok(Some(guess))
            }
            None => Ok(None),
        }
    }
    async fn get_guesses(&mut self, dealer: NftId) -> Result<Vec<Guess>> {
        let rows = query("SELECT * FROM guesses WHERE dealer = ? ORDER BY id")
            .bind(dealer)
            .fetch_all(self.conn()?)
            .await?;
        let mut guesses = Vec::with_capacity(rows.len());
        for row in rows {
            let mut guess = guess_from_row(&row)?;
            guess.participants = self.participants(guess.dealer, guess.id).await?;
            guesses.push(guess);
        }
        Ok(guesses)
    }
    async fn insert_guess(&mut self, guess: &Guess) -> Result<()> {
        query(
            "INSERT INTO guesses (\
            dealer,\
            id,\
            asset_address,\
            chain_id,\
            created_at,\
            commitment,\
            initial_price,\
            needed_deposit)\
            VALUES (?,?,?,?,?,?,?,?)",
        )
        .bind(guess.dealer)
        .bind(guess.id)
        .bind(guess.asset.address.clone())
        .bind(guess.asset.chain_id)
        .bind(guess.created_at)
        .bind(guess.commitment.to_string())
        .bind(guess.initial_price.to_string())
        .bind(guess.needed_deposit)
        .execute(self.conn()?)
        .await
        .with_context(|| format!("couldn't insert guess {} of dealer {}", guess.id, guess.dealer))?;
        Ok(())
    }
    async fn set_reveal(
        &mut self,
        dealer: NftId,
        guess: GuessId,
        reveal: &GuessReveal,
    ) -> Result<()> {
        query(
            "UPDATE guesses SET \
            end_price = ?, \
            guessed_value = ?, \
            nonce = ?, \
            correct = ? \
            WHERE dealer = ? AND id = ?",
        )
        .bind(reveal.end_price.to_string())
        .bind(reveal.guessed_value.to_string())
        .bind(reveal.nonce.to_string())
        .bind(reveal.correct)
        .bind(dealer)
        .bind(guess)
        .execute(self.conn()?)
        .await?;
        Ok(())
    }
    async fn add_participant(
        &mut self,
        dealer: NftId,
        guess: GuessId,
        participant: &Participant,
    ) -> Result<()> {
        query(
            "INSERT INTO participants (dealer, guess, position, player, deposit) \
            VALUES (?, ?, \
            (SELECT COUNT(*) FROM participants WHERE dealer = ? AND guess = ?), \
            ?, ?)",
        )
        .bind(dealer)
        .bind(guess)
        .bind(dealer)
        .bind(guess)
        .bind(participant.player)
        .bind(participant.deposit)
        .execute(self.conn()?)
        .await?;
        Ok(())
    }
    async fn outstanding_deposits(&mut self, dealer: NftId) -> Result<u64> {
        let row = query(
            "SELECT COALESCE(SUM(p.deposit), 0) AS total \
            FROM participants p JOIN guesses g \
            ON p.dealer = g.dealer AND p.guess = g.id \
            WHERE p.dealer = ? AND g.end_price IS NULL",
        )
        .bind(dealer)
        .fetch_one(self.conn()?)
        .await?;
        let total: i64 = row.try_get("total")?;
        Ok(u64::try_from(total)?)
    }
    async fn consume_payment(&mut self, hash: &PaymentHash, amount: Sats) -> Result<bool> {
        let result = query("INSERT OR IGNORE INTO payments (hash, amount) VALUES (?, ?)")
            .bind(hash.clone())
            .bind(amount)
            .execute(self.conn()?)
            .await?;
        Ok(result.rows_affected() == 1)
    }
    async fn push_event(&mut self, event: &Event) -> Result<EventId> {
        let id = query("INSERT INTO events (event) VALUES (?)")
            .bind(serde_json::to_string(event)?)
            .execute(self.conn()?)
            .await?
            .last_insert_rowid();
        Ok(id)
    }
    async fn get_events(&mut self, since: EventId, limit: u32) -> Result<Vec<EventRecord>> {
        let rows = query("SELECT id, event FROM events WHERE id > ? ORDER BY id LIMIT ?")
            .bind(since)
            .bind(limit)
            .fetch_all(self.conn()?)
            .await?;
        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let event: String = row.try_get("event")?;
            events.push(EventRecord {
                id: row.try_get("id")?,
                event: serde_json::from_str(&event).context("corrupt event in db")?,
            });
        }
        Ok(events)
    }
    async fn commit(&mut self) -> Result<()> {
        match self.tx.take() {
            Some(tx) => Ok(tx.commit().await.context("couldn't commit transaction")?),
            None => bail!("transaction was already committed"),
        }
    }
}
