use anyhow::anyhow;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub type Chips = u32;
pub type Sats = u32;
pub type UserPubKey = secp256k1::PublicKey;
pub type NftId = u32;
pub type GuessId = u32;
pub type Nonce = u64;
pub type Payment = String;
pub type PaymentHash = String;
pub type EventId = i64;

/// Asset id of the fungible chip balance. Identifiers never use it.
pub const CHIPS_ID: NftId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdentityClass {
    Dealer,
    Player,
}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdRange {
    pub first: NftId,
    pub last: NftId,
}
impl IdRange {
    pub fn contains(&self, id: NftId) -> bool {
        self.first <= id && id <= self.last
    }
    pub fn overlaps(&self, other: &IdRange) -> bool {
        self.first <= other.last && other.first <= self.last
    }
}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Administrator,
    Dealer(NftId),
    Player(NftId),
    None,
}

/// Binding of a dealer's hidden guess: sha256 over the normalized decimal
/// string, a `|` separator and the big endian nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Commitment([u8; 32]);
impl Commitment {
    pub fn of(value: &Decimal, nonce: Nonce) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(value.normalize().to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(nonce.to_be_bytes());
        let mut out = [0u8; 32];
        out.copy_from_slice(&hasher.finalize());
        Self(out)
    }
    pub fn matches(&self, value: &Decimal, nonce: Nonce) -> bool {
        *self == Self::of(value, nonce)
    }
}
impl TryFrom<String> for Commitment {
    type Error = anyhow::Error;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        let bytes = hex::decode(s.trim_start_matches("0x"))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| anyhow!("commitment has {} bytes, expected 32", b.len()))?;
        Ok(Self(bytes))
    }
}
impl From<Commitment> for String {
    fn from(c: Commitment) -> Self {
        hex::encode(c.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalAsset {
    pub address: String,
    pub chain_id: u32,
}
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guess {
    pub dealer: NftId,
    pub id: GuessId,
    pub asset: ExternalAsset,
    pub created_at: DateTime<Utc>,
    pub commitment: Commitment,
    pub initial_price: Decimal,
    pub needed_deposit: Chips,
    pub reveal: Option<GuessReveal>,
    pub participants: Vec<Participant>,
}
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuessReveal {
    pub end_price: Decimal,
    pub guessed_value: Decimal,
    pub nonce: Nonce,
    pub correct: bool,
}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub player: NftId,
    pub deposit: Chips,
}
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dealer {
    pub id: NftId,
    pub correct_guesses: u32,
    pub active_guesses: u32,
    pub next_guess_id: GuessId,
    pub guess_fee: Option<Chips>,
    pub reveal_fee: Option<Chips>,
}
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSchedule {
    pub base: Sats,
    pub tier_size: u32,
    pub tier_multiplier: Decimal,
}
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameConfig {
    pub admin: UserPubKey,
    pub max_supply: Chips,
    pub issued: Chips,
    pub max_active_guesses: u32,
    pub dealer_range: IdRange,
    pub next_dealer: NftId,
    pub player_range: IdRange,
    pub next_player: NftId,
    pub dealer_price: PriceSchedule,
    pub player_price: PriceSchedule,
    pub default_guess_fee: Chips,
    pub default_reveal_fee: Chips,
    pub native_balance: Sats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WithdrawalSource {
    Escrow(NftId),
    FeeSink,
    NativePayments,
}
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    IdentifierMinted {
        class: IdentityClass,
        id: NftId,
        to: UserPubKey,
        paid: Sats,
    },
    GuessCreated {
        dealer_holder: UserPubKey,
        dealer: NftId,
        guess: GuessId,
        commitment: Commitment,
        asset: ExternalAsset,
        created_at: DateTime<Utc>,
        initial_price: Decimal,
        needed_deposit: Chips,
        fee: Chips,
    },
    GuessParticipation {
        player_holder: UserPubKey,
        player: NftId,
        dealer: NftId,
        guess: GuessId,
        asset: ExternalAsset,
        initial_price: Decimal,
        deposit: Chips,
        fee: Chips,
    },
    GuessRevealed {
        asset: ExternalAsset,
        created_at: DateTime<Utc>,
        end_price: Decimal,
        initial_price: Decimal,
        guessed_value: Decimal,
        correct: bool,
        dealer: NftId,
        guess: GuessId,
        participants: u32,
    },
    Withdrawal {
        source: WithdrawalSource,
        recipient: String,
        amount: u32,
    },
}
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: EventId,
    pub event: Event,
}
