//! Server and game settings.
//!
//! Sources are layered in this order, later ones winning: built-in defaults,
//! the optional TOML file, then `ORACULO_*` environment variables where `__`
//! separates nested keys (e.g. `ORACULO_GAME__MAX_ACTIVE_GUESSES=20`).
use crate::api::*;
use anyhow::{bail, Context, Result};
use config::{Config, Environment, File, FileFormat};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8081;
pub const DEFAULT_CONFIG_FILE: &str = "oraculo.toml";

const INITIAL_CHIPS: Chips = 1_000_000;
const MAX_SUPPLY: Chips = 1_000_000_000;
const MAX_ACTIVE_GUESSES: u32 = 10;
const DEALER_RANGE: IdRange = IdRange {
    first: 1_000_000,
    last: 1_000_999,
};
const PLAYER_RANGE: IdRange = IdRange {
    first: 2_000_000,
    last: 2_999_999,
};
const DEALER_BASE_PRICE: Sats = 1_000;
const PLAYER_BASE_PRICE: Sats = 500;
const TIER_SIZE: u32 = 10;
const TIER_MULTIPLIER: &str = "2";
const DEFAULT_GUESS_FEE: Chips = 1;
const DEFAULT_REVEAL_FEE: Chips = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSettings {
    pub admin: UserPubKey,
    /// Minted to the administrator when the game is first bootstrapped.
    pub initial_chips: Chips,
    pub max_supply: Chips,
    pub max_active_guesses: u32,
    pub dealer_range: IdRange,
    pub player_range: IdRange,
    pub dealer_base_price: Sats,
    pub player_base_price: Sats,
    pub tier_size: u32,
    pub tier_multiplier: Decimal,
    pub default_guess_fee: Chips,
    pub default_reveal_fee: Chips,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    /// sqlx connection url, in-memory when unset
    pub database: Option<String>,
    pub log_level: String,
    pub game: GameSettings,
}

impl Settings {
    /// Reads the settings. A missing file is fine as long as the
    /// environment provides everything without a default, i.e. `game.admin`.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let (path, required) = match path {
            Some(path) => (path, true),
            None => (DEFAULT_CONFIG_FILE, false),
        };
        let settings: Settings = Config::builder()
            .set_default("server.port", i64::from(DEFAULT_PORT))?
            .set_default("log_level", "debug")?
            .set_default("game.initial_chips", i64::from(INITIAL_CHIPS))?
            .set_default("game.max_supply", i64::from(MAX_SUPPLY))?
            .set_default("game.max_active_guesses", i64::from(MAX_ACTIVE_GUESSES))?
            .set_default("game.dealer_range.first", i64::from(DEALER_RANGE.first))?
            .set_default("game.dealer_range.last", i64::from(DEALER_RANGE.last))?
            .set_default("game.player_range.first", i64::from(PLAYER_RANGE.first))?
            .set_default("game.player_range.last", i64::from(PLAYER_RANGE.last))?
            .set_default("game.dealer_base_price", i64::from(DEALER_BASE_PRICE))?
            .set_default("game.player_base_price", i64::from(PLAYER_BASE_PRICE))?
            .set_default("game.tier_size", i64::from(TIER_SIZE))?
            .set_default("game.tier_multiplier", TIER_MULTIPLIER)?
            .set_default("game.default_guess_fee", i64::from(DEFAULT_GUESS_FEE))?
            .set_default("game.default_reveal_fee", i64::from(DEFAULT_REVEAL_FEE))?
            .add_source(File::new(path, FileFormat::Toml).required(required))
            .add_source(
                Environment::with_prefix("ORACULO")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .with_context(|| format!("couldn't read settings from {}", path))?
            .try_deserialize()
            .context("invalid settings")?;
        settings.game.validate()?;
        Ok(settings)
    }
}

impl GameSettings {
    /// Default game around the given administrator.
    pub fn with_admin(admin: UserPubKey) -> Self {
        Self {
            admin,
            initial_chips: INITIAL_CHIPS,
            max_supply: MAX_SUPPLY,
            max_active_guesses: MAX_ACTIVE_GUESSES,
            dealer_range: DEALER_RANGE,
            player_range: PLAYER_RANGE,
            dealer_base_price: DEALER_BASE_PRICE,
            player_base_price: PLAYER_BASE_PRICE,
            tier_size: TIER_SIZE,
            tier_multiplier: Decimal::TWO,
            default_guess_fee: DEFAULT_GUESS_FEE,
            default_reveal_fee: DEFAULT_REVEAL_FEE,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (class, range) in [("dealer", self.dealer_range), ("player", self.player_range)] {
            if range.first == CHIPS_ID || range.first > range.last || range.last == NftId::MAX {
                bail!("{} range {} is invalid", class, range)
            }
        }
        if self.dealer_range.overlaps(&self.player_range) {
            bail!(
                "dealer range {} overlaps player range {}",
                self.dealer_range,
                self.player_range
            )
        }
        if self.tier_size == 0 {
            bail!("tier_size must be positive")
        }
        if self.tier_multiplier < Decimal::ONE {
            bail!("tier_multiplier must be at least 1, got {}", self.tier_multiplier)
        }
        if self.initial_chips > self.max_supply {
            bail!(
                "initial_chips {} exceed max_supply {}",
                self.initial_chips,
                self.max_supply
            )
        }
        Ok(())
    }

    /// Starting state of a fresh game. Chips are minted separately so that
    /// `issued` always matches the ledger.
    pub fn to_config(&self) -> GameConfig {
        GameConfig {
            admin: self.admin,
            max_supply: self.max_supply,
            issued: 0,
            max_active_guesses: self.max_active_guesses,
            dealer_range: self.dealer_range,
            next_dealer: self.dealer_range.first,
            player_range: self.player_range,
            next_player: self.player_range.first,
            dealer_price: PriceSchedule {
                base: self.dealer_base_price,
                tier_size: self.tier_size,
                tier_multiplier: self.tier_multiplier,
            },
            player_price: PriceSchedule {
                base: self.player_base_price,
                tier_size: self.tier_size,
                tier_multiplier: self.tier_multiplier,
            },
            default_guess_fee: self.default_guess_fee,
            default_reveal_fee: self.default_reveal_fee,
            native_balance: 0,
        }
    }
}
