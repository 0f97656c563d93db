use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use anyhow::bail;

use super::*;

impl Display for IdentityClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let output = match self {
            Self::Dealer => "Dealer",
            Self::Player => "Player",
        };
        write!(f, "{}", output)
    }
}
impl FromStr for IdentityClass {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Dealer" | "dealer" => Ok(Self::Dealer),
            "Player" | "player" => Ok(Self::Player),
            e => bail!("Couldn't deserialize to IdentityClass: {}", e),
        }
    }
}
impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Administrator => write!(f, "Administrator"),
            Self::Dealer(id) => write!(f, "Dealer({})", id),
            Self::Player(id) => write!(f, "Player({})", id),
            Self::None => write!(f, "None"),
        }
    }
}
impl Display for WithdrawalSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Escrow(id) => write!(f, "Escrow({})", id),
            Self::FeeSink => write!(f, "FeeSink"),
            Self::NativePayments => write!(f, "NativePayments"),
        }
    }
}
impl Display for IdRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.first, self.last)
    }
}
impl Display for Commitment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from(*self))
    }
}
impl FromStr for Commitment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::try_from(s.to_string())
    }
}
impl Guess {
    pub fn is_revealed(&self) -> bool {
        self.reveal.is_some()
    }
    pub fn has_participant(&self, player: NftId) -> bool {
        self.participants.iter().any(|p| p.player == player)
    }
}
impl GameConfig {
    pub fn range(&self, class: IdentityClass) -> IdRange {
        match class {
            IdentityClass::Dealer => self.dealer_range,
            IdentityClass::Player => self.player_range,
        }
    }
    pub fn range_mut(&mut self, class: IdentityClass) -> &mut IdRange {
        match class {
            IdentityClass::Dealer => &mut self.dealer_range,
            IdentityClass::Player => &mut self.player_range,
        }
    }
    pub fn next_id(&self, class: IdentityClass) -> NftId {
        match class {
            IdentityClass::Dealer => self.next_dealer,
            IdentityClass::Player => self.next_player,
        }
    }
    pub fn next_id_mut(&mut self, class: IdentityClass) -> &mut NftId {
        match class {
            IdentityClass::Dealer => &mut self.next_dealer,
            IdentityClass::Player => &mut self.next_player,
        }
    }
    pub fn schedule(&self, class: IdentityClass) -> &PriceSchedule {
        match class {
            IdentityClass::Dealer => &self.dealer_price,
            IdentityClass::Player => &self.player_price,
        }
    }
    /// How many identifiers of `class` have been handed out so far.
    pub fn issued_count(&self, class: IdentityClass) -> u32 {
        self.next_id(class).saturating_sub(self.range(class).first)
    }
}
