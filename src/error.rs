use crate::api::{GuessId, IdentityClass, NftId};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Authorization,
    ResourceExhaustion,
    InsufficientFunds,
    ProtocolViolation,
    NotFound,
    Internal,
}

#[derive(Error, Debug)]
pub enum GameError {
    // Authorization
    #[error("Caller is not allowed to perform this operation")]
    Unauthorized,
    #[error("NFT {0} does not exist or sender is not the owner")]
    NftDoesNotExistOrSenderNotOwner(NftId),

    // Resource exhaustion
    #[error("All DEALER tokens have been minted")]
    AllDealerTokensMinted,
    #[error("All PLAYER tokens have been minted")]
    AllPlayerTokensMinted,
    #[error("Minting {requested} chips would exceed the max supply of {max_supply}")]
    SupplyCapExceeded { requested: u32, max_supply: u32 },
    #[error("Dealer {0} reached the max amount of active guesses")]
    DealerReachedMaxGuesses(NftId),

    // Insufficient funds
    #[error("Insufficient balance: needed {needed} but only {available} available")]
    InsufficientBalance { needed: u32, available: u32 },
    #[error("Not enough tokens to reveal and deposit: needed {needed} but only {available} available")]
    NotEnoughTokensToRevealAndDeposit { needed: u32, available: u32 },
    #[error("Not enough payment for minting: price is {price} but {paid} was paid")]
    NotEnoughPaymentForMinting { price: u32, paid: u32 },
    #[error("No funds to withdraw")]
    NoFundsToWithdraw,
    #[error("No CHIPS to withdraw")]
    NoChipsToWithdraw,
    #[error("No native payments to withdraw")]
    NoNativePaymentsToWithdraw,

    // Protocol violations
    #[error("Price for this guess has already been revealed")]
    PriceForGuessAlreadyRevealed,
    #[error("Guessed price and nonce do not match the hash")]
    GuessedPriceAndNonceDoNotMatchHash,
    #[error("Identifier {0} has already been issued")]
    IdentifierAlreadyIssued(NftId),
    #[error("Player {player} already participates in guess {guess} of dealer {dealer}")]
    PlayerAlreadyParticipating {
        player: NftId,
        dealer: NftId,
        guess: GuessId,
    },
    #[error("Payment {0} is not settled")]
    PaymentNotSettled(String),
    #[error("Payment {0} was already used")]
    PaymentAlreadyUsed(String),
    #[error("Fees cannot be withdrawn to the administrator itself")]
    FeeSinkWithdrawalToSelf,
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Arithmetic overflow")]
    ArithmeticOverflow,

    // Not found
    #[error("Guess {guess} of dealer {dealer} does not exist")]
    GuessDoesNotExist { dealer: NftId, guess: GuessId },
    #[error("Dealer {0} does not exist")]
    DealerDoesNotExist(NftId),

    // Internal
    #[error("Payment rail failed: {0:#}")]
    Payment(anyhow::Error),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl GameError {
    pub fn exhausted(class: IdentityClass) -> Self {
        match class {
            IdentityClass::Dealer => Self::AllDealerTokensMinted,
            IdentityClass::Player => Self::AllPlayerTokensMinted,
        }
    }
    pub fn kind(&self) -> ErrorKind {
        use GameError::*;
        match self {
            Unauthorized | NftDoesNotExistOrSenderNotOwner(_) => ErrorKind::Authorization,
            AllDealerTokensMinted
            | AllPlayerTokensMinted
            | SupplyCapExceeded { .. }
            | DealerReachedMaxGuesses(_) => ErrorKind::ResourceExhaustion,
            InsufficientBalance { .. }
            | NotEnoughTokensToRevealAndDeposit { .. }
            | NotEnoughPaymentForMinting { .. }
            | NoFundsToWithdraw
            | NoChipsToWithdraw
            | NoNativePaymentsToWithdraw => ErrorKind::InsufficientFunds,
            PriceForGuessAlreadyRevealed
            | GuessedPriceAndNonceDoNotMatchHash
            | IdentifierAlreadyIssued(_)
            | PlayerAlreadyParticipating { .. }
            | PaymentNotSettled(_)
            | PaymentAlreadyUsed(_)
            | FeeSinkWithdrawalToSelf
            | InvalidConfiguration(_)
            | ArithmeticOverflow => ErrorKind::ProtocolViolation,
            GuessDoesNotExist { .. } | DealerDoesNotExist(_) => ErrorKind::NotFound,
            Payment(_) | Storage(_) => ErrorKind::Internal,
        }
    }
}

pub type GameResult<T> = std::result::Result<T, GameError>;
