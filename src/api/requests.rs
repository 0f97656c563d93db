use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use secp256k1::ecdsa::Signature;
use serde::{Deserialize, Serialize};

use super::*;

// Requests
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AccessRequest {
    pub user: UserPubKey,
    pub challenge: String,
    pub sig: Signature,
}
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PostRequest<T> {
    pub access: AccessRequest,
    pub data: T,
}
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoginRequest {
    pub user: UserPubKey,
    pub challenge: String,
    pub sig: Signature,
}
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct MintInvoiceRequest {
    pub class: IdentityClass,
}
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct MintRequest {
    pub class: IdentityClass,
    pub payment: PaymentHash,
}
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct GrantIdentifierRequest {
    pub class: IdentityClass,
    pub to: UserPubKey,
}
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AddGuessRequest {
    pub commitment: Commitment,
    pub dealer: NftId,
    pub asset: ExternalAsset,
    pub timestamp: DateTime<Utc>,
    pub initial_price: Decimal,
    pub needed_deposit: Chips,
}
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RevealGuessToPlayerRequest {
    pub player: NftId,
    pub dealer: NftId,
    pub guess: GuessId,
}
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RevealPriceRequest {
    pub dealer: NftId,
    pub guess: GuessId,
    pub end_price: Decimal,
    pub guessed_value: Decimal,
    pub nonce: Nonce,
}
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WithdrawFeeSinkRequest {
    pub to: UserPubKey,
}
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WithdrawNativeRequest {
    pub invoice: Payment,
}
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TransferChipsRequest {
    pub to: UserPubKey,
    pub amount: Chips,
}
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct FundEscrowRequest {
    pub id: NftId,
    pub amount: Chips,
}
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct FeeOverridesRequest {
    pub dealer: NftId,
    pub guess_fee: Option<Chips>,
    pub reveal_fee: Option<Chips>,
}
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct NextIdentifierRequest {
    pub class: IdentityClass,
    pub next: NftId,
}
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RangeRequest {
    pub class: IdentityClass,
    pub range: IdRange,
}
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CorrectGuessesRequest {
    pub dealer: NftId,
    pub correct_guesses: u32,
}
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct GuessRequest {
    pub dealer: NftId,
    pub guess: GuessId,
}
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EventsRequest {
    pub since: EventId,
    pub limit: u32,
}
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PricingRequest {
    pub dealer: Option<NftId>,
}
