use serde::{Deserialize, Serialize};

use super::*;

#[derive(PartialEq, Debug, Serialize, Deserialize, Clone)]
pub struct MintResponse {
    pub class: IdentityClass,
    pub id: NftId,
}
#[derive(PartialEq, Debug, Serialize, Deserialize, Clone)]
pub struct MintInvoiceResponse {
    pub payment_hash: PaymentHash,
    pub invoice: Payment,
    pub price: Sats,
}
#[derive(PartialEq, Debug, Serialize, Deserialize, Clone)]
pub struct PricingResponse {
    pub dealer_mint_price: Sats,
    pub player_mint_price: Sats,
    pub guess_fee: Chips,
    pub reveal_fee: Chips,
}
#[derive(PartialEq, Debug, Serialize, Deserialize, Clone)]
pub struct HolderResponse {
    pub user: UserPubKey,
    pub role: Role,
    pub chips: Chips,
}
