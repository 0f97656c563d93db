use anyhow::{bail, Result};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::api::*;

pub struct Client {
    url: String,
    client: reqwest::Client,
}
impl Client {
    pub fn new(url: String) -> Self {
        let client = reqwest::Client::new();
        Self { url, client }
    }
    async fn send<T: Serialize + ?Sized>(&self, path: &str, request: &T) -> Result<Response> {
        let response = self
            .client
            .post(self.url.clone() + path)
            .json(request)
            .send()
            .await?;
        if !response.status().is_success() {
            bail!("{}: {}", response.status(), response.text().await?)
        }
        Ok(response)
    }
    async fn post<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        path: &str,
        request: &T,
    ) -> Result<R> {
        Ok(self.send(path, request).await?.json::<R>().await?)
    }
    async fn post_access<T: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        data: T,
        access: AccessRequest,
    ) -> Result<R> {
        self.post(path, &PostRequest { access, data }).await
    }
    async fn post_access_empty<T: Serialize>(
        &self,
        path: &str,
        data: T,
        access: AccessRequest,
    ) -> Result<()> {
        self.send(path, &PostRequest { access, data }).await?;
        Ok(())
    }

    // Sessions
    pub async fn create_login_challenge(&self, user: UserPubKey) -> Result<String> {
        Ok(self.send("/get_login_challenge", &user).await?.text().await?)
    }
    pub async fn try_login(&self, request: LoginRequest) -> Result<()> {
        self.send("/try_login", &request).await?;
        Ok(())
    }
    pub async fn check_login(&self, access: AccessRequest) -> Result<()> {
        let response = self
            .client
            .post(self.url.clone() + "/check_login")
            .json(&access)
            .send()
            .await?;
        if response.status() != StatusCode::OK {
            bail!("{}: {}", response.status(), response.text().await?)
        }
        Ok(())
    }

    // Identifiers
    pub async fn request_mint_invoice(&self, class: IdentityClass) -> Result<MintInvoiceResponse> {
        self.post("/request_mint_invoice", &MintInvoiceRequest { class })
            .await
    }
    pub async fn mint_identifier(
        &self,
        request: MintRequest,
        access: AccessRequest,
    ) -> Result<MintResponse> {
        self.post_access("/mint_identifier", request, access).await
    }
    pub async fn grant_identifier(
        &self,
        request: GrantIdentifierRequest,
        access: AccessRequest,
    ) -> Result<MintResponse> {
        self.post_access("/grant_identifier", request, access).await
    }

    // Guesses
    pub async fn add_guess(&self, request: AddGuessRequest, access: AccessRequest) -> Result<GuessId> {
        self.post_access("/add_guess", request, access).await
    }
    pub async fn reveal_guess_to_player(
        &self,
        request: RevealGuessToPlayerRequest,
        access: AccessRequest,
    ) -> Result<()> {
        self.post_access_empty("/reveal_guess_to_player", request, access)
            .await
    }
    /// Needs no login, the disclosed secret is the proof.
    pub async fn reveal_price_for_guess(&self, request: RevealPriceRequest) -> Result<bool> {
        self.post("/reveal_price_for_guess", &request).await
    }

    // Withdrawals
    pub async fn withdraw_from_identifier(&self, id: NftId, access: AccessRequest) -> Result<Chips> {
        self.post_access("/withdraw_from_identifier", id, access)
            .await
    }
    pub async fn withdraw_fee_sink(
        &self,
        request: WithdrawFeeSinkRequest,
        access: AccessRequest,
    ) -> Result<Chips> {
        self.post_access("/withdraw_fee_sink", request, access).await
    }
    pub async fn withdraw_native_payments(
        &self,
        request: WithdrawNativeRequest,
        access: AccessRequest,
    ) -> Result<Sats> {
        self.post_access("/withdraw_native_payments", request, access)
            .await
    }

    // Chips
    pub async fn transfer_chips(
        &self,
        request: TransferChipsRequest,
        access: AccessRequest,
    ) -> Result<()> {
        self.post_access_empty("/transfer_chips", request, access)
            .await
    }
    pub async fn fund_escrow(&self, request: FundEscrowRequest, access: AccessRequest) -> Result<()> {
        self.post_access_empty("/fund_escrow", request, access).await
    }
    pub async fn mint_chips(&self, request: TransferChipsRequest, access: AccessRequest) -> Result<()> {
        self.post_access_empty("/mint_chips", request, access).await
    }

    // Administration
    pub async fn set_fee_overrides(
        &self,
        request: FeeOverridesRequest,
        access: AccessRequest,
    ) -> Result<()> {
        self.post_access_empty("/set_fee_overrides", request, access)
            .await
    }
    pub async fn set_max_active_guesses(&self, max: u32, access: AccessRequest) -> Result<()> {
        self.post_access_empty("/set_max_active_guesses", max, access)
            .await
    }
    pub async fn set_next_identifier(
        &self,
        request: NextIdentifierRequest,
        access: AccessRequest,
    ) -> Result<()> {
        self.post_access_empty("/set_next_identifier", request, access)
            .await
    }
    pub async fn set_range(&self, request: RangeRequest, access: AccessRequest) -> Result<()> {
        self.post_access_empty("/set_range", request, access).await
    }
    pub async fn set_correct_guesses(
        &self,
        request: CorrectGuessesRequest,
        access: AccessRequest,
    ) -> Result<()> {
        self.post_access_empty("/set_correct_guesses", request, access)
            .await
    }
    pub async fn transfer_administration(
        &self,
        new_admin: UserPubKey,
        access: AccessRequest,
    ) -> Result<()> {
        self.post_access_empty("/transfer_administration", new_admin, access)
            .await
    }

    // Accessors
    pub async fn get_holder(&self, user: UserPubKey) -> Result<HolderResponse> {
        self.post("/get_holder", &user).await
    }
    pub async fn identifier_holder(&self, id: NftId) -> Result<Option<UserPubKey>> {
        self.post("/identifier_holder", &id).await
    }
    pub async fn escrow_balance(&self, id: NftId) -> Result<Chips> {
        self.post("/escrow_balance", &id).await
    }
    pub async fn get_guess(&self, request: GuessRequest) -> Result<Guess> {
        self.post("/get_guess", &request).await
    }
    pub async fn get_guesses(&self, dealer: NftId) -> Result<Vec<Guess>> {
        self.post("/get_guesses", &dealer).await
    }
    pub async fn get_dealer(&self, dealer: NftId) -> Result<Dealer> {
        self.post("/get_dealer", &dealer).await
    }
    pub async fn get_pricing(&self, request: PricingRequest) -> Result<PricingResponse> {
        self.post("/get_pricing", &request).await
    }
    pub async fn get_config(&self) -> Result<GameConfig> {
        let response = self
            .client
            .get(self.url.clone() + "/get_config")
            .send()
            .await?;
        if response.status() != StatusCode::OK {
            bail!("{}: {}", response.status(), response.text().await?)
        }
        Ok(response.json::<GameConfig>().await?)
    }
    pub async fn get_events(&self, request: EventsRequest) -> Result<Vec<EventRecord>> {
        self.post("/get_events", &request).await
    }
}
