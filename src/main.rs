#![allow(unused)]
use crate::api::*;
use crate::config::Settings;
use crate::db::SQLite;
use crate::error::{ErrorKind, GameError};
use crate::funding_source::TestFundingSource;
use crate::guess::Disclosure;
use crate::oraculo::Oraculo;
use anyhow::{Context, Result};
use axum::extract::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use axum_macros::debug_handler;
use clap::Parser;
use env_logger::{Builder, WriteStyle};
use log::{debug, trace, LevelFilter};
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

mod api;
mod client;
mod config;
mod db;
mod error;
mod escrow;
mod funding_source;
mod guess;
mod identity;
mod ledger;
mod oraculo;
mod pricing;

type AppState = State<Arc<RwLock<Oraculo>>>;
type HttpError = (StatusCode, String);

fn map_game_err(e: GameError) -> HttpError {
    debug!("Error: {}", e);
    let code = match e.kind() {
        ErrorKind::Authorization => StatusCode::FORBIDDEN,
        ErrorKind::ResourceExhaustion => StatusCode::CONFLICT,
        ErrorKind::InsufficientFunds => StatusCode::PAYMENT_REQUIRED,
        ErrorKind::ProtocolViolation => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (code, e.to_string())
}
async fn authenticate(backend: &Oraculo, access: AccessRequest) -> Result<UserPubKey, HttpError> {
    backend
        .check_access(access)
        .await
        .map_err(|e| (StatusCode::UNAUTHORIZED, map_any_err(e)))
}

async fn get_login_challenge(
    State(state): AppState,
    Json(user): Json<UserPubKey>,
) -> Result<String, HttpError> {
    let backend = state.read().await;
    trace!("Getting login challenge for {}", user);
    let challenge = backend
        .create_login_challenge(user)
        .await
        .map_err(map_any_err_and_code)?;
    debug!("Login challenge for user {}: {}", user, challenge);
    Ok(challenge)
}
async fn try_login(
    State(state): AppState,
    Json(request): Json<LoginRequest>,
) -> Result<(), HttpError> {
    let backend = state.read().await;
    backend
        .try_login(request.user, request.sig, request.challenge)
        .await
        .map_err(|e| (StatusCode::UNAUTHORIZED, map_any_err(e)))?;
    debug!("User {} successfully logged in", request.user);
    Ok(())
}
async fn check_login(
    State(state): AppState,
    Json(request): Json<AccessRequest>,
) -> Result<(), HttpError> {
    let backend = state.read().await;
    authenticate(&backend, request).await?;
    Ok(())
}

async fn request_mint_invoice(
    State(state): AppState,
    Json(request): Json<MintInvoiceRequest>,
) -> Result<Json<MintInvoiceResponse>, HttpError> {
    let backend = state.read().await;
    let invoice = backend
        .request_mint_invoice(request.class)
        .await
        .map_err(map_game_err)?;
    Ok(Json(invoice))
}
#[debug_handler]
async fn mint_identifier(
    State(state): State<Arc<RwLock<Oraculo>>>,
    Json(request): Json<PostRequest<MintRequest>>,
) -> Result<(StatusCode, Json<MintResponse>), HttpError> {
    let backend = state.write().await;
    let caller = authenticate(&backend, request.access).await?;
    let class = request.data.class;
    let id = backend
        .mint_identifier(&caller, class, request.data.payment)
        .await
        .map_err(map_game_err)?;
    debug!("Minted {} identifier {} for {}", class, id, caller);
    Ok((StatusCode::CREATED, Json(MintResponse { class, id })))
}
async fn grant_identifier(
    State(state): AppState,
    Json(request): Json<PostRequest<GrantIdentifierRequest>>,
) -> Result<(StatusCode, Json<MintResponse>), HttpError> {
    let backend = state.write().await;
    let caller = authenticate(&backend, request.access).await?;
    let (class, to) = (request.data.class, request.data.to);
    let id = backend
        .grant_identifier(&caller, class, &to)
        .await
        .map_err(map_game_err)?;
    debug!("Granted {} identifier {} to {}", class, id, to);
    Ok((StatusCode::CREATED, Json(MintResponse { class, id })))
}

#[debug_handler]
async fn add_guess(
    State(state): State<Arc<RwLock<Oraculo>>>,
    Json(request): Json<PostRequest<AddGuessRequest>>,
) -> Result<(StatusCode, Json<GuessId>), HttpError> {
    let backend = state.write().await;
    let caller = authenticate(&backend, request.access).await?;
    let dealer = request.data.dealer;
    let id = backend
        .add_guess(&caller, request.data.into())
        .await
        .map_err(map_game_err)?;
    debug!("Dealer {} added guess {}", dealer, id);
    Ok((StatusCode::CREATED, Json(id)))
}
async fn reveal_guess_to_player(
    State(state): AppState,
    Json(request): Json<PostRequest<RevealGuessToPlayerRequest>>,
) -> Result<(), HttpError> {
    let backend = state.write().await;
    let caller = authenticate(&backend, request.access).await?;
    let request = request.data;
    backend
        .reveal_guess_to_player(&caller, request.player, request.dealer, request.guess)
        .await
        .map_err(map_game_err)?;
    Ok(())
}
async fn reveal_price_for_guess(
    State(state): AppState,
    Json(request): Json<RevealPriceRequest>,
) -> Result<Json<bool>, HttpError> {
    let backend = state.write().await;
    let disclosure = Disclosure {
        end_price: request.end_price,
        guessed_value: request.guessed_value,
        nonce: request.nonce,
    };
    let correct = backend
        .reveal_price_for_guess(request.dealer, request.guess, disclosure)
        .await
        .map_err(map_game_err)?;
    Ok(Json(correct))
}

async fn withdraw_from_identifier(
    State(state): AppState,
    Json(request): Json<PostRequest<NftId>>,
) -> Result<Json<Chips>, HttpError> {
    let backend = state.write().await;
    let caller = authenticate(&backend, request.access).await?;
    let amount = backend
        .withdraw_from_identifier(&caller, request.data)
        .await
        .map_err(map_game_err)?;
    debug!("{} withdrew {} chips from {}", caller, amount, request.data);
    Ok(Json(amount))
}
async fn withdraw_fee_sink(
    State(state): AppState,
    Json(request): Json<PostRequest<WithdrawFeeSinkRequest>>,
) -> Result<Json<Chips>, HttpError> {
    let backend = state.write().await;
    let caller = authenticate(&backend, request.access).await?;
    let amount = backend
        .withdraw_fee_sink(&caller, &request.data.to)
        .await
        .map_err(map_game_err)?;
    Ok(Json(amount))
}
async fn withdraw_native_payments(
    State(state): AppState,
    Json(request): Json<PostRequest<WithdrawNativeRequest>>,
) -> Result<Json<Sats>, HttpError> {
    let backend = state.write().await;
    let caller = authenticate(&backend, request.access).await?;
    let amount = backend
        .withdraw_native_payments(&caller, request.data.invoice)
        .await
        .map_err(map_game_err)?;
    Ok(Json(amount))
}

async fn transfer_chips(
    State(state): AppState,
    Json(request): Json<PostRequest<TransferChipsRequest>>,
) -> Result<(), HttpError> {
    let backend = state.write().await;
    let caller = authenticate(&backend, request.access).await?;
    backend
        .transfer_chips(&caller, &request.data.to, request.data.amount)
        .await
        .map_err(map_game_err)?;
    Ok(())
}
async fn fund_escrow(
    State(state): AppState,
    Json(request): Json<PostRequest<FundEscrowRequest>>,
) -> Result<(), HttpError> {
    let backend = state.write().await;
    let caller = authenticate(&backend, request.access).await?;
    backend
        .fund_escrow(&caller, request.data.id, request.data.amount)
        .await
        .map_err(map_game_err)?;
    Ok(())
}
async fn mint_chips(
    State(state): AppState,
    Json(request): Json<PostRequest<TransferChipsRequest>>,
) -> Result<(), HttpError> {
    let backend = state.write().await;
    let caller = authenticate(&backend, request.access).await?;
    backend
        .mint_chips(&caller, &request.data.to, request.data.amount)
        .await
        .map_err(map_game_err)?;
    Ok(())
}

async fn set_fee_overrides(
    State(state): AppState,
    Json(request): Json<PostRequest<FeeOverridesRequest>>,
) -> Result<(), HttpError> {
    let backend = state.write().await;
    let caller = authenticate(&backend, request.access).await?;
    let request = request.data;
    backend
        .set_fee_overrides(&caller, request.dealer, request.guess_fee, request.reveal_fee)
        .await
        .map_err(map_game_err)?;
    Ok(())
}
async fn set_max_active_guesses(
    State(state): AppState,
    Json(request): Json<PostRequest<u32>>,
) -> Result<(), HttpError> {
    let backend = state.write().await;
    let caller = authenticate(&backend, request.access).await?;
    backend
        .set_max_active_guesses(&caller, request.data)
        .await
        .map_err(map_game_err)?;
    Ok(())
}
async fn set_next_identifier(
    State(state): AppState,
    Json(request): Json<PostRequest<NextIdentifierRequest>>,
) -> Result<(), HttpError> {
    let backend = state.write().await;
    let caller = authenticate(&backend, request.access).await?;
    backend
        .set_next_identifier(&caller, request.data.class, request.data.next)
        .await
        .map_err(map_game_err)?;
    Ok(())
}
async fn set_range(
    State(state): AppState,
    Json(request): Json<PostRequest<RangeRequest>>,
) -> Result<(), HttpError> {
    let backend = state.write().await;
    let caller = authenticate(&backend, request.access).await?;
    backend
        .set_range(&caller, request.data.class, request.data.range)
        .await
        .map_err(map_game_err)?;
    Ok(())
}
async fn set_correct_guesses(
    State(state): AppState,
    Json(request): Json<PostRequest<CorrectGuessesRequest>>,
) -> Result<(), HttpError> {
    let backend = state.write().await;
    let caller = authenticate(&backend, request.access).await?;
    backend
        .set_correct_guesses(&caller, request.data.dealer, request.data.correct_guesses)
        .await
        .map_err(map_game_err)?;
    Ok(())
}
async fn transfer_administration(
    State(state): AppState,
    Json(request): Json<PostRequest<UserPubKey>>,
) -> Result<(), HttpError> {
    let backend = state.write().await;
    let caller = authenticate(&backend, request.access).await?;
    backend
        .transfer_administration(&caller, request.data)
        .await
        .map_err(map_game_err)?;
    Ok(())
}

async fn get_holder(
    State(state): AppState,
    Json(user): Json<UserPubKey>,
) -> Result<Json<HolderResponse>, HttpError> {
    let backend = state.read().await;
    Ok(Json(backend.holder(&user).await.map_err(map_game_err)?))
}
async fn identifier_holder(
    State(state): AppState,
    Json(id): Json<NftId>,
) -> Result<Json<Option<UserPubKey>>, HttpError> {
    let backend = state.read().await;
    Ok(Json(
        backend.identifier_holder(id).await.map_err(map_game_err)?,
    ))
}
async fn escrow_balance(
    State(state): AppState,
    Json(id): Json<NftId>,
) -> Result<Json<Chips>, HttpError> {
    let backend = state.read().await;
    Ok(Json(
        backend.escrow_balance_of(id).await.map_err(map_game_err)?,
    ))
}
async fn get_guess(
    State(state): AppState,
    Json(request): Json<GuessRequest>,
) -> Result<Json<Guess>, HttpError> {
    let backend = state.read().await;
    let guess = backend
        .get_guess(request.dealer, request.guess)
        .await
        .map_err(map_game_err)?;
    Ok(Json(guess))
}
async fn get_guesses(
    State(state): AppState,
    Json(dealer): Json<NftId>,
) -> Result<Json<Vec<Guess>>, HttpError> {
    let backend = state.read().await;
    Ok(Json(backend.get_guesses(dealer).await.map_err(map_game_err)?))
}
async fn get_dealer(
    State(state): AppState,
    Json(dealer): Json<NftId>,
) -> Result<Json<Dealer>, HttpError> {
    let backend = state.read().await;
    Ok(Json(backend.get_dealer(dealer).await.map_err(map_game_err)?))
}
async fn get_pricing(
    State(state): AppState,
    Json(request): Json<PricingRequest>,
) -> Result<Json<PricingResponse>, HttpError> {
    let backend = state.read().await;
    Ok(Json(
        backend
            .get_pricing(request.dealer)
            .await
            .map_err(map_game_err)?,
    ))
}
async fn get_config(State(state): AppState) -> Result<Json<GameConfig>, HttpError> {
    let backend = state.read().await;
    Ok(Json(backend.get_config().await.map_err(map_game_err)?))
}
async fn get_events(
    State(state): AppState,
    Json(request): Json<EventsRequest>,
) -> Result<Json<Vec<EventRecord>>, HttpError> {
    let backend = state.read().await;
    let events = backend
        .get_events(request.since, request.limit)
        .await
        .map_err(map_game_err)?;
    Ok(Json(events))
}

#[derive(Parser)]
struct Args {
    /// TOML settings file, defaults to ./oraculo.toml if present
    #[arg(short, long)]
    config: Option<String>,
    #[arg(short, long)]
    port: Option<u16>,
    #[arg(short, long)]
    db: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Args::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    if cli.db.is_some() {
        settings.database = cli.db;
    }
    Builder::default()
        .filter_level(LevelFilter::from_str(&settings.log_level).unwrap_or(LevelFilter::Debug))
        .write_style(WriteStyle::Always)
        .init();
    let (_port, handle) = run_server(settings).await?;
    handle.await?;
    Ok(())
}

async fn run_server(settings: Settings) -> Result<(u16, JoinHandle<()>)> {
    let state = Arc::new(RwLock::new(
        Oraculo::new(
            Box::new(SQLite::new(settings.database.clone()).await?),
            Box::new(TestFundingSource::default()),
            settings.game,
        )
        .await?,
    ));
    let app = Router::new()
        .route("/get_login_challenge", post(get_login_challenge))
        .route("/try_login", post(try_login))
        .route("/check_login", post(check_login))
        .route("/request_mint_invoice", post(request_mint_invoice))
        .route("/mint_identifier", post(mint_identifier))
        .route("/grant_identifier", post(grant_identifier))
        .route("/add_guess", post(add_guess))
        .route("/reveal_guess_to_player", post(reveal_guess_to_player))
        .route("/reveal_price_for_guess", post(reveal_price_for_guess))
        .route("/withdraw_from_identifier", post(withdraw_from_identifier))
        .route("/withdraw_fee_sink", post(withdraw_fee_sink))
        .route("/withdraw_native_payments", post(withdraw_native_payments))
        .route("/transfer_chips", post(transfer_chips))
        .route("/fund_escrow", post(fund_escrow))
        .route("/mint_chips", post(mint_chips))
        .route("/set_fee_overrides", post(set_fee_overrides))
        .route("/set_max_active_guesses", post(set_max_active_guesses))
        .route("/set_next_identifier", post(set_next_identifier))
        .route("/set_range", post(set_range))
        .route("/set_correct_guesses", post(set_correct_guesses))
        .route("/transfer_administration", post(transfer_administration))
        .route("/get_holder", post(get_holder))
        .route("/identifier_holder", post(identifier_holder))
        .route("/escrow_balance", post(escrow_balance))
        .route("/get_guess", post(get_guess))
        .route("/get_guesses", post(get_guesses))
        .route("/get_dealer", post(get_dealer))
        .route("/get_pricing", post(get_pricing))
        .route("/get_config", get(get_config))
        .route("/get_events", post(get_events))
        .with_state(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], settings.server.port));
    let server = axum::Server::try_bind(&addr)
        .with_context(|| format!("couldn't bind {}", addr))?
        .serve(app.into_make_service());
    let port = server.local_addr().port();
    debug!("Listening on {}", server.local_addr());
    let handle = tokio::spawn(async move {
        if let Err(e) = server.await {
            log::error!("Server stopped: {}", e);
        }
    });
    Ok((port, handle))
}
