#![allow(unused)]
use std::str::FromStr;

use anyhow::Result;
use api::*;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use secp256k1::{
    ecdsa::Signature, generate_keypair, hashes::sha256::Hash, rand, Message, SecretKey,
};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncWriteExt},
};

use crate::client::Client;

mod api;
mod client;

#[derive(Parser)]
struct Args {
    #[command(subcommand)]
    command: Commands,
    #[arg(short, long, default_value = "http://127.0.0.1:8081")]
    url: String,
}
#[derive(Subcommand)]
enum Commands {
    GenerateKeys,
    Login,
    SignEcdsa {
        #[arg(short, long)]
        message: String,
    },
    /// Prints the commitment to publish for a guessed value
    Commitment {
        #[arg(short, long)]
        value: Decimal,
        #[arg(short, long)]
        nonce: Nonce,
    },
    MintInvoice {
        #[arg(short, long)]
        class: IdentityClass,
    },
    Mint {
        #[arg(short, long)]
        class: IdentityClass,
        #[arg(short, long)]
        payment: PaymentHash,
    },
    Grant {
        #[arg(short, long)]
        class: IdentityClass,
        #[arg(short, long)]
        to: UserPubKey,
    },
    AddGuess {
        #[arg(short, long)]
        dealer: NftId,
        #[arg(long)]
        commitment: Commitment,
        #[arg(short, long)]
        asset: String,
        #[arg(long, default_value_t = 1)]
        chain_id: u32,
        #[arg(short, long)]
        initial_price: Decimal,
        #[arg(short, long)]
        needed_deposit: Chips,
        /// Defaults to now
        #[arg(short, long)]
        timestamp: Option<DateTime<Utc>>,
    },
    RevealToPlayer {
        #[arg(short, long)]
        player: NftId,
        #[arg(short, long)]
        dealer: NftId,
        #[arg(short, long)]
        guess: GuessId,
    },
    RevealPrice {
        #[arg(short, long)]
        dealer: NftId,
        #[arg(short, long)]
        guess: GuessId,
        #[arg(short, long)]
        end_price: Decimal,
        #[arg(short, long)]
        value: Decimal,
        #[arg(short, long)]
        nonce: Nonce,
    },
    Withdraw {
        #[arg(short, long)]
        id: NftId,
    },
    WithdrawFees {
        #[arg(short, long)]
        to: UserPubKey,
    },
    WithdrawNative {
        #[arg(short, long)]
        invoice: Payment,
    },
    Transfer {
        #[arg(short, long)]
        to: UserPubKey,
        #[arg(short, long)]
        amount: Chips,
    },
    FundEscrow {
        #[arg(short, long)]
        id: NftId,
        #[arg(short, long)]
        amount: Chips,
    },
    MintChips {
        #[arg(short, long)]
        to: UserPubKey,
        #[arg(short, long)]
        amount: Chips,
    },
    SetFees {
        #[arg(short, long)]
        dealer: NftId,
        #[arg(short, long)]
        guess_fee: Option<Chips>,
        #[arg(short, long)]
        reveal_fee: Option<Chips>,
    },
    SetMaxActiveGuesses {
        #[arg(short, long)]
        max: u32,
    },
    SetNextIdentifier {
        #[arg(short, long)]
        class: IdentityClass,
        #[arg(short, long)]
        next: NftId,
    },
    SetRange {
        #[arg(short, long)]
        class: IdentityClass,
        #[arg(short, long)]
        first: NftId,
        #[arg(short, long)]
        last: NftId,
    },
    SetCorrectGuesses {
        #[arg(short, long)]
        dealer: NftId,
        #[arg(short, long)]
        correct_guesses: u32,
    },
    TransferAdministration {
        #[arg(short, long)]
        to: UserPubKey,
    },
    GetHolder {
        #[arg(short, long)]
        user: Option<UserPubKey>,
    },
    GetGuess {
        #[arg(short, long)]
        dealer: NftId,
        #[arg(short, long)]
        guess: Option<GuessId>,
    },
    GetDealer {
        #[arg(short, long)]
        dealer: NftId,
    },
    GetPricing {
        #[arg(short, long)]
        dealer: Option<NftId>,
    },
    GetConfig,
    GetEvents {
        #[arg(short, long, default_value_t = 0)]
        since: EventId,
        #[arg(short, long, default_value_t = 100)]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Args::parse();
    let client = Client::new(cli.url);

    match cli.command {
        Commands::GenerateKeys => {
            let keys = generate_keypair(&mut rand::thread_rng());
            println!("Pubkey: {}", keys.1);
            let mut private = File::create("ecdsa.key").await?;
            let mut public = File::create("ecdsa.pub").await?;
            private
                .write_all(format!("{}", keys.0.display_secret()).as_bytes())
                .await?;
            public.write_all(keys.1.to_string().as_bytes()).await?;
        }
        Commands::Login => {
            let secret_key = read_secret().await?;
            let user = UserPubKey::from_secret_key_global(&secret_key);
            let challenge = client.create_login_challenge(user).await?;
            let message = Message::from_hashed_data::<Hash>(challenge.as_bytes());
            let signature = secret_key.sign_ecdsa(message);
            let mut file = File::create("access_token").await?;
            file.write_all(signature.to_string().as_bytes()).await?;
            let mut file = File::create("challenge").await?;
            file.write_all(challenge.as_bytes()).await?;
            println!("Signed Challenge \"{}\"", challenge);
            let request = LoginRequest {
                user,
                challenge,
                sig: signature,
            };
            client.try_login(request).await?;
            println!("Logged in as {}", user);
        }
        Commands::SignEcdsa { message } => {
            let message = Message::from_hashed_data::<Hash>(message.as_bytes());
            let secret_key = read_secret().await?;
            let signature = secret_key.sign_ecdsa(message);
            println!("{}", signature);
        }
        Commands::Commitment { value, nonce } => {
            println!("{}", Commitment::of(&value, nonce));
        }
        Commands::MintInvoice { class } => {
            let invoice = client.request_mint_invoice(class).await?;
            println!("Pay {} sats to {}", invoice.price, invoice.invoice);
            println!("Payment hash: {}", invoice.payment_hash);
        }
        Commands::Mint { class, payment } => {
            let request = MintRequest { class, payment };
            let minted = client.mint_identifier(request, get_access().await?).await?;
            println!("Minted {} identifier {}", minted.class, minted.id);
        }
        Commands::Grant { class, to } => {
            let request = GrantIdentifierRequest { class, to };
            let minted = client.grant_identifier(request, get_access().await?).await?;
            println!("Granted {} identifier {} to {}", minted.class, minted.id, to);
        }
        Commands::AddGuess {
            dealer,
            commitment,
            asset,
            chain_id,
            initial_price,
            needed_deposit,
            timestamp,
        } => {
            let request = AddGuessRequest {
                commitment,
                dealer,
                asset: ExternalAsset {
                    address: asset,
                    chain_id,
                },
                timestamp: timestamp.unwrap_or_else(Utc::now),
                initial_price,
                needed_deposit,
            };
            let guess = client.add_guess(request, get_access().await?).await?;
            println!("Added guess {} for dealer {}", guess, dealer);
        }
        Commands::RevealToPlayer {
            player,
            dealer,
            guess,
        } => {
            let request = RevealGuessToPlayerRequest {
                player,
                dealer,
                guess,
            };
            client
                .reveal_guess_to_player(request, get_access().await?)
                .await?;
            let guess = client.get_guess(GuessRequest { dealer, guess }).await?;
            println!("{:#?}", guess);
        }
        Commands::RevealPrice {
            dealer,
            guess,
            end_price,
            value,
            nonce,
        } => {
            let request = RevealPriceRequest {
                dealer,
                guess,
                end_price,
                guessed_value: value,
                nonce,
            };
            let correct = client.reveal_price_for_guess(request).await?;
            println!("Revealed guess {} of dealer {}, correct: {}", guess, dealer, correct);
        }
        Commands::Withdraw { id } => {
            let amount = client
                .withdraw_from_identifier(id, get_access().await?)
                .await?;
            println!("Withdrew {} chips from {}", amount, id);
        }
        Commands::WithdrawFees { to } => {
            let amount = client
                .withdraw_fee_sink(WithdrawFeeSinkRequest { to }, get_access().await?)
                .await?;
            println!("Sent {} chips of fees to {}", amount, to);
        }
        Commands::WithdrawNative { invoice } => {
            let amount = client
                .withdraw_native_payments(WithdrawNativeRequest { invoice }, get_access().await?)
                .await?;
            println!("Paid out {} sats", amount);
        }
        Commands::Transfer { to, amount } => {
            client
                .transfer_chips(TransferChipsRequest { to, amount }, get_access().await?)
                .await?;
        }
        Commands::FundEscrow { id, amount } => {
            client
                .fund_escrow(FundEscrowRequest { id, amount }, get_access().await?)
                .await?;
        }
        Commands::MintChips { to, amount } => {
            client
                .mint_chips(TransferChipsRequest { to, amount }, get_access().await?)
                .await?;
        }
        Commands::SetFees {
            dealer,
            guess_fee,
            reveal_fee,
        } => {
            let request = FeeOverridesRequest {
                dealer,
                guess_fee,
                reveal_fee,
            };
            client.set_fee_overrides(request, get_access().await?).await?;
        }
        Commands::SetMaxActiveGuesses { max } => {
            client
                .set_max_active_guesses(max, get_access().await?)
                .await?;
        }
        Commands::SetNextIdentifier { class, next } => {
            client
                .set_next_identifier(NextIdentifierRequest { class, next }, get_access().await?)
                .await?;
        }
        Commands::SetRange { class, first, last } => {
            let request = RangeRequest {
                class,
                range: IdRange { first, last },
            };
            client.set_range(request, get_access().await?).await?;
        }
        Commands::SetCorrectGuesses {
            dealer,
            correct_guesses,
        } => {
            let request = CorrectGuessesRequest {
                dealer,
                correct_guesses,
            };
            client
                .set_correct_guesses(request, get_access().await?)
                .await?;
        }
        Commands::TransferAdministration { to } => {
            client
                .transfer_administration(to, get_access().await?)
                .await?;
        }
        Commands::GetHolder { user } => {
            let user = match user {
                Some(user) => user,
                None => read_public().await?,
            };
            println!("{:#?}", client.get_holder(user).await?);
        }
        Commands::GetGuess { dealer, guess } => match guess {
            Some(guess) => {
                println!("{:#?}", client.get_guess(GuessRequest { dealer, guess }).await?)
            }
            None => println!("{:#?}", client.get_guesses(dealer).await?),
        },
        Commands::GetDealer { dealer } => {
            println!("{:#?}", client.get_dealer(dealer).await?);
            println!("Escrow: {} chips", client.escrow_balance(dealer).await?);
        }
        Commands::GetPricing { dealer } => {
            println!("{:#?}", client.get_pricing(PricingRequest { dealer }).await?);
        }
        Commands::GetConfig => {
            println!("{:#?}", client.get_config().await?);
        }
        Commands::GetEvents { since, limit } => {
            let events = client.get_events(EventsRequest { since, limit }).await?;
            for record in events {
                println!("{}: {:?}", record.id, record.event);
            }
        }
    }
    Ok(())
}
async fn get_access() -> Result<AccessRequest> {
    let user = read_public().await?;
    let sig = read_token().await?;
    let challenge = read_challenge().await?;
    Ok(AccessRequest {
        user,
        sig,
        challenge,
    })
}
async fn read_secret() -> Result<SecretKey> {
    let mut file = File::open("ecdsa.key").await?;
    let mut contents = vec![];
    file.read_to_end(&mut contents).await?;
    Ok(SecretKey::from_str(String::from_utf8(contents)?.as_str())?)
}
async fn read_public() -> Result<UserPubKey> {
    let mut file = File::open("ecdsa.pub").await?;
    let mut contents = vec![];
    file.read_to_end(&mut contents).await?;
    Ok(UserPubKey::from_str(String::from_utf8(contents)?.as_str())?)
}
async fn read_token() -> Result<Signature> {
    let mut file = File::open("access_token").await?;
    let mut contents = vec![];
    file.read_to_end(&mut contents).await?;
    Ok(Signature::from_str(String::from_utf8(contents)?.as_str())?)
}
async fn read_challenge() -> Result<String> {
    let mut file = File::open("challenge").await?;
    let mut contents = vec![];
    file.read_to_end(&mut contents).await?;
    Ok(String::from_utf8(contents)?)
}
