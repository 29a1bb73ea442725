//! AbiPago command-line entrypoint.
//!
//! The reference surface for the orchestrator: scan-to-pay without the
//! mobile app.
//!
//! Commands:
//! - `pay <uri>` — run a scanned payment end to end: resolve the merchant
//!   profile, classify, quote when cross-chain, sign, submit, and watch the
//!   settlement land.
//! - `profile <name>` — show a merchant's resolved payment profile.
//! - `quote` — ask the routing oracle for a cross-chain quote.
//! - `history <address>` — reconstruct payment history from settlement logs.
//! - `invoice-id` — pre-compute the settlement key of an invoice.
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `RPC_URL_*` per-chain JSON-RPC endpoints
//! - `EVM_PRIVATE_KEY` for the local signer (required by `pay`)
//! - `ROUTING_API_URL` / `ROUTING_INTEGRATOR` for the routing oracle

use alloy_primitives::{Address, B256, U256};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use std::str::FromStr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use abipago::config::Config;
use abipago::driver::{PaymentDriver, PaymentOutcome};
use abipago::history::HistoryReader;
use abipago::plan::{PaymentIntent, PaymentPlan, classify};
use abipago::profile::ProfileResolver;
use abipago::provider_cache::{ProviderCache, ProviderMap};
use abipago::routing::{ContractCallsQuoteRequest, QuoteRequest, QuoteStep, RoutingClient};
use abipago::signer::{LocalWalletSigner, WalletSigner};

use abipago_types::amount::format_units;
use abipago_types::chain::ChainRef;
use abipago_types::invoice::reference_of;
use abipago_types::networks::{self, KnownChain, NATIVE_SENTINEL};
use abipago_types::timestamp::UnixTimestamp;
use abipago_types::uri::PaymentRequestUri;
use abipago_types::Invoice;

#[derive(Parser, Debug)]
#[command(name = "abipago")]
#[command(about = "Intent-based cross-chain payments")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Pay a scanned abipago:// invoice.
    Pay {
        /// The scanned payload, e.g. "abipago://pay?ens=cafe.eth&amount=3.50".
        uri: String,
        /// Chain the payer spends from.
        #[arg(long)]
        from_chain: u64,
        /// Token the payer spends: an address, a known symbol, or "native".
        /// Defaults to the merchant's requested token.
        #[arg(long)]
        token: Option<String>,
    },
    /// Show a merchant's resolved payment profile.
    Profile { name: String },
    /// Ask the routing oracle for a quote.
    Quote {
        #[arg(long)]
        from_chain: u64,
        #[arg(long)]
        from_token: String,
        #[arg(long)]
        to_chain: u64,
        #[arg(long)]
        to_token: String,
        /// Raw input amount in token units.
        #[arg(long)]
        amount: String,
        #[arg(long, default_value_t = 0.005)]
        slippage: f64,
    },
    /// Reconstruct payment history from settlement logs.
    History {
        address: String,
        #[arg(long)]
        chain: u64,
    },
    /// Pre-compute the settlement key of an invoice.
    InvoiceId {
        #[arg(long)]
        receiver: String,
        #[arg(long)]
        token_out: String,
        /// Raw amount in token units.
        #[arg(long)]
        amount_out: String,
        #[arg(long, default_value_t = 0)]
        deadline: u64,
        #[arg(long)]
        reference: Option<String>,
        #[arg(long)]
        nonce: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Pay {
            uri,
            from_chain,
            token,
        } => pay(&uri, ChainRef::new(from_chain), token.as_deref()).await,
        Commands::Profile { name } => show_profile(&name).await,
        Commands::Quote {
            from_chain,
            from_token,
            to_chain,
            to_token,
            amount,
            slippage,
        } => {
            quote(
                ChainRef::new(from_chain),
                &from_token,
                ChainRef::new(to_chain),
                &to_token,
                &amount,
                slippage,
            )
            .await
        }
        Commands::History { address, chain } => history(&address, ChainRef::new(chain)).await,
        Commands::InvoiceId {
            receiver,
            token_out,
            amount_out,
            deadline,
            reference,
            nonce,
        } => invoice_id(
            &receiver,
            &token_out,
            &amount_out,
            deadline,
            reference.as_deref(),
            nonce,
        ),
    }
}

async fn pay(
    uri: &str,
    from_chain: ChainRef,
    token: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let request = PaymentRequestUri::parse(uri).ok_or("invalid payload: not an AbiPago URI")?;

    let config = Config::from_env()?;
    let providers = ProviderCache::from_config(&config);
    let routing = RoutingClient::new(config.routing_api.clone(), config.integrator.clone())?;

    // Merchant preferences live on mainnet's naming system.
    let profile = match providers.by_chain(KnownChain::Ethereum.chain_ref()) {
        Some(provider) => {
            ProfileResolver::new(provider.clone(), config.ens_registry)
                .payment_profile(&request.ens)
                .await?
        }
        None => None,
    };
    if let Some(profile) = &profile {
        if let Some(memo) = &profile.memo {
            println!("merchant says: {memo}");
        }
    }

    let dest_chain = request.chain_id.or(profile.as_ref().map(|p| p.chain));
    let default_router = dest_chain
        .map(|chain| config.router_for(chain))
        .unwrap_or(networks::SETTLEMENT_ROUTER);
    let intent = PaymentIntent::resolve(
        &request,
        profile.as_ref(),
        default_router,
        UnixTimestamp::try_now()?,
    )?;
    println!(
        "paying {} of {} to {} on chain {}",
        intent.display_amount, intent.invoice.tokenOut, intent.invoice.receiver, intent.dest_chain
    );

    let token_in = match token {
        Some(token) => parse_token(from_chain, token)?,
        None => intent.invoice.tokenOut,
    };

    let key = config
        .private_key
        .as_deref()
        .ok_or("EVM_PRIVATE_KEY is not set")?;
    let signer = LocalWalletSigner::from_private_key(key, &config.rpc)?;
    let payer = signer.address();

    // Direct and native plans spend exactly the invoiced amount; the
    // cross-chain input amount comes from the oracle quote below.
    let mut plan = classify(
        &intent,
        payer,
        from_chain,
        token_in,
        intent.invoice.amountOut,
    );

    let route = fetch_route(&routing, &plan, &intent, payer).await?;
    if let Some(route) = &route {
        plan.amount_in = U256::from_str(&route.estimate.from_amount)
            .map_err(|_| "oracle returned an unparseable fromAmount")?;
        println!(
            "route via {}: sending {} of {} from chain {}",
            route.tool, plan.amount_in, plan.token_in, plan.payer_chain
        );
    }

    let driver = PaymentDriver::new(routing, providers, Arc::new(signer));

    // Stream stage changes to the terminal; ctrl-c cancels at the next
    // suspension point without recalling anything already broadcast.
    let mut stages = driver.subscribe();
    let printer = tokio::spawn(async move {
        while stages.changed().await.is_ok() {
            println!("  → {}", *stages.borrow());
        }
    });
    let cancel = driver.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let outcome = driver.run(&plan, route.as_ref()).await?;
    printer.abort();
    match outcome {
        PaymentOutcome::Settled { tx } => println!("settled in {tx}"),
        PaymentOutcome::BridgeInFlight { source_tx } => {
            println!("bridge still in flight; track {source_tx} on an explorer")
        }
    }
    Ok(())
}

/// Fetches the contract-call quote for a cross-chain plan; `None` for
/// same-chain plans.
async fn fetch_route(
    routing: &RoutingClient,
    plan: &PaymentPlan,
    intent: &PaymentIntent,
    payer: Address,
) -> Result<Option<QuoteStep>, Box<dyn std::error::Error>> {
    let Some(contract_call) = plan.contract_call() else {
        return Ok(None);
    };
    let request = ContractCallsQuoteRequest {
        from_chain: plan.payer_chain,
        from_token: plan.token_in,
        from_address: payer,
        to_chain: plan.dest_chain,
        to_token: plan.invoice.tokenOut,
        to_amount: plan.invoice.amountOut.to_string(),
        // Failed terminal calls divert funds to the payer, who re-initiates.
        to_fallback_address: payer,
        contract_calls: vec![contract_call],
        slippage: Some(intent.slippage_bps as f64 / 10_000.0),
        integrator: String::new(),
    };
    Ok(Some(routing.quote_with_contract_calls(&request).await?))
}

async fn show_profile(name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    let providers = ProviderCache::from_config(&config);
    let provider = providers
        .by_chain(KnownChain::Ethereum.chain_ref())
        .ok_or("RPC_URL_ETHEREUM is required for profile resolution")?;
    let resolver = ProfileResolver::new(provider.clone(), config.ens_registry);

    match resolver.payment_profile(name).await? {
        Some(profile) => {
            println!("receiver:  {}", profile.receiver);
            println!("chain:     {}", profile.chain);
            println!("token:     {}", profile.token);
            println!("slippage:  {} bps", profile.slippage_bps);
            if let Some(tip) = profile.tip_bps {
                println!("tip:       {tip} bps");
            }
            if let Some(memo) = &profile.memo {
                println!("memo:      {memo}");
            }
            if let Some(expiry) = profile.expiry_sec {
                println!("expiry:    {expiry}s");
            }
            if let Some(router) = profile.router {
                println!("router:    {router}");
            }
        }
        None => println!("{name} has no payment profile"),
    }
    if let Some(avatar) = resolver.avatar(name).await? {
        println!("avatar:    {avatar}");
    }
    Ok(())
}

async fn quote(
    from_chain: ChainRef,
    from_token: &str,
    to_chain: ChainRef,
    to_token: &str,
    amount: &str,
    slippage: f64,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    let routing = RoutingClient::new(config.routing_api.clone(), config.integrator.clone())?;

    let from_token = parse_token(from_chain, from_token)?;
    let to_token = parse_token(to_chain, to_token)?;
    let step = routing
        .quote(&QuoteRequest {
            from_chain,
            from_token,
            from_address: Address::ZERO,
            to_chain,
            to_token,
            to_address: Address::ZERO,
            from_amount: amount.to_string(),
            slippage,
        })
        .await?;
    println!("tool:       {}", step.tool);
    println!("fromAmount: {}", step.estimate.from_amount);
    println!("toAmount:   {}", step.estimate.to_amount);
    if let Some(duration) = step.estimate.execution_duration {
        println!("duration:   ~{duration}s");
    }
    Ok(())
}

async fn history(address: &str, chain: ChainRef) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    let providers = ProviderCache::from_config(&config);
    let provider = providers
        .by_chain(chain)
        .ok_or("no RPC endpoint configured for that chain")?;
    let user = Address::from_str(address)?;

    let reader = HistoryReader::new(provider.clone(), chain, config.router_for(chain));
    let records = reader.payments_of(user).await?;
    if records.is_empty() {
        println!("no payments found");
        return Ok(());
    }
    for record in records {
        let direction = match record.direction {
            abipago::history::Direction::Sent => "sent",
            abipago::history::Direction::Received => "received",
        };
        println!(
            "{} {} {} {} (fee {}) tx {}",
            record.timestamp,
            direction,
            record.display_amount,
            record.token_symbol,
            format_units(record.fee, record.token_decimals),
            record.tx_hash,
        );
    }
    Ok(())
}

fn invoice_id(
    receiver: &str,
    token_out: &str,
    amount_out: &str,
    deadline: u64,
    reference: Option<&str>,
    nonce: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut invoice = Invoice::new(
        Address::from_str(receiver)?,
        Address::from_str(token_out)?,
        U256::from_str(amount_out)?,
        UnixTimestamp(deadline),
        reference.map(reference_of).unwrap_or(B256::ZERO),
    );
    if let Some(nonce) = nonce {
        invoice.nonce = U256::from(nonce);
    }
    println!("invoiceId: {}", invoice.id());
    println!("nonce:     {}", invoice.nonce);
    Ok(())
}

/// Parses a token argument: "native", a registry symbol, or an address.
fn parse_token(chain: ChainRef, token: &str) -> Result<Address, Box<dyn std::error::Error>> {
    if token.eq_ignore_ascii_case("native") {
        return Ok(NATIVE_SENTINEL);
    }
    if let Some(deployment) = networks::token_by_symbol(chain, token) {
        return Ok(deployment.address);
    }
    Ok(Address::from_str(token)
        .map_err(|_| format!("unknown token {token} on chain {chain}"))?)
}
