use std::{fs, path::PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ed25519_dalek::SigningKey;
use erc20_core::{
    amount::{format_units, parse_units},
    Address, Transfer,
};
use rand::{rngs::OsRng, RngCore};
use tracing_subscriber::EnvFilter;

mod chain;
mod config;

use chain::{signer_address, Call, LocalChain, Receipt, ReceiptStatus, SignedTransaction};
use config::{Config, Network, DEFAULT_DATA_DIR};

//==================== CLI ====================//

#[derive(Parser)]
#[command(name = "erc20", version, about = "Deploy and operate an ERC20 token ledger")]
struct Cli {
    /// Network whose state the command works on.
    #[arg(long, global = true, value_enum, env = "ERC20_NETWORK", default_value_t = Network::Local)]
    network: Network,

    /// Directory holding per-network chain state.
    #[arg(long, global = true, env = "ERC20_DATA_DIR", default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    /// Ed25519 secret key of the sender (64 hex chars).
    #[arg(long, global = true, env = "PRIVATE_KEY", hide_env_values = true)]
    sk_hex: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a signing key pair and print its address.
    Keygen {
        #[arg(long)]
        out_dir: PathBuf,
    },
    /// Deploy a new token contract owned by the sender.
    Deploy {
        /// Token name (e.g. Zenny)
        #[arg(long)]
        name: String,
        /// Token symbol (e.g. ZNY)
        #[arg(long)]
        symbol: String,
        /// Decimals of the token (e.g. 18)
        #[arg(long)]
        decimals: u8,
    },
    /// Mint tokens to an account. Owner only.
    Mint {
        #[arg(long, alias = "contractAddress")]
        contract: Address,
        /// Account receiving the minted tokens.
        #[arg(long, alias = "accountAddress")]
        to: Address,
        /// Amount in display units (e.g. 1.23)
        #[arg(long)]
        amount: String,
    },
    /// Burn tokens held by an account. Owner only.
    Burn {
        #[arg(long, alias = "contractAddress")]
        contract: Address,
        #[arg(long, alias = "accountAddress")]
        from: Address,
        #[arg(long)]
        amount: String,
    },
    /// Transfer tokens from the sender to another account.
    Transfer {
        #[arg(long, alias = "contractAddress")]
        contract: Address,
        #[arg(long)]
        to: Address,
        #[arg(long)]
        amount: String,
    },
    /// Show the balance of an account.
    Balance {
        #[arg(long, alias = "contractAddress")]
        contract: Address,
        #[arg(long, alias = "accountAddress")]
        account: Address,
    },
    /// Show token metadata, owner and supply.
    Info {
        #[arg(long, alias = "contractAddress")]
        contract: Address,
    },
    /// Print a stored transaction receipt.
    Receipt {
        #[arg(long)]
        tx: String,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

//==================== transactions ====================//

fn send(config: &Config, call: Call, contract: Option<Address>) -> Result<Receipt> {
    let sk = config.signer()?;
    let chain = open_chain(config)?;
    let nonce = chain.nonce(&signer_address(&sk))?;
    let tx = SignedTransaction::sign(&sk, call, contract, nonce);
    chain
        .submit(&tx)
        .with_context(|| format!("submitting {} transaction", tx.call.name()))
}

fn open_chain(config: &Config) -> Result<LocalChain> {
    let dir = config.network_dir();
    LocalChain::open(&dir).with_context(|| format!("opening chain state in {}", dir.display()))
}

fn print_tx_url(config: &Config, receipt: &Receipt) {
    match config.network.explorer_tx_url(&receipt.tx_hash) {
        Some(url) => println!("Transaction URL: {url}"),
        None => println!("Transaction hash: {}", receipt.tx_hash),
    }
}

fn print_receipt(receipt: &Receipt) -> Result<()> {
    if let ReceiptStatus::Reverted { reason } = &receipt.status {
        bail!("transaction {} reverted: {reason}", receipt.tx_hash);
    }
    println!("completed");
    for log in &receipt.logs {
        println!("Event Name: {}", Transfer::NAME);
        println!("Args: {log}");
    }
    Ok(())
}

/// Convert a display amount using the decimals of the target contract.
fn raw_amount(config: &Config, contract: &Address, amount: &str) -> Result<erc20_core::Amount> {
    let ledger = open_chain(config)?.ledger(contract)?;
    parse_units(amount, ledger.decimals())
        .with_context(|| format!("invalid amount {amount:?} for {} decimals", ledger.decimals()))
}

//==================== commands ====================//

fn keygen_cmd(out_dir: PathBuf) -> Result<()> {
    fs::create_dir_all(&out_dir).with_context(|| format!("creating {}", out_dir.display()))?;

    let mut sk_bytes = [0u8; 32];
    OsRng.fill_bytes(&mut sk_bytes);
    let sk = SigningKey::from_bytes(&sk_bytes);
    let pk = sk.verifying_key();

    fs::write(out_dir.join("sk.hex"), hex::encode(sk_bytes)).context("writing sk.hex")?;
    fs::write(out_dir.join("pk.hex"), hex::encode(pk.as_bytes())).context("writing pk.hex")?;
    println!("keypair written → {}", out_dir.display());
    println!("address: {}", signer_address(&sk));
    Ok(())
}

fn deploy_cmd(config: &Config, name: String, symbol: String, decimals: u8) -> Result<()> {
    let receipt = send(
        config,
        Call::Deploy {
            name,
            symbol,
            decimals,
        },
        None,
    )?;
    println!("ERC20 contract deploy address {}", receipt.contract);
    print_tx_url(config, &receipt);
    print_receipt(&receipt)?;
    println!("Deploy completed");
    Ok(())
}

fn mutate_cmd(config: &Config, contract: Address, call: Call) -> Result<()> {
    let receipt = send(config, call, Some(contract))?;
    print_tx_url(config, &receipt);
    print_receipt(&receipt)
}

fn balance_cmd(config: &Config, contract: Address, account: Address) -> Result<()> {
    let ledger = open_chain(config)?.ledger(&contract)?;
    let raw = ledger.balance_of(&account);
    println!(
        "{} {} ({} raw)",
        format_units(raw, ledger.decimals()),
        ledger.symbol(),
        raw
    );
    Ok(())
}

fn info_cmd(config: &Config, contract: Address) -> Result<()> {
    let ledger = open_chain(config)?.ledger(&contract)?;
    println!("contract:     {contract}");
    println!("network:      {}", config.network);
    println!("name:         {}", ledger.name());
    println!("symbol:       {}", ledger.symbol());
    println!("decimals:     {}", ledger.decimals());
    println!("owner:        {}", ledger.owner());
    println!(
        "total supply: {} ({} raw)",
        format_units(ledger.total_supply(), ledger.decimals()),
        ledger.total_supply()
    );
    println!("holders:      {}", ledger.holders().count());
    println!("state root:   0x{}", hex::encode(ledger.state_root()));
    Ok(())
}

fn receipt_cmd(config: &Config, tx: &str) -> Result<()> {
    let chain = open_chain(config)?;
    let receipt = chain.receipt(tx)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&receipt).context("encoding receipt")?
    );
    Ok(())
}

//==================== main ====================//

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = Config::new(cli.network, cli.data_dir, cli.sk_hex);

    match cli.command {
        Command::Keygen { out_dir } => keygen_cmd(out_dir),
        Command::Deploy {
            name,
            symbol,
            decimals,
        } => deploy_cmd(&config, name, symbol, decimals),
        Command::Mint {
            contract,
            to,
            amount,
        } => {
            let amount = raw_amount(&config, &contract, &amount)?;
            mutate_cmd(&config, contract, Call::Mint { to, amount })
        }
        Command::Burn {
            contract,
            from,
            amount,
        } => {
            let amount = raw_amount(&config, &contract, &amount)?;
            mutate_cmd(&config, contract, Call::Burn { from, amount })
        }
        Command::Transfer {
            contract,
            to,
            amount,
        } => {
            let amount = raw_amount(&config, &contract, &amount)?;
            mutate_cmd(&config, contract, Call::Transfer { to, amount })
        }
        Command::Balance { contract, account } => balance_cmd(&config, contract, account),
        Command::Info { contract } => info_cmd(&config, contract),
        Command::Receipt { tx } => receipt_cmd(&config, &tx),
    }
}
