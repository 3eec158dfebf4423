use clap::{Parser, Subcommand};

use powchain::core::chain::Blockchain;
use powchain::core::params::*;
use powchain::core::types::Block;
use powchain::pow::ProofOfWork;

#[derive(Parser)]
#[command(name = "powchain", version)]
#[command(about = "powchain - a single-node proof-of-work ledger")]
struct Cli {
    /// Directory holding the chain database
    #[arg(long, global = true, default_value = DEFAULT_DATA_DIR)]
    data_dir: String,
    /// Difficulty: hashes must be below 2^(256 - bits)
    #[arg(long, global = true, default_value_t = DEFAULT_TARGET_BITS)]
    target_bits: u32,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open or create the chain
    Init,
    /// Mine and append a block
    Add {
        /// Block payload
        data: String,
    },
    /// Print blocks from tip to genesis
    Print {
        #[arg(long)]
        json: bool,
    },
    /// Re-check every block on the chain
    Verify,
    /// Show chain summary
    Info,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("powchain=info".parse().expect("static directive")),
        )
        .init();

    let cli = Cli::parse();

    let pow = PowParams::new(cli.target_bits).unwrap_or_else(|e| fail(e));
    let config = ChainConfig::new(&cli.data_dir).with_pow(pow);

    match cli.command {
        Commands::Init => {
            let chain = open_chain(&config);
            println!("🔨 powchain initialized!");
            println!("  Data:   {}", cli.data_dir);
            println!("  Tip:    {}", hex::encode(chain.tip()));
            println!("  Bits:   {}", chain.params().target_bits());
        }

        Commands::Add { data } => {
            let mut chain = open_chain(&config);
            let block = chain.add_block(data).unwrap_or_else(|e| fail(e));
            println!("✅ Block {}", block.hash_hex());
            println!("  Prev:   {}", hex::encode(&block.prev_hash));
            println!("  Nonce:  {}", block.nonce);
        }

        Commands::Print { json } => {
            let chain = open_chain(&config);
            for block in chain.iterator() {
                let block = block.unwrap_or_else(|e| fail(e));
                let valid = ProofOfWork::new(&block, chain.params()).validate();
                if json {
                    println!("{}", block_json(&block, valid));
                } else {
                    print_block(&block, valid);
                }
            }
        }

        Commands::Verify => {
            let chain = open_chain(&config);
            let count = chain.verify().unwrap_or_else(|e| fail(e));
            println!("🔍 Chain OK: {} blocks verified", count);
        }

        Commands::Info => {
            let chain = open_chain(&config);
            let height = chain.height().unwrap_or_else(|e| fail(e));
            println!("📊 powchain");
            println!("  Height: {}", height);
            println!("  Tip:    {}", hex::encode(chain.tip()));
            println!("  Bits:   {}", chain.params().target_bits());
        }
    }
}

fn open_chain(config: &ChainConfig) -> Blockchain {
    Blockchain::open(config).unwrap_or_else(|e| fail(e))
}

fn fail(e: impl std::fmt::Display) -> ! {
    tracing::error!("{}", e);
    eprintln!("❌ {}", e);
    std::process::exit(1);
}

fn print_block(block: &Block, valid: bool) {
    println!("── {}", block.hash_hex());
    println!("  Prev:   {}", if block.is_genesis() { "-".to_string() } else { hex::encode(&block.prev_hash) });
    println!("  Data:   {}", String::from_utf8_lossy(&block.data));
    println!("  Time:   {}", block.timestamp);
    println!("  Nonce:  {}", block.nonce);
    println!("  PoW:    {}", if valid { "ok" } else { "INVALID" });
}

fn block_json(block: &Block, valid: bool) -> serde_json::Value {
    serde_json::json!({
        "hash": block.hash_hex(),
        "prev_hash": hex::encode(&block.prev_hash),
        "data": String::from_utf8_lossy(&block.data),
        "timestamp": block.timestamp,
        "nonce": block.nonce,
        "pow_valid": valid,
    })
}
