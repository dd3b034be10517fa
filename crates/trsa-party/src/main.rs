//! Threshold RSA party simulator
//!
//! Command-line interface running every party of a group in one process over
//! an in-memory relay:
//! - Trusted dealer key setup
//! - Distributed modulus and key generation
//! - Quorum signing, including membership churn

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures_util::future::join_all;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn, Level};
use trsa_core::arith::CryptoRandom;
use trsa_core::keygen::{self, PublicTrialDivision};
use trsa_core::mpc::MemoryRelay;
use trsa_core::quorum::QuorumCoordinator;
use trsa_core::types::derive_session_id;
use trsa_core::{Error, KeyShare, PartyId, ProtocolParams, SessionConfig};

/// Threshold RSA party simulator
#[derive(Parser)]
#[command(name = "trsa-party")]
#[command(about = "Distributed RSA key generation and threshold signing")]
#[command(version)]
struct Cli {
    /// Data directory for key shares
    #[arg(short, long, env = "DEST", default_value = "./data")]
    dest: PathBuf,

    /// Bit length of each RSA prime
    #[arg(long, env = "PRIME_BITS", default_value_t = 256)]
    prime_bits: u64,

    /// Sieve bound B1
    #[arg(long, env = "SIEVE_BOUND", default_value_t = trsa_core::DEFAULT_SIEVE_BOUND)]
    sieve_bound: u64,

    /// Per-round collection deadline in seconds
    #[arg(long, env = "ROUND_TIMEOUT", default_value_t = 30)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deal a key to the registry and save every share
    Deal {
        /// Registered party IDs (comma-separated)
        #[arg(short, long, default_value = "0,1,2,5,6")]
        registry: String,

        /// Minimum quorum size
        #[arg(short, long, default_value_t = 3)]
        threshold: usize,
    },

    /// Generate a modulus with no trusted party
    Modgen {
        /// Participating party IDs (comma-separated)
        #[arg(short, long, default_value = "0,1,2")]
        parties: String,

        /// Minimum quorum size
        #[arg(short, long, default_value_t = 2)]
        threshold: usize,

        /// Also derive the private exponent and save the key shares
        #[arg(long)]
        save: bool,
    },

    /// Sign a message with the saved shares of the given quorum
    Sign {
        /// Message to sign (UTF-8)
        #[arg(short, long)]
        message: String,

        /// Active party IDs (comma-separated)
        #[arg(short, long)]
        parties: String,
    },

    /// Replay membership churn against a freshly dealt key
    Churn {
        /// Registered party IDs (comma-separated)
        #[arg(short, long, default_value = "0,1,2,5,6")]
        registry: String,

        /// Minimum quorum size
        #[arg(short, long, default_value_t = 3)]
        threshold: usize,
    },

    /// Show key share info
    Info {
        /// Party ID whose share to show
        #[arg(short, long, env = "PARTY_ID")]
        party_id: PartyId,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    // Ensure data directory exists
    std::fs::create_dir_all(&cli.dest)?;

    let params = ProtocolParams {
        prime_bits: cli.prime_bits,
        sieve_bound: cli.sieve_bound,
        trial_division_bound: cli.sieve_bound * 8,
        round_timeout: Duration::from_secs(cli.timeout_secs),
        ..Default::default()
    };

    match cli.command {
        Commands::Deal {
            ref registry,
            threshold,
        } => run_deal(&cli, params, &parse_parties(registry)?, threshold).await?,
        Commands::Modgen {
            ref parties,
            threshold,
            save,
        } => run_modgen(&cli, params, &parse_parties(parties)?, threshold, save).await?,
        Commands::Sign {
            ref message,
            ref parties,
        } => run_sign(&cli, params, message, &parse_parties(parties)?).await?,
        Commands::Churn {
            ref registry,
            threshold,
        } => run_churn(params, &parse_parties(registry)?, threshold).await?,
        Commands::Info { party_id } => show_info(&cli, party_id)?,
    }

    Ok(())
}

fn parse_parties(list: &str) -> Result<Vec<PartyId>> {
    let mut parties = list
        .split(',')
        .map(|s| s.trim().parse::<PartyId>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_context(|| format!("invalid party list {:?}", list))?;
    parties.sort_unstable();
    parties.dedup();
    Ok(parties)
}

async fn run_deal(
    cli: &Cli,
    params: ProtocolParams,
    registry: &[PartyId],
    threshold: usize,
) -> Result<()> {
    info!(parties = ?registry, threshold, "Dealing key");

    // no active parties: skip presigning, only the shares are wanted
    let coordinator =
        QuorumCoordinator::with_dealer(MemoryRelay::new(), registry, threshold, &[], params)
            .await?;

    for id in coordinator.registry() {
        if let Some(party) = coordinator.party(id) {
            save_key_share(&cli.dest, &party.key)?;
        }
    }

    println!("Modulus: {}", coordinator.public_key().modulus.to_str_radix(16));
    println!("Exponent: {}", coordinator.public_key().exponent);
    Ok(())
}

async fn run_modgen(
    cli: &Cli,
    params: ProtocolParams,
    parties: &[PartyId],
    threshold: usize,
    save: bool,
) -> Result<()> {
    info!(parties = ?parties, prime_bits = params.prime_bits, "Starting modulus generation");

    let relay = MemoryRelay::new();
    let verifier = PublicTrialDivision::from_params(&params);
    let session_id = derive_session_id("modgen", parties, 0, 0);
    let configs = parties
        .iter()
        .map(|&id| -> trsa_core::Result<SessionConfig> {
            Ok(SessionConfig::new(session_id, id, parties, threshold)?
                .with_timeout(params.round_timeout))
        })
        .collect::<trsa_core::Result<Vec<_>>>()?;
    let mut rngs: Vec<CryptoRandom> = parties.iter().map(|_| CryptoRandom::os()).collect();

    let (relay, params, verifier) = (&relay, &params, &verifier);
    if save {
        let futures = configs.iter().zip(rngs.iter_mut()).map(|(config, rng)| async move {
            keygen::run_distributed_keygen(config, params, verifier, rng, relay).await
        });
        let keys = join_all(futures)
            .await
            .into_iter()
            .collect::<trsa_core::Result<Vec<KeyShare>>>()?;
        for key in &keys {
            save_key_share(&cli.dest, key)?;
        }
        if let Some(key) = keys.first() {
            println!("Modulus: {}", key.public_key.modulus.to_str_radix(16));
        }
    } else {
        let futures = configs.iter().zip(rngs.iter_mut()).map(|(config, rng)| async move {
            keygen::run_modulus_generation(config, params, verifier, rng, relay).await
        });
        let generated = join_all(futures)
            .await
            .into_iter()
            .collect::<trsa_core::Result<Vec<_>>>()?;
        if let Some(first) = generated.first() {
            println!("Modulus: {}", first.modulus.to_str_radix(16));
            println!("Bits: {}", first.modulus.bits());
            println!("Attempts: {}", first.attempts);
        }
    }
    Ok(())
}

async fn run_sign(
    cli: &Cli,
    params: ProtocolParams,
    message: &str,
    parties: &[PartyId],
) -> Result<()> {
    let keys = load_all_key_shares(&cli.dest)?;
    let mut coordinator =
        QuorumCoordinator::from_key_shares(MemoryRelay::new(), keys, parties, params)?;

    info!(participants = ?parties, text = message, "Signing");

    let outcome = match coordinator.sign(message.as_bytes()).await {
        Err(Error::StaleBundle { .. }) => coordinator.sign(message.as_bytes()).await?,
        other => other?,
    };

    println!("Signature: {}", outcome.signature.to_hex());
    println!("Members: {:?}", outcome.members);
    Ok(())
}

async fn run_churn(params: ProtocolParams, registry: &[PartyId], threshold: usize) -> Result<()> {
    if registry.len() < threshold + 2 {
        bail!("churn needs at least threshold + 2 registered parties");
    }
    let initial = &registry[..threshold];
    let joiners = [registry[threshold], registry[threshold + 1]];

    let mut coordinator =
        QuorumCoordinator::with_dealer(MemoryRelay::new(), registry, threshold, initial, params)
            .await?;

    println!("Try with {} people.", initial.len());
    attempt(&mut coordinator, "apples").await?;

    println!("Add party {}.", joiners[0]);
    coordinator.activate(joiners[0])?;
    attempt(&mut coordinator, "bloop").await?;
    attempt(&mut coordinator, "bloop").await?;

    println!("Add party {}.", joiners[1]);
    coordinator.activate(joiners[1])?;
    attempt(&mut coordinator, "candy").await?;
    attempt(&mut coordinator, "candy").await?;

    println!("Remove party {}.", joiners[0]);
    coordinator.deactivate(joiners[0])?;
    attempt(&mut coordinator, "doodle").await?;
    attempt(&mut coordinator, "doodle").await?;

    println!("Add back party {}.", joiners[0]);
    coordinator.activate(joiners[0])?;
    attempt(&mut coordinator, "elephant").await?;
    attempt(&mut coordinator, "elephant").await?;

    Ok(())
}

async fn attempt(coordinator: &mut QuorumCoordinator<MemoryRelay>, message: &str) -> Result<()> {
    match coordinator.sign(message.as_bytes()).await {
        Ok(outcome) => {
            println!("  {:?} signed {:?}", outcome.members, message);
            Ok(())
        }
        Err(Error::StaleBundle { epoch, members }) => {
            warn!(epoch, ?members, "Presignatures regenerated");
            println!("  {:?} failed {:?}: presignatures regenerated", members, message);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn show_info(cli: &Cli, party_id: PartyId) -> Result<()> {
    let key_share = load_key_share(&cli.dest, party_id)?;

    println!("Key Share Info:");
    println!("  Party ID: {}", key_share.party_id);
    println!("  Registry: {:?}", key_share.registry);
    println!("  Threshold: {}", key_share.threshold);
    println!("  Modulus bits: {}", key_share.public_key.modulus.bits());
    println!("  Modulus: {}", key_share.public_key.modulus.to_str_radix(16));
    println!("  Exponent: {}", key_share.public_key.exponent);

    Ok(())
}

fn key_share_path(dest: &Path, party_id: PartyId) -> PathBuf {
    dest.join(format!("keyshare.{}.json", party_id))
}

fn save_key_share(dest: &Path, key_share: &KeyShare) -> Result<()> {
    let path = key_share_path(dest, key_share.party_id);
    let json = serde_json::to_string_pretty(key_share)?;
    std::fs::write(&path, json)?;
    info!(party_id = key_share.party_id, path = ?path, "Key share saved");
    Ok(())
}

fn load_key_share(dest: &Path, party_id: PartyId) -> Result<KeyShare> {
    let path = key_share_path(dest, party_id);
    let json = std::fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    let key_share: KeyShare = serde_json::from_str(&json)?;
    Ok(key_share)
}

fn load_all_key_shares(dest: &Path) -> Result<Vec<KeyShare>> {
    let mut keys = Vec::new();
    let mut registry = None;
    for entry in std::fs::read_dir(dest)? {
        let name = entry?.file_name();
        let name = name.to_string_lossy();
        let Some(id) = name
            .strip_prefix("keyshare.")
            .and_then(|rest| rest.strip_suffix(".json"))
            .and_then(|id| id.parse::<PartyId>().ok())
        else {
            continue;
        };
        let key = load_key_share(dest, id)?;
        registry.get_or_insert_with(|| key.registry.clone());
        keys.push(key);
    }
    if keys.is_empty() {
        bail!("no key shares found in {}", dest.display());
    }
    if let Some(registry) = registry {
        if keys.len() != registry.len() {
            warn!(found = keys.len(), registered = registry.len(), "Some key shares are missing");
        }
    }
    Ok(keys)
}
