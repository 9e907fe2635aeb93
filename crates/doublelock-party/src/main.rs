//! Doublelock Party CLI
//!
//! Command-line interface for a single participant:
//! - Session creation and dealerless key generation
//! - Encryption to the aggregate key, optionally double-locked
//! - Partial decryptions, group partials and final combination

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use doublelock_core::ecies::{self, PartialDecryption};
use doublelock_core::policy::{self, GroupPartial, MemberPartial};
use doublelock_core::{
    keygen, Curve, DkgConfig, Envelope, GroupPolicy, KeyShare, SessionParams, SessionStore,
    TransportKeyPair,
};
use rand::rngs::OsRng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use session_store_client::HttpStore;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, Level};

/// Doublelock Party - threshold key management participant
#[derive(Parser)]
#[command(name = "doublelock-party")]
#[command(about = "Dealerless threshold key generation and double-locked decryption")]
#[command(version)]
struct Cli {
    /// Session store service URL
    #[arg(short, long, env = "STORE_URL", default_value = "http://127.0.0.1:8080")]
    store: String,

    /// Participant ID, unique within a session
    #[arg(short, long, env = "PARTICIPANT_ID", default_value = "party")]
    participant_id: String,

    /// Data directory for key shares and transport keys
    #[arg(short, long, env = "DEST", default_value = "./data")]
    dest: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a key generation session
    CreateSession {
        /// Number of participants
        #[arg(short, long)]
        n: u32,

        /// Threshold (t-of-n)
        #[arg(short, long)]
        t: u32,

        /// Key epoch
        #[arg(short, long, default_value = "0")]
        epoch: u64,

        /// Group policy JSON file
        #[arg(long)]
        policy: Option<PathBuf>,
    },

    /// Join a session and run distributed key generation
    Keygen {
        /// Session ID
        session: String,

        /// Milliseconds between store polls
        #[arg(long, default_value = "100")]
        poll_interval_ms: u64,

        /// Polls without progress before giving up
        #[arg(long, default_value = "300")]
        max_polls: u32,
    },

    /// Encrypt a message to the aggregate key
    Encrypt {
        /// Message to encrypt
        #[arg(short, long)]
        message: String,

        /// Associated data bound to the ciphertext
        #[arg(long, default_value = "")]
        aad: String,

        /// Skip the group lock even when a group key exists
        #[arg(long)]
        person_only: bool,

        /// Output file
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Compute this participant's partial decryption
    Partial {
        /// Sealed message file
        input: PathBuf,

        /// Output file
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Compute this participant's partial for one of its groups
    MemberPartial {
        /// Sealed message file
        input: PathBuf,

        /// Group name
        #[arg(short, long)]
        group: String,

        /// Output file
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Combine member partials into a group partial
    GroupPartial {
        /// Group name
        #[arg(short, long)]
        group: String,

        /// Participating groups (comma-separated)
        #[arg(long)]
        participating: String,

        /// Member partial files
        #[arg(required = true)]
        partials: Vec<PathBuf>,

        /// Output file
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Combine partials and decrypt
    Decrypt {
        /// Sealed message file
        input: PathBuf,

        /// Partial decryption files
        #[arg(short, long, required = true, num_args = 1..)]
        partials: Vec<PathBuf>,

        /// Group partial files, required for double-locked messages
        #[arg(short, long, num_args = 1..)]
        groups: Vec<PathBuf>,
    },

    /// Show key share info
    Info,
}

/// A ciphertext as exchanged between participants
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SealedMessage {
    session_id: String,
    double_locked: bool,
    aad: String,
    envelope: Envelope,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    // Ensure data directory exists
    std::fs::create_dir_all(&cli.dest)?;

    let curve = Curve::secp256k1();
    let store = HttpStore::new(&cli.store);

    match cli.command {
        Commands::CreateSession {
            n,
            t,
            epoch,
            ref policy,
        } => {
            let session_id = create_session(&store, n, t, epoch, policy.as_deref()).await?;
            println!("Session ID: {}", session_id);
        }
        Commands::Keygen {
            ref session,
            poll_interval_ms,
            max_polls,
        } => {
            let config = DkgConfig {
                poll_interval: Duration::from_millis(poll_interval_ms),
                max_polls,
                ..DkgConfig::default()
            };
            let key_share = run_keygen(curve, &store, &cli.dest, &cli.participant_id, session, config).await?;
            println!("Public Key: {}", hex::encode(curve.encode_point(&key_share.public_key)));
            if let Some(group_key) = &key_share.group_key {
                println!("Group Key: {}", hex::encode(curve.encode_point(group_key)));
            }
        }
        Commands::Encrypt {
            ref message,
            ref aad,
            person_only,
            ref out,
        } => {
            let key_share = load_key_share(&cli.dest, &cli.participant_id)?;
            let sealed = encrypt(curve, &key_share, message.as_bytes(), aad, person_only)?;
            write_json(out, &sealed)?;
            info!(double_locked = sealed.double_locked, path = ?out, "Message encrypted");
        }
        Commands::Partial { ref input, ref out } => {
            let key_share = load_key_share(&cli.dest, &cli.participant_id)?;
            let sealed: SealedMessage = read_json(input)?;
            let partial = ecies::partial_decrypt(curve, &key_share, &sealed.envelope)?;
            write_json(out, &partial)?;
            info!(index = partial.index, path = ?out, "Partial decryption written");
        }
        Commands::MemberPartial {
            ref input,
            ref group,
            ref out,
        } => {
            let key_share = load_key_share(&cli.dest, &cli.participant_id)?;
            let sealed: SealedMessage = read_json(input)?;
            let partial = policy::member_partial(curve, &key_share, group, &sealed.envelope)?;
            write_json(out, &partial)?;
            info!(group = %group, index = partial.index, path = ?out, "Member partial written");
        }
        Commands::GroupPartial {
            ref group,
            ref participating,
            ref partials,
            ref out,
        } => {
            let key_share = load_key_share(&cli.dest, &cli.participant_id)?;
            let members: Vec<MemberPartial> = read_all(partials)?;
            let partial = group_partial(curve, &key_share, group, &members, participating)?;
            write_json(out, &partial)?;
            info!(group = %group, contributors = ?partial.contributors, path = ?out, "Group partial written");
        }
        Commands::Decrypt {
            ref input,
            ref partials,
            ref groups,
        } => {
            let key_share = load_key_share(&cli.dest, &cli.participant_id)?;
            let sealed: SealedMessage = read_json(input)?;
            let partials: Vec<PartialDecryption> = read_all(partials)?;
            let group_partials: Vec<GroupPartial> = read_all(groups)?;
            let plaintext = decrypt(curve, &key_share, &sealed, &partials, &group_partials)?;
            println!("{}", String::from_utf8_lossy(&plaintext));
        }
        Commands::Info => {
            let key_share = load_key_share(&cli.dest, &cli.participant_id)?;
            show_info(curve, &key_share);
        }
    }

    Ok(())
}

async fn create_session<S: SessionStore>(
    store: &S,
    n: u32,
    t: u32,
    epoch: u64,
    policy: Option<&Path>,
) -> Result<String> {
    let mut params = SessionParams::new(n, t, epoch)?;
    if let Some(path) = policy {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading policy {}", path.display()))?;
        params = params.with_policy(GroupPolicy::from_json(&json)?)?;
    }

    let session_id = store.create_session(&params).await?;
    info!(session_id = %session_id, n, t, epoch, "Session created");
    Ok(session_id)
}

async fn run_keygen<S: SessionStore>(
    curve: &Curve,
    store: &S,
    dest: &Path,
    participant_id: &str,
    session_id: &str,
    config: DkgConfig,
) -> Result<KeyShare> {
    let transport = load_or_create_transport(curve, dest, participant_id)?;

    info!(participant_id, session_id, "Starting DKG");
    let key_share = keygen::run_dkg(
        curve,
        store,
        session_id,
        participant_id,
        transport,
        config,
        &mut OsRng,
    )
    .await?;

    // Save key share
    let key_share_path = dest.join(format!("keyshare.{}.json", participant_id));
    write_json(&key_share_path, &key_share)?;

    info!(
        index = key_share.index,
        excluded = ?key_share.excluded,
        path = ?key_share_path,
        "DKG completed, key share saved"
    );

    Ok(key_share)
}

fn encrypt(
    curve: &Curve,
    key_share: &KeyShare,
    message: &[u8],
    aad: &str,
    person_only: bool,
) -> Result<SealedMessage> {
    let (envelope, double_locked) = match &key_share.group_key {
        Some(group_key) if !person_only => (
            policy::seal_double_locked(
                curve,
                &key_share.public_key,
                group_key,
                message,
                aad.as_bytes(),
                &mut OsRng,
            )?,
            true,
        ),
        _ => (
            ecies::encrypt(curve, &key_share.public_key, message, aad.as_bytes(), &mut OsRng)?,
            false,
        ),
    };

    Ok(SealedMessage {
        session_id: key_share.session_id.clone(),
        double_locked,
        aad: aad.to_string(),
        envelope,
    })
}

fn group_partial(
    curve: &Curve,
    key_share: &KeyShare,
    group: &str,
    members: &[MemberPartial],
    participating: &str,
) -> Result<GroupPartial> {
    let policy = key_share
        .policy
        .as_ref()
        .ok_or_else(|| anyhow!("key share carries no group policy"))?;
    let participating = parse_groups(participating);
    Ok(policy::group_partial(curve, policy, group, members, &participating)?)
}

fn decrypt(
    curve: &Curve,
    key_share: &KeyShare,
    sealed: &SealedMessage,
    partials: &[PartialDecryption],
    group_partials: &[GroupPartial],
) -> Result<Vec<u8>> {
    if sealed.session_id != key_share.session_id {
        bail!(
            "message was sealed under session {}, key share belongs to {}",
            sealed.session_id,
            key_share.session_id
        );
    }

    let z = ecies::combine(curve, partials, key_share.threshold)?;
    let aad = sealed.aad.as_bytes();

    if !sealed.double_locked {
        return Ok(ecies::decrypt(curve, &z, &sealed.envelope, aad)?);
    }

    let policy = key_share
        .policy
        .as_ref()
        .ok_or_else(|| anyhow!("key share carries no group policy"))?;
    let participating = group_partials
        .first()
        .map(|p| p.participating.clone())
        .ok_or_else(|| anyhow!("double-locked message needs group partials"))?;
    let s = policy::combine_groups(curve, policy, group_partials, &participating)?;

    Ok(policy::open_double_locked(curve, &z, &s, &sealed.envelope, aad)?)
}

fn show_info(curve: &Curve, key_share: &KeyShare) {
    println!("Key Share Info:");
    println!("  Session: {}", key_share.session_id);
    println!("  Index: {}", key_share.index);
    println!("  N Parties: {}", key_share.n_parties);
    println!("  Threshold: {}", key_share.threshold);
    println!("  Public Key: {}", hex::encode(curve.encode_point(&key_share.public_key)));
    if !key_share.excluded.is_empty() {
        println!("  Excluded: {:?}", key_share.excluded);
    }
    if let Some(group_key) = &key_share.group_key {
        println!("  Group Key: {}", hex::encode(curve.encode_point(group_key)));
        for share in &key_share.group_shares {
            println!(
                "  Group {}: position {}, local index {}",
                share.group, share.position, share.local_index
            );
        }
    }
}

fn parse_groups(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn load_or_create_transport(curve: &Curve, dest: &Path, participant_id: &str) -> Result<TransportKeyPair> {
    let path = dest.join(format!("transport.{}.json", participant_id));
    if path.exists() {
        return read_json(&path);
    }

    let keypair = TransportKeyPair::generate(curve, &mut OsRng)?;
    write_json(&path, &keypair)?;
    info!(path = ?path, "Transport key pair created");
    Ok(keypair)
}

fn load_key_share(dest: &Path, participant_id: &str) -> Result<KeyShare> {
    read_json(&dest.join(format!("keyshare.{}.json", participant_id)))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let json = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("parsing {}", path.display()))
}

fn read_all<T: DeserializeOwned>(paths: &[PathBuf]) -> Result<Vec<T>> {
    paths.iter().map(|p| read_json(p)).collect()
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
