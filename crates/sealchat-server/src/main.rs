//! Sealchat command-line client.
//!
//! # Usage
//!
//! ```bash
//! sealchat register alice
//! sealchat register bob
//! sealchat open alice bob
//! sealchat open bob alice
//! sealchat send alice bob "hello"
//! sealchat read bob alice
//! sealchat history bob alice --page 1 --limit 20
//! ```

use std::{
    io::{self, Write},
    path::PathBuf,
};

use clap::{Parser, Subcommand};
use sealchat_crypto::{Role, SystemEnv};
use sealchat_server::{ConversationService, RedbStore};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// End-to-end encrypted two-party conversations
#[derive(Parser, Debug)]
#[command(name = "sealchat")]
#[command(about = "End-to-end encrypted two-party conversations")]
#[command(version)]
struct Args {
    /// Path to the database file
    #[arg(long, default_value = "sealchat.redb")]
    db: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an identity key pair for a user
    Register {
        /// User handle
        user: String,
    },
    /// Open a conversation with a peer
    Open {
        /// User handle
        user: String,
        /// Peer handle
        peer: String,
        /// Force the initiator role
        #[arg(long, conflicts_with = "responder")]
        initiator: bool,
        /// Force the responder role
        #[arg(long)]
        responder: bool,
    },
    /// Encrypt and send a message
    Send {
        /// Sender handle
        user: String,
        /// Recipient handle
        peer: String,
        /// Message text
        message: String,
    },
    /// Decrypt unread messages from a peer
    Read {
        /// User handle
        user: String,
        /// Peer handle
        peer: String,
    },
    /// Show stored (encrypted) history, newest page first
    History {
        /// User handle
        user: String,
        /// Peer handle
        peer: String,
        /// Page number, 1 is the newest
        #[arg(long, default_value = "1")]
        page: u64,
        /// Messages per page
        #[arg(long)]
        limit: Option<usize>,
    },
    /// List a user's conversations
    Conversations {
        /// User handle
        user: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer().with_writer(io::stderr)).with(filter).init();

    let store = RedbStore::open(&args.db)?;
    let service = ConversationService::new(store, SystemEnv::new());

    tracing::debug!(db = %args.db.display(), "database opened");

    let mut out = io::stdout().lock();

    match args.command {
        Command::Register { user } => {
            let public = service.register(&user)?;
            writeln!(out, "registered {user}: {}", hex(public.as_bytes()))?;
        },
        Command::Open { user, peer, initiator, responder } => {
            let role = match (initiator, responder) {
                (true, _) => Some(Role::Initiator),
                (_, true) => Some(Role::Responder),
                _ => None,
            };
            let opened = service.open(&user, &peer, role)?;
            let verb = if opened.existing { "already open" } else { "opened" };
            writeln!(
                out,
                "{verb}: conversation {} with {peer} as {:?}",
                opened.conversation, opened.role
            )?;
        },
        Command::Send { user, peer, message } => {
            let index = service.send(&user, &peer, message.as_bytes())?;
            writeln!(out, "sent #{index}")?;
        },
        Command::Read { user, peer } => {
            let outcome = service.receive_pending(&user, &peer)?;

            for message in &outcome.messages {
                let text = String::from_utf8_lossy(&message.plaintext);
                writeln!(out, "#{} {}: {text}", message.index, message.sender)?;
            }
            if outcome.messages.is_empty() && outcome.stalled.is_none() {
                writeln!(out, "no new messages")?;
            }
            if let Some((index, err)) = &outcome.stalled {
                writeln!(out, "message #{index} could not be decrypted: {err}")?;
            }
            if outcome.has_more {
                writeln!(out, "more messages pending, run read again")?;
            }
        },
        Command::History { user, peer, page, limit } => {
            let history = service.history(&user, &peer, page, limit)?;

            writeln!(
                out,
                "page {}/{} ({} messages)",
                history.page, history.total_pages, history.total_count
            )?;
            for message in &history.messages {
                writeln!(
                    out,
                    "#{} {}: {} bytes",
                    message.index,
                    message.sender,
                    message.envelope.len()
                )?;
            }
        },
        Command::Conversations { user } => {
            for overview in service.conversations(&user)? {
                match &overview.last_message {
                    Some(last) => writeln!(
                        out,
                        "{} {} ({} messages, last #{} from {} at {}, {} bytes)",
                        overview.conversation,
                        overview.peer,
                        overview.message_count,
                        last.index,
                        last.sender,
                        last.sent_at,
                        last.envelope_len
                    )?,
                    None => {
                        writeln!(out, "{} {} (no messages)", overview.conversation, overview.peer)?;
                    },
                }
            }
        },
    }

    Ok(())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
