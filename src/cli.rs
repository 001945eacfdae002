use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::config::{ClientConfig, HostConfig, LocalPlayer, Timings};
use crate::core::protocol::Money;
use crate::core::session::RoomCode;
use crate::host::server::TableHost;
use crate::{logging, table};

#[derive(Parser)]
#[command(name = "dicetable")]
#[command(about = "🎲 Three-seat dice elimination game in the terminal")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Join a table as a player
    Join {
        /// Room code (letters and digits)
        #[arg(short, long)]
        room: String,

        /// Your user id on the site
        #[arg(short, long)]
        user_id: u64,

        /// Display name
        #[arg(short, long)]
        name: String,

        /// Site origin; the socket scheme follows it (http → ws, https → wss)
        #[arg(short, long, env = "DICETABLE_ORIGIN", default_value = "http://127.0.0.1:4000")]
        origin: String,

        /// Directory for the client log file
        #[arg(long, default_value = "logs")]
        log_dir: PathBuf,
    },
    /// Host dice tables
    Host {
        /// Address to bind the server to
        #[arg(short, long, default_value = "0.0.0.0:4000")]
        addr: SocketAddr,

        /// Entry price per seat, in whole units
        #[arg(short, long, default_value_t = 100)]
        stake: u32,

        /// How long the prize wheel spins before play starts
        #[arg(long, default_value_t = 7)]
        spin_secs: u64,
    },
}

pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Join { room, user_id, name, origin, log_dir } => {
            let _guard = logging::init_file_logger(&log_dir, &user_id.to_string());
            let config = ClientConfig {
                origin,
                room: RoomCode::parse(&room)?,
                local: LocalPlayer { id: user_id, name },
                timings: Timings::default(),
            };

            let summary = table::play(config).await?;
            match summary.session.outcome {
                Some(outcome) => match (outcome.winner, outcome.prize) {
                    (Some(winner), Some(prize)) => println!("🏁 {winner} won {prize}"),
                    (Some(winner), None) => println!("🏁 {winner} won"),
                    _ => println!("🏁 Game over"),
                },
                None => println!("👋 Left table {}", summary.session.room),
            }
        }

        Commands::Host { addr, stake, spin_secs } => {
            logging::init_stdout_logger();
            let config = HostConfig {
                addr,
                stake: Money::from_units(i64::from(stake)),
                spin_duration: Duration::from_secs(spin_secs),
                ..HostConfig::default()
            };
            TableHost::bind(config).await?.run().await?;
        }
    }

    Ok(())
}
