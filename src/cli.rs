use clap::{Parser, Subcommand, ValueEnum};

const LONG_ABOUT: &str = r#"
Fleetwatch - real-time fleet state for virtual machines

Opens a persistent, authenticated WebSocket subscription against a fleet
backend, reconciles the typed message stream into a local machine registry
and prints lifecycle transitions as they happen.

Typical session:
  fleetwatch watch --mode mine                  ← machines of your account
  fleetwatch watch --mode all                   ← the whole fleet
  fleetwatch watch --mode single --machine ID   ← one machine
  fleetwatch start <uuid>                       ← request a bootup
  fleetwatch stop <uuid>                        ← request a shutdown

Configuration:
  FLEETWATCH_API_URL   REST base URL    (default http://127.0.0.1:8000)
  FLEETWATCH_WS_URL    WebSocket base   (default ws://127.0.0.1:8000)
  FLEETWATCH_TOKEN     access token     (or pass --token)
"#;

#[derive(Parser, Clone)]
#[command(name = "fleetwatch")]
#[command(about = "Real-time synchronization client for virtual machine fleet state")]
#[command(long_about = LONG_ABOUT)]
#[command(version)]
pub struct Cli {
    /// Enable verbose output (-v)
    #[arg(short, long)]
    pub verbose: bool,

    /// Suppress non-error output (-q)
    #[arg(short, long)]
    pub quiet: bool,

    /// Output logs in JSON format
    #[arg(long)]
    pub json: bool,

    /// Access token (falls back to FLEETWATCH_TOKEN)
    #[arg(long, global = true, env = "FLEETWATCH_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WatchMode {
    /// Machines owned by or assigned to your account
    Mine,
    /// Every machine the server manages
    All,
    /// One machine, requires --machine
    Single,
}

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Subscribe to live machine state and print lifecycle transitions
    Watch {
        /// Subscription scope
        #[arg(long, value_enum, default_value = "mine")]
        mode: WatchMode,

        /// Machine uuid, required for --mode single
        #[arg(long)]
        machine: Option<String>,

        /// Write logs to ~/.fleetwatch/logs/watch.log instead of stderr
        #[arg(long)]
        log_file: bool,
    },

    /// Request a machine bootup (completion arrives on the stream)
    Start {
        /// Machine uuid
        uuid: String,
    },

    /// Request a machine shutdown (completion arrives on the stream)
    Stop {
        /// Machine uuid
        uuid: String,
    },

    /// Request a machine deletion (completion arrives on the stream)
    Delete {
        /// Machine uuid
        uuid: String,
    },
}
