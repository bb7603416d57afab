use anyhow::{bail, Context};
use clap::Parser;
use fleetwatch::auth::StaticCredentials;
use fleetwatch::cli::{Cli, Commands, WatchMode};
use fleetwatch::commands::MachineCommandClient;
use fleetwatch::config::FleetConfig;
use fleetwatch::logging::{init_logging, log_file_path, LoggingConfig};
use fleetwatch::machine::{MachineRegistry, MachineState};
use fleetwatch::sync::{MachineSubscription, SubscriptionTarget};
use std::collections::HashMap;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut log_config = LoggingConfig::from_args(cli.quiet, cli.verbose, cli.json);
    if let Commands::Watch { log_file: true, .. } = cli.command {
        log_config.file_output = Some(log_file_path());
    }
    if let Err(e) = init_logging(log_config) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(cli).await {
        tracing::error!(error = %e, "Command failed");
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = FleetConfig::from_env().context("Invalid endpoint configuration")?;
    let token = cli
        .token
        .context("No access token: pass --token or set FLEETWATCH_TOKEN")?;
    let credentials = Arc::new(StaticCredentials::new(token));

    match cli.command {
        Commands::Watch { mode, machine, .. } => {
            let target = match (mode, machine) {
                (WatchMode::Mine, _) => SubscriptionTarget::Mine,
                (WatchMode::All, _) => SubscriptionTarget::All,
                (WatchMode::Single, Some(uuid)) => SubscriptionTarget::Machine(uuid),
                (WatchMode::Single, None) => {
                    bail!("--mode single requires --machine <uuid>")
                },
            };
            watch(&config, target, credentials).await
        },
        Commands::Start { uuid } => {
            MachineCommandClient::new(&config, credentials)
                .start_machine(&uuid)
                .await?;
            println!("Start requested for {}", uuid);
            Ok(())
        },
        Commands::Stop { uuid } => {
            MachineCommandClient::new(&config, credentials)
                .stop_machine(&uuid)
                .await?;
            println!("Stop requested for {}", uuid);
            Ok(())
        },
        Commands::Delete { uuid } => {
            MachineCommandClient::new(&config, credentials)
                .delete_machine(&uuid)
                .await?;
            println!("Deletion requested for {}", uuid);
            Ok(())
        },
    }
}

/// Subscribe and print one line per observed lifecycle transition until the
/// connection terminates or Ctrl-C.
async fn watch(
    config: &FleetConfig,
    target: SubscriptionTarget,
    credentials: Arc<StaticCredentials>,
) -> anyhow::Result<()> {
    let subscription = MachineSubscription::spawn(config, target, credentials);
    let mut snapshots = subscription.subscribe();
    let mut known_states: HashMap<String, MachineState> = HashMap::new();

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                print_transitions(&snapshot, &mut known_states);
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, closing subscription");
                subscription.shutdown();
                return Ok(());
            },
        }
    }

    // The fold task ended: either the server closed the stream or a
    // transport error surfaced.
    if let Some(error) = subscription.last_error() {
        bail!("Subscription terminated: {}", error);
    }
    Ok(())
}

fn print_transitions(snapshot: &MachineRegistry, known_states: &mut HashMap<String, MachineState>) {
    for (uuid, machine) in snapshot.machines() {
        let previous = known_states.insert(uuid.clone(), machine.state);
        if previous != Some(machine.state) {
            let title = machine.title.as_deref().unwrap_or("(untitled)");
            println!("{:<38} {:<24} {}", uuid, title, machine.state);
        }
    }
    known_states.retain(|uuid, _| snapshot.get(uuid).is_some());
}
