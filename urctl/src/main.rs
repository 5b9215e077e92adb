mod cli;
mod log;

use clap::Parser;
use cli::{Cli, Command};
use miette::Result;
use tokio::sync::broadcast;
use tracing::warn;
use ur_session::{RobotSession, SessionConfig, SessionEvent};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.quiet {
        log::Level::Silent
    } else if cli.verbose {
        log::Level::Debug
    } else {
        log::Level::Info
    };
    log::init_tracing(level);

    let config = load_config(&cli)?;
    let session = RobotSession::new(config);
    let printer = tokio::spawn(print_events(session.subscribe(), cli.json));

    let result = tokio::select! {
        result = run(&session, cli.command.clone()) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, disconnecting");
            Ok(())
        }
    };

    // Disconnecting ends any mode wait still holding the session, which
    // closes the event channel and lets the printer drain and exit.
    session.disconnect().await;
    drop(session);
    let _ = printer.await;

    result
}

async fn run(session: &RobotSession, command: Command) -> Result<()> {
    session.connect().await?;

    match command {
        Command::Status => {
            println!("connection: {:?}", session.connection_state());
            println!("mode: {}", session.robot_mode().await?);
            println!("program running: {}", session.is_program_running().await?);
        }
        Command::Mode => println!("{}", session.robot_mode().await?),
        Command::PowerOn { no_wait } => {
            let wait = session.power_on().await?;
            if !no_wait {
                wait.wait().await?;
            }
        }
        Command::BrakeRelease { no_wait } => {
            let wait = session.brake_release().await?;
            if !no_wait {
                wait.wait().await?;
            }
        }
        Command::Run { file } => session.send_program_from_file(&file).await?,
        Command::Send { program } => session.send_program(&program).await?,
        Command::Stop => println!("{}", session.stop().await?),
        Command::EmergencyStop => session.emergency_stop().await?,
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<SessionConfig> {
    let mut config = match &cli.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };

    if let Some(host) = &cli.host {
        config.endpoint.host = host.clone();
    }
    if let Some(port) = cli.dashboard_port {
        config.endpoint.dashboard_port = port;
    }
    if let Some(port) = cli.script_port {
        config.endpoint.script_port = port;
    }
    if let Some(secs) = cli.max_wait {
        config.max_wait_secs = (secs > 0).then_some(secs);
    }

    Ok(config)
}

async fn print_events(mut events: broadcast::Receiver<SessionEvent>, json: bool) {
    loop {
        match events.recv().await {
            Ok(event) if json => match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!("Failed to serialize event: {}", e),
            },
            Ok(event) => eprintln!("{event}"),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!("Dropped {} session events", missed);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
