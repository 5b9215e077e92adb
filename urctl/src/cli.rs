use clap::{Parser, Subcommand, crate_version};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    color = clap::ColorChoice::Auto,
    about = format!("urctl {}: control a Universal Robots arm over its dashboard and script servers", crate_version!())
)]
pub struct Cli {
    #[arg(short, long, help = "Enable debug log level.")]
    pub verbose: bool,

    #[arg(short, long, help = "Disable all log output.")]
    pub quiet: bool,

    #[arg(
        short,
        long,
        env = "URCTL_CONFIG",
        help = "YAML file with endpoint and timing settings."
    )]
    pub config: Option<PathBuf>,

    #[arg(long, env = "UR_HOST", help = "Controller address.")]
    pub host: Option<String>,

    #[arg(long, env = "UR_DASHBOARD_PORT", help = "Dashboard server port.")]
    pub dashboard_port: Option<u16>,

    #[arg(long, env = "UR_SCRIPT_PORT", help = "Script server port.")]
    pub script_port: Option<u16>,

    #[arg(
        long,
        help = "Give up waiting for a robot mode after this many seconds (0 waits forever)."
    )]
    pub max_wait: Option<u64>,

    #[arg(long, help = "Print session events as JSON lines.")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Clone)]
pub enum Command {
    #[command(about = "Show connection state, robot mode and whether a program is running.")]
    Status,

    #[command(about = "Print the robot mode reported by the controller.")]
    Mode,

    #[command(about = "Power the arm on and wait until it is IDLE.")]
    PowerOn {
        #[arg(long, help = "Return as soon as the command is accepted.")]
        no_wait: bool,
    },

    #[command(about = "Release the brakes and wait until the arm is RUNNING.")]
    BrakeRelease {
        #[arg(long, help = "Return as soon as the command is accepted.")]
        no_wait: bool,
    },

    #[command(about = "Send a URScript file to the script server.")]
    Run { file: PathBuf },

    #[command(about = "Send a single line of URScript to the script server.")]
    Send { program: String },

    #[command(about = "Stop the running program and print the controller's reply.")]
    Stop,

    #[command(name = "estop", about = "Stop the program and decelerate the arm immediately.")]
    EmergencyStop,
}
