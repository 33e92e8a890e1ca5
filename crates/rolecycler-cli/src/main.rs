use clap::{Parser, Subcommand};
use rolecycler_core::DomainId;
use rolecycler_scheduler::{ScheduleKind, TimeOfDay};

mod app;
mod commands;
mod serve;

#[derive(Parser)]
#[command(name = "rolecycler")]
#[command(version)]
#[command(about = "Rotates a temporary status fairly through a pool of members", long_about = None)]
struct Cli {
    /// Config file (defaults to $ROLECYCLER_CONFIG, then ~/.rolecycler/rolecycler.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Rotation domain id; may be omitted when exactly one domain is configured
    #[arg(short, long, global = true)]
    domain: Option<DomainId>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler loop for every configured domain until Ctrl-C
    Serve,
    /// Rotate now
    Run {
        /// Fail instead of waiting if a run is already in progress
        #[arg(long)]
        no_wait: bool,
    },
    /// Show holders, upcoming groups and the next run
    Status,
    /// Held time per member, longest first
    Stats {
        #[arg(long)]
        csv: bool,
    },
    /// Inspect or change the schedule
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },
    /// Recent committed runs, newest first
    History {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Change how many members are picked per run
    Picks {
        #[command(subcommand)]
        action: PicksAction,
    },
}

#[derive(Subcommand)]
enum ScheduleAction {
    Show,
    /// Update the schedule; omitted fields keep their current value
    Set {
        #[arg(long)]
        kind: Option<ScheduleKind>,
        /// HH:MM
        #[arg(long)]
        time: Option<TimeOfDay>,
        /// 0 = Monday … 6 = Sunday
        #[arg(long)]
        weekday: Option<u8>,
        #[arg(long)]
        day_of_month: Option<u8>,
        #[arg(long)]
        n_days: Option<u32>,
        /// IANA timezone, e.g. Europe/Zagreb
        #[arg(long)]
        timezone: Option<String>,
    },
    Stop,
    Resume,
}

#[derive(Subcommand)]
enum PicksAction {
    Set { count: u32 },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rolecycler=info".into()),
        )
        .init();

    let cli = Cli::parse();

    // config: --config > ROLECYCLER_CONFIG env > ~/.rolecycler/rolecycler.toml
    let config_path = cli
        .config
        .clone()
        .or_else(|| std::env::var("ROLECYCLER_CONFIG").ok());
    let app = app::App::open(config_path.as_deref()).await?;

    match cli.command {
        Commands::Serve => serve::run(app).await,
        Commands::Run { no_wait } => {
            let domain = app.resolve_domain(cli.domain)?;
            commands::run(&app, domain, no_wait, cli.json).await
        }
        Commands::Status => {
            let domain = app.resolve_domain(cli.domain)?;
            commands::status(&app, domain, cli.json).await
        }
        Commands::Stats { csv } => {
            let domain = app.resolve_domain(cli.domain)?;
            commands::stats(&app, domain, csv, cli.json).await
        }
        Commands::History { limit } => {
            let domain = app.resolve_domain(cli.domain)?;
            commands::history(&app, domain, limit, cli.json)
        }
        Commands::Schedule { action } => {
            let domain = app.resolve_domain(cli.domain)?;
            match action {
                ScheduleAction::Show => commands::schedule_show(&app, domain, cli.json).await,
                ScheduleAction::Set {
                    kind,
                    time,
                    weekday,
                    day_of_month,
                    n_days,
                    timezone,
                } => {
                    let edit = commands::ScheduleEdit {
                        kind,
                        time,
                        weekday,
                        day_of_month,
                        n_days,
                        timezone,
                    };
                    commands::schedule_set(&app, domain, edit).await
                }
                ScheduleAction::Stop => commands::schedule_toggle(&app, domain, false).await,
                ScheduleAction::Resume => commands::schedule_toggle(&app, domain, true).await,
            }
        }
        Commands::Picks {
            action: PicksAction::Set { count },
        } => {
            let domain = app.resolve_domain(cli.domain)?;
            commands::picks_set(&app, domain, count).await
        }
    }
}
