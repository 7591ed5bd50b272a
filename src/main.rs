#[macro_use]
extern crate log;

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use env_logger::{Builder, Env, Target};

use bulkmail::storage::StatusStore;
use bulkmail::{
    load_recipients, Attachment, Config, Dispatcher, Error, EventLog, LogFacade, RunOutcome,
    SmtpRelay, StatusStats, SystemClock, Template,
};

#[derive(Parser)]
#[command(name = "bulkmail", about = "Resumable, quota-aware bulk email sender")]
struct Cli {
    /// TOML settings; environment variables override it
    #[arg(long, short)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Send to every recipient that has not been sent to yet (default)
    Run,
    /// Print how far the recipient list has got
    Stats,
}

fn init_logger() {
    Builder::from_env(Env::default().default_filter_or("info"))
        .target(Target::Stdout)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<Config, Error> {
    let mut config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    config.apply_env()?;
    config.validate()?;
    Ok(config)
}

fn run(config: &Config, log: Arc<dyn EventLog>) -> Result<RunOutcome, Error> {
    let recipients = load_recipients(&config.recipients_path, &*log)?;
    let mut template = Template::load(&config.subject_path, &config.body_path, &config.placeholder)?;
    if let Some(ref path) = config.attachment_path {
        template = template.with_attachment(Attachment::load(path)?);
    }

    let relay = SmtpRelay::from_config(config, log.clone());
    let mut dispatcher = Dispatcher::from_config(config, relay, log.clone(), Arc::new(SystemClock));
    let report = dispatcher.run(&recipients, &template);

    if report.failures.is_empty() {
        println!("No failed emails.");
    } else {
        println!("Failed emails:");
        print!("{}", report.failures);
    }

    let table = StatusStore::new(config.status_path.clone(), log).load()?;
    println!("{}", StatusStats::compute(&recipients, &table));

    Ok(report.outcome)
}

fn stats(config: &Config, log: Arc<dyn EventLog>) -> Result<(), Error> {
    let recipients = load_recipients(&config.recipients_path, &*log)?;
    let table = StatusStore::new(config.status_path.clone(), log).load()?;
    println!("{}", StatusStats::compute(&recipients, &table));
    Ok(())
}

fn main() {
    init_logger();
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("bulkmail: {}", e);
            process::exit(2);
        }
    };
    debug!("{:?}", config);

    let log: Arc<dyn EventLog> = Arc::new(LogFacade);
    let result = match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(&config, log).map(|outcome| {
            if outcome == RunOutcome::Cancelled {
                warn!("run was cancelled before the end of the list");
            }
        }),
        Command::Stats => stats(&config, log),
    };

    if let Err(e) = result {
        eprintln!("bulkmail: {}", e);
        process::exit(1);
    }
}
