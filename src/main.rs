mod charm;
mod cli;
mod config;
mod paths;
mod reconciler;
mod relations;
mod report;
mod resource;
mod state;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use hostkit::{LocalFs, SystemRunner};
use std::io;

use charm::{Charm, DriftReport, EventOutcome, WorkloadStatus, ensure_success};
use cli::{Cli, Command};
use config::CharmConfig;
use report::StepPrinter;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
    };

    if let Command::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "license-agent-charm", &mut io::stdout());
        return Ok(());
    }

    let config_path = paths::config_file(cli.config.as_deref());
    let config = CharmConfig::load(&config_path)?;
    let runner = SystemRunner;
    let charm = Charm::new(&config, &runner, &LocalFs).verbose(ctx.verbose > 0);

    if mutates_host(&cli.command)
        && let Some(warning) = charm::privilege_warning()
    {
        ui::warn(&warning);
    }

    let mut progress = StepPrinter::new(ctx.quiet);
    match cli.command {
        Command::Install => finish(&ctx, "install", &charm.install(&mut progress)?),
        Command::Start => finish(&ctx, "start", &charm.start()?),
        Command::Stop => finish(&ctx, "stop", &charm.stop()),
        Command::Restart => finish(&ctx, "restart", &charm.restart()),
        Command::ConfigChanged => finish(
            &ctx,
            "config-changed",
            &charm.config_changed(&mut progress)?,
        ),
        Command::Upgrade { version } => finish(
            &ctx,
            "upgrade",
            &charm.upgrade(&version, &mut progress)?,
        ),
        Command::Remove => finish(&ctx, "remove", &charm.remove(&mut progress)?),
        Command::Status { diff } => {
            show_status(&config_path.display().to_string(), &charm.drift(diff)?);
            Ok(())
        }
        Command::RelationData { relation } => {
            println!("{}", charm.relation_data(relation.into())?);
            Ok(())
        }
        Command::Completions { .. } => Ok(()),
    }
}

fn mutates_host(command: &Command) -> bool {
    !matches!(
        command,
        Command::Status { .. } | Command::RelationData { .. } | Command::Completions { .. }
    )
}

fn finish(ctx: &Context, event: &str, outcome: &EventOutcome) -> Result<()> {
    match &outcome.result {
        Some(result) if !ctx.quiet => report::print_result(event, result),
        Some(_) => {}
        None => ui::dim(&format!("{event}: skipped")),
    }
    if let Some(status) = &outcome.status {
        match status {
            WorkloadStatus::Blocked(_) => ui::error(&status.to_string()),
            _ if ctx.quiet => {}
            WorkloadStatus::Active(_) => ui::success(&status.to_string()),
            WorkloadStatus::Maintenance(_) => ui::info(&status.to_string()),
        }
    }
    ensure_success(event, outcome)
}

fn show_status(config_path: &str, report: &DriftReport) {
    ui::header("license-agent-charm");
    ui::kv("config", config_path);
    ui::kv("installed", &report.state.installed.to_string());
    ui::kv("started", &report.state.init_started.to_string());
    ui::kv(
        "agent version",
        report.state.agent_version.as_deref().unwrap_or("latest"),
    );

    report::display_diff(&report.diffs);
    for (path, line) in &report.last_records {
        ui::kv("last log record", &format!("{line} ({path})"));
    }

    for (path, current, desired) in &report.files {
        report::print_content_diff(path, current.as_deref(), desired);
    }
}
