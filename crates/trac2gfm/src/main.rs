use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use trac2gfm_core::cache::clear_cache;
use trac2gfm_core::config::{DEFAULT_CONFIG_FILENAME, MigrationConfig, load_config, render_config};
use trac2gfm_core::github::GithubClient;
use trac2gfm_core::markup::{Dialect, WikiConverter, convert_markup};
use trac2gfm_core::migrate::{MigrationOptions, MigrationReport, PhaseReport, run_migration};
use trac2gfm_core::trac::{Paging, TracDatabase};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "trac2gfm",
    version,
    about = "Convert Trac wiki markup to GitHub-Flavored Markdown and migrate Trac tickets to GitHub issues"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH", default_value = DEFAULT_CONFIG_FILENAME)]
    config: PathBuf,
    #[arg(long, global = true, help = "Enable debug logging")]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Convert a Trac wiki document to Markdown")]
    Convert(ConvertArgs),
    #[command(about = "Migrate milestones, labels, tickets and comments to GitHub")]
    Migrate(MigrateArgs),
    #[command(name = "clear-cache", about = "Delete the JSON mapping caches")]
    ClearCache,
    #[command(about = "Print the resolved configuration")]
    Config,
}

#[derive(Debug, Args)]
struct ConvertArgs {
    #[arg(value_name = "PATH", help = "Input file; stdin when omitted or `-`")]
    path: Option<PathBuf>,
    #[arg(long, value_name = "DIALECT", help = "trac or moinmoin")]
    dialect: Option<Dialect>,
    #[arg(long, value_name = "URI", help = "Base URI for CamelCase wiki links")]
    base_uri: Option<String>,
}

#[derive(Debug, Args)]
struct MigrateArgs {
    #[arg(long)]
    skip_milestones: bool,
    #[arg(long)]
    skip_labels: bool,
    #[arg(long)]
    skip_tickets: bool,
    #[arg(long)]
    skip_comments: bool,
    #[arg(long, value_name = "N", default_value_t = 0)]
    ticket_offset: usize,
    #[arg(long, value_name = "N")]
    ticket_limit: Option<usize>,
    #[arg(long, value_name = "N", default_value_t = 0)]
    comment_offset: usize,
    #[arg(long, value_name = "N")]
    comment_limit: Option<usize>,
    #[arg(long, help = "Print the report as JSON")]
    json: bool,
}

impl MigrateArgs {
    fn options(&self) -> MigrationOptions {
        MigrationOptions {
            skip_milestones: self.skip_milestones,
            skip_labels: self.skip_labels,
            skip_tickets: self.skip_tickets,
            skip_comments: self.skip_comments,
            tickets: Paging {
                offset: self.ticket_offset,
                limit: self.ticket_limit,
            },
            comments: Paging {
                offset: self.comment_offset,
                limit: self.comment_limit,
            },
        }
    }
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Some(Commands::Convert(args)) => run_convert(&cli.config, args),
        Some(Commands::Migrate(args)) => run_migrate(&cli.config, args),
        Some(Commands::ClearCache) => run_clear_cache(&cli.config),
        Some(Commands::Config) => run_config(&cli.config),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .compact()
        .init();
}

fn run_convert(config_path: &Path, args: ConvertArgs) -> Result<()> {
    let config = load_config(config_path)?;
    let input = read_input(args.path.as_deref())?;
    let dialect = args.dialect.unwrap_or(config.markup.dialect);
    let converter = match args.base_uri {
        Some(base_uri) => WikiConverter::new(base_uri),
        None => config.converter(),
    };
    print!("{}", convert_markup(dialect, &converter, &input));
    Ok(())
}

fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) if path != Path::new("-") => fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", normalize_path(path))),
        _ => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("failed to read stdin")?;
            Ok(buffer)
        }
    }
}

fn run_migrate(config_path: &Path, args: MigrateArgs) -> Result<()> {
    let config = load_config(config_path)?;
    config.validate_for_migration()?;
    let database_path = config
        .trac_database()
        .context("trac.database is not configured")?;
    let database = TracDatabase::open(&database_path)?;
    info!(
        database = %normalize_path(&database_path),
        api_url = %config.github_api_url(),
        "starting migration"
    );
    let mut client = GithubClient::from_config(&config)?;

    let report = run_migration(&config, &database, &mut client, &args.options())?;
    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("failed to serialize report")?
        );
    } else {
        print_report(&config, &report);
    }
    Ok(())
}

fn print_report(config: &MigrationConfig, report: &MigrationReport) {
    println!("migration report");
    println!(
        "repository: {}/{}",
        config.github.project.as_deref().unwrap_or("<unset>"),
        config.github.repo.as_deref().unwrap_or("<unset>")
    );
    print_phase("milestones", &report.milestones);
    print_phase("labels", &report.labels);
    print_phase("tickets", &report.tickets);
    println!("tickets.closed: {}", report.closed_tickets);
    print_phase("comments", &report.comments);
    println!("requests: {}", report.request_count);
    println!("errors: {}", report.errors.len());
    for error in &report.errors {
        println!("  - {error}");
    }
}

fn print_phase(name: &str, phase: &PhaseReport) {
    println!("{name}.created: {}", phase.created);
    println!("{name}.skipped: {}", phase.skipped);
    println!("{name}.failed: {}", phase.failed);
    println!("{name}.from_cache: {}", format_flag(phase.from_cache));
}

fn run_clear_cache(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let report = clear_cache(&config.cache)?;
    println!("cache cleared");
    for path in &report.removed {
        println!("removed: {}", normalize_path(path));
    }
    for path in &report.missing {
        println!("missing: {}", normalize_path(path));
    }
    Ok(())
}

fn run_config(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    println!("config_path: {}", normalize_path(config_path));
    println!("config_exists: {}", format_flag(config_path.exists()));
    println!("github_api_url: {}", config.github_api_url());
    println!("wiki_base_uri: {}", config.wiki_base_uri());
    println!(
        "trac_database: {}",
        config
            .trac_database()
            .map(|path| normalize_path(&path))
            .unwrap_or_else(|| "<unset>".to_string())
    );
    println!(
        "migration_ready: {}",
        format_flag(config.validate_for_migration().is_ok())
    );
    println!();
    print!("{}", render_config(&config.redacted())?);
    Ok(())
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use clap::{CommandFactory, Parser};
    use trac2gfm_core::markup::Dialect;

    use super::{Cli, Commands};

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn convert_accepts_dialect_and_base_uri() {
        let cli = Cli::try_parse_from([
            "trac2gfm",
            "convert",
            "page.txt",
            "--dialect",
            "moin",
            "--base-uri",
            "https://example.org",
        ])
        .expect("parse");
        let Some(Commands::Convert(args)) = cli.command else {
            panic!("expected convert command");
        };
        assert_eq!(args.path, Some(PathBuf::from("page.txt")));
        assert_eq!(args.dialect, Some(Dialect::MoinMoin));
        assert_eq!(args.base_uri.as_deref(), Some("https://example.org"));
    }

    #[test]
    fn migrate_flags_map_to_options() {
        let cli = Cli::try_parse_from([
            "trac2gfm",
            "--config",
            "custom.toml",
            "migrate",
            "--skip-labels",
            "--ticket-offset",
            "10",
            "--ticket-limit",
            "5",
        ])
        .expect("parse");
        assert_eq!(cli.config, PathBuf::from("custom.toml"));
        let Some(Commands::Migrate(args)) = cli.command else {
            panic!("expected migrate command");
        };
        let options = args.options();
        assert!(options.skip_labels);
        assert!(!options.skip_tickets);
        assert_eq!(options.tickets.offset, 10);
        assert_eq!(options.tickets.limit, Some(5));
        assert_eq!(options.comments.limit, None);
    }

    #[test]
    fn config_defaults_to_local_file() {
        let cli = Cli::try_parse_from(["trac2gfm", "clear-cache"]).expect("parse");
        assert_eq!(cli.config, PathBuf::from("trac2gfm.toml"));
        assert!(matches!(cli.command, Some(Commands::ClearCache)));
    }
}
