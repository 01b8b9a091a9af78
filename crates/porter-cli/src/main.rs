use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use porter_cli::commands::{self, ApplyFiles, InspectView, EXIT_INVALID};
use porter_cli::settings::{LoggingSettings, Settings};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("porter")
        .version(porter_cli::VERSION)
        .about("Dependency-aware migration planning and resumable apply")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Settings file (defaults to ./porter.toml when present)"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .global(true)
                .help("Log filter used when RUST_LOG is unset"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("plan")
                .about("Generate a plan from a catalog document")
                .arg(Arg::new("catalog").required(true).value_parser(value_parser!(PathBuf)))
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .value_parser(value_parser!(PathBuf))
                        .help("Write the plan here instead of stdout"),
                ),
        )
        .subcommand(
            Command::new("inspect")
                .about("Print a plan for review")
                .arg(Arg::new("plan").required(true).value_parser(value_parser!(PathBuf)))
                .arg(
                    Arg::new("linear")
                        .long("linear")
                        .action(ArgAction::SetTrue)
                        .conflicts_with("phases")
                        .help("One line per action in execution order (default)"),
                )
                .arg(
                    Arg::new("phases")
                        .long("phases")
                        .action(ArgAction::SetTrue)
                        .help("Group actions by phase"),
                ),
        )
        .subcommand(
            Command::new("apply")
                .about("Apply a plan against the simulated target")
                .arg(Arg::new("plan").required(true).value_parser(value_parser!(PathBuf)))
                .arg(
                    Arg::new("checkpoint")
                        .long("checkpoint")
                        .value_parser(value_parser!(PathBuf))
                        .help("Checkpoint file (overrides [apply].checkpoint)"),
                )
                .arg(
                    Arg::new("inputs")
                        .long("inputs")
                        .value_parser(value_parser!(PathBuf))
                        .help("JSON document with operator answers"),
                )
                .arg(
                    Arg::new("report")
                        .long("report")
                        .value_parser(value_parser!(PathBuf))
                        .help("Write the report here instead of stdout"),
                )
                .arg(
                    Arg::new("max-parallel")
                        .long("max-parallel")
                        .value_parser(value_parser!(usize))
                        .help("Concurrent actions"),
                )
                .arg(
                    Arg::new("rate-reserve")
                        .long("rate-reserve")
                        .value_parser(value_parser!(u32))
                        .help("Pause dispatch at this remaining rate budget"),
                )
                .arg(
                    Arg::new("max-attempts")
                        .long("max-attempts")
                        .value_parser(value_parser!(u32))
                        .help("Attempt cap per action"),
                ),
        )
        .subcommand(
            Command::new("report")
                .about("Summarize a saved apply report")
                .arg(Arg::new("report").required(true).value_parser(value_parser!(PathBuf)))
                .arg(
                    Arg::new("all")
                        .long("all")
                        .action(ArgAction::SetTrue)
                        .help("List every action, not only failures"),
                ),
        )
}

fn init_tracing(logging: &LoggingSettings) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn apply_overrides(settings: &mut Settings, args: &ArgMatches) {
    if let Some(n) = args.get_one::<usize>("max-parallel") {
        settings.apply.max_parallel = *n;
    }
    if let Some(n) = args.get_one::<u32>("rate-reserve") {
        settings.apply.rate_reserve = *n;
    }
    if let Some(n) = args.get_one::<u32>("max-attempts") {
        settings.retry.max_attempts = *n;
    }
}

fn path(args: &ArgMatches, id: &str) -> Option<PathBuf> {
    args.get_one::<PathBuf>(id).cloned()
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();

    let mut settings = match Settings::load(matches.get_one::<PathBuf>("config").map(PathBuf::as_path)) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(EXIT_INVALID);
        }
    };
    if let Some(level) = matches.get_one::<String>("log-level") {
        settings.logging.level.clone_from(level);
    }
    if matches.get_flag("log-json") {
        settings.logging.json = true;
    }
    init_tracing(&settings.logging);

    let mut out = std::io::stdout().lock();
    let result = match matches.subcommand() {
        Some(("plan", args)) => {
            let catalog = path(args, "catalog").unwrap_or_default();
            commands::plan(&catalog, path(args, "output").as_deref(), &mut out)
        }
        Some(("inspect", args)) => {
            let plan = path(args, "plan").unwrap_or_default();
            let view = if args.get_flag("phases") {
                InspectView::Phases
            } else {
                InspectView::Linear
            };
            commands::inspect(&plan, view, &mut out)
        }
        Some(("apply", args)) => {
            apply_overrides(&mut settings, args);
            let plan = path(args, "plan").unwrap_or_default();
            let files = ApplyFiles {
                checkpoint: path(args, "checkpoint"),
                inputs: path(args, "inputs"),
                report: path(args, "report"),
            };
            commands::apply(&plan, &settings, &files, &mut out).await
        }
        Some(("report", args)) => {
            let report = path(args, "report").unwrap_or_default();
            commands::report(&report, args.get_flag("all"), &mut out)
        }
        _ => {
            let _ = cli().print_help();
            Ok(EXIT_INVALID)
        }
    };
    drop(out);

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(EXIT_INVALID);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        cli().debug_assert();
    }

    #[test]
    fn test_apply_flags_override_settings() {
        let matches = cli()
            .try_get_matches_from(["porter", "apply", "plan.json", "--max-parallel", "9", "--max-attempts", "2"])
            .unwrap();
        let (_, args) = matches.subcommand().unwrap();
        let mut settings = Settings::default();
        apply_overrides(&mut settings, args);
        assert_eq!(settings.apply.max_parallel, 9);
        assert_eq!(settings.retry.max_attempts, 2);
        assert_eq!(settings.apply.rate_reserve, 0);
    }

    #[test]
    fn test_inspect_views_conflict() {
        assert!(cli()
            .try_get_matches_from(["porter", "inspect", "plan.json", "--linear", "--phases"])
            .is_err());
    }
}
