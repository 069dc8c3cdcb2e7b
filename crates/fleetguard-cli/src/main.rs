mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::audit::QueryArgs;

/// FleetGuard -- ACL template validation and audit tooling for fleet networks.
#[derive(Parser, Debug)]
#[command(name = "fleetguard", version, about)]
struct Cli {
    /// Path to fleetguard.toml (defaults to ./fleetguard.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// ACL template subcommands
    Template {
        #[command(subcommand)]
        action: TemplateCommands,
    },

    /// Audit log subcommands
    Audit {
        #[command(subcommand)]
        action: AuditCommands,
    },
}

#[derive(Subcommand, Debug)]
enum TemplateCommands {
    /// Validate a template; exits 1 if any finding is critical
    Validate {
        /// Template file (.json or .toml)
        #[arg(long)]
        path: PathBuf,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show how live rules differ from a template
    Diff {
        #[arg(long)]
        template: PathBuf,

        #[arg(long)]
        live: PathBuf,
    },

    /// Generate a template from a live rule set
    Generate {
        #[arg(long)]
        live: PathBuf,

        /// Emit TOML instead of JSON
        #[arg(long)]
        toml: bool,
    },
}

#[derive(Subcommand, Debug)]
enum AuditCommands {
    /// Recompute every record checksum; exits 1 on corruption
    Verify,

    /// Query audit events
    Query {
        /// Event type (e.g. tunnel-created, apply-blocked)
        #[arg(long = "type")]
        event_type: Option<String>,

        #[arg(long)]
        actor: Option<String>,

        #[arg(long)]
        resource: Option<String>,

        /// Start time (RFC 3339)
        #[arg(long)]
        from: Option<String>,

        /// End time (RFC 3339)
        #[arg(long)]
        to: Option<String>,

        /// Only events at or above this severity
        #[arg(long)]
        min_severity: Option<String>,

        /// success, failure, or denied
        #[arg(long)]
        outcome: Option<String>,

        #[arg(long)]
        limit: Option<usize>,

        #[arg(long)]
        json: bool,
    },

    /// Copy the audit log into the backup directory
    Backup,
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing with env filter (e.g., RUST_LOG=debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Template { action } => match action {
            TemplateCommands::Validate { path, json } => {
                commands::template::validate(&path, &config, json)
            }
            TemplateCommands::Diff { template, live } => commands::template::diff(&template, &live),
            TemplateCommands::Generate { live, toml } => commands::template::generate(&live, toml),
        },
        Commands::Audit { action } => match action {
            AuditCommands::Verify => commands::audit::verify(&config),
            AuditCommands::Query {
                event_type,
                actor,
                resource,
                from,
                to,
                min_severity,
                outcome,
                limit,
                json,
            } => commands::audit::query(
                &config,
                QueryArgs {
                    event_type,
                    actor,
                    resource,
                    from,
                    to,
                    min_severity,
                    outcome,
                    limit,
                    json,
                },
            ),
            AuditCommands::Backup => commands::audit::backup(&config),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_template_validate() {
        let cli = Cli::try_parse_from([
            "fleetguard",
            "template",
            "validate",
            "--path",
            "/tmp/web.json",
        ]);
        assert!(cli.is_ok(), "should parse template validate: {cli:?}");
        let cli = cli.unwrap();
        assert!(cli.config.is_none());
        match cli.command {
            Commands::Template {
                action: TemplateCommands::Validate { path, json },
            } => {
                assert_eq!(path, PathBuf::from("/tmp/web.json"));
                assert!(!json);
            }
            _ => panic!("expected Template Validate command"),
        }
    }

    #[test]
    fn parse_template_diff_requires_both_files() {
        let cli = Cli::try_parse_from(["fleetguard", "template", "diff", "--template", "t.json"]);
        assert!(cli.is_err(), "diff without --live should fail");

        let cli = Cli::try_parse_from([
            "fleetguard",
            "template",
            "diff",
            "--template",
            "t.json",
            "--live",
            "l.json",
        ])
        .unwrap();
        match cli.command {
            Commands::Template {
                action: TemplateCommands::Diff { template, live },
            } => {
                assert_eq!(template, PathBuf::from("t.json"));
                assert_eq!(live, PathBuf::from("l.json"));
            }
            _ => panic!("expected Template Diff command"),
        }
    }

    #[test]
    fn parse_audit_query_with_global_config() {
        let cli = Cli::try_parse_from([
            "fleetguard",
            "audit",
            "query",
            "--type",
            "apply-blocked",
            "--min-severity",
            "high",
            "--limit",
            "20",
            "--config",
            "/etc/fleetguard.toml",
        ]);
        assert!(cli.is_ok(), "should parse audit query: {cli:?}");
        let cli = cli.unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/fleetguard.toml")));
        match cli.command {
            Commands::Audit {
                action:
                    AuditCommands::Query {
                        event_type,
                        min_severity,
                        limit,
                        ..
                    },
            } => {
                assert_eq!(event_type.as_deref(), Some("apply-blocked"));
                assert_eq!(min_severity.as_deref(), Some("high"));
                assert_eq!(limit, Some(20));
            }
            _ => panic!("expected Audit Query command"),
        }
    }

    #[test]
    fn parse_audit_verify_and_backup() {
        assert!(matches!(
            Cli::try_parse_from(["fleetguard", "audit", "verify"]).unwrap().command,
            Commands::Audit {
                action: AuditCommands::Verify
            }
        ));
        assert!(matches!(
            Cli::try_parse_from(["fleetguard", "audit", "backup"]).unwrap().command,
            Commands::Audit {
                action: AuditCommands::Backup
            }
        ));
    }

    #[test]
    fn load_config_reads_explicit_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("fleetguard.toml");
        std::fs::write(&path, "[pool]\nmax_tunnels = 3\n").unwrap();
        let config = commands::load_config(Some(path.as_path())).unwrap();
        assert_eq!(config.pool.max_tunnels, 3);
    }
}
