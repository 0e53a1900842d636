use std::path::PathBuf;

use clap::{Parser, Subcommand};
use continuum_core::log::EXPORT_LIMIT;

mod commands;
mod util;

use commands::usage::VerifyTarget;

#[derive(Parser)]
#[command(
    name = "continuum",
    version,
    about = "Continuum operator CLI: talk to the API, seal and verify signed usage summaries"
)]
struct Cli {
    /// API base URL
    #[arg(long, env = "CONTINUUM_API_URL", default_value = "http://localhost:7860")]
    api_url: String,

    /// Data directory holding the usage log, summaries and checkpoints
    #[arg(long, env = "CONTINUUM_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check API health
    Health,
    /// Run one utterance through the decision pipeline (`-` reads stdin)
    Analyze {
        text: String,
    },
    /// Rate a previous decision
    Feedback {
        /// `log_id` returned by analyze
        log_id: String,
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=5))]
        accuracy: u8,
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=5))]
        helpful: u8,
        #[arg(long)]
        accepted: bool,
    },
    /// Print the operational metrics snapshot
    Ops,
    /// Seal a closed month: aggregate, sign and persist (offline)
    Summary {
        /// Billing period, YYYY-MM (UTC)
        month: String,
    },
    /// Verify a sealed summary pair: VALID exits 0, INVALID exits 1 (offline)
    Verify {
        /// Billing period, YYYY-MM (UTC)
        #[arg(required_unless_present = "summary")]
        month: Option<String>,
        /// Summary file to verify instead of the stored pair
        #[arg(long, requires = "signature", conflicts_with = "month")]
        summary: Option<PathBuf>,
        /// Signature file matching --summary
        #[arg(long, requires = "summary")]
        signature: Option<PathBuf>,
    },
    /// Check the tamper-evident heartbeat (offline)
    Heartbeat,
    /// Export the newest usage events, content-free (offline)
    Export {
        #[arg(long, default_value_t = EXPORT_LIMIT)]
        limit: usize,
        /// Write to this file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Health => commands::health::run(&cli.api_url).await,
        Commands::Analyze { text } => commands::analyze::run(&cli.api_url, &text).await,
        Commands::Feedback {
            log_id,
            accuracy,
            helpful,
            accepted,
        } => commands::analyze::feedback(&cli.api_url, &log_id, accuracy, helpful, accepted).await,
        Commands::Ops => commands::ops::metrics(&cli.api_url).await,
        Commands::Summary { month } => commands::usage::summary(&cli.data_dir, &month),
        Commands::Verify {
            month,
            summary,
            signature,
        } => {
            let target = match (summary, signature, month) {
                (Some(summary), Some(signature), _) => VerifyTarget::Files { summary, signature },
                (_, _, Some(month)) => VerifyTarget::Month(month),
                _ => {
                    std::process::exit(util::print_error(
                        "cli_error",
                        "verify needs <MONTH> or --summary with --signature",
                        None,
                        4,
                    ))
                }
            };
            commands::usage::verify(&cli.data_dir, target)
        }
        Commands::Heartbeat => commands::usage::heartbeat(&cli.data_dir),
        Commands::Export { limit, out } => {
            commands::usage::export(&cli.data_dir, limit, out.as_deref())
        }
    };

    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn verify_accepts_month_or_file_pair() {
        let cli = Cli::try_parse_from(["continuum", "verify", "2025-01"]).unwrap();
        assert!(matches!(cli.command, Commands::Verify { month: Some(_), .. }));

        let cli = Cli::try_parse_from([
            "continuum",
            "verify",
            "--summary",
            "s.json",
            "--signature",
            "s.sig",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Verify { summary: Some(_), .. }));

        assert!(Cli::try_parse_from(["continuum", "verify", "--summary", "s.json"]).is_err());
    }

    #[test]
    fn feedback_ratings_are_bounded() {
        assert!(
            Cli::try_parse_from([
                "continuum", "feedback", "id", "--accuracy", "6", "--helpful", "3"
            ])
            .is_err()
        );
    }
}
