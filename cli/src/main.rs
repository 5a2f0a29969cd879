use clap::{Parser, Subcommand};
use serde_json::json;

mod util;

use util::{api_request, exit_error};

#[derive(Parser)]
#[command(
    name = "caseflow",
    version,
    about = "Caseflow operations CLI — dispatch cases, inspect runs, drive sweeps"
)]
struct Cli {
    /// Service base URL
    #[arg(long, env = "CASEFLOW_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check service health
    Health,
    /// Case operations
    Case {
        #[command(subcommand)]
        command: CaseCommands,
    },
    /// Run operations
    Run {
        #[command(subcommand)]
        command: RunCommands,
    },
    /// Run a single sweep pass on demand
    Sweep {
        /// One of: follow_up, deadline, orphan, stuck_decision, stale_queued,
        /// stuck_locks, stale_runs
        kind: String,
    },
    /// Proposal operations
    Proposal {
        #[command(subcommand)]
        command: ProposalCommands,
    },
}

#[derive(Subcommand)]
enum CaseCommands {
    /// Dispatch a run for a case through the gateway
    Dispatch {
        case_id: i64,
        /// Trigger kind (inferred when omitted)
        #[arg(long)]
        trigger_kind: Option<String>,
        /// Inbound message id that triggered this dispatch
        #[arg(long)]
        message_id: Option<i64>,
        /// Source label recorded on the run
        #[arg(long, default_value = "cli")]
        source: String,
    },
    /// List proposals for a case
    Proposals { case_id: i64 },
    /// List recent runs for a case
    Runs { case_id: i64 },
}

#[derive(Subcommand)]
enum RunCommands {
    /// Show one run
    Show { run_id: String },
}

#[derive(Subcommand)]
enum ProposalCommands {
    /// Approve a pending proposal
    Approve {
        proposal_id: String,
        /// Decision payload as a JSON string
        #[arg(long)]
        decision: Option<String>,
    },
    /// Dismiss a pending proposal
    Dismiss { proposal_id: String },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Health => {
            api_request(&cli.api_url, reqwest::Method::GET, "/health", None).await
        }
        Commands::Case { command } => match command {
            CaseCommands::Dispatch {
                case_id,
                trigger_kind,
                message_id,
                source,
            } => {
                let mut body = json!({ "source": source });
                if let Some(kind) = trigger_kind {
                    body["trigger_kind"] = json!(kind);
                }
                if let Some(id) = message_id {
                    body["message_id"] = json!(id);
                }
                api_request(
                    &cli.api_url,
                    reqwest::Method::POST,
                    &format!("/v1/cases/{case_id}/dispatch"),
                    Some(body),
                )
                .await
            }
            CaseCommands::Proposals { case_id } => {
                api_request(
                    &cli.api_url,
                    reqwest::Method::GET,
                    &format!("/v1/cases/{case_id}/proposals"),
                    None,
                )
                .await
            }
            CaseCommands::Runs { case_id } => {
                api_request(
                    &cli.api_url,
                    reqwest::Method::GET,
                    &format!("/v1/cases/{case_id}/runs"),
                    None,
                )
                .await
            }
        },
        Commands::Run { command } => match command {
            RunCommands::Show { run_id } => {
                api_request(
                    &cli.api_url,
                    reqwest::Method::GET,
                    &format!("/v1/runs/{run_id}"),
                    None,
                )
                .await
            }
        },
        Commands::Sweep { kind } => {
            api_request(
                &cli.api_url,
                reqwest::Method::POST,
                &format!("/v1/sweeps/{kind}"),
                None,
            )
            .await
        }
        Commands::Proposal { command } => match command {
            ProposalCommands::Approve {
                proposal_id,
                decision,
            } => {
                let decision_value = match decision.as_deref() {
                    Some(raw) => serde_json::from_str(raw).unwrap_or_else(|e| {
                        exit_error(&format!("Invalid JSON in --decision: {e}"), None)
                    }),
                    None => json!({}),
                };
                api_request(
                    &cli.api_url,
                    reqwest::Method::POST,
                    &format!("/v1/proposals/{proposal_id}/decision"),
                    Some(json!({ "approve": true, "decision": decision_value })),
                )
                .await
            }
            ProposalCommands::Dismiss { proposal_id } => {
                api_request(
                    &cli.api_url,
                    reqwest::Method::POST,
                    &format!("/v1/proposals/{proposal_id}/decision"),
                    Some(json!({ "approve": false })),
                )
                .await
            }
        },
    };

    std::process::exit(code);
}
