mod cmd;
mod output;
mod root;

use action_queue_core::fees::FeeFunding;
use clap::{Args, Parser, Subcommand};
use cmd::state::StateSubcommand;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "aq",
    about = "Action program queue: compile, preview and run multi-step wallet programs",
    version,
    propagate_version = true
)]
struct Cli {
    /// Queue root (default: auto-detect from .action-queue/)
    #[arg(long, global = true, env = "AQ_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create .action-queue/ with a default config
    Init,

    /// Validate an op tree and print its program id
    Compile {
        /// Path to the op tree (JSON)
        op: PathBuf,
    },

    /// Simulate a program against a paper ledger without broadcasting
    Dryrun {
        op: PathBuf,
        /// Paper ledger (YAML)
        #[arg(long)]
        ledger: PathBuf,
        #[command(flatten)]
        fee_cover: FeeCoverArgs,
        #[arg(long, default_value = cmd::DEFAULT_CLIENT)]
        client: String,
    },

    /// Compile and run a program live against a paper ledger
    Run {
        op: PathBuf,
        #[arg(long)]
        ledger: PathBuf,
        #[arg(long, default_value = cmd::DEFAULT_CLIENT)]
        client: String,
        #[command(flatten)]
        fee_cover: FeeCoverArgs,
        /// Record the program on this loan account (created if missing)
        #[arg(long, requires = "loan_plugin")]
        loan_account: Option<String>,
        /// Borrow plugin of a new loan account
        #[arg(long)]
        loan_plugin: Option<String>,
        /// Program type recorded on the loan account
        #[arg(long, default_value = "loan-create")]
        loan_type: String,
    },

    /// Inspect program states
    State {
        #[command(subcommand)]
        subcommand: StateSubcommand,
    },

    /// Release programs stranded in the executing state by a crash
    Recover,

    /// Run every due program once
    Tick {
        #[arg(long)]
        ledger: PathBuf,
        #[arg(long, default_value = cmd::DEFAULT_CLIENT)]
        client: String,
    },
}

#[derive(Args)]
struct FeeCoverArgs {
    /// Wallet paying most network fees; enables fee-cover planning
    #[arg(long, requires = "source_wallet")]
    fee_wallet: Option<String>,
    /// Wallet funding the fee-cover swap
    #[arg(long, requires = "fee_wallet")]
    source_wallet: Option<String>,
    /// Token of the source wallet to swap from
    #[arg(long, requires = "source_wallet")]
    source_token: Option<String>,
}

impl FeeCoverArgs {
    fn funding(self) -> Option<FeeFunding> {
        let source_token_id = self.source_token;
        self.fee_wallet
            .zip(self.source_wallet)
            .map(|(fee_wallet_id, source_wallet_id)| FeeFunding {
                fee_wallet_id,
                source_wallet_id,
                source_token_id,
            })
    }
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root, cli.json),
        Commands::Compile { op } => cmd::compile::run(&op, cli.json),
        Commands::Dryrun {
            op,
            ledger,
            fee_cover,
            client,
        } => cmd::dryrun::run(&root, &op, &ledger, fee_cover.funding(), &client, cli.json),
        Commands::Run {
            op,
            ledger,
            client,
            fee_cover,
            loan_account,
            loan_plugin,
            loan_type,
        } => {
            let loan = loan_account.map(|id| cmd::run::LoanTarget {
                id,
                borrow_plugin_id: loan_plugin.unwrap_or_default(),
                program_type: loan_type,
            });
            let funding = fee_cover.funding();
            cmd::run::run(&root, &op, &ledger, &client, funding, loan, cli.json)
        }
        Commands::State { subcommand } => cmd::state::run(&root, subcommand, cli.json),
        Commands::Recover => cmd::recover::run(&root, cli.json),
        Commands::Tick { ledger, client } => cmd::tick::run(&root, &ledger, &client, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
