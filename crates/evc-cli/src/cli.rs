use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "evc",
    about = "evcache-rs: drive the client coordination layer against a simulated cluster",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// TOML file with `[client]` and `[cluster]` tables
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum PolicyArg {
    None,
    One,
    Quorum,
    AllMinusOne,
    All,
}

#[derive(Subcommand)]
pub enum Command {
    /// Seed keys, optionally take nodes down, and fetch them in one bulk get
    BulkGet(BulkGetArgs),
    /// Run append-or-add repeatedly on one key
    AppendOrAdd(AppendOrAddArgs),
    /// Replicated set with a latch policy and a slow replica
    Quorum(QuorumArgs),
    /// Increment a counter, optionally against a slow node
    Incr(IncrArgs),
    /// Print the effective configuration
    Config,
}

#[derive(Args)]
pub struct BulkGetArgs {
    /// Number of keys to seed and fetch
    #[arg(short = 'n', long, default_value = "20")]
    pub keys: usize,
    /// Node ids to mark inactive before fetching
    #[arg(long)]
    pub down: Vec<u32>,
}

#[derive(Args)]
pub struct AppendOrAddArgs {
    pub key: String,
    pub value: String,
    #[arg(short = 'n', long, default_value = "1")]
    pub times: usize,
}

#[derive(Args)]
pub struct QuorumArgs {
    pub key: String,
    pub value: String,
    /// Overrides the configured latch policy
    #[arg(long)]
    pub policy: Option<PolicyArg>,
    /// Node to slow down
    #[arg(long)]
    pub slow_node: Option<u32>,
    #[arg(long, default_value = "200")]
    pub slow_ms: u64,
}

#[derive(Args)]
pub struct IncrArgs {
    pub key: String,
    #[arg(long, default_value = "1")]
    pub by: u64,
    /// Initial value for a missing counter
    #[arg(long)]
    pub default: Option<u64>,
    #[arg(short = 'n', long, default_value = "1")]
    pub times: usize,
    /// Extra latency on the counter's node
    #[arg(long, default_value = "0")]
    pub slow_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bulk_get() {
        let cli = Cli::try_parse_from(["evc", "bulk-get", "-n", "50", "--down", "1", "--down", "2"]).unwrap();
        if let Command::BulkGet(args) = cli.command {
            assert_eq!(args.keys, 50);
            assert_eq!(args.down, vec![1, 2]);
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_bulk_get_defaults() {
        let cli = Cli::try_parse_from(["evc", "bulk-get"]).unwrap();
        if let Command::BulkGet(args) = cli.command {
            assert_eq!(args.keys, 20);
            assert!(args.down.is_empty());
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_append_or_add() {
        let cli = Cli::try_parse_from(["evc", "append-or-add", "k", "x", "-n", "3"]).unwrap();
        if let Command::AppendOrAdd(args) = cli.command {
            assert_eq!(args.key, "k");
            assert_eq!(args.value, "x");
            assert_eq!(args.times, 3);
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_quorum_with_policy() {
        let cli = Cli::try_parse_from([
            "evc", "quorum", "k", "v", "--policy", "all-minus-one", "--slow-node", "2",
        ])
        .unwrap();
        if let Command::Quorum(args) = cli.command {
            assert!(matches!(args.policy, Some(PolicyArg::AllMinusOne)));
            assert_eq!(args.slow_node, Some(2));
            assert_eq!(args.slow_ms, 200);
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_incr() {
        let cli = Cli::try_parse_from(["evc", "incr", "hits", "--by", "5", "--default", "10"]).unwrap();
        if let Command::Incr(args) = cli.command {
            assert_eq!(args.by, 5);
            assert_eq!(args.default, Some(10));
            assert_eq!(args.slow_ms, 0);
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_global_flags() {
        let cli = Cli::try_parse_from(["evc", "config", "--format", "json", "-v", "-c", "evc.toml"]).unwrap();
        assert!(matches!(cli.command, Command::Config));
        assert!(cli.verbose);
        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(cli.config, Some(PathBuf::from("evc.toml")));
    }
}
