use crate::config;
use crate::recipe::NodeRole;
use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "wksctl")]
#[command(version)]
#[command(about = "Converge a machine into a Kubernetes node, one resource at a time", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Inspect, apply or undo the node plan
    #[command(subcommand)]
    Plan(PlanCommand),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum PlanCommand {
    /// Print the node plan without touching the target
    View(ViewArgs),

    /// Converge the target to the node plan
    Apply(ApplyArgs),

    /// Undo the node plan on the target
    Undo(UndoArgs),

    /// Upgrade Kubernetes on the target to the configured version
    Upgrade(UpgradeArgs),
}

/// Where the plan runs and what it is built from
#[derive(Args)]
pub struct TargetArgs {
    /// Cluster configuration file
    #[arg(short, long, env = "WKSCTL_CONFIG", default_value = config::DEFAULT_CONFIG)]
    pub config: PathBuf,

    /// Run commands on this machine instead of over SSH
    #[arg(long)]
    pub local: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Graphviz dependency graph
    #[default]
    Dot,
    /// Serialized plan
    Json,
}

#[derive(Args)]
pub struct ViewArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Dot)]
    pub output: OutputFormat,
}

#[derive(Args)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Print the full validity tree even when everything converged
    #[arg(long)]
    pub report: bool,
}

#[derive(Args)]
pub struct UndoArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Args)]
pub struct UpgradeArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// What the target runs in the cluster
    #[arg(long, value_enum, default_value_t = NodeRole::OriginalMaster)]
    pub role: NodeRole,

    /// Print the full validity tree even when everything converged
    #[arg(long)]
    pub report: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_plan_view_defaults() {
        let cli = Cli::try_parse_from(["wksctl", "plan", "view", "--local"]).unwrap();
        let Command::Plan(PlanCommand::View(args)) = cli.command else {
            panic!("expected plan view");
        };
        assert!(args.target.local);
        assert_eq!(args.output, OutputFormat::Dot);
    }

    #[test]
    fn test_plan_undo_flags() {
        let cli = Cli::try_parse_from([
            "wksctl", "-vv", "plan", "undo", "-c", "/tmp/cluster.toml", "--yes",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        let Command::Plan(PlanCommand::Undo(args)) = cli.command else {
            panic!("expected plan undo");
        };
        assert!(args.yes);
        assert_eq!(args.target.config, PathBuf::from("/tmp/cluster.toml"));
    }

    #[test]
    fn test_plan_upgrade_role() {
        let cli = Cli::try_parse_from(["wksctl", "plan", "upgrade", "--local"]).unwrap();
        let Command::Plan(PlanCommand::Upgrade(args)) = cli.command else {
            panic!("expected plan upgrade");
        };
        assert_eq!(args.role, NodeRole::OriginalMaster);

        let cli = Cli::try_parse_from(["wksctl", "plan", "upgrade", "--role", "secondary-master"])
            .unwrap();
        let Command::Plan(PlanCommand::Upgrade(args)) = cli.command else {
            panic!("expected plan upgrade");
        };
        assert_eq!(args.role, NodeRole::SecondaryMaster);
        assert!(!args.report);
    }
}
