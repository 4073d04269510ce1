use clap::{self, Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "gecko", version, about = "Coverage-guided smart contract fuzzer")]
pub struct Opt {
    #[arg(long, help = "Load config file", value_name = "CONFIG", global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fuzz contracts compiled to <prefix>.bin and <prefix>.abi
    Fuzz(FuzzArgs),
    /// Fuzz deployed contracts without their ABI, looking for token transfers
    Blackbox(BlackboxArgs),
    /// Re-execute a replay record or a finding
    Replay(ReplayArgs),
    /// Fuzz a project, then upload it and print its onboarding token
    Onboard(OnboardArgs),
    /// Fuzz registered projects and submit findings for reward
    Miner(NetworkArgs),
    /// Replay submitted findings and vote on them
    Validator(NetworkArgs),
}

/// Flags shared by every command, all overriding the config file
#[derive(Debug, Args, Default)]
pub struct CommonArgs {
    #[arg(long, help = "Set the number of threads to run", value_name = "CORES")]
    pub cores: Option<usize>,

    #[arg(long, help = "Workspace of the fuzzer", value_name = "WORKSPACE")]
    pub workspace: Option<String>,

    #[arg(long, help = "Set a custom seed", value_name = "SEED")]
    pub seed: Option<u64>,

    #[arg(
        long,
        help = "Number of seconds this fuzzing session will last",
        value_name = "RUN_TIME"
    )]
    pub run_time: Option<u64>,

    #[arg(long, help = "Number of transactions to execute", value_name = "ITERATIONS")]
    pub iterations: Option<u64>,

    #[arg(long, help = "Gas budget of one transaction", value_name = "GAS_LIMIT")]
    pub gas_limit: Option<u64>,

    #[arg(
        long,
        help = "Exclusive upper bound of generated unsigned values",
        value_name = "UINT_CAP"
    )]
    pub uint_cap: Option<u64>,

    #[arg(long, help = "JSON-RPC endpoint backing blackbox state", value_name = "RPC_URL")]
    pub rpc_url: Option<String>,

    #[arg(long, help = "Blob gateway URL", value_name = "BLOB_GATEWAY")]
    pub blob_gateway: Option<String>,

    #[arg(long, help = "Registry file", value_name = "REGISTRY")]
    pub registry_file: Option<String>,

    #[arg(
        long,
        help = "Enable fuzzer logs in file",
        default_value = "false"
    )]
    pub logs: bool,
}

#[derive(Debug, Args)]
pub struct FuzzArgs {
    #[arg(long, help = "Contract prefix, repeatable", value_name = "CONTRACT")]
    pub contract: Vec<String>,

    #[arg(
        long,
        help = "Fuzz every contract in its own session on the worker pool",
        default_value = "false"
    )]
    pub batch: bool,

    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Debug, Args)]
pub struct BlackboxArgs {
    #[arg(long, help = "Target address, repeatable", value_name = "TARGET")]
    pub target: Vec<String>,

    #[arg(
        long,
        help = "Stop a target after this many reported violations",
        value_name = "MAX_VIOLATIONS"
    )]
    pub max_violations: Option<usize>,

    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Debug, Args)]
pub struct ReplayArgs {
    #[arg(long, help = "Replay record or finding file", value_name = "INPUT")]
    pub input: String,

    #[arg(long, help = "Contract prefix, repeatable", value_name = "CONTRACT")]
    pub contract: Vec<String>,

    #[arg(long, help = "Deployed address of a record without ABI", value_name = "TARGET")]
    pub target: Option<String>,

    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Debug, Args)]
pub struct OnboardArgs {
    #[arg(help = "Directory of the project", default_value = ".")]
    pub dir: String,

    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Debug, Args)]
pub struct NetworkArgs {
    #[arg(long, help = "Seconds between two polls", value_name = "POLL", default_value = "10")]
    pub poll: u64,

    #[arg(long, help = "Stop after this many rounds", value_name = "ROUNDS")]
    pub rounds: Option<usize>,

    #[command(flatten)]
    pub common: CommonArgs,
}
