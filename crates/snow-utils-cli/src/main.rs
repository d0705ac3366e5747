mod cmd;
mod operator;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{
    admin_role::AdminRoleSubcommand,
    config::ConfigSubcommand,
    manifest::ManifestSubcommand,
    portable::{ExportArgs, ImportArgs},
    resource::{CreateArgs, InstanceArgs, ReplayAllArgs, ReplayArgs},
    Globals,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "snow-utils",
    about = "Idempotent, manifest-driven provisioning of Snowflake service users, network rules and external volumes",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .snow-utils/ or .git/)
    #[arg(long, global = true, env = "SNOW_UTILS_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON. Never prompts.
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Answer yes at every confirmation checkpoint
    #[arg(long, global = true, short = 'y')]
    yes: bool,

    /// Provider executable, overrides provider.command in config.yaml
    #[arg(long, global = true, env = "SNOW_UTILS_PROVIDER")]
    provider: Option<String>,

    /// Show account ids, ARNs and IP addresses unmasked
    #[arg(long, global = true)]
    no_mask: bool,

    /// Log lifecycle events (steps, compensation, retries) to stderr
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize snow-utils in the current project
    Init {
        /// Identity prefix for generated names (default: $USER)
        #[arg(long)]
        identity: Option<String>,
    },

    /// List the resource families that can be provisioned
    Skills,

    /// Provision a new resource instance
    Create(CreateArgs),

    /// Remove a resource instance in reverse step order
    Delete(InstanceArgs),

    /// Re-issue the renewable credentials of a COMPLETE instance
    Rotate(InstanceArgs),

    /// Check that a provisioned instance is usable, with backoff
    Verify(InstanceArgs),

    /// Show one instance as recorded in the manifest
    Describe(InstanceArgs),

    /// Recreate, resume or resolve one recorded instance
    Replay(ReplayArgs),

    /// Continue an IN_PROGRESS instance from its first PENDING step
    Resume(InstanceArgs),

    /// Recreate every REMOVED instance, oldest first
    ReplayAll(ReplayAllArgs),

    /// Write a portable manifest for another operator or machine
    Export(ExportArgs),

    /// Copy a portable manifest into this project's manifest
    Import(ImportArgs),

    /// Inspect the canonical manifest
    Manifest {
        #[command(subcommand)]
        subcommand: ManifestSubcommand,
    },

    /// Admin role recorded per resource family
    AdminRole {
        #[command(subcommand)]
        subcommand: AdminRoleSubcommand,
    },

    /// Show or validate the project configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());
    let globals = Globals {
        json: cli.json,
        yes: cli.yes,
        masked: !cli.no_mask,
        provider: cli.provider,
    };

    let result = match cli.command {
        Commands::Init { identity } => cmd::init::run(&root, identity.as_deref(), globals.json),
        Commands::Skills => cmd::skills::run(globals.json),
        Commands::Create(args) => cmd::resource::create(&root, args, &globals),
        Commands::Delete(args) => cmd::resource::delete(&root, args, &globals),
        Commands::Rotate(args) => cmd::resource::rotate(&root, args, &globals),
        Commands::Verify(args) => cmd::resource::verify(&root, args, &globals),
        Commands::Describe(args) => cmd::resource::describe(&root, args, &globals),
        Commands::Replay(args) => cmd::resource::replay(&root, args, &globals),
        Commands::Resume(args) => cmd::resource::resume(&root, args, &globals),
        Commands::ReplayAll(args) => cmd::resource::replay_all(&root, args, &globals),
        Commands::Export(args) => cmd::portable::export(&root, args, &globals),
        Commands::Import(args) => cmd::portable::import(&root, args, &globals),
        Commands::Manifest { subcommand } => cmd::manifest::run(&root, subcommand, &globals),
        Commands::AdminRole { subcommand } => {
            cmd::admin_role::run(&root, subcommand, globals.json)
        }
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, globals.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
