use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "fargate",
    about = "Compile Fargate cluster definitions into CloudFormation resources",
    version,
    propagate_version = true,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile every cluster in a config file into one template.
    ///
    /// The config is read as JSON when it ends in .json, TOML otherwise.
    /// With --base, the compiled resources are merged into an existing
    /// template and any identifier it already declares is an error.
    Compile {
        /// Cluster config file
        #[arg(short, long, default_value = "fargate.toml")]
        config: String,
        /// Deployment stage, part of every generated identifier
        #[arg(short, long, default_value = "dev")]
        stage: String,
        /// Template to merge the compiled resources into
        #[arg(short, long)]
        base: Option<String>,
        /// Write the template here instead of stdout
        #[arg(short, long)]
        output: Option<String>,
        /// Single-line JSON
        #[arg(long)]
        compact: bool,
    },
    /// List the logical identifiers each cluster produces
    Ids {
        #[arg(short, long, default_value = "fargate.toml")]
        config: String,
        #[arg(short, long, default_value = "dev")]
        stage: String,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fargate=info".parse()?)
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Compile { config, stage, base, output, compact } => {
            commands::compile::compile(&config, &stage, base.as_deref(), output.as_deref(), compact)
        }
        Commands::Ids { config, stage } => commands::compile::ids(&config, &stage),
    }
}
