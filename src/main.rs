use std::path::PathBuf;

use clap::{Parser, Subcommand};
use sa_reconciler::{
    capabilities::Capabilities, client::KubeAccounts, config, reconciler::AccountReconciler, Error,
};
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create or update a service account from a declaration file
    Apply(ApplyArgs),
    /// Read the live object and print its observed state
    Read(ReadArgs),
    /// Delete a service account and confirm its absence
    Delete(ReadArgs),
    /// Import an existing service account as a declaration baseline
    Import(ImportArgs),
    /// Show version information
    Version,
}

#[derive(Parser, Debug)]
struct ApplyArgs {
    /// Path to the YAML declaration
    #[arg(long, env = "SA_DECLARATION")]
    file: PathBuf,
}

#[derive(Parser, Debug)]
struct ReadArgs {
    /// Target namespace
    #[arg(long, env = "SA_NAMESPACE", default_value = "default")]
    namespace: String,

    /// Service account name
    name: String,
}

#[derive(Parser, Debug)]
struct ImportArgs {
    /// Identifier in <namespace>/<name> form
    identifier: String,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    if let Commands::Version = &args.command {
        println!("sa-reconciler v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .init();

    let client = kube::Client::try_default()
        .await
        .map_err(Error::Kube)?;
    let caps = Capabilities::detect(&client).await?;
    info!(
        auto_token_secret = caps.auto_token_secret,
        "cluster capabilities resolved"
    );

    let reconciler = AccountReconciler::new(KubeAccounts::new(client), caps);

    match args.command {
        Commands::Apply(apply) => {
            let desired = config::load_spec(&apply.file)?;
            let baseline = match desired.identity.declared_name() {
                Some(name) => reconciler.read(&desired.identity.namespace, name).await?,
                // A generate-name declaration has no stable identity to look
                // up; it always creates.
                None => None,
            };
            let observed = match baseline {
                Some(baseline) => reconciler.update(&desired, &baseline).await?,
                None => reconciler.create(&desired).await?,
            };
            print_observed(&observed)?;
        }
        Commands::Read(read) => match reconciler.read(&read.namespace, &read.name).await? {
            Some(observed) => print_observed(&observed)?,
            None => println!("absent: {}/{}", read.namespace, read.name),
        },
        Commands::Delete(del) => {
            reconciler.delete(&del.namespace, &del.name).await?;
            println!("deleted: {}/{}", del.namespace, del.name);
        }
        Commands::Import(import) => {
            let (spec, observed) = reconciler.import(&import.identifier).await?;
            println!("{}", config::render_spec(&spec)?);
            print_observed(&observed)?;
        }
        Commands::Version => unreachable!("handled above"),
    }

    Ok(())
}

fn print_observed(observed: &sa_reconciler::ObservedAccount) -> Result<(), Error> {
    let rendered = serde_yaml::to_string(observed)
        .map_err(|e| Error::Config(format!("cannot render observed state: {e}")))?;
    println!("{rendered}");
    Ok(())
}
