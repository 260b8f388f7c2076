use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use recovery_core::{logging, BuildInfo, Config};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "recovery-signer", about = "Builds and signs the assertion chain for recovery images")]
struct Cli {
    /// TOML configuration file; defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Print build information as JSON and exit
    #[arg(long)]
    version_json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build account, account-key, model and a locally signed serial (test only)
    MockSerial,
    /// Obtain a serial for this device from the signing server
    SignSerial,
    /// Check assertion files against the local trust database
    Verify {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Print the effective configuration as TOML
    PrintConfig,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("could not load configuration {}", path.display())),
        None => {
            let config = Config::example();
            config.validate()?;
            Ok(config)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let build = BuildInfo::current();

    if cli.version_json {
        println!("{}", serde_json::to_string(&build)?);
        return Ok(());
    }

    let Some(command) = cli.command else {
        bail!("no command given; run with --help for usage");
    };

    if let Command::PrintConfig = command {
        let config = load_config(cli.config.as_ref())?;
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }

    logging::init_with(cli.log_json);
    build.log_startup();
    let config = load_config(cli.config.as_ref())?;

    let result = match command {
        Command::MockSerial => recovery_signer::mock::run(&config).map(|chain| {
            info!(
                root_key = %chain.root_key_id,
                serial = chain.serial.header("serial").unwrap_or_default(),
                "Mock serial ready"
            );
        }),
        Command::SignSerial => recovery_signer::remote::run(&config).await.map(|_| ()),
        Command::Verify { files } => {
            recovery_signer::verify::run(&config, &files).and_then(|reports| {
                let mut failed = 0;
                for report in &reports {
                    match &report.detail {
                        None => println!(
                            "{}: {} {} OK",
                            report.path.display(),
                            report.assertion_type,
                            report.primary_key
                        ),
                        Some(reason) => {
                            failed += 1;
                            println!(
                                "{}: {} {} FAILED: {}",
                                report.path.display(),
                                report.assertion_type,
                                report.primary_key,
                                reason
                            );
                        }
                    }
                }
                if failed > 0 {
                    bail!("{} of {} assertions failed verification", failed, reports.len());
                }
                Ok(())
            })
        }
        Command::PrintConfig => Ok(()),
    };

    if let Err(e) = &result {
        error!(error = %format!("{:#}", e), "Command failed");
    }
    result
}
