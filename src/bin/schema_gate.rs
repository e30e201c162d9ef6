//! Schema Gate CLI
//!
//! Deploy-time companion of the signing service: registers the configured subjects,
//! checks catalog schemas against the registry and prints what the catalog holds.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use signing_schemas::gate::SubjectBinding;
use signing_schemas::{
    CompatibilityChecker, CompatibilityGate, ConfluentRegistry, Contract, ContractVersion,
    RegistryClient, SchemaCatalog, SchemaDefinition, SchemaError, ServiceConfig,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "schema-gate")]
#[command(about = "Register and verify signing contract schemas against the schema registry")]
struct Cli {
    /// Config file (defaults to signing.toml and SIGNING__* variables)
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the compatibility gate for the configured subjects
    Register,

    /// Check a catalog schema against its subject without registering it
    Check {
        /// Contract (request or response)
        contract: Contract,
        /// Catalog version (defaults to the configured one)
        #[arg(short, long)]
        version: Option<String>,
        /// Also fail on field-level changes the registry would tolerate
        #[arg(long)]
        strict: bool,
    },

    /// Print a catalog schema as it is submitted to the registry
    Show {
        /// Contract (request or response)
        contract: Contract,
        /// Catalog version (defaults to the latest)
        #[arg(short, long)]
        version: Option<String>,
        /// Pretty-print the JSON
        #[arg(long)]
        pretty: bool,
    },

    /// List catalog versions and verify each major line is fully compatible
    Versions,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("❌ Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = ServiceConfig::load_from(cli.config.as_deref()).context("loading configuration")?;
    let catalog = SchemaCatalog::builtin()?;

    match cli.command {
        Commands::Register => {
            let registry = Arc::new(ConfluentRegistry::from_config(&config.registry)?);
            println!("🔐 Running compatibility gate against {}", registry.base_url());

            let mut gate = CompatibilityGate::new(registry);
            for contract in Contract::ALL {
                let binding =
                    SubjectBinding::from_config(contract, config.subjects.for_contract(contract), &catalog)?;
                gate = gate.with_subject(binding);
            }

            let ids = gate.run().await?;
            for binding in gate.bindings() {
                let registered = ids.id(&binding.subject)?;
                println!(
                    "  ✅ {} ({}) → schema id {}",
                    binding.subject, binding.mode, registered
                );
            }
            println!("\n✅ {} subjects admitted", ids.len());
        }

        Commands::Check {
            contract,
            version,
            strict,
        } => {
            let subject_config = config.subjects.for_contract(contract);
            let version = match version {
                Some(v) => ContractVersion::parse(&v)?,
                None => subject_config.contract_version()?,
            };
            let schema = catalog.get(contract, &version)?;
            let subject = subject_config.subject();
            let registry = ConfluentRegistry::from_config(&config.registry)?;

            println!("🔍 Checking {} {} against {}", contract, version, subject);

            let checker = if strict {
                CompatibilityChecker::new().strict()
            } else {
                CompatibilityChecker::new()
            };

            // Show the field-level differences against what the registry serves now.
            match registry.latest_version(&subject).await {
                Ok(latest) => {
                    let result =
                        checker.check(subject_config.compatibility, schema, &[&latest.schema]);
                    println!("  Latest registered: version {} (id {})", latest.version, latest.id);
                    for change in &result.changes {
                        let marker = if change.is_breaking { "❌" } else { "➕" };
                        println!("  {} {}: {}", marker, change.path, change.description);
                    }
                    if strict && !result.is_compatible {
                        println!("\n❌ Strict check failed under {}", subject_config.compatibility);
                        std::process::exit(1);
                    }
                }
                Err(SchemaError::NotFound(_)) => {
                    println!("  Subject has no versions yet");
                }
                Err(e) => return Err(e.into()),
            }

            if registry.check_compatibility(schema, &subject).await? {
                println!("\n✅ Compatible");
            } else {
                println!("\n❌ Incompatible under {}", subject_config.compatibility);
                std::process::exit(1);
            }
        }

        Commands::Show {
            contract,
            version,
            pretty,
        } => {
            let schema: &SchemaDefinition = match version {
                Some(v) => catalog.get(contract, &ContractVersion::parse(&v)?)?,
                None => catalog.latest(contract)?.1,
            };
            if pretty {
                println!("{}", serde_json::to_string_pretty(&schema.to_json())?);
            } else {
                println!("{}", schema.canonical_json());
            }
            eprintln!("fingerprint {}", schema.fingerprint());
        }

        Commands::Versions => {
            for contract in Contract::ALL {
                println!("📦 {}", contract);
                for version in catalog.versions(contract) {
                    let schema = catalog.get(contract, version)?;
                    println!("  {} {}", version, schema.fingerprint().short());
                }
            }
            catalog.verify_lines()?;
            println!("\n✅ Every major line is fully compatible");
        }
    }

    Ok(())
}
