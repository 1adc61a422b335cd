use anyhow::{bail, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use prettytable::{Cell, Row as PrettyRow, Table};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use condense::db::Database;
use condense::logging::configure_cli_logging;
use condense::registry::{ModelRegistry, ModelType, ModelVariant, NewModel, PROVIDER_LOCAL};

#[derive(Parser)]
#[clap(name = "manage-models", about = "Manage the summarization model registry")]
struct Cli {
    /// Path to the SQLite database
    #[clap(long, env = "DATABASE_PATH", default_value = "condense.db")]
    database: String,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered model variants
    List {
        /// Only show one model type (extractive, abstractive, hybrid)
        #[clap(short = 't', long = "type")]
        model_type: Option<ModelType>,
    },

    /// Register a new version of a model
    Register {
        /// Model name; the version number is assigned automatically
        #[clap(required = true)]
        name: String,

        /// Model type (extractive, abstractive, hybrid)
        #[clap(short = 't', long = "type")]
        model_type: ModelType,

        /// Backend provider (ollama, openai, local)
        #[clap(short, long, default_value = "ollama")]
        provider: String,

        /// Model id understood by the provider
        #[clap(short, long)]
        backend_model_id: String,

        /// Cost per 1000 tokens
        #[clap(short, long, default_value = "0.0")]
        cost: f64,

        /// Quality estimate (0.0-1.0)
        #[clap(short, long, default_value = "0.5")]
        quality: f64,

        /// Speed estimate (0.0-1.0)
        #[clap(short, long, default_value = "0.5")]
        speed: f64,

        /// Activate the new version immediately
        #[clap(short, long)]
        activate: bool,
    },

    /// Make a variant the active model of its type
    Activate {
        #[clap(required = true)]
        id: Uuid,
    },

    /// Clear the active flag of a variant
    Retire {
        #[clap(required = true)]
        id: Uuid,
    },

    /// Rank the variants of a type by quality, speed and cost
    Compare {
        #[clap(short = 't', long = "type", default_value = "abstractive")]
        model_type: ModelType,
    },

    /// Show row counts for every table in the database
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    configure_cli_logging();
    let args = Cli::parse();

    let db = Database::new(&args.database).await?;
    let registry = ModelRegistry::new(Arc::new(db.clone()), Duration::from_secs(30 * 60));

    match args.command {
        Commands::List { model_type } => {
            let models = registry.list_models(model_type).await?;
            if models.is_empty() {
                println!("No models registered.");
            } else {
                print_models(&models);
            }
        }
        Commands::Register {
            name,
            model_type,
            provider,
            backend_model_id,
            cost,
            quality,
            speed,
            activate,
        } => {
            if !(0.0..=1.0).contains(&quality) || !(0.0..=1.0).contains(&speed) {
                bail!("quality and speed must be between 0.0 and 1.0");
            }
            if cost < 0.0 {
                bail!("cost must not be negative");
            }
            if model_type == ModelType::Extractive && provider != PROVIDER_LOCAL {
                bail!("extractive models run locally; use --provider {}", PROVIDER_LOCAL);
            }
            let variant = registry
                .register_model(NewModel {
                    name,
                    model_type,
                    provider,
                    backend_model_id,
                    cost_per_1k_tokens: cost,
                    quality,
                    speed,
                    config: serde_json::json!({}),
                })
                .await?;
            println!("Registered {} ({})", variant.version_label(), variant.id);
            if activate {
                let active = registry.activate_model(variant.id).await?;
                println!("Activated {} for {}", active.version_label(), active.model_type);
            }
        }
        Commands::Activate { id } => {
            let variant = registry.activate_model(id).await?;
            println!("Activated {} for {}", variant.version_label(), variant.model_type);
        }
        Commands::Retire { id } => {
            registry.retire_model(id).await?;
            println!("Retired {}", id);
        }
        Commands::Compare { model_type } => {
            let ranked = registry.compare_models(model_type).await?;
            let mut table = Table::new();
            table.add_row(PrettyRow::new(vec![
                Cell::new("Rank"),
                Cell::new("Model"),
                Cell::new("Provider"),
                Cell::new("Score"),
                Cell::new("Quality"),
                Cell::new("Success"),
                Cell::new("Latency (ms)"),
                Cell::new("Active"),
            ]));
            for (rank, entry) in ranked.iter().enumerate() {
                let v = &entry.variant;
                table.add_row(PrettyRow::new(vec![
                    Cell::new(&(rank + 1).to_string()),
                    Cell::new(&v.version_label()),
                    Cell::new(&format!("{}/{}", v.provider, v.backend_model_id)),
                    Cell::new(&format!("{:.3}", entry.score)),
                    Cell::new(&format!("{:.2}", v.quality)),
                    Cell::new(&format!("{:.2}", v.metrics.success_rate)),
                    Cell::new(&format!("{:.0}", v.metrics.latency_ms)),
                    Cell::new(if v.is_active { "yes" } else { "" }),
                ]));
            }
            table.printstd();
        }
        Commands::Stats => {
            let mut table = Table::new();
            table.add_row(PrettyRow::new(vec![Cell::new("Table"), Cell::new("Rows")]));
            for (name, count) in db.collect_stats().await? {
                table.add_row(PrettyRow::new(vec![Cell::new(name), Cell::new(&count.to_string())]));
            }
            table.printstd();
        }
    }

    Ok(())
}

/// Prints models in a formatted table
fn print_models(models: &[ModelVariant]) {
    let mut table = Table::new();
    table.add_row(PrettyRow::new(vec![
        Cell::new("ID"),
        Cell::new("Model"),
        Cell::new("Type"),
        Cell::new("Backend"),
        Cell::new("Cost/1k"),
        Cell::new("Quality"),
        Cell::new("Samples"),
        Cell::new("Deployed"),
        Cell::new("Active"),
    ]));

    for v in models {
        let deployed = v
            .deployed_at
            .map(|dt| dt.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        table.add_row(PrettyRow::new(vec![
            Cell::new(&v.id.to_string()),
            Cell::new(&v.version_label()),
            Cell::new(v.model_type.as_str()),
            Cell::new(&format!("{}/{}", v.provider, v.backend_model_id)),
            Cell::new(&format!("{:.4}", v.cost_per_1k_tokens)),
            Cell::new(&format!("{:.2}", v.quality)),
            Cell::new(&v.metrics.samples.to_string()),
            Cell::new(&deployed),
            Cell::new(if v.is_active { "yes" } else { "" }),
        ]));
    }

    table.printstd();
}
