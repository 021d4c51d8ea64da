//! # Odreams: The Easel
//! The `odreams` CLI probes the GPU, lists the model catalog, and turns
//! prompts into PNG files, either one-shot or in an interactive session.

mod render;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use render::{save_png, ProgressView};
use rusty_dreams_atlas::ModelCatalog;
use rusty_dreams_core::protocol::LifecycleState;
use rusty_dreams_core::request::{GenerationRequest, RANDOM_SEED};
use rusty_dreams_cortex::{create_capability, CapabilityProbe, DaydreamConfig};
use rusty_dreams_stem::LifecycleController;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Clone)]
struct Tuning {
    /// Text to steer away from (defaults to the model's)
    #[arg(long)]
    negative: Option<String>,
    /// Denoising steps (defaults to the model's)
    #[arg(long)]
    steps: Option<u32>,
    /// Classifier-free guidance scale (defaults to the model's)
    #[arg(long)]
    guidance: Option<f32>,
    /// Seed, -1 for random
    #[arg(long, default_value_t = RANDOM_SEED, allow_hyphen_values = true)]
    seed: i64,
}

impl Tuning {
    fn request(&self, prompt: &str) -> GenerationRequest {
        let mut request = GenerationRequest::new(prompt).with_seed(self.seed);
        if let Some(negative) = &self.negative {
            request = request.with_negative_prompt(negative.as_str());
        }
        if let Some(steps) = self.steps {
            request = request.with_steps(steps);
        }
        if let Some(guidance) = self.guidance {
            request = request.with_guidance_scale(guidance);
        }
        request
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Check for a usable GPU adapter
    Probe,
    /// List the models in the catalog
    Models {
        /// Print the catalog as JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate a single image
    Generate {
        /// Prompt describing the image
        #[arg(long)]
        prompt: String,
        /// Model id (defaults to the catalog default)
        #[arg(long)]
        model: Option<String>,
        /// Output PNG path
        #[arg(long, default_value = "dream.png")]
        out: PathBuf,
        #[command(flatten)]
        tuning: Tuning,
        /// Skip the simulated download and step delays
        #[arg(long)]
        instant: bool,
        /// Run even if the probe finds no GPU
        #[arg(long)]
        force: bool,
    },
    /// Interactive prompt loop
    Session {
        /// Model id to load first
        #[arg(long)]
        model: Option<String>,
        /// Directory for generated images
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
        #[command(flatten)]
        tuning: Tuning,
        #[arg(long)]
        instant: bool,
        #[arg(long)]
        force: bool,
    },
}

#[async_std::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Probe => {
            let report = CapabilityProbe::new().probe().await;
            if report.supported {
                println!("✅ {}", report.diagnostic.green());
            } else {
                println!("❌ {}", report.diagnostic.red());
            }
            if let Some(info) = report.adapter_info {
                println!("🖥️  {}", info.to_string().cyan());
            }
        }
        Commands::Models { json } => {
            let catalog = ModelCatalog::load()?;
            if json {
                println!("{}", serde_json::to_string_pretty(catalog.list())?);
            } else {
                let default_id = &catalog.default_model().id;
                for model in catalog.list() {
                    let marker = if &model.id == default_id {
                        "*"
                    } else {
                        " "
                    };
                    println!(
                        "{} {:<12} {:<22} {}x{}  {} steps  {} download  {} VRAM  {}",
                        marker,
                        model.id.cyan(),
                        model.name,
                        model.resolution.width,
                        model.resolution.height,
                        model.default_steps,
                        model.size_estimate(),
                        model.vram_estimate(),
                        model.description.dimmed()
                    );
                }
            }
        }
        Commands::Generate {
            prompt,
            model,
            out,
            tuning,
            instant,
            force,
        } => {
            let controller = compose(instant, force).await?;
            let model_id = pick_model(&controller, model);

            println!("⏳ Loading {}...", model_id.cyan());
            let view = ProgressView::attach(&controller);
            let loaded = controller.load_model(&model_id).await;
            view.finish(&controller).await;
            loaded?;

            println!("🎨 Generating: {}", prompt.bright_white());
            let view = ProgressView::attach(&controller);
            let generated = controller.generate_image(tuning.request(&prompt)).await;
            view.finish(&controller).await;
            let result = generated?;

            save_png(&result.image, &out)?;
            println!(
                "✅ Saved {} (seed {})",
                out.display().to_string().green(),
                result.resolved_seed
            );
            controller.unload().await;
        }
        Commands::Session {
            model,
            out_dir,
            tuning,
            instant,
            force,
        } => {
            let controller = compose(instant, force).await?;
            let model_id = pick_model(&controller, model);
            std::fs::create_dir_all(&out_dir)
                .with_context(|| format!("creating {}", out_dir.display()))?;

            println!("⏳ Loading {}...", model_id.cyan());
            let view = ProgressView::attach(&controller);
            let loaded = controller.load_model(&model_id).await;
            view.finish(&controller).await;
            if let Err(e) = loaded {
                eprintln!("❌ Failed to load: {}", e.reason().red());
            }
            println!("(Type a prompt, ':load <id>', ':unload', ':state' or 'exit')\n");

            let stdin = io::stdin();
            let mut line = String::new();
            let mut counter = 0usize;
            loop {
                print!("{} ", "DREAM >".bright_white());
                io::stdout().flush()?;
                line.clear();
                if stdin.read_line(&mut line)? == 0 {
                    break;
                }
                let input = line.trim();
                match input {
                    "" => continue,
                    "exit" | "quit" => break,
                    ":state" => println!("{}", describe(&controller.current_state())),
                    ":unload" => {
                        controller.unload().await;
                        println!("{}", describe(&controller.current_state()));
                    }
                    _ if input.starts_with(":load ") => {
                        let id = input.trim_start_matches(":load ").trim();
                        let view = ProgressView::attach(&controller);
                        let loaded = controller.load_model(id).await;
                        view.finish(&controller).await;
                        match loaded {
                            Ok(()) => println!("✅ {}", describe(&controller.current_state())),
                            Err(e) => eprintln!("❌ {}", e.reason().red()),
                        }
                    }
                    prompt => {
                        let view = ProgressView::attach(&controller);
                        let generated = controller.generate_image(tuning.request(prompt)).await;
                        view.finish(&controller).await;
                        match generated {
                            Ok(result) => {
                                counter += 1;
                                let path = out_dir.join(format!("dream-{:03}.png", counter));
                                save_png(&result.image, &path)?;
                                println!(
                                    "✅ {} (seed {})",
                                    path.display().to_string().green(),
                                    result.resolved_seed
                                );
                            }
                            Err(e) => eprintln!("❌ {}", e.reason().red()),
                        }
                    }
                }
            }
            controller.unload().await;
        }
    }

    Ok(())
}

/// Composition root: probe, catalog, capability, controller.
async fn compose(instant: bool, force: bool) -> Result<LifecycleController> {
    let report = CapabilityProbe::new().probe().await;
    if let Err(e) = report.require() {
        if !force {
            return Err(e).context("pass --force to run without a GPU");
        }
        eprintln!("⚠️ {} (continuing because of --force)", e.to_string().yellow());
    }

    let catalog = Arc::new(ModelCatalog::load()?);
    let config = if instant {
        DaydreamConfig::instant()
    } else {
        DaydreamConfig::default()
    };
    Ok(LifecycleController::new(catalog, create_capability(config)))
}

fn pick_model(controller: &LifecycleController, requested: Option<String>) -> String {
    requested.unwrap_or_else(|| controller.catalog().default_model().id.clone())
}

fn describe(state: &LifecycleState) -> String {
    match state {
        LifecycleState::Idle => "idle".dimmed().to_string(),
        LifecycleState::Loading(id) => format!("loading {}", id.cyan()),
        LifecycleState::Ready(id) => format!("ready: {}", id.green()),
        LifecycleState::Generating(id) => format!("generating with {}", id.cyan()),
        LifecycleState::Failed(reason) => format!("failed: {}", reason.red()),
    }
}
