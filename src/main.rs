use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use keyphrase::config::Config;
use keyphrase::keywords::onnx::{split_phrases, OnnxKeywordGenerator};
use keyphrase::keywords::service::{Extraction, KeywordExtractionService};
use keyphrase::postprocess::{morph, PostProcessor};

/// Keyphrase: key phrase extraction for patent texts.
///
/// Runs a local seq2seq model over the text and cleans its output into a
/// short, non-redundant list of key phrases.
#[derive(Parser)]
#[command(name = "keyphrase", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API
    #[cfg(feature = "web")]
    Serve {
        /// Port to listen on
        #[arg(long, default_value = "8000")]
        port: u16,

        /// Address to bind to
        #[arg(long, default_value = "0.0.0.0")]
        bind: String,
    },

    /// Extract key phrases from a text
    Extract {
        /// The text to analyze
        text: String,
    },

    /// Clean a raw `;`-separated model output without running the model
    Clean {
        /// Raw model output, e.g. "поиск; патентный поиск;"
        raw: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if missing)
    let _ = dotenvy::dotenv();

    // Set up structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("keyphrase=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        #[cfg(feature = "web")]
        Commands::Serve { port, bind } => {
            let service = build_service(&config)?;
            let state = keyphrase::web::AppState::new(Arc::new(service), &config);
            keyphrase::web::run_server(state, port, &bind).await?;
        }

        Commands::Extract { text } => {
            let service = build_service(&config)?;
            let extraction = service.extract_keywords(&text).await?;
            keyphrase::output::display_extraction(&extraction);
        }

        Commands::Clean { raw } => {
            let post_processor = build_post_processor(&config)?;
            let cleaned = post_processor.process(&split_phrases(&raw))?;
            keyphrase::output::display_extraction(&Extraction::from_phrases(cleaned));
            println!(
                "{}",
                format!("Nested match mode: {:?}", post_processor.nested_match()).dimmed()
            );
        }
    }

    Ok(())
}

fn build_post_processor(config: &Config) -> Result<PostProcessor> {
    let analyzer =
        morph::build_analyzer(config.lemma_dict.as_deref(), config.lemma_cache_size)?;
    Ok(PostProcessor::new(analyzer).with_nested_match(config.nested_match))
}

/// Load the model and analyzer once; both are shared by every request.
fn build_service(config: &Config) -> Result<KeywordExtractionService> {
    let (model_path, max_input_length) = config.require_model()?;

    info!(model = %model_path.display(), "Loading keyword model...");
    let generator = OnnxKeywordGenerator::load(&model_path, max_input_length)?;

    Ok(KeywordExtractionService::new(
        Arc::new(generator),
        build_post_processor(config)?,
    ))
}
