//! phrasecore - command-line front end.
//!
//! # Commands
//!
//! - `build-index`: build the source-phrase index of a phrase table
//! - `lookup`: resolve phrases against a saved index
//! - `serve`: run the reference scoring oracle over a trigram model
//! - `translate`: score and rank every candidate for one source phrase
//!
//! Settings not given on the command line come from the persisted
//! [`Config`]; defaults are written out on first run.

use clap::{Parser, Subcommand};
use phrasecore::oracle::{LocalOracle, OracleServer, ScoringClient, TrigramModel};
use phrasecore::{
    rank, Aggregator, Config, LanguageModel, NGramLanguageModel, NGramOracle, PhraseIndex, PhraseTable, ProducerId, ScoreError, TargetPhrase, WeightedModel,
};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

const TRANSLATION_PRODUCER: ProducerId = ProducerId(0);
const LM_PRODUCER: ProducerId = ProducerId(1);

#[derive(Parser, Debug)]
#[command(name = "phrasecore")]
#[command(about = "Phrase lookup and scoring for phrase-based translation")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the source-phrase index of a phrase table
    BuildIndex {
        /// Phrase table to index
        #[arg(short, long)]
        table: PathBuf,

        /// Where to write the index (defaults to the configured index path)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Look phrases up in a saved index
    Lookup {
        /// Index file (defaults to the configured index path)
        #[arg(short, long)]
        index: Option<PathBuf>,

        /// Phrases to resolve, one per argument
        #[arg(required = true)]
        phrases: Vec<String>,
    },

    /// Serve a trigram model trained on a corpus (one sentence per line)
    Serve {
        #[arg(short, long)]
        corpus: PathBuf,

        /// Port to listen on (defaults to the configured oracle port)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Score every candidate translation of a source phrase
    Translate {
        #[arg(short, long)]
        table: PathBuf,

        /// Score with a local trigram model trained on this corpus instead
        /// of the configured oracle
        #[arg(short, long)]
        corpus: Option<PathBuf>,

        /// Source phrase
        #[arg(required = true)]
        source: Vec<String>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::load()?;

    // Persist defaults so users get a concrete config file on first run.
    if let Err(err) = config.save() {
        tracing::warn!(error = %err, "failed to persist config defaults");
    }

    match args.command {
        Command::BuildIndex { table, output } => {
            let path = index_path(output, &config)?;
            let table = PhraseTable::from_path(&table)?;
            table.index().save(&path)?;
            println!("Indexed {} source phrases into {}", table.num_sources(), path.display());
        }
        Command::Lookup { index, phrases } => {
            let index = PhraseIndex::load(&index_path(index, &config)?)?;
            for phrase in &phrases {
                let tokens: Vec<&str> = phrase.split_whitespace().collect();
                match index.lookup_tokens(&tokens) {
                    Some(row) => println!("{phrase}\t{row}"),
                    None => println!("{phrase}\tnot found"),
                }
            }
        }
        Command::Serve { corpus, port } => {
            let model = train_model(&corpus)?;
            let port = port.unwrap_or(config.oracle_port);
            let server = OracleServer::bind((config.oracle_host.as_str(), port), model)?;
            println!("Serving on {}", server.local_addr()?);
            server.serve()?;
        }
        Command::Translate {
            table,
            corpus,
            source,
        } => {
            let table = PhraseTable::from_path(&table)?;
            let candidates = match corpus {
                Some(corpus) => {
                    let oracle = LocalOracle::new(train_model(&corpus)?);
                    translate(&table, &source, &config, oracle)?.0
                }
                None => {
                    let client = ScoringClient::connect(
                        &config.oracle_host,
                        config.oracle_port,
                        config.oracle_settings(),
                    )?;
                    let (candidates, client) = translate(&table, &source, &config, client)?;
                    client.shutdown()?;
                    candidates
                }
            };

            for candidate in &candidates {
                println!("{:.4}\t{}", candidate.full_score(), candidate);
            }
        }
    }

    Ok(())
}

fn index_path(
    explicit: Option<PathBuf>,
    config: &Config,
) -> Result<PathBuf, Box<dyn std::error::Error>> {
    explicit
        .or_else(|| config.index_path.clone())
        .ok_or_else(|| "no index path given and none configured".into())
}

fn train_model(corpus: &Path) -> Result<TrigramModel, std::io::Error> {
    let mut model = TrigramModel::new();
    model.train_from_reader(BufReader::new(File::open(corpus)?))?;
    Ok(model)
}

/// Materialize, score and rank every candidate for `source`. Returns the
/// oracle so the caller can shut it down.
fn translate<O: NGramOracle>(
    table: &PhraseTable,
    source: &[String],
    config: &Config,
    oracle: O,
) -> Result<(Vec<TargetPhrase>, O), ScoreError> {
    let aggregator = Aggregator::new(TRANSLATION_PRODUCER, config.input_mode());
    let mut lm = NGramLanguageModel::new(LM_PRODUCER, phrasecore::phrase::SURFACE_FACTOR, oracle);
    let entries = table.translations(source);

    if entries.is_empty() {
        tracing::info!(source = ?source, "unknown source phrase, passing its words through");
        let candidates = aggregator.pass_through(source, config.word_penalty_weight);
        return Ok((candidates, lm.into_oracle()));
    }

    lm.prefetch(entries.iter().map(|e| e.target()))?;

    let mut candidates = Vec::with_capacity(entries.len());
    for entry in entries {
        let mut candidate = entry.materialize();
        let mut models = [WeightedModel::new(&mut lm as &mut dyn LanguageModel, config.lm_weight)];
        aggregator.attach(
            &mut candidate,
            &entry.components(),
            &config.translation_weights,
            config.word_penalty_weight,
            &mut models,
        )?;
        candidates.push(candidate);
    }

    rank(&mut candidates);
    Ok((candidates, lm.into_oracle()))
}
