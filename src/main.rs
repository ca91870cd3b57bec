use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use candle_core::{Device, Tensor};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use lm_decoder::{
    DecoderConfig, Error, Fusion, LmDecoder, Result, ScoredSequence, TokenId, Vocabulary,
};

#[derive(Parser, Debug)]
#[command(name = "lm-decoder")]
#[command(about = "N-gram language-model rescoring and LM-guided beam search")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Score complete target sequences
    Score(CommonArgs),
    /// Beam search over per-step distributions
    Search {
        #[command(flatten)]
        common: CommonArgs,

        /// Hypotheses kept per step
        #[arg(long)]
        beam_size: Option<usize>,

        /// Candidates considered per step
        #[arg(long)]
        short_list: Option<usize>,

        /// Score fusion policy (shallow, mixture, normalized)
        #[arg(long)]
        fusion: Option<String>,
    },
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// ARPA language model
    #[arg(short, long)]
    model: PathBuf,

    /// Vocabulary file, one token per line
    #[arg(long)]
    vocab: PathBuf,

    /// JSON batch file
    #[arg(short, long)]
    input: PathBuf,

    /// Decoder configuration (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Worker threads
    #[arg(short, long)]
    workers: Option<usize>,
}

/// `{"targets": [[...]], "masks": [[...]]}`; masks default to all valid.
#[derive(Deserialize)]
struct ScoreRequest {
    targets: Vec<Vec<TokenId>>,
    #[serde(default)]
    masks: Option<Vec<Vec<u8>>>,
}

/// `{"probs": [[[...]]], "gates": [[...]], "masks": [[...]]}`.
#[derive(Deserialize)]
struct SearchRequest {
    probs: Vec<Vec<Vec<f32>>>,
    gates: Vec<Vec<f32>>,
    #[serde(default)]
    masks: Option<Vec<Vec<u8>>>,
}

#[derive(Serialize)]
struct ScoreResponse {
    scores: Vec<Vec<f32>>,
}

#[derive(Serialize)]
struct DecodedElement {
    tokens: Vec<TokenId>,
    words: Vec<String>,
    score: f32,
    nbest: Vec<ScoredSequence>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Score(args) => {
            let (decoder, workers) = open(&args, None)?;
            let request: ScoreRequest = read_json(&args.input)?;

            let (batch_size, seq_len, targets) = matrix("targets", request.targets)?;
            let masks = masks_or_full(request.masks, batch_size, seq_len)?;
            let device = Device::Cpu;
            let targets = Tensor::from_vec(targets, (batch_size, seq_len), &device)?;
            let masks = Tensor::from_vec(masks, (batch_size, seq_len), &device)?;

            let scores = decoder.language_model_scores(&targets, &masks, workers)?;
            print_json(&ScoreResponse {
                scores: scores.to_vec2::<f32>()?,
            })
        }
        Command::Search {
            common,
            beam_size,
            short_list,
            fusion,
        } => {
            let fusion = fusion.map(|f| f.parse::<Fusion>()).transpose()?;
            let (decoder, workers) = open(&common, fusion)?;
            let search = &decoder.config().search;
            let beam_size = beam_size.unwrap_or(search.beam_size);
            let short_list = short_list.unwrap_or(search.short_list);

            let request: SearchRequest = read_json(&common.input)?;
            let batch_size = request.probs.len();
            let (_, seq_len, gates) = matrix("gates", request.gates)?;
            let steps: Vec<Vec<f32>> = request.probs.into_iter().flatten().collect();
            let (steps, vocab_size, probs) = matrix("probs", steps)?;
            if steps != batch_size * seq_len {
                return Err(Error::ShapeMismatch {
                    name: "probs",
                    expected: format!("{batch_size} x {seq_len} steps"),
                    actual: format!("{steps} steps"),
                });
            }
            let masks = masks_or_full(request.masks, batch_size, seq_len)?;

            let device = Device::Cpu;
            let probs = Tensor::from_vec(probs, (batch_size, seq_len, vocab_size), &device)?;
            let gates = Tensor::from_vec(gates, (batch_size, seq_len), &device)?;
            let masks = Tensor::from_vec(masks, (batch_size, seq_len), &device)?;

            let decoded = decoder.beam_search_with_language_model(
                &probs, &gates, &masks, short_list, beam_size, workers,
            )?;

            let vocab = decoder.language_model().vocab();
            let elements: Vec<DecodedElement> = decoded
                .nbest
                .into_results()
                .into_iter()
                .map(|result| {
                    let best = result.best().clone();
                    DecodedElement {
                        words: words(vocab, &best.tokens),
                        tokens: best.tokens,
                        score: best.score,
                        nbest: result.hypotheses().to_vec(),
                    }
                })
                .collect();
            print_json(&elements)
        }
    }
}

fn open(args: &CommonArgs, fusion: Option<Fusion>) -> Result<(LmDecoder, usize)> {
    let mut config = match &args.config {
        Some(path) => DecoderConfig::from_json_file(path)?,
        None => DecoderConfig::default(),
    };
    if let Some(fusion) = fusion {
        config.search.fusion = fusion;
    }
    let workers = args.workers.unwrap_or(config.pool.workers);
    let vocab = read_vocab(&args.vocab)?;
    info!(model = %args.model.display(), tokens = vocab.len(), "loading decoder");

    let decoder = LmDecoder::load(&args.model, vocab, config)?;
    Ok((decoder, workers))
}

/// First whitespace-separated field of every non-blank line.
fn read_vocab(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)?;
    Ok(content
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect())
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Flatten rectangular rows into `(rows, columns, data)`.
fn matrix<T>(name: &'static str, rows: Vec<Vec<T>>) -> Result<(usize, usize, Vec<T>)> {
    let height = rows.len();
    let width = rows.first().map_or(0, Vec::len);
    if let Some(row) = rows.iter().find(|row| row.len() != width) {
        return Err(Error::ShapeMismatch {
            name,
            expected: format!("rows of length {width}"),
            actual: format!("row of length {}", row.len()),
        });
    }
    Ok((height, width, rows.into_iter().flatten().collect()))
}

fn masks_or_full(
    masks: Option<Vec<Vec<u8>>>,
    batch_size: usize,
    seq_len: usize,
) -> Result<Vec<u8>> {
    match masks {
        Some(rows) => {
            let (height, width, flat) = matrix("masks", rows)?;
            if (height, width) != (batch_size, seq_len) {
                return Err(Error::ShapeMismatch {
                    name: "masks",
                    expected: format!("({batch_size}, {seq_len})"),
                    actual: format!("({height}, {width})"),
                });
            }
            Ok(flat)
        }
        None => Ok(vec![1; batch_size * seq_len]),
    }
}

fn words(vocab: &Vocabulary, tokens: &[TokenId]) -> Vec<String> {
    tokens
        .iter()
        .map(|&id| vocab.token(id).unwrap_or("<unk>").to_string())
        .collect()
}
