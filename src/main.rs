use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "po-translator",
    version,
    about = "Fill untranslated entries of a .po file using an LLM chat API"
)]
struct Cli {
    /// Path to the .po file (updated in place)
    input_file: PathBuf,

    /// Target language code (e.g. fr, it)
    #[arg(short = 'l', long = "lang")]
    lang: String,

    /// Model name or provider:model (default: gpt-4o-mini)
    #[arg(short = 'm', long = "model")]
    model: Option<String>,

    /// API key (overrides environment variables)
    #[arg(short = 'k', long = "key")]
    key: Option<String>,

    /// Entries sent per request (default: 10)
    #[arg(short = 'b', long = "batch-size")]
    batch_size: Option<usize>,

    /// Seconds to wait between batches (default: 1)
    #[arg(long = "delay")]
    delay: Option<f64>,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings")]
    read_settings: Option<String>,

    /// Append token usage to output
    #[arg(long = "with-using-tokens")]
    with_using_tokens: bool,

    /// Enable verbose logging
    #[arg(long = "verbose")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = po_translator::logging::init(cli.verbose) {
        eprintln!("Error: {:#}", err);
        return ExitCode::FAILURE;
    }

    let input = cli.input_file.clone();
    let result = po_translator::run(po_translator::Config {
        input: cli.input_file,
        lang: cli.lang,
        model: cli.model,
        key: cli.key,
        batch_size: cli.batch_size,
        delay_secs: cli.delay,
        settings_path: cli.read_settings,
    })
    .await;

    match result {
        Ok(summary) => {
            println!(
                "{}",
                po_translator::format_summary(&summary, &input, cli.with_using_tokens)
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}
