use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;

pub mod catalog;
pub mod logging;
pub mod providers;
pub mod settings;
mod test_util;
pub mod translations;
mod translator;

pub use catalog::{Catalog, Entry};
pub use providers::{Claude, Gemini, OpenAI, Provider, ProviderKind, ProviderUsage};
pub use translations::TranslateOptions;
pub use translator::{RunSummary, Translator};

#[derive(Debug, Clone)]
pub struct Config {
    pub input: PathBuf,
    pub lang: String,
    pub model: Option<String>,
    pub key: Option<String>,
    pub batch_size: Option<usize>,
    pub delay_secs: Option<f64>,
    pub settings_path: Option<String>,
}

/// Resolves settings, provider and credential, then translates `config.input`
/// in place. The credential is resolved once here and handed to the client.
pub async fn run(config: Config) -> Result<RunSummary> {
    catalog::validate_input_path(&config.input)?;

    let settings_path = config.settings_path.as_deref().map(Path::new);
    let settings = settings::load_settings(settings_path)?;
    let options = translate_options(&config, &settings)?;

    let model_arg = config.model.as_deref().unwrap_or(&settings.model);
    let selection = providers::parse_model_arg(model_arg)?;
    let key = providers::resolve_key(selection.provider, config.key.as_deref())
        .with_context(|| "no API key found for selected provider")?;
    info!(
        "Using {} model {}",
        selection.provider.as_str(),
        selection.model
    );

    let provider = providers::build_provider(&selection, key);
    translate_file(&config.input, provider, options).await
}

/// Loads the catalog at `input` and runs the batch loop over it with `provider`.
pub async fn translate_file<P: Provider>(
    input: &Path,
    provider: P,
    options: TranslateOptions,
) -> Result<RunSummary> {
    catalog::validate_input_path(input)?;
    options.validate()?;
    let mut catalog = Catalog::load(input)?;
    Translator::new(provider, options).run(&mut catalog).await
}

fn translate_options(config: &Config, settings: &settings::Settings) -> Result<TranslateOptions> {
    let delay = match config.delay_secs {
        Some(secs) => settings::parse_delay(secs)?,
        None => settings.delay,
    };
    let options = TranslateOptions {
        lang: config.lang.trim().to_string(),
        batch_size: config.batch_size.unwrap_or(settings.batch_size),
        delay,
    };
    options.validate()?;
    Ok(options)
}

pub fn format_summary(summary: &RunSummary, path: &Path, with_using_tokens: bool) -> String {
    let mut lines = Vec::new();
    if summary.failed_batches > 0 {
        lines.push(format!(
            "{} of {} batches failed; their entries were left untranslated.",
            summary.failed_batches, summary.batches
        ));
    }
    lines.push(format!(
        "Translation completed and saved to {}.",
        path.display()
    ));
    if with_using_tokens {
        lines.push(format_usage(summary.usage.as_ref()));
    }
    lines.join("\n")
}

fn format_usage(usage: Option<&ProviderUsage>) -> String {
    let Some(usage) = usage else {
        return "tokens: unavailable".to_string();
    };

    let mut parts = Vec::new();
    if let Some(prompt) = usage.prompt_tokens {
        parts.push(format!("prompt={}", prompt));
    }
    if let Some(completion) = usage.completion_tokens {
        parts.push(format!("completion={}", completion));
    }
    if let Some(total) = usage.total() {
        parts.push(format!("total={}", total));
    }

    if parts.is_empty() {
        "tokens: unavailable".to_string()
    } else {
        format!("tokens: {}", parts.join(", "))
    }
}
