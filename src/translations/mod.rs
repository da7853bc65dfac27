use anyhow::{anyhow, Context, Result};
use std::time::Duration;
use tera::{Context as TeraContext, Tera};

const SYSTEM_PROMPT_TEMPLATE: &str = include_str!("prompts/system_prompt.tera");
const USER_PROMPT_TEMPLATE: &str = include_str!("prompts/user_prompt.tera");

pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct TranslateOptions {
    pub lang: String,
    pub batch_size: usize,
    pub delay: Duration,
}

impl TranslateOptions {
    pub fn new(lang: impl Into<String>) -> Self {
        Self {
            lang: lang.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            delay: DEFAULT_DELAY,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.lang.trim().is_empty() {
            return Err(anyhow!("target language is empty"));
        }
        if self.batch_size == 0 {
            return Err(anyhow!("batch size must be greater than zero"));
        }
        Ok(())
    }

    /// Number of remote calls needed for `total` entries.
    pub fn batch_count(&self, total: usize) -> usize {
        if self.batch_size == 0 {
            return 0;
        }
        total.div_ceil(self.batch_size)
    }
}

pub fn render_system_prompt(options: &TranslateOptions) -> Result<String> {
    let mut context = TeraContext::new();
    context.insert("target_lang", options.lang.trim());
    render(SYSTEM_PROMPT_TEMPLATE, &context).with_context(|| "failed to render system prompt")
}

pub fn render_user_prompt(options: &TranslateOptions, text: &str) -> Result<String> {
    let mut context = TeraContext::new();
    context.insert("target_lang", options.lang.trim());
    context.insert("text", text);
    render(USER_PROMPT_TEMPLATE, &context).with_context(|| "failed to render user prompt")
}

fn render(template: &str, context: &TeraContext) -> Result<String> {
    // Drop the template file's final newline, never the rendered text's.
    let template = template.trim_end_matches(['\r', '\n']);
    Ok(Tera::one_off(template, context, false)?)
}

/// Splits a combined reply into one translation per line, in order.
///
/// Lines are matched to requested texts by position only; a reply with fewer
/// lines than requested leaves the trailing entries without a translation.
pub fn split_translations(reply: &str) -> Vec<String> {
    reply
        .split('\n')
        .map(|line| line.trim().to_string())
        .collect()
}
