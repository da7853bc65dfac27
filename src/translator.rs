use anyhow::Result;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::providers::{Provider, ProviderResponse, ProviderUsage};
use crate::translations::{self, TranslateOptions};

#[derive(Debug, Clone)]
pub struct Translator<P: Provider> {
    provider: P,
    options: TranslateOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total_entries: usize,
    pub untranslated: usize,
    pub batches: usize,
    pub failed_batches: usize,
    pub translated: usize,
    pub model: Option<String>,
    pub usage: Option<ProviderUsage>,
}

impl<P: Provider> Translator<P> {
    pub fn new(provider: P, options: TranslateOptions) -> Self {
        Self { provider, options }
    }

    pub fn options(&self) -> &TranslateOptions {
        &self.options
    }

    /// Sends one batch as a single request: the system instruction followed by
    /// one user message per source text, in order.
    pub async fn translate_batch(&self, texts: &[String]) -> Result<ProviderResponse> {
        let system_prompt = translations::render_system_prompt(&self.options)?;
        let mut provider = self.provider.clone().append_system_input(system_prompt);
        for text in texts {
            provider = provider.append_user_input(translations::render_user_prompt(
                &self.options,
                text,
            )?);
        }
        provider.complete().await
    }

    /// Translates every untranslated entry of `catalog`, batch by batch.
    ///
    /// The catalog is saved after each batch whether the batch succeeded or
    /// not, so an interrupted run loses at most the batch in flight. A failed
    /// batch is logged and left untranslated; only save errors end the run.
    pub async fn run(&self, catalog: &mut Catalog) -> Result<RunSummary> {
        self.options.validate()?;

        let entries = catalog.untranslated();
        let mut summary = RunSummary {
            total_entries: catalog.len(),
            untranslated: entries.len(),
            batches: self.options.batch_count(entries.len()),
            ..RunSummary::default()
        };

        info!(
            "Translating {} entries to {}...",
            summary.total_entries, self.options.lang
        );
        info!("Found {} untranslated entries.", summary.untranslated);

        for (position, batch) in entries.chunks(self.options.batch_size).enumerate() {
            let number = position + 1;
            info!("Translating batch {} of {}...", number, summary.batches);

            let texts = batch
                .iter()
                .map(|entry| entry.source.clone())
                .collect::<Vec<_>>();

            match self.translate_batch(&texts).await {
                Ok(response) => {
                    let lines = translations::split_translations(&response.text);
                    if lines.len() != batch.len() {
                        warn!(
                            "batch {} returned {} lines for {} entries; assigning by position",
                            number,
                            lines.len(),
                            batch.len()
                        );
                    }
                    let assignments = batch
                        .iter()
                        .zip(lines)
                        .map(|(entry, line)| (entry.index, line))
                        .collect::<Vec<_>>();
                    let applied = catalog.apply(&assignments)?;
                    debug!("batch {} assigned {} translations", number, applied);

                    summary.translated += applied;
                    if response.model.is_some() {
                        summary.model = response.model;
                    }
                    if let Some(usage) = response.usage {
                        summary
                            .usage
                            .get_or_insert_with(ProviderUsage::default)
                            .accumulate(&usage);
                    }
                }
                Err(err) => {
                    summary.failed_batches += 1;
                    warn!("Error translating batch {:?}. Error: {:#}", texts, err);
                }
            }

            catalog.save()?;
            info!("Batch {} saved to file.", number);

            if number < summary.batches && !self.options.delay.is_zero() {
                sleep(self.options.delay).await;
            }
        }

        Ok(summary)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::catalog::tests::{translations_on_disk, write_po};
    use crate::providers::ProviderFuture;
    use anyhow::anyhow;
    use std::collections::VecDeque;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::tempdir;

    #[derive(Debug, Clone)]
    pub(crate) struct RecordedCall {
        pub(crate) system: Vec<String>,
        pub(crate) users: Vec<String>,
        pub(crate) on_disk: Option<Vec<(String, String)>>,
    }

    /// Replays scripted replies in order and records every request it sees.
    #[derive(Debug, Clone, Default)]
    pub(crate) struct ScriptedProvider {
        system: Vec<String>,
        users: Vec<String>,
        replies: Arc<Mutex<VecDeque<Result<String, String>>>>,
        calls: Arc<Mutex<Vec<RecordedCall>>>,
        watch: Option<PathBuf>,
    }

    impl ScriptedProvider {
        pub(crate) fn new(replies: Vec<Result<&str, &str>>) -> Self {
            let replies = replies
                .into_iter()
                .map(|reply| reply.map(str::to_string).map_err(str::to_string))
                .collect();
            Self {
                replies: Arc::new(Mutex::new(replies)),
                ..Self::default()
            }
        }

        /// Snapshot the catalog at `path` whenever a request is made.
        pub(crate) fn watching(mut self, path: &Path) -> Self {
            self.watch = Some(path.to_path_buf());
            self
        }

        pub(crate) fn calls(&self) -> Vec<RecordedCall> {
            self.calls.lock().expect("calls lock").clone()
        }
    }

    impl Provider for ScriptedProvider {
        fn append_system_input(mut self, input: String) -> Self {
            self.system.push(input);
            self
        }

        fn append_user_input(mut self, input: String) -> Self {
            self.users.push(input);
            self
        }

        fn complete(self) -> ProviderFuture {
            let on_disk = self.watch.as_deref().map(translations_on_disk);
            self.calls.lock().expect("calls lock").push(RecordedCall {
                system: self.system.clone(),
                users: self.users.clone(),
                on_disk,
            });
            let reply = self
                .replies
                .lock()
                .expect("replies lock")
                .pop_front()
                .unwrap_or_else(|| Err("no scripted reply left".to_string()));
            Box::pin(async move {
                let text = reply.map_err(|err| anyhow!(err))?;
                Ok(ProviderResponse {
                    text,
                    model: Some("scripted-model".to_string()),
                    usage: Some(ProviderUsage {
                        prompt_tokens: Some(10),
                        completion_tokens: Some(2),
                        total_tokens: Some(12),
                    }),
                })
            })
        }
    }

    fn options(lang: &str, batch_size: usize) -> TranslateOptions {
        TranslateOptions {
            lang: lang.to_string(),
            batch_size,
            delay: Duration::ZERO,
        }
    }

    fn owned(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(source, translation)| (source.to_string(), translation.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn translates_whole_catalog_in_one_batch() {
        let dir = tempdir().expect("tempdir");
        let path = write_po(dir.path(), &[("Hello", ""), ("Goodbye", ""), ("Yes", "")]);
        let provider = ScriptedProvider::new(vec![Ok("Bonjour\nAu revoir\nOui")]);
        let translator = Translator::new(provider.clone(), options("fr", 10));

        let mut catalog = Catalog::load(&path).unwrap();
        let summary = translator.run(&mut catalog).await.unwrap();

        let calls = provider.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].system,
            vec!["You are a helpful assistant who translates text into fr."]
        );
        assert_eq!(
            calls[0].users,
            vec![
                "Translate to fr: Hello",
                "Translate to fr: Goodbye",
                "Translate to fr: Yes"
            ]
        );
        assert_eq!(
            translations_on_disk(&path),
            owned(&[("Hello", "Bonjour"), ("Goodbye", "Au revoir"), ("Yes", "Oui")])
        );
        assert_eq!(summary.batches, 1);
        assert_eq!(summary.translated, 3);
        assert_eq!(summary.failed_batches, 0);
        assert_eq!(summary.model.as_deref(), Some("scripted-model"));
        assert_eq!(summary.usage.and_then(|usage| usage.total_tokens), Some(12));
    }

    #[tokio::test]
    async fn failed_batch_keeps_entries_untranslated() {
        let dir = tempdir().expect("tempdir");
        let path = write_po(dir.path(), &[("Hello", ""), ("Goodbye", ""), ("Yes", "")]);
        let provider = ScriptedProvider::new(vec![Err("OpenAI API error (500)")]);
        let translator = Translator::new(provider.clone(), options("fr", 10));

        let mut catalog = Catalog::load(&path).unwrap();
        let summary = translator.run(&mut catalog).await.unwrap();

        assert_eq!(provider.calls().len(), 1);
        assert_eq!(summary.failed_batches, 1);
        assert_eq!(summary.translated, 0);
        assert_eq!(
            translations_on_disk(&path),
            owned(&[("Hello", ""), ("Goodbye", ""), ("Yes", "")])
        );
    }

    #[tokio::test]
    async fn batches_cover_entries_in_order() {
        let dir = tempdir().expect("tempdir");
        let sources = (1..=23).map(|n| format!("Message {}", n)).collect::<Vec<_>>();
        let messages = sources
            .iter()
            .map(|source| (source.as_str(), ""))
            .collect::<Vec<_>>();
        let path = write_po(dir.path(), &messages);

        let replies = sources
            .chunks(10)
            .map(|chunk| {
                chunk
                    .iter()
                    .map(|source| format!("{} (it)", source))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .collect::<Vec<_>>();
        let provider = ScriptedProvider::new(replies.iter().map(|r| Ok(r.as_str())).collect());
        let translator = Translator::new(provider.clone(), options("it", 10));

        let mut catalog = Catalog::load(&path).unwrap();
        let summary = translator.run(&mut catalog).await.unwrap();

        let calls = provider.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(summary.batches, 3);
        for (call, chunk) in calls.iter().zip(sources.chunks(10)) {
            let expected = chunk
                .iter()
                .map(|source| format!("Translate to it: {}", source))
                .collect::<Vec<_>>();
            assert_eq!(call.users, expected);
        }
        assert_eq!(calls[2].users.len(), 3);
        assert_eq!(summary.translated, 23);
        let on_disk = translations_on_disk(&path);
        assert_eq!(on_disk[22], ("Message 23".to_string(), "Message 23 (it)".to_string()));
    }

    #[tokio::test]
    async fn failure_is_isolated_to_its_batch() {
        let dir = tempdir().expect("tempdir");
        let path = write_po(
            dir.path(),
            &[("One", ""), ("Two", ""), ("Three", ""), ("Four", ""), ("Five", "")],
        );
        let provider = ScriptedProvider::new(vec![
            Ok("Un\nDeux"),
            Err("connection reset"),
            Ok("Cinq"),
        ]);
        let translator = Translator::new(provider.clone(), options("fr", 2));

        let mut catalog = Catalog::load(&path).unwrap();
        let summary = translator.run(&mut catalog).await.unwrap();

        assert_eq!(provider.calls().len(), 3);
        assert_eq!(summary.failed_batches, 1);
        assert_eq!(summary.translated, 3);
        assert_eq!(
            translations_on_disk(&path),
            owned(&[
                ("One", "Un"),
                ("Two", "Deux"),
                ("Three", ""),
                ("Four", ""),
                ("Five", "Cinq")
            ])
        );
    }

    #[tokio::test]
    async fn progress_is_on_disk_before_next_batch() {
        let dir = tempdir().expect("tempdir");
        let path = write_po(dir.path(), &[("One", ""), ("Two", ""), ("Three", "")]);
        let provider =
            ScriptedProvider::new(vec![Ok("Uno"), Err("rate limited"), Ok("Tre")]).watching(&path);
        let translator = Translator::new(provider.clone(), options("it", 1));

        let mut catalog = Catalog::load(&path).unwrap();
        translator.run(&mut catalog).await.unwrap();

        let snapshots = provider
            .calls()
            .into_iter()
            .map(|call| call.on_disk.expect("snapshot"))
            .collect::<Vec<_>>();
        assert_eq!(
            snapshots,
            vec![
                owned(&[("One", ""), ("Two", ""), ("Three", "")]),
                owned(&[("One", "Uno"), ("Two", ""), ("Three", "")]),
                owned(&[("One", "Uno"), ("Two", ""), ("Three", "")]),
            ]
        );
        assert_eq!(
            translations_on_disk(&path),
            owned(&[("One", "Uno"), ("Two", ""), ("Three", "Tre")])
        );
    }

    #[tokio::test]
    async fn translated_entries_are_never_sent_or_changed() {
        let dir = tempdir().expect("tempdir");
        let path = write_po(
            dir.path(),
            &[("Open", "Ouvrir"), ("Save", ""), ("Quit", "Quitter"), ("Help", "")],
        );
        let provider = ScriptedProvider::new(vec![Ok("Enregistrer\nAide")]);
        let translator = Translator::new(provider.clone(), options("fr", 10));

        let mut catalog = Catalog::load(&path).unwrap();
        let summary = translator.run(&mut catalog).await.unwrap();

        assert_eq!(summary.total_entries, 4);
        assert_eq!(summary.untranslated, 2);
        assert_eq!(
            provider.calls()[0].users,
            vec!["Translate to fr: Save", "Translate to fr: Help"]
        );
        assert_eq!(
            translations_on_disk(&path),
            owned(&[
                ("Open", "Ouvrir"),
                ("Save", "Enregistrer"),
                ("Quit", "Quitter"),
                ("Help", "Aide")
            ])
        );
    }

    #[tokio::test]
    async fn short_reply_fills_leading_entries_only() {
        let dir = tempdir().expect("tempdir");
        let path = write_po(dir.path(), &[("Hello", ""), ("Goodbye", ""), ("Yes", "")]);
        let provider = ScriptedProvider::new(vec![Ok("  Bonjour  \nAu revoir\n")]);
        let translator = Translator::new(provider.clone(), options("fr", 10));

        let mut catalog = Catalog::load(&path).unwrap();
        let summary = translator.run(&mut catalog).await.unwrap();

        assert_eq!(summary.translated, 2);
        assert_eq!(
            translations_on_disk(&path),
            owned(&[("Hello", "Bonjour"), ("Goodbye", "Au revoir"), ("Yes", "")])
        );
    }

    #[tokio::test]
    async fn nothing_to_translate_makes_no_calls() {
        let dir = tempdir().expect("tempdir");
        let path = write_po(dir.path(), &[("Open", "Ouvrir")]);
        let provider = ScriptedProvider::new(Vec::new());
        let translator = Translator::new(provider.clone(), options("fr", 10));

        let mut catalog = Catalog::load(&path).unwrap();
        let summary = translator.run(&mut catalog).await.unwrap();

        assert!(provider.calls().is_empty());
        assert_eq!(summary.batches, 0);
        assert_eq!(summary.untranslated, 0);
    }

    #[tokio::test]
    async fn zero_batch_size_is_rejected_before_any_call() {
        let dir = tempdir().expect("tempdir");
        let path = write_po(dir.path(), &[("Hello", "")]);
        let provider = ScriptedProvider::new(vec![Ok("Bonjour")]);
        let translator = Translator::new(provider.clone(), options("fr", 0));

        let mut catalog = Catalog::load(&path).unwrap();
        assert!(translator.run(&mut catalog).await.is_err());
        assert!(provider.calls().is_empty());
    }
}
