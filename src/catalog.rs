use anyhow::{anyhow, bail, Context, Result};
use polib::message::{MessageMutView, MessageView};
use polib::po_file;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

pub const CATALOG_EXTENSION: &str = "po";

/// Header handed to the parser when a file starts straight with messages.
/// It is never written back.
const FALLBACK_HEADER: &str = "msgid \"\"\nmsgstr \"Content-Type: text/plain; charset=UTF-8\\n\"\n\n";

/// One singular message of a catalog. `index` is the message's position in
/// catalog order and is what [`Catalog::apply`] addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub index: usize,
    pub source: String,
    pub translation: String,
}

impl Entry {
    pub fn is_untranslated(&self) -> bool {
        !self.source.is_empty() && self.translation.is_empty()
    }
}

/// A gettext catalog bound to the file it was loaded from.
///
/// Messages are read through `polib`, but saving rewrites the original text:
/// only the msgstr lines of messages filled by [`Catalog::apply`] change.
#[derive(Debug, Clone)]
pub struct Catalog {
    inner: polib::catalog::Catalog,
    layout: Layout,
    filled: BTreeMap<usize, String>,
    path: PathBuf,
}

impl Catalog {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read PO file: {}", path.display()))?;
        let layout = Layout::scan(&text);

        let parsed = if layout.has_header {
            po_file::parse_from_reader(text.as_bytes())
        } else {
            let padded = format!("{FALLBACK_HEADER}{text}");
            po_file::parse_from_reader(padded.as_bytes())
        };
        let inner = parsed
            .map_err(|err| anyhow!("{err}"))
            .with_context(|| format!("failed to parse PO file: {}", path.display()))?;

        if inner.count() != layout.msgstr_spans.len() {
            bail!(
                "failed to parse PO file: {}: duplicate message definitions",
                path.display()
            );
        }

        Ok(Self {
            inner,
            layout,
            filled: BTreeMap::new(),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of messages, plural ones included.
    pub fn len(&self) -> usize {
        self.inner.count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Singular messages in catalog order. Plural messages carry no single
    /// msgstr and are left out.
    pub fn entries(&self) -> Vec<Entry> {
        self.inner
            .messages()
            .enumerate()
            .filter(|(_, message)| message.is_singular())
            .filter_map(|(index, message)| {
                let translation = message.msgstr().ok()?;
                Some(Entry {
                    index,
                    source: message.msgid().to_string(),
                    translation: translation.to_string(),
                })
            })
            .collect()
    }

    pub fn untranslated(&self) -> Vec<Entry> {
        self.entries()
            .into_iter()
            .filter(Entry::is_untranslated)
            .collect()
    }

    /// Writes translations in one pass over the catalog. Entries that already
    /// hold a translation keep it. Returns how many entries gained one.
    pub fn apply(&mut self, translations: &[(usize, String)]) -> Result<usize> {
        let mut pending: HashMap<usize, &str> = translations
            .iter()
            .filter(|(_, text)| !text.is_empty())
            .map(|(index, text)| (*index, text.as_str()))
            .collect();
        if pending.is_empty() {
            return Ok(0);
        }

        let mut applied = 0;
        for (index, mut message) in self.inner.messages_mut().enumerate() {
            let Some(text) = pending.remove(&index) else {
                continue;
            };
            let current = message
                .msgstr()
                .map_err(|_| anyhow!("message {} is plural and has no single msgstr", index))?;
            if !current.is_empty() {
                continue;
            }
            message
                .set_msgstr(text.to_string())
                .map_err(|_| anyhow!("message {} is plural and has no single msgstr", index))?;
            self.filled.insert(index, text.to_string());
            applied += 1;
        }

        if let Some(index) = pending.keys().min() {
            return Err(anyhow!("no message at index {} in catalog", index));
        }
        Ok(applied)
    }

    pub fn save(&self) -> Result<()> {
        fs::write(&self.path, self.layout.render(&self.filled))
            .with_context(|| format!("failed to write PO file: {}", self.path.display()))
    }
}

/// The original file text plus, for every parsed message, the line range
/// holding its msgstr. A message without a msgstr line gets an empty range at
/// the end of its block.
#[derive(Debug, Clone)]
struct Layout {
    lines: Vec<String>,
    has_header: bool,
    msgstr_spans: Vec<Range<usize>>,
}

#[derive(Clone, Copy)]
enum Field {
    None,
    Msgid,
    Msgstr,
    Other,
}

#[derive(Default)]
struct Block {
    parsed: bool,
    msgid: String,
    msgstr: String,
    msgstr_span: Option<Range<usize>>,
    end: usize,
}

impl Layout {
    /// Splits the text into blank-line separated blocks the same way the
    /// parser does: a block becomes a message once it has a keyword, a quoted
    /// continuation or a `# `, `#. `, `#: `, `#, ` comment. `#~` and `#|`
    /// lines never make one.
    fn scan(text: &str) -> Self {
        let lines: Vec<String> = text.split_inclusive('\n').map(str::to_string).collect();
        let mut blocks = Vec::new();
        let mut block = Block::default();
        let mut field = Field::None;

        for (number, line) in lines.iter().enumerate() {
            let content = line.trim_end_matches(['\n', '\r']);
            if content.is_empty() {
                let finished = std::mem::take(&mut block);
                if finished.parsed {
                    blocks.push(finished);
                }
                field = Field::None;
                continue;
            }
            block.end = number + 1;

            if content.starts_with('#') {
                if ["# ", "#. ", "#: ", "#, "]
                    .iter()
                    .any(|prefix| content.starts_with(prefix))
                {
                    block.parsed = true;
                    field = Field::None;
                }
            } else if let Some(rest) = content.strip_prefix("msgid ") {
                block.parsed = true;
                field = Field::Msgid;
                block.msgid.push_str(unquote(rest));
            } else if let Some(rest) = content.strip_prefix("msgstr ") {
                block.parsed = true;
                field = Field::Msgstr;
                block.msgstr.push_str(unquote(rest));
                block.msgstr_span = Some(number..number + 1);
            } else if content.starts_with("msg") {
                block.parsed = true;
                field = Field::Other;
            } else if content.starts_with('"') {
                block.parsed = true;
                match field {
                    Field::Msgid => block.msgid.push_str(unquote(content)),
                    Field::Msgstr => {
                        block.msgstr.push_str(unquote(content));
                        if let Some(span) = block.msgstr_span.as_mut() {
                            span.end = number + 1;
                        }
                    }
                    Field::None | Field::Other => {}
                }
            }
        }
        if block.parsed {
            blocks.push(block);
        }

        let has_header = blocks
            .first()
            .is_some_and(|first| first.msgid.is_empty() && !first.msgstr.is_empty());
        let msgstr_spans = blocks
            .into_iter()
            .skip(usize::from(has_header))
            .map(|block| block.msgstr_span.unwrap_or(block.end..block.end))
            .collect();

        Self {
            lines,
            has_header,
            msgstr_spans,
        }
    }

    /// Original text with the msgstr of each filled message replaced.
    fn render(&self, filled: &BTreeMap<usize, String>) -> String {
        let mut out = String::new();
        let mut next_line = 0;
        for (index, text) in filled {
            let Some(span) = self.msgstr_spans.get(*index) else {
                continue;
            };
            for line in &self.lines[next_line..span.start] {
                out.push_str(line);
            }

            let eol = self
                .lines
                .get(span.start)
                .filter(|line| line.ends_with("\r\n"))
                .map_or("\n", |_| "\r\n");
            if !out.is_empty() && !out.ends_with('\n') {
                out.push_str(eol);
            }
            let mut replacement = msgstr_lines(text, eol);
            let ends_file = span.end == self.lines.len()
                && self.lines.last().is_some_and(|line| !line.ends_with('\n'));
            if ends_file {
                replacement.truncate(replacement.len() - eol.len());
            }
            out.push_str(&replacement);
            next_line = span.end;
        }
        for line in &self.lines[next_line..] {
            out.push_str(line);
        }
        out
    }
}

fn unquote(quoted: &str) -> &str {
    let quoted = quoted.trim();
    quoted
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or("")
}

/// Formats a msgstr the way gettext tools do: one line, or an empty first
/// line followed by one quoted line per embedded newline.
fn msgstr_lines(text: &str, eol: &str) -> String {
    let segments: Vec<&str> = text.split_inclusive('\n').collect();
    if segments.len() <= 1 {
        return format!("msgstr \"{}\"{eol}", escape(text));
    }
    let mut out = format!("msgstr \"\"{eol}");
    for segment in segments {
        out.push_str(&format!("\"{}\"{eol}", escape(segment)));
    }
    out
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Checks the input path before anything touches the filesystem contents:
/// the extension first, then existence.
pub fn validate_input_path(path: &Path) -> Result<()> {
    let has_extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext == CATALOG_EXTENSION)
        .unwrap_or(false);
    if !has_extension {
        return Err(anyhow!(
            "only .po files are supported (got '{}')",
            path.display()
        ));
    }
    if !path.exists() {
        return Err(anyhow!("file '{}' does not exist", path.display()));
    }
    Ok(())
}
