//! Locale-specific text transforms applied to titles and excerpts.
//!
//! None of the quote/dash transforms are idempotent in general. Apply each one
//! exactly once per field.

use std::collections::HashSet;

use once_cell::sync::OnceCell;
use regex::Regex;

/// AP-style minor words kept lowercase unless they open or close a title.
pub const DEFAULT_MINOR_WORDS: &[&str] = &[
    "a", "an", "and", "at", "but", "by", "for", "in", "nor", "of", "on", "or", "so", "the", "to",
    "up", "yet",
];

fn separator_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r#"\s+|[-\u{2010}-\u{2015},:;!?.()\[\]/"\u{201C}\u{201D}]"#).unwrap())
}

/// Keep only `[A-Za-z0-9_ \-.!?]`, collapse space runs, trim, and cap at
/// `max_length - 1` characters.
pub fn sanitize_free_text(input: &str, max_length: usize) -> String {
    let kept: String = input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | ' ' | '-' | '.' | '!' | '?'))
        .collect();
    let collapsed = kept.split(' ').filter(|s| !s.is_empty()).collect::<Vec<_>>().join(" ");
    collapsed.chars().take(max_length.saturating_sub(1)).collect()
}

/// Split a comma-separated reasons string into sanitized, non-empty entries.
pub fn parse_csv_reasons(csv: Option<&str>, max_length: usize) -> Vec<String> {
    let Some(csv) = csv else {
        return Vec::new();
    };
    csv.split(',')
        .map(|token| sanitize_free_text(token, max_length))
        .filter(|token| !token.is_empty())
        .collect()
}

pub fn capitalize(value: Option<&str>) -> String {
    let Some(value) = value else {
        return String::new();
    };
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => {
            let mut out = String::with_capacity(value.len());
            out.extend(first.to_uppercase());
            out.push_str(chars.as_str());
            out
        }
        None => String::new(),
    }
}

// Leading apostrophes and single quotes stay in place; the letter after them is uppercased.
fn capitalize_word(word: &str) -> String {
    let quoted = word
        .char_indices()
        .find(|(_, c)| !matches!(c, '\'' | '\u{2018}' | '\u{2019}'))
        .map_or(word.len(), |(i, _)| i);
    let (lead, rest) = word.split_at(quoted);
    format!("{lead}{}", capitalize(Some(rest)))
}

/// AP title casing with a configurable minor-word stoplist.
#[derive(Debug, Clone)]
pub struct TitleCaser {
    minor_words: HashSet<String>,
}

impl Default for TitleCaser {
    fn default() -> Self {
        Self::new(DEFAULT_MINOR_WORDS.iter().copied())
    }
}

enum Piece<'a> {
    Word(&'a str),
    Separator(&'a str),
}

impl TitleCaser {
    pub fn new<I, S>(minor_words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            minor_words: minor_words
                .into_iter()
                .map(|w| w.as_ref().trim().to_lowercase())
                .filter(|w| !w.is_empty())
                .collect(),
        }
    }

    pub fn is_minor(&self, word: &str) -> bool {
        self.minor_words.contains(&word.to_lowercase())
    }

    /// Returns `None` for empty input. Separators are preserved byte for byte.
    pub fn apply(&self, value: &str) -> Option<String> {
        if value.is_empty() {
            return None;
        }

        let mut pieces = Vec::new();
        let mut last = 0;
        for m in separator_re().find_iter(value) {
            if m.start() > last {
                pieces.push(Piece::Word(&value[last..m.start()]));
            }
            pieces.push(Piece::Separator(m.as_str()));
            last = m.end();
        }
        if last < value.len() {
            pieces.push(Piece::Word(&value[last..]));
        }

        let word_positions: Vec<usize> = pieces
            .iter()
            .enumerate()
            .filter_map(|(i, p)| matches!(p, Piece::Word(_)).then_some(i))
            .collect();
        let first = word_positions.first().copied();
        let last_word = word_positions.last().copied();

        let mut out = String::with_capacity(value.len());
        for (i, piece) in pieces.iter().enumerate() {
            match piece {
                Piece::Separator(s) => out.push_str(s),
                Piece::Word(w) => {
                    let edge = Some(i) == first || Some(i) == last_word;
                    if !edge && self.is_minor(w) {
                        out.push_str(&w.to_lowercase());
                    } else {
                        out.push_str(&capitalize_word(w));
                    }
                }
            }
        }
        Some(out)
    }
}

/// [`TitleCaser::apply`] with the default stoplist.
pub fn apply_title_case(value: &str) -> Option<String> {
    static CASER: OnceCell<TitleCaser> = OnceCell::new();
    CASER.get_or_init(TitleCaser::default).apply(value)
}

/// Swap ASCII quotes for English curly quotes.
///
/// A quote is opening when it follows the start of the string, whitespace, a
/// dash, a slash, an opening bracket, or an opening quote of the other kind.
pub fn format_quotes_en(value: &str) -> Option<String> {
    static OPEN_DOUBLE: OnceCell<Regex> = OnceCell::new();
    static OPEN_SINGLE: OnceCell<Regex> = OnceCell::new();
    if value.is_empty() {
        return None;
    }
    let open_double = OPEN_DOUBLE.get_or_init(|| {
        Regex::new(r#"(^|[-\u{2010}-\u{2015}/(\[{\u{2018}\s])""#).unwrap()
    });
    let open_single = OPEN_SINGLE.get_or_init(|| {
        Regex::new(r#"(^|[-\u{2010}-\u{2015}/(\[{\u{201C}\s])'"#).unwrap()
    });

    let out = replace_all_repeated(open_double, value, "${1}\u{201C}");
    let out = out.replace('"', "\u{201D}");
    let out = replace_all_repeated(open_single, &out, "${1}\u{2018}");
    Some(out.replace('\'', "\u{2019}"))
}

/// German typography: low-high quotes and em-dashes.
///
/// Guillemets and curly double quotes become `„` in opening position and `“`
/// otherwise. A space-surrounded hyphen and any en-dash become `—`.
pub fn format_quotes_dashes_de(value: &str) -> Option<String> {
    static OPEN_QUOTE: OnceCell<Regex> = OnceCell::new();
    static CLOSE_QUOTE: OnceCell<Regex> = OnceCell::new();
    static SPACED_HYPHEN: OnceCell<Regex> = OnceCell::new();
    if value.is_empty() {
        return None;
    }
    let open_quote = OPEN_QUOTE.get_or_init(|| {
        Regex::new(r"(^|[-\u{2010}-\u{2015}/(\[{\s])[\u{201C}\u{201D}\u{00AB}\u{00BB}]").unwrap()
    });
    let close_quote =
        CLOSE_QUOTE.get_or_init(|| Regex::new(r"[\u{201D}\u{00AB}\u{00BB}]").unwrap());
    let spaced_hyphen = SPACED_HYPHEN.get_or_init(|| Regex::new(r"(\s)-(\s)").unwrap());

    let out = replace_all_repeated(open_quote, value, "${1}\u{201E}");
    let out = close_quote.replace_all(&out, "\u{201C}");
    let out = replace_all_repeated(spaced_hyphen, &out, "${1}\u{2014}${2}");
    Some(out.replace('\u{2013}', "\u{2014}"))
}

// A match consumes its leading context char, so back-to-back targets (`(("`, ` - - `)
// need another pass to see their own context.
fn replace_all_repeated(re: &Regex, value: &str, rep: &str) -> String {
    let mut current = value.to_string();
    loop {
        let next = re.replace_all(&current, rep).into_owned();
        if next == current {
            return next;
        }
        current = next;
    }
}
