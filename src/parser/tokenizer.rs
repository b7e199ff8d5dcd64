use super::error::ParseError;
use const_format::concatcp;
use once_cell::sync::Lazy;
use regex::Regex;

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub(crate) kind: TokenKind,
    pub(crate) lexeme: String,
    pub(crate) start: usize,
    pub(crate) end: usize,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}('{}')", self.kind, self.lexeme)
    }
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub(crate) enum TokenKind {
    Number,
    Text,
    Keyname,
    Keyword,
    RebindLeftward,  // <:
    RebindRightward, // :>
    LessEqual,
    GreaterEqual,
    EqEqual,
    NotEqual,
    BlueprintOpen,  // <[
    BlueprintClose, // ]>
    Arrow,          // ->
    LPar,
    RPar,
    LBrack,
    RBrack,
    LBrace,
    RBrace,
    Comma,
    Semicolon,
    Colon,
    Dot,
    Plus,
    Minus,
    Star,
    Slash,
    Less,
    Greater,
    At,
}

const SIMPLE_TOKENS: [(&str, TokenKind); 23] = [
    ("<:", TokenKind::RebindLeftward),
    (":>", TokenKind::RebindRightward),
    ("<=", TokenKind::LessEqual),
    (">=", TokenKind::GreaterEqual),
    ("==", TokenKind::EqEqual),
    ("!=", TokenKind::NotEqual),
    ("<[", TokenKind::BlueprintOpen),
    ("]>", TokenKind::BlueprintClose),
    ("->", TokenKind::Arrow),
    ("(", TokenKind::LPar),
    (")", TokenKind::RPar),
    ("[", TokenKind::LBrack),
    ("]", TokenKind::RBrack),
    ("{", TokenKind::LBrace),
    ("}", TokenKind::RBrace),
    (",", TokenKind::Comma),
    (";", TokenKind::Semicolon),
    (":", TokenKind::Colon),
    (".", TokenKind::Dot),
    ("+", TokenKind::Plus),
    ("-", TokenKind::Minus),
    ("*", TokenKind::Star),
    ("/", TokenKind::Slash),
];

// `<` and `>` are matched after the two-character operators so that `<:`,
// `<=` and `<[` win.
const LATE_TOKENS: [(&str, TokenKind); 3] = [
    ("<", TokenKind::Less),
    (">", TokenKind::Greater),
    ("@", TokenKind::At),
];

pub(crate) const KEYWORDS: [&str; 19] = [
    "If",
    "Else",
    "if",
    "Loop",
    "while",
    "for",
    "in",
    "then",
    "either",
    "or",
    "and",
    "is",
    "not",
    "contains",
    "return",
    "param",
    "variants",
    "end-loop",
    "restart-loop",
];

macro_rules! alternative {
    ($t:expr) => {{
        $t
    }};
    ($t:expr, $($ts:expr),+) => {{
        concatcp!($t, "|", alternative!($($ts),+))
    }}
}

macro_rules! group {
    ($($ts:expr),+) => {{
        concatcp!(r"(", alternative!($($ts),+), ")")
    }}
}

const S_WHITESPACE: &str = r"^[ \t\r\n]+";
const S_LINE_COMMENT: &str = r"^//[^\n]*";
const S_NUMBER: &str = r"^[0-9]+(?:\.[0-9]+)?";
const S_DQUOTE_TEXT: &str = r#""(?:\\.|[^"\\])*""#;
const S_SQUOTE_TEXT: &str = r"'(?:\\.|[^'\\])*'";
const S_TEXT: &str = concatcp!("^", group!(S_DQUOTE_TEXT, S_SQUOTE_TEXT));
const S_KEYNAME: &str = r"^\$?[a-zA-Z_][a-zA-Z0-9_-]*";
const S_NUMERIC_KEYNAME: &str = r"^\$[0-9]+";

static WHITESPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(S_WHITESPACE).expect("Error compiling regex."));
static LINE_COMMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(S_LINE_COMMENT).expect("Error compiling regex."));
static NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(S_NUMBER).expect("Error compiling regex."));
static TEXT: Lazy<Regex> = Lazy::new(|| Regex::new(S_TEXT).expect("Error compiling regex."));
static KEYNAME: Lazy<Regex> = Lazy::new(|| Regex::new(S_KEYNAME).expect("Error compiling regex."));
static NUMERIC_KEYNAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(S_NUMERIC_KEYNAME).expect("Error compiling regex."));

/// The source line containing `offset`, for error context.
pub(crate) fn source_line(src: &str, offset: usize) -> String {
    let start = src[..offset.min(src.len())]
        .rfind('\n')
        .map(|i| i + 1)
        .unwrap_or(0);
    let end = src[start..]
        .find('\n')
        .map(|i| start + i)
        .unwrap_or(src.len());
    src[start..end].trim_end().to_string()
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(chr) = chars.next() {
        if chr != '\\' {
            out.push(chr);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Turn Enzo source text into a flat token stream, dropping whitespace and
/// comments but keeping byte offsets so errors can point at the source.
pub fn tokenize(src: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = vec![];
    let mut pos = 0;
    'scan: while pos < src.len() {
        let rest = &src[pos..];
        if let Some(m) = WHITESPACE.find(rest) {
            pos += m.end();
            continue;
        }
        if rest.starts_with("/'") {
            match rest[2..].find("'/") {
                Some(i) => {
                    pos += 2 + i + 2;
                    continue;
                }
                None => {
                    return Err(ParseError::with_line(
                        "error: unclosed block comment",
                        source_line(src, pos),
                    ))
                }
            }
        }
        // `//` and the `//=` section titles are both skipped here; the CLI
        // layer handles section titles from the raw source.
        if let Some(m) = LINE_COMMENT.find(rest) {
            pos += m.end();
            continue;
        }
        if let Some(m) = TEXT.find(rest) {
            let inner = &m.as_str()[1..m.as_str().len() - 1];
            tokens.push(Token {
                kind: TokenKind::Text,
                lexeme: unescape(inner),
                start: pos,
                end: pos + m.end(),
            });
            pos += m.end();
            continue;
        }
        if rest.starts_with('"') || rest.starts_with('\'') {
            return Err(ParseError::with_line(
                "error: unterminated string",
                source_line(src, pos),
            ));
        }
        if let Some(m) = NUMBER.find(rest) {
            tokens.push(Token {
                kind: TokenKind::Number,
                lexeme: m.as_str().to_string(),
                start: pos,
                end: pos + m.end(),
            });
            pos += m.end();
            continue;
        }
        if let Some(m) = KEYNAME.find(rest) {
            let kind = if KEYWORDS.contains(&m.as_str()) {
                TokenKind::Keyword
            } else {
                TokenKind::Keyname
            };
            tokens.push(Token {
                kind,
                lexeme: m.as_str().to_string(),
                start: pos,
                end: pos + m.end(),
            });
            pos += m.end();
            continue;
        }
        if NUMERIC_KEYNAME.is_match(rest) {
            return Err(ParseError::with_line(
                "error: key names cannot be purely numeric",
                source_line(src, pos),
            ));
        }
        for (lexeme, kind) in SIMPLE_TOKENS.iter().chain(LATE_TOKENS.iter()) {
            if rest.starts_with(lexeme) {
                tokens.push(Token {
                    kind: *kind,
                    lexeme: lexeme.to_string(),
                    start: pos,
                    end: pos + lexeme.len(),
                });
                pos += lexeme.len();
                continue 'scan;
            }
        }
        let chr = rest.chars().next().unwrap();
        return Err(ParseError::with_line(
            format!("Syntax error: Unexpected character '{chr}'"),
            source_line(src, pos),
        ));
    }
    Ok(tokens)
}
