//! Code synthesis parser
//!
//! Turns a free-form model reply into exactly one invocable [`CodeUnit`].
//!
//! Steps:
//! 1. Pull every ```` ```javascript ```` / ```` ```js ```` block out of the reply
//! 2. Reject the candidate if it contains a denylisted construct
//! 3. Lex the code and collect its top-level function definitions
//! 4. Select the *last* async function taking a single context parameter
//! 5. Normalise all definitions into one body and build the invocation
//!
//! Every way this can fail is a [`SynthesisFailure`], which the control loop
//! treats as a failed try rather than an error.

use std::sync::OnceLock;

use kiln_core::CodeUnit;
use regex::Regex;

/// Why a model reply did not yield a code unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisFailure {
    /// No fenced javascript block, or only empty ones
    NoCodeBlock,
    /// The code could not be lexed into top-level definitions
    Unparseable(String),
    /// No async function with a single context parameter
    NoEntryFunction,
    /// The code contains a denylisted construct
    Unsafe { construct: String },
}

impl std::fmt::Display for SynthesisFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoCodeBlock => write!(
                f,
                "No code produced: the reply must contain a ```javascript code block"
            ),
            Self::Unparseable(reason) => write!(f, "Code could not be parsed: {}", reason),
            Self::NoEntryFunction => write!(
                f,
                "No entry function: the last function must be `async function name(bot)`"
            ),
            Self::Unsafe { construct } => write!(
                f,
                "Unsafe code rejected: `{}` is not allowed",
                construct
            ),
        }
    }
}

/// A top-level function definition found in generated code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDef {
    pub name: String,
    pub is_async: bool,
    /// Parameter names (defaults stripped)
    pub params: Vec<String>,
    /// Source text of the whole declaration
    pub source: String,
}

impl FunctionDef {
    /// Whether this function follows the entry calling convention
    pub fn is_entry_candidate(&self) -> bool {
        self.is_async && self.params.len() == 1 && is_identifier(&self.params[0])
    }
}

const ENTRY_ARGUMENT: &str = "bot";

fn fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?is)```(?:javascript|js)\b[^\n]*\n?(.*?)```").expect("fence pattern is valid")
    })
}

fn denylist() -> &'static [(&'static str, Regex)] {
    static DENYLIST: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    DENYLIST.get_or_init(|| {
        [
            ("eval(", r"\beval\s*\("),
            ("new Function", r"\bnew\s+Function\b"),
            ("Function(", r"(?:^|[^\w.$])Function\s*\("),
            ("while (true)", r"\bwhile\s*\(\s*true\s*\)"),
            ("while (1)", r"\bwhile\s*\(\s*1\s*\)"),
            ("for (;;)", r"\bfor\s*\(\s*;\s*;\s*\)"),
        ]
        .into_iter()
        .map(|(name, pattern)| (name, Regex::new(pattern).expect("denylist pattern is valid")))
        .collect()
    })
}

/// Concatenated contents of every javascript fence, if any is non-empty
pub fn extract_code(text: &str) -> Option<String> {
    let blocks: Vec<&str> = fence_regex()
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .collect();

    let code = blocks.join("\n");
    if code.trim().is_empty() {
        None
    } else {
        Some(code)
    }
}

/// First denylisted construct found in `code`
pub fn find_unsafe_construct(code: &str) -> Option<&'static str> {
    denylist()
        .iter()
        .find(|(_, pattern)| pattern.is_match(code))
        .map(|(name, _)| *name)
}

/// Last function that can serve as the entry point
pub fn select_entry(functions: &[FunctionDef]) -> Option<&FunctionDef> {
    functions.iter().rev().find(|f| f.is_entry_candidate())
}

/// Canonical text for one definition
///
/// Idempotent: `normalize(normalize(s)) == normalize(s)`.
pub fn normalize(source: &str) -> String {
    source
        .replace("\r\n", "\n")
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Parse a model reply into a code unit
pub fn parse_code_unit(text: &str) -> Result<CodeUnit, SynthesisFailure> {
    let code = extract_code(text).ok_or(SynthesisFailure::NoCodeBlock)?;

    if let Some(construct) = find_unsafe_construct(&code) {
        return Err(SynthesisFailure::Unsafe {
            construct: construct.to_string(),
        });
    }

    let functions = parse_functions(&code).map_err(SynthesisFailure::Unparseable)?;
    let entry = select_entry(&functions).ok_or(SynthesisFailure::NoEntryFunction)?;

    let body = functions
        .iter()
        .map(|f| normalize(&f.source))
        .collect::<Vec<_>>()
        .join("\n\n");

    Ok(CodeUnit {
        entry: entry.name.clone(),
        invocation: format!("await {}({});", entry.name, ENTRY_ARGUMENT),
        body,
    })
}

/// Collect the top-level function definitions of a javascript source
pub fn parse_functions(code: &str) -> Result<Vec<FunctionDef>, String> {
    let mut scanner = Scanner::new(code);
    let mut functions = Vec::new();

    loop {
        scanner.skip_trivia()?;
        if scanner.at_end() {
            break;
        }

        let start = scanner.pos;
        if let Some(def) = scanner.declaration(start)? {
            functions.push(def);
            continue;
        }

        scanner.pos = start;
        scanner.skip_token()?;
    }

    Ok(functions)
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

fn is_identifier(s: &str) -> bool {
    let bytes = s.as_bytes();
    !bytes.is_empty() && !bytes[0].is_ascii_digit() && bytes.iter().all(|&b| is_ident_byte(b))
}

fn closing(open: u8) -> u8 {
    match open {
        b'(' => b')',
        b'[' => b']',
        _ => b'}',
    }
}

/// Keywords after which a `/` starts a regex literal
const EXPRESSION_KEYWORDS: &[&str] = &[
    "return", "typeof", "case", "throw", "yield", "await", "in", "of", "void", "delete",
    "instanceof", "new", "else", "do",
];

/// Byte-level javascript scanner
///
/// Only ASCII bytes are ever used as token boundaries, so every slice taken
/// from `src` lands on a char boundary.
struct Scanner<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    /// Last significant byte, used to tell a regex literal from division.
    /// Keywords that precede an expression are recorded as `=`.
    last: u8,
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
            last: b';',
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn advance(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.bytes.len());
    }

    fn skip_trivia(&mut self) -> Result<(), String> {
        while let Some(b) = self.peek() {
            if b.is_ascii_whitespace() {
                self.advance(1);
            } else if b == b'/' && self.peek_at(1) == Some(b'/') {
                while let Some(c) = self.peek() {
                    if c == b'\n' {
                        break;
                    }
                    self.advance(1);
                }
            } else if b == b'/' && self.peek_at(1) == Some(b'*') {
                let rest = &self.src[self.pos + 2..];
                match rest.find("*/") {
                    Some(offset) => self.advance(offset + 4),
                    None => return Err("unterminated block comment".to_string()),
                }
            } else {
                break;
            }
        }
        Ok(())
    }

    fn read_ident(&mut self) -> Option<&'a str> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if !is_ident_byte(b) {
                break;
            }
            self.advance(1);
        }
        if self.pos == start {
            None
        } else {
            let ident = &self.src[start..self.pos];
            self.last = if EXPRESSION_KEYWORDS.contains(&ident) {
                b'='
            } else {
                b'a'
            };
            Some(ident)
        }
    }

    fn eat(&mut self, b: u8) -> bool {
        if self.peek() == Some(b) {
            self.advance(1);
            self.last = b;
            true
        } else {
            false
        }
    }

    /// Consume one token, including whole bracket groups
    fn skip_token(&mut self) -> Result<(), String> {
        let Some(b) = self.peek() else {
            return Ok(());
        };

        match b {
            b'\'' | b'"' => self.skip_string(b)?,
            b'`' => self.skip_template()?,
            b'(' | b'[' | b'{' => self.skip_group()?,
            b')' | b']' | b'}' => {
                return Err(format!("unbalanced '{}'", b as char));
            }
            b'/' if self.regex_allowed() => self.skip_regex()?,
            _ if is_ident_byte(b) => {
                self.read_ident();
            }
            _ => {
                self.advance(1);
                self.last = b;
            }
        }
        Ok(())
    }

    fn regex_allowed(&self) -> bool {
        b"(,=:[!&|?{};+-*%<>~^".contains(&self.last)
    }

    fn skip_string(&mut self, quote: u8) -> Result<(), String> {
        self.advance(1);
        loop {
            match self.peek() {
                None | Some(b'\n') => return Err("unterminated string literal".to_string()),
                Some(b'\\') => self.advance(2),
                Some(b) if b == quote => {
                    self.advance(1);
                    self.last = b'a';
                    return Ok(());
                }
                Some(_) => self.advance(1),
            }
        }
    }

    fn skip_template(&mut self) -> Result<(), String> {
        self.advance(1);
        loop {
            match self.peek() {
                None => return Err("unterminated template literal".to_string()),
                Some(b'\\') => self.advance(2),
                Some(b'`') => {
                    self.advance(1);
                    self.last = b'a';
                    return Ok(());
                }
                Some(b'$') if self.peek_at(1) == Some(b'{') => {
                    self.advance(1);
                    self.skip_group()?;
                }
                Some(_) => self.advance(1),
            }
        }
    }

    fn skip_regex(&mut self) -> Result<(), String> {
        self.advance(1);
        let mut in_class = false;
        loop {
            match self.peek() {
                None | Some(b'\n') => return Err("unterminated regex literal".to_string()),
                Some(b'\\') => self.advance(2),
                Some(b'[') => {
                    in_class = true;
                    self.advance(1);
                }
                Some(b']') => {
                    in_class = false;
                    self.advance(1);
                }
                Some(b'/') if !in_class => {
                    self.advance(1);
                    while self.peek().is_some_and(is_ident_byte) {
                        self.advance(1);
                    }
                    self.last = b'a';
                    return Ok(());
                }
                Some(_) => self.advance(1),
            }
        }
    }

    /// Consume a bracket group starting at the opening bracket
    fn skip_group(&mut self) -> Result<(), String> {
        let Some(open) = self.peek() else {
            return Err("expected bracket".to_string());
        };
        let close = closing(open);
        self.advance(1);
        self.last = open;

        loop {
            self.skip_trivia()?;
            match self.peek() {
                None => return Err(format!("unclosed '{}'", open as char)),
                Some(b) if b == close => {
                    self.advance(1);
                    self.last = close;
                    return Ok(());
                }
                Some(b')' | b']' | b'}') => {
                    return Err(format!(
                        "mismatched bracket: expected '{}'",
                        close as char
                    ));
                }
                Some(_) => self.skip_token()?,
            }
        }
    }

    /// Text of a bracket group, brackets excluded
    fn group_contents(&mut self) -> Result<&'a str, String> {
        let start = self.pos;
        self.skip_group()?;
        Ok(&self.src[start + 1..self.pos - 1])
    }

    /// Try to read a function declaration starting at `start`
    ///
    /// Returns `Ok(None)` when the statement is not a declaration we track.
    fn declaration(&mut self, start: usize) -> Result<Option<FunctionDef>, String> {
        let Some(keyword) = self.read_ident() else {
            return Ok(None);
        };

        match keyword {
            "async" => {
                self.skip_trivia()?;
                if self.read_ident() != Some("function") {
                    return Ok(None);
                }
                self.function_tail(start, true, None)
            }
            "function" => self.function_tail(start, false, None),
            "const" | "let" | "var" => self.binding(start),
            _ => Ok(None),
        }
    }

    /// `const name = <function expression>`
    fn binding(&mut self, start: usize) -> Result<Option<FunctionDef>, String> {
        self.skip_trivia()?;
        let Some(name) = self.read_ident() else {
            return Ok(None);
        };
        self.skip_trivia()?;
        if !self.eat(b'=') || self.peek() == Some(b'=') {
            return Ok(None);
        }
        self.skip_trivia()?;

        let mut is_async = false;
        let before_async = self.pos;
        if self.read_ident() == Some("async") {
            is_async = true;
            self.skip_trivia()?;
        } else {
            self.pos = before_async;
        }

        match self.peek() {
            Some(b'(') => {
                let params = self.group_contents()?;
                self.arrow_tail(start, name, is_async, params)
            }
            Some(b) if is_ident_byte(b) => {
                let before = self.pos;
                let ident = self.read_ident().unwrap_or_default();
                if ident == "function" {
                    return self.function_tail(start, is_async, Some(name));
                }
                self.pos = before;
                let param = self.read_ident().unwrap_or_default();
                self.arrow_tail(start, name, is_async, param)
            }
            _ => Ok(None),
        }
    }

    /// `=> { .. }` after an arrow parameter list
    fn arrow_tail(
        &mut self,
        start: usize,
        name: &str,
        is_async: bool,
        params: &str,
    ) -> Result<Option<FunctionDef>, String> {
        self.skip_trivia()?;
        if !(self.eat(b'=') && self.eat(b'>')) {
            return Ok(None);
        }
        self.skip_trivia()?;
        if self.peek() != Some(b'{') {
            return Ok(None);
        }
        self.skip_group()?;
        let params = split_params(params)?;
        Ok(Some(self.finish(start, name, is_async, params)))
    }

    /// Everything after the `function` keyword
    fn function_tail(
        &mut self,
        start: usize,
        is_async: bool,
        binding: Option<&str>,
    ) -> Result<Option<FunctionDef>, String> {
        self.skip_trivia()?;
        self.eat(b'*');
        self.skip_trivia()?;

        let declared = self.read_ident();
        let Some(name) = binding.or(declared) else {
            return Ok(None);
        };

        self.skip_trivia()?;
        if self.peek() != Some(b'(') {
            return Ok(None);
        }
        let params = self.group_contents()?;
        self.skip_trivia()?;
        if self.peek() != Some(b'{') {
            return Ok(None);
        }
        self.skip_group()?;

        let params = split_params(params)?;
        Ok(Some(self.finish(start, name, is_async, params)))
    }

    fn finish(&mut self, start: usize, name: &str, is_async: bool, params: Vec<String>) -> FunctionDef {
        let mut end = self.pos;
        let rest = &self.src[end..];
        let spaces = rest.len() - rest.trim_start_matches([' ', '\t']).len();
        if rest[spaces..].starts_with(';') {
            end += spaces + 1;
            self.pos = end;
        }

        FunctionDef {
            name: name.to_string(),
            is_async,
            params,
            source: self.src[start..end].to_string(),
        }
    }
}

/// Split a parameter list on top-level commas, keeping only the names
fn split_params(list: &str) -> Result<Vec<String>, String> {
    let mut scanner = Scanner::new(list);
    let mut params = Vec::new();
    let mut segment_start = 0;

    loop {
        scanner.skip_trivia()?;
        match scanner.peek() {
            None => break,
            Some(b',') => {
                params.push(&list[segment_start..scanner.pos]);
                scanner.advance(1);
                scanner.last = b',';
                segment_start = scanner.pos;
            }
            Some(_) => scanner.skip_token()?,
        }
    }
    params.push(&list[segment_start..]);

    Ok(params
        .into_iter()
        .map(|p| p.split('=').next().unwrap_or_default().trim().to_string())
        .filter(|p| !p.is_empty())
        .collect())
}
