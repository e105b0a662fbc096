//! Tokenizer for the surface syntax.
//!
//! Hand-written, byte-oriented, with the one classic wrinkle of the grammar: `/`
//! starts a regexp literal only where an expression is expected, so the lexer
//! tracks whether the previous significant token can end an expression.

use crate::loc::{FileRef, Loc};

/// A piece of a double-quoted string or regexp literal.
#[derive(Debug, Clone, PartialEq)]
pub enum StrPart {
    Text(String),
    /// An interpolation hole; the range covers the source between `#{` and `}` and
    /// is re-parsed as an expression.
    Interp { begin: u32, end: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // literals and identifiers
    Integer(String),
    Float(String),
    /// Single- or double-quoted string, already split into parts.
    Str(Vec<StrPart>),
    /// `:foo`, `:+`, `:foo=` and friends.
    Sym(String),
    /// `:"..."` with interpolation.
    DSym(Vec<StrPart>),
    Regexp { parts: Vec<StrPart>, options: String },
    Ident(String),
    Constant(String),
    IVar(String),
    GVar(String),
    CVar(String),
    Backref(String),

    // keywords
    KwDef,
    KwEnd,
    KwClass,
    KwModule,
    KwSelf,
    KwNil,
    KwTrue,
    KwFalse,
    KwIf,
    KwElsif,
    KwElse,
    KwUnless,
    KwThen,
    KwWhile,
    KwUntil,
    KwFor,
    KwIn,
    KwDo,
    KwCase,
    KwWhen,
    KwBegin,
    KwRescue,
    KwEnsure,
    KwReturn,
    KwBreak,
    KwNext,
    KwRetry,
    KwRedo,
    KwYield,
    KwSuper,
    KwNot,
    KwAnd,
    KwOr,
    KwDefined,
    KwUndef,
    KwPreexe,
    KwPostexe,
    KwFile,
    KwLine,

    // operators and punctuation
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    Percent,
    EqEq,
    NotEq,
    EqEqEq,
    Match,
    Lt,
    Gt,
    LtEq,
    GtEq,
    Spaceship,
    LShift,
    RShift,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Bang,
    AmpAmp,
    PipePipe,
    Assign,
    OpAssign(String),
    AmpAmpAssign,
    PipePipeAssign,
    Comma,
    Dot,
    SafeNav,
    ColonColon,
    Semi,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Question,
    Colon,
    DotDot,
    DotDotDot,
    FatArrow,
    Newline,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub loc: Loc,
}

/// Tokenizes `source[range]`; `range` lets string interpolations re-enter the lexer
/// over a slice while keeping absolute offsets.
pub struct Lexer<'a> {
    source: &'a [u8],
    file: FileRef,
    pos: usize,
    end: usize,
    /// Whether the previous significant token could end an expression. Decides
    /// `/` (division) vs `/re/` (regexp) and unary vs binary minus handling.
    prev_ends_expr: bool,
    errors: Vec<(Loc, String)>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str, file: FileRef, begin: usize, end: usize) -> Self {
        Self {
            source: source.as_bytes(),
            file,
            pos: begin,
            end,
            prev_ends_expr: false,
            errors: Vec::new(),
        }
    }

    pub fn take_errors(&mut self) -> Vec<(Loc, String)> {
        std::mem::take(&mut self.errors)
    }

    fn loc(&self, begin: usize) -> Loc {
        Loc::new(
            self.file,
            u32::try_from(begin).expect("file too large"),
            u32::try_from(self.pos).expect("file too large"),
        )
    }

    fn peek(&self) -> u8 {
        if self.pos < self.end { self.source[self.pos] } else { 0 }
    }

    fn peek_at(&self, offset: usize) -> u8 {
        let i = self.pos + offset;
        if i < self.end { self.source[i] } else { 0 }
    }

    fn bump(&mut self) -> u8 {
        let b = self.peek();
        self.pos += 1;
        b
    }

    fn error(&mut self, begin: usize, message: impl Into<String>) {
        let loc = self.loc(begin);
        self.errors.push((loc, message.into()));
    }

    /// Produces the whole token stream, ending with `Eof`.
    pub fn tokenize(&mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token();
            let is_eof = token.kind == TokenKind::Eof;
            // Collapse runs of newlines; the parser only cares about "separated".
            let skip = token.kind == TokenKind::Newline
                && matches!(tokens.last().map(|t: &Token| &t.kind), Some(TokenKind::Newline) | None);
            if !skip {
                tokens.push(token);
            }
            if is_eof {
                return tokens;
            }
        }
    }

    fn next_token(&mut self) -> Token {
        self.skip_trivia();
        let begin = self.pos;
        if self.pos >= self.end {
            return Token {
                kind: TokenKind::Eof,
                loc: self.loc(begin),
            };
        }
        let b = self.peek();
        let kind = match b {
            b'\n' => {
                self.bump();
                self.prev_ends_expr = false;
                TokenKind::Newline
            }
            b'0'..=b'9' => self.lex_number(),
            b'"' => {
                self.bump();
                let parts = self.lex_string_parts(b'"', true);
                self.prev_ends_expr = true;
                TokenKind::Str(parts)
            }
            b'\'' => {
                self.bump();
                let parts = self.lex_string_parts(b'\'', false);
                self.prev_ends_expr = true;
                TokenKind::Str(parts)
            }
            b':' => self.lex_colon(),
            b'@' => {
                self.bump();
                let class_var = self.peek() == b'@';
                if class_var {
                    self.bump();
                }
                let name = self.lex_ident_text();
                self.prev_ends_expr = true;
                if class_var {
                    TokenKind::CVar(format!("@@{name}"))
                } else {
                    TokenKind::IVar(format!("@{name}"))
                }
            }
            b'$' => {
                self.bump();
                let c = self.peek();
                self.prev_ends_expr = true;
                if c.is_ascii_digit() || matches!(c, b'&' | b'\'' | b'`' | b'+') {
                    self.bump();
                    TokenKind::Backref(format!("${}", char::from(c)))
                } else {
                    let name = self.lex_ident_text();
                    TokenKind::GVar(format!("${name}"))
                }
            }
            b'a'..=b'z' | b'_' => self.lex_ident_or_keyword(),
            b'A'..=b'Z' => {
                let name = self.lex_ident_text();
                self.prev_ends_expr = true;
                match name.as_str() {
                    "BEGIN" => TokenKind::KwPreexe,
                    "END" => TokenKind::KwPostexe,
                    "__FILE__" => TokenKind::KwFile,
                    "__LINE__" => TokenKind::KwLine,
                    _ => TokenKind::Constant(name),
                }
            }
            b'/' if !self.prev_ends_expr => {
                self.bump();
                let parts = self.lex_string_parts(b'/', true);
                let mut options = String::new();
                while self.peek().is_ascii_alphabetic() {
                    options.push(char::from(self.bump()));
                }
                self.prev_ends_expr = true;
                TokenKind::Regexp { parts, options }
            }
            _ => self.lex_operator(),
        };
        Token {
            kind,
            loc: self.loc(begin),
        }
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                b' ' | b'\t' | b'\r' => {
                    self.bump();
                }
                b'#' => {
                    while self.pos < self.end && self.peek() != b'\n' {
                        self.bump();
                    }
                }
                b'\\' if self.peek_at(1) == b'\n' => {
                    self.bump();
                    self.bump();
                }
                _ => return,
            }
        }
    }

    fn lex_ident_text(&mut self) -> String {
        let begin = self.pos;
        while matches!(self.peek(), b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'_') {
            self.bump();
        }
        // Trailing ? and ! belong to method-ish identifiers.
        if matches!(self.peek(), b'?' | b'!') && self.peek_at(1) != b'=' {
            self.bump();
        }
        String::from_utf8_lossy(&self.source[begin..self.pos]).into_owned()
    }

    fn lex_ident_or_keyword(&mut self) -> TokenKind {
        let name = self.lex_ident_text();
        let kind = match name.as_str() {
            "def" => TokenKind::KwDef,
            "end" => TokenKind::KwEnd,
            "class" => TokenKind::KwClass,
            "module" => TokenKind::KwModule,
            "self" => TokenKind::KwSelf,
            "nil" => TokenKind::KwNil,
            "true" => TokenKind::KwTrue,
            "false" => TokenKind::KwFalse,
            "if" => TokenKind::KwIf,
            "elsif" => TokenKind::KwElsif,
            "else" => TokenKind::KwElse,
            "unless" => TokenKind::KwUnless,
            "then" => TokenKind::KwThen,
            "while" => TokenKind::KwWhile,
            "until" => TokenKind::KwUntil,
            "for" => TokenKind::KwFor,
            "in" => TokenKind::KwIn,
            "do" => TokenKind::KwDo,
            "case" => TokenKind::KwCase,
            "when" => TokenKind::KwWhen,
            "begin" => TokenKind::KwBegin,
            "rescue" => TokenKind::KwRescue,
            "ensure" => TokenKind::KwEnsure,
            "return" => TokenKind::KwReturn,
            "break" => TokenKind::KwBreak,
            "next" => TokenKind::KwNext,
            "retry" => TokenKind::KwRetry,
            "redo" => TokenKind::KwRedo,
            "yield" => TokenKind::KwYield,
            "super" => TokenKind::KwSuper,
            "not" => TokenKind::KwNot,
            "and" => TokenKind::KwAnd,
            "or" => TokenKind::KwOr,
            "defined?" => TokenKind::KwDefined,
            "undef" => TokenKind::KwUndef,
            _ => TokenKind::Ident(name),
        };
        self.prev_ends_expr = matches!(
            kind,
            TokenKind::Ident(_)
                | TokenKind::KwSelf
                | TokenKind::KwNil
                | TokenKind::KwTrue
                | TokenKind::KwFalse
                | TokenKind::KwEnd
        );
        kind
    }

    fn lex_number(&mut self) -> TokenKind {
        let begin = self.pos;
        while self.peek().is_ascii_digit() || self.peek() == b'_' {
            self.bump();
        }
        let mut is_float = false;
        if self.peek() == b'.' && self.peek_at(1).is_ascii_digit() {
            is_float = true;
            self.bump();
            while self.peek().is_ascii_digit() || self.peek() == b'_' {
                self.bump();
            }
        }
        if matches!(self.peek(), b'e' | b'E')
            && (self.peek_at(1).is_ascii_digit()
                || (matches!(self.peek_at(1), b'+' | b'-') && self.peek_at(2).is_ascii_digit()))
        {
            is_float = true;
            self.bump();
            if matches!(self.peek(), b'+' | b'-') {
                self.bump();
            }
            while self.peek().is_ascii_digit() {
                self.bump();
            }
        }
        let text = String::from_utf8_lossy(&self.source[begin..self.pos]).replace('_', "");
        self.prev_ends_expr = true;
        if is_float {
            TokenKind::Float(text)
        } else {
            TokenKind::Integer(text)
        }
    }

    /// Lexes string parts up to the `delim` byte. `cooked` enables escapes and
    /// `#{}` interpolation.
    fn lex_string_parts(&mut self, delim: u8, cooked: bool) -> Vec<StrPart> {
        let begin = self.pos;
        let mut parts: Vec<StrPart> = Vec::new();
        let mut text = String::new();
        loop {
            if self.pos >= self.end {
                self.error(begin, "unterminated string literal");
                break;
            }
            let b = self.bump();
            if b == delim {
                break;
            }
            match b {
                b'\\' => {
                    let escaped = self.bump();
                    if cooked {
                        match escaped {
                            b'n' => text.push('\n'),
                            b't' => text.push('\t'),
                            b'r' => text.push('\r'),
                            b'0' => text.push('\0'),
                            b'e' => text.push('\u{1b}'),
                            b's' => text.push(' '),
                            _ => text.push(char::from(escaped)),
                        }
                    } else {
                        // Raw strings understand only \' and \\.
                        if escaped != delim && escaped != b'\\' {
                            text.push('\\');
                        }
                        text.push(char::from(escaped));
                    }
                }
                b'#' if cooked && self.peek() == b'{' => {
                    self.bump();
                    if !text.is_empty() {
                        parts.push(StrPart::Text(std::mem::take(&mut text)));
                    }
                    let interp_begin = self.pos;
                    let mut depth = 1usize;
                    while self.pos < self.end {
                        match self.bump() {
                            b'{' => depth += 1,
                            b'}' => {
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                            }
                            _ => {}
                        }
                    }
                    if depth != 0 {
                        self.error(begin, "unterminated string interpolation");
                    }
                    parts.push(StrPart::Interp {
                        begin: u32::try_from(interp_begin).expect("file too large"),
                        end: u32::try_from(self.pos.saturating_sub(1)).expect("file too large"),
                    });
                }
                _ => text.push(char::from(b)),
            }
        }
        if !text.is_empty() || parts.is_empty() {
            parts.push(StrPart::Text(text));
        }
        parts
    }

    fn lex_colon(&mut self) -> TokenKind {
        // A colon glued to the end of an identifier is a hash label (`{x: 1}`),
        // not the start of a symbol (`f :x`).
        let label_colon = self.pos > 0
            && matches!(self.source[self.pos - 1], b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'_' | b'"' | b'\'');
        self.bump();
        if self.peek() == b':' {
            self.bump();
            self.prev_ends_expr = false;
            return TokenKind::ColonColon;
        }
        if label_colon {
            self.prev_ends_expr = false;
            return TokenKind::Colon;
        }
        let c = self.peek();
        if matches!(c, b'a'..=b'z' | b'A'..=b'Z' | b'_') {
            let name = self.lex_ident_text();
            // Setter symbols like :foo=
            let name = if self.peek() == b'=' && self.peek_at(1) != b'=' && self.peek_at(1) != b'>' {
                self.bump();
                format!("{name}=")
            } else {
                name
            };
            self.prev_ends_expr = true;
            return TokenKind::Sym(name);
        }
        if c == b'"' {
            self.bump();
            let parts = self.lex_string_parts(b'"', true);
            self.prev_ends_expr = true;
            return TokenKind::DSym(parts);
        }
        // Operator symbols: :+, :[], :<=> and the rest.
        let operators: &[&str] = &[
            "[]=", "[]", "<=>", "===", "==", "=~", "<<", ">>", "<=", ">=", "**", "+", "-", "*", "/", "%", "<", ">",
            "!", "&", "|", "^", "~",
        ];
        for op in operators {
            if self.source[self.pos..self.end.min(self.pos + op.len())] == *op.as_bytes() {
                self.pos += op.len();
                self.prev_ends_expr = true;
                return TokenKind::Sym((*op).to_owned());
            }
        }
        self.prev_ends_expr = false;
        TokenKind::Colon
    }

    fn lex_operator(&mut self) -> TokenKind {
        // Longest-match table; order within each first-byte group matters.
        let table: &[(&str, TokenKind)] = &[
            ("**=", TokenKind::OpAssign("**".into())),
            ("<<=", TokenKind::OpAssign("<<".into())),
            (">>=", TokenKind::OpAssign(">>".into())),
            ("&&=", TokenKind::AmpAmpAssign),
            ("||=", TokenKind::PipePipeAssign),
            ("...", TokenKind::DotDotDot),
            ("<=>", TokenKind::Spaceship),
            ("===", TokenKind::EqEqEq),
            ("**", TokenKind::StarStar),
            ("==", TokenKind::EqEq),
            ("!=", TokenKind::NotEq),
            ("=~", TokenKind::Match),
            ("=>", TokenKind::FatArrow),
            ("<=", TokenKind::LtEq),
            (">=", TokenKind::GtEq),
            ("<<", TokenKind::LShift),
            (">>", TokenKind::RShift),
            ("&&", TokenKind::AmpAmp),
            ("||", TokenKind::PipePipe),
            ("&.", TokenKind::SafeNav),
            ("..", TokenKind::DotDot),
            ("+=", TokenKind::OpAssign("+".into())),
            ("-=", TokenKind::OpAssign("-".into())),
            ("*=", TokenKind::OpAssign("*".into())),
            ("/=", TokenKind::OpAssign("/".into())),
            ("%=", TokenKind::OpAssign("%".into())),
            ("&=", TokenKind::OpAssign("&".into())),
            ("|=", TokenKind::OpAssign("|".into())),
            ("^=", TokenKind::OpAssign("^".into())),
            ("+", TokenKind::Plus),
            ("-", TokenKind::Minus),
            ("*", TokenKind::Star),
            ("/", TokenKind::Slash),
            ("%", TokenKind::Percent),
            ("=", TokenKind::Assign),
            ("<", TokenKind::Lt),
            (">", TokenKind::Gt),
            ("&", TokenKind::Amp),
            ("|", TokenKind::Pipe),
            ("^", TokenKind::Caret),
            ("~", TokenKind::Tilde),
            ("!", TokenKind::Bang),
            (",", TokenKind::Comma),
            (".", TokenKind::Dot),
            (";", TokenKind::Semi),
            ("(", TokenKind::LParen),
            (")", TokenKind::RParen),
            ("[", TokenKind::LBracket),
            ("]", TokenKind::RBracket),
            ("{", TokenKind::LBrace),
            ("}", TokenKind::RBrace),
            ("?", TokenKind::Question),
        ];
        for (text, kind) in table {
            let bytes = text.as_bytes();
            if self.pos + bytes.len() <= self.end && &self.source[self.pos..self.pos + bytes.len()] == bytes {
                self.pos += bytes.len();
                // Only tokens that can close an expression leave prev_ends_expr set.
                self.prev_ends_expr = matches!(kind, TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace);
                return kind.clone();
            }
        }
        let begin = self.pos;
        let bad = self.bump();
        self.error(begin, format!("unexpected character `{}`", char::from(bad)));
        TokenKind::Newline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(src, FileRef::NONE, 0, src.len());
        lexer.tokenize().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lexes_idents_keywords_and_numbers() {
        let toks = kinds("def foo 12 3.5 end");
        assert_eq!(
            toks,
            vec![
                TokenKind::KwDef,
                TokenKind::Ident("foo".into()),
                TokenKind::Integer("12".into()),
                TokenKind::Float("3.5".into()),
                TokenKind::KwEnd,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lexes_string_interpolation() {
        let toks = kinds("\"a#{b}c\"");
        match &toks[0] {
            TokenKind::Str(parts) => {
                assert_eq!(parts.len(), 3);
                assert_eq!(parts[0], StrPart::Text("a".into()));
                assert!(matches!(parts[1], StrPart::Interp { .. }));
                assert_eq!(parts[2], StrPart::Text("c".into()));
            }
            other => panic!("expected string, got {other:?}"),
        }
    }

    #[test]
    fn slash_is_regexp_when_expression_expected() {
        let toks = kinds("x = /ab/i");
        assert!(matches!(
            toks[2],
            TokenKind::Regexp { ref options, .. } if options == "i"
        ));
        let toks = kinds("x / y");
        assert_eq!(toks[1], TokenKind::Slash);
    }

    #[test]
    fn lexes_symbols_and_safe_nav() {
        let toks = kinds("a&.b :sym :+ :\"d#{e}\"");
        assert_eq!(toks[1], TokenKind::SafeNav);
        assert_eq!(toks[3], TokenKind::Sym("sym".into()));
        assert_eq!(toks[4], TokenKind::Sym("+".into()));
        assert!(matches!(toks[5], TokenKind::DSym(_)));
    }

    #[test]
    fn lexes_compound_assignment() {
        let toks = kinds("a += 1\nb ||= 2\nc &&= 3");
        assert_eq!(toks[1], TokenKind::OpAssign("+".into()));
        assert!(toks.contains(&TokenKind::PipePipeAssign));
        assert!(toks.contains(&TokenKind::AmpAmpAssign));
    }

    #[test]
    fn ivars_gvars_cvars_and_backrefs() {
        let toks = kinds("@a @@b $c $1");
        assert_eq!(toks[0], TokenKind::IVar("@a".into()));
        assert_eq!(toks[1], TokenKind::CVar("@@b".into()));
        assert_eq!(toks[2], TokenKind::GVar("$c".into()));
        assert_eq!(toks[3], TokenKind::Backref("$1".into()));
    }
}
