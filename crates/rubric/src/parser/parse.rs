//! Recursive-descent parser from tokens to [`Node`] trees.
//!
//! The parser tracks assigned local names per scope so an identifier can be told
//! apart from a receiverless call, the one piece of context the grammar demands.
//! Everything else is straightforward precedence climbing.
//!
//! Recovery: an unparseable construct records an error and becomes [`Node::Missing`];
//! parsing continues at the next statement separator.

use ahash::AHashSet;

use super::{
    Node, ResBody, WhenClause,
    lexer::{Lexer, StrPart, Token, TokenKind},
};
use crate::loc::{FileRef, Loc};

/// Result of parsing one file.
#[derive(Debug)]
pub struct ParseResult {
    /// The root node; `None` for an empty file.
    pub node: Option<Box<Node>>,
    pub errors: Vec<(Loc, String)>,
}

/// Parses a whole source file.
pub fn parse_file(source: &str, file: FileRef) -> ParseResult {
    let mut lexer = Lexer::new(source, file, 0, source.len());
    let tokens = lexer.tokenize();
    let mut errors = lexer.take_errors();
    let mut parser = Parser::new(source, file, tokens);
    let stmts = parser.parse_stmts(&[]);
    errors.extend(parser.errors);
    let node = match stmts.len() {
        0 => None,
        1 => Some(Box::new(stmts.into_iter().next().expect("len checked"))),
        _ => {
            let loc = stmts
                .first()
                .map(|n| n.loc().join(stmts.last().expect("non-empty").loc()))
                .unwrap_or(Loc::NONE);
            Some(Box::new(Node::Begin { loc, stmts }))
        }
    };
    ParseResult { node, errors }
}

struct Parser<'a> {
    source: &'a str,
    file: FileRef,
    tokens: Vec<Token>,
    pos: usize,
    errors: Vec<(Loc, String)>,
    /// Stack of scopes; each holds the local names assigned so far, deciding
    /// LVar vs receiverless Send.
    locals: Vec<AHashSet<String>>,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str, file: FileRef, tokens: Vec<Token>) -> Self {
        Self {
            source,
            file,
            tokens,
            pos: 0,
            errors: Vec::new(),
            locals: vec![AHashSet::new()],
        }
    }

    // ===== token plumbing =====

    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].kind
    }

    fn peek_at(&self, offset: usize) -> &TokenKind {
        &self.tokens[(self.pos + offset).min(self.tokens.len() - 1)].kind
    }

    fn here(&self) -> Loc {
        self.tokens[self.pos.min(self.tokens.len() - 1)].loc
    }

    fn prev_loc(&self) -> Loc {
        self.tokens[self.pos.saturating_sub(1).min(self.tokens.len() - 1)].loc
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn at(&self, kind: &TokenKind) -> bool {
        self.peek() == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) {
        if !self.eat(kind) {
            let loc = self.here();
            self.errors.push((loc, format!("expected {what}")));
        }
    }

    fn skip_separators(&mut self) {
        while matches!(self.peek(), TokenKind::Newline | TokenKind::Semi) {
            self.advance();
        }
    }

    fn error_here(&mut self, message: impl Into<String>) {
        let loc = self.here();
        self.errors.push((loc, message.into()));
    }

    // ===== scopes =====

    fn declare_local(&mut self, name: &str) {
        self.locals.last_mut().expect("scope stack never empty").insert(name.to_owned());
    }

    fn is_local(&self, name: &str) -> bool {
        self.locals.last().expect("scope stack never empty").contains(name)
    }

    fn push_fresh_scope(&mut self) {
        self.locals.push(AHashSet::new());
    }

    fn push_inherited_scope(&mut self) {
        let copy = self.locals.last().expect("scope stack never empty").clone();
        self.locals.push(copy);
    }

    fn pop_scope(&mut self) {
        self.locals.pop();
    }

    /// Registers every name bound by an assignment target.
    fn declare_target_locals(&mut self, target: &Node) {
        match target {
            Node::Send { recv: None, method, args, .. } if args.is_empty() => {
                self.declare_local(method);
            }
            Node::LVar { name, .. } => self.declare_local(&name.clone()),
            Node::Splat { value: Some(inner), .. } => self.declare_target_locals(&inner.clone()),
            Node::Mlhs { targets, .. } | Node::Masgn { targets, .. } => {
                for t in targets.clone() {
                    self.declare_target_locals(&t);
                }
            }
            _ => {}
        }
    }

    // ===== statements =====

    /// Parses statements until one of `terminators` (or EOF). Does not consume the
    /// terminator.
    fn parse_stmts(&mut self, terminators: &[TokenKind]) -> Vec<Node> {
        let mut stmts = Vec::new();
        loop {
            self.skip_separators();
            if self.at(&TokenKind::Eof) || terminators.contains(self.peek()) {
                return stmts;
            }
            stmts.push(self.parse_stmt());
            // Statements are separated by newlines or semicolons; anything else
            // right after a statement is an error worth recovering from.
            if !self.at(&TokenKind::Eof)
                && !terminators.contains(self.peek())
                && !matches!(self.peek(), TokenKind::Newline | TokenKind::Semi)
            {
                self.error_here("expected end of statement");
                while !self.at(&TokenKind::Eof)
                    && !terminators.contains(self.peek())
                    && !matches!(self.peek(), TokenKind::Newline | TokenKind::Semi)
                {
                    self.advance();
                }
            }
        }
    }

    /// One statement: an expression plus any trailing modifiers.
    fn parse_stmt(&mut self) -> Node {
        let mut node = self.parse_expr_stmt();
        loop {
            match self.peek() {
                TokenKind::KwIf => {
                    self.advance();
                    let cond = self.parse_expr();
                    let loc = node.loc().join(cond.loc());
                    node = Node::If {
                        loc,
                        cond: Box::new(cond),
                        then_branch: Some(Box::new(node)),
                        else_branch: None,
                    };
                }
                TokenKind::KwUnless => {
                    self.advance();
                    let cond = self.parse_expr();
                    let loc = node.loc().join(cond.loc());
                    node = Node::If {
                        loc,
                        cond: Box::new(cond),
                        then_branch: None,
                        else_branch: Some(Box::new(node)),
                    };
                }
                TokenKind::KwWhile => {
                    self.advance();
                    let cond = self.parse_expr();
                    let loc = node.loc().join(cond.loc());
                    // `begin ... end while cond` is the post-condition loop.
                    if matches!(node, Node::Begin { .. } | Node::Rescue { .. } | Node::Ensure { .. }) {
                        node = Node::WhilePost {
                            loc,
                            cond: Box::new(cond),
                            body: Box::new(node),
                        };
                    } else {
                        node = Node::While {
                            loc,
                            cond: Box::new(cond),
                            body: Some(Box::new(node)),
                        };
                    }
                }
                TokenKind::KwUntil => {
                    self.advance();
                    let cond = self.parse_expr();
                    let loc = node.loc().join(cond.loc());
                    if matches!(node, Node::Begin { .. } | Node::Rescue { .. } | Node::Ensure { .. }) {
                        node = Node::UntilPost {
                            loc,
                            cond: Box::new(cond),
                            body: Box::new(node),
                        };
                    } else {
                        node = Node::Until {
                            loc,
                            cond: Box::new(cond),
                            body: Some(Box::new(node)),
                        };
                    }
                }
                TokenKind::KwRescue => {
                    self.advance();
                    let handler = self.parse_expr();
                    let loc = node.loc().join(handler.loc());
                    node = Node::Rescue {
                        loc,
                        body: Some(Box::new(node)),
                        cases: vec![ResBody {
                            loc: handler.loc(),
                            exceptions: Vec::new(),
                            var: None,
                            body: Some(Box::new(handler)),
                        }],
                        else_branch: None,
                    };
                }
                _ => return node,
            }
        }
    }

    // ===== expressions =====

    fn parse_expr(&mut self) -> Node {
        self.parse_kw_logic(false)
    }

    /// Entry point for statement position, where `a, b = rhs` is legal.
    fn parse_expr_stmt(&mut self) -> Node {
        self.parse_kw_logic(true)
    }

    /// Lowest precedence: keyword `and` / `or` / `not`.
    fn parse_kw_logic(&mut self, allow_masgn: bool) -> Node {
        if self.at(&TokenKind::KwNot) {
            let start = self.here();
            self.advance();
            let operand = self.parse_kw_logic(false);
            let loc = start.join(operand.loc());
            return Node::Send {
                loc,
                recv: Some(Box::new(operand)),
                method: "!".into(),
                args: Vec::new(),
            };
        }
        let mut left = self.parse_assignment(allow_masgn);
        loop {
            let and = match self.peek() {
                TokenKind::KwAnd => true,
                TokenKind::KwOr => false,
                _ => return left,
            };
            self.advance();
            let right = self.parse_assignment(false);
            let loc = left.loc().join(right.loc());
            left = if and {
                Node::And {
                    loc,
                    left: Box::new(left),
                    right: Box::new(right),
                }
            } else {
                Node::Or {
                    loc,
                    left: Box::new(left),
                    right: Box::new(right),
                }
            };
        }
    }

    fn is_assignable(node: &Node) -> bool {
        matches!(
            node,
            Node::LVar { .. }
                | Node::IVar { .. }
                | Node::GVar { .. }
                | Node::CVar { .. }
                | Node::Const { .. }
                | Node::Splat { .. }
                | Node::Mlhs { .. }
        ) || matches!(node, Node::Send { recv: None, args, .. } if args.is_empty())
            || matches!(node, Node::Send { recv: Some(_), method, .. } if method == "[]")
            || matches!(node, Node::Send { recv: Some(_), args, .. } if args.is_empty())
    }

    fn parse_assignment(&mut self, allow_masgn: bool) -> Node {
        let left = self.parse_ternary();
        match self.peek().clone() {
            TokenKind::Assign if Self::is_assignable(&left) => {
                self.advance();
                self.declare_target_locals(&left);
                let value = self.parse_assignment_rhs();
                let loc = left.loc().join(value.loc());
                Node::Asgn {
                    loc,
                    target: Box::new(left),
                    value: Box::new(value),
                }
            }
            TokenKind::OpAssign(op) if Self::is_assignable(&left) => {
                self.advance();
                self.declare_target_locals(&left);
                let value = self.parse_assignment_rhs();
                let loc = left.loc().join(value.loc());
                Node::OpAsgn {
                    loc,
                    target: Box::new(left),
                    op,
                    value: Box::new(value),
                }
            }
            TokenKind::AmpAmpAssign if Self::is_assignable(&left) => {
                self.advance();
                self.declare_target_locals(&left);
                let value = self.parse_assignment_rhs();
                let loc = left.loc().join(value.loc());
                Node::AndAsgn {
                    loc,
                    target: Box::new(left),
                    value: Box::new(value),
                }
            }
            TokenKind::PipePipeAssign if Self::is_assignable(&left) => {
                self.advance();
                self.declare_target_locals(&left);
                let value = self.parse_assignment_rhs();
                let loc = left.loc().join(value.loc());
                Node::OrAsgn {
                    loc,
                    target: Box::new(left),
                    value: Box::new(value),
                }
            }
            TokenKind::Comma if allow_masgn && Self::is_assignable(&left) => {
                // Multiple assignment: `a, *b, c = rhs`.
                let mut targets = vec![left];
                while self.eat(&TokenKind::Comma) {
                    if self.at(&TokenKind::Star) {
                        let star_loc = self.here();
                        self.advance();
                        let inner = if matches!(self.peek(), TokenKind::Assign | TokenKind::Comma) {
                            None
                        } else {
                            Some(Box::new(self.parse_ternary()))
                        };
                        let loc = inner.as_ref().map_or(star_loc, |i| star_loc.join(i.loc()));
                        targets.push(Node::Splat { loc, value: inner });
                    } else {
                        targets.push(self.parse_ternary());
                    }
                }
                self.expect(&TokenKind::Assign, "`=` after assignment targets");
                for target in targets.clone() {
                    self.declare_target_locals(&target);
                }
                let value = self.parse_assignment_rhs();
                let loc = targets
                    .first()
                    .map(Node::loc)
                    .unwrap_or(Loc::NONE)
                    .join(value.loc());
                Node::Masgn {
                    loc,
                    targets,
                    value: Box::new(value),
                }
            }
            _ => left,
        }
    }

    /// The right-hand side of an assignment; a bare comma list becomes an array.
    fn parse_assignment_rhs(&mut self) -> Node {
        let first = self.parse_assignment(false);
        if !self.at(&TokenKind::Comma) {
            return first;
        }
        let mut elems = vec![first];
        while self.eat(&TokenKind::Comma) {
            if self.at(&TokenKind::Star) {
                let star_loc = self.here();
                self.advance();
                let inner = self.parse_ternary();
                let loc = star_loc.join(inner.loc());
                elems.push(Node::Splat {
                    loc,
                    value: Some(Box::new(inner)),
                });
            } else {
                elems.push(self.parse_ternary());
            }
        }
        let loc = elems
            .first()
            .map(Node::loc)
            .unwrap_or(Loc::NONE)
            .join(elems.last().map(Node::loc).unwrap_or(Loc::NONE));
        Node::Array { loc, elems }
    }

    fn parse_ternary(&mut self) -> Node {
        let cond = self.parse_range();
        if !self.eat(&TokenKind::Question) {
            return cond;
        }
        let then_branch = self.parse_ternary();
        self.expect(&TokenKind::Colon, "`:` in ternary expression");
        let else_branch = self.parse_ternary();
        let loc = cond.loc().join(else_branch.loc());
        Node::If {
            loc,
            cond: Box::new(cond),
            then_branch: Some(Box::new(then_branch)),
            else_branch: Some(Box::new(else_branch)),
        }
    }

    fn parse_range(&mut self) -> Node {
        let left = self.parse_binary(0);
        let exclusive = match self.peek() {
            TokenKind::DotDot => false,
            TokenKind::DotDotDot => true,
            _ => return left,
        };
        self.advance();
        let right = self.parse_binary(0);
        let loc = left.loc().join(right.loc());
        if exclusive {
            Node::ERange {
                loc,
                from: Some(Box::new(left)),
                to: Some(Box::new(right)),
            }
        } else {
            Node::IRange {
                loc,
                from: Some(Box::new(left)),
                to: Some(Box::new(right)),
            }
        }
    }

    /// Binary operator precedence, tightest last. `&&`/`||` participate here; the
    /// keyword forms live in `parse_kw_logic`.
    fn binary_levels() -> &'static [&'static [(&'static TokenKind, &'static str)]] {
        const LEVELS: &[&[(&TokenKind, &str)]] = &[
            &[(&TokenKind::PipePipe, "||")],
            &[(&TokenKind::AmpAmp, "&&")],
            &[
                (&TokenKind::EqEq, "=="),
                (&TokenKind::NotEq, "!="),
                (&TokenKind::EqEqEq, "==="),
                (&TokenKind::Match, "=~"),
            ],
            &[
                (&TokenKind::Lt, "<"),
                (&TokenKind::Gt, ">"),
                (&TokenKind::LtEq, "<="),
                (&TokenKind::GtEq, ">="),
                (&TokenKind::Spaceship, "<=>"),
            ],
            &[(&TokenKind::Pipe, "|"), (&TokenKind::Caret, "^")],
            &[(&TokenKind::Amp, "&")],
            &[(&TokenKind::LShift, "<<"), (&TokenKind::RShift, ">>")],
            &[(&TokenKind::Plus, "+"), (&TokenKind::Minus, "-")],
            &[
                (&TokenKind::Star, "*"),
                (&TokenKind::Slash, "/"),
                (&TokenKind::Percent, "%"),
            ],
        ];
        LEVELS
    }

    fn parse_binary(&mut self, level: usize) -> Node {
        let levels = Self::binary_levels();
        if level >= levels.len() {
            return self.parse_unary();
        }
        let mut left = self.parse_binary(level + 1);
        loop {
            let Some(&(_, op)) = levels[level].iter().find(|(kind, _)| self.at(kind)) else {
                return left;
            };
            self.advance();
            let right = self.parse_binary(level + 1);
            let loc = left.loc().join(right.loc());
            left = match op {
                // The logical forms stay structural; everything else is a send.
                "&&" => Node::And {
                    loc,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                "||" => Node::Or {
                    loc,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                "!=" => {
                    // `a != b` reads as `!(a == b)`.
                    let eq = Node::Send {
                        loc,
                        recv: Some(Box::new(left)),
                        method: "==".into(),
                        args: vec![right],
                    };
                    Node::Send {
                        loc,
                        recv: Some(Box::new(eq)),
                        method: "!".into(),
                        args: Vec::new(),
                    }
                }
                _ => Node::Send {
                    loc,
                    recv: Some(Box::new(left)),
                    method: op.into(),
                    args: vec![right],
                },
            };
        }
    }

    fn parse_unary(&mut self) -> Node {
        let start = self.here();
        match self.peek() {
            TokenKind::Bang => {
                self.advance();
                let operand = self.parse_unary();
                let loc = start.join(operand.loc());
                Node::Send {
                    loc,
                    recv: Some(Box::new(operand)),
                    method: "!".into(),
                    args: Vec::new(),
                }
            }
            TokenKind::Tilde => {
                self.advance();
                let operand = self.parse_unary();
                let loc = start.join(operand.loc());
                Node::Send {
                    loc,
                    recv: Some(Box::new(operand)),
                    method: "~".into(),
                    args: Vec::new(),
                }
            }
            TokenKind::Minus => {
                self.advance();
                // Negative numeric literals fold at parse time.
                match self.peek().clone() {
                    TokenKind::Integer(text) => {
                        self.advance();
                        let loc = start.join(self.prev_loc());
                        Node::Integer {
                            loc,
                            value: format!("-{text}"),
                        }
                    }
                    TokenKind::Float(text) => {
                        self.advance();
                        let loc = start.join(self.prev_loc());
                        Node::Float {
                            loc,
                            value: format!("-{text}"),
                        }
                    }
                    _ => {
                        let operand = self.parse_unary();
                        let loc = start.join(operand.loc());
                        Node::Send {
                            loc,
                            recv: Some(Box::new(operand)),
                            method: "-@".into(),
                            args: Vec::new(),
                        }
                    }
                }
            }
            TokenKind::Plus => {
                self.advance();
                let operand = self.parse_unary();
                let loc = start.join(operand.loc());
                Node::Send {
                    loc,
                    recv: Some(Box::new(operand)),
                    method: "+@".into(),
                    args: Vec::new(),
                }
            }
            _ => self.parse_power(),
        }
    }

    fn parse_power(&mut self) -> Node {
        let base = self.parse_postfix();
        if !self.at(&TokenKind::StarStar) {
            return base;
        }
        self.advance();
        // Right-associative: the exponent may itself be a power.
        let exp = self.parse_unary();
        let loc = base.loc().join(exp.loc());
        Node::Send {
            loc,
            recv: Some(Box::new(base)),
            method: "**".into(),
            args: vec![exp],
        }
    }

    // ===== postfix chains: calls, indexing, constants, blocks =====

    fn parse_postfix(&mut self) -> Node {
        let mut node = self.parse_primary();
        loop {
            match self.peek() {
                TokenKind::Dot | TokenKind::SafeNav => {
                    let safe = self.at(&TokenKind::SafeNav);
                    self.advance();
                    let (method, method_loc) = self.parse_method_name();
                    let args = if self.at(&TokenKind::LParen) {
                        self.parse_paren_args()
                    } else {
                        Vec::new()
                    };
                    let loc = node.loc().join(self.prev_loc()).join(method_loc);
                    node = if safe {
                        Node::CSend {
                            loc,
                            recv: Box::new(node),
                            method,
                            args,
                        }
                    } else {
                        Node::Send {
                            loc,
                            recv: Some(Box::new(node)),
                            method,
                            args,
                        }
                    };
                    node = self.maybe_parse_block(node);
                }
                TokenKind::ColonColon => {
                    self.advance();
                    match self.peek().clone() {
                        TokenKind::Constant(name) => {
                            self.advance();
                            let loc = node.loc().join(self.prev_loc());
                            node = Node::Const {
                                loc,
                                scope: Some(Box::new(node)),
                                name,
                            };
                        }
                        _ => {
                            let (method, method_loc) = self.parse_method_name();
                            let args = if self.at(&TokenKind::LParen) {
                                self.parse_paren_args()
                            } else {
                                Vec::new()
                            };
                            let loc = node.loc().join(self.prev_loc()).join(method_loc);
                            node = Node::Send {
                                loc,
                                recv: Some(Box::new(node)),
                                method,
                                args,
                            };
                            node = self.maybe_parse_block(node);
                        }
                    }
                }
                TokenKind::LBracket => {
                    self.advance();
                    let mut args = Vec::new();
                    self.skip_separators();
                    while !self.at(&TokenKind::RBracket) && !self.at(&TokenKind::Eof) {
                        args.push(self.parse_arg());
                        self.skip_separators();
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                        self.skip_separators();
                    }
                    self.expect(&TokenKind::RBracket, "`]`");
                    let loc = node.loc().join(self.prev_loc());
                    node = Node::Send {
                        loc,
                        recv: Some(Box::new(node)),
                        method: "[]".into(),
                        args,
                    };
                }
                _ => return node,
            }
        }
    }

    fn parse_method_name(&mut self) -> (String, Loc) {
        let loc = self.here();
        match self.peek().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                (name, loc)
            }
            TokenKind::Constant(name) => {
                // `recv.Constant` is a plain method call.
                self.advance();
                (name, loc)
            }
            TokenKind::KwClass => {
                self.advance();
                ("class".into(), loc)
            }
            other => {
                // Operator method names after a dot: `a.+(b)` and friends.
                let text = match other {
                    TokenKind::Plus => Some("+"),
                    TokenKind::Minus => Some("-"),
                    TokenKind::Star => Some("*"),
                    TokenKind::Slash => Some("/"),
                    TokenKind::EqEq => Some("=="),
                    TokenKind::LBracket if self.peek_at(1) == &TokenKind::RBracket => Some("[]"),
                    _ => None,
                };
                match text {
                    Some(op) => {
                        self.advance();
                        if op == "[]" {
                            self.advance();
                        }
                        (op.to_owned(), loc)
                    }
                    None => {
                        self.error_here("expected method name");
                        ("<error>".into(), loc)
                    }
                }
            }
        }
    }

    fn parse_paren_args(&mut self) -> Vec<Node> {
        self.expect(&TokenKind::LParen, "`(`");
        let mut args = Vec::new();
        self.skip_separators();
        while !self.at(&TokenKind::RParen) && !self.at(&TokenKind::Eof) {
            args.push(self.parse_arg());
            self.skip_separators();
            if !self.eat(&TokenKind::Comma) {
                break;
            }
            self.skip_separators();
        }
        self.expect(&TokenKind::RParen, "`)`");
        args
    }

    /// One actual argument: expression, `*splat`, `&block`, or `key: value`.
    fn parse_arg(&mut self) -> Node {
        match self.peek() {
            TokenKind::Star => {
                let star_loc = self.here();
                self.advance();
                let inner = self.parse_expr();
                let loc = star_loc.join(inner.loc());
                Node::Splat {
                    loc,
                    value: Some(Box::new(inner)),
                }
            }
            TokenKind::StarStar => {
                let loc = self.here();
                self.advance();
                let inner = self.parse_expr();
                let loc = loc.join(inner.loc());
                Node::Kwsplat {
                    loc,
                    value: Box::new(inner),
                }
            }
            TokenKind::Amp => {
                let amp_loc = self.here();
                self.advance();
                let inner = self.parse_expr();
                let loc = amp_loc.join(inner.loc());
                Node::BlockPass {
                    loc,
                    value: Box::new(inner),
                }
            }
            TokenKind::Ident(_) if self.peek_at(1) == &TokenKind::Colon => {
                // Hash label argument: `f(key: value)`.
                let key_loc = self.here();
                let TokenKind::Ident(name) = self.advance().kind else {
                    unreachable!("peeked ident");
                };
                self.advance();
                let value = self.parse_expr();
                let loc = key_loc.join(value.loc());
                Node::Pair {
                    loc,
                    key: Box::new(Node::Sym {
                        loc: key_loc,
                        name,
                    }),
                    value: Box::new(value),
                }
            }
            _ => self.parse_expr(),
        }
    }

    /// Attaches a brace or `do` block to a call node when one follows.
    fn maybe_parse_block(&mut self, call: Node) -> Node {
        let brace = match self.peek() {
            TokenKind::LBrace => true,
            TokenKind::KwDo => false,
            _ => return call,
        };
        // Blocks only attach to calls.
        if !matches!(call, Node::Send { .. } | Node::CSend { .. } | Node::Super { .. } | Node::ZSuper(_)) {
            return call;
        }
        let start = self.here();
        self.advance();
        self.push_inherited_scope();
        let args = if self.at(&TokenKind::Pipe) {
            self.parse_block_args()
        } else {
            Vec::new()
        };
        let terminator = if brace { TokenKind::RBrace } else { TokenKind::KwEnd };
        let stmts = self.parse_stmts(std::slice::from_ref(&terminator));
        self.expect(&terminator, if brace { "`}`" } else { "`end`" });
        self.pop_scope();
        let loc = call.loc().join(start).join(self.prev_loc());
        let body = Self::stmts_to_body(stmts);
        Node::Block {
            loc,
            call: Box::new(call),
            args,
            body,
        }
    }

    fn stmts_to_body(mut stmts: Vec<Node>) -> Option<Box<Node>> {
        match stmts.len() {
            0 => None,
            1 => Some(Box::new(stmts.pop().expect("len checked"))),
            _ => {
                let loc = stmts
                    .first()
                    .map(Node::loc)
                    .unwrap_or(Loc::NONE)
                    .join(stmts.last().map(Node::loc).unwrap_or(Loc::NONE));
                Some(Box::new(Node::Begin { loc, stmts }))
            }
        }
    }

    fn parse_block_args(&mut self) -> Vec<Node> {
        self.expect(&TokenKind::Pipe, "`|`");
        let mut args = Vec::new();
        let mut shadow = false;
        while !self.at(&TokenKind::Pipe) && !self.at(&TokenKind::Eof) {
            if self.eat(&TokenKind::Semi) {
                shadow = true;
                continue;
            }
            let arg = self.parse_formal_arg(shadow);
            self.declare_formal_locals(&arg);
            args.push(arg);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::Pipe, "`|`");
        args
    }

    fn declare_formal_locals(&mut self, arg: &Node) {
        match arg {
            Node::Arg { name, .. }
            | Node::OptArg { name, .. }
            | Node::KwArg { name, .. }
            | Node::KwOptArg { name, .. }
            | Node::BlockArg { name, .. }
            | Node::ShadowArg { name, .. } => self.declare_local(&name.clone()),
            Node::RestArg { name: Some(name), .. } | Node::KwRestArg { name: Some(name), .. } => {
                self.declare_local(&name.clone());
            }
            Node::Mlhs { targets, .. } => {
                for t in targets.clone() {
                    self.declare_formal_locals(&t);
                }
            }
            _ => {}
        }
    }

    /// One formal argument in a def or block signature.
    fn parse_formal_arg(&mut self, shadow: bool) -> Node {
        let start = self.here();
        match self.peek().clone() {
            TokenKind::Star => {
                self.advance();
                let name = match self.peek().clone() {
                    TokenKind::Ident(name) => {
                        self.advance();
                        Some(name)
                    }
                    _ => None,
                };
                Node::RestArg {
                    loc: start.join(self.prev_loc()),
                    name,
                }
            }
            TokenKind::StarStar => {
                self.advance();
                let name = match self.peek().clone() {
                    TokenKind::Ident(name) => {
                        self.advance();
                        Some(name)
                    }
                    _ => None,
                };
                Node::KwRestArg {
                    loc: start.join(self.prev_loc()),
                    name,
                }
            }
            TokenKind::Amp => {
                self.advance();
                let name = match self.peek().clone() {
                    TokenKind::Ident(name) => {
                        self.advance();
                        name
                    }
                    _ => {
                        self.error_here("expected block argument name");
                        "<error>".into()
                    }
                };
                Node::BlockArg {
                    loc: start.join(self.prev_loc()),
                    name,
                }
            }
            TokenKind::LParen => {
                // Destructuring block argument: `|(a, b)|`.
                self.advance();
                let mut targets = Vec::new();
                while !self.at(&TokenKind::RParen) && !self.at(&TokenKind::Eof) {
                    targets.push(self.parse_formal_arg(false));
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::RParen, "`)`");
                Node::Mlhs {
                    loc: start.join(self.prev_loc()),
                    targets,
                }
            }
            TokenKind::Ident(name) => {
                self.advance();
                let loc = start.join(self.prev_loc());
                if shadow {
                    return Node::ShadowArg { loc, name };
                }
                if self.eat(&TokenKind::Colon) {
                    // Keyword argument, with or without a default.
                    if matches!(self.peek(), TokenKind::Comma | TokenKind::RParen | TokenKind::Pipe) {
                        return Node::KwArg { loc, name };
                    }
                    let default = self.parse_expr();
                    let loc = loc.join(default.loc());
                    return Node::KwOptArg {
                        loc,
                        name,
                        default: Box::new(default),
                    };
                }
                if self.eat(&TokenKind::Assign) {
                    let default = self.parse_expr();
                    let loc = loc.join(default.loc());
                    return Node::OptArg {
                        loc,
                        name,
                        default: Box::new(default),
                    };
                }
                Node::Arg { loc, name }
            }
            other => {
                self.error_here(format!("unexpected token in argument list: {other:?}"));
                self.advance();
                Node::Missing(start)
            }
        }
    }

    // ===== primaries =====

    fn parse_primary(&mut self) -> Node {
        let start = self.here();
        match self.peek().clone() {
            TokenKind::KwNil => {
                self.advance();
                Node::Nil(start)
            }
            TokenKind::KwTrue => {
                self.advance();
                Node::True(start)
            }
            TokenKind::KwFalse => {
                self.advance();
                Node::False(start)
            }
            TokenKind::KwSelf => {
                self.advance();
                Node::SelfNode(start)
            }
            TokenKind::KwFile => {
                self.advance();
                Node::FileLit(start)
            }
            TokenKind::KwLine => {
                self.advance();
                Node::LineLit(start)
            }
            TokenKind::KwRedo => {
                self.advance();
                Node::Redo(start)
            }
            TokenKind::KwRetry => {
                self.advance();
                Node::Retry(start)
            }
            TokenKind::Integer(value) => {
                self.advance();
                Node::Integer { loc: start, value }
            }
            TokenKind::Float(value) => {
                self.advance();
                Node::Float { loc: start, value }
            }
            TokenKind::Str(parts) => {
                self.advance();
                self.string_node(start, parts)
            }
            TokenKind::Sym(name) => {
                self.advance();
                Node::Sym { loc: start, name }
            }
            TokenKind::DSym(parts) => {
                self.advance();
                let parts = self.convert_str_parts(parts);
                Node::DSym { loc: start, parts }
            }
            TokenKind::Regexp { parts, options } => {
                self.advance();
                let parts = self.convert_str_parts(parts);
                Node::Regexp {
                    loc: start,
                    parts,
                    options,
                }
            }
            TokenKind::Backref(name) => {
                self.advance();
                Node::Backref { loc: start, name }
            }
            TokenKind::IVar(name) => {
                self.advance();
                Node::IVar { loc: start, name }
            }
            TokenKind::GVar(name) => {
                self.advance();
                Node::GVar { loc: start, name }
            }
            TokenKind::CVar(name) => {
                self.advance();
                Node::CVar { loc: start, name }
            }
            TokenKind::Constant(name) => {
                self.advance();
                let node = Node::Const {
                    loc: start,
                    scope: None,
                    name,
                };
                // A constant can head a call: `Integer("3")` or command args.
                if self.at(&TokenKind::LParen) {
                    let Node::Const { name, .. } = node else {
                        unreachable!("just built");
                    };
                    let args = self.parse_paren_args();
                    let call = Node::Send {
                        loc: start.join(self.prev_loc()),
                        recv: None,
                        method: name,
                        args,
                    };
                    return self.maybe_parse_block(call);
                }
                node
            }
            TokenKind::Ident(name) => {
                self.advance();
                self.parse_ident_expr(start, name)
            }
            TokenKind::LParen => {
                self.advance();
                let stmts = self.parse_stmts(&[TokenKind::RParen]);
                self.expect(&TokenKind::RParen, "`)`");
                let loc = start.join(self.prev_loc());
                match Self::stmts_to_body(stmts) {
                    Some(node) => *node,
                    None => Node::Begin {
                        loc,
                        stmts: Vec::new(),
                    },
                }
            }
            TokenKind::LBracket => {
                self.advance();
                let mut elems = Vec::new();
                self.skip_separators();
                while !self.at(&TokenKind::RBracket) && !self.at(&TokenKind::Eof) {
                    elems.push(self.parse_arg());
                    self.skip_separators();
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                    self.skip_separators();
                }
                self.expect(&TokenKind::RBracket, "`]`");
                Node::Array {
                    loc: start.join(self.prev_loc()),
                    elems,
                }
            }
            TokenKind::LBrace => {
                self.advance();
                let pairs = self.parse_hash_body(&TokenKind::RBrace);
                self.expect(&TokenKind::RBrace, "`}`");
                Node::Hash {
                    loc: start.join(self.prev_loc()),
                    pairs,
                }
            }
            TokenKind::KwIf => self.parse_if_expr(false),
            TokenKind::KwUnless => self.parse_if_expr(true),
            TokenKind::KwWhile => self.parse_while_expr(false),
            TokenKind::KwUntil => self.parse_while_expr(true),
            TokenKind::KwFor => self.parse_for_expr(),
            TokenKind::KwCase => self.parse_case_expr(),
            TokenKind::KwBegin => self.parse_begin_expr(),
            TokenKind::KwDef => self.parse_def_expr(),
            TokenKind::KwClass => self.parse_class_expr(),
            TokenKind::KwModule => self.parse_module_expr(),
            TokenKind::KwReturn => {
                self.advance();
                let value = self.parse_optional_value();
                let loc = value.as_ref().map_or(start, |v| start.join(v.loc()));
                Node::Return { loc, value }
            }
            TokenKind::KwBreak => {
                self.advance();
                let value = self.parse_optional_value();
                let loc = value.as_ref().map_or(start, |v| start.join(v.loc()));
                Node::Break { loc, value }
            }
            TokenKind::KwNext => {
                self.advance();
                let value = self.parse_optional_value();
                let loc = value.as_ref().map_or(start, |v| start.join(v.loc()));
                Node::Next { loc, value }
            }
            TokenKind::KwYield => {
                self.advance();
                let args = if self.at(&TokenKind::LParen) {
                    self.parse_paren_args()
                } else if self.starts_expression() {
                    self.parse_command_args()
                } else {
                    Vec::new()
                };
                Node::Yield {
                    loc: start.join(self.prev_loc()),
                    args,
                }
            }
            TokenKind::KwSuper => {
                self.advance();
                if self.at(&TokenKind::LParen) {
                    let args = self.parse_paren_args();
                    let node = Node::Super {
                        loc: start.join(self.prev_loc()),
                        args,
                    };
                    self.maybe_parse_block(node)
                } else if self.starts_expression() {
                    let args = self.parse_command_args();
                    let node = Node::Super {
                        loc: start.join(self.prev_loc()),
                        args,
                    };
                    self.maybe_parse_block(node)
                } else {
                    self.maybe_parse_block(Node::ZSuper(start))
                }
            }
            TokenKind::KwDefined => {
                self.advance();
                let parens = self.eat(&TokenKind::LParen);
                let value = self.parse_expr();
                if parens {
                    self.expect(&TokenKind::RParen, "`)`");
                }
                Node::Defined {
                    loc: start.join(self.prev_loc()),
                    value: Box::new(value),
                }
            }
            TokenKind::KwUndef => {
                self.advance();
                let mut names = Vec::new();
                loop {
                    names.push(self.parse_expr());
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                Node::Undef {
                    loc: start.join(self.prev_loc()),
                    names,
                }
            }
            TokenKind::KwPreexe | TokenKind::KwPostexe => {
                let pre = self.at(&TokenKind::KwPreexe);
                self.advance();
                self.expect(&TokenKind::LBrace, "`{`");
                let _body = self.parse_stmts(&[TokenKind::RBrace]);
                self.expect(&TokenKind::RBrace, "`}`");
                let loc = start.join(self.prev_loc());
                if pre { Node::Preexe(loc) } else { Node::Postexe(loc) }
            }
            other => {
                self.error_here(format!("unexpected token: {other:?}"));
                self.advance();
                Node::Missing(start)
            }
        }
    }

    /// An identifier in expression position: local variable, paren call, or
    /// paren-less command call.
    fn parse_ident_expr(&mut self, start: Loc, name: String) -> Node {
        if self.at(&TokenKind::LParen) {
            let args = self.parse_paren_args();
            let call = Node::Send {
                loc: start.join(self.prev_loc()),
                recv: None,
                method: name,
                args,
            };
            return self.maybe_parse_block(call);
        }
        if self.is_local(&name) {
            return Node::LVar { loc: start, name };
        }
        if self.starts_expression() {
            let args = self.parse_command_args();
            let call = Node::Send {
                loc: start.join(self.prev_loc()),
                recv: None,
                method: name,
                args,
            };
            return self.maybe_parse_block(call);
        }
        let call = Node::Send {
            loc: start,
            recv: None,
            method: name,
            args: Vec::new(),
        };
        self.maybe_parse_block(call)
    }

    /// Whether the current token clearly begins an expression, enabling a
    /// paren-less command call like `include Foo` or `puts x`.
    fn starts_expression(&self) -> bool {
        matches!(
            self.peek(),
            TokenKind::Integer(_)
                | TokenKind::Float(_)
                | TokenKind::Str(_)
                | TokenKind::Sym(_)
                | TokenKind::DSym(_)
                | TokenKind::Regexp { .. }
                | TokenKind::Ident(_)
                | TokenKind::Constant(_)
                | TokenKind::IVar(_)
                | TokenKind::GVar(_)
                | TokenKind::CVar(_)
                | TokenKind::KwSelf
                | TokenKind::KwNil
                | TokenKind::KwTrue
                | TokenKind::KwFalse
                | TokenKind::LBracket
                | TokenKind::Star
                | TokenKind::Amp
                | TokenKind::KwDef
                | TokenKind::KwDefined
                | TokenKind::Bang
        )
    }

    fn parse_command_args(&mut self) -> Vec<Node> {
        let mut args = Vec::new();
        loop {
            args.push(self.parse_arg());
            if !self.eat(&TokenKind::Comma) {
                return args;
            }
            self.skip_separators();
        }
    }

    fn parse_optional_value(&mut self) -> Option<Box<Node>> {
        if self.starts_expression() || self.at(&TokenKind::LParen) || self.at(&TokenKind::Minus) {
            Some(Box::new(self.parse_expr()))
        } else {
            None
        }
    }

    fn parse_hash_body(&mut self, terminator: &TokenKind) -> Vec<Node> {
        let mut pairs = Vec::new();
        self.skip_separators();
        while !self.at(terminator) && !self.at(&TokenKind::Eof) {
            let start = self.here();
            if self.at(&TokenKind::StarStar) {
                self.advance();
                let value = self.parse_expr();
                let loc = start.join(value.loc());
                pairs.push(Node::Kwsplat {
                    loc,
                    value: Box::new(value),
                });
            } else if matches!(self.peek(), TokenKind::Ident(_) | TokenKind::Constant(_))
                && self.peek_at(1) == &TokenKind::Colon
            {
                let name = match self.advance().kind {
                    TokenKind::Ident(name) | TokenKind::Constant(name) => name,
                    _ => unreachable!("peeked"),
                };
                self.advance();
                let value = self.parse_expr();
                let loc = start.join(value.loc());
                pairs.push(Node::Pair {
                    loc,
                    key: Box::new(Node::Sym { loc: start, name }),
                    value: Box::new(value),
                });
            } else {
                let key = self.parse_expr();
                self.expect(&TokenKind::FatArrow, "`=>` in hash literal");
                let value = self.parse_expr();
                let loc = key.loc().join(value.loc());
                pairs.push(Node::Pair {
                    loc,
                    key: Box::new(key),
                    value: Box::new(value),
                });
            }
            self.skip_separators();
            if !self.eat(&TokenKind::Comma) {
                break;
            }
            self.skip_separators();
        }
        pairs
    }

    fn string_node(&mut self, loc: Loc, parts: Vec<StrPart>) -> Node {
        let parts = self.convert_str_parts(parts);
        match parts.as_slice() {
            [Node::Str { .. }] => {
                let mut parts = parts;
                let Some(Node::Str { value, .. }) = parts.pop() else {
                    unreachable!("matched above");
                };
                Node::Str { loc, value }
            }
            _ => Node::DStr { loc, parts },
        }
    }

    /// Turns lexer string parts into child nodes, re-parsing interpolations.
    fn convert_str_parts(&mut self, parts: Vec<StrPart>) -> Vec<Node> {
        let mut nodes = Vec::new();
        for part in parts {
            match part {
                StrPart::Text(value) => nodes.push(Node::Str {
                    loc: self.prev_loc(),
                    value,
                }),
                StrPart::Interp { begin, end } => {
                    let mut lexer = Lexer::new(self.source, self.file, begin as usize, end as usize);
                    let tokens = lexer.tokenize();
                    self.errors.extend(lexer.take_errors());
                    let mut sub = Parser::new(self.source, self.file, tokens);
                    sub.locals = self.locals.clone();
                    let stmts = sub.parse_stmts(&[]);
                    self.errors.extend(sub.errors);
                    match Self::stmts_to_body(stmts) {
                        Some(node) => nodes.push(*node),
                        None => nodes.push(Node::Str {
                            loc: self.prev_loc(),
                            value: String::new(),
                        }),
                    }
                }
            }
        }
        nodes
    }

    // ===== compound statements =====

    fn parse_then_body(&mut self, terminators: &[TokenKind]) -> Vec<Node> {
        // `then` is optional after a condition.
        self.eat(&TokenKind::KwThen);
        self.parse_stmts(terminators)
    }

    fn parse_if_expr(&mut self, unless: bool) -> Node {
        let start = self.here();
        self.advance();
        let cond = self.parse_expr();
        let stop = [TokenKind::KwElsif, TokenKind::KwElse, TokenKind::KwEnd];
        let then_stmts = self.parse_then_body(&stop);
        let else_branch = self.parse_else_tail();
        self.expect(&TokenKind::KwEnd, "`end`");
        let loc = start.join(self.prev_loc());
        let then_branch = Self::stmts_to_body(then_stmts);
        if unless {
            Node::If {
                loc,
                cond: Box::new(cond),
                then_branch: else_branch,
                else_branch: then_branch,
            }
        } else {
            Node::If {
                loc,
                cond: Box::new(cond),
                then_branch,
                else_branch,
            }
        }
    }

    /// The `elsif ... / else ... end` tail of an if; `elsif` builds a nested if.
    fn parse_else_tail(&mut self) -> Option<Box<Node>> {
        if self.at(&TokenKind::KwElsif) {
            let start = self.here();
            self.advance();
            let cond = self.parse_expr();
            let stop = [TokenKind::KwElsif, TokenKind::KwElse, TokenKind::KwEnd];
            let then_stmts = self.parse_then_body(&stop);
            let else_branch = self.parse_else_tail();
            let loc = start.join(self.prev_loc());
            return Some(Box::new(Node::If {
                loc,
                cond: Box::new(cond),
                then_branch: Self::stmts_to_body(then_stmts),
                else_branch,
            }));
        }
        if self.eat(&TokenKind::KwElse) {
            let stmts = self.parse_stmts(&[TokenKind::KwEnd]);
            return Self::stmts_to_body(stmts);
        }
        None
    }

    fn parse_while_expr(&mut self, until: bool) -> Node {
        let start = self.here();
        self.advance();
        let cond = self.parse_expr();
        self.eat(&TokenKind::KwDo);
        let stmts = self.parse_stmts(&[TokenKind::KwEnd]);
        self.expect(&TokenKind::KwEnd, "`end`");
        let loc = start.join(self.prev_loc());
        let body = Self::stmts_to_body(stmts);
        if until {
            Node::Until {
                loc,
                cond: Box::new(cond),
                body,
            }
        } else {
            Node::While {
                loc,
                cond: Box::new(cond),
                body,
            }
        }
    }

    fn parse_for_expr(&mut self) -> Node {
        let start = self.here();
        self.advance();
        // The loop variable: a name or a destructuring list.
        let var_start = self.here();
        let mut targets = Vec::new();
        loop {
            match self.peek().clone() {
                TokenKind::Ident(name) => {
                    self.advance();
                    self.declare_local(&name);
                    targets.push(Node::LVar {
                        loc: self.prev_loc(),
                        name,
                    });
                }
                TokenKind::Star => {
                    self.advance();
                    let name = match self.peek().clone() {
                        TokenKind::Ident(name) => {
                            self.advance();
                            self.declare_local(&name);
                            Some(Box::new(Node::LVar {
                                loc: self.prev_loc(),
                                name,
                            }))
                        }
                        _ => None,
                    };
                    targets.push(Node::Splat {
                        loc: self.prev_loc(),
                        value: name,
                    });
                }
                _ => {
                    self.error_here("expected loop variable");
                    break;
                }
            }
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        let var = if targets.len() == 1 {
            Box::new(targets.into_iter().next().expect("len checked"))
        } else {
            Box::new(Node::Mlhs {
                loc: var_start.join(self.prev_loc()),
                targets,
            })
        };
        self.expect(&TokenKind::KwIn, "`in`");
        let iter = self.parse_expr();
        self.eat(&TokenKind::KwDo);
        let stmts = self.parse_stmts(&[TokenKind::KwEnd]);
        self.expect(&TokenKind::KwEnd, "`end`");
        let loc = start.join(self.prev_loc());
        Node::For {
            loc,
            var,
            iter: Box::new(iter),
            body: Self::stmts_to_body(stmts),
        }
    }

    fn parse_case_expr(&mut self) -> Node {
        let start = self.here();
        self.advance();
        let scrutinee = if matches!(self.peek(), TokenKind::Newline | TokenKind::Semi | TokenKind::KwWhen) {
            None
        } else {
            Some(Box::new(self.parse_expr()))
        };
        self.skip_separators();
        let mut whens = Vec::new();
        while self.at(&TokenKind::KwWhen) {
            let when_start = self.here();
            self.advance();
            let mut patterns = Vec::new();
            loop {
                patterns.push(self.parse_arg());
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            let stop = [TokenKind::KwWhen, TokenKind::KwElse, TokenKind::KwEnd];
            let stmts = self.parse_then_body(&stop);
            whens.push(WhenClause {
                loc: when_start.join(self.prev_loc()),
                patterns,
                body: Self::stmts_to_body(stmts),
            });
        }
        let else_branch = if self.eat(&TokenKind::KwElse) {
            Self::stmts_to_body(self.parse_stmts(&[TokenKind::KwEnd]))
        } else {
            None
        };
        self.expect(&TokenKind::KwEnd, "`end`");
        Node::Case {
            loc: start.join(self.prev_loc()),
            scrutinee,
            whens,
            else_branch,
        }
    }

    fn parse_begin_expr(&mut self) -> Node {
        let start = self.here();
        self.advance();
        let stop = [
            TokenKind::KwRescue,
            TokenKind::KwElse,
            TokenKind::KwEnsure,
            TokenKind::KwEnd,
        ];
        let body_stmts = self.parse_stmts(&stop);
        let node = self.parse_rescue_tail(start, Self::stmts_to_body(body_stmts));
        self.expect(&TokenKind::KwEnd, "`end`");
        node
    }

    /// Parses the `rescue/else/ensure` clauses shared by `begin` blocks and method
    /// bodies. Consumes everything up to (not including) the final `end`.
    fn parse_rescue_tail(&mut self, start: Loc, body: Option<Box<Node>>) -> Node {
        let mut cases = Vec::new();
        while self.at(&TokenKind::KwRescue) {
            let res_start = self.here();
            self.advance();
            let mut exceptions = Vec::new();
            while self.starts_expression() && !self.at(&TokenKind::FatArrow) {
                exceptions.push(self.parse_ternary());
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            let var = if self.eat(&TokenKind::FatArrow) {
                match self.peek().clone() {
                    TokenKind::Ident(name) => {
                        self.advance();
                        self.declare_local(&name);
                        Some(Box::new(Node::LVar {
                            loc: self.prev_loc(),
                            name,
                        }))
                    }
                    TokenKind::IVar(name) => {
                        self.advance();
                        Some(Box::new(Node::IVar {
                            loc: self.prev_loc(),
                            name,
                        }))
                    }
                    _ => {
                        self.error_here("expected rescue binding");
                        None
                    }
                }
            } else {
                None
            };
            let stop = [
                TokenKind::KwRescue,
                TokenKind::KwElse,
                TokenKind::KwEnsure,
                TokenKind::KwEnd,
            ];
            let stmts = self.parse_then_body(&stop);
            cases.push(ResBody {
                loc: res_start.join(self.prev_loc()),
                exceptions,
                var,
                body: Self::stmts_to_body(stmts),
            });
        }
        let else_branch = if self.eat(&TokenKind::KwElse) {
            let stop = [TokenKind::KwEnsure, TokenKind::KwEnd];
            Self::stmts_to_body(self.parse_stmts(&stop))
        } else {
            None
        };
        let ensure_body = if self.eat(&TokenKind::KwEnsure) {
            Self::stmts_to_body(self.parse_stmts(&[TokenKind::KwEnd]))
        } else {
            None
        };
        let loc = start.join(self.here());

        let mut node = if cases.is_empty() && else_branch.is_none() {
            match body {
                Some(b) if ensure_body.is_none() => Node::Begin {
                    loc,
                    stmts: vec![*b],
                },
                Some(b) => *b,
                None => Node::Begin {
                    loc,
                    stmts: Vec::new(),
                },
            }
        } else {
            Node::Rescue {
                loc,
                body,
                cases,
                else_branch,
            }
        };
        if let Some(ensure_body) = ensure_body {
            node = Node::Ensure {
                loc,
                body: Some(Box::new(node)),
                ensure_body: Some(ensure_body),
            };
        }
        node
    }

    fn parse_def_expr(&mut self) -> Node {
        let decl_start = self.here();
        self.advance();
        // `def self.name` / `def expr.name` / `def name`.
        let mut recv: Option<Box<Node>> = None;
        if self.at(&TokenKind::KwSelf) && self.peek_at(1) == &TokenKind::Dot {
            let self_loc = self.here();
            self.advance();
            self.advance();
            recv = Some(Box::new(Node::SelfNode(self_loc)));
        } else if matches!(self.peek(), TokenKind::Constant(_)) && self.peek_at(1) == &TokenKind::Dot {
            let TokenKind::Constant(name) = self.advance().kind else {
                unreachable!("peeked constant");
            };
            let const_loc = self.prev_loc();
            self.advance();
            recv = Some(Box::new(Node::Const {
                loc: const_loc,
                scope: None,
                name,
            }));
        }
        let (name, name_loc) = self.parse_method_name();
        let decl_loc = decl_start.join(name_loc);

        self.push_fresh_scope();
        let args = if self.at(&TokenKind::LParen) {
            self.expect(&TokenKind::LParen, "`(`");
            let mut args = Vec::new();
            while !self.at(&TokenKind::RParen) && !self.at(&TokenKind::Eof) {
                let arg = self.parse_formal_arg(false);
                self.declare_formal_locals(&arg);
                args.push(arg);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::RParen, "`)`");
            args
        } else if matches!(self.peek(), TokenKind::Ident(_) | TokenKind::Star | TokenKind::Amp) {
            // Paren-less formal list: `def m a, b`.
            let mut args = Vec::new();
            loop {
                let arg = self.parse_formal_arg(false);
                self.declare_formal_locals(&arg);
                args.push(arg);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            args
        } else {
            Vec::new()
        };

        let stop = [
            TokenKind::KwRescue,
            TokenKind::KwElse,
            TokenKind::KwEnsure,
            TokenKind::KwEnd,
        ];
        let body_stmts = self.parse_stmts(&stop);
        let body_node = self.parse_rescue_tail(decl_start, Self::stmts_to_body(body_stmts));
        // parse_rescue_tail wraps plain bodies in Begin; unwrap the simple case.
        let body = match body_node {
            Node::Begin { stmts, .. } if stmts.len() <= 1 => stmts.into_iter().next().map(Box::new),
            other => Some(Box::new(other)),
        };
        self.expect(&TokenKind::KwEnd, "`end`");
        self.pop_scope();
        let loc = decl_start.join(self.prev_loc());
        match recv {
            Some(recv) => Node::Defs {
                loc,
                decl_loc,
                recv,
                name,
                args,
                body,
            },
            None => Node::Def {
                loc,
                decl_loc,
                name,
                args,
                body,
            },
        }
    }

    fn parse_class_expr(&mut self) -> Node {
        let decl_start = self.here();
        self.advance();
        if self.at(&TokenKind::LShift) {
            // `class << expr`
            self.advance();
            let expr = self.parse_expr();
            let decl_loc = decl_start.join(expr.loc());
            self.push_fresh_scope();
            let stmts = self.parse_stmts(&[TokenKind::KwEnd]);
            self.expect(&TokenKind::KwEnd, "`end`");
            self.pop_scope();
            return Node::SClass {
                loc: decl_start.join(self.prev_loc()),
                decl_loc,
                expr: Box::new(expr),
                body: Self::stmts_to_body(stmts),
            };
        }
        let name = self.parse_cpath();
        let superclass = if self.eat(&TokenKind::Lt) {
            Some(Box::new(self.parse_expr()))
        } else {
            None
        };
        let decl_loc = decl_start.join(self.prev_loc());
        self.push_fresh_scope();
        let stmts = self.parse_stmts(&[TokenKind::KwEnd]);
        self.expect(&TokenKind::KwEnd, "`end`");
        self.pop_scope();
        Node::Class {
            loc: decl_start.join(self.prev_loc()),
            decl_loc,
            name: Box::new(name),
            superclass,
            body: Self::stmts_to_body(stmts),
        }
    }

    fn parse_module_expr(&mut self) -> Node {
        let decl_start = self.here();
        self.advance();
        let name = self.parse_cpath();
        let decl_loc = decl_start.join(name.loc());
        self.push_fresh_scope();
        let stmts = self.parse_stmts(&[TokenKind::KwEnd]);
        self.expect(&TokenKind::KwEnd, "`end`");
        self.pop_scope();
        Node::Module {
            loc: decl_start.join(self.prev_loc()),
            decl_loc,
            name: Box::new(name),
            body: Self::stmts_to_body(stmts),
        }
    }

    /// A constant path in definition position: `A`, `A::B::C`.
    fn parse_cpath(&mut self) -> Node {
        let start = self.here();
        let mut node = match self.peek().clone() {
            TokenKind::Constant(name) => {
                self.advance();
                Node::Const {
                    loc: start,
                    scope: None,
                    name,
                }
            }
            other => {
                self.error_here(format!("expected constant name, found {other:?}"));
                return Node::Missing(start);
            }
        };
        while self.at(&TokenKind::ColonColon) && matches!(self.peek_at(1), TokenKind::Constant(_)) {
            self.advance();
            let TokenKind::Constant(name) = self.advance().kind else {
                unreachable!("peeked constant");
            };
            let loc = start.join(self.prev_loc());
            node = Node::Const {
                loc,
                scope: Some(Box::new(node)),
                name,
            };
        }
        node
    }
}
