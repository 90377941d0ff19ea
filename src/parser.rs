//! The recursive-descent parser (§4.2).
//!
//! Single pass, one token of lookahead (`peek(0)`/`peek(1)` are the only
//! uses — there's no backtracking). Every diagnostic is recorded rather
//! than thrown: a malformed statement sets `has_errors` and the parser
//! does its best to resynchronize at the next `;` so one bad line doesn't
//! cascade into hundreds of follow-on errors (§7's "no error recovery
//! beyond a boolean flag" still means *something* has to stop the loop
//! spinning on the same token forever).

use std::rc::Rc;

use crate::ast::{return_val_hash, Ast, AstNode, NodeId};
use crate::error::{Location, Syntax};
use crate::scope::{FunctionRecord, ScopeId, ScopeSet, Variable};
use crate::source::SourceSet;
use crate::token::{Token, TokenKind};
use crate::value::{kind_for_type_name, Value, ValueKind};

pub struct ParseResult {
    pub ast: Ast,
    pub scopes: ScopeSet,
    pub has_errors: bool,
    pub diagnostics: Vec<Syntax>,
}

pub struct Parser {
    tokens: Vec<Token>,
    sources: SourceSet,
    index: usize,
    ast: Ast,
    scopes: ScopeSet,
    current_scope: ScopeId,
    in_command_mode: bool,
    has_errors: bool,
    diagnostics: Vec<Syntax>,
    pending_docs: Vec<Token>,
    /// Doc-comments captured per function, for `help name;` (§4.2).
    function_docs: std::collections::HashMap<u32, Vec<Token>>,
    eof: Token,
}

impl Parser {
    pub fn new(tokens: Vec<Token>, sources: SourceSet) -> Parser {
        let eof = tokens.last().copied().map(|t| Token::new(
            TokenKind::Eof,
            t.source,
            t.end,
            t.end,
            t.line,
            t.col,
            &sources.get(t.source).contents,
        )).unwrap_or(Token::new(TokenKind::Eof, crate::source::SourceId(0), 0, 0, 1, 1, ""));

        let scopes = ScopeSet::new();
        let current_scope = scopes.root();
        Parser {
            tokens,
            sources,
            index: 0,
            ast: Ast::new(),
            scopes,
            current_scope,
            in_command_mode: false,
            has_errors: false,
            diagnostics: Vec::new(),
            pending_docs: Vec::new(),
            function_docs: std::collections::HashMap::new(),
            eof,
        }
    }

    /// Pre-declares a host-registered external variable (§6) into the global
    /// scope before parsing starts, so references to it in the script body
    /// resolve instead of being diagnosed as undefined. Call this, if at
    /// all, before [`Parser::parse`] — declaring after parsing has begun
    /// would not see statements already walked.
    pub fn declare_external_variable(&mut self, name_hash: u32, ty: ValueKind) -> bool {
        let root = self.scopes.root();
        self.scopes.declare(root, Variable { name_hash, ty, global: true, decl: crate::scope::EXTERNAL_DECL, external: true })
    }

    pub fn parse(mut self) -> ParseResult {
        let root_scope = self.current_scope;
        let statements = self.parse_statements_until_eof(root_scope);
        let root = self.ast.push(AstNode::Block(statements));
        self.ast.root = Some(root);
        ParseResult {
            ast: self.ast,
            scopes: self.scopes,
            has_errors: self.has_errors,
            diagnostics: self.diagnostics,
        }
    }

    // --- token cursor -----------------------------------------------------

    fn peek(&self, n: usize) -> Token {
        self.tokens.get(self.index + n).copied().unwrap_or(self.eof)
    }

    fn lexeme(&self, tok: Token) -> &str { tok.lexeme(&self.sources.get(tok.source).contents) }

    fn location(&self, tok: Token) -> Location { Location { line: tok.line, col: tok.col } }

    fn bump(&mut self) -> Token {
        let t = self.peek(0);
        if self.index < self.tokens.len() { self.index += 1; }
        t
    }

    fn at_eof(&self) -> bool { self.peek(0).kind == TokenKind::Eof }

    fn is_keyword(&self, n: usize, word: &str) -> bool {
        let t = self.peek(n);
        t.kind == TokenKind::Identifier && self.lexeme(t) == word
    }

    fn is_operator(&self, n: usize, c: char) -> bool { self.peek(n).is_operator(c) }

    fn error(&mut self, diag: Syntax) {
        self.has_errors = true;
        self.diagnostics.push(diag);
    }

    /// Consumes `c` if present; otherwise records an "expected X, found Y"
    /// diagnostic and still consumes one token, guaranteeing the parser
    /// always makes progress (§7).
    fn expect_operator(&mut self, c: char) {
        let t = self.peek(0);
        if t.is_operator(c) {
            self.bump();
        } else {
            let found = format!("{:?}", t.kind);
            self.error(Syntax::unexpected(self.location(t), format!("'{c}'"), found));
            if !self.at_eof() { self.bump(); }
        }
    }

    fn expect_identifier(&mut self) -> Token {
        let t = self.peek(0);
        if t.kind == TokenKind::Identifier {
            self.bump()
        } else {
            self.error(Syntax::unexpected(self.location(t), "identifier", format!("{:?}", t.kind)));
            if !self.at_eof() { self.bump(); }
            t
        }
    }

    /// Skips forward to just past the next `;` (or `}`/eof), to resynchronize
    /// after a statement-level parse failure.
    fn recover_to_statement_boundary(&mut self) {
        loop {
            let t = self.peek(0);
            if t.kind == TokenKind::Eof || t.is_operator('}') { return; }
            if t.is_operator(';') { self.bump(); return; }
            self.bump();
        }
    }

    // --- statements ---------------------------------------------------

    fn parse_statements_until_eof(&mut self, scope: ScopeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        while !self.at_eof() {
            out.extend(self.parse_statement(scope));
        }
        out
    }

    /// Consumes a `{ ... }` block, returning the statement nodes inside.
    fn parse_block(&mut self, scope: ScopeId) -> NodeId {
        self.expect_operator('{');
        let mut statements = Vec::new();
        while !self.is_operator(0, '}') && !self.at_eof() {
            statements.extend(self.parse_statement(scope));
        }
        self.expect_operator('}');
        self.ast.push(AstNode::Block(statements))
    }

    /// Parses one statement, which might expand into more than one AST node
    /// (`return <rhs>;` desugars into an assignment plus a bare return,
    /// §4.2) or none at all (`help name;` is a pure side effect).
    fn parse_statement(&mut self, scope: ScopeId) -> Vec<NodeId> {
        while self.peek(0).kind == TokenKind::DocComment {
            let t = self.bump();
            self.pending_docs.push(t);
        }
        if self.at_eof() { return Vec::new(); }

        if self.is_keyword(0, "fn") { return vec![self.parse_fn_decl(scope)]; }
        if self.is_keyword(0, "local") { return vec![self.parse_var_decl(scope, false)]; }
        if self.is_keyword(0, "global") { return vec![self.parse_var_decl(scope, true)]; }
        if self.is_keyword(0, "return") { return self.parse_return(scope); }
        if self.is_keyword(0, "help") { return self.parse_help(scope); }
        if self.is_operator(0, '$') { return self.parse_command_statement(scope); }

        if self.peek(0).kind == TokenKind::Identifier {
            if self.is_operator(1, '=') {
                let name_tok = self.bump();
                self.resolve_var_ref(scope, name_tok);
                let target = self.ast.push(AstNode::VarRef { name_hash: name_tok.hash, token: name_tok });
                self.expect_operator('=');
                let value = self.parse_rhs(scope);
                self.expect_operator(';');
                return vec![self.ast.push(AstNode::Assign { target, value })];
            }
            // Command mode drops the requirement for an explicit `(` —
            // `$ log x;` is as much a call as `log(x);` (§4.2, §6). Outside
            // command mode a bare identifier only starts a statement when
            // it's followed by `(`.
            if self.is_operator(1, '(') || self.in_command_mode {
                let node = self.parse_call(scope);
                self.expect_operator(';');
                return vec![node];
            }
        }

        let t = self.peek(0);
        self.error(Syntax::unexpected(self.location(t), "statement", format!("{:?}", t.kind)));
        self.recover_to_statement_boundary();
        Vec::new()
    }

    fn parse_fn_decl(&mut self, enclosing: ScopeId) -> NodeId {
        self.bump(); // 'fn'
        let docs = std::mem::take(&mut self.pending_docs);
        let name_tok = self.expect_identifier();
        let name_hash = name_tok.hash;

        let fn_scope = self.scopes.push_child(enclosing);

        self.expect_operator('(');
        let mut params = Vec::new();
        let mut param_types = Vec::new();
        while !self.is_operator(0, ')') && !self.at_eof() {
            let ty_tok = self.expect_identifier();
            let ty = self.resolve_type(ty_tok);
            let param_name = self.expect_identifier();
            let param_node = self.ast.push(AstNode::Param { name_hash: param_name.hash, token: param_name, ty });
            self.scopes.declare(fn_scope, Variable {
                name_hash: param_name.hash,
                ty,
                global: false,
                decl: param_node,
                external: false,
            });
            params.push(param_node);
            param_types.push(ty);
            if self.is_operator(0, ',') { self.bump(); } else { break; }
        }
        self.expect_operator(')');

        let ret = if self.peek(0).kind == TokenKind::Identifier
            && kind_for_type_name(self.lexeme(self.peek(0))).is_some()
            && self.is_operator(1, '{')
        {
            let ty_tok = self.bump();
            let ty = self.resolve_type(ty_tok);
            let marker = self.ast.push(AstNode::Literal(Value::None));
            self.scopes.declare(fn_scope, Variable {
                name_hash: return_val_hash(),
                ty,
                global: false,
                decl: marker,
                external: false,
            });
            Some(ty)
        } else {
            None
        };

        // Registered before the body parses so recursive/forward calls
        // resolve (§9 open question, settled in DESIGN.md).
        self.scopes.declare_function(enclosing, FunctionRecord {
            name_hash,
            param_types,
            ret,
            decl: NodeId(0),
        });

        let body = self.parse_block(fn_scope);
        self.function_docs.insert(name_hash, docs.clone());

        self.ast.push(AstNode::FuncDecl { name_hash, token: name_tok, params, ret, body, docs })
    }

    fn resolve_type(&mut self, ty_tok: Token) -> ValueKind {
        match kind_for_type_name(self.lexeme(ty_tok)) {
            Some(k) => k,
            None => {
                self.error(Syntax::semantic(self.location(ty_tok), format!("unknown type '{}'", self.lexeme(ty_tok))));
                ValueKind::NONE
            }
        }
    }

    fn parse_var_decl(&mut self, scope: ScopeId, global: bool) -> NodeId {
        self.bump(); // 'local' | 'global'
        let ty_tok = self.expect_identifier();
        let ty = self.resolve_type(ty_tok);
        let name_tok = self.expect_identifier();

        let init = if self.is_operator(0, '=') {
            self.bump();
            Some(self.parse_rhs(scope))
        } else {
            None
        };
        self.expect_operator(';');

        let decl = self.ast.push(AstNode::VarDecl { name_hash: name_tok.hash, token: name_tok, ty, global, init });
        let target_scope = if global { self.scopes.root() } else { scope };
        if !self.scopes.declare(target_scope, Variable { name_hash: name_tok.hash, ty, global, decl, external: false }) {
            self.error(Syntax::semantic(
                self.location(name_tok),
                format!("redeclared variable '{}'", self.lexeme(name_tok)),
            ));
        }
        decl
    }

    fn parse_return(&mut self, scope: ScopeId) -> Vec<NodeId> {
        self.bump(); // 'return'
        if self.is_operator(0, ';') {
            self.bump();
            return vec![self.ast.push(AstNode::Return)];
        }
        let value = self.parse_rhs(scope);
        self.expect_operator(';');

        let rv_tok = self.peek(0); // only used for a plausible location
        let target_loc = self.location(rv_tok);
        let name_hash = return_val_hash();
        if self.scopes.resolve(scope, name_hash).is_none() {
            self.error(Syntax::semantic(target_loc, "return with a value outside a function with a return type"));
        }
        let target = self.ast.push(AstNode::VarRef { name_hash, token: rv_tok });
        let assign = self.ast.push(AstNode::Assign { target, value });
        let ret = self.ast.push(AstNode::Return);
        vec![assign, ret]
    }

    fn parse_help(&mut self, scope: ScopeId) -> Vec<NodeId> {
        self.bump(); // 'help'
        let name_tok = self.expect_identifier();
        self.expect_operator(';');

        if self.scopes.resolve_function(scope, name_tok.hash).is_none() {
            self.error(Syntax::semantic(self.location(name_tok), format!("no such function '{}'", self.lexeme(name_tok))));
            return Vec::new();
        }
        if let Some(docs) = self.function_docs.get(&name_tok.hash) {
            for doc in docs {
                println!("{}", doc.lexeme(&self.sources.get(doc.source).contents));
            }
        }
        Vec::new()
    }

    fn parse_command_statement(&mut self, scope: ScopeId) -> Vec<NodeId> {
        self.bump(); // '$'
        let was = self.in_command_mode;
        self.in_command_mode = true;
        let produced = self.parse_statement(scope);
        self.in_command_mode = was;
        produced.into_iter().map(|n| self.ast.push(AstNode::CommandWrapper(n))).collect()
    }

    // --- expressions --------------------------------------------------

    /// Right-associative `primary (+|-) rhs` chain (§4.2).
    fn parse_rhs(&mut self, scope: ScopeId) -> NodeId {
        let left = self.parse_primary(scope);
        if self.is_operator(0, '+') || self.is_operator(0, '-') {
            let op = match self.bump().kind { TokenKind::Operator(c) => c, _ => unreachable!() };
            let right = self.parse_rhs(scope);
            return self.ast.push(AstNode::Binop { op, left, right });
        }
        left
    }

    fn parse_primary(&mut self, scope: ScopeId) -> NodeId {
        let t = self.peek(0);
        match t.kind {
            TokenKind::Integer => {
                self.bump();
                let text = self.lexeme(t).to_string();
                let value = text.parse::<i32>().unwrap_or_else(|_| {
                    self.error(Syntax::semantic(self.location(t), format!("integer literal '{text}' out of range")));
                    0
                });
                self.ast.push(AstNode::Literal(Value::Int(value)))
            }
            TokenKind::Float => {
                self.bump();
                let text = self.lexeme(t);
                let value = text.parse::<f32>().unwrap_or(0.0);
                self.ast.push(AstNode::Literal(Value::Float(value)))
            }
            TokenKind::StringLit => {
                self.bump();
                let text = self.lexeme(t).to_string();
                self.ast.push(AstNode::Literal(Value::String(Rc::from(text.as_str()))))
            }
            TokenKind::Identifier => {
                let is_call = self.is_operator(1, '(')
                    || (self.in_command_mode && self.next_looks_like_implicit_arg());
                if is_call {
                    self.parse_call(scope)
                } else {
                    let name_tok = self.bump();
                    self.resolve_var_ref(scope, name_tok);
                    self.ast.push(AstNode::VarRef { name_hash: name_tok.hash, token: name_tok })
                }
            }
            _ => {
                self.error(Syntax::unexpected(self.location(t), "expression", format!("{:?}", t.kind)));
                if !self.at_eof() { self.bump(); }
                self.ast.push(AstNode::Literal(Value::None))
            }
        }
    }

    /// In command mode, a bareword followed directly by another
    /// literal/identifier is treated as the start of an implicit argument
    /// list (§9: "a bareword following another bareword becomes an
    /// implicit argument list" — preserved for the existing test corpus).
    fn next_looks_like_implicit_arg(&self) -> bool {
        matches!(
            self.peek(1).kind,
            TokenKind::Identifier | TokenKind::Integer | TokenKind::Float | TokenKind::StringLit
        )
    }

    fn resolve_var_ref(&mut self, scope: ScopeId, name_tok: Token) {
        if self.scopes.resolve(scope, name_tok.hash).is_none() {
            self.error(Syntax::semantic(
                self.location(name_tok),
                format!("undefined reference to '{}'", self.lexeme(name_tok)),
            ));
        }
    }

    /// Parses a call's name and argument list. Does not consume a trailing
    /// `;` — the caller (statement or rhs context) owns that.
    fn parse_call(&mut self, scope: ScopeId) -> NodeId {
        let name_tok = self.bump();
        let mut args = Vec::new();

        if self.in_command_mode && !self.is_operator(0, '(') {
            // Command mode: whitespace-separated arguments, `;` terminates.
            while !self.is_operator(0, ';') && !self.at_eof() {
                args.push(self.parse_rhs(scope));
            }
        } else {
            self.expect_operator('(');
            while !self.is_operator(0, ')') && !self.at_eof() {
                args.push(self.parse_rhs(scope));
                if self.is_operator(0, ',') { self.bump(); } else { break; }
            }
            self.expect_operator(')');
        }

        let resolved = self.scopes.resolve_function(scope, name_tok.hash).is_some();
        self.ast.push(AstNode::Call { name_hash: name_tok.hash, token: name_tok, resolved, args })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::lexer::Lexer;
    use crate::source::{FsLoader, Source};

    fn parse(src: &str) -> ParseResult {
        let loader = FsLoader;
        let (tokens, sources, lex_diags) = Lexer::tokenize(Source::inline(src), &loader, 16);
        assert!(lex_diags.is_empty(), "unexpected lexical diagnostics: {lex_diags:?}");
        Parser::new(tokens, sources).parse()
    }

    #[test]
    fn global_declaration_parses_clean() {
        let result = parse("global int x = 42;");
        assert!(!result.has_errors, "{:?}", result.diagnostics);
        assert_eq!(result.ast.len(), 2); // Literal(42), VarDecl
    }

    #[test]
    fn function_with_return_desugars_to_assign_then_return() {
        let result = parse("fn add(int a, int b) int { return a + b; }");
        assert!(!result.has_errors, "{:?}", result.diagnostics);
        let has_assign = (0..result.ast.len())
            .any(|i| matches!(result.ast.get(NodeId(i as u32)), AstNode::Assign { .. }));
        let has_bare_return = (0..result.ast.len())
            .any(|i| matches!(result.ast.get(NodeId(i as u32)), AstNode::Return));
        assert!(has_assign && has_bare_return);
    }

    #[test]
    fn undefined_reference_is_diagnosed_but_parsing_continues() {
        let result = parse("log(nope);");
        assert!(result.has_errors);
        assert!(result.diagnostics.iter().any(|d| matches!(d, Syntax::Semantic { .. })));
    }

    #[test]
    fn unresolved_call_marked_unresolved_for_external_dispatch() {
        let result = parse("log(1);");
        let call = (0..result.ast.len())
            .find_map(|i| match result.ast.get(NodeId(i as u32)) {
                AstNode::Call { resolved, .. } => Some(*resolved),
                _ => None,
            });
        assert_eq!(call, Some(false));
    }

    #[test]
    fn command_statement_without_parens_parses_as_a_call() {
        let result = parse("$ log 1 2;");
        assert!(!result.has_errors, "{:?}", result.diagnostics);
        let wrapped_call = (0..result.ast.len()).find_map(|i| match result.ast.get(NodeId(i as u32)) {
            AstNode::CommandWrapper(inner) => match result.ast.get(*inner) {
                AstNode::Call { args, .. } => Some(args.len()),
                _ => None,
            },
            _ => None,
        });
        assert_eq!(wrapped_call, Some(2));
    }

    #[test]
    fn resolved_call_to_declared_function() {
        let result = parse("fn f(int x) int { return x; } global int r = f(1);");
        assert!(!result.has_errors, "{:?}", result.diagnostics);
        let call = (0..result.ast.len())
            .find_map(|i| match result.ast.get(NodeId(i as u32)) {
                AstNode::Call { resolved, .. } => Some(*resolved),
                _ => None,
            });
        assert_eq!(call, Some(true));
    }

    #[test]
    fn shadowed_global_resolves_to_local_inside_function() {
        let result = parse(
            "global int x = 1;\nfn f(int x) int { return x; }\nglobal int r = f(7);",
        );
        assert!(!result.has_errors, "{:?}", result.diagnostics);
    }

    #[test]
    fn doc_comments_attach_to_next_function() {
        let result = parse("//? does a thing\nfn f() { }");
        assert!(!result.has_errors, "{:?}", result.diagnostics);
        let docs = (0..result.ast.len())
            .find_map(|i| match result.ast.get(NodeId(i as u32)) {
                AstNode::FuncDecl { docs, .. } => Some(docs.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(docs.len(), 1);
    }
}
