//! Lowering a resolved method body into a CFG.
//!
//! The walker threads a small context (loop depth, the three non-local-control
//! scopes, the active send-and-block link) and a "target" local that receives each
//! expression's value. Every walk call returns the block where evaluation
//! continues, with the dead block standing in for "does not continue".

use ahash::AHashMap;

use super::{
    Binding, BlockExit, Cfg, DEAD_BLOCK, ENTRY_BLOCK, Instruction, LinkId, MIN_LOOP_FIELD, MIN_LOOP_GLOBAL,
    MIN_LOOP_LET, passes,
};
use crate::{
    ast::{BlockNode, CastKind, Expr, ExprKind, LocalVariable, RescueCase},
    errors::{Error, classes},
    global_state::GlobalState,
    intern::{NameRef, WellKnownName},
    loc::Loc,
    symbols::SymbolRef,
    types::{LiteralValue, Type},
};

/// Scopes and loop depth threaded through the walk.
#[derive(Debug, Clone, Copy)]
struct Ctx {
    loops: u32,
    /// Where `next` jumps: the loop header or block header.
    next_scope: Option<usize>,
    /// Where `break` jumps: the block after the loop or the post-block of a send.
    break_scope: Option<usize>,
    /// Where `retry` jumps: the start of the protected body.
    rescue_scope: Option<usize>,
    /// The active send-and-block link when lowering a block body.
    link: Option<LinkId>,
}

impl Ctx {
    fn top() -> Self {
        Self {
            loops: 0,
            next_scope: None,
            break_scope: None,
            rescue_scope: None,
            link: None,
        }
    }
}

/// Builds the CFG for one method: entry/argument loads, the body walk, the
/// synthesized final return, and the post-pass pipeline.
pub fn build_method_cfg(gs: &GlobalState, method: SymbolRef, body: &Expr) -> Cfg {
    let mut builder = Builder {
        gs,
        cfg: Cfg::new(method),
        method,
        temp_counter: 0,
        alias_map: AHashMap::new(),
        self_var: LocalVariable::new(WellKnownName::SelfTemp.into()),
    };
    builder.build(body);
    let mut cfg = builder.cfg;
    passes::run(gs, &mut cfg);
    cfg
}

struct Builder<'gs> {
    gs: &'gs GlobalState,
    cfg: Cfg,
    method: SymbolRef,
    temp_counter: u32,
    /// Per-method map from symbols to their alias locals.
    alias_map: AHashMap<SymbolRef, LocalVariable>,
    self_var: LocalVariable,
}

impl Builder<'_> {
    fn build(&mut self, body: &Expr) {
        let owner = self.gs.symbol(self.method).owner;
        let decl_loc = self.gs.symbol(self.method).loc;
        let self_var = self.self_var;
        self.emit(ENTRY_BLOCK, self_var, decl_loc, Instruction::SelfRef(owner));

        let arguments = self.gs.symbol(self.method).arguments.clone();
        for (idx, arg_sym) in arguments.iter().enumerate() {
            let arg = self.gs.symbol(*arg_sym);
            let local = LocalVariable::new(arg.name);
            let loc = if arg.loc.exists() { arg.loc } else { decl_loc };
            self.emit(
                ENTRY_BLOCK,
                local,
                loc,
                Instruction::LoadArg {
                    recv: self_var,
                    method: self.method,
                    arg_idx: idx,
                },
            );
        }

        let ret_temp = self.fresh_temp();
        let body_loc = if body.loc.exists() { body.loc } else { decl_loc };
        let current = self.walk(Ctx::top(), body, ENTRY_BLOCK, ret_temp);
        if current != DEAD_BLOCK {
            self.emit(
                current,
                LocalVariable::final_return(),
                body_loc,
                Instruction::Return(ret_temp),
            );
            self.uncond_jump(current, DEAD_BLOCK, body_loc);
        }
    }

    // ===== plumbing =====

    fn fresh_temp(&mut self) -> LocalVariable {
        self.temp_counter += 1;
        LocalVariable {
            name: WellKnownName::CfgTemp.into(),
            unique_id: self.temp_counter,
        }
    }

    fn emit(&mut self, block: usize, bind: LocalVariable, loc: Loc, value: Instruction) {
        self.cfg.blocks[block].exprs.push(Binding::new(bind, loc, value));
    }

    fn uncond_jump(&mut self, from: usize, to: usize, loc: Loc) {
        if from == DEAD_BLOCK {
            return;
        }
        debug_assert!(!self.cfg.blocks[from].bexit.is_cond_set(), "exit set twice");
        self.cfg.blocks[from].bexit = BlockExit {
            cond: LocalVariable::none(),
            thenb: to,
            elseb: to,
            loc,
        };
        self.cfg.blocks[to].back_edges.push(from);
    }

    fn cond_jump(&mut self, from: usize, cond: LocalVariable, thenb: usize, elseb: usize, loc: Loc) {
        if from == DEAD_BLOCK {
            return;
        }
        debug_assert!(!self.cfg.blocks[from].bexit.is_cond_set(), "exit set twice");
        self.cfg.blocks[from].bexit = BlockExit { cond, thenb, elseb, loc };
        self.cfg.blocks[thenb].back_edges.push(from);
        if thenb != elseb {
            self.cfg.blocks[elseb].back_edges.push(from);
        }
    }

    /// The per-method alias local for a symbol, emitting the `Alias` binding and
    /// the pin sentinel on first use.
    fn alias_for(&mut self, block: usize, symbol: SymbolRef, loc: Loc) -> LocalVariable {
        if let Some(&existing) = self.alias_map.get(&symbol) {
            return existing;
        }
        self.temp_counter += 1;
        let local = LocalVariable {
            name: self.gs.symbol(symbol).name,
            unique_id: self.temp_counter,
        };
        self.alias_map.insert(symbol, local);
        let flags = self.gs.symbol(symbol).flags;
        if flags.is_static_field() || (flags.is_field() && self.gs.symbol(symbol).owner == SymbolRef::ROOT) {
            self.cfg.min_loops.insert(local, MIN_LOOP_GLOBAL);
        } else if flags.is_field() {
            self.cfg.min_loops.insert(local, MIN_LOOP_FIELD);
        }
        self.emit(block, local, loc, Instruction::Alias(symbol));
        local
    }

    // ===== the walk =====

    /// Lowers `expr`, writing its value into `target` in `current`. Returns the
    /// continuation block.
    #[expect(clippy::too_many_lines, reason = "one arm per AST node kind")]
    fn walk(&mut self, ctx: Ctx, expr: &Expr, current: usize, target: LocalVariable) -> usize {
        let loc = expr.loc;
        match &expr.kind {
            ExprKind::EmptyTree | ExprKind::Nil => {
                self.emit(current, target, loc, Instruction::Lit(Type::nil()));
                current
            }
            ExprKind::True => {
                self.emit(
                    current,
                    target,
                    loc,
                    Instruction::Lit(Type::Class(SymbolRef::TRUE_CLASS)),
                );
                current
            }
            ExprKind::False => {
                self.emit(
                    current,
                    target,
                    loc,
                    Instruction::Lit(Type::Class(SymbolRef::FALSE_CLASS)),
                );
                current
            }
            ExprKind::IntLit(value) => {
                self.emit(
                    current,
                    target,
                    loc,
                    Instruction::Lit(Type::Literal(LiteralValue::Integer(*value))),
                );
                current
            }
            ExprKind::FloatLit(value) => {
                self.emit(
                    current,
                    target,
                    loc,
                    Instruction::Lit(Type::Literal(LiteralValue::Float(*value))),
                );
                current
            }
            ExprKind::StringLit(name) => {
                self.emit(
                    current,
                    target,
                    loc,
                    Instruction::Lit(Type::Literal(LiteralValue::String(*name))),
                );
                current
            }
            ExprKind::SymbolLit(name) => {
                self.emit(
                    current,
                    target,
                    loc,
                    Instruction::Lit(Type::Literal(LiteralValue::Symbol(*name))),
                );
                current
            }
            ExprKind::SelfRef { owner } => {
                self.emit(current, target, loc, Instruction::SelfRef(*owner));
                current
            }
            ExprKind::Local { var } => {
                self.emit(current, target, loc, Instruction::Ident(*var));
                current
            }
            ExprKind::FieldRef { symbol } | ExprKind::ConstantLit { symbol } => {
                let alias = self.alias_for(current, *symbol, loc);
                self.emit(current, target, loc, Instruction::Ident(alias));
                current
            }
            ExprKind::UnresolvedIdent { .. } | ExprKind::UnresolvedConstant { .. } => {
                // The resolver replaces these; reaching one is an internal bug but
                // must not crash the pipeline.
                self.gs.report(Error::new(
                    classes::internal::INTERNAL_ERROR,
                    loc,
                    "unresolved reference survived to CFG construction",
                ));
                self.emit(current, target, loc, Instruction::Unanalyzable);
                current
            }
            ExprKind::InsSeq { stats, expr } => {
                let mut current = current;
                for stat in stats {
                    let temp = self.fresh_temp();
                    current = self.walk(ctx, stat, current, temp);
                }
                self.walk(ctx, expr, current, target)
            }
            ExprKind::Assign { lhs, rhs } => self.walk_assign(ctx, lhs, rhs, current, target),
            ExprKind::If { cond, thenp, elsep } => {
                let cond_temp = self.fresh_temp();
                let current = self.walk(ctx, cond, current, cond_temp);
                let then_block = self.cfg.new_block(ctx.loops);
                let else_block = self.cfg.new_block(ctx.loops);
                self.cond_jump(current, cond_temp, then_block, else_block, cond.loc);
                let then_end = self.walk(ctx, thenp, then_block, target);
                let else_end = self.walk(ctx, elsep, else_block, target);
                match (then_end == DEAD_BLOCK, else_end == DEAD_BLOCK) {
                    (true, true) => DEAD_BLOCK,
                    (true, false) => else_end,
                    (false, true) => then_end,
                    (false, false) => {
                        let join = self.cfg.new_block(ctx.loops);
                        self.uncond_jump(then_end, join, loc);
                        self.uncond_jump(else_end, join, loc);
                        join
                    }
                }
            }
            ExprKind::While { cond, body } => {
                let header = self.cfg.new_block(ctx.loops + 1);
                let continue_block = self.cfg.new_block(ctx.loops);
                self.uncond_jump(current, header, loc);

                let loop_ctx = Ctx {
                    loops: ctx.loops + 1,
                    next_scope: Some(header),
                    break_scope: Some(continue_block),
                    ..ctx
                };
                let cond_temp = self.fresh_temp();
                let cond_end = self.walk(loop_ctx, cond, header, cond_temp);
                let body_block = self.cfg.new_block(ctx.loops + 1);
                if cond_end != DEAD_BLOCK {
                    self.cond_jump(cond_end, cond_temp, body_block, continue_block, cond.loc);
                }

                let body_temp = self.fresh_temp();
                let body_end = self.walk(loop_ctx, body, body_block, body_temp);
                if body_end != DEAD_BLOCK {
                    self.uncond_jump(body_end, header, loc);
                }
                self.emit(continue_block, target, loc, Instruction::Lit(Type::nil()));
                continue_block
            }
            ExprKind::Return { expr } => {
                let ret_temp = self.fresh_temp();
                let current = self.walk(ctx, expr, current, ret_temp);
                self.emit(current, target, loc, Instruction::Return(ret_temp));
                self.uncond_jump(current, DEAD_BLOCK, loc);
                DEAD_BLOCK
            }
            ExprKind::Break { expr } => {
                let break_temp = self.fresh_temp();
                let current = self.walk(ctx, expr, current, break_temp);
                match ctx.break_scope {
                    None => {
                        self.gs.report(Error::new(
                            classes::cfg::NO_NEXT_SCOPE,
                            loc,
                            "No `do` block or loop around `break`",
                        ));
                        self.uncond_jump(current, DEAD_BLOCK, loc);
                    }
                    Some(break_scope) => {
                        if let Some(link) = ctx.link {
                            let temp = self.fresh_temp();
                            self.emit(current, temp, loc, Instruction::BlockReturn { link, what: break_temp });
                        }
                        self.uncond_jump(current, break_scope, loc);
                    }
                }
                DEAD_BLOCK
            }
            ExprKind::Next { expr } => {
                let next_temp = self.fresh_temp();
                let current = self.walk(ctx, expr, current, next_temp);
                match ctx.next_scope {
                    None => {
                        self.gs.report(Error::new(
                            classes::cfg::NO_NEXT_SCOPE,
                            loc,
                            "No `do` block or loop around `next`",
                        ));
                        self.uncond_jump(current, DEAD_BLOCK, loc);
                    }
                    Some(next_scope) => {
                        if let Some(link) = ctx.link {
                            let temp = self.fresh_temp();
                            self.emit(current, temp, loc, Instruction::BlockReturn { link, what: next_temp });
                        }
                        self.uncond_jump(current, next_scope, loc);
                    }
                }
                DEAD_BLOCK
            }
            ExprKind::Retry => {
                match ctx.rescue_scope {
                    None => {
                        self.gs.report(Error::new(
                            classes::cfg::NO_NEXT_SCOPE,
                            loc,
                            "No `rescue` block around `retry`",
                        ));
                        self.uncond_jump(current, DEAD_BLOCK, loc);
                    }
                    Some(rescue_scope) => {
                        self.uncond_jump(current, rescue_scope, loc);
                    }
                }
                DEAD_BLOCK
            }
            ExprKind::Send {
                recv,
                fun,
                args,
                block,
            } => self.walk_send(ctx, loc, recv, *fun, args, block.as_deref(), current, target),
            ExprKind::ZSuperArgs => {
                // Argument forwarding is expanded at the enclosing send; a bare
                // occurrence has nothing to forward.
                self.emit(current, target, loc, Instruction::Unanalyzable);
                current
            }
            ExprKind::Yield { args } => {
                // The method's own block is not modeled as a link; its invocation
                // is unanalyzable.
                let mut current = current;
                for arg in args {
                    let temp = self.fresh_temp();
                    current = self.walk(ctx, arg, current, temp);
                }
                self.emit(current, target, loc, Instruction::Unanalyzable);
                current
            }
            ExprKind::Rescue {
                body,
                cases,
                else_body,
                ensure_body,
            } => self.walk_rescue(ctx, loc, body, cases, else_body, ensure_body, current, target),
            ExprKind::ArrayLit { elems } => {
                let mut current = current;
                let mut temps = Vec::with_capacity(elems.len());
                for elem in elems {
                    let temp = self.fresh_temp();
                    current = self.walk(ctx, elem, current, temp);
                    temps.push(temp);
                }
                let magic = self.alias_for(current, SymbolRef::MAGIC, loc);
                self.emit(
                    current,
                    target,
                    loc,
                    Instruction::Send {
                        recv: magic,
                        fun: WellKnownName::BuildArray.into(),
                        args: temps,
                        link: None,
                    },
                );
                current
            }
            ExprKind::HashLit { keys, values } => {
                let mut current = current;
                let mut temps = Vec::with_capacity(keys.len() * 2);
                for (key, value) in keys.iter().zip(values) {
                    let key_temp = self.fresh_temp();
                    current = self.walk(ctx, key, current, key_temp);
                    temps.push(key_temp);
                    let value_temp = self.fresh_temp();
                    current = self.walk(ctx, value, current, value_temp);
                    temps.push(value_temp);
                }
                let magic = self.alias_for(current, SymbolRef::MAGIC, loc);
                self.emit(
                    current,
                    target,
                    loc,
                    Instruction::Send {
                        recv: magic,
                        fun: WellKnownName::BuildHash.into(),
                        args: temps,
                        link: None,
                    },
                );
                current
            }
            ExprKind::Cast {
                expr,
                ty,
                kind,
                ..
            } => {
                let value_temp = self.fresh_temp();
                let current = self.walk(ctx, expr, current, value_temp);
                let cast_type = ty.clone().unwrap_or(Type::Untyped);
                if *kind == CastKind::Let {
                    self.cfg.min_loops.insert(target, MIN_LOOP_LET);
                }
                self.emit(
                    current,
                    target,
                    loc,
                    Instruction::Cast {
                        value: value_temp,
                        ty: cast_type,
                        kind: *kind,
                    },
                );
                current
            }
            ExprKind::MethodDef { name, .. } => {
                // Nested defs are collected and checked separately; the expression
                // itself evaluates to the method's name.
                self.emit(
                    current,
                    target,
                    loc,
                    Instruction::Lit(Type::Literal(LiteralValue::Symbol(*name))),
                );
                current
            }
            ExprKind::ClassDef { .. } => {
                // Class bodies are flattened before CFG construction; a class
                // definition in expression position is not analyzable here.
                self.emit(current, target, loc, Instruction::Unanalyzable);
                current
            }
            ExprKind::RestArg { .. }
            | ExprKind::KeywordArg { .. }
            | ExprKind::OptionalArg { .. }
            | ExprKind::BlockArgNode { .. }
            | ExprKind::ShadowArg { .. } => {
                // Argument wrappers never appear in value position.
                self.emit(current, target, loc, Instruction::Unanalyzable);
                current
            }
        }
    }

    fn walk_assign(&mut self, ctx: Ctx, lhs: &Expr, rhs: &Expr, current: usize, target: LocalVariable) -> usize {
        match &lhs.kind {
            ExprKind::Local { var } => {
                let current = self.walk(ctx, rhs, current, *var);
                if target != *var {
                    self.emit(current, target, lhs.loc, Instruction::Ident(*var));
                }
                current
            }
            ExprKind::FieldRef { symbol } | ExprKind::ConstantLit { symbol } => {
                let alias = self.alias_for(current, *symbol, lhs.loc);
                let current = self.walk(ctx, rhs, current, alias);
                self.emit(current, target, lhs.loc, Instruction::Ident(alias));
                current
            }
            _ => {
                let temp = self.fresh_temp();
                let current = self.walk(ctx, rhs, current, temp);
                self.emit(current, target, lhs.loc, Instruction::Ident(temp));
                current
            }
        }
    }

    /// Sends, including the header/body/post structure for attached blocks.
    #[expect(clippy::too_many_arguments, reason = "mirrors the AST node's fields")]
    fn walk_send(
        &mut self,
        ctx: Ctx,
        loc: Loc,
        recv: &Expr,
        fun: NameRef,
        args: &[Expr],
        block: Option<&BlockNode>,
        current: usize,
        target: LocalVariable,
    ) -> usize {
        let recv_temp = self.fresh_temp();
        let mut current = self.walk(ctx, recv, current, recv_temp);

        let mut arg_temps = Vec::with_capacity(args.len());
        for arg in args {
            if matches!(arg.kind, ExprKind::ZSuperArgs) {
                // Forward the enclosing method's formal arguments.
                let arguments = self.gs.symbol(self.method).arguments.clone();
                for arg_sym in arguments {
                    let name = self.gs.symbol(arg_sym).name;
                    let forwarded = LocalVariable::new(name);
                    let temp = self.fresh_temp();
                    self.emit(current, temp, arg.loc, Instruction::Ident(forwarded));
                    arg_temps.push(temp);
                }
                continue;
            }
            let temp = self.fresh_temp();
            current = self.walk(ctx, arg, current, temp);
            arg_temps.push(temp);
        }

        let Some(block) = block else {
            self.emit(
                current,
                target,
                loc,
                Instruction::Send {
                    recv: recv_temp,
                    fun,
                    args: arg_temps,
                    link: None,
                },
            );
            return current;
        };

        // Send with a block: emit the linked send, then a header/body/post
        // structure. The header's pseudo-condition models "the block may be
        // called zero or more times".
        let link = self.cfg.new_link(fun);
        let send_temp = self.fresh_temp();
        self.emit(
            current,
            send_temp,
            loc,
            Instruction::Send {
                recv: recv_temp,
                fun,
                args: arg_temps,
                link: Some(link),
            },
        );

        let header = self.cfg.new_block(ctx.loops + 1);
        let body_block = self.cfg.new_block(ctx.loops + 1);
        let post_block = self.cfg.new_block(ctx.loops);
        self.uncond_jump(current, header, loc);
        self.cond_jump(header, LocalVariable::block_call(), body_block, post_block, loc);

        // Bind the block's parameters from the link.
        for (idx, arg) in block.args.iter().enumerate() {
            let Some(local) = block_arg_local(arg) else {
                continue;
            };
            self.emit(
                body_block,
                local,
                arg.loc,
                Instruction::LoadYieldParam { link, arg_idx: idx },
            );
        }

        let block_ctx = Ctx {
            loops: ctx.loops + 1,
            next_scope: Some(header),
            break_scope: Some(post_block),
            link: Some(link),
            ..ctx
        };
        let block_rv = self.fresh_temp();
        let body_end = self.walk(block_ctx, &block.body, body_block, block_rv);
        if body_end != DEAD_BLOCK {
            let temp = self.fresh_temp();
            self.emit(
                body_end,
                temp,
                block.body.loc,
                Instruction::BlockReturn { link, what: block_rv },
            );
            self.uncond_jump(body_end, header, block.loc);
        }

        self.emit(post_block, target, loc, Instruction::SolveConstraint(link));
        post_block
    }

    /// Rescue lowering: an unanalyzable branch decides whether the body raised,
    /// handlers chain `is_a?` tests, and all completed paths join through the
    /// else and ensure sequences.
    #[expect(clippy::too_many_arguments, reason = "mirrors the AST node's fields")]
    fn walk_rescue(
        &mut self,
        ctx: Ctx,
        loc: Loc,
        body: &Expr,
        cases: &[RescueCase],
        else_body: &Expr,
        ensure_body: &Expr,
        current: usize,
        target: LocalVariable,
    ) -> usize {
        let rescue_start = self.cfg.new_block(ctx.loops);
        self.uncond_jump(current, rescue_start, loc);

        let exn_cond = self.fresh_temp();
        self.emit(rescue_start, exn_cond, loc, Instruction::Unanalyzable);
        let exn_value = self.fresh_temp();
        self.emit(rescue_start, exn_value, loc, Instruction::Unanalyzable);

        let body_block = self.cfg.new_block(ctx.loops);
        let handlers_block = self.cfg.new_block(ctx.loops);
        self.cond_jump(rescue_start, exn_cond, handlers_block, body_block, loc);

        let body_ctx = Ctx {
            rescue_scope: Some(body_block),
            ..ctx
        };

        // Normal path: body, then the else clause when present.
        let mut completed: Vec<usize> = Vec::new();
        let body_end = if else_body.is_empty_tree() {
            self.walk(body_ctx, body, body_block, target)
        } else {
            let body_temp = self.fresh_temp();
            let after_body = self.walk(body_ctx, body, body_block, body_temp);
            if after_body == DEAD_BLOCK {
                DEAD_BLOCK
            } else {
                self.walk(body_ctx, else_body, after_body, target)
            }
        };
        if body_end != DEAD_BLOCK {
            completed.push(body_end);
        }

        // Handler chain: each case tests its exception classes in turn.
        let is_a = WellKnownName::IsAP.into();
        let mut chain = handlers_block;
        for case in cases {
            let case_body_block = self.cfg.new_block(ctx.loops);

            // An empty exception list defaults to StandardError.
            let default_exc;
            let exceptions: &[Expr] = if case.exceptions.is_empty() {
                default_exc = [Expr::new(
                    case.loc,
                    ExprKind::ConstantLit {
                        symbol: SymbolRef::STANDARD_ERROR,
                    },
                )];
                &default_exc
            } else {
                &case.exceptions
            };

            for exc in exceptions {
                let exc_temp = self.fresh_temp();
                let chain_end = self.walk(ctx, exc, chain, exc_temp);
                let test_temp = self.fresh_temp();
                self.emit(
                    chain_end,
                    test_temp,
                    exc.loc,
                    Instruction::Send {
                        recv: exn_value,
                        fun: is_a,
                        args: vec![exc_temp],
                        link: None,
                    },
                );
                let next_test = self.cfg.new_block(ctx.loops);
                self.cond_jump(chain_end, test_temp, case_body_block, next_test, exc.loc);
                chain = next_test;
            }

            // Bind the `=> e` variable, then run the handler body.
            let mut case_current = case_body_block;
            match &case.var.kind {
                ExprKind::Local { var } => {
                    self.emit(case_current, *var, case.var.loc, Instruction::Ident(exn_value));
                }
                ExprKind::FieldRef { symbol } => {
                    let alias = self.alias_for(case_current, *symbol, case.var.loc);
                    self.emit(case_current, alias, case.var.loc, Instruction::Ident(exn_value));
                }
                _ => {}
            }
            let case_ctx = Ctx {
                rescue_scope: Some(body_block),
                ..ctx
            };
            case_current = self.walk(case_ctx, &case.body, case_current, target);
            if case_current != DEAD_BLOCK {
                completed.push(case_current);
            }
        }
        // Every test failed: the exception escapes this rescue.
        self.uncond_jump(chain, DEAD_BLOCK, loc);

        if completed.is_empty() {
            return DEAD_BLOCK;
        }

        // Join completed paths, then run ensure on the way out.
        let join = self.cfg.new_block(ctx.loops);
        for block in completed {
            self.uncond_jump(block, join, loc);
        }
        if ensure_body.is_empty_tree() {
            return join;
        }
        let ensure_temp = self.fresh_temp();
        self.walk(ctx, ensure_body, join, ensure_temp)
    }
}

/// The local variable a block argument binds, unwrapping argument wrappers.
fn block_arg_local(arg: &Expr) -> Option<LocalVariable> {
    match &arg.kind {
        ExprKind::Local { var } => Some(*var),
        ExprKind::RestArg { inner }
        | ExprKind::KeywordArg { inner }
        | ExprKind::BlockArgNode { inner }
        | ExprKind::ShadowArg { inner } => block_arg_local(inner),
        ExprKind::OptionalArg { inner, .. } => block_arg_local(inner),
        _ => None,
    }
}
