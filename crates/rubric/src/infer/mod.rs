//! Flow-sensitive type inference over a CFG.
//!
//! Blocks are visited in the stored parents-first order, so a block's
//! predecessors (other than loop edges) have known out-environments when it is
//! entered. Each binding's instruction is typed, the environment updated under the
//! pinning discipline, and knowledge synthesized for variables that feed branch
//! conditions.
//!
//! Pinning: a variable written deeper than the outermost loop that touches it must
//! keep its established type. `let` casts, fields, and globals carry sentinel pin
//! levels installed by the CFG builder; violations report and, for plain loop
//! pins, the type widens to untyped rather than looping the analysis.

mod environment;

pub use environment::{Environment, KnowledgeFact, TestedKnowledge, TypeAndOrigins};

use ahash::{AHashMap, AHashSet};

use crate::{
    ast::{CastKind, LocalVariable},
    cfg::{Cfg, DEAD_BLOCK, ENTRY_BLOCK, Instruction, LinkId, MIN_LOOP_FIELD, MIN_LOOP_GLOBAL, MIN_LOOP_LET},
    errors::{Error, ErrorClass, ErrorSection, classes},
    global_state::GlobalState,
    intern::{NameRef, WellKnownName},
    loc::Loc,
    symbols::SymbolRef,
    types::{self, CallArg, Type},
};

/// Runs inference over one method's CFG, filling `computed_type` on every binding
/// and reporting type errors through the error queue.
pub fn run(gs: &GlobalState, cfg: &mut Cfg) {
    let used_vars = knowledge_filter(cfg);
    let mut inference = Inference {
        gs,
        used_vars,
        pinned: AHashMap::new(),
        out_envs: vec![None; cfg.blocks.len()],
    };
    inference.infer(cfg);
}

/// Variables that participate in branch conditions (directly or through `Ident`,
/// `!`, `==` chains, or `hard_assert`). Knowledge is only materialized for these;
/// skipping the rest never changes results.
fn knowledge_filter(cfg: &Cfg) -> AHashSet<LocalVariable> {
    let mut used: AHashSet<LocalVariable> = AHashSet::new();
    let hard_assert: NameRef = WellKnownName::HardAssert.into();
    for block in &cfg.blocks {
        if block.is_pruned() {
            continue;
        }
        if block.bexit.is_cond_set() && block.bexit.cond.exists() && block.bexit.cond != LocalVariable::block_call() {
            used.insert(block.bexit.cond);
        }
        for binding in &block.exprs {
            if let Instruction::Send { fun, args, .. } = &binding.value
                && *fun == hard_assert
            {
                used.extend(args.iter().copied());
            }
        }
    }
    // Propagate backwards through copies and negation/equality sends.
    let bang: NameRef = WellKnownName::Bang.into();
    let eq: NameRef = WellKnownName::Eq.into();
    loop {
        let mut changed = false;
        for block in &cfg.blocks {
            if block.is_pruned() {
                continue;
            }
            for binding in &block.exprs {
                if !used.contains(&binding.bind) {
                    continue;
                }
                match &binding.value {
                    Instruction::Ident(v) => {
                        changed |= used.insert(*v);
                    }
                    Instruction::Send { recv, fun, args, .. } if *fun == bang || *fun == eq => {
                        changed |= used.insert(*recv);
                        for arg in args {
                            changed |= used.insert(*arg);
                        }
                    }
                    _ => {}
                }
            }
        }
        if !changed {
            return used;
        }
    }
}

struct Inference<'gs> {
    gs: &'gs GlobalState,
    used_vars: AHashSet<LocalVariable>,
    /// Declared/established types for pinned variables: loop-carried locals at
    /// their outermost nesting, `let` casts, field and global aliases.
    pinned: AHashMap<LocalVariable, Type>,
    out_envs: Vec<Option<Environment>>,
}

impl Inference<'_> {
    fn infer(&mut self, cfg: &mut Cfg) {
        let order = cfg.backwards_topo.clone();
        let owner_loc = self.gs.symbol(cfg.symbol).loc;
        for &block_id in &order {
            if block_id == DEAD_BLOCK || cfg.blocks[block_id].is_pruned() {
                continue;
            }
            let mut env = self.entry_environment(cfg, block_id, owner_loc);
            if !env.is_dead {
                self.process_block(cfg, block_id, &mut env);
            }
            self.out_envs[block_id] = Some(env);
        }
    }

    /// Builds the environment at block entry from the already-visited
    /// predecessors, applying branch narrowing along each edge.
    fn entry_environment(&mut self, cfg: &Cfg, block_id: usize, owner_loc: Loc) -> Environment {
        if block_id == ENTRY_BLOCK {
            return Environment::default();
        }
        let block = &cfg.blocks[block_id];
        let is_loop_header = block.flags.has(crate::cfg::BlockFlags::LOOP_HEADER);
        let block_loops = i32::try_from(block.outer_loops).unwrap_or(i32::MAX);

        let mut merged: Option<Environment> = None;
        for &pred in &block.back_edges {
            let Some(pred_env) = &self.out_envs[pred] else {
                // A loop edge whose source is processed later contributes nothing
                // at header entry; pinning covers what flows around the loop.
                continue;
            };
            let pred_exit = &cfg.blocks[pred].bexit;
            let mut incoming = pred_env.clone();
            if !pred_exit.is_unconditional() {
                incoming.with_cond(self.gs, pred_exit.cond, pred_exit.thenb == block_id);
            }
            match &mut merged {
                None => merged = Some(incoming),
                Some(env) => env.merge_with(self.gs, &incoming, |var| {
                    is_loop_header
                        && cfg
                            .max_loop_write
                            .get(&var)
                            .is_some_and(|&max| block_loops <= max)
                }),
            }
        }

        let mut env = merged.unwrap_or_else(|| {
            // No predecessor has been visited and this is not the entry block.
            let mut dead = Environment::default();
            dead.is_dead = true;
            dead
        });
        env.restrict_to(&block.args);
        for &arg in &block.args {
            env.initialize_arg(arg, owner_loc);
        }
        env
    }

    fn process_block(&mut self, cfg: &mut Cfg, block_id: usize, env: &mut Environment) {
        let binding_count = cfg.blocks[block_id].exprs.len();
        for index in 0..binding_count {
            if env.is_dead {
                // Everything after the point of death is skipped.
                return;
            }
            self.process_binding(cfg, block_id, index, env);
        }
    }

    #[expect(clippy::too_many_lines, reason = "one arm per instruction kind")]
    fn process_binding(&mut self, cfg: &mut Cfg, block_id: usize, index: usize, env: &mut Environment) {
        let gs = self.gs;
        let binding = &cfg.blocks[block_id].exprs[index];
        let bind = binding.bind;
        let loc = binding.loc;
        let value = binding.value.clone();
        let method_sym = cfg.symbol;

        // Environment snapshots render the state as of this point and bind
        // nothing; they never enter the environment-update path below.
        if matches!(value, Instruction::DebugEnvironment { .. }) {
            let rendered = env.show(gs);
            if let Instruction::DebugEnvironment { text, .. } = &mut cfg.blocks[block_id].exprs[index].value {
                *text = Some(rendered);
            }
            return;
        }

        let mut knowledge: Option<TestedKnowledge> = None;
        // Deferred so the assignment's knowledge-clearing cannot erase it.
        let mut back_knowledge: Option<(LocalVariable, TestedKnowledge)> = None;
        let mut tao = match &value {
            Instruction::Lit(ty) => TypeAndOrigins::new(ty.clone(), loc),
            Instruction::Ident(v) => {
                let mut tao = env.type_and_origins(*v, loc);
                if tao.origins.is_empty() {
                    tao.origins.push(loc);
                }
                if self.used_vars.contains(&bind) {
                    // `a = b`: a's truthiness is b's truthiness and vice versa.
                    let mut fact = env.knowledge(*v);
                    fact.truthy.add_no(*v, Type::falsy_types());
                    fact.falsy.add_yes(*v, Type::falsy_types());
                    knowledge = Some(fact);
                    if self.used_vars.contains(v) {
                        let mut back = env.knowledge(*v);
                        back.truthy.add_no(bind, Type::falsy_types());
                        back.falsy.add_yes(bind, Type::falsy_types());
                        back_knowledge = Some((*v, back));
                    }
                }
                tao
            }
            Instruction::SelfRef(owner) => TypeAndOrigins::new(self.self_type(*owner), loc),
            Instruction::Alias(symbol) => {
                let ty = self.alias_type(*symbol);
                self.pinned.entry(bind).or_insert_with(|| ty.clone());
                TypeAndOrigins::new(ty, loc)
            }
            Instruction::LoadArg { recv, method, arg_idx } => {
                let recv_type = env.type_of(*recv);
                let method_name = gs.symbol(*method).name;
                let ty = types::get_call_argument_type(gs, &recv_type, method_name, *arg_idx);
                TypeAndOrigins::new(ty, loc)
            }
            Instruction::LoadYieldParam { link, arg_idx } => {
                let ty = cfg
                    .link(*link)
                    .signature
                    .as_ref()
                    .map_or(Type::Untyped, |sig| sig.param_type(*arg_idx));
                TypeAndOrigins::new(ty, loc)
            }
            Instruction::Send { recv, fun, args, link } => {
                let result = self.process_send(cfg, env, loc, *recv, *fun, args, *link);
                if let Some(fact) = self.synthesize_send_knowledge(env, bind, *recv, *fun, args) {
                    knowledge = Some(fact);
                }
                result
            }
            Instruction::Return(v) => {
                self.check_return(env, method_sym, *v, loc);
                TypeAndOrigins::new(Type::Bottom, loc)
            }
            Instruction::BlockReturn { link, what } => {
                let declared = cfg.link(*link).signature.as_ref().and_then(|sig| sig.return_type.clone());
                if let Some(declared) = declared {
                    let actual = env.type_and_origins(*what, loc);
                    if !types::is_subtype(gs, &actual.ty, &declared) {
                        gs.report(
                            Error::new(
                                classes::infer::RETURN_TYPE_MISMATCH,
                                loc,
                                format!(
                                    "Expected `{}` but found `{}` for block result",
                                    declared.show(gs),
                                    actual.ty.show(gs)
                                ),
                            )
                            .with_section(ErrorSection::new(
                                format!("Got `{}` originating from:", actual.ty.show(gs)),
                                actual.origins,
                            )),
                        );
                    }
                }
                TypeAndOrigins::new(Type::Bottom, loc)
            }
            Instruction::Cast { value: v, ty, kind } => {
                let actual = env.type_and_origins(*v, loc);
                if *kind == CastKind::AssertType && actual.ty.is_untyped() {
                    gs.report(Error::new(
                        classes::infer::CAST_TYPE_MISMATCH,
                        loc,
                        format!(
                            "Unable to infer a type for the asserted expression; expected `{}`",
                            ty.show(gs)
                        ),
                    ));
                } else if *kind != CastKind::Cast && !types::is_subtype(gs, &actual.ty, ty) {
                    gs.report(
                        Error::new(
                            classes::infer::CAST_TYPE_MISMATCH,
                            loc,
                            format!(
                                "Argument does not have asserted type `{}`; found `{}`",
                                ty.show(gs),
                                actual.ty.show(gs)
                            ),
                        )
                        .with_section(ErrorSection::new(
                            format!("Got `{}` originating from:", actual.ty.show(gs)),
                            actual.origins,
                        )),
                    );
                }
                if *kind == CastKind::Let {
                    self.pinned.insert(bind, ty.clone());
                }
                TypeAndOrigins::new(ty.clone(), loc)
            }
            Instruction::SolveConstraint(link) => {
                let ty = cfg.link(*link).result_type.clone().unwrap_or(Type::Untyped);
                TypeAndOrigins::new(ty, loc)
            }
            Instruction::Unanalyzable => TypeAndOrigins::new(Type::Untyped, loc),
            Instruction::DebugEnvironment { .. } => unreachable!("handled before the typing match"),
        };

        // The environment update, under the pinning discipline.
        let block_loops = i32::try_from(cfg.blocks[block_id].outer_loops).unwrap_or(i32::MAX);
        let bind_min = cfg.min_loops.get(&bind).copied().unwrap_or(block_loops);
        let pure_assign = matches!(value, Instruction::Alias(_) | Instruction::LoadArg { .. });

        if bind_min == block_loops || pure_assign {
            // First write at this nesting level: establish, don't check.
            let is_loop_carried = cfg
                .max_loop_write
                .get(&bind)
                .is_some_and(|&max| max > bind_min && bind_min >= 0);
            if is_loop_carried {
                self.pinned
                    .entry(bind)
                    .or_insert_with(|| widen_literal(&tao.ty));
            }
            cfg.blocks[block_id].exprs[index].computed_type = Some(tao.ty.clone());
            env.assign(bind, tao);
        } else {
            match self.pinned.get(&bind).cloned() {
                None => {
                    self.pinned.insert(bind, widen_literal(&tao.ty));
                    cfg.blocks[block_id].exprs[index].computed_type = Some(tao.ty.clone());
                    env.assign(bind, tao);
                }
                Some(pin) => {
                    if !types::is_subtype(gs, &tao.ty, &pin) {
                        let (class, header): (ErrorClass, String) = match bind_min {
                            MIN_LOOP_FIELD => (
                                classes::infer::FIELD_REASSIGNMENT_TYPE_MISMATCH,
                                format!(
                                    "Reassigning field with a value of wrong type: `{}` is not a subtype of `{}`",
                                    tao.ty.show(gs),
                                    pin.show(gs)
                                ),
                            ),
                            MIN_LOOP_GLOBAL => (
                                classes::infer::GLOBAL_REASSIGNMENT_TYPE_MISMATCH,
                                format!(
                                    "Reassigning global with a value of wrong type: `{}` is not a subtype of `{}`",
                                    tao.ty.show(gs),
                                    pin.show(gs)
                                ),
                            ),
                            MIN_LOOP_LET => (
                                classes::infer::PINNED_VARIABLE_MISMATCH,
                                format!(
                                    "Incompatible assignment to variable declared via `let`: expected `{}`, got `{}`",
                                    pin.show(gs),
                                    tao.ty.show(gs)
                                ),
                            ),
                            _ => (
                                classes::infer::PINNED_VARIABLE_MISMATCH,
                                format!(
                                    "Changing type of a variable in a loop: expected `{}`, got `{}`",
                                    pin.show(gs),
                                    tao.ty.show(gs)
                                ),
                            ),
                        };
                        gs.report(
                            Error::new(class, loc, header).with_section(ErrorSection::new(
                                format!("Got `{}` originating from:", tao.ty.show(gs)),
                                tao.origins.clone(),
                            )),
                        );
                        // Plain loop pins widen to untyped; declared pins hold.
                        tao.ty = if bind_min >= 0 { Type::Untyped } else { pin };
                    }
                    cfg.blocks[block_id].exprs[index].computed_type = Some(tao.ty.clone());
                    env.assign(bind, tao);
                }
            }
        }

        if let Some(knowledge) = knowledge {
            env.set_knowledge(bind, knowledge, loc);
        }
        if let Some((var, knowledge)) = back_knowledge {
            env.set_knowledge(var, knowledge, loc);
        }
    }

    /// Send typing: `super` is untyped, everything else goes through dispatch.
    /// A linked send also records the block signature and result on the link.
    fn process_send(
        &mut self,
        cfg: &mut Cfg,
        env: &mut Environment,
        loc: Loc,
        recv: LocalVariable,
        fun: NameRef,
        args: &[LocalVariable],
        link: Option<LinkId>,
    ) -> TypeAndOrigins {
        if fun == NameRef::from(WellKnownName::Super) {
            return TypeAndOrigins::new(Type::Untyped, loc);
        }
        let gs = self.gs;
        let recv_type = env.type_of(recv);
        let call_args: Vec<CallArg> = args
            .iter()
            .map(|&arg| {
                let tao = env.type_and_origins(arg, loc);
                CallArg {
                    ty: tao.ty,
                    loc,
                    origins: tao.origins,
                }
            })
            .collect();

        // `hard_assert` narrows the environment immediately; a provably falsy
        // argument makes the rest of the block unreachable.
        if fun == NameRef::from(WellKnownName::HardAssert)
            && let Some(&asserted) = args.first()
            && !env.assume_truthy(gs, asserted)
        {
            gs.report(Error::new(
                classes::infer::DEAD_BRANCH_INFERENCER,
                loc,
                "This assertion can never succeed; the code after it is unreachable",
            ));
        }

        let result = types::dispatch_call(gs, &recv_type, fun, loc, &call_args, &recv_type, link.is_some());
        if let Some(link) = link {
            let entry = cfg.link_mut(link);
            entry.signature = result.block.clone();
            entry.result_type = Some(result.return_type.clone());
        }
        TypeAndOrigins::new(result.return_type, loc)
    }

    /// The §knowledge table: what a send's result being truthy or falsy says
    /// about its operands.
    fn synthesize_send_knowledge(
        &self,
        env: &Environment,
        bind: LocalVariable,
        recv: LocalVariable,
        fun: NameRef,
        args: &[LocalVariable],
    ) -> Option<TestedKnowledge> {
        if !self.used_vars.contains(&bind) {
            return None;
        }
        let mut knowledge = TestedKnowledge::default();
        if fun == NameRef::from(WellKnownName::Bang) && args.is_empty() {
            // Negation swaps the receiver's facts wholesale, so tests like
            // `!x.nil?` keep narrowing through the extra send.
            let recv_knowledge = env.knowledge(recv);
            knowledge.truthy = recv_knowledge.falsy;
            knowledge.falsy = recv_knowledge.truthy;
            knowledge.truthy.add_yes(recv, Type::falsy_types());
            knowledge.falsy.add_no(recv, Type::falsy_types());
        } else if fun == NameRef::from(WellKnownName::NilP) && args.is_empty() {
            knowledge.truthy.add_yes(recv, Type::nil());
            knowledge.falsy.add_no(recv, Type::nil());
        } else if (fun == NameRef::from(WellKnownName::IsAP) || fun == NameRef::from(WellKnownName::KindOfP))
            && args.len() == 1
        {
            let attached = attached_class_of(&env.type_of(args[0]))?;
            knowledge.truthy.add_yes(recv, attached.clone());
            knowledge.falsy.add_no(recv, attached);
        } else if fun == NameRef::from(WellKnownName::Eq) && args.len() == 1 {
            let recv_type = env.type_of(recv);
            let arg_type = env.type_of(args[0]);
            if !recv_type.is_untyped() {
                knowledge.truthy.add_yes(args[0], recv_type.clone());
            }
            if !arg_type.is_untyped() {
                knowledge.truthy.add_yes(recv, arg_type);
            }
        } else if fun == NameRef::from(WellKnownName::TripleEq) && args.len() == 1 {
            let attached = attached_class_of(&env.type_of(recv))?;
            knowledge.truthy.add_yes(args[0], attached.clone());
            knowledge.falsy.add_no(args[0], attached);
        } else {
            return None;
        }
        if knowledge.truthy.is_empty() && knowledge.falsy.is_empty() {
            return None;
        }
        Some(knowledge)
    }

    fn check_return(&self, env: &Environment, method_sym: SymbolRef, value: LocalVariable, loc: Loc) {
        let gs = self.gs;
        let method = gs.symbol(method_sym);
        let Some(declared) = &method.result_type else {
            return;
        };
        let declared = declared.dealias(gs);
        if declared.is_untyped() {
            return;
        }
        let actual = env.type_and_origins(value, loc);
        if !types::is_subtype(gs, &actual.ty, &declared) {
            gs.report(
                Error::new(
                    classes::infer::RETURN_TYPE_MISMATCH,
                    loc,
                    format!(
                        "Expected `{}` but found `{}` for method result type",
                        declared.show(gs),
                        actual.ty.show(gs)
                    ),
                )
                .with_section(ErrorSection::new(
                    format!("Expected `{}` for result type of method `{}`", declared.show(gs), gs.show_symbol(method_sym)),
                    vec![method.loc],
                ))
                .with_section(ErrorSection::new(
                    format!("Got `{}` originating from:", actual.ty.show(gs)),
                    actual.origins,
                )),
            );
        }
    }

    /// The type of `self` inside `owner`: instances for ordinary classes, the
    /// class object inside singleton classes, and the top-level object at root.
    fn self_type(&self, owner: SymbolRef) -> Type {
        let gs = self.gs;
        if owner == SymbolRef::ROOT || !owner.exists() {
            return Type::Class(SymbolRef::OBJECT);
        }
        if gs.symbol(owner).name == NameRef::from(WellKnownName::Singleton) {
            return Type::MetaType(Box::new(Type::Class(gs.symbol(owner).owner)));
        }
        Type::Class(owner)
    }

    /// The value of a symbol reference: classes become class objects; fields and
    /// arguments carry their declared type, untyped when none was declared.
    fn alias_type(&self, symbol: SymbolRef) -> Type {
        let gs = self.gs;
        let sym = gs.symbol(symbol);
        if sym.flags.is_class_or_module() {
            return Type::MetaType(Box::new(Type::Class(symbol)));
        }
        match &sym.result_type {
            Some(ty) => ty.dealias(gs),
            None => Type::Untyped,
        }
    }
}

/// Widens singleton literal types to their underlying class; pinned loop
/// variables hold their class, not one specific value.
fn widen_literal(ty: &Type) -> Type {
    match ty {
        Type::Literal(value) => Type::Class(value.underlying()),
        Type::Or(a, b) => Type::Or(Box::new(widen_literal(a)), Box::new(widen_literal(b))),
        _ => ty.clone(),
    }
}

/// For a class-object type, the instance type its `is_a?`/`===` tests attach.
fn attached_class_of(ty: &Type) -> Option<Type> {
    match ty {
        Type::MetaType(inner) => Some((**inner).clone()),
        _ => None,
    }
}
