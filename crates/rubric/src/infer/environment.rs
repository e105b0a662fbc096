//! Per-block typing environments.
//!
//! An [`Environment`] maps each local to its current type (with the locations that
//! contributed to it), a pair of knowledge facts describing what becomes true of
//! *other* locals when this one is truthy or falsy, and a `known_truthy` bit.
//!
//! Knowledge facts under-approximate: a `(v, t)` entry in `yes_type_tests` means
//! "on every path here, if the owner is truthy then `v <: t`". Merging at joins
//! therefore intersects fact lists, joining yes-test types and meeting no-test
//! types, so nothing survives that does not hold on all paths.

use ahash::AHashMap;

use crate::{
    ast::LocalVariable,
    global_state::GlobalState,
    loc::Loc,
    symbols::SymbolRef,
    types::{self, Type},
};

/// A type plus the locations that produced it, for "originating from" sections.
#[derive(Debug, Clone)]
pub struct TypeAndOrigins {
    pub ty: Type,
    pub origins: Vec<Loc>,
}

impl TypeAndOrigins {
    pub fn new(ty: Type, origin: Loc) -> Self {
        Self {
            ty,
            origins: vec![origin],
        }
    }

    pub fn nil(origin: Loc) -> Self {
        Self::new(Type::nil(), origin)
    }
}

/// One refinement list: `(other local, type)` pairs.
///
/// `yes_type_tests`: the local must be a subtype of the type.
/// `no_type_tests`: the local must not be a subtype of the type.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeFact {
    pub yes_type_tests: Vec<(LocalVariable, Type)>,
    pub no_type_tests: Vec<(LocalVariable, Type)>,
}

impl KnowledgeFact {
    pub fn add_yes(&mut self, var: LocalVariable, ty: Type) {
        self.yes_type_tests.retain(|(v, _)| *v != var);
        self.yes_type_tests.push((var, ty));
    }

    pub fn add_no(&mut self, var: LocalVariable, ty: Type) {
        self.no_type_tests.retain(|(v, _)| *v != var);
        self.no_type_tests.push((var, ty));
    }

    fn remove_references_to(&mut self, var: LocalVariable) {
        self.yes_type_tests.retain(|(v, _)| *v != var);
        self.no_type_tests.retain(|(v, _)| *v != var);
    }

    /// Keeps only what both sides guarantee: yes-tests weaken to the join, no-tests
    /// to the meet.
    fn min(&mut self, gs: &GlobalState, other: &Self) {
        self.yes_type_tests.retain(|(v, _)| other.yes_type_tests.iter().any(|(ov, _)| ov == v));
        for (v, t) in &mut self.yes_type_tests {
            if let Some((_, ot)) = other.yes_type_tests.iter().find(|(ov, _)| *ov == *v) {
                *t = types::lub(gs, t, ot);
            }
        }
        self.no_type_tests.retain(|(v, _)| other.no_type_tests.iter().any(|(ov, _)| ov == v));
        for (v, t) in &mut self.no_type_tests {
            if let Some((_, ot)) = other.no_type_tests.iter().find(|(ov, _)| *ov == *v) {
                *t = types::glb(gs, t, ot);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.yes_type_tests.is_empty() && self.no_type_tests.is_empty()
    }
}

/// The truthy and falsy interpretations of one local.
#[derive(Debug, Clone, Default)]
pub struct TestedKnowledge {
    pub truthy: KnowledgeFact,
    pub falsy: KnowledgeFact,
}

#[derive(Debug, Clone)]
struct VarState {
    tao: TypeAndOrigins,
    knowledge: TestedKnowledge,
    known_truthy: bool,
}

impl VarState {
    fn fresh(tao: TypeAndOrigins) -> Self {
        Self {
            tao,
            knowledge: TestedKnowledge::default(),
            known_truthy: false,
        }
    }
}

/// See module docs.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    vars: AHashMap<LocalVariable, VarState>,
    pub is_dead: bool,
}

impl Environment {
    /// The current type of `var`, defaulting to nil for unseen locals.
    pub fn type_and_origins(&self, var: LocalVariable, default_origin: Loc) -> TypeAndOrigins {
        self.vars
            .get(&var)
            .map(|s| s.tao.clone())
            .unwrap_or_else(|| TypeAndOrigins::nil(default_origin))
    }

    pub fn type_of(&self, var: LocalVariable) -> Type {
        self.vars.get(&var).map_or(Type::nil(), |s| s.tao.ty.clone())
    }

    pub fn knowledge(&self, var: LocalVariable) -> TestedKnowledge {
        self.vars
            .get(&var)
            .map(|s| s.knowledge.clone())
            .unwrap_or_default()
    }

    pub fn set_knowledge(&mut self, var: LocalVariable, knowledge: TestedKnowledge, default_origin: Loc) {
        let state = self
            .vars
            .entry(var)
            .or_insert_with(|| VarState::fresh(TypeAndOrigins::nil(default_origin)));
        state.knowledge = knowledge;
    }

    /// Seeds a block argument with nil before predecessors populate it.
    pub fn initialize_arg(&mut self, var: LocalVariable, owner_loc: Loc) {
        self.vars
            .entry(var)
            .or_insert_with(|| VarState::fresh(TypeAndOrigins::nil(owner_loc)));
    }

    /// Assigns a new value to `var`: type and origins replace, knowledge clears,
    /// and every other local forgets what it knew about `var`.
    pub fn assign(&mut self, var: LocalVariable, tao: TypeAndOrigins) {
        self.clear_knowledge_about(var);
        self.vars.insert(var, VarState::fresh(tao));
    }

    fn clear_knowledge_about(&mut self, var: LocalVariable) {
        for state in self.vars.values_mut() {
            state.knowledge.truthy.remove_references_to(var);
            state.knowledge.falsy.remove_references_to(var);
        }
    }

    /// Restricts the environment to `keep` (a block's argument list).
    pub fn restrict_to(&mut self, keep: &[LocalVariable]) {
        self.vars.retain(|var, _| keep.contains(var));
    }

    /// Narrows by the knowledge of `cond` along a branch edge.
    ///
    /// When `taken`, the truthy fact applies: yes-tests meet into their locals'
    /// types, no-tests subtract. The condition itself narrows too: taken drops the
    /// falsy classes, not-taken meets with them. Narrowing to `Bottom` anywhere
    /// marks the environment dead.
    pub fn with_cond(&mut self, gs: &GlobalState, cond: LocalVariable, taken: bool) {
        if !cond.exists() || cond == LocalVariable::block_call() {
            return;
        }
        let knowledge = self.knowledge(cond);
        let fact = if taken { &knowledge.truthy } else { &knowledge.falsy };
        for (var, ty) in &fact.yes_type_tests {
            let current = self.type_of(*var);
            let narrowed = types::glb(gs, &current, ty);
            if narrowed.is_bottom() {
                self.is_dead = true;
            }
            if let Some(state) = self.vars.get_mut(var) {
                state.tao.ty = narrowed;
            }
        }
        for (var, ty) in &fact.no_type_tests {
            let current = self.type_of(*var);
            let narrowed = types::approximate_subtract(gs, &current, ty);
            if narrowed.is_bottom() {
                self.is_dead = true;
            }
            if let Some(state) = self.vars.get_mut(var) {
                state.tao.ty = narrowed;
            }
        }

        let current = self.type_of(cond);
        let narrowed = if taken {
            let no_nil = types::drop_subtypes_of(gs, &current, SymbolRef::NIL_CLASS);
            types::drop_subtypes_of(gs, &no_nil, SymbolRef::FALSE_CLASS)
        } else {
            types::glb(gs, &current, &Type::falsy_types())
        };
        if narrowed.is_bottom() {
            self.is_dead = true;
        }
        if let Some(state) = self.vars.get_mut(&cond) {
            state.tao.ty = narrowed;
            if taken {
                state.known_truthy = true;
            }
        }
    }

    /// Join-point merge: a true union over both sides' locals. A dead side
    /// contributes nothing; otherwise types join, origins union, truthiness and
    /// knowledge intersect. A local the other path never bound reads as nil
    /// there, so one-sided locals join against the nil type rather than keeping
    /// their single-path type unchanged.
    ///
    /// `skip_knowledge` suppresses knowledge merging for loop-carried locals when
    /// entering a loop header.
    pub fn merge_with(&mut self, gs: &GlobalState, other: &Self, skip_knowledge: impl Fn(LocalVariable) -> bool) {
        if other.is_dead {
            return;
        }
        if self.is_dead {
            *self = other.clone();
            return;
        }
        for (var, other_state) in &other.vars {
            match self.vars.get_mut(var) {
                None => {
                    // Unbound on our path: the join sees nil from this side.
                    let mut state = other_state.clone();
                    state.tao.ty = types::lub(gs, &Type::nil(), &state.tao.ty);
                    state.known_truthy = false;
                    state.knowledge = TestedKnowledge::default();
                    self.vars.insert(*var, state);
                }
                Some(state) => {
                    state.tao.ty = types::lub(gs, &state.tao.ty, &other_state.tao.ty);
                    for origin in &other_state.tao.origins {
                        if !state.tao.origins.contains(origin) {
                            state.tao.origins.push(*origin);
                        }
                    }
                    state.known_truthy = state.known_truthy && other_state.known_truthy;
                    if skip_knowledge(*var) {
                        state.knowledge = TestedKnowledge::default();
                    } else {
                        state.knowledge.truthy.min(gs, &other_state.knowledge.truthy);
                        state.knowledge.falsy.min(gs, &other_state.knowledge.falsy);
                    }
                }
            }
        }
        // The mirror direction: locals bound here but not on the other path.
        for (var, state) in &mut self.vars {
            if other.vars.contains_key(var) {
                continue;
            }
            state.tao.ty = types::lub(gs, &state.tao.ty, &Type::nil());
            state.known_truthy = false;
            state.knowledge = TestedKnowledge::default();
        }
    }

    /// Deterministic one-line rendering for the raw-CFG environment snapshots.
    pub fn show(&self, gs: &GlobalState) -> String {
        let mut entries: Vec<_> = self.vars.iter().collect();
        entries.sort_by_key(|(var, _)| (var.name.index(), var.unique_id));
        let body = entries
            .iter()
            .map(|(var, state)| format!("{}: {}", var.show(gs), state.tao.ty.show(gs)))
            .collect::<Vec<_>>()
            .join(", ");
        if self.is_dead { format!("<dead> {body}") } else { body }
    }

    /// `hard_assert`: assume `var` is truthy right here. Returns false when the
    /// assumption can never hold (the environment went dead).
    pub fn assume_truthy(&mut self, gs: &GlobalState, var: LocalVariable) -> bool {
        let knowledge = self.knowledge(var);
        for (other, ty) in &knowledge.truthy.yes_type_tests {
            let narrowed = types::glb(gs, &self.type_of(*other), ty);
            if narrowed.is_bottom() {
                self.is_dead = true;
            }
            if let Some(state) = self.vars.get_mut(other) {
                state.tao.ty = narrowed;
            }
        }
        for (other, ty) in &knowledge.truthy.no_type_tests {
            let narrowed = types::approximate_subtract(gs, &self.type_of(*other), ty);
            if narrowed.is_bottom() {
                self.is_dead = true;
            }
            if let Some(state) = self.vars.get_mut(other) {
                state.tao.ty = narrowed;
            }
        }
        let current = self.type_of(var);
        if !types::can_be_truthy(gs, &current) {
            self.is_dead = true;
            return false;
        }
        let no_nil = types::drop_subtypes_of(gs, &current, SymbolRef::NIL_CLASS);
        let narrowed = types::drop_subtypes_of(gs, &no_nil, SymbolRef::FALSE_CLASS);
        if let Some(state) = self.vars.get_mut(&var) {
            state.tao.ty = narrowed;
            state.known_truthy = true;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{errors::ErrorQueue, intern::WellKnownName};

    fn gs() -> GlobalState {
        GlobalState::new(&ErrorQueue::new())
    }

    fn var(id: u32) -> LocalVariable {
        LocalVariable {
            name: WellKnownName::CfgTemp.into(),
            unique_id: id,
        }
    }

    #[test]
    fn with_cond_narrows_through_nil_test_knowledge() {
        let gs = gs();
        let x = var(1);
        let test = var(2);
        let mut env = Environment::default();
        let nilable_int = Type::Or(Box::new(Type::nil()), Box::new(Type::Class(SymbolRef::INTEGER)));
        env.assign(x, TypeAndOrigins::new(nilable_int, Loc::NONE));
        env.assign(test, TypeAndOrigins::new(Type::boolean(), Loc::NONE));

        // test = x.nil? : truthy means x is nil, falsy means x is not nil.
        let mut knowledge = TestedKnowledge::default();
        knowledge.truthy.add_yes(x, Type::nil());
        knowledge.falsy.add_no(x, Type::nil());
        env.set_knowledge(test, knowledge, Loc::NONE);

        let mut taken = env.clone();
        taken.with_cond(&gs, test, true);
        assert_eq!(taken.type_of(x), Type::nil());
        assert!(!taken.is_dead);

        let mut not_taken = env;
        not_taken.with_cond(&gs, test, false);
        assert_eq!(not_taken.type_of(x), Type::Class(SymbolRef::INTEGER));
        assert!(!not_taken.is_dead);
    }

    #[test]
    fn with_cond_on_never_falsy_condition_kills_else_branch() {
        let gs = gs();
        let test = var(1);
        let mut env = Environment::default();
        env.assign(test, TypeAndOrigins::new(Type::Class(SymbolRef::INTEGER), Loc::NONE));
        env.with_cond(&gs, test, false);
        assert!(env.is_dead);
    }

    #[test]
    fn merge_joins_types_and_unions_origins() {
        let gs = gs();
        let x = var(1);
        let mut left = Environment::default();
        left.assign(x, TypeAndOrigins::new(Type::Class(SymbolRef::INTEGER), Loc::NONE));
        let mut right = Environment::default();
        right.assign(x, TypeAndOrigins::new(Type::Class(SymbolRef::STRING), Loc::NONE));

        left.merge_with(&gs, &right, |_| false);
        let joined = left.type_of(x);
        assert!(types::is_subtype(&gs, &Type::Class(SymbolRef::INTEGER), &joined));
        assert!(types::is_subtype(&gs, &Type::Class(SymbolRef::STRING), &joined));
    }

    #[test]
    fn merge_defaults_one_sided_locals_to_nil() {
        let gs = gs();
        let x = var(1);
        let y = var(2);
        let mut left = Environment::default();
        left.assign(x, TypeAndOrigins::new(Type::Class(SymbolRef::INTEGER), Loc::NONE));
        let mut right = Environment::default();
        right.assign(y, TypeAndOrigins::new(Type::Class(SymbolRef::STRING), Loc::NONE));

        left.merge_with(&gs, &right, |_| false);
        // A local the other path never bound joins against nil, both ways.
        assert!(types::is_subtype(&gs, &Type::nil(), &left.type_of(x)));
        assert!(types::is_subtype(&gs, &Type::Class(SymbolRef::INTEGER), &left.type_of(x)));
        assert!(types::is_subtype(&gs, &Type::nil(), &left.type_of(y)));
        assert!(types::is_subtype(&gs, &Type::Class(SymbolRef::STRING), &left.type_of(y)));
    }

    #[test]
    fn merge_with_dead_side_keeps_live_types() {
        let gs = gs();
        let x = var(1);
        let mut live = Environment::default();
        live.assign(x, TypeAndOrigins::new(Type::Class(SymbolRef::INTEGER), Loc::NONE));
        let mut dead = Environment::default();
        dead.assign(x, TypeAndOrigins::new(Type::Class(SymbolRef::STRING), Loc::NONE));
        dead.is_dead = true;

        live.merge_with(&gs, &dead, |_| false);
        assert_eq!(live.type_of(x), Type::Class(SymbolRef::INTEGER));
        assert!(!live.is_dead);
    }
}
