//! The type lattice.
//!
//! Types are small tagged-variant values. `Untyped` is the gradual escape hatch: it
//! satisfies every subtype query in both directions and surfaces to users as "no
//! information". `Or`/`And` are built through normalizing constructors so that
//! printed forms and comparisons stay deterministic.
//!
//! All relational operations take the `GlobalState` because nominal subtyping
//! consults the symbol table's ancestor links.

mod calls;

pub use calls::{BlockSignature, CallArg, DispatchResult, dispatch_call, get_call_argument_type};

use crate::{
    global_state::GlobalState,
    intern::NameRef,
    symbols::{SymbolFlags, SymbolRef},
};

/// A singleton type's value, carrying its underlying class implicitly.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum LiteralValue {
    Integer(i64),
    Float(f64),
    String(NameRef),
    Symbol(NameRef),
}

impl LiteralValue {
    /// The nominal class this literal is an instance of.
    pub fn underlying(&self) -> SymbolRef {
        match self {
            Self::Integer(_) => SymbolRef::INTEGER,
            Self::Float(_) => SymbolRef::FLOAT,
            Self::String(_) => SymbolRef::STRING,
            Self::Symbol(_) => SymbolRef::SYMBOL,
        }
    }
}

/// See module docs.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Type {
    /// The empty type; no value inhabits it.
    Bottom,
    /// The type of every value.
    Top,
    /// Gradual escape; satisfies every subtype query reflexively.
    Untyped,
    /// Nominal instance type.
    Class(SymbolRef),
    /// Generic instance type.
    Applied { symbol: SymbolRef, targs: Vec<Type> },
    /// The value *is* a type (a class object, or a type literal in a cast).
    MetaType(Box<Type>),
    /// Singleton type with an underlying class.
    Literal(LiteralValue),
    Or(Box<Type>, Box<Type>),
    And(Box<Type>, Box<Type>),
    /// Indirection through a symbol's result type, resolved on lookup.
    Alias(SymbolRef),
    TypeVar(SymbolRef),
    SelfType,
    AttachedClass(SymbolRef),
}

impl Type {
    pub fn nil() -> Self {
        Self::Class(SymbolRef::NIL_CLASS)
    }

    pub fn boolean() -> Self {
        Self::Or(
            Box::new(Self::Class(SymbolRef::TRUE_CLASS)),
            Box::new(Self::Class(SymbolRef::FALSE_CLASS)),
        )
    }

    /// `Or(NilClass, FalseClass)`: the types whose values are falsy.
    pub fn falsy_types() -> Self {
        Self::Or(
            Box::new(Self::Class(SymbolRef::NIL_CLASS)),
            Box::new(Self::Class(SymbolRef::FALSE_CLASS)),
        )
    }

    pub fn is_untyped(&self) -> bool {
        matches!(self, Self::Untyped)
    }

    pub fn is_bottom(&self) -> bool {
        matches!(self, Self::Bottom)
    }

    /// Normalizing union constructor: flattens, drops duplicates and `Bottom`,
    /// collapses around `Untyped`/`Top`.
    pub fn any(gs: &GlobalState, a: Self, b: Self) -> Self {
        lub(gs, &a, &b)
    }

    /// Normalizing intersection constructor.
    pub fn all(gs: &GlobalState, a: Self, b: Self) -> Self {
        glb(gs, &a, &b)
    }

    /// Follows `Alias` indirections to the underlying type.
    pub fn dealias(&self, gs: &GlobalState) -> Self {
        match self {
            Self::Alias(sym) => match &gs.symbol(*sym).result_type {
                Some(t) => t.dealias(gs),
                None => Self::Untyped,
            },
            _ => self.clone(),
        }
    }

    /// Substitutes `targs` for occurrences of `params`' type variables.
    pub fn instantiate(&self, gs: &GlobalState, params: &[SymbolRef], targs: &[Type]) -> Self {
        match self {
            Self::TypeVar(sym) | Self::AttachedClass(sym) => params
                .iter()
                .position(|p| p == sym)
                .and_then(|i| targs.get(i).cloned())
                .unwrap_or_else(|| self.clone()),
            Self::Applied { symbol, targs: inner } => Self::Applied {
                symbol: *symbol,
                targs: inner.iter().map(|t| t.instantiate(gs, params, targs)).collect(),
            },
            Self::Or(a, b) => Self::Or(
                Box::new(a.instantiate(gs, params, targs)),
                Box::new(b.instantiate(gs, params, targs)),
            ),
            Self::And(a, b) => Self::And(
                Box::new(a.instantiate(gs, params, targs)),
                Box::new(b.instantiate(gs, params, targs)),
            ),
            Self::MetaType(t) => Self::MetaType(Box::new(t.instantiate(gs, params, targs))),
            _ => self.clone(),
        }
    }

    /// Replaces `SelfType` with a concrete receiver type.
    pub fn replace_self_type(&self, gs: &GlobalState, with: &Self) -> Self {
        match self {
            Self::SelfType => with.clone(),
            Self::Applied { symbol, targs } => Self::Applied {
                symbol: *symbol,
                targs: targs.iter().map(|t| t.replace_self_type(gs, with)).collect(),
            },
            Self::Or(a, b) => Self::Or(
                Box::new(a.replace_self_type(gs, with)),
                Box::new(b.replace_self_type(gs, with)),
            ),
            Self::And(a, b) => Self::And(
                Box::new(a.replace_self_type(gs, with)),
                Box::new(b.replace_self_type(gs, with)),
            ),
            _ => self.clone(),
        }
    }

    /// The nominal class(es) this type is known to be an instance of, for method
    /// resolution. `None` when the type gives no nominal handle.
    pub(crate) fn nominal(&self, gs: &GlobalState) -> Option<SymbolRef> {
        match self {
            Self::Class(sym) | Self::Applied { symbol: sym, .. } => Some(*sym),
            Self::Literal(v) => Some(v.underlying()),
            Self::Alias(_) => self.dealias(gs).nominal(gs),
            _ => None,
        }
    }

    /// Renders the user-facing form.
    pub fn show(&self, gs: &GlobalState) -> String {
        match self {
            Self::Bottom => "T.noreturn".to_owned(),
            Self::Top => "T.anything".to_owned(),
            Self::Untyped => "T.untyped".to_owned(),
            Self::Class(sym) => gs.show_symbol(*sym),
            Self::Applied { symbol, targs } => {
                let args: Vec<String> = targs.iter().map(|t| t.show(gs)).collect();
                format!("{}[{}]", gs.show_symbol(*symbol), args.join(", "))
            }
            Self::MetaType(t) => format!("<Type: {}>", t.show(gs)),
            Self::Literal(v) => match v {
                LiteralValue::Integer(i) => format!("Integer({i})"),
                LiteralValue::Float(f) => format!("Float({f})"),
                LiteralValue::String(s) => format!("String(\"{}\")", gs.show_name(*s)),
                LiteralValue::Symbol(s) => format!("Symbol(:{})", gs.show_name(*s)),
            },
            Self::Or(a, b) => {
                // T.nilable is the common special case; print it tightly.
                if **a == Self::nil() {
                    format!("T.nilable({})", b.show(gs))
                } else if **b == Self::nil() {
                    format!("T.nilable({})", a.show(gs))
                } else if *self == Self::boolean() {
                    "T::Boolean".to_owned()
                } else {
                    format!("T.any({}, {})", a.show(gs), b.show(gs))
                }
            }
            Self::And(a, b) => format!("T.all({}, {})", a.show(gs), b.show(gs)),
            Self::Alias(sym) => format!("<Alias: {}>", gs.show_symbol(*sym)),
            Self::TypeVar(sym) => format!("T.type_parameter(:{})", gs.show_name(gs.symbol(*sym).name)),
            Self::SelfType => "T.self_type".to_owned(),
            Self::AttachedClass(_) => "T.attached_class".to_owned(),
        }
    }
}

/// Subtype query: `sub <: sup`.
///
/// `Untyped` answers yes on either side; that is the whole point of a gradual
/// escape. `Alias` is resolved before comparing.
pub fn is_subtype(gs: &GlobalState, sub: &Type, sup: &Type) -> bool {
    if sub == sup {
        return true;
    }
    match (sub, sup) {
        (Type::Untyped, _) | (_, Type::Untyped) => true,
        (Type::Alias(_), _) => is_subtype(gs, &sub.dealias(gs), sup),
        (_, Type::Alias(_)) => is_subtype(gs, sub, &sup.dealias(gs)),
        (Type::Bottom, _) => true,
        (_, Type::Top) => true,
        (Type::Top, _) => false,
        // Unions and intersections, sub side first.
        (Type::Or(a, b), _) => is_subtype(gs, a, sup) && is_subtype(gs, b, sup),
        (Type::And(a, b), _) => is_subtype(gs, a, sup) || is_subtype(gs, b, sup),
        (_, Type::And(a, b)) => is_subtype(gs, sub, a) && is_subtype(gs, sub, b),
        (_, Type::Or(a, b)) => is_subtype(gs, sub, a) || is_subtype(gs, sub, b),
        (Type::Literal(a), Type::Literal(b)) => a == b,
        (Type::Literal(a), _) => is_subtype(gs, &Type::Class(a.underlying()), sup),
        (Type::Class(a), Type::Class(b)) => gs.derives_from(*a, *b),
        (Type::Applied { symbol, .. }, Type::Class(b)) => gs.derives_from(*symbol, *b),
        (Type::Applied { symbol: a, targs: ta }, Type::Applied { symbol: b, targs: tb }) => {
            a == b && ta.len() == tb.len() && ta.iter().zip(tb).all(|(x, y)| is_subtype(gs, x, y))
        }
        (Type::Class(a), Type::Applied { symbol, targs }) => {
            // A bare class is a subtype of an applied form of itself only when the
            // application demands nothing of the arguments.
            gs.derives_from(*a, *symbol) && targs.iter().all(|t| matches!(t, Type::Untyped | Type::Top))
        }
        (Type::MetaType(a), Type::MetaType(b)) => is_subtype(gs, a, b),
        _ => false,
    }
}

/// Least upper bound (join).
pub fn lub(gs: &GlobalState, a: &Type, b: &Type) -> Type {
    if a == b {
        return a.clone();
    }
    match (a, b) {
        (Type::Untyped, _) | (_, Type::Untyped) => Type::Untyped,
        (Type::Bottom, other) | (other, Type::Bottom) => other.clone(),
        (Type::Top, _) | (_, Type::Top) => Type::Top,
        _ => {
            if is_subtype(gs, a, b) {
                return b.clone();
            }
            if is_subtype(gs, b, a) {
                return a.clone();
            }
            // Normalize: flatten both sides, drop components already absorbed.
            let mut parts: Vec<Type> = Vec::new();
            collect_or(a, &mut parts);
            collect_or(b, &mut parts);
            let mut kept: Vec<Type> = Vec::new();
            for part in parts {
                if kept.iter().any(|k| is_subtype(gs, &part, k)) {
                    continue;
                }
                kept.retain(|k| !is_subtype(gs, k, &part));
                kept.push(part);
            }
            build_or(kept)
        }
    }
}

/// Greatest lower bound (meet).
pub fn glb(gs: &GlobalState, a: &Type, b: &Type) -> Type {
    if a == b {
        return a.clone();
    }
    match (a, b) {
        (Type::Untyped, _) | (_, Type::Untyped) => Type::Untyped,
        (Type::Bottom, _) | (_, Type::Bottom) => Type::Bottom,
        (Type::Top, other) | (other, Type::Top) => other.clone(),
        _ => {
            if is_subtype(gs, a, b) {
                return a.clone();
            }
            if is_subtype(gs, b, a) {
                return b.clone();
            }
            // Meet distributes over a union on either side.
            if let Type::Or(x, y) = a {
                return lub(gs, &glb(gs, x, b), &glb(gs, y, b));
            }
            if let Type::Or(x, y) = b {
                return lub(gs, &glb(gs, a, x), &glb(gs, a, y));
            }
            match (a.nominal(gs), b.nominal(gs)) {
                // Two unrelated concrete classes share no instances. Modules can
                // still intersect through an unseen includer.
                (Some(ca), Some(cb)) => {
                    let class_a = gs.symbol(ca).flags.has(SymbolFlags::CLASS);
                    let class_b = gs.symbol(cb).flags.has(SymbolFlags::CLASS);
                    if class_a && class_b {
                        Type::Bottom
                    } else {
                        Type::And(Box::new(a.clone()), Box::new(b.clone()))
                    }
                }
                _ => Type::And(Box::new(a.clone()), Box::new(b.clone())),
            }
        }
    }
}

fn collect_or(t: &Type, out: &mut Vec<Type>) {
    match t {
        Type::Or(a, b) => {
            collect_or(a, out);
            collect_or(b, out);
        }
        _ => out.push(t.clone()),
    }
}

fn build_or(mut parts: Vec<Type>) -> Type {
    match parts.len() {
        0 => Type::Bottom,
        1 => parts.pop().expect("len checked"),
        _ => {
            let mut iter = parts.into_iter();
            let first = iter.next().expect("len checked");
            iter.fold(first, |acc, t| Type::Or(Box::new(acc), Box::new(t)))
        }
    }
}

/// Removes from `t` every component that is a subtype of `class_sym`.
///
/// This is the engine behind `if x.nil?` style narrowing: the else branch drops
/// `NilClass` from `x`'s type. `Untyped` stays untyped; narrowing cannot create
/// information that was never there.
pub fn drop_subtypes_of(gs: &GlobalState, t: &Type, class_sym: SymbolRef) -> Type {
    match t {
        Type::Untyped | Type::Top => t.clone(),
        Type::Or(a, b) => {
            let left = drop_subtypes_of(gs, a, class_sym);
            let right = drop_subtypes_of(gs, b, class_sym);
            lub(gs, &left, &right)
        }
        Type::And(a, b) => {
            let left = drop_subtypes_of(gs, a, class_sym);
            let right = drop_subtypes_of(gs, b, class_sym);
            glb(gs, &left, &right)
        }
        Type::Alias(_) => drop_subtypes_of(gs, &t.dealias(gs), class_sym),
        _ => match t.nominal(gs) {
            Some(c) if gs.derives_from(c, class_sym) => Type::Bottom,
            _ => t.clone(),
        },
    }
}

/// Approximation of `t - sub`: subtracts only where the class structure makes the
/// subtraction exact, otherwise leaves `t` alone.
pub fn approximate_subtract(gs: &GlobalState, t: &Type, sub: &Type) -> Type {
    match sub {
        Type::Class(c) => drop_subtypes_of(gs, t, *c),
        Type::Applied { symbol, .. } => drop_subtypes_of(gs, t, *symbol),
        Type::Or(a, b) => {
            let once = approximate_subtract(gs, t, a);
            approximate_subtract(gs, &once, b)
        }
        _ => t.clone(),
    }
}

/// Can a value of this type be truthy?
pub fn can_be_truthy(gs: &GlobalState, t: &Type) -> bool {
    match t {
        Type::Untyped | Type::Top => true,
        _ => {
            let without_nil = drop_subtypes_of(gs, t, SymbolRef::NIL_CLASS);
            let without_falsy = drop_subtypes_of(gs, &without_nil, SymbolRef::FALSE_CLASS);
            !without_falsy.is_bottom()
        }
    }
}

/// Can a value of this type be falsy (i.e. `nil` or `false`)?
pub fn can_be_falsy(gs: &GlobalState, t: &Type) -> bool {
    match t {
        Type::Untyped | Type::Top => true,
        _ => !glb(gs, t, &Type::falsy_types()).is_bottom(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorQueue;

    fn gs() -> GlobalState {
        let queue = ErrorQueue::new();
        GlobalState::new(&queue)
    }

    #[test]
    fn untyped_satisfies_everything() {
        let gs = gs();
        let int = Type::Class(SymbolRef::INTEGER);
        assert!(is_subtype(&gs, &Type::Untyped, &int));
        assert!(is_subtype(&gs, &int, &Type::Untyped));
    }

    #[test]
    fn nominal_subtyping_follows_ancestors() {
        let gs = gs();
        let int = Type::Class(SymbolRef::INTEGER);
        let obj = Type::Class(SymbolRef::OBJECT);
        assert!(is_subtype(&gs, &int, &obj));
        assert!(!is_subtype(&gs, &obj, &int));
    }

    #[test]
    fn lub_builds_and_absorbs_unions() {
        let gs = gs();
        let int = Type::Class(SymbolRef::INTEGER);
        let str_t = Type::Class(SymbolRef::STRING);
        let joined = lub(&gs, &int, &str_t);
        assert!(is_subtype(&gs, &int, &joined));
        assert!(is_subtype(&gs, &str_t, &joined));
        // Joining with a supertype collapses.
        let obj = Type::Class(SymbolRef::OBJECT);
        assert_eq!(lub(&gs, &int, &obj), obj);
        // Joining an already-covered member changes nothing.
        assert_eq!(lub(&gs, &joined, &int), joined);
    }

    #[test]
    fn glb_of_unrelated_classes_is_bottom() {
        let gs = gs();
        let int = Type::Class(SymbolRef::INTEGER);
        let str_t = Type::Class(SymbolRef::STRING);
        assert_eq!(glb(&gs, &int, &str_t), Type::Bottom);
        assert_eq!(glb(&gs, &int, &Type::Class(SymbolRef::OBJECT)), int);
    }

    #[test]
    fn drop_subtypes_narrows_unions() {
        let gs = gs();
        let nilable_int = Type::Or(Box::new(Type::nil()), Box::new(Type::Class(SymbolRef::INTEGER)));
        let narrowed = drop_subtypes_of(&gs, &nilable_int, SymbolRef::NIL_CLASS);
        assert_eq!(narrowed, Type::Class(SymbolRef::INTEGER));
        let gone = drop_subtypes_of(&gs, &Type::nil(), SymbolRef::NIL_CLASS);
        assert_eq!(gone, Type::Bottom);
    }

    #[test]
    fn truthiness_respects_falsy_components() {
        let gs = gs();
        let int = Type::Class(SymbolRef::INTEGER);
        assert!(can_be_truthy(&gs, &int));
        assert!(!can_be_falsy(&gs, &int));
        assert!(can_be_falsy(&gs, &Type::nil()));
        assert!(!can_be_truthy(&gs, &Type::nil()));
        let nilable_int = Type::Or(Box::new(Type::nil()), Box::new(int));
        assert!(can_be_truthy(&gs, &nilable_int));
        assert!(can_be_falsy(&gs, &nilable_int));
    }

    #[test]
    fn literal_types_sit_under_their_class() {
        let gs = gs();
        let three = Type::Literal(LiteralValue::Integer(3));
        assert!(is_subtype(&gs, &three, &Type::Class(SymbolRef::INTEGER)));
        assert!(!is_subtype(&gs, &Type::Class(SymbolRef::INTEGER), &three));
    }

    #[test]
    fn show_forms_are_stable() {
        let gs = gs();
        assert_eq!(Type::Untyped.show(&gs), "T.untyped");
        assert_eq!(Type::boolean().show(&gs), "T::Boolean");
        let nilable = Type::Or(Box::new(Type::nil()), Box::new(Type::Class(SymbolRef::STRING)));
        assert_eq!(nilable.show(&gs), "T.nilable(String)");
    }
}
