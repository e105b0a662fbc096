//! Method dispatch over types.
//!
//! [`dispatch_call`] answers "what does `recv.fun(args)` return", reporting argument
//! and resolution errors along the way. It also produces the block signature used by
//! the yield-parameter and block-return instructions when the send carries a block.

use crate::{
    errors::{Error, ErrorSection, classes},
    global_state::GlobalState,
    intern::{NameRef, WellKnownName},
    loc::Loc,
    symbols::{SymbolFlags, SymbolRef},
    types::{Type, is_subtype, lub},
};

/// One evaluated argument at a call site.
#[derive(Debug, Clone)]
pub struct CallArg {
    pub ty: Type,
    pub loc: Loc,
    /// Locations that contributed to the argument's type, for "originating from"
    /// sections.
    pub origins: Vec<Loc>,
}

/// The block half of a dispatch, filled into the send-and-block link.
#[derive(Debug, Clone, Default)]
pub struct BlockSignature {
    /// Declared parameter types. Indexes past the end read as `T.untyped`.
    pub param_types: Vec<Type>,
    /// Declared return type; `None` means unchecked.
    pub return_type: Option<Type>,
}

impl BlockSignature {
    pub fn param_type(&self, idx: usize) -> Type {
        self.param_types.get(idx).cloned().unwrap_or(Type::Untyped)
    }
}

/// What a call produced.
#[derive(Debug, Clone)]
pub struct DispatchResult {
    pub return_type: Type,
    pub block: Option<BlockSignature>,
}

impl DispatchResult {
    fn untyped(has_block: bool) -> Self {
        Self {
            return_type: Type::Untyped,
            block: has_block.then(BlockSignature::default),
        }
    }
}

/// Resolves and checks a call. See module docs.
///
/// `full_type` is the receiver type as written at the call site; when dispatch
/// recurses into union components, `recv` shrinks but `full_type` stays put so
/// error messages can mention both.
pub fn dispatch_call(
    gs: &GlobalState,
    recv: &Type,
    fun: NameRef,
    loc: Loc,
    args: &[CallArg],
    full_type: &Type,
    has_block: bool,
) -> DispatchResult {
    match recv {
        Type::Untyped => DispatchResult::untyped(has_block),
        Type::Bottom => DispatchResult {
            return_type: Type::Bottom,
            block: has_block.then(BlockSignature::default),
        },
        Type::Alias(_) => dispatch_call(gs, &recv.dealias(gs), fun, loc, args, full_type, has_block),
        Type::Or(a, b) => {
            let left = dispatch_call(gs, a, fun, loc, args, full_type, has_block);
            let right = dispatch_call(gs, b, fun, loc, args, full_type, has_block);
            DispatchResult {
                return_type: lub(gs, &left.return_type, &right.return_type),
                block: left.block.or(right.block),
            }
        }
        Type::And(a, b) => {
            // Prefer the component that can actually resolve the method.
            let resolves = |t: &Type| {
                t.nominal(gs)
                    .and_then(|c| gs.resolve_method(c, fun))
                    .is_some()
            };
            if resolves(a) || !resolves(b) {
                dispatch_call(gs, a, fun, loc, args, full_type, has_block)
            } else {
                dispatch_call(gs, b, fun, loc, args, full_type, has_block)
            }
        }
        Type::MetaType(inner) => dispatch_on_metatype(gs, inner, fun, loc, args, full_type, has_block),
        Type::Class(_) | Type::Applied { .. } | Type::Literal(_) => {
            let nominal = recv.nominal(gs).expect("nominal receiver");
            dispatch_on_class(gs, recv, nominal, fun, loc, args, full_type, has_block)
        }
        Type::Top | Type::TypeVar(_) | Type::SelfType | Type::AttachedClass(_) => {
            report_unknown_method(gs, fun, loc, full_type);
            DispatchResult::untyped(has_block)
        }
    }
}

/// The declared type of `method`'s `idx`-th positional argument, as seen on values
/// of `recv`. Used by `LoadArg` and `LoadYieldParam` typing.
pub fn get_call_argument_type(gs: &GlobalState, recv: &Type, method: NameRef, idx: usize) -> Type {
    let Some(nominal) = recv.nominal(gs) else {
        return Type::Untyped;
    };
    let Some(method_sym) = gs.resolve_method(nominal, method) else {
        return Type::Untyped;
    };
    let sym = gs.symbol(method_sym);
    sym.arguments
        .get(idx)
        .and_then(|&arg| gs.symbol(arg).result_type.clone())
        .map(|t| t.dealias(gs).replace_self_type(gs, recv))
        .unwrap_or(Type::Untyped)
}

fn dispatch_on_metatype(
    gs: &GlobalState,
    inner: &Type,
    fun: NameRef,
    loc: Loc,
    args: &[CallArg],
    full_type: &Type,
    has_block: bool,
) -> DispatchResult {
    // The Magic receiver encodes constructs without a first-class expression form.
    if inner.nominal(gs) == Some(SymbolRef::MAGIC) {
        return dispatch_magic(gs, fun, args, has_block);
    }

    if fun == NameRef::from(WellKnownName::New) {
        // `C.new(...)` produces an instance, checking `initialize` when declared.
        if let Some(nominal) = inner.nominal(gs)
            && let Some(init) = gs.resolve_method(nominal, NameRef::from(WellKnownName::Initialize))
        {
            check_arguments(gs, init, loc, args, full_type);
        }
        return DispatchResult {
            return_type: inner.clone(),
            block: has_block.then(BlockSignature::default),
        };
    }

    // Other methods on a class object live on its singleton class.
    if let Some(nominal) = inner.nominal(gs) {
        let singleton_name = NameRef::from(WellKnownName::Singleton);
        if let Some(singleton) = gs.member(nominal, singleton_name)
            && let Some(method_sym) = gs.resolve_method(singleton, fun)
        {
            check_arguments(gs, method_sym, loc, args, full_type);
            let ret = result_type_of(gs, method_sym, inner);
            return DispatchResult {
                return_type: ret,
                block: has_block.then(BlockSignature::default),
            };
        }
        // Fall back to Object's instance methods; class objects are objects too.
        if let Some(method_sym) = gs.resolve_method(SymbolRef::OBJECT, fun) {
            check_arguments(gs, method_sym, loc, args, full_type);
            let ret = result_type_of(gs, method_sym, full_type);
            return DispatchResult {
                return_type: ret,
                block: has_block.then(BlockSignature::default),
            };
        }
    }
    report_unknown_method(gs, fun, loc, full_type);
    DispatchResult::untyped(has_block)
}

fn dispatch_magic(gs: &GlobalState, fun: NameRef, args: &[CallArg], has_block: bool) -> DispatchResult {
    let return_type = if fun == NameRef::from(WellKnownName::BuildArray) {
        let elem = args
            .iter()
            .map(|a| a.ty.clone())
            .reduce(|a, b| lub(gs, &a, &b))
            .unwrap_or(Type::Untyped);
        Type::Applied {
            symbol: SymbolRef::ARRAY,
            targs: vec![elem],
        }
    } else if fun == NameRef::from(WellKnownName::BuildHash) {
        Type::Class(SymbolRef::HASH)
    } else if fun == NameRef::from(WellKnownName::ExpandSplat) {
        Type::Class(SymbolRef::ARRAY)
    } else if fun == NameRef::from(WellKnownName::DefinedP) {
        Type::Or(Box::new(Type::nil()), Box::new(Type::Class(SymbolRef::STRING)))
    } else {
        // callWithSplat and anything else the desugarer invents.
        Type::Untyped
    };
    DispatchResult {
        return_type,
        block: has_block.then(BlockSignature::default),
    }
}

fn dispatch_on_class(
    gs: &GlobalState,
    recv: &Type,
    nominal: SymbolRef,
    fun: NameRef,
    loc: Loc,
    args: &[CallArg],
    full_type: &Type,
    has_block: bool,
) -> DispatchResult {
    let Some(method_sym) = gs.resolve_method(nominal, fun) else {
        report_unknown_method(gs, fun, loc, full_type);
        return DispatchResult::untyped(has_block);
    };

    check_arguments(gs, method_sym, loc, args, full_type);

    let return_type = result_type_of(gs, method_sym, recv);
    let block = has_block.then(|| block_signature(recv, fun));
    DispatchResult { return_type, block }
}

fn result_type_of(gs: &GlobalState, method_sym: SymbolRef, recv: &Type) -> Type {
    match &gs.symbol(method_sym).result_type {
        Some(t) => t.dealias(gs).replace_self_type(gs, recv),
        None => Type::Untyped,
    }
}

/// Declared block parameter types for the handful of iteration methods the seeds
/// type precisely; everything else yields untyped parameters.
fn block_signature(recv: &Type, fun: NameRef) -> BlockSignature {
    if fun == NameRef::from(WellKnownName::Each)
        && let Type::Applied { symbol, targs } = recv
        && *symbol == SymbolRef::ARRAY
        && let Some(elem) = targs.first()
    {
        return BlockSignature {
            param_types: vec![elem.clone()],
            return_type: None,
        };
    }
    BlockSignature::default()
}

fn check_arguments(
    gs: &GlobalState,
    method_sym: SymbolRef,
    loc: Loc,
    args: &[CallArg],
    full_type: &Type,
) {
    let method = gs.symbol(method_sym);
    let mut required = 0usize;
    let mut maximum = Some(0usize);
    for &arg_ref in &method.arguments {
        let flags = gs.symbol(arg_ref).flags;
        if flags.has(SymbolFlags::ARG_BLOCK) {
            continue;
        }
        if flags.has(SymbolFlags::ARG_REPEATED) {
            maximum = None;
            continue;
        }
        if let Some(max) = &mut maximum {
            *max += 1;
        }
        if !flags.has(SymbolFlags::ARG_OPTIONAL) && !flags.has(SymbolFlags::ARG_KEYWORD) {
            required += 1;
        }
    }

    if args.len() < required {
        gs.report(Error::new(
            classes::infer::METHOD_ARGUMENT_COUNT_MISMATCH,
            loc,
            format!(
                "Not enough arguments provided for method `{}`. Expected: {}, got: {}",
                gs.show_symbol(method_sym),
                required,
                args.len()
            ),
        ));
        return;
    }
    if let Some(max) = maximum
        && args.len() > max
    {
        gs.report(Error::new(
            classes::infer::METHOD_ARGUMENT_COUNT_MISMATCH,
            loc,
            format!(
                "Too many arguments provided for method `{}`. Expected: {}, got: {}",
                gs.show_symbol(method_sym),
                max,
                args.len()
            ),
        ));
        return;
    }

    // Positional type checks against the declared formals, stopping at a rest arg.
    let mut formal_iter = method.arguments.iter().copied().filter(|&a| {
        let flags = gs.symbol(a).flags;
        !flags.has(SymbolFlags::ARG_BLOCK) && !flags.has(SymbolFlags::ARG_KEYWORD)
    });
    for arg in args {
        let Some(formal_ref) = formal_iter.next() else {
            break;
        };
        let formal = gs.symbol(formal_ref);
        if formal.flags.has(SymbolFlags::ARG_REPEATED) {
            break;
        }
        let Some(declared) = &formal.result_type else {
            continue;
        };
        let declared = declared.dealias(gs).replace_self_type(gs, full_type);
        if !is_subtype(gs, &arg.ty, &declared) {
            let mut error = Error::new(
                classes::infer::METHOD_ARGUMENT_MISMATCH,
                arg.loc,
                format!(
                    "Expected `{}` but found `{}` for argument `{}`",
                    declared.show(gs),
                    arg.ty.show(gs),
                    gs.show_name(formal.name)
                ),
            );
            error = error.with_section(ErrorSection::new(
                format!("Expected `{}` for argument `{}` of method `{fun_name}`",
                    declared.show(gs),
                    gs.show_name(formal.name),
                    fun_name = gs.show_symbol(method_sym)),
                vec![gs.symbol(method_sym).loc],
            ));
            if !arg.origins.is_empty() {
                error = error.with_section(ErrorSection::new(
                    format!("Got `{}` originating from:", arg.ty.show(gs)),
                    arg.origins.clone(),
                ));
            }
            gs.report(error);
        }
    }
}

fn report_unknown_method(gs: &GlobalState, fun: NameRef, loc: Loc, full_type: &Type) {
    gs.report(Error::new(
        classes::infer::UNKNOWN_METHOD,
        loc,
        format!(
            "Method `{}` does not exist on `{}`",
            gs.show_name(fun),
            full_type.show(gs)
        ),
    ));
}
