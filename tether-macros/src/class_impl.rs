// #[hostclass_impl] expansion: registers the marked members of one impl
// block on a #[hostclass] type.
//
//   #[func]                  method callable from the engine
//   #[func(Override)]        override of an engine virtual (`_ready`, ...)
//   #[signal] fn name(..) {} signal declaration; removed from the impl
//   #[constant]              integer constant (optionally in an enum)

use proc_macro2::TokenStream;
use quote::quote;
use syn::{parse2, Expr, FnArg, Ident, ImplItem, ImplItemConst, ImplItemFn, ItemImpl, Meta, Pat, Type};

use crate::attrs;

// ---------------------------------------------------------------------------
// Parsed members
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq)]
enum Receiver {
    Ref,
    Mut,
    Static,
}

struct FuncInfo {
    method_ident: Ident,
    name: String,
    receiver: Receiver,
    params: Vec<(Ident, Type)>,
    is_override: bool,
    defaults: Vec<Expr>,
}

struct SignalInfo {
    name: String,
    params: Vec<(Ident, Type)>,
}

enum ConstantKind {
    Plain,
    Enum(String),
    Bitfield(String),
}

struct ConstantInfo {
    ident: Ident,
    kind: ConstantKind,
}

// ---------------------------------------------------------------------------
// Main expansion
// ---------------------------------------------------------------------------

pub fn expand_hostclass_impl(_attr: TokenStream, item: TokenStream) -> syn::Result<TokenStream> {
    let mut input: ItemImpl = parse2(item)?;
    if input.trait_.is_some() {
        return Err(syn::Error::new_spanned(
            &input.self_ty,
            "#[hostclass_impl] goes on an inherent impl block, not a trait impl",
        ));
    }
    let self_ty = (*input.self_ty).clone();
    if attrs::type_name(&self_ty).is_none() {
        return Err(syn::Error::new_spanned(&self_ty, "expected a type name"));
    }

    let mut funcs = Vec::new();
    let mut signals = Vec::new();
    let mut constants = Vec::new();

    for item in &input.items {
        match item {
            ImplItem::Fn(method) if attrs::find_attr(&method.attrs, "func").is_some() => {
                funcs.push(parse_func(method)?);
            }
            ImplItem::Fn(method) if attrs::find_attr(&method.attrs, "signal").is_some() => {
                signals.push(parse_signal(method)?);
            }
            ImplItem::Const(constant) if attrs::find_attr(&constant.attrs, "constant").is_some() => {
                constants.push(parse_constant(constant)?);
            }
            _ => {}
        }
    }

    // Signals only exist for registration; everything else keeps its body.
    input.items.retain(|item| !matches!(item, ImplItem::Fn(m) if attrs::find_attr(&m.attrs, "signal").is_some()));
    for item in &mut input.items {
        match item {
            ImplItem::Fn(method) => method.attrs.retain(|a| !a.path().is_ident("func")),
            ImplItem::Const(constant) => constant.attrs.retain(|a| !a.path().is_ident("constant")),
            _ => {}
        }
    }

    let mut chain: Vec<TokenStream> = Vec::new();
    for func in &funcs {
        chain.push(func_registration(&self_ty, func)?);
    }
    for signal in &signals {
        let name = &signal.name;
        let tys = signal.params.iter().map(|(_, ty)| ty);
        let names = signal.params.iter().map(|(ident, _)| ident.to_string());
        chain.push(quote! { .signal::<(#(#tys,)*)>(#name, &[#(#names),*]) });
    }
    for constant in &constants {
        let ident = &constant.ident;
        let name = ident.to_string();
        let value = quote! { (<#self_ty>::#ident) as i64 };
        chain.push(match &constant.kind {
            ConstantKind::Plain => quote! { .constant(#name, #value) },
            ConstantKind::Enum(enum_name) => quote! { .enum_constant(#enum_name, #name, #value) },
            ConstantKind::Bitfield(enum_name) => quote! { .bitfield_flag(#enum_name, #name, #value) },
        });
    }

    Ok(quote! {
        #input

        const _: () = {
            fn extend(desc: ::tether::runtime::ClassDescriptor) -> ::tether::runtime::ClassDescriptor {
                ::tether::runtime::ClassBuilder::<#self_ty>::extend(desc)
                    #(#chain)*
                    .build()
            }

            ::tether::__inventory::submit! {
                ::tether::runtime::ImplRegistration {
                    class: <#self_ty as ::tether::runtime::EngineClass>::CLASS_NAME,
                    extend,
                }
            }
        };
    })
}

fn func_registration(self_ty: &Type, func: &FuncInfo) -> syn::Result<TokenStream> {
    let name = &func.name;
    let method = &func.method_ident;
    let names: Vec<&Ident> = func.params.iter().map(|(ident, _)| ident).collect();
    let tys: Vec<&Type> = func.params.iter().map(|(_, ty)| ty).collect();
    let args_pat = quote! { (#(#names,)*): (#(#tys,)*) };

    let mut out = match (func.is_override, func.receiver) {
        (true, Receiver::Static) => {
            return Err(syn::Error::new_spanned(method, "virtual overrides need a `self` receiver"));
        }
        (true, _) => quote! {
            .virtual_method(#name, |this: &mut #self_ty, #args_pat| this.#method(#(#names),*))
        },
        (false, Receiver::Ref) => quote! {
            .method(#name, |this: &#self_ty, #args_pat| this.#method(#(#names),*))
        },
        (false, Receiver::Mut) => quote! {
            .method_mut(#name, |this: &mut #self_ty, #args_pat| this.#method(#(#names),*))
        },
        (false, Receiver::Static) => quote! {
            .static_method(#name, |#args_pat| <#self_ty>::#method(#(#names),*))
        },
    };

    if !func.is_override && !names.is_empty() {
        let arg_names = names.iter().map(|ident| ident.to_string());
        out.extend(quote! { .arg_names(&[#(#arg_names),*]) });
    }
    if !func.defaults.is_empty() {
        let defaults = &func.defaults;
        out.extend(quote! { .default_args(vec![#(::tether::runtime::default_arg(#defaults)),*]) });
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

fn parse_params(method: &ImplItemFn) -> syn::Result<(Receiver, Vec<(Ident, Type)>)> {
    let mut receiver = Receiver::Static;
    let mut params = Vec::new();
    for arg in &method.sig.inputs {
        match arg {
            FnArg::Receiver(r) => {
                if r.reference.is_none() {
                    return Err(syn::Error::new_spanned(r, "take `&self` or `&mut self`, not `self`"));
                }
                receiver = if r.mutability.is_some() { Receiver::Mut } else { Receiver::Ref };
            }
            FnArg::Typed(pat_type) => {
                let ident = match &*pat_type.pat {
                    Pat::Ident(pi) => pi.ident.clone(),
                    other => {
                        return Err(syn::Error::new_spanned(other, "parameters must be simple identifiers"));
                    }
                };
                if let Type::Reference(r) = &*pat_type.ty {
                    return Err(syn::Error::new_spanned(
                        r,
                        "parameters are passed by value; use an owned type such as `String` or `Array`",
                    ));
                }
                params.push((ident, (*pat_type.ty).clone()));
            }
        }
    }
    if params.len() > 8 {
        return Err(syn::Error::new_spanned(&method.sig, "at most 8 parameters are supported"));
    }
    Ok((receiver, params))
}

fn parse_func(method: &ImplItemFn) -> syn::Result<FuncInfo> {
    let mut name = method.sig.ident.to_string();
    let mut is_override = false;
    let mut defaults = Vec::new();
    if let Some(attr) = attrs::find_attr(&method.attrs, "func") {
        for meta in attrs::metas_of(attr)? {
            match &meta {
                Meta::Path(p) if p.is_ident("Override") => is_override = true,
                Meta::NameValue(nv) if nv.path.is_ident("name") => name = attrs::string_value(&nv.value)?,
                Meta::NameValue(nv) if nv.path.is_ident("defaults") => defaults = attrs::tuple_elems(&nv.value),
                other => return Err(syn::Error::new_spanned(other, "unknown #[func] argument")),
            }
        }
    }
    let (receiver, params) = parse_params(method)?;
    if defaults.len() > params.len() {
        return Err(syn::Error::new_spanned(&method.sig, "more defaults than parameters"));
    }
    Ok(FuncInfo { method_ident: method.sig.ident.clone(), name, receiver, params, is_override, defaults })
}

fn parse_signal(method: &ImplItemFn) -> syn::Result<SignalInfo> {
    let (receiver, params) = parse_params(method)?;
    if receiver != Receiver::Static {
        return Err(syn::Error::new_spanned(&method.sig, "signal declarations take no receiver"));
    }
    if !method.block.stmts.is_empty() {
        return Err(syn::Error::new_spanned(&method.block, "signal declarations have an empty body"));
    }
    Ok(SignalInfo { name: method.sig.ident.to_string(), params })
}

fn parse_constant(constant: &ImplItemConst) -> syn::Result<ConstantInfo> {
    let mut kind = ConstantKind::Plain;
    if let Some(attr) = attrs::find_attr(&constant.attrs, "constant") {
        for meta in attrs::metas_of(attr)? {
            match &meta {
                Meta::NameValue(nv) if nv.path.is_ident("enum_name") => {
                    kind = ConstantKind::Enum(attrs::string_value(&nv.value)?)
                }
                Meta::NameValue(nv) if nv.path.is_ident("bitfield") => {
                    kind = ConstantKind::Bitfield(attrs::string_value(&nv.value)?)
                }
                other => return Err(syn::Error::new_spanned(other, "unknown #[constant] argument")),
            }
        }
    }
    Ok(ConstantInfo { ident: constant.ident.clone(), kind })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expand(item: TokenStream) -> syn::Result<String> {
        expand_hostclass_impl(TokenStream::new(), item).map(|out| out.to_string())
    }

    #[test]
    fn funcs_register_by_receiver() {
        let out = expand(quote! {
            impl Player {
                #[func]
                fn speed(&self) -> f64 { self.speed }
                #[func(defaults = (1))]
                fn heal(&mut self, amount: i64) { self.hp += amount; }
                #[func(name = "make_default")]
                fn create_default() -> i64 { 0 }
                #[func(Override)]
                fn _process(&mut self, delta: f64) {}
                fn helper(&self) {}
            }
        })
        .unwrap();
        assert!(out.contains(". method (\"speed\""));
        assert!(out.contains(". method_mut (\"heal\""));
        assert!(out.contains(". arg_names (& [\"amount\"])"));
        assert!(out.contains("default_arg (1)"));
        assert!(out.contains(". static_method (\"make_default\""));
        assert!(out.contains(". virtual_method (\"_process\""));
        assert!(!out.contains("\"helper\""));
        assert!(!out.contains("# [func"));
    }

    #[test]
    fn signals_are_removed_and_registered() {
        let out = expand(quote! {
            impl Player {
                #[signal]
                fn hit_taken(amount: i64, source: String) {}
            }
        })
        .unwrap();
        assert!(out.contains(". signal :: < (i64 , String ,) > (\"hit_taken\" , & [\"amount\" , \"source\"])"));
        assert!(!out.contains("fn hit_taken"));
    }

    #[test]
    fn constants_keep_their_enum() {
        let out = expand(quote! {
            impl Player {
                #[constant]
                const MAX_HP: i64 = 100;
                #[constant(enum_name = "State")]
                const STATE_IDLE: i64 = 0;
                #[constant(bitfield = "Flags")]
                const FLAG_FAST: i64 = 1;
            }
        })
        .unwrap();
        assert!(out.contains(". constant (\"MAX_HP\""));
        assert!(out.contains(". enum_constant (\"State\" , \"STATE_IDLE\""));
        assert!(out.contains(". bitfield_flag (\"Flags\" , \"FLAG_FAST\""));
    }

    #[test]
    fn borrowed_parameters_are_rejected() {
        let err = expand(quote! {
            impl Player {
                #[func]
                fn greet(&self, name: &str) {}
            }
        })
        .unwrap_err();
        assert!(err.to_string().contains("passed by value"));
    }

    #[test]
    fn static_overrides_are_rejected() {
        assert!(expand(quote! {
            impl Player {
                #[func(Override)]
                fn _ready() {}
            }
        })
        .is_err());
    }
}
