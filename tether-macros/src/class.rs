// #[hostclass] expansion: turns a struct into a registered engine class.
//
// Emits the `EngineClass`/`HasParent`/`HostClass` impls, registers exported
// fields as properties with generated accessor methods, and submits the
// class to the runtime's inventory so `register_all_from_inventory` finds it.

use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use syn::{parse2, Expr, Fields, Ident, ItemStruct, Meta, Type};

use crate::attrs;

// ---------------------------------------------------------------------------
// Attribute parsing
// ---------------------------------------------------------------------------

struct ClassArgs {
    parent: syn::Path,
    name: Option<String>,
    is_abstract: bool,
    is_virtual: bool,
    hidden: bool,
    to_string: Option<Ident>,
    notification: Option<Ident>,
}

fn parse_class_args(attr: TokenStream) -> syn::Result<ClassArgs> {
    let mut parent = None;
    let mut args = ClassArgs {
        parent: syn::parse_quote!(Object),
        name: None,
        is_abstract: false,
        is_virtual: false,
        hidden: false,
        to_string: None,
        notification: None,
    };
    for meta in attrs::metas_of_tokens(attr)? {
        match &meta {
            Meta::NameValue(nv) if nv.path.is_ident("parent") => match &nv.value {
                Expr::Path(p) => parent = Some(p.path.clone()),
                other => {
                    return Err(syn::Error::new_spanned(
                        other,
                        "`parent` must be a type path, not a string literal.\n\n\
                         Example: #[hostclass(parent = Node)]",
                    ));
                }
            },
            Meta::NameValue(nv) if nv.path.is_ident("name") => args.name = Some(attrs::string_value(&nv.value)?),
            Meta::NameValue(nv) if nv.path.is_ident("to_string") => {
                args.to_string = Some(attrs::ident_value(&nv.value)?)
            }
            Meta::NameValue(nv) if nv.path.is_ident("notification") => {
                args.notification = Some(attrs::ident_value(&nv.value)?)
            }
            Meta::Path(p) if p.is_ident("Abstract") => args.is_abstract = true,
            Meta::Path(p) if p.is_ident("Virtual") => args.is_virtual = true,
            Meta::Path(p) if p.is_ident("Hidden") => args.hidden = true,
            other => return Err(syn::Error::new_spanned(other, "unknown #[hostclass] argument")),
        }
    }
    args.parent = parent.ok_or_else(|| {
        attrs::error(
            "#[hostclass] requires a `parent` naming the class being extended.\n\n\
             Example:\n\
             \x20   #[hostclass(parent = Node)]\n\
             \x20   pub struct Player { ... }",
        )
    })?;
    Ok(args)
}

/// Options of #[export(...)].
#[derive(Default)]
struct ExportArgs {
    read_only: bool,
    default: Option<Expr>,
    hint: Option<Ident>,
    hint_string: String,
    group: Option<String>,
}

fn parse_export_args(attr: &syn::Attribute) -> syn::Result<ExportArgs> {
    let mut args = ExportArgs::default();
    for meta in attrs::metas_of(attr)? {
        match &meta {
            Meta::Path(p) if p.is_ident("read_only") => args.read_only = true,
            Meta::NameValue(nv) if nv.path.is_ident("default") => args.default = Some(nv.value.clone()),
            Meta::NameValue(nv) if nv.path.is_ident("hint") => args.hint = Some(attrs::ident_value(&nv.value)?),
            Meta::NameValue(nv) if nv.path.is_ident("hint_string") => {
                args.hint_string = attrs::string_value(&nv.value)?
            }
            Meta::NameValue(nv) if nv.path.is_ident("group") => args.group = Some(attrs::string_value(&nv.value)?),
            other => return Err(syn::Error::new_spanned(other, "unknown #[export] argument")),
        }
    }
    Ok(args)
}

/// `#[init(default = expr)]` on a plain field.
fn parse_init_default(attr: &syn::Attribute) -> syn::Result<Expr> {
    for meta in attrs::metas_of(attr)? {
        if let Meta::NameValue(nv) = &meta {
            if nv.path.is_ident("default") {
                return Ok(nv.value.clone());
            }
        }
    }
    Err(syn::Error::new_spanned(attr, "expected #[init(default = ...)]"))
}

// ---------------------------------------------------------------------------
// Field classification
// ---------------------------------------------------------------------------

enum FieldKind {
    Base,
    Export(ExportArgs),
    Plain(Option<Expr>),
}

struct ClassField {
    ident: Ident,
    ty: Type,
    kind: FieldKind,
}

const FIELD_ATTRS: [&str; 3] = ["base", "export", "init"];

fn classify(input: &mut ItemStruct) -> syn::Result<Vec<ClassField>> {
    let named = match &mut input.fields {
        Fields::Named(named) => &mut named.named,
        Fields::Unit => return Ok(Vec::new()),
        Fields::Unnamed(_) => {
            return Err(syn::Error::new_spanned(
                &input.ident,
                "#[hostclass] requires a struct with named fields (or a unit struct).\n\n\
                 Example:\n\
                 \x20   #[hostclass(parent = Node)]\n\
                 \x20   pub struct Player {\n\
                 \x20       #[base]\n\
                 \x20       base: ObjRef<Player>,\n\
                 \x20       #[export]\n\
                 \x20       speed: f64,\n\
                 \x20   }",
            ));
        }
    };

    let mut fields = Vec::new();
    let mut has_base = false;
    for field in named.iter_mut() {
        let Some(ident) = field.ident.clone() else { continue };
        let kind = if attrs::find_attr(&field.attrs, "base").is_some() {
            if has_base {
                return Err(syn::Error::new_spanned(&ident, "only one field can be marked #[base]"));
            }
            has_base = true;
            FieldKind::Base
        } else if let Some(attr) = attrs::find_attr(&field.attrs, "export") {
            FieldKind::Export(parse_export_args(attr)?)
        } else if let Some(attr) = attrs::find_attr(&field.attrs, "init") {
            FieldKind::Plain(Some(parse_init_default(attr)?))
        } else {
            FieldKind::Plain(None)
        };
        field.attrs.retain(|a| !FIELD_ATTRS.iter().any(|name| a.path().is_ident(name)));
        fields.push(ClassField { ident, ty: field.ty.clone(), kind });
    }
    Ok(fields)
}

// ---------------------------------------------------------------------------
// Code generation
// ---------------------------------------------------------------------------

pub fn expand_hostclass(attr: TokenStream, item: TokenStream) -> syn::Result<TokenStream> {
    let args = parse_class_args(attr)?;
    let mut input: ItemStruct = parse2(item)?;
    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(&input.generics, "#[hostclass] structs cannot be generic"));
    }

    let is_unit = matches!(input.fields, Fields::Unit);
    let fields = classify(&mut input)?;
    let struct_name = input.ident.clone();
    let class_name = args.name.clone().unwrap_or_else(|| struct_name.to_string());
    let parent = &args.parent;

    // --- 1. create() ---
    let base_field = fields.iter().find(|f| matches!(f.kind, FieldKind::Base));
    let base_param = if base_field.is_some() { format_ident!("base") } else { format_ident!("_base") };
    let field_inits: Vec<TokenStream> = fields
        .iter()
        .map(|f| {
            let ident = &f.ident;
            match &f.kind {
                FieldKind::Base => quote! { #ident: base, },
                FieldKind::Export(ExportArgs { default: Some(expr), .. }) | FieldKind::Plain(Some(expr)) => {
                    quote! { #ident: #expr, }
                }
                _ => quote! { #ident: ::std::default::Default::default(), },
            }
        })
        .collect();
    let construct = if is_unit {
        quote! { #struct_name }
    } else {
        quote! { #struct_name { #(#field_inits)* } }
    };

    // --- 2. instance hooks ---
    let to_text = args.to_string.as_ref().map(|f| {
        quote! {
            fn to_text(&self) -> ::std::option::Option<::std::string::String> {
                ::std::option::Option::Some(#struct_name::#f(self))
            }
        }
    });
    let on_notification = args.notification.as_ref().map(|f| {
        quote! {
            fn on_notification(&mut self, what: i32) {
                #struct_name::#f(self, what)
            }
        }
    });

    // --- 3. class flags and exported properties ---
    let mut describe_chain: Vec<TokenStream> = Vec::new();
    if args.is_abstract {
        describe_chain.push(quote! { .abstract_class() });
    }
    if args.is_virtual {
        describe_chain.push(quote! { .virtual_class() });
    }
    if args.hidden {
        describe_chain.push(quote! { .hidden() });
    }

    let mut current_group: Option<String> = None;
    for field in &fields {
        let FieldKind::Export(export) = &field.kind else { continue };
        let ident = &field.ident;
        let ty = &field.ty;
        let name = ident.to_string();
        let getter = format!("get_{name}");

        if export.group != current_group {
            if let Some(group) = &export.group {
                describe_chain.push(quote! { .group(#group, "") });
            }
            current_group = export.group.clone();
        }

        describe_chain.push(quote! {
            .method(#getter, |this: &Self, (): ()| ::std::clone::Clone::clone(&this.#ident))
        });
        let setter = if export.read_only {
            String::new()
        } else {
            let setter = format!("set_{name}");
            describe_chain.push(quote! {
                .method_mut(#setter, |this: &mut Self, (value,): (#ty,)| this.#ident = value)
                .arg_names(&["value"])
            });
            setter
        };
        describe_chain.push(quote! { .property::<#ty>(#name, #setter, #getter) });
        if let Some(hint) = &export.hint {
            let hint_string = &export.hint_string;
            describe_chain.push(quote! { .hint(::tether::ffi::#hint, #hint_string) });
        }
    }

    // --- 4. deref to the parent reference ---
    let deref_impl = base_field.map(|base| {
        let ident = &base.ident;
        quote! {
            impl ::std::ops::Deref for #struct_name {
                type Target = ::tether::runtime::ObjRef<#parent>;

                fn deref(&self) -> &::tether::runtime::ObjRef<#parent> {
                    ::std::ops::Deref::deref(&self.#ident)
                }
            }
        }
    });

    Ok(quote! {
        #input

        impl ::tether::runtime::EngineClass for #struct_name {
            const CLASS_NAME: &'static str = #class_name;
        }

        impl ::tether::runtime::HasParent for #struct_name {
            type Parent = #parent;
        }

        impl ::tether::runtime::HostClass for #struct_name {
            fn create(#base_param: ::tether::runtime::ObjRef<Self>) -> Self {
                #construct
            }

            #to_text
            #on_notification

            fn describe(
                class: ::tether::runtime::ClassBuilder<Self>,
            ) -> ::tether::runtime::ClassBuilder<Self> {
                class #(#describe_chain)*
            }
        }

        #deref_impl

        const _: () = {
            fn describe() -> ::tether::runtime::ClassDescriptor {
                ::tether::runtime::ClassBuilder::<#struct_name>::described().build()
            }

            ::tether::__inventory::submit! {
                ::tether::runtime::ClassRegistration { name: #class_name, describe }
            }
        };
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expand(attr: TokenStream, item: TokenStream) -> String {
        expand_hostclass(attr, item).unwrap().to_string()
    }

    #[test]
    fn parent_is_required() {
        let err = expand_hostclass(quote! {}, quote! { struct Player; }).unwrap_err();
        assert!(err.to_string().contains("requires a `parent`"));
    }

    #[test]
    fn exported_fields_get_accessors_and_a_property() {
        let out = expand(
            quote! { parent = Node },
            quote! {
                pub struct Player {
                    #[base]
                    base: ObjRef<Player>,
                    #[export(default = 5.0, hint = PROPERTY_HINT_RANGE, hint_string = "0,10")]
                    speed: f64,
                    #[export(read_only)]
                    score: i64,
                    cooldown: f64,
                }
            },
        );
        assert!(out.contains("\"get_speed\""));
        assert!(out.contains("\"set_speed\""));
        assert!(out.contains("\"get_score\""));
        assert!(!out.contains("\"set_score\""));
        assert!(out.contains("PROPERTY_HINT_RANGE"));
        assert!(out.contains("speed : 5.0"));
        assert!(out.contains("cooldown : :: std :: default :: Default :: default ()"));
        assert!(!out.contains("# [export"));
        assert!(out.contains("impl :: std :: ops :: Deref for Player"));
    }

    #[test]
    fn unit_structs_need_no_base() {
        let out = expand(quote! { parent = RefCounted, name = "Marker", Abstract }, quote! { struct Marker; });
        assert!(out.contains("_base"));
        assert!(out.contains(". abstract_class ()"));
        assert!(out.contains("name : \"Marker\""));
        assert!(!out.contains("Deref"));
    }

    #[test]
    fn tuple_structs_are_rejected() {
        assert!(expand_hostclass(quote! { parent = Node }, quote! { struct Pair(i64, i64); }).is_err());
    }

    #[test]
    fn two_base_fields_are_rejected() {
        let err = expand_hostclass(
            quote! { parent = Node },
            quote! { struct Twice { #[base] a: ObjRef<Twice>, #[base] b: ObjRef<Twice> } },
        )
        .unwrap_err();
        assert!(err.to_string().contains("only one field"));
    }
}
