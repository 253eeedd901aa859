// Shared attribute parsing for #[hostclass] and #[hostclass_impl].

use proc_macro2::{Span, TokenStream};
use syn::punctuated::Punctuated;
use syn::{Attribute, Expr, Lit, Meta, Token};

/// Parse the comma-separated metas of an attribute argument list. An empty
/// list (or a bare `#[attr]`) yields no metas.
pub(crate) fn metas_of_tokens(tokens: TokenStream) -> syn::Result<Punctuated<Meta, Token![,]>> {
    if tokens.is_empty() {
        return Ok(Punctuated::new());
    }
    syn::parse::Parser::parse2(Punctuated::<Meta, Token![,]>::parse_terminated, tokens)
}

pub(crate) fn metas_of(attr: &Attribute) -> syn::Result<Punctuated<Meta, Token![,]>> {
    match &attr.meta {
        Meta::Path(_) => Ok(Punctuated::new()),
        _ => attr.parse_args_with(Punctuated::<Meta, Token![,]>::parse_terminated),
    }
}

pub(crate) fn find_attr<'a>(attrs: &'a [Attribute], name: &str) -> Option<&'a Attribute> {
    attrs.iter().find(|a| a.path().is_ident(name))
}

/// `name = "literal"` as a string.
pub(crate) fn string_value(expr: &Expr) -> syn::Result<String> {
    match expr {
        Expr::Lit(syn::ExprLit { lit: Lit::Str(s), .. }) => Ok(s.value()),
        _ => Err(syn::Error::new_spanned(expr, "expected a string literal")),
    }
}

/// `name = ident` as an identifier.
pub(crate) fn ident_value(expr: &Expr) -> syn::Result<syn::Ident> {
    match expr {
        Expr::Path(p) => p
            .path
            .get_ident()
            .cloned()
            .ok_or_else(|| syn::Error::new_spanned(expr, "expected a plain identifier")),
        _ => Err(syn::Error::new_spanned(expr, "expected an identifier")),
    }
}

/// Elements of `(a, b)` or a single parenthesized `(a)`.
pub(crate) fn tuple_elems(expr: &Expr) -> Vec<Expr> {
    match expr {
        Expr::Tuple(t) => t.elems.iter().cloned().collect(),
        Expr::Paren(p) => vec![(*p.expr).clone()],
        other => vec![other.clone()],
    }
}

pub(crate) fn error(message: &str) -> syn::Error {
    syn::Error::new(Span::call_site(), message)
}

/// The last path segment of a type, e.g. `Node` for `tether::bindings::Node`.
pub(crate) fn type_name(ty: &syn::Type) -> Option<String> {
    match ty {
        syn::Type::Path(tp) => tp.path.segments.last().map(|s| s.ident.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quote::quote;

    #[test]
    fn empty_argument_lists_parse_to_nothing() {
        assert!(metas_of_tokens(TokenStream::new()).unwrap().is_empty());
        let metas = metas_of_tokens(quote! { parent = Node, Abstract }).unwrap();
        assert_eq!(metas.len(), 2);
    }

    #[test]
    fn tuple_elements_accept_single_values() {
        let single: Expr = syn::parse_quote! { (1) };
        let pair: Expr = syn::parse_quote! { (1, "a") };
        assert_eq!(tuple_elems(&single).len(), 1);
        assert_eq!(tuple_elems(&pair).len(), 2);
    }

    #[test]
    fn type_names_use_the_last_segment() {
        let ty: syn::Type = syn::parse_quote! { tether::bindings::Node };
        assert_eq!(type_name(&ty).as_deref(), Some("Node"));
    }
}
