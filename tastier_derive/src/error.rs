//! Derive macro for error types.
//!
//! Generates `std::fmt::Display` and `std::error::Error` for an enum whose
//! variants carry `#[error("...")]` attributes, in the manner of the
//! `thiserror` crate. Messages interpolate fields by name (`{field}`) or, for
//! tuple variants, by position (`{0}`); fields a message does not mention are
//! simply not bound.

use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{Data, DeriveInput, Fields, LitStr, parse_macro_input};

pub fn derive_error(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let Data::Enum(data) = &input.data else {
        return Err(syn::Error::new_spanned(
            input,
            "Error can only be derived for enums",
        ));
    };

    let name = &input.ident;
    let arms = data
        .variants
        .iter()
        .map(display_arm)
        .collect::<syn::Result<Vec<_>>>()?;

    Ok(quote! {
        impl ::std::fmt::Display for #name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                match self {
                    #(#arms)*
                }
            }
        }

        impl ::std::error::Error for #name {}
    })
}

/// Builds the `Display` match arm for one variant.
fn display_arm(variant: &syn::Variant) -> syn::Result<proc_macro2::TokenStream> {
    let ident = &variant.ident;
    let message = message_for(variant)?;

    Ok(match &variant.fields {
        Fields::Unit => quote! {
            Self::#ident => write!(f, #message),
        },
        Fields::Named(fields) => {
            let used: Vec<_> = fields
                .named
                .iter()
                .filter_map(|field| field.ident.as_ref())
                .filter(|ident| interpolates(&message, &ident.to_string()))
                .collect();
            if used.is_empty() {
                quote! {
                    Self::#ident { .. } => write!(f, #message),
                }
            } else {
                quote! {
                    Self::#ident { #(#used,)* .. } =>
                        write!(f, #message #(, #used = #used)*),
                }
            }
        }
        Fields::Unnamed(fields) => {
            let message = positional_to_named(&message, fields.unnamed.len());
            let bindings: Vec<_> = (0..fields.unnamed.len())
                .map(|i| {
                    let binding = format_ident!("f{i}");
                    if interpolates(&message, &binding.to_string()) {
                        Some(binding)
                    } else {
                        None
                    }
                })
                .collect();
            let patterns = bindings.iter().map(|binding| match binding {
                Some(ident) => quote!(#ident),
                None => quote!(_),
            });
            let used: Vec<_> = bindings.iter().flatten().collect();
            quote! {
                Self::#ident(#(#patterns),*) =>
                    write!(f, #message #(, #used = #used)*),
            }
        }
    })
}

/// Reads the message out of a variant's `#[error("...")]` attribute.
fn message_for(variant: &syn::Variant) -> syn::Result<String> {
    for attr in &variant.attrs {
        if attr.path().is_ident("error") {
            let lit: LitStr = attr.parse_args().map_err(|_| {
                syn::Error::new_spanned(
                    attr,
                    "expected a string literal, as in #[error(\"bad value: {0}\")]",
                )
            })?;
            return Ok(lit.value());
        }
    }
    Err(syn::Error::new_spanned(
        variant,
        format!(
            "variant `{}` is missing its #[error(\"...\")] attribute",
            variant.ident
        ),
    ))
}

/// True if the format string mentions `{name}` (with or without a format spec).
fn interpolates(message: &str, name: &str) -> bool {
    message.contains(&format!("{{{name}}}")) || message.contains(&format!("{{{name}:"))
}

/// Rewrites `{0}`-style placeholders to the `{f0}` bindings used in match arms.
fn positional_to_named(message: &str, fields: usize) -> String {
    let mut out = message.to_string();
    for i in (0..fields).rev() {
        out = out.replace(&format!("{{{i}}}"), &format!("{{f{i}}}"));
        out = out.replace(&format!("{{{i}:"), &format!("{{f{i}:"));
    }
    out
}
