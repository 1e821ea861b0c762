//! Derive macro for the binary serialization traits.
//!
//! Generates `Encode` and `Decode` (from the main crate's `encoding` module)
//! for structs and enums. Fields are written in declaration order. Enum
//! variants are tagged with a `u8` discriminant; explicit discriminant values
//! are respected and later variants count up from the last explicit one.

use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{Data, DeriveInput, Fields, parse_macro_input};

pub fn derive_binary_codec(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;

    let (encode_body, decode_body) = match &input.data {
        Data::Struct(data) => {
            let encode = match &data.fields {
                Fields::Named(fields) => {
                    let names: Vec<_> = fields.named.iter().map(|f| &f.ident).collect();
                    quote! { #( crate::encoding::Encode::encode(&self.#names, out); )* }
                }
                Fields::Unnamed(fields) => {
                    let indices: Vec<_> =
                        (0..fields.unnamed.len()).map(syn::Index::from).collect();
                    quote! { #( crate::encoding::Encode::encode(&self.#indices, out); )* }
                }
                Fields::Unit => quote! {},
            };
            let construct = construct_fields(&data.fields, quote!(Self));
            (encode, quote! { Ok(#construct) })
        }
        Data::Enum(data) => {
            let tags = discriminants(data)?;

            let encode_arms =
                data.variants.iter().zip(&tags).map(|(variant, tag)| {
                    let ident = &variant.ident;
                    let (pattern, bindings) = bind_fields(&variant.fields);
                    quote! {
                        Self::#ident #pattern => {
                            crate::encoding::Encode::encode(&#tag, out);
                            #( crate::encoding::Encode::encode(#bindings, out); )*
                        }
                    }
                });

            let decode_arms = data.variants.iter().zip(&tags).map(|(variant, tag)| {
                let ident = &variant.ident;
                let construct = construct_fields(&variant.fields, quote!(Self::#ident));
                quote! { #tag => Ok(#construct), }
            });

            (
                quote! {
                    match self {
                        #(#encode_arms)*
                    }
                },
                quote! {
                    let tag: u8 = crate::encoding::Decode::decode(input)?;
                    match tag {
                        #(#decode_arms)*
                        _ => Err(crate::encoding::DecodeError::InvalidValue),
                    }
                },
            )
        }
        Data::Union(_) => {
            return Err(syn::Error::new_spanned(
                input,
                "BinaryCodec does not support unions",
            ));
        }
    };

    Ok(quote! {
        impl crate::encoding::Encode for #name {
            fn encode<S: crate::encoding::EncodeSink>(&self, out: &mut S) {
                #encode_body
            }
        }

        impl crate::encoding::Decode for #name {
            fn decode(
                input: &mut &[u8],
            ) -> ::std::result::Result<Self, crate::encoding::DecodeError> {
                #decode_body
            }
        }
    })
}

/// Builds a constructor expression decoding every field in order.
fn construct_fields(fields: &Fields, path: proc_macro2::TokenStream) -> proc_macro2::TokenStream {
    match fields {
        Fields::Named(fields) => {
            let names: Vec<_> = fields.named.iter().map(|f| &f.ident).collect();
            quote! { #path { #( #names: crate::encoding::Decode::decode(input)?, )* } }
        }
        Fields::Unnamed(fields) => {
            let decoders = (0..fields.unnamed.len())
                .map(|_| quote! { crate::encoding::Decode::decode(input)?, });
            quote! { #path( #(#decoders)* ) }
        }
        Fields::Unit => path,
    }
}

/// Builds a destructuring pattern and the list of bound field references.
fn bind_fields(fields: &Fields) -> (proc_macro2::TokenStream, Vec<proc_macro2::TokenStream>) {
    match fields {
        Fields::Named(fields) => {
            let names: Vec<_> = fields.named.iter().map(|f| &f.ident).collect();
            let bindings = names.iter().map(|name| quote!(#name)).collect();
            (quote! { { #(#names),* } }, bindings)
        }
        Fields::Unnamed(fields) => {
            let names: Vec<_> = (0..fields.unnamed.len())
                .map(|i| format_ident!("f{i}"))
                .collect();
            let bindings = names.iter().map(|name| quote!(#name)).collect();
            (quote! { ( #(#names),* ) }, bindings)
        }
        Fields::Unit => (quote! {}, Vec::new()),
    }
}

/// Computes the `u8` tag for each variant, following Rust's discriminant
/// rules: explicit values are used as-is, everything else counts up from the
/// previous variant.
fn discriminants(data: &syn::DataEnum) -> syn::Result<Vec<u8>> {
    let mut tags = Vec::with_capacity(data.variants.len());
    let mut next: u8 = 0;
    for variant in &data.variants {
        let tag = match &variant.discriminant {
            Some((_, syn::Expr::Lit(lit))) => match &lit.lit {
                syn::Lit::Int(int) => int.base10_parse::<u8>()?,
                other => {
                    return Err(syn::Error::new_spanned(
                        other,
                        "discriminant must be an integer literal",
                    ));
                }
            },
            Some((_, other)) => {
                return Err(syn::Error::new_spanned(
                    other,
                    "discriminant must be an integer literal",
                ));
            }
            None => next,
        };
        tags.push(tag);
        next = tag.wrapping_add(1);
    }
    Ok(tags)
}
