use proc_macro::TokenStream;
use proc_macro2::Span;
use quote::quote;
use syn::parse::{Parse, ParseStream};
use syn::{parse_macro_input, Attribute, Data, DeriveInput, Error, Fields, Ident, Result};

/// `#[derive(Effectful)]`
///
/// Structs take one container attribute: `#[effect(Mutate)]`.
/// Enums take one attribute per variant; a container attribute on an enum
/// is the default for variants without their own.
#[proc_macro_derive(Effectful, attributes(effect))]
pub fn derive_effectful(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match expand_effectful(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand_effectful(input: &DeriveInput) -> Result<proc_macro2::TokenStream> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let body = match &input.data {
        Data::Struct(_) => {
            let attr = find_effect_attr(&input.attrs).ok_or_else(|| {
                Error::new(Span::call_site(), "missing #[effect(...)] attribute")
            })?;
            parse_effect_attr(attr)?
        }
        Data::Enum(data) => {
            let fallback = find_effect_attr(&input.attrs)
                .map(parse_effect_attr)
                .transpose()?;

            let mut arms = Vec::with_capacity(data.variants.len());
            for variant in &data.variants {
                let effect = match find_effect_attr(&variant.attrs) {
                    Some(attr) => parse_effect_attr(attr)?,
                    None => fallback.clone().ok_or_else(|| {
                        Error::new_spanned(
                            &variant.ident,
                            "variant needs #[effect(...)] or the enum needs a default one",
                        )
                    })?,
                };
                let ident = &variant.ident;
                let pattern = match &variant.fields {
                    Fields::Named(_) => quote! { Self::#ident { .. } },
                    Fields::Unnamed(_) => quote! { Self::#ident(..) },
                    Fields::Unit => quote! { Self::#ident },
                };
                arms.push(quote! { #pattern => #effect, });
            }

            if arms.is_empty() {
                return Err(Error::new_spanned(
                    name,
                    "cannot derive Effectful for an enum without variants",
                ));
            }

            quote! {
                match self {
                    #(#arms)*
                }
            }
        }
        Data::Union(_) => {
            return Err(Error::new_spanned(
                name,
                "Effectful cannot be derived for unions",
            ))
        }
    };

    Ok(quote! {
        impl #impl_generics crm_effects::Effectful for #name #ty_generics #where_clause {
            fn effect(&self) -> crm_effects::Effect {
                #body
            }
        }
    })
}

fn find_effect_attr(attrs: &[Attribute]) -> Option<&Attribute> {
    attrs.iter().find(|attr| attr.path().is_ident("effect"))
}

fn parse_effect_attr(attr: &Attribute) -> Result<proc_macro2::TokenStream> {
    let spec = attr.parse_args::<EffectSpec>()?;

    Ok(match spec {
        EffectSpec::Pure => quote! { crm_effects::Effect::Pure },
        EffectSpec::Observe => quote! { crm_effects::Effect::Observe },
        EffectSpec::Mutate => quote! { crm_effects::Effect::Mutate },
        EffectSpec::Irreversible => quote! { crm_effects::Effect::Irreversible },
    })
}

enum EffectSpec {
    Pure,
    Observe,
    Mutate,
    Irreversible,
}

impl Parse for EffectSpec {
    fn parse(input: ParseStream<'_>) -> Result<Self> {
        let effect: Ident = input.parse()?;

        let parsed = match effect.to_string().as_str() {
            "Pure" => Self::Pure,
            "Observe" => Self::Observe,
            "Mutate" => Self::Mutate,
            "Irreversible" => Self::Irreversible,
            other => {
                return Err(Error::new_spanned(
                    effect,
                    format!(
                        "unsupported effect `{other}`; expected Pure, Observe, Mutate, or Irreversible"
                    ),
                ))
            }
        };

        if input.is_empty() {
            Ok(parsed)
        } else {
            Err(input.error("unexpected tokens in #[effect(...)] attribute"))
        }
    }
}
