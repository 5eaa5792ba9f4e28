extern crate proc_macro;

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use std::collections::HashSet;
use syn::{
    parse_macro_input, parse_quote, Attribute, Data, DeriveInput, Fields, GenericParam, Ident,
    LitStr, Path,
};

/// Separator reserved by the type definition format.
const SEPARATOR: char = ';';

/// Container attributes parsed from `#[refpack(...)]` on the struct.
#[derive(Debug, Default)]
struct ContainerAttributes {
    name: Option<LitStr>,
    no_default: bool,
    activator: Option<Path>,
}

/// Field attributes parsed from `#[refpack(...)]` on a field.
#[derive(Debug, Default)]
struct FieldAttributes {
    skip: bool,
    rename: Option<LitStr>,
}

/// Parse container attributes.
///
/// # Supported Attributes
///
/// * `#[refpack(name = "Name")]` - Type name written to the type definition
/// * `#[refpack(no_default)]` - Decoding the type fails with an activation error
/// * `#[refpack(activator = "path::to::fn")]` - Constructor of the empty instance
fn get_container_attributes(attrs: &[Attribute]) -> syn::Result<ContainerAttributes> {
    let mut parsed = ContainerAttributes::default();
    for attr in attrs.iter().filter(|attr| attr.path().is_ident("refpack")) {
        attr.parse_args_with(|input: syn::parse::ParseStream| {
            while !input.is_empty() {
                let ident = input.parse::<Ident>()?;
                if ident == "name" {
                    input.parse::<syn::Token![=]>()?;
                    parsed.name = Some(input.parse::<LitStr>()?);
                } else if ident == "no_default" {
                    parsed.no_default = true;
                } else if ident == "activator" {
                    input.parse::<syn::Token![=]>()?;
                    let lit = input.parse::<LitStr>()?;
                    parsed.activator = Some(lit.parse::<Path>()?);
                } else {
                    return Err(syn::Error::new(
                        ident.span(),
                        format!("Unknown attribute: {}", ident),
                    ));
                }

                // Consume comma if present, otherwise end
                if input.peek(syn::Token![,]) {
                    input.parse::<syn::Token![,]>()?;
                }
            }
            Ok(())
        })?;
    }
    Ok(parsed)
}

/// Parse field attributes.
///
/// # Supported Attributes
///
/// * `#[refpack(skip)]` - Field is neither written nor read
/// * `#[refpack(rename = "name")]` - Property name written to the type definition
fn get_field_attributes(attrs: &[Attribute]) -> syn::Result<FieldAttributes> {
    let mut parsed = FieldAttributes::default();
    for attr in attrs.iter().filter(|attr| attr.path().is_ident("refpack")) {
        attr.parse_args_with(|input: syn::parse::ParseStream| {
            while !input.is_empty() {
                let ident = input.parse::<Ident>()?;
                if ident == "skip" {
                    parsed.skip = true;
                } else if ident == "rename" {
                    input.parse::<syn::Token![=]>()?;
                    parsed.rename = Some(input.parse::<LitStr>()?);
                } else {
                    return Err(syn::Error::new(
                        ident.span(),
                        format!("Unknown attribute: {}", ident),
                    ));
                }

                if input.peek(syn::Token![,]) {
                    input.parse::<syn::Token![,]>()?;
                }
            }
            Ok(())
        })?;
    }
    Ok(parsed)
}

fn check_name(value: &str, span: proc_macro2::Span, what: &str) -> syn::Result<()> {
    if value.is_empty() {
        return Err(syn::Error::new(span, format!("{} must not be empty", what)));
    }
    if value.contains(SEPARATOR) {
        return Err(syn::Error::new(
            span,
            format!("{} must not contain '{}'", what, SEPARATOR),
        ));
    }
    Ok(())
}

/// Derive macro implementing `Encode`, `Decode` and `Composite` for a struct.
///
/// The struct is written as an object: a type definition listing its property names in
/// declaration order, followed by the property values in the same order. On decode, properties
/// are matched by name, so reordered or added properties in the stream are tolerated; unknown
/// properties are skipped and missing ones keep their activated value.
///
/// # Supported Attributes
///
/// * `#[refpack(name = "Name")]` - Type name (defaults to the struct name)
/// * `#[refpack(no_default)]` - The type cannot be activated during decode
/// * `#[refpack(activator = "path")]` - Function returning the empty instance
/// * `#[refpack(skip)]` - Exclude a field
/// * `#[refpack(rename = "name")]` - Property name of a field
///
/// # Examples
///
/// ```rust,ignore
/// #[derive(refpack::Object, Default)]
/// #[refpack(name = "Customer")]
/// struct CustomerRecord {
///     #[refpack(rename = "Name")]
///     name: String,
///     #[refpack(skip)]
///     cached_total: u64,
/// }
/// ```
#[proc_macro_derive(Object, attributes(refpack))]
pub fn derive_object(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_object(input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn expand_object(mut input: DeriveInput) -> syn::Result<TokenStream2> {
    let name = input.ident.clone();
    let container = get_container_attributes(&input.attrs)?;
    let type_name = match &container.name {
        Some(lit) => {
            check_name(&lit.value(), lit.span(), "Type name")?;
            lit.value()
        }
        None => name.to_string(),
    };

    let fields = match &input.data {
        Data::Struct(s) => match &s.fields {
            Fields::Named(fields) => fields.named.iter().collect::<Vec<_>>(),
            Fields::Unit => Vec::new(),
            Fields::Unnamed(_) => {
                return Err(syn::Error::new_spanned(
                    &input.ident,
                    "Object requires named fields; tuple structs have no property names",
                ))
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                &input.ident,
                "Object can only be derived for structs",
            ))
        }
    };

    let mut idents = Vec::new();
    let mut properties = Vec::new();
    let mut seen = HashSet::new();
    for field in fields {
        let attrs = get_field_attributes(&field.attrs)?;
        if attrs.skip {
            continue;
        }
        let ident = field
            .ident
            .clone()
            .ok_or_else(|| syn::Error::new_spanned(field, "Expected a named field"))?;
        let property = match &attrs.rename {
            Some(lit) => {
                check_name(&lit.value(), lit.span(), "Property name")?;
                lit.value()
            }
            None => ident.to_string(),
        };
        if !seen.insert(property.clone()) {
            return Err(syn::Error::new_spanned(
                field,
                format!(
                    "Property name '{}' is duplicated for struct '{}'. Use #[refpack(rename = ...)] to choose another.",
                    property, name
                ),
            ));
        }
        idents.push(ident);
        properties.push(property);
    }
    let count = properties.len();

    let uses_default = !container.no_default && container.activator.is_none();
    let activate = if container.no_default {
        quote! {
            Err(refpack::ActivationError::new(#type_name, "type has no activator").into())
        }
    } else if let Some(path) = &container.activator {
        quote! { Ok(#path()) }
    } else {
        quote! { Ok(<Self as ::core::default::Default>::default()) }
    };

    let mut has_type_params = false;
    for param in input.generics.params.iter_mut() {
        if let GenericParam::Type(ty) = param {
            ty.bounds.push(parse_quote!(refpack::Encode));
            ty.bounds.push(parse_quote!(refpack::Decode));
            ty.bounds.push(parse_quote!('static));
            has_type_params = true;
        }
    }
    // A derived Default on a generic struct only holds when its parameters are Default too.
    if uses_default && has_type_params {
        input
            .generics
            .make_where_clause()
            .predicates
            .push(parse_quote!(Self: ::core::default::Default));
    }
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics refpack::Encode for #name #ty_generics #where_clause {
            fn encode(&self, cx: &mut refpack::EncodeContext<'_>) -> refpack::Result<()> {
                cx.write_composite(self)
            }

            fn type_name() -> ::std::borrow::Cow<'static, str> {
                ::std::borrow::Cow::Borrowed(#type_name)
            }
        }

        impl #impl_generics refpack::Decode for #name #ty_generics #where_clause {
            fn decode(cx: &mut refpack::DecodeContext<'_>) -> refpack::Result<Self> {
                cx.read_composite()
            }
        }

        impl #impl_generics refpack::Composite for #name #ty_generics #where_clause {
            const SHAPE: refpack::Shape = refpack::Shape::Object;

            fn property_names() -> ::std::vec::Vec<::std::borrow::Cow<'static, str>> {
                ::std::vec![#(::std::borrow::Cow::Borrowed(#properties)),*]
            }

            fn encode_body(&self, cx: &mut refpack::EncodeContext<'_>) -> refpack::Result<()> {
                cx.begin_properties(#count)?;
                #(refpack::Encode::encode(&self.#idents, cx)?;)*
                Ok(())
            }

            fn activate() -> refpack::Result<Self> {
                #activate
            }

            fn decode_body(
                &mut self,
                cx: &mut refpack::DecodeContext<'_>,
                definition: &refpack::TypeDefinition,
            ) -> refpack::Result<()> {
                cx.read_properties_start(definition)?;
                for property in definition.properties() {
                    match property.as_str() {
                        #(#properties => {
                            self.#idents = refpack::Decode::decode(cx)?;
                        })*
                        _ => cx.skip_value()?,
                    }
                }
                Ok(())
            }
        }
    })
}
