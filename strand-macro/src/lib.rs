//! Procedural macros for the strand function invoker.
//!
//! This crate provides the `#[strand_function]` attribute, which exports a
//! plain Rust function from a plugin library so the invoker can load it.
//!
//! # Example
//!
//! ```ignore
//! use strand::strand_function;
//!
//! #[strand_function]
//! fn string_in_string_out(name: String) -> Result<String, strand::FunctionError> {
//!     Ok(format!("Hello {}", name))
//! }
//! // exported as `StringInStringOut`
//! ```

use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{
    parse_macro_input, punctuated::Punctuated, Expr, ExprLit, FnArg, GenericArgument, ItemFn,
    Lit, Meta, PathArguments, ReturnType, Token, Type,
};

/// Attributes for the `#[strand_function]` macro.
#[derive(Default, Debug)]
struct StrandFunctionAttrs {
    /// Exported symbol name.
    name: Option<String>,
}

impl StrandFunctionAttrs {
    fn parse_meta_list(metas: Punctuated<Meta, Token![,]>) -> syn::Result<Self> {
        let mut attrs = StrandFunctionAttrs::default();

        for meta in metas {
            match meta {
                Meta::NameValue(nv) => {
                    let ident = nv
                        .path
                        .get_ident()
                        .ok_or_else(|| syn::Error::new_spanned(&nv.path, "expected identifier"))?
                        .to_string();

                    let lit = match &nv.value {
                        Expr::Lit(ExprLit { lit, .. }) => lit.clone(),
                        _ => return Err(syn::Error::new_spanned(&nv.value, "expected literal")),
                    };

                    match (ident.as_str(), lit) {
                        ("name", Lit::Str(lit_str)) => attrs.name = Some(lit_str.value()),
                        ("name", other) => {
                            return Err(syn::Error::new_spanned(other, "expected a string"))
                        }
                        _ => {
                            return Err(syn::Error::new_spanned(
                                nv.path,
                                format!("unknown attribute: {}", ident),
                            ));
                        }
                    }
                }
                _ => {
                    return Err(syn::Error::new_spanned(meta, "expected name = value"));
                }
            }
        }

        Ok(attrs)
    }
}

/// Export a function as a strand handler.
///
/// The function keeps its name and body. Alongside it, the macro emits a
/// `#[no_mangle]` factory `fn() -> strand::Handler` named after the
/// PascalCase form of the function name, or after `name = "..."`.
///
/// The calling convention is read from the signature:
///
/// - `fn(Receiver<X>) -> Receiver<Y>`
/// - `fn(Receiver<X>) -> (Receiver<Y>, ErrorReceiver)`
/// - `fn(X) -> Y`, `fn(X) -> Result<Y, E>`, `fn(X)`, `fn(X) -> Result<(), E>`
/// - `fn() -> Y`, `fn() -> Result<Y, E>`, `fn()`, `fn() -> Result<(), E>`
///
/// Any other shape is a compile error.
#[proc_macro_attribute]
pub fn strand_function(args: TokenStream, input: TokenStream) -> TokenStream {
    let args = parse_macro_input!(args with Punctuated::<Meta, Token![,]>::parse_terminated);
    let input_fn = parse_macro_input!(input as ItemFn);

    match generate_strand_function(args, input_fn) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn generate_strand_function(
    args: Punctuated<Meta, Token![,]>,
    input_fn: ItemFn,
) -> syn::Result<proc_macro2::TokenStream> {
    let attrs = StrandFunctionAttrs::parse_meta_list(args)?;
    let sig = &input_fn.sig;

    if let Some(asyncness) = &sig.asyncness {
        return Err(syn::Error::new_spanned(
            asyncness,
            "strand_function cannot be async, use a Receiver for streaming",
        ));
    }
    if !sig.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &sig.generics,
            "strand_function cannot be generic",
        ));
    }

    let fn_name = &sig.ident;
    let export = attrs
        .name
        .unwrap_or_else(|| to_pascal_case(&fn_name.to_string()));
    if export == fn_name.to_string() {
        return Err(syn::Error::new_spanned(
            fn_name,
            "exported name must differ from the function name, rename the function or set name = \"...\"",
        ));
    }
    let export_ident = format_ident!("{}", export);
    let constructor = format_ident!("{}", classify(sig)?);

    Ok(quote! {
        #input_fn

        /// Exported strand handler factory.
        #[no_mangle]
        #[allow(non_snake_case)]
        pub fn #export_ident() -> ::strand::Handler {
            ::strand::Handler::#constructor(#fn_name).named(#export)
        }
    })
}

/// Pick the `Handler` constructor matching the signature.
fn classify(sig: &syn::Signature) -> syn::Result<&'static str> {
    let mut params = Vec::new();
    for input in &sig.inputs {
        match input {
            FnArg::Typed(pat) => params.push(&*pat.ty),
            FnArg::Receiver(recv) => {
                return Err(syn::Error::new_spanned(recv, "strand_function cannot take self"))
            }
        }
    }
    if params.len() > 1 {
        return Err(syn::Error::new_spanned(
            &sig.inputs,
            "strand_function takes at most one argument",
        ));
    }

    let output = match &sig.output {
        ReturnType::Default => None,
        ReturnType::Type(_, ty) if is_unit(ty) => None,
        ReturnType::Type(_, ty) => Some(&**ty),
    };

    if let Some(param) = params.first() {
        if last_segment_is(param, "Receiver") {
            return match output {
                Some(ty) if last_segment_is(ty, "Receiver") => Ok("streaming"),
                Some(Type::Tuple(tuple))
                    if tuple.elems.len() == 2
                        && last_segment_is(&tuple.elems[0], "Receiver")
                        && last_segment_is(&tuple.elems[1], "ErrorReceiver") =>
                {
                    Ok("streaming_with_errors")
                }
                _ => Err(syn::Error::new_spanned(
                    &sig.output,
                    "a streaming function must return Receiver<Y> or (Receiver<Y>, ErrorReceiver)",
                )),
            };
        }
    }

    if let Some(ty) = output {
        if last_segment_is(ty, "Receiver") || last_segment_is(ty, "ErrorReceiver") {
            return Err(syn::Error::new_spanned(
                ty,
                "a function returning a stream must take a Receiver",
            ));
        }
    }

    let takes_input = !params.is_empty();
    let constructor = match (takes_input, output) {
        (true, None) => "consumer",
        (false, None) => "runnable",
        (true, Some(ty)) => match result_value(ty) {
            Some(value) if is_unit(value) => "try_consumer",
            Some(_) => "try_mapper",
            None => "mapper",
        },
        (false, Some(ty)) => match result_value(ty) {
            Some(value) if is_unit(value) => "try_runnable",
            Some(_) => "try_supplier",
            None => "supplier",
        },
    };
    Ok(constructor)
}

fn is_unit(ty: &Type) -> bool {
    matches!(ty, Type::Tuple(tuple) if tuple.elems.is_empty())
}

fn last_segment_is(ty: &Type, name: &str) -> bool {
    match ty {
        Type::Path(path) => path
            .path
            .segments
            .last()
            .map(|segment| segment.ident == name)
            .unwrap_or(false),
        _ => false,
    }
}

/// The `T` of a `Result<T, ..>` return type.
fn result_value(ty: &Type) -> Option<&Type> {
    let Type::Path(path) = ty else {
        return None;
    };
    let segment = path.path.segments.last()?;
    if segment.ident != "Result" {
        return None;
    }
    match &segment.arguments {
        PathArguments::AngleBracketed(args) => args.args.iter().find_map(|arg| match arg {
            GenericArgument::Type(ty) => Some(ty),
            _ => None,
        }),
        _ => None,
    }
}

/// Convert a snake_case string to PascalCase.
fn to_pascal_case(s: &str) -> String {
    s.split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                None => String::new(),
                Some(first) => first.to_uppercase().chain(chars).collect(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constructor(item: &str) -> syn::Result<&'static str> {
        let item: ItemFn = syn::parse_str(item).unwrap();
        classify(&item.sig)
    }

    #[test]
    fn test_to_pascal_case() {
        assert_eq!(to_pascal_case("string_in_string_out"), "StringInStringOut");
        assert_eq!(to_pascal_case("direct1"), "Direct1");
        assert_eq!(to_pascal_case("direct_8e"), "Direct8e");
    }

    #[test]
    fn test_classify_all_shapes() {
        let cases = [
            ("fn f(rx: Receiver<String>) -> Receiver<u32> {}", "streaming"),
            (
                "fn f(rx: strand::Receiver<String>) -> (Receiver<u32>, strand::ErrorReceiver) {}",
                "streaming_with_errors",
            ),
            ("fn f(x: String) -> String {}", "mapper"),
            ("fn f(x: String) -> Result<String, FunctionError> {}", "try_mapper"),
            ("fn f(x: String) {}", "consumer"),
            ("fn f(x: String) -> () {}", "consumer"),
            ("fn f(x: String) -> Result<(), String> {}", "try_consumer"),
            ("fn f() -> u32 {}", "supplier"),
            ("fn f() -> std::result::Result<u32, E> {}", "try_supplier"),
            ("fn f() {}", "runnable"),
            ("fn f() -> Result<(), E> {}", "try_runnable"),
        ];
        for (item, expected) in cases {
            assert_eq!(constructor(item).unwrap(), expected, "{}", item);
        }
    }

    #[test]
    fn test_classify_rejects_unsupported_shapes() {
        for item in [
            "fn f(a: String, b: String) -> String {}",
            "fn f(rx: Receiver<String>) -> String {}",
            "fn f(rx: Receiver<String>) -> (Receiver<u32>, Receiver<u32>) {}",
            "fn f(x: String) -> Receiver<u32> {}",
        ] {
            assert!(constructor(item).is_err(), "{} should be rejected", item);
        }
    }

    #[test]
    fn test_generated_factory() {
        let item: ItemFn = syn::parse_str("fn direct_1(x: String) -> String { x }").unwrap();
        let tokens = generate_strand_function(Punctuated::new(), item).unwrap().to_string();
        assert!(tokens.contains("pub fn Direct1 ()"));
        assert!(tokens.contains("Handler :: mapper (direct_1)"));
        assert!(tokens.contains("named (\"Direct1\")"));
    }

    #[test]
    fn test_name_override_and_collision() {
        let item: ItemFn = syn::parse_str("fn run() {}").unwrap();
        let args: Punctuated<Meta, Token![,]> = syn::parse_quote!(name = "Start");
        let tokens = generate_strand_function(args, item).unwrap().to_string();
        assert!(tokens.contains("pub fn Start ()"));

        let item: ItemFn = syn::parse_str("fn Upper(x: String) -> String { x }").unwrap();
        assert!(generate_strand_function(Punctuated::new(), item).is_err());
    }
}
