//! Loading user functions from shared libraries.
//!
//! A function is addressed as `[file://]<path>?handler=<Name>`. The library
//! must export `Name` as a `#[no_mangle] fn() -> Handler` factory, which is
//! what `#[strand_function]` generates.

use crate::function::handler::Handler;
use libloading::{Library, Symbol};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Symbol carrying the ABI version a plugin was built against.
pub const ABI_SYMBOL: &str = "STRAND_ABI_VERSION";

/// ABI version of this build. Plugins must match it exactly.
pub const ABI_VERSION: &str = concat!("strand-", env!("CARGO_PKG_VERSION"));

/// Errors raised while resolving a function. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("unsupported scheme in function URI: {0}")]
    UnsupportedScheme(String),

    #[error("invalid function URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("failed to load library '{path}': {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("symbol '{symbol}' not found in '{path}': {source}")]
    SymbolNotFound {
        symbol: String,
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("library '{path}' was built against {found}, expected {expected}")]
    AbiMismatch {
        path: PathBuf,
        found: String,
        expected: String,
    },

    #[error("invalid signature: {0}")]
    InvalidSignature(String),
}

/// A parsed function URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionUri {
    pub path: PathBuf,
    pub handler: String,
}

impl FromStr for FunctionUri {
    type Err = ResolveError;

    fn from_str(uri: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ResolveError::InvalidUri {
            uri: uri.to_string(),
            reason: reason.to_string(),
        };

        let rest = match split_scheme(uri) {
            Some((scheme, rest)) if scheme.eq_ignore_ascii_case("file") => {
                rest.strip_prefix("//").unwrap_or(rest)
            }
            Some((scheme, _)) => return Err(ResolveError::UnsupportedScheme(scheme.to_string())),
            None => uri,
        };

        let (path, query) = rest.split_once('?').unwrap_or((rest, ""));
        let path = percent_decode(path).ok_or_else(|| invalid("invalid percent-encoding in path"))?;
        if path.is_empty() {
            return Err(invalid("missing library path"));
        }

        let handler = query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, _)| *key == "handler")
            .map(|(_, value)| value)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| invalid("missing 'handler' query parameter"))?;
        let handler = percent_decode(handler)
            .ok_or_else(|| invalid("invalid percent-encoding in handler"))?;

        Ok(Self {
            path: PathBuf::from(path),
            handler,
        })
    }
}

/// Split off a URI scheme (`ALPHA *( ALPHA / DIGIT / "+" / "-" / "." ) ":"`).
fn split_scheme(uri: &str) -> Option<(&str, &str)> {
    let (scheme, rest) = uri.split_once(':')?;
    let mut chars = scheme.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    valid.then_some((scheme, rest))
}

/// Decode `%XX` escapes. `None` on a malformed escape or non UTF-8 result.
fn percent_decode(s: &str) -> Option<String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes.get(i + 1..i + 3)?;
            if !hex.iter().all(u8::is_ascii_hexdigit) {
                return None;
            }
            let hex = std::str::from_utf8(hex).ok()?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

impl fmt::Display for FunctionUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file://{}?handler={}", self.path.display(), self.handler)
    }
}

/// A handler resolved from a shared library.
///
/// Libraries that produced a handler are never unloaded: threads started by
/// plugin code may outlive any call, so the code must stay mapped for the
/// rest of the process.
#[derive(Clone, Debug)]
pub struct LoadedFunction {
    handler: Handler,
    path: PathBuf,
}

impl LoadedFunction {
    /// Get the resolved handler.
    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    /// Path of the library the handler came from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Resolve a function URI into a loaded handler.
pub fn resolve(uri: &str) -> Result<LoadedFunction, ResolveError> {
    let uri: FunctionUri = uri.parse()?;
    load(&uri.path, &uri.handler)
}

/// Load `symbol` from the library at `path`.
pub fn load(path: &Path, symbol: &str) -> Result<LoadedFunction, ResolveError> {
    debug!("Loading library {}", path.display());

    // SAFETY: loading a library runs its initializers; the path is trusted
    // deployment configuration.
    let library = unsafe { Library::new(path) }.map_err(|source| ResolveError::Load {
        path: path.to_path_buf(),
        source,
    })?;

    check_abi(&library, path)?;

    // SAFETY: the factory is generated by `#[strand_function]` with exactly
    // this signature, and the ABI check above pins the toolchain.
    let handler = unsafe {
        let factory: Symbol<fn() -> Handler> =
            library
                .get(symbol.as_bytes())
                .map_err(|source| ResolveError::SymbolNotFound {
                    symbol: symbol.to_string(),
                    path: path.to_path_buf(),
                    source,
                })?;
        factory()
    };

    info!(
        "Resolved function '{}' {} from {}",
        symbol,
        handler.signature(),
        path.display()
    );

    let _: &'static Library = Box::leak(Box::new(library));

    Ok(LoadedFunction {
        handler: handler.named(symbol),
        path: path.to_path_buf(),
    })
}

fn check_abi(library: &Library, path: &Path) -> Result<(), ResolveError> {
    // SAFETY: `declare_plugin!` exports the symbol as a `&'static str`.
    let found = unsafe {
        match library.get::<*const &'static str>(ABI_SYMBOL.as_bytes()) {
            Ok(symbol) => (**symbol).to_string(),
            Err(_) => {
                warn!(
                    "Library {} does not declare an ABI version, assuming {}",
                    path.display(),
                    ABI_VERSION
                );
                return Ok(());
            }
        }
    };

    if found != ABI_VERSION {
        return Err(ResolveError::AbiMismatch {
            path: path.to_path_buf(),
            found,
            expected: ABI_VERSION.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_uri_with_and_without_scheme() {
        let uri: FunctionUri = "file:///tmp/libdemo.so?handler=Upper".parse().unwrap();
        assert_eq!(uri.path, PathBuf::from("/tmp/libdemo.so"));
        assert_eq!(uri.handler, "Upper");

        let uri: FunctionUri = "target/libdemo.so?x=1&handler=Upper".parse().unwrap();
        assert_eq!(uri.path, PathBuf::from("target/libdemo.so"));
        assert_eq!(uri.handler, "Upper");
        assert_eq!(uri.to_string(), "file://target/libdemo.so?handler=Upper");
    }

    #[test]
    fn test_unsupported_scheme() {
        match "http://example.com/lib.so?handler=Upper".parse::<FunctionUri>() {
            Err(ResolveError::UnsupportedScheme(scheme)) => assert_eq!(scheme, "http"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_scheme_without_slashes() {
        for (uri, expected) in [
            ("http:lib.so?handler=X", "http"),
            ("s3+tls:bucket/lib.so?handler=X", "s3+tls"),
        ] {
            match uri.parse::<FunctionUri>() {
                Err(ResolveError::UnsupportedScheme(scheme)) => assert_eq!(scheme, expected),
                other => panic!("{} parsed as {:?}", uri, other),
            }
        }

        let uri: FunctionUri = "FILE:/tmp/lib.so?handler=X".parse().unwrap();
        assert_eq!(uri.path, PathBuf::from("/tmp/lib.so"));
    }

    #[test]
    fn test_percent_decoding() {
        let uri: FunctionUri = "file:///opt/my%20functions/lib%2Bx.so?handler=Run%5Fit"
            .parse()
            .unwrap();
        assert_eq!(uri.path, PathBuf::from("/opt/my functions/lib+x.so"));
        assert_eq!(uri.handler, "Run_it");

        // A colon after a slash is part of the path, not a scheme.
        let uri: FunctionUri = "./a:b/lib.so?handler=X".parse().unwrap();
        assert_eq!(uri.path, PathBuf::from("./a:b/lib.so"));

        for uri in ["/tmp/lib%2.so?handler=X", "/tmp/lib%zz.so?handler=X", "/tmp/lib.so?handler=%ff"] {
            match uri.parse::<FunctionUri>() {
                Err(ResolveError::InvalidUri { .. }) => {}
                other => panic!("{} parsed as {:?}", uri, other),
            }
        }
    }

    #[test]
    fn test_missing_handler_parameter() {
        for uri in ["/tmp/lib.so", "/tmp/lib.so?handler=", "?handler=Upper"] {
            match uri.parse::<FunctionUri>() {
                Err(ResolveError::InvalidUri { .. }) => {}
                other => panic!("{} parsed as {:?}", uri, other),
            }
        }
    }

    #[test]
    fn test_missing_library_fails_to_load() {
        match resolve("/nonexistent/libmissing.so?handler=Upper") {
            Err(ResolveError::Load { path, .. }) => {
                assert_eq!(path, PathBuf::from("/nonexistent/libmissing.so"))
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    #[test]
    fn test_missing_symbol() {
        match resolve("libc.so.6?handler=NoSuchStrandHandler") {
            Err(ResolveError::SymbolNotFound { symbol, .. }) => {
                assert_eq!(symbol, "NoSuchStrandHandler")
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
