//! HTTP-style content negotiation over `Accept` header values.

/// Media type assumed when a caller sends no `Accept` header.
pub const DEFAULT_ACCEPT: &str = "text/plain";

/// One entry of an `Accept` header.
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptSpec {
    pub value: String,
    pub q: f32,
}

/// Parse every comma separated entry of every `Accept` header value.
///
/// Parameters other than `q` are ignored, as are entries with a malformed
/// quality.
pub fn parse_accept<S: AsRef<str>>(values: &[S]) -> Vec<AcceptSpec> {
    let mut specs = Vec::new();
    for value in values {
        for entry in value.as_ref().split(',') {
            let mut parts = entry.split(';');
            let media = parts.next().unwrap_or("").trim().to_ascii_lowercase();
            if media.is_empty() {
                continue;
            }

            let mut q = Some(1.0);
            for param in parts {
                if let Some((key, raw)) = param.split_once('=') {
                    if key.trim().eq_ignore_ascii_case("q") {
                        q = parse_quality(raw.trim());
                    }
                }
            }

            if let Some(q) = q {
                specs.push(AcceptSpec { value: media, q });
            }
        }
    }
    specs
}

fn parse_quality(raw: &str) -> Option<f32> {
    let q: f32 = raw.parse().ok()?;
    (0.0..=1.0).contains(&q).then_some(q)
}

/// Return the offer that best matches the caller's `Accept` values.
///
/// Exact matches beat `type/*`, which beat `*/*`; higher quality wins over
/// specificity and ties keep the earliest offer. Entries with `q=0` never
/// match. When nothing matches, `default_offer` is returned. An empty
/// `accept` list is treated as [`DEFAULT_ACCEPT`].
pub fn negotiate_content_type<S: AsRef<str>>(
    accept: &[S],
    offers: &[&str],
    default_offer: &str,
) -> String {
    let specs = if accept.iter().all(|value| value.as_ref().trim().is_empty()) {
        parse_accept(&[DEFAULT_ACCEPT])
    } else {
        parse_accept(accept)
    };

    let mut best_offer = default_offer;
    let mut best_q = -1.0f32;
    let mut best_wild = 3u8;

    for &offer in offers {
        let normalized = offer.to_ascii_lowercase();
        for spec in &specs {
            if spec.q == 0.0 || spec.q < best_q {
                continue;
            }
            if spec.value == "*/*" {
                if spec.q > best_q || best_wild > 2 {
                    best_q = spec.q;
                    best_wild = 2;
                    best_offer = offer;
                }
            } else if let Some(prefix) = spec.value.strip_suffix('*') {
                if prefix.ends_with('/')
                    && normalized.starts_with(prefix)
                    && (spec.q > best_q || best_wild > 1)
                {
                    best_q = spec.q;
                    best_wild = 1;
                    best_offer = offer;
                }
            } else if spec.value == normalized && (spec.q > best_q || best_wild > 0) {
                best_q = spec.q;
                best_wild = 0;
                best_offer = offer;
            }
        }
    }

    best_offer.to_string()
}
