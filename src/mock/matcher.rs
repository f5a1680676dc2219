//! Route resolution: most-specific pattern wins

use super::spec::{MockSpec, ResponseRule};

/// A resolved route: the winning pattern, the method key it matched under
/// (a specific verb or `ANY`), and the rule itself
pub(crate) struct ResolvedRoute<'a> {
    pub pattern: &'a str,
    pub method_key: &'a str,
    pub rule: &'a ResponseRule,
}

/// Resolve the response rule for a request path and method.
///
/// An exact literal match beats any wildcard; among wildcards the longest
/// non-wildcard prefix wins. Within a pattern, a method-specific rule beats
/// the `ANY` rule. A matching pattern with no applicable method entry does
/// not shadow less specific patterns. Returns `None` when nothing applies,
/// in which case the caller falls back to the spec defaults.
///
/// Path comparison is case-sensitive; `method` must already be uppercase.
pub(crate) fn resolve<'a>(
    spec: &'a MockSpec,
    path: &str,
    method: &str,
) -> Option<ResolvedRoute<'a>> {
    // Exact literal match first
    if let Some((pattern, methods)) = spec.routes.get_key_value(path) {
        if let Some((method_key, rule)) = method_rule(methods, method) {
            return Some(ResolvedRoute {
                pattern: pattern.as_str(),
                method_key,
                rule,
            });
        }
    }

    // Wildcard candidates, longest non-wildcard prefix first
    let mut candidates: Vec<(&str, &str)> = spec
        .routes
        .keys()
        .filter_map(|pattern| {
            let prefix = pattern.strip_suffix('*')?;
            path.starts_with(prefix).then_some((pattern.as_str(), prefix))
        })
        .collect();
    candidates.sort_by(|a, b| b.1.len().cmp(&a.1.len()));

    for (pattern, _) in candidates {
        if pattern == path {
            continue; // already tried as a literal key above
        }
        let methods = &spec.routes[pattern];
        if let Some((method_key, rule)) = method_rule(methods, method) {
            return Some(ResolvedRoute {
                pattern,
                method_key,
                rule,
            });
        }
    }

    None
}

fn method_rule<'a>(
    methods: &'a std::collections::BTreeMap<String, ResponseRule>,
    method: &str,
) -> Option<(&'a str, &'a ResponseRule)> {
    methods
        .get_key_value(method)
        .or_else(|| methods.get_key_value("ANY"))
        .map(|(key, rule)| (key.as_str(), rule))
}
