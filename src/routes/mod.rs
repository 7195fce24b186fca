//! Route feature optimizer.
//!
//! Maps the active navigation route to the minimal feature set worth
//! resolving: the always-needed essential list (one entry per top-level
//! page) plus route-specific extras looked up by exact path match. Pure
//! functions — the caller owns the tables, usually via [`crate::config::GateConfig`].

use once_cell::sync::Lazy;
use std::collections::HashMap;

static ESSENTIAL_FEATURES: Lazy<Vec<String>> = Lazy::new(|| {
    [
        "page_access_dashboard",
        "page_access_content",
        "page_access_teams",
        "page_access_settings",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
});

static FAILOPEN_FEATURES: Lazy<Vec<String>> = Lazy::new(|| {
    // Core navigation only. Nothing billable belongs here.
    [
        "page_access_dashboard",
        "page_access_content",
        "page_access_teams",
        "page_access_settings",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
});

static PUBLIC_ROUTES: Lazy<Vec<String>> = Lazy::new(|| {
    ["/", "/login", "/signup", "/forgot-password", "/pricing"]
        .iter()
        .map(|s| s.to_string())
        .collect()
});

static ROUTE_FEATURES: Lazy<HashMap<String, Vec<String>>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert(
        "/admin".to_string(),
        vec![
            "page_access_admin".to_string(),
            "team_management".to_string(),
        ],
    );
    m.insert(
        "/content/export".to_string(),
        vec![
            "content_export_pdf".to_string(),
            "content_export_docx".to_string(),
        ],
    );
    m.insert(
        "/analytics".to_string(),
        vec!["page_access_analytics".to_string()],
    );
    m.insert(
        "/teams".to_string(),
        vec!["team_management".to_string()],
    );
    m
});

pub fn default_essential_features() -> Vec<String> {
    ESSENTIAL_FEATURES.clone()
}

pub fn default_failopen_features() -> Vec<String> {
    FAILOPEN_FEATURES.clone()
}

pub fn default_public_routes() -> Vec<String> {
    PUBLIC_ROUTES.clone()
}

pub fn default_route_features() -> HashMap<String, Vec<String>> {
    ROUTE_FEATURES.clone()
}

/// Compute the feature set to resolve for `route`.
///
/// An explicit preload list wins verbatim — caller-declared features beat
/// heuristics. Otherwise: essential set ∪ route extras (exact path match;
/// unknown routes add nothing), deduplicated. Output order is irrelevant —
/// consumers treat it as a set.
pub fn features_for_route(
    route: &str,
    explicit_preload: Option<&[String]>,
    essential: &[String],
    route_map: &HashMap<String, Vec<String>>,
) -> Vec<String> {
    if let Some(preload) = explicit_preload {
        return preload.to_vec();
    }

    let mut out: Vec<String> = essential.to_vec();
    if let Some(extra) = route_map.get(route) {
        out.extend(extra.iter().cloned());
    }
    out.sort();
    out.dedup();
    out
}

/// Exact membership in the unauthenticated-accessible route list.
///
/// Public routes suppress feature resolution entirely — there is no user to
/// resolve for.
pub fn is_public_route(route: &str, public_routes: &[String]) -> bool {
    public_routes.iter().any(|r| r == route)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_preload_wins_verbatim() {
        let preload = vec!["custom_one".to_string(), "custom_two".to_string()];
        let out = features_for_route(
            "/admin",
            Some(&preload),
            &default_essential_features(),
            &default_route_features(),
        );
        assert_eq!(out, preload);
    }

    #[test]
    fn known_route_unions_essential_and_extras() {
        let out = features_for_route(
            "/admin",
            None,
            &default_essential_features(),
            &default_route_features(),
        );
        assert!(out.contains(&"page_access_dashboard".to_string()));
        assert!(out.contains(&"page_access_admin".to_string()));
        assert!(out.contains(&"team_management".to_string()));
    }

    #[test]
    fn unknown_route_contributes_nothing_extra() {
        let essential = default_essential_features();
        let out = features_for_route("/no-such-route", None, &essential, &default_route_features());
        let mut expected = essential;
        expected.sort();
        assert_eq!(out, expected);
    }

    #[test]
    fn output_is_deduplicated() {
        let mut route_map = HashMap::new();
        // Route extra overlaps the essential set.
        route_map.insert(
            "/teams".to_string(),
            vec!["page_access_teams".to_string(), "team_management".to_string()],
        );
        let out = features_for_route(
            "/teams",
            None,
            &default_essential_features(),
            &route_map,
        );
        let count = out
            .iter()
            .filter(|f| f.as_str() == "page_access_teams")
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn public_route_detection_is_exact() {
        let public = default_public_routes();
        assert!(is_public_route("/login", &public));
        assert!(!is_public_route("/login/", &public));
        assert!(!is_public_route("/dashboard", &public));
    }
}
