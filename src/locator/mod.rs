//! Element locator — maps a semantic target role to zero-or-one live DOM
//! element.
//!
//! Plan building (which selectors, in what order) is pure Rust; the DOM
//! walk happens in a single read-only JS probe evaluated in the page.
//! The probe never mutates anything, and an empty result is an ordinary
//! outcome — the page simply doesn't have what we're looking for.

pub mod sites;

use serde::Deserialize;

use crate::page::PageDriver;
use crate::Result;

/// Semantic target descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetRole {
    SearchInput,
    SearchButton,
    FirstProduct,
    GenericClickable,
}

impl TargetRole {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SearchInput => "search_input",
            Self::SearchButton => "search_button",
            Self::FirstProduct => "first_product",
            Self::GenericClickable => "generic_clickable",
        }
    }
}

/// One locator lookup: a role plus whatever page context the caller has.
#[derive(Debug, Clone)]
pub struct LocatorQuery {
    pub role: TargetRole,
    pub hostname: Option<String>,
    pub search_term: Option<String>,
    /// Explicit candidate selectors. When non-empty these are the whole
    /// plan — the caller (e.g. a click action with planner-provided
    /// selectors) knows exactly what it wants, filters still apply.
    pub selectors: Vec<String>,
}

impl LocatorQuery {
    pub fn for_role(
        role: TargetRole,
        hostname: Option<String>,
        search_term: Option<String>,
    ) -> Self {
        Self {
            role,
            hostname,
            search_term,
            selectors: Vec::new(),
        }
    }

    pub fn for_selectors(selectors: Vec<String>) -> Self {
        Self {
            role: TargetRole::GenericClickable,
            hostname: None,
            search_term: None,
            selectors,
        }
    }

    /// The ordered selector cascade: explicit candidates if given,
    /// otherwise site-specific selectors for the hostname followed by the
    /// generic heuristics for the role. Earlier entries win outright;
    /// scoring only breaks ties inside the probe's last-resort scan.
    pub fn plan(&self) -> Vec<String> {
        if !self.selectors.is_empty() {
            return self.selectors.clone();
        }

        let mut plan: Vec<String> = Vec::new();
        if let Some(ref host) = self.hostname {
            if let Some(site) = sites::site_for(host) {
                plan.extend(site.for_role(self.role).iter().map(|s| s.to_string()));
            }
        }
        plan.extend(
            sites::generic_for_role(self.role)
                .iter()
                .map(|s| s.to_string()),
        );
        plan
    }
}

/// A located element: the handle the executors act on. Transient — valid
/// only until the DOM mutates under us.
#[derive(Debug, Clone, Deserialize)]
pub struct ElementMatch {
    /// Stable-enough CSS selector for re-resolving the element.
    pub selector: String,
    pub tag: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub href: Option<String>,
    /// Which selector or scan produced the match.
    pub heuristic: String,
}

impl ElementMatch {
    pub fn is_anchor(&self) -> bool {
        self.tag == "a"
    }
}

/// Read-only probe: walks the selector cascade with visibility/disabled/
/// advertisement filters, then falls back to a role-appropriate scan with
/// relevance scoring.
const PROBE_JS: &str = r#"
((selectors, role, term, adMarkers, productPatterns, resultsArea) => {
    const lc = s => (s || '').toLowerCase();
    const termWords = lc(term).split(/\s+/).filter(w => w.length > 2);

    function visible(el) {
        const rect = el.getBoundingClientRect();
        if (rect.width <= 0 || rect.height <= 0) return false;
        const style = getComputedStyle(el);
        if (style.display === 'none' || style.visibility === 'hidden' || style.opacity === '0') return false;
        if (el.offsetParent === null && style.position !== 'fixed') return false;
        if (rect.bottom < 0 || rect.top > window.innerHeight) return false;
        if (rect.right < 0 || rect.left > window.innerWidth) return false;
        return true;
    }

    function className(el) {
        const c = el.className;
        return c && c.baseVal !== undefined ? c.baseVal : c;
    }

    function markerHit(value) {
        const v = lc(value);
        return !!v && adMarkers.some(m => v.includes(m));
    }

    function isAd(el) {
        let node = el;
        for (let depth = 0; node && node.nodeType === 1 && depth < 5; depth++) {
            if (markerHit(className(node)) || markerHit(node.id)) return true;
            for (const attr of node.attributes) {
                if (attr.name.startsWith('data-') && (markerHit(attr.name) || markerHit(attr.value))) return true;
            }
            node = node.parentElement;
        }
        const text = lc(el.textContent).slice(0, 200);
        return text.includes('sponsored') || text.includes('advertisement');
    }

    function usable(el) {
        return visible(el) && el.disabled !== true && !isAd(el);
    }

    function cssPath(el) {
        if (el.id) return '#' + CSS.escape(el.id);
        const path = [];
        let n = el;
        while (n && n.nodeType === 1) {
            let s = n.tagName.toLowerCase();
            if (n.id) { path.unshift('#' + CSS.escape(n.id)); break; }
            const p = n.parentElement;
            if (p) {
                const sibs = [...p.children].filter(c => c.tagName === n.tagName);
                if (sibs.length > 1) s += ':nth-of-type(' + (sibs.indexOf(n) + 1) + ')';
            }
            path.unshift(s);
            n = p;
        }
        return path.join(' > ');
    }

    function describe(el, heuristic) {
        const text = (el.innerText || el.value || el.getAttribute('aria-label') || '')
            .trim().replace(/\s+/g, ' ').slice(0, 80);
        return {
            selector: cssPath(el),
            tag: el.tagName.toLowerCase(),
            text: text,
            href: el.href || null,
            heuristic: heuristic
        };
    }

    // Product containers are often not clickable themselves; resolve to
    // the product link inside them.
    function clickableWithin(el) {
        if (el.matches('a, button, [role="button"]')) return el;
        let fallback = null;
        for (const c of el.querySelectorAll('a[href], button, [role="button"]')) {
            if (!visible(c)) continue;
            const href = lc(c.href);
            if (href && productPatterns.some(p => href.includes(p))) return c;
            if (!fallback) fallback = c;
        }
        return fallback;
    }

    for (const sel of selectors) {
        let found;
        try { found = document.querySelectorAll(sel); } catch (e) { continue; }
        for (const el of found) {
            if (!usable(el)) continue;
            if (role === 'first_product') {
                const target = clickableWithin(el);
                if (target) return describe(target, sel);
                continue;
            }
            return describe(el, sel);
        }
    }

    function searchIndicator(el) {
        return lc(el.placeholder).includes('search')
            || lc(el.name).includes('search')
            || lc(el.id).includes('search')
            || lc(className(el)).includes('search')
            || lc(el.getAttribute('aria-label')).includes('search')
            || el.closest('.search, .searchbox, .search-form, [class*="search"]') !== null;
    }

    if (role === 'search_input') {
        for (const el of document.querySelectorAll('input[type="text"], input:not([type]), textarea')) {
            if (usable(el) && searchIndicator(el)) return describe(el, 'scan:input');
        }
        return null;
    }

    if (role === 'search_button') {
        for (const el of document.querySelectorAll('button, input[type="submit"], [role="button"]')) {
            const label = lc(el.innerText || el.value || el.getAttribute('aria-label'));
            if (usable(el) && (label.includes('search') || searchIndicator(el))) {
                return describe(el, 'scan:button');
            }
        }
        return null;
    }

    function relevance(el) {
        let score = 0;
        const href = lc(el.href);
        if (productPatterns.some(p => href.includes(p))) score += 3;
        if (el.closest(resultsArea.join(', ')) !== null) score += 2;
        const text = lc(el.textContent);
        for (const w of termWords) { if (text.includes(w)) score += 1; }
        return score;
    }

    let best = null;
    let bestScore = 0;
    for (const el of document.querySelectorAll('a[href]')) {
        if (!usable(el)) continue;
        const score = relevance(el);
        if (score > bestScore) { best = el; bestScore = score; }
    }
    return best ? describe(best, 'scan:link') : null;
})
"#;

/// Assemble the probe call for a query. Pure; exercised directly in
/// tests.
pub fn probe_expression(query: &LocatorQuery) -> String {
    format!(
        "{}({},{},{},{},{},{})",
        PROBE_JS,
        serde_json::to_string(&query.plan()).unwrap(),
        serde_json::to_string(query.role.name()).unwrap(),
        serde_json::to_string(query.search_term.as_deref().unwrap_or("")).unwrap(),
        serde_json::to_string(sites::AD_MARKERS).unwrap(),
        serde_json::to_string(sites::PRODUCT_URL_PATTERNS).unwrap(),
        serde_json::to_string(sites::RESULTS_AREA).unwrap(),
    )
}

/// Resolve a query against the live page. Returns the first element
/// surviving all filters in plan order, or `None`.
pub async fn locate(
    driver: &dyn PageDriver,
    query: &LocatorQuery,
) -> Result<Option<ElementMatch>> {
    let value = driver.evaluate(&probe_expression(query)).await?;
    if value.is_null() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_value(value)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn site_selectors_come_first_for_known_hosts() {
        let query = LocatorQuery::for_role(
            TargetRole::SearchInput,
            Some("www.amazon.com".into()),
            None,
        );
        let plan = query.plan();
        assert_eq!(plan[0], "#twotabsearchtextbox");
        assert!(plan.contains(&"input[type=\"search\"]".to_string()));
    }

    #[test]
    fn unknown_hosts_get_generics_only() {
        let query = LocatorQuery::for_role(
            TargetRole::SearchInput,
            Some("shop.example.com".into()),
            None,
        );
        let plan = query.plan();
        assert_eq!(plan[0], "input[type=\"search\"]");
    }

    #[test]
    fn explicit_selectors_are_the_whole_plan() {
        let query = LocatorQuery::for_selectors(vec!["#buy-now".into(), ".cta".into()]);
        assert_eq!(query.plan(), vec!["#buy-now".to_string(), ".cta".to_string()]);
    }

    #[test]
    fn every_role_has_a_non_empty_plan() {
        for role in [
            TargetRole::SearchInput,
            TargetRole::SearchButton,
            TargetRole::FirstProduct,
            TargetRole::GenericClickable,
        ] {
            let query = LocatorQuery::for_role(role, None, None);
            assert!(!query.plan().is_empty(), "empty plan for {}", role.name());
        }
    }

    #[test]
    fn probe_expression_embeds_escaped_arguments() {
        let query = LocatorQuery::for_role(
            TargetRole::FirstProduct,
            Some("www.ebay.com".into()),
            Some("red \"fancy\" t-shirt".into()),
        );
        let js = probe_expression(&query);
        assert!(js.contains("\"first_product\""));
        // Quotes in the search term survive as JSON escapes.
        assert!(js.contains("red \\\"fancy\\\" t-shirt"));
        assert!(js.contains("/itm/"));
    }

    #[test]
    fn element_match_deserializes_probe_shape() {
        let m: ElementMatch = serde_json::from_value(serde_json::json!({
            "selector": "#result > a:nth-of-type(2)",
            "tag": "a",
            "text": "Red T-Shirt",
            "href": "https://shop.example.com/p/123",
            "heuristic": "scan:link"
        }))
        .unwrap();
        assert!(m.is_anchor());
        assert_eq!(m.heuristic, "scan:link");
    }
}
