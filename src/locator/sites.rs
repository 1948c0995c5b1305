//! Site-aware selector tables and generic fallback heuristics.
//!
//! One data-driven table consumed by the generic locator algorithm —
//! hand-tuned selectors for known storefronts first, then attribute
//! heuristics that work on most pages.

use crate::locator::TargetRole;

/// Hand-tuned selectors for one site family, matched by hostname
/// substring.
pub struct SiteSelectors {
    pub host_pattern: &'static str,
    pub search_input: &'static [&'static str],
    pub search_button: &'static [&'static str],
    pub product: &'static [&'static str],
}

impl SiteSelectors {
    pub fn for_role(&self, role: TargetRole) -> &'static [&'static str] {
        match role {
            TargetRole::SearchInput => self.search_input,
            TargetRole::SearchButton => self.search_button,
            TargetRole::FirstProduct => self.product,
            TargetRole::GenericClickable => &[],
        }
    }
}

pub const SITE_TABLE: &[SiteSelectors] = &[
    SiteSelectors {
        host_pattern: "amazon",
        search_input: &["#twotabsearchtextbox"],
        search_button: &["#nav-search-submit-button"],
        product: &[
            "[data-component-type=\"s-search-result\"]",
            ".s-result-item",
            "a[href*=\"/dp/\"]",
            "a[href*=\"/gp/\"]",
        ],
    },
    SiteSelectors {
        host_pattern: "ebay",
        search_input: &["#gh-ac"],
        search_button: &["#gh-btn"],
        product: &[".srp-results .s-item", ".s-item", "a[href*=\"/itm/\"]"],
    },
    SiteSelectors {
        host_pattern: "walmart",
        search_input: &["[data-automation-id=\"global-search-input\"]"],
        search_button: &["[data-automation-id=\"global-search-submit\"]"],
        product: &["[data-testid=\"item\"]", ".search-result-gridview-item"],
    },
    SiteSelectors {
        host_pattern: "target",
        search_input: &["#search", "input[data-test=\"@web/Search/SearchInput\"]"],
        search_button: &["button[data-test=\"@web/Search/SearchButton\"]"],
        product: &["[data-test=\"product-card\"]", ".ProductCard"],
    },
    SiteSelectors {
        host_pattern: "bestbuy",
        search_input: &["#gh-search-input"],
        search_button: &[".header-search-button"],
        product: &[".sku-item", ".sr-item"],
    },
];

/// Look up hand-tuned selectors for a hostname, if any.
pub fn site_for(hostname: &str) -> Option<&'static SiteSelectors> {
    let host = hostname.to_ascii_lowercase();
    SITE_TABLE.iter().find(|s| host.contains(s.host_pattern))
}

/// Generic search-input heuristics, tried in order after any site hits.
pub const GENERIC_SEARCH_INPUT: &[&str] = &[
    "input[type=\"search\"]",
    "input[name*=\"search\" i]",
    "input[placeholder*=\"search\" i]",
    "input[id*=\"search\" i]",
    "input[class*=\"search\" i]",
    "input[aria-label*=\"search\" i]",
    "input[role=\"searchbox\"]",
    "[data-testid*=\"search\" i] input",
    "input[name=\"q\"]",
    "input[name=\"query\"]",
    "input[name=\"keywords\"]",
    ".search-input input",
    ".search-box input",
    ".search-field input",
    ".searchbox input",
    ".search-form input",
    ".header-search input",
    ".site-search input",
    "#search-input",
    "#search-box",
    "#searchbox",
    "#search",
];

pub const GENERIC_SEARCH_BUTTON: &[&str] = &[
    "button[type=\"submit\"]",
    "input[type=\"submit\"]",
    "button[aria-label*=\"search\" i]",
    "button[class*=\"search\" i]",
    "[data-testid*=\"search\" i] button",
    ".search-button",
    ".search-btn",
    ".btn-search",
    ".search-submit",
    ".search-go",
    ".search-form button",
    ".searchbox button",
    "#search-button",
    "#search-btn",
];

pub const GENERIC_PRODUCT: &[&str] = &[
    ".product",
    ".product-item",
    ".product-card",
    ".product-tile",
    ".product-container",
    ".search-result",
    ".result-item",
    ".grid-item",
    ".catalog-item",
    "[data-testid*=\"product\"]",
    "[data-test*=\"product\"]",
    "[class*=\"product\"]",
    "a[href*=\"/product\"]",
    "a[href*=\"/item\"]",
    "a[href*=\"/p/\"]",
];

pub const GENERIC_CLICKABLE: &[&str] = &["a[href]", "button", "[role=\"button\"]"];

/// Deny-list for advertisement / sponsored-content filtering. Matched as
/// substrings against class, id, and data-* attributes on the element
/// and its ancestors; only the unambiguous markers are matched against
/// visible text.
pub const AD_MARKERS: &[&str] = &[
    "advertisement",
    "sponsored",
    "-ad-",
    "_ad_",
    "promo",
    "promotion",
    "banner",
    "commercial",
    "marketing",
];

/// URL fragments that mark a link as a product page.
pub const PRODUCT_URL_PATTERNS: &[&str] = &[
    "/product", "/item", "/p/", "/dp/", "/gp/", "/itm/", "product-", "item-", "sku-",
];

/// Container selectors that mark a search-results area.
pub const RESULTS_AREA: &[&str] = &[
    ".search-results",
    ".results",
    ".product-list",
    ".listing-results",
    "[class*=\"result\"]",
    "[class*=\"search\"]",
];

pub fn generic_for_role(role: TargetRole) -> &'static [&'static str] {
    match role {
        TargetRole::SearchInput => GENERIC_SEARCH_INPUT,
        TargetRole::SearchButton => GENERIC_SEARCH_BUTTON,
        TargetRole::FirstProduct => GENERIC_PRODUCT,
        TargetRole::GenericClickable => GENERIC_CLICKABLE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn site_lookup_matches_subdomains() {
        assert!(site_for("www.amazon.com").is_some());
        assert!(site_for("smile.amazon.co.uk").is_some());
        assert!(site_for("WWW.EBAY.COM").is_some());
        assert!(site_for("shop.example.com").is_none());
    }

    #[test]
    fn every_site_has_search_selectors() {
        for site in SITE_TABLE {
            assert!(
                !site.search_input.is_empty(),
                "{} has no search input selectors",
                site.host_pattern
            );
            assert!(!site.product.is_empty());
        }
    }

    #[test]
    fn generic_lists_are_non_empty_per_role() {
        for role in [
            TargetRole::SearchInput,
            TargetRole::SearchButton,
            TargetRole::FirstProduct,
            TargetRole::GenericClickable,
        ] {
            assert!(!generic_for_role(role).is_empty());
        }
    }
}
