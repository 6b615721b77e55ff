//! Selector candidates and role-based element families

use phf::phf_map;
use serde::Serialize;
use std::fmt;

/// Header candidates, most specific landmark first
pub const DEFAULT_HEADER_SELECTORS: &[&str] = &[
    "header",
    "nav",
    ".header",
    ".navigation",
    ".navbar",
    ".nav-bar",
    ".site-header",
    ".main-header",
    ".top-nav",
    "[role='banner']",
    ".masthead",
    ".header-container",
];

pub const DEFAULT_FOOTER_SELECTORS: &[&str] = &[
    "footer",
    ".footer",
    ".site-footer",
    ".main-footer",
    ".page-footer",
    "[role='contentinfo']",
    "#footer",
    ".footer-container",
    ".global-footer",
];

/// Clicked before full-page capture to dismiss consent banners and popups
pub const DEFAULT_MODAL_CLOSE_SELECTORS: &[&str] = &[
    "#onetrust-accept-btn-handler",
    ".cookie-accept",
    ".cookie-consent button",
    "[aria-label='Close']",
    "[aria-label='close']",
    ".modal-close",
    ".close-button",
    "button.close",
    "[data-dismiss='modal']",
];

/// Promotional strips, navigation containers and brand blocks near the top
static HEADER_FAMILIES: phf::Map<&'static str, &'static [&'static str]> = phf_map! {
    "banners" => &[
        ".announcement-bar",
        ".promo-bar",
        ".top-banner",
        ".notification-bar",
        ".alert-banner",
        "[class*='announcement']",
    ],
    "navigation" => &[
        "nav",
        "[role='navigation']",
        ".nav",
        ".menu",
        ".main-menu",
        ".primary-nav",
    ],
    "logo" => &[
        ".logo",
        ".brand",
        ".site-logo",
        ".navbar-brand",
        "[class*='logo']",
    ],
};

/// Signup blocks, link lists and legal lines near the bottom
static FOOTER_FAMILIES: phf::Map<&'static str, &'static [&'static str]> = phf_map! {
    "newsletter" => &[
        ".newsletter",
        ".signup",
        ".subscribe",
        "[class*='newsletter']",
        "form[action*='subscribe']",
    ],
    "footer-nav" => &[
        ".footer-links",
        ".footer-nav",
        ".footer-menu",
        "footer nav",
        "footer ul",
        ".sitemap",
    ],
    "legal" => &[
        ".copyright",
        ".legal",
        ".footer-bottom",
        ".disclaimer",
        "[class*='copyright']",
    ],
};

/// Page region measured by the cascade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    Header,
    Footer,
}

impl Region {
    /// Role families probed by multi-element synthesis, sorted by family name
    pub fn families(&self) -> Vec<(&'static str, SelectorSet)> {
        let table = match self {
            Region::Header => &HEADER_FAMILIES,
            Region::Footer => &FOOTER_FAMILIES,
        };

        let mut families: Vec<_> = table
            .entries()
            .map(|(name, selectors)| (*name, SelectorSet::from_slice(selectors)))
            .collect();
        families.sort_by_key(|(name, _)| *name);
        families
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Region::Header => f.write_str("header"),
            Region::Footer => f.write_str("footer"),
        }
    }
}

/// Ordered CSS selector candidates; earlier entries win
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectorSet {
    selectors: Vec<String>,
}

impl SelectorSet {
    pub fn new<I, S>(selectors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            selectors: selectors
                .into_iter()
                .map(|s| {
                    let s: String = s.into();
                    s.trim().to_string()
                })
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    pub fn from_slice(selectors: &[&str]) -> Self {
        Self::new(selectors.iter().copied())
    }

    /// Split a comma-separated list. Commas inside brackets, quotes or
    /// parentheses do not split.
    pub fn parse(list: &str) -> Self {
        let mut parts = Vec::new();
        let mut current = String::new();
        let mut depth = 0usize;
        let mut quote: Option<char> = None;

        for ch in list.chars() {
            match (quote, ch) {
                (Some(q), c) if c == q => quote = None,
                (Some(_), _) => {}
                (None, '\'' | '"') => quote = Some(ch),
                (None, '[' | '(') => depth += 1,
                (None, ']' | ')') => depth = depth.saturating_sub(1),
                (None, ',') if depth == 0 => {
                    parts.push(std::mem::take(&mut current));
                    continue;
                }
                _ => {}
            }
            current.push(ch);
        }
        parts.push(current);

        Self::new(parts)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.selectors.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.selectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selectors.is_empty()
    }
}

impl From<&[String]> for SelectorSet {
    fn from(selectors: &[String]) -> Self {
        Self::new(selectors.iter().cloned())
    }
}

impl fmt::Display for SelectorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.selectors.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_keeps_order_and_trims() {
        let set = SelectorSet::parse("header , nav,.navbar,,");
        assert_eq!(set.iter().collect::<Vec<_>>(), vec!["header", "nav", ".navbar"]);
    }

    #[test]
    fn test_parse_ignores_commas_inside_groups() {
        let set = SelectorSet::parse("[data-x='a,b'], :is(header, nav), footer");
        assert_eq!(
            set.iter().collect::<Vec<_>>(),
            vec!["[data-x='a,b']", ":is(header, nav)", "footer"]
        );
    }

    #[test]
    fn test_families_cover_roles() {
        let header: Vec<_> = Region::Header.families().into_iter().map(|(n, _)| n).collect();
        assert_eq!(header, vec!["banners", "logo", "navigation"]);

        let footer: Vec<_> = Region::Footer.families().into_iter().map(|(n, _)| n).collect();
        assert_eq!(footer, vec!["footer-nav", "legal", "newsletter"]);
    }

    #[test]
    fn test_default_header_order() {
        assert_eq!(DEFAULT_HEADER_SELECTORS[0], "header");
        assert_eq!(DEFAULT_HEADER_SELECTORS.len(), 12);
        assert!(DEFAULT_FOOTER_SELECTORS.contains(&"[role='contentinfo']"));
    }
}
