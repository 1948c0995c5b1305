//! DOM action executors — the four primitives the processor dispatches
//! to, plus the dispatcher itself.
//!
//! Each primitive takes located element matches, manipulates the page
//! through the driver, and reports `{success, message}`. All four are
//! idempotent-safe to retry: nothing accumulates beyond what a user
//! re-clicking would cause, which is what makes the retry policy sound.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::action::{Action, ActionKind, ExecOutcome};
use crate::locator::{self, ElementMatch, LocatorQuery, TargetRole};
use crate::page::{hostname_of, PageDriver};
use crate::processor::ActionExecutor;
use crate::Result;

/// Pause after setting an input's value, so reactive listeners see it.
const INPUT_SETTLE_MS: u64 = 300;
/// How long to wait for a clicked anchor to actually move the page
/// before falling back to its href.
const CLICK_NAV_WAIT_MS: u64 = 1_500;
/// Wait for freshly loaded search results to render before scanning.
const RESULTS_SETTLE_MS: u64 = 2_000;

/// Sets an input's value through both the framework-bypassing native
/// setter and plain assignment, then fires the events controlled-input
/// pages listen for.
const SET_VALUE_JS: &str = r#"
((sel, value) => {
    const el = document.querySelector(sel);
    if (!el) return false;
    el.scrollIntoView({ behavior: 'smooth', block: 'center' });
    el.focus();
    const proto = el.tagName === 'TEXTAREA'
        ? HTMLTextAreaElement.prototype
        : HTMLInputElement.prototype;
    const desc = Object.getOwnPropertyDescriptor(proto, 'value');
    if (desc && desc.set) desc.set.call(el, '');
    el.value = '';
    if (desc && desc.set) desc.set.call(el, value);
    el.value = value;
    for (const type of ['input', 'change']) {
        el.dispatchEvent(new Event(type, { bubbles: true, cancelable: true }));
    }
    el.dispatchEvent(new KeyboardEvent('keyup', { bubbles: true }));
    if (el.setSelectionRange) el.setSelectionRange(value.length, value.length);
    return true;
})
"#;

/// Submission fallback when no search button resolved: enclosing form
/// first, synthetic Enter as last resort.
const TRIGGER_FALLBACK_JS: &str = r#"
((sel) => {
    const el = document.querySelector(sel);
    if (!el) return 'missing';
    const form = el.closest('form');
    if (form) {
        if (typeof form.requestSubmit === 'function') form.requestSubmit();
        else form.submit();
        return 'form';
    }
    const opts = { key: 'Enter', code: 'Enter', keyCode: 13, which: 13, bubbles: true, cancelable: true };
    el.dispatchEvent(new KeyboardEvent('keydown', opts));
    el.dispatchEvent(new KeyboardEvent('keyup', opts));
    return 'enter';
})
"#;

/// Transient visual highlight. Pure UX feedback; failures are ignored.
const HIGHLIGHT_JS: &str = r#"
((sel) => {
    const el = document.querySelector(sel);
    if (!el) return;
    const original = el.style.cssText;
    el.style.cssText += ';outline: 3px solid #4ecdc4; outline-offset: 2px;';
    setTimeout(() => { el.style.cssText = original; }, 1000);
})
"#;

/// `.click()` plus a synthetic mouse sequence, for pages that intercept
/// below the high-level click.
const SYNTH_CLICK_JS: &str = r#"
((sel) => {
    const el = document.querySelector(sel);
    if (!el) return { clicked: false, tag: '', href: null };
    el.scrollIntoView({ behavior: 'smooth', block: 'center' });
    const opts = { bubbles: true, cancelable: true, view: window };
    el.dispatchEvent(new MouseEvent('mousedown', opts));
    el.dispatchEvent(new MouseEvent('mouseup', opts));
    el.click();
    el.dispatchEvent(new MouseEvent('click', opts));
    return { clicked: true, tag: el.tagName.toLowerCase(), href: el.href || null };
})
"#;

/// Read-only extraction of bounded element summaries.
const ANALYZE_JS: &str = r#"
((selectors) => {
    const summaries = [];
    let matched = 0;
    for (const sel of selectors) {
        let found;
        try { found = document.querySelectorAll(sel); } catch (e) { continue; }
        matched += found.length;
        let index = 0;
        for (const el of found) {
            if (summaries.length >= 20) break;
            summaries.push({
                selector: sel,
                index: index++,
                tag: el.tagName.toLowerCase(),
                text: (el.textContent || '').trim().slice(0, 100),
                href: el.getAttribute('href'),
                src: el.getAttribute('src'),
                alt: el.getAttribute('alt'),
                class: typeof el.className === 'string' ? el.className : null,
                id: el.id || null
            });
        }
    }
    return { matched: matched, summaries: summaries };
})
"#;

fn js_call_1(body: &str, arg: &str) -> String {
    format!("{}({})", body, serde_json::to_string(arg).unwrap())
}

fn describe(target: &ElementMatch) -> String {
    if target.text.is_empty() {
        format!("<{}>", target.tag)
    } else {
        format!("<{}> \"{}\"", target.tag, target.text)
    }
}

async fn highlight(driver: &dyn PageDriver, selector: &str) {
    if let Err(e) = driver.execute(&js_call_1(HIGHLIGHT_JS, selector)).await {
        debug!("highlight failed for {}: {}", selector, e);
    }
}

/// Fill the search input and trigger submission: button click, enclosing
/// form submit, or synthetic Enter, in that order. Success is declared
/// once the trigger is issued — observing results is the next action's
/// job.
pub async fn fill_and_submit(
    driver: &dyn PageDriver,
    input: &ElementMatch,
    button: Option<&ElementMatch>,
    value: &str,
) -> Result<ExecOutcome> {
    info!("search: filling {} with \"{}\"", input.selector, value);
    let js = format!(
        "{}({},{})",
        SET_VALUE_JS,
        serde_json::to_string(&input.selector).unwrap(),
        serde_json::to_string(value).unwrap()
    );
    let filled = driver.evaluate(&js).await?;
    if filled != serde_json::Value::Bool(true) {
        return Ok(ExecOutcome::failed(format!(
            "search input '{}' disappeared before fill",
            input.selector
        )));
    }
    driver.wait(INPUT_SETTLE_MS).await;

    match button {
        Some(button) => {
            debug!("search: activating button {}", button.selector);
            highlight(driver, &button.selector).await;
            driver.click(&button.selector).await?;
        }
        None => {
            let how = driver
                .evaluate(&js_call_1(TRIGGER_FALLBACK_JS, &input.selector))
                .await?;
            match how.as_str() {
                Some("form") => debug!("search: submitted enclosing form"),
                Some("enter") => {
                    debug!("search: dispatched Enter");
                    // Synthetic events are ignored by some pages; a
                    // trusted key press on the focused input is not.
                    if let Err(e) = driver.press_key("Enter").await {
                        debug!("trusted Enter press failed: {}", e);
                    }
                }
                _ => {
                    return Ok(ExecOutcome::failed(
                        "could not trigger search submission",
                    ))
                }
            }
        }
    }

    Ok(ExecOutcome::ok(format!("Searching for \"{}\"", value)))
}

/// Click a located element. Anchors whose click produced no location
/// change within a bounded wait are followed by href instead.
pub async fn click_element(
    driver: &dyn PageDriver,
    target: &ElementMatch,
) -> Result<ExecOutcome> {
    highlight(driver, &target.selector).await;
    let url_before = driver.current_url().await.unwrap_or_default();

    let result = driver
        .evaluate(&js_call_1(SYNTH_CLICK_JS, &target.selector))
        .await?;
    let clicked = result
        .get("clicked")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    if !clicked {
        return Ok(ExecOutcome::failed(format!(
            "element '{}' not found or not clickable",
            target.selector
        )));
    }

    if target.is_anchor() {
        let href = result
            .get("href")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| target.href.clone());
        if let Some(href) = href.filter(|h| !h.is_empty()) {
            driver.wait(CLICK_NAV_WAIT_MS).await;
            let url_after = driver.current_url().await.unwrap_or_default();
            if url_after == url_before && href != url_before {
                debug!("click: no navigation observed; following href {}", href);
                driver.goto(&href).await?;
            }
        }
    }

    Ok(ExecOutcome::ok(format!("Clicked {}", describe(target))))
}

/// Like click, but anchors with a resolvable href navigate directly and
/// only non-anchor controls get clicked.
pub async fn navigate_element(
    driver: &dyn PageDriver,
    target: &ElementMatch,
) -> Result<ExecOutcome> {
    if target.is_anchor() {
        if let Some(ref href) = target.href {
            if href.starts_with("http") || href.starts_with('/') {
                info!("navigate: following {}", href);
                driver.goto(href).await?;
                return Ok(ExecOutcome::ok(format!("Navigating to {}", href)));
            }
        }
    }
    click_element(driver, target).await
}

/// Read-only analysis: bounded summaries of every match. Succeeds if at
/// least one element matched any selector; never mutates the page.
pub async fn analyze_elements(
    driver: &dyn PageDriver,
    selectors: &[String],
) -> Result<ExecOutcome> {
    let js = format!(
        "{}({})",
        ANALYZE_JS,
        serde_json::to_string(selectors).unwrap()
    );
    let value = driver.evaluate(&js).await?;
    let matched = value.get("matched").and_then(|v| v.as_u64()).unwrap_or(0);
    if matched == 0 {
        return Ok(ExecOutcome::failed(
            "no elements matched the analyze selectors",
        ));
    }
    debug!("analysis results: {}", value);
    Ok(ExecOutcome::ok(format!(
        "Analyzed {} elements across {} selectors",
        matched,
        selectors.len()
    )))
}

/// Production executor: resolves targets with the locator and dispatches
/// each action kind to its primitive.
pub struct DomExecutor {
    driver: Arc<dyn PageDriver>,
}

impl DomExecutor {
    pub fn new(driver: Arc<dyn PageDriver>) -> Self {
        Self { driver }
    }

    async fn hostname(&self) -> Option<String> {
        match self.driver.current_url().await {
            Ok(url) => hostname_of(&url),
            Err(_) => None,
        }
    }

    async fn search(&self, term: &str) -> Result<ExecOutcome> {
        let hostname = self.hostname().await;
        let input = locator::locate(
            self.driver.as_ref(),
            &LocatorQuery::for_role(TargetRole::SearchInput, hostname.clone(), Some(term.into())),
        )
        .await?;
        let Some(input) = input else {
            return Ok(ExecOutcome::failed("no search input found on this page"));
        };

        let button = locator::locate(
            self.driver.as_ref(),
            &LocatorQuery::for_role(TargetRole::SearchButton, hostname, Some(term.into())),
        )
        .await?;

        fill_and_submit(self.driver.as_ref(), &input, button.as_ref(), term).await
    }

    async fn find_and_click_product(&self, term: &str) -> Result<ExecOutcome> {
        // Give freshly rendered results a moment before scanning.
        self.driver.wait(RESULTS_SETTLE_MS).await;

        let hostname = self.hostname().await;
        let found = locator::locate(
            self.driver.as_ref(),
            &LocatorQuery::for_role(TargetRole::FirstProduct, hostname, Some(term.into())),
        )
        .await?;
        let Some(target) = found else {
            return Ok(ExecOutcome::failed(format!(
                "Could not find any products for \"{}\" on this page",
                term
            )));
        };

        info!("first product match via {}: {}", target.heuristic, describe(&target));
        let outcome = click_element(self.driver.as_ref(), &target).await?;
        if outcome.success {
            Ok(ExecOutcome::ok(format!(
                "Successfully found and clicked the first product for \"{}\"",
                term
            )))
        } else {
            Ok(outcome)
        }
    }

    async fn navigate_to_url(&self, url: &str) -> Result<ExecOutcome> {
        info!("navigating to {}", url);
        self.driver.goto(url).await?;
        Ok(ExecOutcome::ok(format!("Navigating to {}", url)))
    }

    async fn click_selectors(&self, selectors: &[String]) -> Result<ExecOutcome> {
        let found = locator::locate(
            self.driver.as_ref(),
            &LocatorQuery::for_selectors(selectors.to_vec()),
        )
        .await?;
        let Some(target) = found else {
            return Ok(ExecOutcome::failed(
                "no clickable elements found with the provided selectors",
            ));
        };
        click_element(self.driver.as_ref(), &target).await
    }

    async fn navigate_selectors(&self, selectors: &[String]) -> Result<ExecOutcome> {
        let found = locator::locate(
            self.driver.as_ref(),
            &LocatorQuery::for_selectors(selectors.to_vec()),
        )
        .await?;
        let Some(target) = found else {
            return Ok(ExecOutcome::failed(
                "no navigation elements found with the provided selectors",
            ));
        };
        navigate_element(self.driver.as_ref(), &target).await
    }

    async fn analyze_elements_checked(&self, selectors: &[String]) -> Result<ExecOutcome> {
        if selectors.is_empty() {
            return Ok(ExecOutcome::failed("analyze requires at least one selector"));
        }
        analyze_elements(self.driver.as_ref(), selectors).await
    }
}

#[async_trait]
impl ActionExecutor for DomExecutor {
    async fn execute(&self, action: &Action) -> ExecOutcome {
        let result = match &action.kind {
            ActionKind::Search { term } => self.search(term).await,
            ActionKind::FindAndClickProduct { term } => self.find_and_click_product(term).await,
            ActionKind::NavigateToUrl { url } => self.navigate_to_url(url).await,
            ActionKind::Click { selectors } => self.click_selectors(selectors).await,
            ActionKind::Navigate { selectors } => self.navigate_selectors(selectors).await,
            ActionKind::Analyze { selectors } => self.analyze_elements_checked(selectors).await,
        };

        match result {
            Ok(outcome) => outcome,
            // Driver errors are per-attempt failures: the retry policy
            // owns them, they never propagate as exceptions.
            Err(e) => {
                warn!("{} errored: {}", action.kind.name(), e);
                ExecOutcome::failed(e.to_string())
            }
        }
    }
}
