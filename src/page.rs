//! Page driver seam — the handful of browser operations the pipeline
//! needs, behind a trait so the processor and executors run against a
//! scripted page in tests.

use async_trait::async_trait;
use url::Url;

use crate::config::BrowserConfig;
use crate::Result;

/// Browser operations used by the executors and locator. All DOM access
/// funnels through here.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Navigate the page to a URL.
    async fn goto(&self, url: &str) -> Result<()>;

    /// Current page URL.
    async fn current_url(&self) -> Result<String>;

    /// Evaluate a JS expression and return its JSON value.
    async fn evaluate(&self, js: &str) -> Result<serde_json::Value>;

    /// Run JS for its side effects.
    async fn execute(&self, js: &str) -> Result<()>;

    /// Native click on the first element matching a selector.
    async fn click(&self, selector: &str) -> Result<()>;

    /// Dispatch a key press to the focused element.
    async fn press_key(&self, key: &str) -> Result<()>;

    /// Suspend for a settle delay.
    async fn wait(&self, ms: u64);
}

/// Lower-cased hostname of a URL, if it has one.
pub fn hostname_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()?
        .host_str()
        .map(|h| h.to_ascii_lowercase())
}

/// CDP-backed driver over an `eoka` browser.
pub struct EokaDriver {
    browser: eoka::Browser,
    page: eoka::Page,
}

impl EokaDriver {
    /// Launch a browser and open a blank page.
    pub async fn launch(config: &BrowserConfig) -> Result<Self> {
        let stealth = eoka::StealthConfig {
            headless: config.headless,
            proxy: config.proxy.clone(),
            user_agent: config.user_agent.clone(),
            viewport_width: config.viewport.as_ref().map(|v| v.width).unwrap_or(1280),
            viewport_height: config.viewport.as_ref().map(|v| v.height).unwrap_or(720),
            ..Default::default()
        };

        tracing::debug!(
            "launching browser (headless: {}, proxy: {:?})",
            config.headless,
            config.proxy
        );
        let browser = eoka::Browser::launch_with_config(stealth).await?;
        let page = browser.new_page("about:blank").await?;

        Ok(Self { browser, page })
    }

    pub fn page(&self) -> &eoka::Page {
        &self.page
    }

    /// Close the browser.
    pub async fn close(self) -> Result<()> {
        self.browser.close().await?;
        Ok(())
    }
}

#[async_trait]
impl PageDriver for EokaDriver {
    async fn goto(&self, url: &str) -> Result<()> {
        self.page.goto(url).await?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.page.url().await?)
    }

    async fn evaluate(&self, js: &str) -> Result<serde_json::Value> {
        Ok(self.page.evaluate(js).await?)
    }

    async fn execute(&self, js: &str) -> Result<()> {
        self.page.execute(js).await?;
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<()> {
        self.page.click(selector).await?;
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        self.page.human().press_key(key).await?;
        Ok(())
    }

    async fn wait(&self, ms: u64) {
        self.page.wait(ms).await;
    }
}
