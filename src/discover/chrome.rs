use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use headless_chrome::protocol::cdp::types::Event;
use headless_chrome::protocol::cdp::Network;
use headless_chrome::{Browser, LaunchOptionsBuilder, Tab};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

use crate::config::ScanSettings;
use crate::core::ProductHint;
use crate::discover::{NetworkEvent, PageDriver};

const RESOURCE_URLS_JS: &str =
    "JSON.stringify(performance.getEntriesByType('resource').map(entry => entry.name))";
const INLINE_SCRIPTS_JS: &str =
    "JSON.stringify(Array.from(document.getElementsByTagName('script')).map(s => s.textContent || ''))";
const SCROLL_JS: &str = "window.scrollTo(0, document.body.scrollHeight); true";
const HEIGHT_JS: &str = "document.body ? document.body.scrollHeight : 0";

/// Walks up to five ancestors of any element referencing the video looking for
/// title/price/description text, falling back to the page heading.
const PRODUCT_HINT_JS: &str = r#"
(function (videoUrl) {
    function findPrice(el) {
        const p = el.querySelector('[class*="price"], [class*="Price"], .product-price, .item-price');
        return p ? p.textContent.trim() : '';
    }
    function findDescription(el) {
        const d = el.querySelector('[class*="description"], [class*="Description"], .product-description, .item-description');
        return d ? d.textContent.trim() : '';
    }
    let nodes = [];
    try {
        nodes = Array.from(document.querySelectorAll('video, [src*="' + videoUrl + '"], [data-src*="' + videoUrl + '"]'));
    } catch (e) {
        nodes = Array.from(document.querySelectorAll('video'));
    }
    for (const node of nodes) {
        let current = node;
        for (let depth = 0; current && depth < 5; depth++) {
            const titles = current.querySelectorAll('[class*="title"], [class*="name"], h1, h2, h3, .product-title, .item-title');
            for (const t of titles) {
                if (t.textContent.trim()) {
                    return JSON.stringify({ title: t.textContent.trim(), price: findPrice(current), description: findDescription(current) });
                }
            }
            current = current.parentElement;
        }
    }
    const main = document.querySelector('h1, [class*="title"]:not([class*="footer"]):not([class*="header"])');
    return JSON.stringify({ title: main ? main.textContent.trim() : '', price: findPrice(document), description: findDescription(document) });
})(__VIDEO_URL__)
"#;

/// [`PageDriver`] backed by a local Chrome/Chromium through the DevTools protocol.
///
/// Network events are pushed by the browser into a buffer and drained by the
/// scanner on each poll, mirroring a performance log.
pub struct ChromeDriver {
    _browser: Browser,
    tab: Arc<Tab>,
    events: Arc<Mutex<Vec<NetworkEvent>>>,
}

impl ChromeDriver {
    pub fn launch(settings: &ScanSettings) -> Result<Self> {
        let options = LaunchOptionsBuilder::default()
            .headless(settings.headless)
            .sandbox(false)
            .window_size(Some((1920, 1080)))
            .idle_browser_timeout(Duration::from_secs(600))
            .path(std::env::var("CHROME_PATH").ok().map(PathBuf::from))
            .build()
            .map_err(|err| anyhow!("invalid browser launch options: {err}"))?;
        let browser = Browser::new(options).context("could not launch chromium")?;
        let tab = browser.new_tab().context("opening browser tab")?;

        tab.enable_stealth_mode()?;
        tab.set_user_agent(&settings.user_agent, Some("en-US,en"), None)?;
        tab.set_default_timeout(Duration::from_secs(60));
        tab.call_method(Network::Enable {
            max_total_buffer_size: None,
            max_resource_buffer_size: None,
            max_post_data_size: None,
            enable_durable_messages: None,
            report_direct_socket_traffic: None,
        })?;

        let events: Arc<Mutex<Vec<NetworkEvent>>> = Arc::default();
        let sink = Arc::clone(&events);
        tab.add_event_listener(Arc::new(move |event: &Event| {
            let record = match event {
                Event::NetworkRequestWillBeSent(e) => NetworkEvent::new(
                    "Network.requestWillBeSent",
                    json!({"request": {"url": e.params.request.url}}),
                ),
                Event::NetworkResponseReceived(e) => NetworkEvent::new(
                    "Network.responseReceived",
                    json!({"response": {"url": e.params.response.url}}),
                ),
                Event::NetworkWebSocketCreated(e) => NetworkEvent::new(
                    "Network.webSocketCreated",
                    json!({"url": e.params.url}),
                ),
                _ => return,
            };
            if let Ok(mut buffer) = sink.lock() {
                buffer.push(record);
            }
        }))?;

        Ok(Self {
            _browser: browser,
            tab,
            events,
        })
    }

    pub fn evaluate(&self, expression: &str) -> Result<serde_json::Value> {
        let remote = self
            .tab
            .evaluate(expression, false)
            .with_context(|| format!("evaluating {}", short(expression)))?;
        Ok(remote.value.unwrap_or(serde_json::Value::Null))
    }

    /// Runs a script that returns `JSON.stringify(...)` and decodes the result.
    fn evaluate_json<T: DeserializeOwned>(&self, expression: &str) -> Result<T> {
        let value = self.evaluate(expression)?;
        let text = value
            .as_str()
            .ok_or_else(|| anyhow!("script did not return a JSON string"))?;
        Ok(serde_json::from_str(text)?)
    }
}

impl PageDriver for ChromeDriver {
    fn navigate(&mut self, url: &str) -> Result<()> {
        self.tab.navigate_to(url)?.wait_until_navigated()?;
        Ok(())
    }

    fn drain_network_events(&mut self) -> Result<Vec<NetworkEvent>> {
        let mut buffer = self
            .events
            .lock()
            .map_err(|_| anyhow!("network event buffer poisoned"))?;
        Ok(std::mem::take(&mut *buffer))
    }

    fn resource_urls(&mut self) -> Result<Vec<String>> {
        self.evaluate_json(RESOURCE_URLS_JS)
    }

    fn inline_scripts(&mut self) -> Result<Vec<String>> {
        self.evaluate_json(INLINE_SCRIPTS_JS)
    }

    fn scroll_to_bottom(&mut self) -> Result<()> {
        self.evaluate(SCROLL_JS)?;
        Ok(())
    }

    fn page_height(&mut self) -> Result<u64> {
        let value = self.evaluate(HEIGHT_JS)?;
        value
            .as_u64()
            .or_else(|| value.as_f64().map(|h| h.max(0.0) as u64))
            .ok_or_else(|| anyhow!("page height was not a number: {value}"))
    }

    fn product_hint(&mut self, video_url: &str) -> Result<Option<ProductHint>> {
        let script = PRODUCT_HINT_JS.replace("__VIDEO_URL__", &serde_json::to_string(video_url)?);
        let hint: ProductHint = self.evaluate_json(&script)?;
        debug!(video_url, title = %hint.title, "product hint");
        Ok(Some(hint).filter(|hint| hint.label().is_some()))
    }
}

fn short(expression: &str) -> String {
    let trimmed = expression.trim();
    match trimmed.char_indices().nth(48) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
