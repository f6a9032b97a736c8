pub mod chrome;
pub mod classify;
pub mod evidence;
pub mod scanner;
pub mod walker;

pub use chrome::ChromeDriver;
pub use evidence::NetworkEvent;
pub use scanner::{PageScanner, ScanOutcome, ScanState, StopReason};

use anyhow::Result;

use crate::core::ProductHint;

/// Browser surface the scanner needs. Everything runs on one thread of control.
pub trait PageDriver {
    fn navigate(&mut self, url: &str) -> Result<()>;

    /// Network events observed since the previous call.
    fn drain_network_events(&mut self) -> Result<Vec<NetworkEvent>>;

    /// URLs of every resource the page has loaded so far.
    fn resource_urls(&mut self) -> Result<Vec<String>>;

    /// Text content of every `<script>` element.
    fn inline_scripts(&mut self) -> Result<Vec<String>>;

    fn scroll_to_bottom(&mut self) -> Result<()>;

    fn page_height(&mut self) -> Result<u64>;

    fn product_hint(&mut self, video_url: &str) -> Result<Option<ProductHint>>;
}
