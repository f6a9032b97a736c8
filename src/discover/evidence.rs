use std::borrow::Cow;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::core::{CandidateSet, EvidenceSource};
use crate::discover::walker::collect_urls;

const NETWORK_METHOD_PREFIXES: &[&str] = &["Network.request", "Network.response", "Network.webSocket"];

/// One browser network event in performance-log shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkEvent {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl NetworkEvent {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }

    fn is_relevant(&self) -> bool {
        NETWORK_METHOD_PREFIXES
            .iter()
            .any(|prefix| self.method.contains(prefix))
    }

    fn url(&self) -> Option<&str> {
        self.params
            .pointer("/request/url")
            .or_else(|| self.params.pointer("/response/url"))
            .or_else(|| self.params.get("url"))
            .and_then(Value::as_str)
    }
}

pub fn from_network_events(events: &[NetworkEvent], set: &mut CandidateSet) -> usize {
    let mut added = 0;
    for event in events.iter().filter(|event| event.is_relevant()) {
        if let Some(url) = event.url() {
            if set.insert(url, EvidenceSource::NetworkEvent) {
                added += 1;
            }
        }
    }
    added
}

pub fn from_resource_timing<S: AsRef<str>>(urls: &[S], set: &mut CandidateSet) -> usize {
    urls.iter()
        .filter(|url| set.insert(url.as_ref(), EvidenceSource::ResourceTiming))
        .count()
}

pub fn from_inline_scripts<S: AsRef<str>>(scripts: &[S], set: &mut CandidateSet) -> usize {
    let mut added = 0;
    for script in scripts {
        let script = script.as_ref();
        if script.trim().is_empty() {
            continue;
        }

        for fragment in json_fragment_re().find_iter(script) {
            match serde_json::from_str::<Value>(fragment.as_str()) {
                Ok(value) => added += collect_urls(&value, set, EvidenceSource::EmbeddedJson),
                Err(_) => continue,
            }
        }

        let unescaped = unescape_js(script);
        for found in url_re().find_iter(&unescaped) {
            let url = found
                .as_str()
                .trim_end_matches(|c| matches!(c, ')' | ',' | ';' | '.' | ']' | '}'));
            if set.insert(url, EvidenceSource::InlineScript) {
                added += 1;
            }
        }
    }
    if added > 0 {
        debug!(added, "inline script evidence");
    }
    added
}

/// Decodes `\/`, `\uXXXX` and `\xXX` escapes so escaped URLs scan whole.
/// Other escapes are left in place.
fn unescape_js(script: &str) -> Cow<'_, str> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"\\(?:u([0-9a-fA-F]{4})|x([0-9a-fA-F]{2})|/)").expect("valid escape pattern")
    });
    re.replace_all(script, |caps: &Captures<'_>| {
        let code = caps.get(1).or_else(|| caps.get(2));
        match code {
            None => "/".to_string(),
            Some(hex) => u32::from_str_radix(hex.as_str(), 16)
                .ok()
                .and_then(char::from_u32)
                .map(String::from)
                .unwrap_or_else(|| caps[0].to_string()),
        }
    })
}

fn json_fragment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{[^{}]*\}").expect("valid fragment pattern"))
}

fn url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"https?://[^\s<>"'`\\]+"#).expect("valid url pattern"))
}
