//! Stream signature deciphering
//!
//! Ciphered manifest entries carry a scrambled signature `s` that the player
//! script unscrambles with a short sequence of array operations before adding
//! it to the stream URL. We pull that sequence out of the script and replay it.

use anyhow::{anyhow, Result};
use regex::Regex;
use scraper::{Html, Selector};
use std::sync::OnceLock;
use tracing::debug;

const PLATFORM_ORIGIN: &str = "https://www.youtube.com";

/// One step of the unscrambling routine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherOp {
    Reverse,
    /// Drop the first `n` characters
    Splice(usize),
    /// Swap the first character with the one at `n % len`
    Swap(usize),
}

/// Fields of a `signatureCipher` value
#[derive(Debug, Clone, PartialEq)]
pub struct CipheredUrl {
    pub url: String,
    pub signature: String,
    /// Query parameter the deciphered signature goes into
    pub signature_param: String,
}

impl CipheredUrl {
    /// Parse the urlencoded `url=..&s=..&sp=..` form
    pub fn parse(cipher: &str) -> Result<Self> {
        let mut url = None;
        let mut signature = None;
        let mut signature_param = None;

        for (key, value) in url::form_urlencoded::parse(cipher.as_bytes()) {
            match key.as_ref() {
                "url" => url = Some(value.into_owned()),
                "s" => signature = Some(value.into_owned()),
                "sp" => signature_param = Some(value.into_owned()),
                _ => {}
            }
        }

        Ok(Self {
            url: url.ok_or_else(|| anyhow!("signatureCipher without url"))?,
            signature: signature.ok_or_else(|| anyhow!("signatureCipher without s"))?,
            signature_param: signature_param.unwrap_or_else(|| "signature".to_string()),
        })
    }
}

/// Unscrambling routine recovered from a player script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureCipher {
    ops: Vec<CipherOp>,
}

fn decipher_body_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r#"(?s)function\(\s*([\w$]+)\s*\)\s*\{\s*[\w$]+\s*=\s*[\w$]+\.split\(\s*""\s*\)\s*;(.*?)return\s+[\w$]+\.join\(\s*""\s*\)"#,
        )
        .expect("static decipher pattern")
    })
}

fn call_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"([\w$]+)(?:\.([\w$]+)|\["([\w$]+)"\])\(\s*[\w$]+\s*,\s*(\d+)\s*\)"#)
            .expect("static call pattern")
    })
}

fn helper_entry_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"([\w$]+)\s*:\s*function\([^)]*\)\s*\{([^}]*)\}"#).expect("static helper pattern")
    })
}

impl SignatureCipher {
    pub fn new(ops: Vec<CipherOp>) -> Self {
        Self { ops }
    }

    pub fn ops(&self) -> &[CipherOp] {
        &self.ops
    }

    /// Recover the operation sequence from player script source
    pub fn from_player_js(js: &str) -> Result<Self> {
        let body = decipher_body_pattern()
            .captures(js)
            .and_then(|c| c.get(2))
            .ok_or_else(|| anyhow!("decipher routine not found in player script"))?
            .as_str();

        let calls: Vec<(String, String, usize)> = call_pattern()
            .captures_iter(body)
            .filter_map(|c| {
                let object = c.get(1)?.as_str().to_string();
                let method = c.get(2).or_else(|| c.get(3))?.as_str().to_string();
                let arg = c.get(4)?.as_str().parse().ok()?;
                Some((object, method, arg))
            })
            .collect();

        let object = calls
            .first()
            .map(|(object, _, _)| object.clone())
            .ok_or_else(|| anyhow!("decipher routine has no helper calls"))?;

        let helper_pattern = Regex::new(&format!(r#"(?s)var\s+{}\s*=\s*\{{(.*?)\}}\s*;"#, regex::escape(&object)))?;
        let helper = helper_pattern
            .captures(js)
            .and_then(|c| c.get(1))
            .ok_or_else(|| anyhow!("helper object {} not found", object))?
            .as_str();

        let kinds: Vec<(String, &str)> = helper_entry_pattern()
            .captures_iter(helper)
            .filter_map(|c| Some((c.get(1)?.as_str().to_string(), c.get(2)?.as_str())))
            .collect();

        let mut ops = Vec::with_capacity(calls.len());
        for (_, method, arg) in calls {
            let body = kinds
                .iter()
                .find(|(name, _)| *name == method)
                .map(|(_, body)| *body)
                .ok_or_else(|| anyhow!("helper method {} not found", method))?;

            let op = if body.contains("reverse") {
                CipherOp::Reverse
            } else if body.contains("splice") {
                CipherOp::Splice(arg)
            } else {
                CipherOp::Swap(arg)
            };
            ops.push(op);
        }

        debug!("Recovered {} signature operations", ops.len());
        Ok(Self { ops })
    }

    pub fn apply(&self, signature: &str) -> String {
        let mut chars: Vec<char> = signature.chars().collect();
        for op in &self.ops {
            match *op {
                CipherOp::Reverse => chars.reverse(),
                CipherOp::Splice(n) => {
                    chars.drain(..n.min(chars.len()));
                }
                CipherOp::Swap(n) => {
                    if !chars.is_empty() {
                        let idx = n % chars.len();
                        chars.swap(0, idx);
                    }
                }
            }
        }
        chars.into_iter().collect()
    }

    /// Playable URL for a ciphered entry; other query parameters are kept as served
    pub fn resolve(&self, ciphered: &CipheredUrl) -> String {
        let separator = if ciphered.url.contains('?') { '&' } else { '?' };
        format!(
            "{}{}{}={}",
            ciphered.url,
            separator,
            ciphered.signature_param,
            urlencoding::encode(&self.apply(&ciphered.signature))
        )
    }
}

/// Absolute URL of the player script referenced by a watch page
pub fn find_player_script_url(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("script[src]").ok()?;

    document
        .select(&selector)
        .filter_map(|element| element.value().attr("src"))
        .find(|src| src.ends_with("/base.js") || src.contains("/player_ias"))
        .map(|src| {
            if src.starts_with("http") {
                src.to_string()
            } else if src.starts_with("//") {
                format!("https:{}", src)
            } else {
                format!("{}{}", PLATFORM_ORIGIN, src)
            }
        })
}
