//! Proxy parser module for the `host:port:username:password` list format

use crate::proxy::models::ProxyConfig;
use crate::Result;
use anyhow::Context;
use std::fmt::Display;
use std::fs;
use std::path::Path;
use tracing::warn;

/// Outcome of parsing one line of a proxy list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedLine {
    Proxy(ProxyConfig),
    /// Blank line or comment
    Skip,
    /// Malformed line, with a diagnostic
    Invalid(String),
}

/// Proxies loaded from a list together with the diagnostics for rejected lines
#[derive(Debug, Clone, Default)]
pub struct LoadedProxies {
    pub proxies: Vec<ProxyConfig>,
    pub diagnostics: Vec<String>,
}

/// Proxy parser for parsing proxies from strings and files
pub struct ProxyParser;

impl ProxyParser {
    /// Parse a single `host:port:username:password` line
    pub fn parse_line(line: &str) -> ParsedLine {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return ParsedLine::Skip;
        }

        let parts: Vec<&str> = line.split(':').collect();
        let [host, port, username, password] = parts.as_slice() else {
            return ParsedLine::Invalid(format!("Invalid proxy format: {}", line));
        };

        match port.parse::<u16>() {
            Ok(port) if port > 0 => ParsedLine::Proxy(ProxyConfig::new(
                host.to_string(),
                port,
                username.to_string(),
                password.to_string(),
            )),
            _ => ParsedLine::Invalid(format!("Invalid port: {}", port)),
        }
    }

    /// Parse proxies from a string (multiple lines)
    pub fn parse_string(content: &str) -> LoadedProxies {
        let mut loaded = LoadedProxies::default();
        for line in content.lines() {
            match Self::parse_line(line) {
                ParsedLine::Proxy(proxy) => loaded.proxies.push(proxy),
                ParsedLine::Skip => {}
                ParsedLine::Invalid(diagnostic) => loaded.diagnostics.push(diagnostic),
            }
        }
        loaded
    }

    /// Load proxies from a file, reporting rejected lines on stdout
    ///
    /// A missing file is reported the same way and yields an empty list, so a
    /// caller only has to check whether anything was loaded.
    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<LoadedProxies> {
        let path = path.as_ref();
        if !path.exists() {
            let diagnostic = format!("File not found: {}", path.display());
            println!("{}", diagnostic);
            return Ok(LoadedProxies {
                proxies: Vec::new(),
                diagnostics: vec![diagnostic],
            });
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read proxy list {}", path.display()))?;
        let loaded = Self::parse_string(&content);
        for diagnostic in &loaded.diagnostics {
            warn!(file = %path.display(), "{}", diagnostic);
            println!("{}", diagnostic);
        }
        Ok(loaded)
    }

    /// Save entries to a file, one per line
    pub fn save_to_file<P, T>(entries: &[T], path: P) -> Result<()>
    where
        P: AsRef<Path>,
        T: Display,
    {
        let content: String = entries.iter().map(|e| format!("{}\n", e)).collect();

        fs::write(path.as_ref(), content)
            .with_context(|| format!("failed to write {}", path.as_ref().display()))?;
        Ok(())
    }
}
