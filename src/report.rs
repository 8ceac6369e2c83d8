//! Human-readable and JSON reporting of check results

use crate::proxy::{ProxyResult, ProxyStatus};
use crate::Result;
use anyhow::Context;
use chrono::{DateTime, Utc};
use colored::{ColoredString, Colorize};
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

fn colorize(status: ProxyStatus, text: &str) -> ColoredString {
    match status {
        ProxyStatus::Ok => text.green(),
        ProxyStatus::TlsFreeze => text.yellow(),
        ProxyStatus::Timeout | ProxyStatus::AuthFailed | ProxyStatus::Error => text.red(),
    }
}

/// Detail lines shown under a result
pub fn detail_lines(result: &ProxyResult) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(ip) = &result.ip_address {
        lines.push(format!("IP: {}", ip));
    }
    if let Some(time) = result.response_time {
        lines.push(format!("Response time: {:.2}s", time));
    }
    if let Some(speed) = result.download_speed {
        lines.push(format!("Download speed: {:.1} KB/s", speed));
    }
    if let Some(bytes) = result.bytes_before_freeze {
        lines.push(format!("Froze after: {} bytes", bytes));
    }
    if let Some(error) = &result.error_message {
        lines.push(format!("Error: {}", error));
    }
    lines
}

/// Print one result; details for failures always, for OK only when verbose
pub fn print_result(result: &ProxyResult, verbose: bool) {
    let tag = format!("[{}]", result.status);
    println!("{}: {}", result.proxy, colorize(result.status, &tag));

    if verbose || result.status != ProxyStatus::Ok {
        for line in detail_lines(result) {
            println!("  └─ {}", line);
        }
    }
}

/// Per-status counts for a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub counts: HashMap<ProxyStatus, usize>,
}

impl Summary {
    pub fn from_results(results: &[ProxyResult]) -> Self {
        let mut counts = HashMap::new();
        for result in results {
            *counts.entry(result.status).or_insert(0) += 1;
        }
        Self {
            total: results.len(),
            counts,
        }
    }

    pub fn count(&self, status: ProxyStatus) -> usize {
        self.counts.get(&status).copied().unwrap_or(0)
    }
}

pub fn print_summary(summary: &Summary) {
    let rule = "=".repeat(50);
    println!("\n{}", rule);
    println!("SUMMARY:");
    println!("  Total checked:   {}", summary.total);
    for status in ProxyStatus::ALL {
        let line = format!("  {:<16} {}", format!("{}:", status), summary.count(status));
        println!("{}", colorize(status, &line));
    }
    println!("{}", rule);
}

/// Proxies that survive filtering, in `host:port` form
pub fn working_proxies(results: &[ProxyResult], include_frozen: bool) -> Vec<&str> {
    results
        .iter()
        .filter(|r| {
            r.status == ProxyStatus::Ok || (include_frozen && r.status == ProxyStatus::TlsFreeze)
        })
        .map(|r| r.proxy.as_str())
        .collect()
}

#[derive(Serialize)]
struct JsonReport<'a> {
    checked_at: DateTime<Utc>,
    summary: &'a Summary,
    results: &'a [ProxyResult],
}

/// Write the full result set as pretty JSON
pub fn write_json<P: AsRef<Path>>(results: &[ProxyResult], path: P) -> Result<()> {
    let summary = Summary::from_results(results);
    let report = JsonReport {
        checked_at: Utc::now(),
        summary: &summary,
        results,
    };
    let json = serde_json::to_string_pretty(&report)?;
    fs::write(path.as_ref(), json)
        .with_context(|| format!("failed to write report {}", path.as_ref().display()))?;
    Ok(())
}
