//! Common test utilities and helpers

use chrono::{DateTime, TimeZone, Utc};
use retainless_core::RetainlessConfig;
use std::path::Path;
use tempfile::TempDir;

/// Midnight UTC on the given day of October 2025
pub fn october(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 10, day, 0, 0, 0).unwrap()
}

/// Config pointing at a database inside `dir`, polling without delay
pub fn test_config(dir: &TempDir) -> RetainlessConfig {
    RetainlessConfig {
        database_path: Some(dir.path().join("retainless.db")),
        poll_interval_ms: 1,
        ..RetainlessConfig::default()
    }
}

/// Write a CloudFront-style log file with one GET per (address, agent, time)
pub fn write_w3c_log(path: &Path, visits: &[(&str, &str, DateTime<Utc>)]) {
    let mut text = String::from(
        "#Version: 1.0\n#Fields: date time x-edge-location c-ip cs-method cs-uri-stem sc-status cs(User-Agent)\n",
    );
    for (address, agent, at) in visits {
        text.push_str(&format!(
            "{}\t{}\tORD52\t{}\tGET\t/\t200\t{}\n",
            at.format("%Y-%m-%d"),
            at.format("%H:%M:%S"),
            address,
            agent
        ));
    }
    std::fs::write(path, text).expect("Failed to write access log");
}
