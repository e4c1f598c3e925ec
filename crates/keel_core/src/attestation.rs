//! Best-effort device fingerprint.
//!
//! The fingerprint is context attached to authentication events. It never
//! gates anything and is recomputed every session; two devices with the same
//! signals will collide, and that is acceptable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use keel_crypto::hash;

const FINGERPRINT_DOMAIN: &str = "keel-device-fingerprint:v1";

/// Raw host signals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSignals {
    pub hostname: String,
    pub os: String,
    pub family: String,
    pub arch: String,
    pub cpu_count: usize,
    pub locale: Option<String>,
    pub timezone: Option<String>,
}

fn hostname_or_default() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-device".to_string())
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

impl DeviceSignals {
    pub fn collect() -> Self {
        Self {
            hostname: hostname_or_default(),
            os: std::env::consts::OS.to_string(),
            family: std::env::consts::FAMILY.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            cpu_count: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            locale: non_empty_env("LC_ALL").or_else(|| non_empty_env("LANG")),
            timezone: non_empty_env("TZ"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceFingerprint {
    /// BLAKE3 hex over the signals.
    pub hash: String,
    pub device_label: String,
    pub created_at: DateTime<Utc>,
}

impl DeviceFingerprint {
    pub fn collect() -> Self {
        Self::from_signals(&DeviceSignals::collect())
    }

    pub fn from_signals(signals: &DeviceSignals) -> Self {
        let cpu_count = signals.cpu_count.to_le_bytes();
        let locale = signals.locale.as_deref().unwrap_or_default();
        let timezone = signals.timezone.as_deref().unwrap_or_default();
        let parts: [&[u8]; 7] = [
            signals.hostname.as_bytes(),
            signals.os.as_bytes(),
            signals.family.as_bytes(),
            signals.arch.as_bytes(),
            &cpu_count,
            locale.as_bytes(),
            timezone.as_bytes(),
        ];
        Self {
            hash: hash::blake3_hex_parts(FINGERPRINT_DOMAIN, parts),
            device_label: device_label(&signals.os, &signals.arch),
            created_at: Utc::now(),
        }
    }
}

/// e.g. `"Linux desktop (x86_64)"`, `"Android mobile (aarch64)"`.
pub fn device_label(os: &str, arch: &str) -> String {
    let (name, form) = match os {
        "linux" => ("Linux", "desktop"),
        "macos" => ("macOS", "desktop"),
        "windows" => ("Windows", "desktop"),
        "android" => ("Android", "mobile"),
        "ios" => ("iOS", "mobile"),
        "freebsd" | "openbsd" | "netbsd" => ("BSD", "desktop"),
        _ => ("Unknown", "device"),
    };
    format!("{name} {form} ({arch})")
}
