//! Device fingerprinting for chain-seed derivation.
//!
//! Collects the stable attributes an editor/tracker can observe about its
//! host (a user-agent-like string, platform, locale list, hardware hints,
//! screen geometry, timezone, a handful of browser probes) and reduces them
//! to a single SHA-256 digest. The engine never interprets these values; it
//! only uses the digest to seed `HashChain::initialize`.

use serde::{Deserialize, Serialize};

use crate::hash::{det_json, sha256_hex};

/// Raw, uninterpreted device attributes reported by the host environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintComponents {
    pub user_agent: String,
    pub platform: String,
    pub languages: Vec<String>,
    pub hardware_concurrency: Option<u32>,
    pub device_memory_gb: Option<u32>,
    pub screen: ScreenGeometry,
    pub timezone: String,
    pub canvas_probe: Option<String>,
    pub webgl_probe: Option<WebglProbe>,
    pub fonts: Vec<String>,
    pub cookie_enabled: bool,
    pub do_not_track: Option<String>,
    pub max_touch_points: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenGeometry {
    pub width: u32,
    pub height: u32,
    pub color_depth: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebglProbe {
    pub vendor: String,
    pub renderer: String,
}

/// A device fingerprint: the reduced digest plus the raw bag it was derived
/// from, so a verifier can audit what went into the hash without trusting
/// the digest blindly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceFingerprint {
    /// 64-hex SHA-256 digest of the canonical component bag.
    pub hash: String,
    pub components: FingerprintComponents,
}

impl DeviceFingerprint {
    /// Reduce `components` to a fingerprint. Deterministic: two identical
    /// component bags always produce the same `hash`.
    pub fn derive(components: FingerprintComponents) -> crate::error::Result<Self> {
        let canonical = det_json(&components)?;
        let hash = sha256_hex(canonical.as_bytes());
        Ok(Self { hash, components })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_components() -> FingerprintComponents {
        FingerprintComponents {
            user_agent: "UA-X".to_string(),
            platform: "P".to_string(),
            languages: vec!["ja".to_string()],
            hardware_concurrency: Some(8),
            device_memory_gb: Some(16),
            screen: ScreenGeometry {
                width: 1920,
                height: 1080,
                color_depth: Some(24),
            },
            timezone: "Asia/Tokyo".to_string(),
            canvas_probe: Some("mock".to_string()),
            webgl_probe: Some(WebglProbe {
                vendor: "MV".to_string(),
                renderer: "MR".to_string(),
            }),
            fonts: vec!["Arial".to_string()],
            cookie_enabled: true,
            do_not_track: Some("unspecified".to_string()),
            max_touch_points: 0,
        }
    }

    #[test]
    fn derive_is_deterministic() {
        let a = DeviceFingerprint::derive(sample_components()).unwrap();
        let b = DeviceFingerprint::derive(sample_components()).unwrap();
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.hash.len(), 64);
    }

    #[test]
    fn derive_differs_on_changed_component() {
        let mut changed = sample_components();
        changed.timezone = "UTC".to_string();

        let a = DeviceFingerprint::derive(sample_components()).unwrap();
        let b = DeviceFingerprint::derive(changed).unwrap();
        assert_ne!(a.hash, b.hash);
    }
}
