//! Device fingerprinting.
//!
//! A fingerprint is a SHA-256 digest over stable device characteristics,
//! rendered as 32 hex characters. It is not a secret and not an
//! authenticator; it only lets anonymous actions be attributed to the same
//! device across sessions.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FingerprintError {
    #[error("no device characteristics available")]
    Unavailable,
    #[error("fingerprint computation timed out after {0:?}")]
    TimedOut(std::time::Duration),
    #[error("fingerprint computation failed: {0}")]
    Failed(String),
}

/// Something that can derive a stable device identifier.
#[async_trait]
pub trait FingerprintSource: Send + Sync {
    async fn compute(&self) -> Result<String, FingerprintError>;

    /// Forget anything the source cached internally.
    fn reset(&self) {}
}

/// Hash `(name, value)` characteristics into a visitor id.
///
/// Fails when no characteristic flagged as device-specific is present; a
/// digest of compile-time constants alone would collide across devices.
pub fn derive(characteristics: &[Characteristic]) -> Result<String, FingerprintError> {
    if !characteristics.iter().any(|c| c.device_specific) {
        return Err(FingerprintError::Unavailable);
    }

    let mut hasher = Sha256::new();
    for c in characteristics {
        hasher.update(c.name.as_bytes());
        hasher.update(b"=");
        hasher.update(c.value.as_bytes());
        hasher.update(b"\n");
    }
    let digest = hex::encode(hasher.finalize());
    Ok(digest[..32].to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Characteristic {
    pub name: &'static str,
    pub value: String,
    pub device_specific: bool,
}

impl Characteristic {
    fn constant(name: &'static str, value: impl Into<String>) -> Self {
        Self {
            name,
            value: value.into(),
            device_specific: false,
        }
    }

    fn device(name: &'static str, value: impl Into<String>) -> Self {
        Self {
            name,
            value: value.into(),
            device_specific: true,
        }
    }
}

/// Fingerprint of the machine (native) or browser (wasm) we run on.
#[derive(Debug, Clone, Default)]
pub struct DeviceFingerprint;

#[async_trait]
impl FingerprintSource for DeviceFingerprint {
    async fn compute(&self) -> Result<String, FingerprintError> {
        derive(&collect())
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn collect() -> Vec<Characteristic> {
    let mut characteristics = vec![
        Characteristic::constant("os", std::env::consts::OS),
        Characteristic::constant("arch", std::env::consts::ARCH),
        Characteristic::constant("family", std::env::consts::FAMILY),
    ];

    let hostname = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .ok()
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
        })
        .filter(|h| !h.is_empty());
    if let Some(hostname) = hostname {
        characteristics.push(Characteristic::device("hostname", hostname));
    }

    if let Ok(user) = std::env::var("USER").or_else(|_| std::env::var("USERNAME")) {
        characteristics.push(Characteristic::device("user", user));
    }

    if let Some(home) = dirs::home_dir() {
        characteristics.push(Characteristic::device("home", home.display().to_string()));
    }

    if let Ok(cpus) = std::thread::available_parallelism() {
        characteristics.push(Characteristic::constant("cpus", cpus.get().to_string()));
    }

    characteristics
}

#[cfg(target_arch = "wasm32")]
fn collect() -> Vec<Characteristic> {
    let Some(window) = web_sys::window() else {
        return Vec::new();
    };
    let navigator = window.navigator();

    let mut characteristics = Vec::new();
    if let Ok(agent) = navigator.user_agent() {
        characteristics.push(Characteristic::device("user_agent", agent));
    }
    if let Some(language) = navigator.language() {
        characteristics.push(Characteristic::constant("language", language));
    }
    if let Ok(platform) = navigator.platform() {
        characteristics.push(Characteristic::device("platform", platform));
    }
    characteristics.push(Characteristic::constant(
        "cpus",
        navigator.hardware_concurrency().to_string(),
    ));
    characteristics
}
