//! SMFG updater-config serializer.
//!
//! Two fixed layouts share a common prefix: the standalone record (1192
//! bytes) carried in the SMOL_CONFIG section, and the embedded record (1176
//! bytes, no nodeVersion slot) carried in the compressed-stub header.
//! Identical inputs always produce identical bytes, so both records are
//! golden-file testable.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Record magic; serialized little-endian, so the file leads with
/// `47 4D 46 53`.
pub const SMFG_MAGIC: u32 = 0x5346_4D47;

/// Record version emitted by this serializer. Readers accept >= 2.
pub const SMFG_VERSION: u16 = 2;

/// Standalone record length.
pub const SMFG_LEN: usize = 1192;

/// Stub-embedded record length (standalone minus the nodeVersion slot).
pub const SMFG_EMBEDDED_LEN: usize = 1176;

/// Byte offset of the nodeVersion slot in the standalone record.
pub const SMFG_NODE_VERSION_OFFSET: usize = 8 + 16 + 128 + 256 + 512 + 128 + 64 + 64;

const DEFAULT_COMMAND: &str = "self-update";
const DEFAULT_FAKE_ARGV_ENV: &str = "SMOL_FAKE_ARGV";
const DEFAULT_INTERVAL_MS: u64 = 86_400_000;

/// Self-updater settings fed to [`serialize_smfg`].
///
/// Every string is optional; missing values take the documented defaults at
/// serialization time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdaterConfig {
    /// Binary name the updater announces.
    pub binname: Option<String>,
    /// Update subcommand; defaults to `self-update`.
    pub command: Option<String>,
    /// Release feed URL; must be http(s) when set.
    pub url: Option<String>,
    /// Release tag pin.
    pub tag: Option<String>,
    /// Env var that suppresses the updater.
    #[serde(rename = "skipEnv")]
    pub skip_env: Option<String>,
    /// Env var carrying the fake argv; defaults to `SMOL_FAKE_ARGV`.
    #[serde(rename = "fakeArgvEnv")]
    pub fake_argv_env: Option<String>,
    /// Host runtime version string (standalone record only).
    #[serde(rename = "nodeVersion")]
    pub node_version: Option<String>,
    /// Whether to prompt before updating.
    pub prompt: bool,
    /// Default prompt answer; anything but y/Y/n/N normalizes to `n`.
    #[serde(rename = "promptDefault")]
    pub prompt_default: Option<char>,
    /// Update check interval in milliseconds.
    #[serde(rename = "interval")]
    pub interval_ms: Option<u64>,
    /// Notification interval in milliseconds.
    #[serde(rename = "notifyInterval")]
    pub notify_interval_ms: Option<u64>,
}

fn put_str1(out: &mut Vec<u8>, field: &'static str, value: &str, max: usize) -> Result<()> {
    let bytes = value.as_bytes();
    if bytes.len() > max {
        return Err(Error::TooLong {
            field,
            max,
            len: bytes.len(),
        });
    }
    out.push(bytes.len() as u8);
    out.extend_from_slice(bytes);
    out.extend(std::iter::repeat(0).take(max - bytes.len()));
    Ok(())
}

fn put_str2(out: &mut Vec<u8>, field: &'static str, value: &str, max: usize) -> Result<()> {
    let bytes = value.as_bytes();
    if bytes.len() > max {
        return Err(Error::TooLong {
            field,
            max,
            len: bytes.len(),
        });
    }
    out.extend(&(bytes.len() as u16).to_le_bytes());
    out.extend_from_slice(bytes);
    out.extend(std::iter::repeat(0).take(max - bytes.len()));
    Ok(())
}

fn serialize(config: &UpdaterConfig, with_node_version: bool) -> Result<Vec<u8>> {
    if let Some(url) = config.url.as_deref() {
        if !url.is_empty() && !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(Error::invalid_args(format!(
                "updater url must start with http:// or https://, got {url}"
            )));
        }
    }

    let expected = if with_node_version {
        SMFG_LEN
    } else {
        SMFG_EMBEDDED_LEN
    };
    let mut out = Vec::with_capacity(expected);

    out.extend(&SMFG_MAGIC.to_le_bytes());
    out.extend(&SMFG_VERSION.to_le_bytes());
    out.push(config.prompt as u8);
    out.push(match config.prompt_default {
        Some('y') | Some('Y') => b'y',
        _ => b'n',
    });
    out.extend(&config.interval_ms.unwrap_or(DEFAULT_INTERVAL_MS).to_le_bytes());
    out.extend(
        &config
            .notify_interval_ms
            .unwrap_or(DEFAULT_INTERVAL_MS)
            .to_le_bytes(),
    );

    put_str1(&mut out, "binname", config.binname.as_deref().unwrap_or(""), 127)?;
    put_str2(
        &mut out,
        "command",
        config.command.as_deref().unwrap_or(DEFAULT_COMMAND),
        254,
    )?;
    put_str2(&mut out, "url", config.url.as_deref().unwrap_or(""), 510)?;
    put_str1(&mut out, "tag", config.tag.as_deref().unwrap_or(""), 127)?;
    put_str1(&mut out, "skipEnv", config.skip_env.as_deref().unwrap_or(""), 63)?;
    put_str1(
        &mut out,
        "fakeArgvEnv",
        config.fake_argv_env.as_deref().unwrap_or(DEFAULT_FAKE_ARGV_ENV),
        63,
    )?;

    if with_node_version {
        debug_assert_eq!(out.len(), SMFG_NODE_VERSION_OFFSET);
        put_str1(
            &mut out,
            "nodeVersion",
            config.node_version.as_deref().unwrap_or(""),
            15,
        )?;
    }

    if out.len() != expected {
        return Err(Error::invalid_args(format!(
            "serialized updater config is {} bytes, expected {expected}",
            out.len()
        )));
    }
    Ok(out)
}

/// Serialize the standalone 1192-byte record for the SMOL_CONFIG section.
pub fn serialize_smfg(config: &UpdaterConfig) -> Result<Vec<u8>> {
    serialize(config, true)
}

/// Serialize the 1176-byte record embedded in a compressed-stub header.
pub fn serialize_smfg_embedded(config: &UpdaterConfig) -> Result<Vec<u8>> {
    serialize(config, false)
}
