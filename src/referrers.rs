//! Referrer registry file.
//!
//! A JSON array of `{ "referral_code": "...", "percentage": <bps> }` objects.

use crate::domain::{ReferralCode, Referrer};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Basis points in 100%.
pub const MAX_PERCENTAGE_BPS: u32 = 10_000;

#[derive(Debug, Error)]
pub enum ReferrersFileError {
    #[error("cannot access referrers file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("referrers file {} is not valid JSON: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid referrer entry: {0}")]
    Invalid(String),
}

/// Read and validate the referrers file.
///
/// # Errors
/// Returns an error if the file cannot be read, is not valid JSON, or holds a
/// blank or duplicate code or a percentage above 100%.
pub async fn load_referrers_file(path: &Path) -> Result<Vec<Referrer>, ReferrersFileError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ReferrersFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    let referrers: Vec<Referrer> =
        serde_json::from_str(&raw).map_err(|source| ReferrersFileError::Json {
            path: path.to_path_buf(),
            source,
        })?;
    validate(referrers)
}

/// Write referrers to `path` as pretty JSON.
///
/// # Errors
/// Returns an error if serialization or the write fails.
pub async fn save_referrers_file(
    path: &Path,
    referrers: &[Referrer],
) -> Result<(), ReferrersFileError> {
    let json = serde_json::to_string_pretty(referrers).map_err(|source| ReferrersFileError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    tokio::fs::write(path, json)
        .await
        .map_err(|source| ReferrersFileError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn validate(referrers: Vec<Referrer>) -> Result<Vec<Referrer>, ReferrersFileError> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(referrers.len());

    for referrer in referrers {
        // Deserialization bypasses ReferralCode::new, so re-normalize here.
        let code = ReferralCode::new(referrer.referral_code.as_str()).ok_or_else(|| {
            ReferrersFileError::Invalid("blank referral code".to_string())
        })?;
        if referrer.percentage_bps > MAX_PERCENTAGE_BPS {
            return Err(ReferrersFileError::Invalid(format!(
                "percentage {} for {} exceeds {} bps",
                referrer.percentage_bps, code, MAX_PERCENTAGE_BPS
            )));
        }
        if !seen.insert(code.clone()) {
            return Err(ReferrersFileError::Invalid(format!(
                "duplicate referral code {}",
                code
            )));
        }
        out.push(Referrer {
            referral_code: code,
            percentage_bps: referrer.percentage_bps,
        });
    }

    Ok(out)
}
