//! Device fingerprints and the comparison used to re-verify a login.
//!
//! ## Design
//! - A [`Fingerprint`] is whatever the mobile browser collected. Every
//!   attribute is optional so enrollment never fails on an incomplete set;
//!   unknown attributes are kept verbatim in `extra`.
//! - Comparison sits behind [`FingerprintMatcher`] so a scored matcher can
//!   replace [`StrictMatcher`] without touching session issuance.
//! - [`StrictMatcher`] is a conjunctive equality over vendor, platform,
//!   timezone, resolution, fonts and touch support. An attribute missing on
//!   either side is a mismatch. `canvas` and `extra` are never compared.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Device-identifying attributes captured at enrollment and re-submitted
/// at login.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fingerprint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    /// Screen resolution as reported by the browser, e.g. `"1170x2532"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    /// Font preference set. Compared element-for-element, in order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fonts: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub touch_support: Option<bool>,
    /// Canvas rendering signature. Stored but excluded from strict matching.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canvas: Option<String>,
    /// Any other attribute the client sent.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Result of comparing a submitted fingerprint with the enrolled one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOutcome {
    Match,
    Mismatch,
    /// No fingerprint stored for the user: device reset required.
    NoEnrollment,
}

impl MatchOutcome {
    pub fn is_match(self) -> bool {
        self == Self::Match
    }
}

impl std::fmt::Display for MatchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Match => "match",
            Self::Mismatch => "mismatch",
            Self::NoEnrollment => "no-enrollment",
        })
    }
}

/// Strategy for deciding whether a login came from the enrolled device.
pub trait FingerprintMatcher: Send + Sync {
    fn name(&self) -> &str;

    fn compare(&self, stored: Option<&Fingerprint>, submitted: &Fingerprint) -> MatchOutcome;
}

/// Exact equality over the fixed attribute subset.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrictMatcher;

/// Both present and equal. A missing attribute never matches.
fn same<T: PartialEq>(stored: &Option<T>, submitted: &Option<T>) -> bool {
    matches!((stored, submitted), (Some(a), Some(b)) if a == b)
}

impl FingerprintMatcher for StrictMatcher {
    fn name(&self) -> &str {
        "strict"
    }

    fn compare(&self, stored: Option<&Fingerprint>, submitted: &Fingerprint) -> MatchOutcome {
        let Some(stored) = stored else {
            return MatchOutcome::NoEnrollment;
        };

        let equal = same(&stored.vendor, &submitted.vendor)
            && same(&stored.platform, &submitted.platform)
            && same(&stored.timezone, &submitted.timezone)
            && same(&stored.resolution, &submitted.resolution)
            && same(&stored.fonts, &submitted.fonts)
            && same(&stored.touch_support, &submitted.touch_support);

        if equal {
            MatchOutcome::Match
        } else {
            MatchOutcome::Mismatch
        }
    }
}
