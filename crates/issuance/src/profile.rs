// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Certificate profiles.
//!
//! A profile owns everything about an issuance that is not specific to one
//! request: the validity window shape and the extension policy knobs.
//! Profiles are built from config at startup and never change afterwards.

use serde::Deserialize;
use serde_with::serde_as;
use serde_with::DurationSeconds;
use thiserror::Error;
use time::{Duration, OffsetDateTime};

/// Ceiling on subscriber certificate lifetime.
const MAX_VALIDITY: Duration = Duration::days(398);

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileConfig {
    /// Certificate lifetime, notBefore to notAfter inclusive.
    #[serde_as(as = "DurationSeconds<i64>")]
    pub validity: Duration,

    /// How far notBefore is set into the past, to absorb clock skew between
    /// the CA and relying parties.
    #[serde_as(as = "DurationSeconds<i64>")]
    #[serde(default)]
    pub backdate: Duration,

    /// Add clientAuth alongside serverAuth in the EKU.
    #[serde(default)]
    pub include_client_auth: bool,

    /// Never carry a subject common name, even when the CSR offers one.
    #[serde(default)]
    pub omit_common_name: bool,
}

#[derive(Error, Debug, PartialEq)]
pub enum ProfileError {
    #[error("profile validity must be positive")]
    NonPositiveValidity,
    #[error("profile validity exceeds 398 days")]
    ValidityTooLong,
    #[error("profile backdate must not be negative")]
    NegativeBackdate,
}

#[derive(Debug, Clone)]
pub struct Profile {
    validity: Duration,
    backdate: Duration,
    pub(crate) include_client_auth: bool,
    pub(crate) omit_common_name: bool,
}

impl Profile {
    pub fn new(config: &ProfileConfig) -> Result<Profile, ProfileError> {
        if config.validity <= Duration::ZERO {
            return Err(ProfileError::NonPositiveValidity);
        }
        if config.validity > MAX_VALIDITY {
            return Err(ProfileError::ValidityTooLong);
        }
        if config.backdate < Duration::ZERO {
            return Err(ProfileError::NegativeBackdate);
        }
        Ok(Profile {
            validity: config.validity,
            backdate: config.backdate,
            include_client_auth: config.include_client_auth,
            omit_common_name: config.omit_common_name,
        })
    }

    /// The validity window for a certificate issued now. notBefore is
    /// backdated and truncated to whole seconds; notAfter is the last
    /// second inside the window, hence the one-second subtraction.
    pub fn generate_validity(&self, now: OffsetDateTime) -> (OffsetDateTime, OffsetDateTime) {
        let now = now.replace_nanosecond(0).unwrap_or(now);
        let not_before = now - self.backdate;
        let not_after = not_before + self.validity - Duration::seconds(1);
        (not_before, not_after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn config(validity: Duration, backdate: Duration) -> ProfileConfig {
        ProfileConfig {
            validity,
            backdate,
            include_client_auth: false,
            omit_common_name: false,
        }
    }

    #[test]
    fn validity_window_is_anchored_and_backdated() {
        let profile = Profile::new(&config(Duration::days(90), Duration::hours(1))).unwrap();
        let now = datetime!(2024-05-01 12:30:45.5 UTC);
        let (nb, na) = profile.generate_validity(now);
        assert_eq!(nb, datetime!(2024-05-01 11:30:45 UTC));
        assert_eq!(na, nb + Duration::days(90) - Duration::seconds(1));
    }

    #[test]
    fn zero_validity_is_rejected() {
        let err = Profile::new(&config(Duration::ZERO, Duration::ZERO)).unwrap_err();
        assert_eq!(err, ProfileError::NonPositiveValidity);
    }

    #[test]
    fn overlong_validity_is_rejected() {
        let err = Profile::new(&config(Duration::days(399), Duration::ZERO)).unwrap_err();
        assert_eq!(err, ProfileError::ValidityTooLong);
    }

    #[test]
    fn negative_backdate_is_rejected() {
        let err = Profile::new(&config(Duration::days(1), Duration::hours(-1))).unwrap_err();
        assert_eq!(err, ProfileError::NegativeBackdate);
    }

    #[test]
    fn profile_config_deserializes_from_seconds() {
        let json = r#"{"validity": 7776000, "backdate": 3600, "include_client_auth": true}"#;
        let config: ProfileConfig = serde_json::from_str(json).unwrap();
        let profile = Profile::new(&config).unwrap();
        let (nb, na) = profile.generate_validity(datetime!(2024-01-01 00:00 UTC));
        assert_eq!(na - nb, Duration::days(90) - Duration::seconds(1));
        assert!(profile.include_client_auth);
    }
}
