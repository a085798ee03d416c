//! # JWT Authentication
//!
//! Bearer tokens are HS512 JWTs signed with the shared `HS_KEY`. The decoded claims become an
//! [`AuthContext`] that handlers and the authorisation layer read from request extensions.
//!
//! ## Token Shape
//! - `scope`: space separated string or a list of scope names
//! - `metadata`: identity of the caller (`clinician_id`, `patient_id`, `system_id`)
//! - `referring_device_id`: device that relayed the request, when there is one
//!
//! ## Rust Concepts Used
//! - `#[serde(untagged)]` to accept both scope encodings
//! - `jsonwebtoken::Validation` configured once and reused for every request

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::core::config::AuthSettings;
use crate::core::error::{ObservationsError, ObservationsResult};

/// Scopes as they appear in a token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScopeClaim {
    Joined(String),
    List(Vec<String>),
}

impl ScopeClaim {
    fn into_set(self) -> HashSet<String> {
        match self {
            ScopeClaim::Joined(joined) => joined.split_whitespace().map(str::to_string).collect(),
            ScopeClaim::List(list) => list.into_iter().collect(),
        }
    }
}

impl Default for ScopeClaim {
    fn default() -> Self {
        ScopeClaim::List(Vec::new())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClaimsMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clinician_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_id: Option<String>,
}

/// Claims carried by an access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    #[serde(default)]
    pub scope: ScopeClaim,
    #[serde(default)]
    pub metadata: ClaimsMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referring_device_id: Option<String>,
}

/// Identity and permissions of the caller
#[derive(Debug, Clone, PartialEq)]
pub struct AuthContext {
    /// Clinician, patient or system id, in that order of preference
    pub user_id: String,
    pub scopes: HashSet<String>,
    pub clinician_id: Option<String>,
    pub patient_id: Option<String>,
    pub system_id: Option<String>,
    pub referring_device_id: Option<String>,
}

impl AuthContext {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }

    /// Value of a metadata claim by name
    pub fn claim(&self, key: &str) -> Option<&str> {
        match key {
            "clinician_id" => self.clinician_id.as_deref(),
            "patient_id" => self.patient_id.as_deref(),
            "system_id" => self.system_id.as_deref(),
            "referring_device_id" => self.referring_device_id.as_deref(),
            _ => None,
        }
    }
}

impl TryFrom<JwtClaims> for AuthContext {
    type Error = ObservationsError;

    fn try_from(claims: JwtClaims) -> ObservationsResult<Self> {
        let ClaimsMetadata {
            clinician_id,
            patient_id,
            system_id,
        } = claims.metadata;

        let user_id = clinician_id
            .clone()
            .or_else(|| patient_id.clone())
            .or_else(|| system_id.clone())
            .or(claims.sub)
            .ok_or_else(|| ObservationsError::auth("Token does not identify a user"))?;

        Ok(Self {
            user_id,
            scopes: claims.scope.into_set(),
            clinician_id,
            patient_id,
            system_id,
            referring_device_id: claims.referring_device_id,
        })
    }
}

/// Decodes and validates bearer tokens
pub struct JwtAuthProvider {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtAuthProvider {
    pub fn new(settings: &AuthSettings) -> Self {
        let mut validation = Validation::new(Algorithm::HS512);
        if settings.ignore_jwt_validation {
            validation.insecure_disable_signature_validation();
            validation.validate_aud = false;
        } else {
            match &settings.audience {
                Some(audience) => validation.set_audience(&[audience.as_str()]),
                None => validation.validate_aud = false,
            }
            if let Some(issuer) = &settings.hs_issuer {
                validation.set_issuer(&[issuer.as_str()]);
            }
        }

        let secret = settings.hs_key.as_deref().unwrap_or_default();
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn authenticate(&self, token: &str) -> ObservationsResult<AuthContext> {
        let data = decode::<JwtClaims>(token, &self.decoding_key, &self.validation)?;
        AuthContext::try_from(data.claims)
    }
}
