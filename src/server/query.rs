//! Query string and body helpers shared by the handlers.
//!
//! List parameters may be repeated (`?encounter_id=a&encounter_id=b`) or comma separated
//! (`?encounter_id=a,b`); both forms can be mixed.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::core::error::{ObservationsError, ObservationsResult};

/// Decoded query string, keeping repeated keys
#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    pub fn parse(query: Option<&str>) -> Self {
        let pairs = query
            .map(|raw| url::form_urlencoded::parse(raw.as_bytes()).into_owned().collect())
            .unwrap_or_default();
        Self { pairs }
    }

    /// First non-empty value of `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .filter(|(name, value)| name == key && !value.trim().is_empty())
            .map(|(_, value)| value.as_str())
            .next()
    }

    pub fn require(&self, key: &str) -> ObservationsResult<&str> {
        self.get(key).ok_or_else(|| {
            ObservationsError::invalid_field(key, format!("Missing required query parameter '{}'", key))
        })
    }

    /// Every value of `key`, splitting comma separated lists
    pub fn values(&self, key: &str) -> Vec<String> {
        self.pairs
            .iter()
            .filter(|(name, _)| name == key)
            .flat_map(|(_, value)| value.split(','))
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn require_values(&self, key: &str) -> ObservationsResult<Vec<String>> {
        let values = self.values(key);
        if values.is_empty() {
            return Err(ObservationsError::invalid_field(
                key,
                format!("Missing required query parameter '{}'", key),
            ));
        }
        Ok(values)
    }

    pub fn flag(&self, key: &str, default: bool) -> ObservationsResult<bool> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" => Ok(false),
                _ => Err(ObservationsError::invalid_field(
                    key,
                    format!("'{}' is not a boolean", raw),
                )),
            },
        }
    }

    /// Optional positive `limit`
    pub fn limit(&self) -> ObservationsResult<Option<u32>> {
        match self.get("limit") {
            None => Ok(None),
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(limit) => Ok(Some(limit)),
                Err(_) => Err(ObservationsError::invalid_field(
                    "limit",
                    format!("'{}' is not a non-negative integer", raw),
                )),
            },
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for QueryParams
where
    S: Send + Sync,
{
    type Rejection = ObservationsError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(QueryParams::parse(parts.uri.query()))
    }
}

/// Deserialize a JSON body, mapping failures to a 400
pub fn parse_json_body<T: DeserializeOwned>(body: &Bytes) -> ObservationsResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ObservationsError::invalid_field("body", "Request body is required"));
    }
    serde_json::from_slice(body)
        .map_err(|e| ObservationsError::invalid_field("body", format!("Invalid JSON body: {}", e)))
}

/// Deserialize an optional JSON body; an empty body yields `None`
pub fn parse_optional_json_body<T: DeserializeOwned>(body: &Bytes) -> ObservationsResult<Option<T>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    parse_json_body(body).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_and_comma_separated_values() {
        let params = QueryParams::parse(Some("encounter_id=a&encounter_id=b,c&encounter_id=&limit=2"));
        assert_eq!(params.values("encounter_id"), vec!["a", "b", "c"]);
        assert_eq!(params.limit().unwrap(), Some(2));
        assert!(params.values("location").is_empty());
        assert!(params.require_values("location").is_err());
    }

    #[test]
    fn test_flags() {
        let params = QueryParams::parse(Some("compact=TRUE&suppress_obs_publish=0&bad=maybe"));
        assert!(params.flag("compact", false).unwrap());
        assert!(!params.flag("suppress_obs_publish", true).unwrap());
        assert!(params.flag("missing", true).unwrap());
        assert!(params.flag("bad", false).is_err());
    }

    #[test]
    fn test_plus_decodes_to_space() {
        let params = QueryParams::parse(Some("start_date=2021-01-01T00:00:00+00:00"));
        assert_eq!(params.get("start_date"), Some("2021-01-01T00:00:00 00:00"));
    }

    #[test]
    fn test_limit_parsing() {
        assert_eq!(QueryParams::parse(Some("limit=0")).limit().unwrap(), Some(0));
        assert!(QueryParams::parse(Some("limit=-1")).limit().is_err());
        assert!(QueryParams::parse(Some("limit=ten")).limit().is_err());
        assert_eq!(QueryParams::parse(None).limit().unwrap(), None);
    }

    #[test]
    fn test_json_bodies() {
        let list: Vec<String> = parse_json_body(&Bytes::from_static(b"[\"a\"]")).unwrap();
        assert_eq!(list, vec!["a"]);
        assert!(parse_json_body::<Vec<String>>(&Bytes::from_static(b"{")).is_err());
        assert!(parse_json_body::<Vec<String>>(&Bytes::new()).is_err());
        assert_eq!(
            parse_optional_json_body::<Vec<String>>(&Bytes::from_static(b"  ")).unwrap(),
            None
        );
    }
}
