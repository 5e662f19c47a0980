use std::collections::BTreeMap;

use factsheet_core_types::ExchangeId;
use serde::{Deserialize, Serialize};

const BEARER_SCHEME: &str = "bearer";

/// One outbound request observed on the host application's traffic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObservedExchange {
    pub request_id: ExchangeId,
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
}

impl ObservedExchange {
    pub fn new(
        request_id: impl Into<String>,
        method: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            request_id: ExchangeId::new(request_id),
            method: method.into(),
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Bearer token carried in the authorization header, without the scheme.
    pub fn bearer_credential(&self) -> Option<&str> {
        let raw = self.header("authorization")?.trim();
        let token = match raw.get(..BEARER_SCHEME.len()) {
            Some(scheme)
                if scheme.eq_ignore_ascii_case(BEARER_SCHEME)
                    && raw[BEARER_SCHEME.len()..]
                        .chars()
                        .next()
                        .map_or(true, char::is_whitespace) =>
            {
                raw[BEARER_SCHEME.len()..].trim()
            }
            _ => raw,
        };
        (!token.is_empty()).then_some(token)
    }

    pub fn is_method(&self, method: &str) -> bool {
        self.method.eq_ignore_ascii_case(method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_credential_strips_scheme_case_insensitively() {
        let exchange = ObservedExchange::new("1", "GET", "https://x")
            .with_header("Authorization", "bearer abc.def");
        assert_eq!(exchange.bearer_credential(), Some("abc.def"));
    }

    #[test]
    fn empty_authorization_is_not_a_credential() {
        let exchange =
            ObservedExchange::new("1", "GET", "https://x").with_header("authorization", "Bearer ");
        assert_eq!(exchange.bearer_credential(), None);
    }
}
