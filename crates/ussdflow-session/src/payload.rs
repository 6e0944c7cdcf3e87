//! Session snapshot for one inbound wire request.
//!
//! A `UssdPayload` is an immutable view built once per request from either
//! wire shape (query parameters or JSON body), and reconstructed from its
//! stored JSON form when a menu is replayed after a validation failure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ussdflow_core::Result;

/// Immutable snapshot of one inbound USSD request.
///
/// The transient `skip` marker is engine-internal: it suppresses a generic
/// next-menu advance after an explicit jump, is excluded from
/// serialization, and never survives a round trip through the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UssdPayload {
    session_id: String,
    service_code: String,
    msisdn: String,
    params: String,
    current_param: String,
    is_shortcut: bool,
    validation_failed: bool,
    time: DateTime<Utc>,
    #[serde(skip)]
    skip: bool,
}

/// POST wire shape.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IncomingUssd {
    #[serde(default)]
    msisdn: String,
    #[serde(default)]
    session_id: String,
    #[serde(default)]
    service_code: String,
    #[serde(default)]
    ussd_string: String,
}

impl UssdPayload {
    pub fn builder() -> UssdPayloadBuilder {
        UssdPayloadBuilder::default()
    }

    /// Build a snapshot from GET query parameters.
    ///
    /// Recognizes the gateway header aliases for each field and
    /// percent-decodes values, keeping the raw value when decoding fails.
    pub fn from_query_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let pairs: Vec<(&str, &str)> = pairs.into_iter().collect();

        let params = query_val(
            &pairs,
            &["USSD_PARAMS", "USSD_STRING", "ussd-string", "ussd_string"],
        );

        Self::builder()
            .session_id(query_val(
                &pairs,
                &["SESSION_ID", "session-id", "session_id", "session"],
            ))
            .service_code(query_val(
                &pairs,
                &["SERVICE_CODE", "ORIG", "service-code", "service_code"],
            ))
            .msisdn(query_val(&pairs, &["DEST", "MSISDN", "msisdn"]))
            .params(params)
            .build()
    }

    /// Build a snapshot from a POST JSON body of
    /// `{msisdn, sessionId, serviceCode, ussdString}`.
    pub fn from_json_body(body: &[u8]) -> Result<Self> {
        let incoming: IncomingUssd = serde_json::from_slice(body)?;

        let params = match urlencoding::decode(&incoming.ussd_string) {
            Ok(decoded) => decoded.into_owned(),
            Err(_) => incoming.ussd_string,
        };

        Ok(Self::builder()
            .session_id(incoming.session_id)
            .service_code(incoming.service_code)
            .msisdn(incoming.msisdn)
            .params(params)
            .build())
    }

    /// Lossless persistence form, used to replay a stored snapshot.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Reconstruct a snapshot from its persistence form.
    pub fn from_json(data: &str) -> Result<Self> {
        Ok(serde_json::from_str(data)?)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn service_code(&self) -> &str {
        &self.service_code
    }

    pub fn msisdn(&self) -> &str {
        &self.msisdn
    }

    /// The raw dialed string, accumulated across round trips.
    pub fn params(&self) -> &str {
        &self.params
    }

    /// The last `*`-delimited token of the dialed string, trimmed. This is
    /// the input the user supplied on the current round trip.
    pub fn current_param(&self) -> &str {
        &self.current_param
    }

    pub fn is_shortcut(&self) -> bool {
        self.is_shortcut
    }

    pub fn validation_failed(&self) -> bool {
        self.validation_failed
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    pub(crate) fn skip(&self) -> bool {
        self.skip
    }

    /// New snapshot with the validation-failed flag set.
    pub(crate) fn with_validation_failed(mut self) -> Self {
        self.validation_failed = true;
        self
    }

    /// New snapshot with the transient skip marker set.
    pub(crate) fn with_skip(mut self) -> Self {
        self.skip = true;
        self
    }
}

/// Builder for snapshots constructed directly (tests, custom transports).
#[derive(Debug, Default)]
pub struct UssdPayloadBuilder {
    session_id: String,
    service_code: String,
    msisdn: String,
    params: String,
    is_shortcut: bool,
    time: Option<DateTime<Utc>>,
}

impl UssdPayloadBuilder {
    pub fn session_id(mut self, val: impl Into<String>) -> Self {
        self.session_id = val.into();
        self
    }

    pub fn service_code(mut self, val: impl Into<String>) -> Self {
        self.service_code = val.into();
        self
    }

    pub fn msisdn(mut self, val: impl Into<String>) -> Self {
        self.msisdn = val.into();
        self
    }

    pub fn params(mut self, val: impl Into<String>) -> Self {
        self.params = val.into();
        self
    }

    pub fn is_shortcut(mut self, val: bool) -> Self {
        self.is_shortcut = val;
        self
    }

    pub fn time(mut self, val: DateTime<Utc>) -> Self {
        self.time = Some(val);
        self
    }

    pub fn build(self) -> UssdPayload {
        let current_param = self
            .params
            .rsplit('*')
            .next()
            .unwrap_or("")
            .trim()
            .to_string();

        UssdPayload {
            session_id: self.session_id,
            service_code: self.service_code,
            msisdn: self.msisdn,
            params: self.params,
            current_param,
            is_shortcut: self.is_shortcut,
            validation_failed: false,
            time: self.time.unwrap_or_else(Utc::now),
            skip: false,
        }
    }
}

/// First non-empty value among the alias keys, percent-decoded.
fn query_val(pairs: &[(&str, &str)], keys: &[&str]) -> String {
    for key in keys {
        for (k, v) in pairs {
            if k == key && !v.is_empty() {
                return match urlencoding::decode(v) {
                    Ok(decoded) => decoded.into_owned(),
                    Err(_) => (*v).to_string(),
                };
            }
        }
    }
    String::new()
}
