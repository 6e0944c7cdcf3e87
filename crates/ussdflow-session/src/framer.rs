//! Wire-protocol framing of session responses.
//!
//! Pure transform, no I/O. All protocol state travels inside the text via
//! a three-prefix convention, because the host protocol requires a
//! success-equivalent transport response to keep a session alive:
//!
//! - `CON` - continue the session, expect another dial
//! - `END` - terminate the session
//! - `UPR` - already fully framed upstream, pass through untouched

use crate::menu::DEFAULT_VALIDATION_MESSAGE;
use crate::payload::UssdPayload;
use crate::response::SessionResponse;

const CON_PREFIX: &str = "CON";
const END_PREFIX: &str = "END";
const UPR_PREFIX: &str = "UPR";

/// Turn an engine result into wire text.
///
/// On failure (response failed, or the payload carries a validation
/// failure) an error banner becomes the first line under the existing
/// `CON`/`END` prefix, or under a default `CON` when the body is
/// unprefixed. Whatever remains unprefixed after that gets a bare `CON `.
pub fn frame_response(payload: &UssdPayload, sr: &SessionResponse) -> String {
    let mut res = sr.response().trim().to_string();

    if sr.failed() || payload.validation_failed() {
        let banner = first_non_empty(&[sr.status_message(), DEFAULT_VALIDATION_MESSAGE]);
        if res.starts_with(CON_PREFIX) {
            res = format!("CON {}\n{}", banner, res.get(4..).unwrap_or_default());
        } else if res.starts_with(END_PREFIX) {
            res = format!("END {}\n{}", banner, res.get(4..).unwrap_or_default());
        } else if res.starts_with(UPR_PREFIX) {
            // Fully framed upstream; leave untouched.
        } else {
            res = format!("CON {}\n{}", banner, res);
        }
    }

    if !res.starts_with("CON ") && !res.starts_with(UPR_PREFIX) && !res.starts_with(END_PREFIX) {
        res = format!("CON {}", res);
    }

    res
}

fn first_non_empty<'a>(vals: &[&'a str]) -> &'a str {
    vals.iter().find(|v| !v.is_empty()).copied().unwrap_or("")
}
