use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;

/// Second-precision timestamp used in dead-letter records,
/// e.g. `2025-10-22T19:29:52` (UTC).
pub fn failure_timestamp() -> String {
    format_failure_timestamp(OffsetDateTime::now_utc())
}

/// RFC 3339 timestamp used in ingress responses.
pub fn rfc3339_timestamp() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&Rfc3339)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}

pub(crate) fn format_failure_timestamp(at: OffsetDateTime) -> String {
    let format =
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
    at.format(format).unwrap_or_else(|_| at.unix_timestamp().to_string())
}
