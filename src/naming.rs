//! Webcam file naming
//!
//! The camera service uploads images named after an RFC 2822 style timestamp,
//! e.g. `Mon, 02 Jan 2017 03:04:05 UTC.jpg`. These names do not sort by time,
//! so they are renamed to the canonical form `2017-01-02T03_04_05-0000.jpg`.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;

/// Name shape of images as uploaded by the camera service
static RAW_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<weekday>\w{3}), (?P<day>\d{2}) (?P<month>\w{3}) (?P<year>\d{4}) (?P<time>\d{2}:\d{2}:\d{2}) (?P<tz>\w{3})\.jpg$",
    )
    .expect("raw name pattern is valid")
});

/// Name shape of renamed images
static CANONICAL_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}_\d{2}_\d{2}-0000\.jpg$")
        .expect("canonical name pattern is valid")
});

/// `chrono` format of a canonical name, extension included
const CANONICAL_FORMAT: &str = "%Y-%m-%dT%H_%M_%S-0000.jpg";

/// Parse the creation instant out of a raw camera upload name.
///
/// Returns `None` if `name` does not have the raw shape. Weekday and timezone
/// are not interpreted; the time is taken as UTC.
pub fn raw_instant(name: &str) -> Option<DateTime<Utc>> {
    let caps = RAW_NAME.captures(name)?;
    let stamp = format!(
        "{} {} {} {}",
        &caps["day"], &caps["month"], &caps["year"], &caps["time"]
    );
    NaiveDateTime::parse_from_str(&stamp, "%d %b %Y %H:%M:%S")
        .ok()
        .map(|t| t.and_utc())
}

/// Parse the creation instant out of a canonical name
pub fn canonical_instant(name: &str) -> Option<DateTime<Utc>> {
    if !CANONICAL_NAME.is_match(name) {
        return None;
    }
    NaiveDateTime::parse_from_str(name, CANONICAL_FORMAT)
        .ok()
        .map(|t| t.and_utc())
}

/// Format the canonical name for `instant` (second granularity)
pub fn canonical_name(instant: &DateTime<Utc>) -> String {
    instant.format(CANONICAL_FORMAT).to_string()
}

/// Canonical name for a raw upload name.
///
/// `None` means the file should be left alone: it is either canonical
/// already or was not put there by the camera service.
pub fn normalize(name: &str) -> Option<String> {
    raw_instant(name).map(|t| canonical_name(&t))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone as _;

    use super::*;

    #[test]
    fn normalizes_raw_upload_name() {
        assert_eq!(
            normalize("Mon, 02 Jan 2017 03:04:05 UTC.jpg").as_deref(),
            Some("2017-01-02T03_04_05-0000.jpg")
        );
    }

    #[test]
    fn timezone_and_weekday_are_ignored() {
        // Weekday does not match the date and the zone is not UTC.
        assert_eq!(
            normalize("Fri, 31 Dec 2021 23:59:59 PST.jpg").as_deref(),
            Some("2021-12-31T23_59_59-0000.jpg")
        );
    }

    #[test]
    fn canonical_names_are_left_alone() {
        let canonical = "2017-01-02T03_04_05-0000.jpg";
        assert_eq!(normalize(canonical), None);
    }

    #[test]
    fn foreign_names_are_left_alone() {
        for name in [
            "holiday.jpg",
            "Mon, 02 Jan 2017 03:04:05 UTC.png",
            "Mon, 2 Jan 2017 03:04:05 UTC.jpg",
            "Mon, 02 Jan 2017 03:04:05 UTC.jpg.bak",
            "Mon, 02 Foo 2017 03:04:05 UTC.jpg",
        ] {
            assert_eq!(normalize(name), None, "{name}");
        }
    }

    #[test]
    fn canonical_round_trip() {
        for name in [
            "2017-01-02T03_04_05-0000.jpg",
            "1999-12-31T23_59_59-0000.jpg",
            "2024-02-29T00_00_00-0000.jpg",
        ] {
            let instant = canonical_instant(name).unwrap();
            assert_eq!(canonical_name(&instant), name);
        }
    }

    #[test]
    fn canonical_instant_is_utc() {
        let instant = canonical_instant("2017-03-01T10_00_00-0000.jpg").unwrap();
        assert_eq!(instant, Utc.with_ymd_and_hms(2017, 3, 1, 10, 0, 0).unwrap());
    }

    #[test]
    fn impossible_dates_are_foreign() {
        assert_eq!(canonical_instant("2017-13-02T03_04_05-0000.jpg"), None);
        assert_eq!(canonical_instant("2017-01-02T03_04_05+0100.jpg"), None);
        assert_eq!(raw_instant("Mon, 31 Feb 2017 03:04:05 UTC.jpg"), None);
    }

    #[test]
    fn raw_and_canonical_agree_on_the_instant() {
        let raw = "Tue, 14 Mar 2023 08:09:10 GMT.jpg";
        let canonical = normalize(raw).unwrap();
        assert_eq!(raw_instant(raw), canonical_instant(&canonical));
    }
}
