//! Choose one device out of a scan snapshot.

use std::fmt;

use crate::record::DeviceRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    /// The scan returned no devices.
    NoneFound,
    /// A serial was requested but no record carries it.
    NoMatch {
        target: String,
        available: Vec<String>,
    },
}

impl fmt::Display for SelectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionError::NoneFound => write!(f, "no devices found"),
            SelectionError::NoMatch { target, available } if available.is_empty() => {
                write!(f, "no device with serial \"{target}\"")
            }
            SelectionError::NoMatch { target, available } => write!(
                f,
                "no device with serial \"{target}\" (found: {})",
                available.join(", ")
            ),
        }
    }
}

impl std::error::Error for SelectionError {}

/// Pick the first record whose decoded, trimmed serial equals `target`, or
/// the first record when no target is given. An empty target counts as none.
///
/// Records whose serial does not decode never match a target.
pub fn select_device<'a>(
    records: &'a [DeviceRecord],
    target: Option<&str>,
) -> Result<&'a DeviceRecord, SelectionError> {
    let first = records.first().ok_or(SelectionError::NoneFound)?;
    let target = match target.map(str::trim) {
        None | Some("") => return Ok(first),
        Some(t) => t,
    };

    records
        .iter()
        .find(|r| r.serial().is_ok_and(|s| s.trim() == target))
        .ok_or_else(|| SelectionError::NoMatch {
            target: target.to_string(),
            available: records
                .iter()
                .map(|r| r.serial_number.decode_lossy())
                .collect(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::RawDeviceInfo;
    use crate::native::mock::MockNative;

    fn records(serials: &[&str]) -> Vec<DeviceRecord> {
        serials
            .iter()
            .enumerate()
            .map(|(i, s)| DeviceRecord::from_raw(&MockNative::device(s, i as u8)))
            .collect()
    }

    #[test]
    fn picks_target_serial() {
        let recs = records(&["AAA", "BBB", "CCC"]);
        let picked = select_device(&recs, Some("BBB")).unwrap();
        assert_eq!(picked.serial().unwrap(), "BBB");
    }

    #[test]
    fn picks_first_without_target() {
        let recs = records(&["AAA", "BBB", "CCC"]);
        assert_eq!(select_device(&recs, None).unwrap().serial().unwrap(), "AAA");
        assert_eq!(
            select_device(&recs, Some("  ")).unwrap().serial().unwrap(),
            "AAA"
        );
    }

    #[test]
    fn missing_target_is_no_match() {
        let recs = records(&["AAA", "BBB", "CCC"]);
        let err = select_device(&recs, Some("ZZZ")).unwrap_err();
        assert_eq!(
            err,
            SelectionError::NoMatch {
                target: "ZZZ".into(),
                available: vec!["AAA".into(), "BBB".into(), "CCC".into()],
            }
        );
        assert!(err.to_string().contains("found: AAA, BBB, CCC"));
    }

    #[test]
    fn empty_snapshot_is_none_found() {
        assert_eq!(select_device(&[], None), Err(SelectionError::NoneFound));
        assert_eq!(select_device(&[], Some("AAA")), Err(SelectionError::NoneFound));
    }

    #[test]
    fn target_is_trimmed() {
        let recs = records(&["AAA", "BBB"]);
        assert_eq!(
            select_device(&recs, Some(" BBB\n")).unwrap().serial().unwrap(),
            "BBB"
        );
    }

    #[test]
    fn first_duplicate_wins() {
        let recs = records(&["AAA", "BBB", "BBB"]);
        let picked = select_device(&recs, Some("BBB")).unwrap();
        assert_eq!(picked.device_address, 1);
    }

    #[test]
    fn undecodable_serial_never_matches() {
        let mut raw = MockNative::device("BBB", 0);
        raw.serial[1] = 0xFF;
        let recs = vec![
            DeviceRecord::from_raw(&raw),
            DeviceRecord::from_raw(&RawDeviceInfo {
                address: 9,
                ..MockNative::device("BBB", 0)
            }),
        ];
        let picked = select_device(&recs, Some("BBB")).unwrap();
        assert_eq!(picked.device_address, 9);
    }
}
