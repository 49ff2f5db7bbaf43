use std::sync::LazyLock;

use regex::Regex;

use crate::app::models::DeviceSummary;

/// Parses `adb devices` output: header, blank lines and `* daemon ...` notices are skipped.
pub fn parse_adb_devices(output: &str) -> Vec<DeviceSummary> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter(|line| !line.trim_start().starts_with('*'))
        .filter(|line| !line.to_lowercase().contains("list of devices"))
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            let serial = tokens.next()?.to_string();
            let state = tokens.next().unwrap_or_default().to_string();
            Some(DeviceSummary { serial, state })
        })
        .collect()
}

/// `adb connect` reports success on a fresh connection only as "connected to",
/// while a retry against a live session says "already connected to".
pub fn is_already_connected(output: &str) -> bool {
    output.to_lowercase().contains("already connected")
}

static PACKAGE_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"package: name='(\S+?)'").expect("valid regex")
});

/// Dotted identifier with at least two segments, each starting with a letter.
static IDENTIFIER_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"^[A-Za-z][A-Za-z0-9_]*(\.[A-Za-z][A-Za-z0-9_]*)+$").expect("valid regex")
});

static INSTALL_CODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"\b(INSTALL_(?:PARSE_)?FAILED_[A-Z0-9_]+)\b").expect("valid regex")
});

static FAILURE_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"Failure \[([^\]]*)\]").expect("valid regex")
});

/// Extracts the identifier from `aapt dump badging` output, validated.
pub fn parse_badging_package_name(output: &str) -> Option<String> {
    let name = PACKAGE_NAME_RE.captures(output)?.get(1)?.as_str();
    if is_valid_package_name(name) {
        Some(name.to_string())
    } else {
        None
    }
}

pub fn is_valid_package_name(name: &str) -> bool {
    IDENTIFIER_RE.is_match(name)
}

/// Older adb versions exit 0 and print `Failure [INSTALL_FAILED_...]`.
pub fn parse_install_failure(output: &str) -> Option<String> {
    if let Some(caps) = INSTALL_CODE_RE.captures(output) {
        return Some(caps[1].to_string());
    }
    FAILURE_RE
        .captures(output)
        .map(|caps| caps[1].trim().to_string())
        .or_else(|| {
            output
                .lines()
                .map(str::trim)
                .find(|line| line.starts_with("Failure"))
                .map(str::to_string)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_adb_devices_output() {
        let output = "* daemon not running; starting now at tcp:5037\n* daemon started successfully\nList of devices attached\n192.168.1.20:5555\tdevice\nR58M123ABC\tunauthorized\n\n";
        let parsed = parse_adb_devices(output);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].serial, "192.168.1.20:5555");
        assert_eq!(parsed[0].state, "device");
        assert_eq!(parsed[1].serial, "R58M123ABC");
        assert_eq!(parsed[1].state, "unauthorized");
    }

    #[test]
    fn header_only_yields_no_devices() {
        assert!(parse_adb_devices("List of devices attached\n\n").is_empty());
        assert!(parse_adb_devices("").is_empty());
    }

    #[test]
    fn recognizes_already_connected() {
        assert!(is_already_connected("already connected to 10.0.0.2:5555\n"));
        assert!(!is_already_connected("connected to 10.0.0.2:5555\n"));
        assert!(!is_already_connected("failed to connect to '10.0.0.2:5555': Connection refused"));
    }

    #[test]
    fn extracts_package_from_badging() {
        let output = "package: name='com.example.app' versionCode='42' versionName='1.2.0'\nsdkVersion:'21'\n";
        assert_eq!(parse_badging_package_name(output).as_deref(), Some("com.example.app"));
    }

    #[test]
    fn badging_with_invalid_identifier_is_absent() {
        assert_eq!(parse_badging_package_name("package: name='1bad.pkg' versionCode='1'"), None);
        assert_eq!(parse_badging_package_name("ERROR: dump failed because no AndroidManifest.xml"), None);
    }

    #[test]
    fn validates_identifier_grammar() {
        for valid in ["com.example.app", "org.foo_bar.Baz9", "a.b", "com.A1.b_2"] {
            assert!(is_valid_package_name(valid), "{valid} should be valid");
        }
        for invalid in ["1app", "app", "com.1example", "com..app", ".com.app", "com.app.", "com.ex-ample", ""] {
            assert!(!is_valid_package_name(invalid), "{invalid} should be invalid");
        }
    }

    #[test]
    fn patterns_compile() {
        for pattern in [&PACKAGE_NAME_RE, &IDENTIFIER_RE, &INSTALL_CODE_RE, &FAILURE_RE] {
            LazyLock::force(pattern);
        }
    }

    #[test]
    fn detects_install_failure_markers() {
        assert_eq!(
            parse_install_failure("Performing Streamed Install\nFailure [INSTALL_FAILED_VERSION_DOWNGRADE: Downgrade detected]").as_deref(),
            Some("INSTALL_FAILED_VERSION_DOWNGRADE")
        );
        assert_eq!(
            parse_install_failure("Failure [not installed for 0]").as_deref(),
            Some("not installed for 0")
        );
        assert_eq!(parse_install_failure("Performing Streamed Install\nSuccess\n"), None);
    }
}
