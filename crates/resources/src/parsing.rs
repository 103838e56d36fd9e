//! Helpers for parsing command output and comparing package versions.

use std::cmp::Ordering;

/// First line of `output`, without its newline. Output with no newline is
/// returned whole.
pub fn line(output: &str) -> &str {
    match output.split_once('\n') {
        Some((first, _)) => first,
        None => output,
    }
}

/// Value of the first `key=value` line, with surrounding quotes removed
pub fn keyval<'a>(output: &'a str, key: &str) -> Option<&'a str> {
    output.lines().find_map(|l| {
        l.strip_prefix(key)
            .and_then(|rest| rest.strip_prefix('='))
            .map(|v| v.trim_matches('"'))
    })
}

/// Compare two RPM version (or release) strings the way `rpmvercmp` does.
///
/// Strings are split into alternating numeric and alphabetic segments.
/// Numeric segments compare as numbers and beat alphabetic ones; `~` sorts
/// before anything, including the end of the string.
pub fn compare_rpm_versions(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }
    let (mut a, mut b) = (a.as_bytes(), b.as_bytes());
    loop {
        a = skip_separators(a);
        b = skip_separators(b);

        match (a.first(), b.first()) {
            (Some(b'~'), Some(b'~')) => {
                a = &a[1..];
                b = &b[1..];
                continue;
            }
            (Some(b'~'), _) => return Ordering::Less,
            (_, Some(b'~')) => return Ordering::Greater,
            (None, _) | (_, None) => break,
            _ => {}
        }

        let numeric = a[0].is_ascii_digit();
        let (seg_a, rest_a) = split_run(a, numeric);
        let (seg_b, rest_b) = split_run(b, numeric);
        if seg_b.is_empty() {
            // numeric beats alphabetic
            return if numeric { Ordering::Greater } else { Ordering::Less };
        }

        let ord = if numeric {
            compare_digits(seg_a, seg_b)
        } else {
            seg_a.cmp(seg_b)
        };
        if ord != Ordering::Equal {
            return ord;
        }
        a = rest_a;
        b = rest_b;
    }

    match (a.is_empty(), b.is_empty()) {
        (true, true) => Ordering::Equal,
        (false, _) => Ordering::Greater,
        (true, false) => Ordering::Less,
    }
}

/// Compare `(version, release)` pairs, epoch assumed 0
pub fn compare_rpm_evr(a: (&str, &str), b: (&str, &str)) -> Ordering {
    compare_rpm_versions(a.0, b.0).then_with(|| compare_rpm_versions(a.1, b.1))
}

fn skip_separators(s: &[u8]) -> &[u8] {
    let n = s
        .iter()
        .take_while(|c| !c.is_ascii_alphanumeric() && **c != b'~')
        .count();
    &s[n..]
}

fn split_run(s: &[u8], numeric: bool) -> (&[u8], &[u8]) {
    let n = s
        .iter()
        .take_while(|c| {
            if numeric {
                c.is_ascii_digit()
            } else {
                c.is_ascii_alphabetic()
            }
        })
        .count();
    s.split_at(n)
}

fn compare_digits(a: &[u8], b: &[u8]) -> Ordering {
    let a = trim_zeros(a);
    let b = trim_zeros(b);
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn trim_zeros(s: &[u8]) -> &[u8] {
    let n = s.iter().take_while(|c| **c == b'0').count();
    &s[n..]
}

/// Compare two Debian versions (`[epoch:]upstream[-revision]`) the way dpkg
/// does. A leading `=` as used in apt suffixes is ignored.
pub fn compare_deb_versions(a: &str, b: &str) -> Ordering {
    let (epoch_a, up_a, rev_a) = split_deb_version(a.trim_start_matches('='));
    let (epoch_b, up_b, rev_b) = split_deb_version(b.trim_start_matches('='));
    epoch_a
        .cmp(&epoch_b)
        .then_with(|| verrevcmp(up_a.as_bytes(), up_b.as_bytes()))
        .then_with(|| verrevcmp(rev_a.as_bytes(), rev_b.as_bytes()))
}

fn split_deb_version(v: &str) -> (u64, &str, &str) {
    let (epoch, rest) = match v.split_once(':') {
        Some((e, rest)) => (e.parse().unwrap_or(0), rest),
        None => (0, v),
    };
    match rest.rsplit_once('-') {
        Some((upstream, revision)) => (epoch, upstream, revision),
        None => (epoch, rest, ""),
    }
}

fn deb_order(c: Option<u8>) -> i32 {
    match c {
        None => 0,
        Some(c) if c.is_ascii_digit() => 0,
        Some(c) if c.is_ascii_alphabetic() => i32::from(c),
        Some(b'~') => -1,
        Some(c) => i32::from(c) + 256,
    }
}

fn verrevcmp(mut a: &[u8], mut b: &[u8]) -> Ordering {
    let is_digit = |s: &[u8]| s.first().is_some_and(u8::is_ascii_digit);

    while !a.is_empty() || !b.is_empty() {
        while (!a.is_empty() && !is_digit(a)) || (!b.is_empty() && !is_digit(b)) {
            let ac = deb_order(a.first().copied());
            let bc = deb_order(b.first().copied());
            if ac != bc {
                return ac.cmp(&bc);
            }
            a = a.get(1..).unwrap_or_default();
            b = b.get(1..).unwrap_or_default();
        }

        let (num_a, rest_a) = split_run(a, true);
        let (num_b, rest_b) = split_run(b, true);
        let ord = compare_digits(num_a, num_b);
        if ord != Ordering::Equal {
            return ord;
        }
        a = rest_a;
        b = rest_b;
    }
    Ordering::Equal
}

/// `a < b` for dotted numeric versions such as `v1.15.3`. Unparseable
/// versions are never less.
pub fn version_less_than(a: &str, b: &str) -> bool {
    match (parse_dotted(a), parse_dotted(b)) {
        (Some(a), Some(b)) => a < b,
        _ => false,
    }
}

fn parse_dotted(v: &str) -> Option<Vec<u64>> {
    let v = v.trim().trim_start_matches('v');
    let core = v.split(['-', '+']).next()?;
    let mut parts: Vec<u64> = core
        .split('.')
        .map(str::parse)
        .collect::<Result<_, _>>()
        .ok()?;
    while parts.len() < 3 {
        parts.push(0);
    }
    Some(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line() {
        assert_eq!(line("docker 19.03 1.el7\nsecond"), "docker 19.03 1.el7");
        assert_eq!(line("no newline"), "no newline");
        assert_eq!(line(""), "");
    }

    #[test]
    fn test_keyval() {
        let out = "Id=docker.service\nActiveState=active\nNAME=\"CentOS Linux\"\n";
        assert_eq!(keyval(out, "ActiveState"), Some("active"));
        assert_eq!(keyval(out, "NAME"), Some("CentOS Linux"));
        assert_eq!(keyval(out, "Active"), None);
        assert_eq!(keyval(out, "SubState"), None);
    }

    #[test]
    fn test_rpm_versions() {
        use Ordering::{Equal, Greater, Less};
        let cases = [
            ("1.0", "1.0", Equal),
            ("1.0", "2.0", Less),
            ("1.10", "1.9", Greater),
            ("1.01", "1.1", Equal),
            ("1.0a", "1.0", Greater),
            ("1.0", "1.0b", Less),
            ("1.0~rc1", "1.0", Less),
            ("1.0~rc1", "1.0~rc2", Less),
            ("2.a", "2.1", Less),
            ("18.09.1", "18.06.3", Greater),
            ("3.el7", "1.el7", Greater),
        ];
        for (a, b, want) in cases {
            assert_eq!(compare_rpm_versions(a, b), want, "{a} vs {b}");
        }
        assert_eq!(
            compare_rpm_evr(("1.14.1", "0"), ("1.14.1", "1")),
            Ordering::Less
        );
    }

    #[test]
    fn test_deb_versions() {
        use Ordering::{Equal, Greater, Less};
        let cases = [
            ("=1.14.1-00", "=1.14.1-00", Equal),
            ("=1.14.1-00", "=1.15.0-00", Less),
            ("1:1.0", "2.0", Greater),
            ("1.0~rc1", "1.0", Less),
            ("5:18.09.1~3-0~ubuntu-bionic", "5:18.09.0~3-0~ubuntu-bionic", Greater),
            ("1.27.2-2ubuntu3.2", "1.27.2-2ubuntu3.10", Less),
            ("1.0", "1.0-0", Equal),
        ];
        for (a, b, want) in cases {
            assert_eq!(compare_deb_versions(a, b), want, "{a} vs {b}");
        }
    }

    #[test]
    fn test_version_less_than() {
        assert!(version_less_than("1.15.3", "1.16.0"));
        assert!(version_less_than("v1.14", "1.16.0"));
        assert!(!version_less_than("1.16.0", "1.16.0"));
        assert!(!version_less_than("1.17.2-rc.1", "1.16.0"));
        assert!(!version_less_than("latest", "1.16.0"));
    }
}
