//! Component B: scan captured output lines for structured entities.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::{Entity, EntityKind};

static PORT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d+)/(?:tcp|udp)\s+open\b").unwrap());
static CVE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"CVE-\d{4}-\d{4,}").unwrap());
static URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"https?://[^\s"'<>]+"#).unwrap());
static IP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,3})\.(\d{1,3})\.(\d{1,3})\.(\d{1,3})\b").unwrap());

fn valid_octet(s: &str) -> bool {
    s.parse::<u16>().map(|v| v <= 255).unwrap_or(false)
}

/// Scan every line once, in fixed pattern order (port, CVE, URL, IPv4),
/// deduplicating by `(kind, value)` with first occurrence winning.
pub fn extract(lines: &[String]) -> Vec<Entity> {
    let mut seen: HashSet<(EntityKind, String)> = HashSet::new();
    let mut out = Vec::new();

    for raw_line in lines {
        let context = raw_line.trim().to_string();

        for caps in PORT_RE.captures_iter(raw_line) {
            let value = caps[1].to_string();
            push_unique(&mut seen, &mut out, EntityKind::Port, value, &context);
        }

        for m in CVE_RE.find_iter(raw_line) {
            push_unique(
                &mut seen,
                &mut out,
                EntityKind::Cve,
                m.as_str().to_string(),
                &context,
            );
        }

        for m in URL_RE.find_iter(raw_line) {
            push_unique(
                &mut seen,
                &mut out,
                EntityKind::Url,
                m.as_str().to_string(),
                &context,
            );
        }

        for caps in IP_RE.captures_iter(raw_line) {
            let value = caps[0].to_string();
            if !valid_octet(&caps[1]) || !valid_octet(&caps[2]) || !valid_octet(&caps[3]) || !valid_octet(&caps[4]) {
                continue;
            }
            if value.starts_with("127.") || value.starts_with("0.0.0.0") {
                continue;
            }
            push_unique(&mut seen, &mut out, EntityKind::Ip, value, &context);
        }
    }

    out
}

fn push_unique(
    seen: &mut HashSet<(EntityKind, String)>,
    out: &mut Vec<Entity>,
    kind: EntityKind,
    value: String,
    context: &str,
) {
    let key = (kind, value.clone());
    if seen.insert(key) {
        out.push(Entity {
            kind,
            value,
            context: context.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn extracts_port_cve_url_ip() {
        let input = lines(&[
            "22/tcp open ssh",
            "Vulnerable to CVE-2021-44228",
            "See https://example.com/advisory for detail",
            "Host 10.0.0.5 responded",
        ]);
        let entities = extract(&input);
        assert!(entities.iter().any(|e| e.kind == EntityKind::Port && e.value == "22"));
        assert!(entities.iter().any(|e| e.kind == EntityKind::Cve && e.value == "CVE-2021-44228"));
        assert!(entities
            .iter()
            .any(|e| e.kind == EntityKind::Url && e.value == "https://example.com/advisory"));
        assert!(entities.iter().any(|e| e.kind == EntityKind::Ip && e.value == "10.0.0.5"));
    }

    #[test]
    fn drops_loopback_and_unspecified_addresses() {
        let input = lines(&["bound 127.0.0.1", "listening on 0.0.0.0"]);
        let entities = extract(&input);
        assert!(entities.iter().all(|e| e.kind != EntityKind::Ip));
    }

    #[test]
    fn dedupes_by_kind_and_value_preserving_first_context() {
        let input = lines(&["seen at 10.0.0.5 first", "seen again 10.0.0.5 second"]);
        let entities = extract(&input);
        let ips: Vec<_> = entities.iter().filter(|e| e.kind == EntityKind::Ip).collect();
        assert_eq!(ips.len(), 1);
        assert_eq!(ips[0].context, "seen at 10.0.0.5 first");
    }

    #[test]
    fn rejects_invalid_octets() {
        let input = lines(&["not an ip 999.1.1.1 here"]);
        let entities = extract(&input);
        assert!(entities.iter().all(|e| e.kind != EntityKind::Ip));
    }
}
