//! Component A: compress a line sequence per a named truncation strategy.

use crate::model::{OutputSpec, TruncationStrategy};

/// Compress `lines` according to `spec`, resolving zero fields to defaults.
pub fn truncate(lines: &[String], spec: &OutputSpec) -> String {
    let (head, tail, body_bytes) = spec.resolved();
    match spec.strategy {
        TruncationStrategy::HeadTail => head_tail(lines, head, tail),
        TruncationStrategy::HttpResponse => http_response(lines, body_bytes),
    }
}

fn head_tail(lines: &[String], head: usize, tail: usize) -> String {
    if lines.len() <= head + tail {
        return lines.join("\n");
    }

    let omitted = lines.len() - head - tail;
    let mut out = String::new();
    out.push_str(&lines[..head].join("\n"));
    out.push_str("\n\n");
    out.push_str(&format!("{omitted} lines omitted"));
    out.push_str("\n\n");
    out.push_str(&lines[lines.len() - tail..].join("\n"));
    out
}

fn http_response(lines: &[String], body_bytes: usize) -> String {
    let mut out = String::new();
    let mut boundary = None;
    for (i, line) in lines.iter().enumerate() {
        out.push_str(line);
        out.push('\n');
        if line.trim().is_empty() {
            boundary = Some(i);
            break;
        }
    }

    let Some(boundary) = boundary else {
        // No header/body boundary found: no body is emitted, header-only.
        return out.trim_end_matches('\n').to_string();
    };

    let mut remaining = body_bytes;
    let mut filled = false;
    for line in &lines[boundary + 1..] {
        let needed = line.len() + 1; // + newline
        if needed <= remaining {
            out.push_str(line);
            out.push('\n');
            remaining -= needed;
        } else {
            if remaining > 0 {
                let cut = line.as_bytes()[..remaining.min(line.len())].to_vec();
                out.push_str(&String::from_utf8_lossy(&cut));
            }
            filled = true;
            break;
        }
        if remaining == 0 {
            filled = true;
            break;
        }
    }

    if filled {
        out.push_str("\n... output truncated ...");
    }

    out.trim_end_matches('\n').to_string()
}
