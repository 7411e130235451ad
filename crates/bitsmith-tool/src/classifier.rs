//! Line classification for tool output
//!
//! A classifiable line looks like `WARNING: [Synth 8-327] some text [/path/f.v:12]`.
//! Anything else is log noise and yields `None`.

use bitsmith_core::{Location, Message, MessagePolicy, Severity};

/// Prefixes in the order they are tried
const PREFIXES: [Severity; 4] = [
    Severity::Info,
    Severity::Warning,
    Severity::CriticalWarning,
    Severity::Error,
];

/// Classify one line of output under `policy`.
pub fn classify(line: &str, policy: &MessagePolicy) -> Option<Message> {
    let line = line.trim_end_matches(['\r', '\n']);

    let (intrinsic, rest) = PREFIXES
        .iter()
        .find_map(|sev| line.strip_prefix(sev.prefix()).map(|rest| (*sev, rest)))?;

    let open = rest.find('[')?;
    let close = open + rest[open..].find(']')?;
    let code = rest[open + 1..close].to_string();

    let after = &rest[close + 1..];
    let body = after.strip_prefix(' ').unwrap_or(after);
    let (text, location) = split_location(body);

    let severity = policy.effective_severity(&code, intrinsic);
    let suppressed = policy.is_suppressed(&code, severity);

    Some(Message {
        severity,
        intrinsic,
        code,
        text,
        location,
        suppressed,
    })
}

/// Format a message back into the tool's own line format
pub fn format_message(severity: Severity, code: &str, text: &str) -> String {
    format!("{}[{}] {}", severity.prefix(), code, text)
}

/// Strip a trailing `[path:line]` fragment from a message body.
///
/// Only the last bracketed fragment is considered, and it must contain a ':'
/// followed by a digit. Bodies that happen to end in such text are misread as
/// locations; downstream rendering relies on this exact behaviour.
fn split_location(body: &str) -> (String, Option<Location>) {
    let no_location = || (body.to_string(), None);

    let trimmed = body.trim_end();
    let Some(inner_end) = trimmed.len().checked_sub(1) else {
        return no_location();
    };
    if !trimmed.ends_with(']') {
        return no_location();
    }
    let Some(open) = trimmed.rfind('[') else {
        return no_location();
    };

    let fragment = &trimmed[open + 1..inner_end];
    let Some((path, line)) = fragment.rsplit_once(':') else {
        return no_location();
    };
    let digits: String = line.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return no_location();
    }
    // Out-of-range line numbers still mark a location
    let line = digits.parse::<u32>().unwrap_or(u32::MAX);

    let text = trimmed[..open].trim_end().to_string();
    (
        text,
        Some(Location {
            path: path.to_string(),
            line,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> MessagePolicy {
        MessagePolicy::new()
    }

    #[test]
    fn test_plain_lines_are_not_messages() {
        assert!(classify("Starting synth_design", &policy()).is_none());
        assert!(classify("", &policy()).is_none());
        assert!(classify("info: [X 1-1] lowercase", &policy()).is_none());
        assert!(classify("WARNING: no code here", &policy()).is_none());
    }

    #[test]
    fn test_prefixes() {
        let cases = [
            ("INFO: [Common 17-206] Exiting", Severity::Info),
            ("WARNING: [Synth 8-327] inferring latch", Severity::Warning),
            ("CRITICAL WARNING: [Vivado 12-1411] port", Severity::CriticalWarning),
            ("ERROR: [Synth 8-439] module not found", Severity::Error),
        ];
        for (line, expected) in cases {
            let msg = classify(line, &policy()).unwrap();
            assert_eq!(msg.intrinsic, expected, "{}", line);
            assert_eq!(msg.severity, expected);
        }
    }

    #[test]
    fn test_code_and_body() {
        let msg = classify("WARNING: [Synth 8-327] inferring latch for variable 'q'\r\n", &policy())
            .unwrap();
        assert_eq!(msg.code, "Synth 8-327");
        assert_eq!(msg.text, "inferring latch for variable 'q'");
        assert!(msg.location.is_none());
    }

    #[test]
    fn test_huge_line_number_is_still_a_location() {
        let msg = classify("ERROR: [Synth 8-439] bad [/p/f.v:99999999999]", &policy()).unwrap();
        assert_eq!(msg.text, "bad");
        let loc = msg.location.unwrap();
        assert_eq!(loc.path, "/p/f.v");
        assert_eq!(loc.line, u32::MAX);

        let msg = classify("ERROR: [Synth 8-439] bad [/p/f.v:x1]", &policy()).unwrap();
        assert!(msg.location.is_none());
    }

    #[test]
    fn test_location_is_stripped() {
        let msg = classify(
            "ERROR: [Synth 8-439] module 'foo' not found [/home/me/proj/sources/hdl/top.vhd:42]",
            &policy(),
        )
        .unwrap();
        assert_eq!(msg.text, "module 'foo' not found");
        let loc = msg.location.unwrap();
        assert_eq!(loc.path, "/home/me/proj/sources/hdl/top.vhd");
        assert_eq!(loc.line, 42);
    }

    #[test]
    fn test_bracket_without_line_number_is_kept() {
        let msg = classify("INFO: [IP_Flow 19-234] Refreshing [ip_catalog]", &policy()).unwrap();
        assert_eq!(msg.text, "Refreshing [ip_catalog]");
        assert!(msg.location.is_none());

        let msg = classify("INFO: [X 1-1] value [a:b]", &policy()).unwrap();
        assert!(msg.location.is_none());
    }

    #[test]
    fn test_reclassify_preserves_code_and_text() {
        let lines = [
            "WARNING: [Synth 8-3331] design top has unconnected port clk",
            "INFO: [Project 1-571] Translating synthesized netlist",
            "ERROR: [Place 30-58] IO placement is infeasible [/p/pins.xdc:3]",
            "CRITICAL WARNING: [Common 17-55] 'set_property' expects at least one object",
        ];
        for line in lines {
            let first = classify(line, &policy()).unwrap();
            let again =
                classify(&format_message(first.intrinsic, &first.code, &first.text), &policy())
                    .unwrap();
            assert_eq!(again.code, first.code);
            assert_eq!(again.text, first.text);
            assert!(again.location.is_none());
        }
    }

    #[test]
    fn test_override_and_suppression() {
        let policy = MessagePolicy::new()
            .with_override("Synth 8-327", Severity::Error)
            .with_suppression("Synth 8-3331");

        let promoted = classify("WARNING: [Synth 8-327] latch", &policy).unwrap();
        assert_eq!(promoted.severity, Severity::Error);
        assert_eq!(promoted.intrinsic, Severity::Warning);
        assert!(!promoted.suppressed);

        let hidden = classify("WARNING: [Synth 8-3331] unconnected", &policy).unwrap();
        assert!(hidden.suppressed);
    }

    #[test]
    fn test_threshold_follows_nesting() {
        let policy = MessagePolicy::new().with_min_severity(Severity::Info, Severity::Warning);
        let line = "INFO: [IP_Flow 19-1686] Generating 'Synthesis' target";
        assert!(!classify(line, &policy).unwrap().suppressed);

        let _nested = policy.enter_nested();
        assert!(classify(line, &policy).unwrap().suppressed);
    }
}
