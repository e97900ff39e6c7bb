//! Flat, row-per-step routine format.
//!
//! ```text
//! # comment
//! *, x=0.25, y=0.5, frequency=1, skip=false, adjust=true
//!     jump, direction=left
//!     wait, duration=0.5
//! ```
//!
//! A row starting with `*` is a waypoint; any other row is a directive
//! attached to the closest waypoint above it. Values holding a comma, a
//! quote, a backslash, a line break or edge whitespace are written in double
//! quotes with `\"`, `\\`, `\n` and `\r` escapes.

use std::borrow::Cow;

use crate::error::FormatError;
use crate::kernel::state::Point;

use super::{Directive, Params, Step, Waypoint, WaypointOptions};

const WAYPOINT_MARKER: &str = "*";

/// Parse routine text into top-level waypoints with their directives folded in.
pub fn parse(text: &str) -> Result<Vec<Step>, FormatError> {
    let mut steps: Vec<Step> = Vec::new();

    for (i, raw) in text.lines().enumerate() {
        let line = i + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        match parse_row(line, trimmed)? {
            Step::Waypoint(w) => steps.push(Step::Waypoint(w)),
            Step::Directive(d) => match steps.last_mut() {
                Some(Step::Waypoint(parent)) => parent.directives.push(d),
                _ => {
                    return Err(FormatError::OrphanDirective { line, name: d.kind });
                }
            },
        }
    }

    Ok(steps)
}

/// Parse a single non-empty row.
pub fn parse_row(line: usize, row: &str) -> Result<Step, FormatError> {
    let fields = split_fields(line, row)?;
    let head = fields.first().copied().unwrap_or_default();
    if head.is_empty() {
        return Err(syntax(line, "missing step name"));
    }

    let mut params = Params::new();
    for field in fields.into_iter().skip(1).filter(|f| !f.is_empty()) {
        let (key, value) = field
            .split_once('=')
            .ok_or_else(|| syntax(line, format!("expected key=value, got '{}'", field)))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(syntax(line, format!("empty key in '{}'", field)));
        }
        params.insert(key, unquote(line, value.trim())?);
    }

    if head == WAYPOINT_MARKER {
        parse_waypoint(line, &params).map(Step::Waypoint)
    } else {
        let directive = Directive::new(head, params);
        directive.check().map_err(|e| syntax(line, e.to_string()))?;
        Ok(Step::Directive(directive))
    }
}

fn parse_waypoint(line: usize, params: &Params) -> Result<Waypoint, FormatError> {
    let mut options = WaypointOptions::default();
    let mut x = None;
    let mut y = None;

    for (key, value) in params.iter() {
        match key {
            "x" => x = Some(parse_f64(line, key, value)?),
            "y" => y = Some(parse_f64(line, key, value)?),
            "frequency" => {
                let frequency: u32 = value
                    .parse()
                    .map_err(|_| syntax(line, format!("frequency must be a positive integer, got '{}'", value)))?;
                if frequency == 0 {
                    return Err(syntax(line, "frequency must be at least 1"));
                }
                options.frequency = frequency;
            }
            "skip" => options.skip = parse_bool(line, key, value)?,
            "adjust" => options.adjust = parse_bool(line, key, value)?,
            other => return Err(syntax(line, format!("unknown waypoint option '{}'", other))),
        }
    }

    match (x, y) {
        (Some(x), Some(y)) => Ok(Waypoint::new(Point::new(x, y)).with_options(options)),
        _ => Err(syntax(line, "waypoint requires both x and y")),
    }
}

/// Render steps back into routine text. Directive steps at top level are
/// written as-is; `parse` would reject them.
pub fn render(steps: &[Step]) -> String {
    let mut out = String::new();
    for step in steps {
        match step {
            Step::Waypoint(w) => {
                out.push_str(&format!(
                    "{}, x={}, y={}, frequency={}, skip={}, adjust={}\n",
                    WAYPOINT_MARKER, w.location.x, w.location.y, w.options.frequency, w.options.skip, w.options.adjust
                ));
                for d in &w.directives {
                    out.push_str("    ");
                    out.push_str(&render_directive(d));
                    out.push('\n');
                }
            }
            Step::Directive(d) => {
                out.push_str(&render_directive(d));
                out.push('\n');
            }
        }
    }
    out
}

fn render_directive(d: &Directive) -> String {
    let mut row = d.kind.clone();
    for (k, v) in d.params.iter() {
        row.push_str(&format!(", {}={}", k, quote(v)));
    }
    row
}

fn quote(value: &str) -> Cow<'_, str> {
    let plain = value.trim() == value && !value.starts_with('"') && !value.contains([',', '"', '\\', '\n', '\r']);
    if plain {
        return Cow::Borrowed(value);
    }
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('"');
    Cow::Owned(out)
}

fn unquote(line: usize, value: &str) -> Result<String, FormatError> {
    let Some(inner) = value.strip_prefix('"') else {
        return Ok(value.to_string());
    };
    let inner = inner
        .strip_suffix('"')
        .ok_or_else(|| syntax(line, format!("text after closing quote in '{}'", value)))?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('n') => out.push('\n'),
                Some('r') => out.push('\r'),
                Some(e @ ('"' | '\\')) => out.push(e),
                _ => return Err(syntax(line, format!("bad escape in '{}'", value))),
            },
            '"' => return Err(syntax(line, format!("stray quote in '{}'", value))),
            c => out.push(c),
        }
    }
    Ok(out)
}

/// Split a row on commas outside double quotes.
fn split_fields(line: usize, row: &str) -> Result<Vec<&str>, FormatError> {
    let mut fields = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut escaped = false;
    for (i, c) in row.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            ',' if !quoted => {
                fields.push(row[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    if quoted {
        return Err(syntax(line, "unterminated quote"));
    }
    fields.push(row[start..].trim());
    Ok(fields)
}

fn parse_f64(line: usize, key: &str, value: &str) -> Result<f64, FormatError> {
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| syntax(line, format!("{} must be a finite number, got '{}'", key, value)))
}

fn parse_bool(line: usize, key: &str, value: &str) -> Result<bool, FormatError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(syntax(line, format!("{} must be true or false, got '{}'", key, value))),
    }
}

fn syntax(line: usize, message: impl Into<String>) -> FormatError {
    FormatError::Syntax {
        line,
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_fold_into_preceding_waypoint() {
        let text = "\
# patrol
*, x=0.1, y=0.2
    jump, direction=left
    Wait, duration=0.5

*, x=0.9, y=0.2, frequency=3, skip=True, adjust=true
";
        let steps = parse(text).unwrap();
        assert_eq!(steps.len(), 2);

        let first = steps[0].as_waypoint().unwrap();
        assert_eq!(first.location, Point::new(0.1, 0.2));
        assert_eq!(first.directives.len(), 2);
        assert_eq!(first.directives[1].kind, "wait");
        assert_eq!(first.directives[1].params.get("duration"), Some("0.5"));

        let second = steps[1].as_waypoint().unwrap();
        assert_eq!(second.options.frequency, 3);
        assert!(second.options.skip);
        assert!(second.options.adjust);
        assert!(second.directives.is_empty());
    }

    #[test]
    fn directive_before_any_waypoint_is_rejected() {
        let err = parse("jump, direction=left\n*, x=0, y=0\n").unwrap_err();
        match err {
            FormatError::OrphanDirective { line, name } => {
                assert_eq!(line, 1);
                assert_eq!(name, "jump");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn malformed_rows_report_their_line() {
        let err = parse("*, x=0.1, y=0.2\n*, x=abc, y=0.2\n").unwrap_err();
        assert!(matches!(err, FormatError::Syntax { line: 2, .. }));

        let err = parse("*, x=0.1\n").unwrap_err();
        assert!(matches!(err, FormatError::Syntax { line: 1, .. }));

        let err = parse("*, x=0.1, y=0.1, frequency=0\n").unwrap_err();
        assert!(matches!(err, FormatError::Syntax { line: 1, .. }));

        let err = parse("*, x=0.1, y=0.1\n    jump, direction\n").unwrap_err();
        assert!(matches!(err, FormatError::Syntax { line: 2, .. }));
    }

    #[test]
    fn rendered_routine_parses_back_identically() {
        let text = "*, x=0.25, y=0.5, frequency=2, skip=false, adjust=true\n    jump, direction=right, repetitions=2\n";
        let steps = parse(text).unwrap();
        assert_eq!(render(&steps), text);
        assert_eq!(parse(&render(&steps)).unwrap(), steps);
    }

    #[test]
    fn awkward_values_survive_a_save() {
        let text = "*, x=0.5, y=0.5\n    say, text=\"hi, there\"\n";
        let steps = parse(text).unwrap();
        let say = &steps[0].as_waypoint().unwrap().directives[0];
        assert_eq!(say.params.get("text"), Some("hi, there"));
        assert_eq!(parse(&render(&steps)).unwrap(), steps);

        let tricky = Waypoint::new(Point::new(0.1, 0.9)).with_directive(Directive::new(
            "say",
            Params::new()
                .with("text", "she said \"go\"\\now\nthen, left")
                .with("pad", "  spaced ")
                .with("lead", "\"x"),
        ));
        let steps = vec![Step::Waypoint(tricky)];
        let rendered = render(&steps);
        assert_eq!(rendered.lines().count(), 2);
        assert_eq!(parse(&rendered).unwrap(), steps);
    }

    #[test]
    fn broken_quoting_and_unusable_kinds_are_syntax_errors() {
        for row in [
            "    say, text=\"open",
            "    say, text=\"a\"b",
            "    say, text=\"bad \\q\"",
            "    say\"x\", text=1",
        ] {
            let err = parse(&format!("*, x=0, y=0\n{}\n", row)).unwrap_err();
            assert!(matches!(err, FormatError::Syntax { line: 2, .. }), "{row}: {err}");
        }
    }

    #[test]
    fn coordinates_must_be_finite() {
        for row in ["*, x=inf, y=0.5", "*, x=0.5, y=NaN", "*, x=-inf, y=0.5"] {
            let err = parse(row).unwrap_err();
            assert!(matches!(err, FormatError::Syntax { line: 1, .. }), "{row}");
        }
    }
}
