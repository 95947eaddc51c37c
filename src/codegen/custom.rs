//! Hand-written regions in generated files
//!
//! Code between `// modelkit:custom-begin <name>` and
//! `// modelkit:custom-end <name>` survives regeneration. Regions whose name
//! disappears from the new output are appended at the end of the file.

use indexmap::IndexMap;

pub const BEGIN_MARKER: &str = "// modelkit:custom-begin";
pub const END_MARKER: &str = "// modelkit:custom-end";

const ORPHAN_HEADER: &str = "// Regions below no longer match generated code";

/// Empty region with the given name, indented like the surrounding code
pub fn region(name: &str, indent: &str) -> String {
    format!("{indent}{BEGIN_MARKER} {name}\n{indent}{END_MARKER} {name}\n")
}

fn begin_name(line: &str) -> Option<&str> {
    line.trim_start().strip_prefix(BEGIN_MARKER).map(str::trim)
}

fn is_end(line: &str, name: &str) -> bool {
    line.trim_start()
        .strip_prefix(END_MARKER)
        .is_some_and(|rest| rest.trim() == name)
}

/// Bodies of every region in a file, keyed by name. An unterminated region
/// runs to the end of the file.
pub fn extract_regions(source: &str) -> IndexMap<String, String> {
    let mut regions = IndexMap::new();
    let mut lines = source.lines();
    while let Some(line) = lines.next() {
        let Some(name) = begin_name(line) else {
            continue;
        };
        let mut body = String::new();
        for inner in lines.by_ref() {
            if is_end(inner, name) {
                break;
            }
            body.push_str(inner);
            body.push('\n');
        }
        regions.insert(name.to_string(), body);
    }
    regions
}

/// Fill the regions of freshly generated code with the bodies found in the
/// previous version of the file
pub fn merge(generated: &str, previous: &str) -> String {
    let mut preserved = extract_regions(previous);
    let mut output = String::with_capacity(generated.len() + previous.len() / 4);

    let mut lines = generated.lines();
    while let Some(line) = lines.next() {
        output.push_str(line);
        output.push('\n');
        let Some(name) = begin_name(line) else {
            continue;
        };
        let body = preserved.shift_remove(name);

        // Drop the generated body, keep the end marker
        let mut end = None;
        let mut generated_body = String::new();
        for inner in lines.by_ref() {
            if is_end(inner, name) {
                end = Some(inner);
                break;
            }
            generated_body.push_str(inner);
            generated_body.push('\n');
        }
        output.push_str(body.as_deref().unwrap_or(&generated_body));
        if let Some(end) = end {
            output.push_str(end);
            output.push('\n');
        }
    }

    let orphans: Vec<_> = preserved.into_iter().filter(|(_, body)| !body.trim().is_empty()).collect();
    if !orphans.is_empty() {
        output.push('\n');
        output.push_str(ORPHAN_HEADER);
        output.push('\n');
        for (name, body) in orphans {
            output.push_str(&format!("{BEGIN_MARKER} {name}\n"));
            output.push_str(&body);
            output.push_str(&format!("{END_MARKER} {name}\n"));
        }
    }

    output
}
