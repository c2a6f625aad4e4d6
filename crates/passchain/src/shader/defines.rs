//! Source preparation: define substitution, version header, diagnostics.

use std::fmt::Write as _;

/// Value substituted for one `#define`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Define {
    pub key: String,
    pub value: String,
    pub suffix: String,
}

impl Define {
    pub fn new(key: impl Into<String>, value: impl ToString, suffix: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.to_string(),
            suffix: suffix.into(),
        }
    }

    fn replacement(&self) -> String {
        format!("{}{}", self.value, self.suffix)
    }
}

/// Replaces the remainder of the first `#define KEY ` line for every define.
///
/// ```text
/// #define DATA_SIZE 1u      + Define::new("DATA_SIZE", 10, "u")
/// #define DATA_SIZE 10u
/// ```
///
/// Keys that do not occur in the source are ignored.
pub fn replace_defines(source: &str, defines: &[Define]) -> String {
    let mut result = source.to_owned();
    for define in defines {
        let marker = format!("#define {} ", define.key);
        let Some(start) = result.find(&marker) else {
            continue;
        };
        let value_start = start + marker.len();
        let value_end = result[value_start..]
            .find('\n')
            .map_or(result.len(), |offset| value_start + offset);
        let value_end = if result[..value_end].ends_with('\r') {
            value_end - 1
        } else {
            value_end
        };
        result.replace_range(value_start..value_end, &define.replacement());
    }
    result
}

/// Prepends `#version 450` unless the source already declares a version.
pub fn ensure_version(source: &str) -> String {
    if source.trim_start().starts_with("#version") {
        source.to_owned()
    } else {
        format!("#version 450\n{source}")
    }
}

/// Prefixes every line with its 1-based number, right-aligned to
/// `ceil(log10(line_count))` columns.
pub fn add_line_numbers(source: &str) -> String {
    let lines: Vec<&str> = source.split('\n').collect();
    let padding = (lines.len() as f64).log10().ceil() as usize;
    let mut numbered = String::with_capacity(source.len() + lines.len() * (padding + 2));
    for (index, line) in lines.iter().enumerate() {
        if index > 0 {
            numbered.push('\n');
        }
        let _ = write!(numbered, "{:>padding$}: {line}", index + 1);
    }
    numbered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_only_the_value_of_the_first_match() {
        let source = "#define DATA_SIZE 1u\nvec4 data[DATA_SIZE];\n#define DATA_SIZE 2u\n";
        let replaced = replace_defines(source, &[Define::new("DATA_SIZE", 10, "u")]);
        assert_eq!(
            replaced,
            "#define DATA_SIZE 10u\nvec4 data[DATA_SIZE];\n#define DATA_SIZE 2u\n"
        );
    }

    #[test]
    fn key_must_be_followed_by_a_space() {
        let source = "#define COLOR_LOCATION_X 3\n#define COLOR_LOCATION 0\n";
        let replaced = replace_defines(source, &[Define::new("COLOR_LOCATION", 2, "")]);
        assert_eq!(replaced, "#define COLOR_LOCATION_X 3\n#define COLOR_LOCATION 2\n");
    }

    #[test]
    fn missing_keys_leave_source_untouched() {
        let source = "void main() {}";
        assert_eq!(replace_defines(source, &[Define::new("NOPE", 1, "")]), source);
    }

    #[test]
    fn version_header_is_added_once() {
        assert_eq!(ensure_version("void main() {}"), "#version 450\nvoid main() {}");
        assert_eq!(ensure_version("#version 450\nvoid main() {}"), "#version 450\nvoid main() {}");
    }

    #[test]
    fn line_numbers_are_padded() {
        let source = (1..=12).map(|n| format!("l{n}")).collect::<Vec<_>>().join("\n");
        let numbered = add_line_numbers(&source);
        let lines: Vec<&str> = numbered.lines().collect();
        assert_eq!(lines[0], " 1: l1");
        assert_eq!(lines[11], "12: l12");
    }
}
