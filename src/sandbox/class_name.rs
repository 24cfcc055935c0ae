use std::sync::LazyLock;

use regex::Regex;

static PUBLIC_CLASS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"public\s+class\s+(\w+)").expect("public class pattern is valid")
});

/// Derives the class name the toolchain expects the source file to carry
///
/// This is a textual heuristic: the first `public class <Name>` wins, even if
/// it sits inside a comment or string. Returns `default` when nothing matches.
pub fn resolve_class_name<'a>(source: &'a str, default: &'a str) -> &'a str {
    PUBLIC_CLASS
        .captures(source)
        .and_then(|caps| caps.get(1))
        .map_or(default, |m| m.as_str())
}
