//! Static file-name → language classification.

use std::path::Path;

/// File name matched exactly, ahead of extension rules.
const EXACT_NAMES: &[(&str, &str)] = &[("Dockerfile", "Dockerfile")];

/// Lowercase extension (without the dot) → language name.
fn language_for_extension(ext: &str) -> Option<&'static str> {
    let lang = match ext {
        "rs" => "Rust",
        "py" | "pyw" | "pyi" => "Python",
        "js" | "mjs" | "cjs" => "JavaScript",
        "jsx" => "JavaScript (JSX)",
        "ts" | "mts" | "cts" => "TypeScript",
        "tsx" => "TypeScript (TSX)",
        "java" => "Java",
        "kt" | "kts" => "Kotlin",
        "scala" | "sc" => "Scala",
        "groovy" | "gradle" => "Groovy",
        "c" => "C",
        "h" => "C Header",
        "cc" | "cpp" | "cxx" | "c++" => "C++",
        "hh" | "hpp" | "hxx" | "h++" => "C++ Header",
        "cs" => "C#",
        "fs" | "fsx" | "fsi" => "F#",
        "vb" => "Visual Basic",
        "go" => "Go",
        "swift" => "Swift",
        "m" => "Objective-C",
        "mm" => "Objective-C++",
        "rb" => "Ruby",
        "php" => "PHP",
        "pl" | "pm" => "Perl",
        "lua" => "Lua",
        "r" => "R",
        "jl" => "Julia",
        "dart" => "Dart",
        "ex" | "exs" => "Elixir",
        "erl" | "hrl" => "Erlang",
        "hs" | "lhs" => "Haskell",
        "ml" | "mli" => "OCaml",
        "clj" | "cljs" | "cljc" | "edn" => "Clojure",
        "elm" => "Elm",
        "zig" => "Zig",
        "nim" => "Nim",
        "sol" => "Solidity",
        "sh" | "bash" | "zsh" => "Shell",
        "fish" => "Fish",
        "ps1" | "psm1" => "PowerShell",
        "bat" | "cmd" => "Batch",
        "sql" => "SQL",
        "html" | "htm" => "HTML",
        "css" => "CSS",
        "scss" | "sass" => "Sass",
        "less" => "Less",
        "vue" => "Vue",
        "svelte" => "Svelte",
        "json" => "JSON",
        "yaml" | "yml" => "YAML",
        "toml" => "TOML",
        "xml" => "XML",
        "md" | "markdown" => "Markdown",
        "rst" => "reStructuredText",
        "tex" => "TeX",
        "proto" => "Protocol Buffers",
        "graphql" | "gql" => "GraphQL",
        "tf" => "HCL",
        "cmake" => "CMake",
        "mk" => "Makefile",
        "asm" | "s" => "Assembly",
        _ => return None,
    };
    Some(lang)
}

/// Language for a file, or `None` when the name is not recognized (such files are skipped).
pub fn classify(path: &Path) -> Option<&'static str> {
    let name = path.file_name()?.to_str()?;
    if let Some((_, lang)) = EXACT_NAMES.iter().find(|(n, _)| *n == name) {
        return Some(lang);
    }
    let ext = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
    language_for_extension(&ext)
}
