/// Fence/attribute language hint for a resource name.
///
/// Well-known file names win over extensions; unknown names give an empty
/// hint.
pub fn language_hint(file_name: &str) -> &'static str {
    let lower = file_name.to_ascii_lowercase();

    match lower.as_str() {
        "dockerfile" | "containerfile" => return "dockerfile",
        "makefile" | "gnumakefile" => return "makefile",
        "cmakelists.txt" => return "cmake",
        "cargo.lock" | "pipfile" => return "toml",
        _ => {}
    }

    let Some((stem, ext)) = lower.rsplit_once('.') else {
        return "";
    };
    // ".gitignore" has no extension, only a leading dot
    if stem.is_empty() {
        return match ext {
            "gitignore" | "dockerignore" | "env" => "ini",
            "bashrc" | "zshrc" | "profile" => "bash",
            _ => "",
        };
    }

    match ext {
        // Source code
        "rs" => "rust",
        "py" | "pyi" => "python",
        "js" | "mjs" | "cjs" => "javascript",
        "jsx" => "jsx",
        "ts" | "mts" | "cts" => "typescript",
        "tsx" => "tsx",
        "java" => "java",
        "kt" | "kts" => "kotlin",
        "swift" => "swift",
        "go" => "go",
        "c" | "h" => "c",
        "cpp" | "cc" | "cxx" | "hpp" | "hh" | "hxx" => "cpp",
        "cs" => "csharp",
        "php" => "php",
        "rb" => "ruby",
        "scala" => "scala",
        "dart" => "dart",
        "lua" => "lua",
        "r" => "r",
        "zig" => "zig",
        "hs" => "haskell",
        "ex" | "exs" => "elixir",
        "clj" => "clojure",

        // Web
        "html" | "htm" => "html",
        "css" => "css",
        "scss" => "scss",
        "sass" => "sass",
        "less" => "less",
        "vue" => "vue",
        "svelte" => "svelte",

        // Config and data
        "json" | "jsonc" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "xml" | "plist" | "csproj" => "xml",
        "ini" | "cfg" | "conf" | "properties" => "ini",
        "graphql" | "gql" => "graphql",
        "proto" => "protobuf",
        "sql" => "sql",
        "csv" => "csv",

        // Documentation
        "md" | "markdown" => "markdown",
        "rst" => "rst",
        "tex" => "latex",
        "adoc" => "asciidoc",

        // Scripts
        "sh" | "bash" | "zsh" => "bash",
        "fish" => "fish",
        "ps1" => "powershell",
        "bat" | "cmd" => "bat",
        "cmake" => "cmake",

        "diff" | "patch" => "diff",
        "txt" | "log" => "text",
        _ => "",
    }
}
