//! Grammar detection and separator tables for the recursive splitter.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Source grammar with a dedicated separator hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Grammar {
    Python,
    JavaScript,
    Java,
    Go,
    Cpp,
    Rust,
    Markdown,
}

impl Grammar {
    pub const ALL: [Self; 7] = [
        Self::Python,
        Self::JavaScript,
        Self::Java,
        Self::Go,
        Self::Cpp,
        Self::Rust,
        Self::Markdown,
    ];

    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::Java => "java",
            Self::Go => "go",
            Self::Cpp => "cpp",
            Self::Rust => "rust",
            Self::Markdown => "markdown",
        }
    }

    /// Separator patterns, most structural first. Entries are regular
    /// expressions; the trailing empty entry means "split into characters".
    #[must_use]
    pub fn separators(self) -> &'static [&'static str] {
        match self {
            Self::Python => &["\nclass ", "\ndef ", "\n\tdef ", "\n\n", "\n", " ", ""],
            Self::JavaScript => &[
                "\nfunction ",
                "\nconst ",
                "\nlet ",
                "\nvar ",
                "\nclass ",
                "\nif ",
                "\nfor ",
                "\nwhile ",
                "\nswitch ",
                "\ncase ",
                "\ndefault ",
                "\n\n",
                "\n",
                " ",
                "",
            ],
            Self::Java => &[
                "\nclass ",
                "\npublic ",
                "\nprotected ",
                "\nprivate ",
                "\nstatic ",
                "\nif ",
                "\nfor ",
                "\nwhile ",
                "\nswitch ",
                "\ncase ",
                "\n\n",
                "\n",
                " ",
                "",
            ],
            Self::Go => &[
                "\nfunc ",
                "\nvar ",
                "\nconst ",
                "\ntype ",
                "\nif ",
                "\nfor ",
                "\nswitch ",
                "\ncase ",
                "\n\n",
                "\n",
                " ",
                "",
            ],
            Self::Cpp => &[
                "\nclass ",
                "\nvoid ",
                "\nint ",
                "\nfloat ",
                "\ndouble ",
                "\nif ",
                "\nfor ",
                "\nwhile ",
                "\nswitch ",
                "\ncase ",
                "\n\n",
                "\n",
                " ",
                "",
            ],
            Self::Rust => &[
                "\nfn ",
                "\nconst ",
                "\nlet ",
                "\nif ",
                "\nwhile ",
                "\nfor ",
                "\nloop ",
                "\nmatch ",
                "\n\n",
                "\n",
                " ",
                "",
            ],
            Self::Markdown => &[
                "\n#{1,6} ",
                "```\n",
                "\n\\*\\*\\*+\n",
                "\n---+\n",
                "\n___+\n",
                "\n\n",
                "\n",
                " ",
                "",
            ],
        }
    }
}

impl std::fmt::Display for Grammar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Separators used when no grammar matches the file extension.
pub const GENERIC_SEPARATORS: &[&str] = &["\n\n", "\n", " ", ""];

/// Detect the splitter grammar from a file extension.
#[must_use]
pub fn detect_grammar(path: &Path) -> Option<Grammar> {
    let ext = path.extension()?.to_str()?;
    match ext.to_ascii_lowercase().as_str() {
        "py" => Some(Grammar::Python),
        "js" | "jsx" | "ts" | "tsx" | "mjs" | "cjs" => Some(Grammar::JavaScript),
        "java" => Some(Grammar::Java),
        "go" => Some(Grammar::Go),
        "c" | "h" | "cc" | "cpp" | "hpp" => Some(Grammar::Cpp),
        "rs" => Some(Grammar::Rust),
        "md" | "markdown" => Some(Grammar::Markdown),
        _ => None,
    }
}
