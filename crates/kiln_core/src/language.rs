//! Language profile catalog.
//!
//! Every supported language has exactly one [`LanguageProfile`], built once
//! and read-only afterwards. Backends stay generic against the profile: the
//! container backend only ever renders the profile's templates, and the
//! in-process backend only inspects the profile's source transform.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::SubmitError;

/// Supported language tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// WebAssembly text format, run in-process
    Wat,
    /// AssemblyScript, needs a source transform before it can run in-process
    AssemblyScript,
    /// Python 3
    Python,
    /// JavaScript on Node.js
    JavaScript,
    /// Ruby
    Ruby,
    /// Bash
    Bash,
    /// C (gcc)
    C,
    /// C++ (g++)
    Cpp,
    /// Go
    Go,
    /// Rust (rustc)
    Rust,
    /// Java (javac + java)
    Java,
}

impl Language {
    /// All languages, in catalog order
    pub const ALL: [Language; 11] = [
        Language::Wat,
        Language::AssemblyScript,
        Language::Python,
        Language::JavaScript,
        Language::Ruby,
        Language::Bash,
        Language::C,
        Language::Cpp,
        Language::Go,
        Language::Rust,
        Language::Java,
    ];

    /// Canonical tag
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Wat => "wat",
            Self::AssemblyScript => "assemblyscript",
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::Ruby => "ruby",
            Self::Bash => "bash",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::Go => "go",
            Self::Rust => "rust",
            Self::Java => "java",
        }
    }

    /// Profile for this language
    #[must_use]
    pub fn profile(&self) -> &'static LanguageProfile {
        // every variant is registered in CATALOG
        &CATALOG[self]
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Language {
    type Err = SubmitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let language = match s.trim().to_ascii_lowercase().as_str() {
            "wat" | "wast" => Self::Wat,
            "assemblyscript" | "as" => Self::AssemblyScript,
            "python" | "py" | "python3" => Self::Python,
            "javascript" | "js" | "node" => Self::JavaScript,
            "ruby" | "rb" => Self::Ruby,
            "bash" | "sh" | "shell" => Self::Bash,
            "c" => Self::C,
            "cpp" | "c++" | "cxx" | "cc" => Self::Cpp,
            "go" | "golang" => Self::Go,
            "rust" | "rs" => Self::Rust,
            "java" => Self::Java,
            other => {
                return Err(SubmitError::UnsupportedLanguage {
                    language: other.to_string(),
                });
            }
        };
        Ok(language)
    }
}

/// Source transform an in-process language needs before execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceTransform {
    /// AssemblyScript to WebAssembly
    AssemblyScript,
}

/// Which isolation backend runs a language
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum IsolationBackend {
    /// Restricted in-process interpreter
    InProcess {
        /// Transform required before the interpreter can run the source
        transform: Option<SourceTransform>,
    },
    /// Ephemeral container built from an image
    Container {
        /// Image reference
        image: &'static str,
    },
}

impl IsolationBackend {
    /// Discriminant used for backend selection
    #[must_use]
    pub const fn kind(&self) -> IsolationKind {
        match self {
            Self::InProcess { .. } => IsolationKind::InProcess,
            Self::Container { .. } => IsolationKind::Container,
        }
    }
}

/// Backend discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IsolationKind {
    /// In-process interpreter
    InProcess,
    /// Ephemeral container
    Container,
}

impl std::fmt::Display for IsolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InProcess => f.write_str("in-process"),
            Self::Container => f.write_str("container"),
        }
    }
}

/// Rule for the source file name inside the workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FileNaming {
    /// A fixed file name
    Fixed(&'static str),
    /// The file name must match the type the source declares.
    ///
    /// The type name is a fixed convention, never inferred from the source.
    TypeName {
        /// Conventional type name
        type_name: &'static str,
        /// File extension
        extension: &'static str,
    },
}

impl FileNaming {
    /// File name the source is materialized under
    #[must_use]
    pub fn file_name(&self) -> String {
        match self {
            Self::Fixed(name) => (*name).to_string(),
            Self::TypeName {
                type_name,
                extension,
            } => format!("{type_name}.{extension}"),
        }
    }

    /// File name without extension
    #[must_use]
    pub fn stem(&self) -> &'static str {
        match self {
            Self::Fixed(name) => name.split('.').next().unwrap_or(*name),
            Self::TypeName { type_name, .. } => *type_name,
        }
    }
}

/// How a language is built and run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LanguageProfile {
    /// Language tag
    pub language: Language,
    /// Isolation backend and its runtime reference
    pub backend: IsolationBackend,
    /// Source file naming rule
    pub naming: FileNaming,
    /// Compile command template, for compiled languages
    pub compile: Option<&'static str>,
    /// Run command template.
    ///
    /// For in-process languages this names the guest's entry export.
    pub run: &'static str,
    /// Extra environment for the unit
    pub env: &'static [(&'static str, &'static str)],
}

impl LanguageProfile {
    /// Isolation backend kind
    #[must_use]
    pub fn isolation(&self) -> IsolationKind {
        self.backend.kind()
    }

    /// Image reference for container profiles
    #[must_use]
    pub fn image(&self) -> Option<&'static str> {
        match self.backend {
            IsolationBackend::Container { image } => Some(image),
            IsolationBackend::InProcess { .. } => None,
        }
    }

    /// File name the source is materialized under
    #[must_use]
    pub fn file_name(&self) -> String {
        self.naming.file_name()
    }

    /// Render the entry command for a source living under `dir`.
    ///
    /// Compiled languages chain compile and run with `&&`, so a failed
    /// compile short-circuits with its exit code.
    #[must_use]
    pub fn entry_command(&self, dir: &str) -> String {
        let file = format!("{}/{}", dir.trim_end_matches('/'), self.file_name());
        let render = |template: &str| {
            template
                .replace("{file}", &file)
                .replace("{dir}", dir)
                .replace("{stem}", self.naming.stem())
        };
        match self.compile {
            Some(compile) => format!("{} && {}", render(compile), render(self.run)),
            None => render(self.run),
        }
    }
}

fn build_profile(language: Language) -> LanguageProfile {
    let container = |image| IsolationBackend::Container { image };
    let (backend, naming, compile, run, env): (
        IsolationBackend,
        FileNaming,
        Option<&'static str>,
        &'static str,
        &'static [(&'static str, &'static str)],
    ) = match language {
        Language::Wat => (
            IsolationBackend::InProcess { transform: None },
            FileNaming::Fixed("main.wat"),
            None,
            "main",
            &[],
        ),
        Language::AssemblyScript => (
            IsolationBackend::InProcess {
                transform: Some(SourceTransform::AssemblyScript),
            },
            FileNaming::Fixed("main.ts"),
            None,
            "main",
            &[],
        ),
        Language::Python => (
            container("python:3.12-slim"),
            FileNaming::Fixed("main.py"),
            None,
            "python3 -u {file}",
            &[("PYTHONDONTWRITEBYTECODE", "1")],
        ),
        Language::JavaScript => (
            container("node:20-slim"),
            FileNaming::Fixed("main.js"),
            None,
            "node {file}",
            &[],
        ),
        Language::Ruby => (
            container("ruby:3.3-slim"),
            FileNaming::Fixed("main.rb"),
            None,
            "ruby {file}",
            &[],
        ),
        Language::Bash => (
            container("bash:5.2"),
            FileNaming::Fixed("main.sh"),
            None,
            "bash {file}",
            &[],
        ),
        Language::C => (
            container("gcc:13"),
            FileNaming::Fixed("main.c"),
            Some("gcc -O2 -o /tmp/main {file} -lm"),
            "/tmp/main",
            &[],
        ),
        Language::Cpp => (
            container("gcc:13"),
            FileNaming::Fixed("main.cpp"),
            Some("g++ -O2 -std=c++17 -o /tmp/main {file}"),
            "/tmp/main",
            &[],
        ),
        Language::Go => (
            container("golang:1.22"),
            FileNaming::Fixed("main.go"),
            Some("go build -o /tmp/main {file}"),
            "/tmp/main",
            &[
                ("GOCACHE", "/tmp/.gocache"),
                ("GOPATH", "/tmp/go"),
                ("CGO_ENABLED", "0"),
            ],
        ),
        Language::Rust => (
            container("rust:1.79-slim"),
            FileNaming::Fixed("main.rs"),
            Some("rustc -O -o /tmp/main {file}"),
            "/tmp/main",
            &[],
        ),
        Language::Java => (
            container("eclipse-temurin:21-jdk"),
            FileNaming::TypeName {
                type_name: "Main",
                extension: "java",
            },
            Some("javac -d /tmp {file}"),
            "java -cp /tmp {stem}",
            &[("JAVA_TOOL_OPTIONS", "-Dfile.encoding=UTF-8 -Xss1m")],
        ),
    };

    LanguageProfile {
        language,
        backend,
        naming,
        compile,
        run,
        env,
    }
}

static CATALOG: Lazy<IndexMap<Language, LanguageProfile>> = Lazy::new(|| {
    Language::ALL
        .into_iter()
        .map(|language| (language, build_profile(language)))
        .collect()
});

/// Read-only view of the language catalog
pub struct Catalog;

impl Catalog {
    /// All profiles in catalog order
    pub fn profiles() -> impl Iterator<Item = &'static LanguageProfile> {
        CATALOG.values()
    }
}
