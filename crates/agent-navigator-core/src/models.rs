//! Catalog data model.
//!
//! An [`AgentRecord`] is one indexed example project. The enumerated fields
//! (`category`, `complexity`, `design_pattern`, `frameworks`, `llm_providers`)
//! are closed vocabularies. Every vocabulary deserializes leniently: values
//! outside the vocabulary are coerced to the type's default instead of failing,
//! so hand-edited JSON files and free-form LLM output both land in a valid
//! state.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A closed set of lowercase labels with a default for unrecognised input.
pub trait Vocabulary: Sized + Copy + PartialEq + Default + 'static {
    /// Every member, in declaration order.
    fn all() -> &'static [Self];

    /// The canonical wire label.
    fn as_str(&self) -> &'static str;

    /// Exact lookup after normalising case, whitespace and separators.
    fn parse(value: &str) -> Option<Self> {
        let key = normalize_label(value);
        Self::all().iter().copied().find(|v| v.as_str() == key)
    }

    /// Lenient conversion: unknown labels become the default member.
    fn coerce(value: &str) -> Self {
        Self::parse(value).unwrap_or_default()
    }
}

/// Lowercases, trims, and maps `-` and spaces to `_` so that
/// `"Multi-Agent"` and `"semantic kernel"` hit their vocabulary labels.
pub fn normalize_label(value: &str) -> String {
    value
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == '-' || c == ' ' { '_' } else { c })
        .collect()
}

/// Parses a list of labels into a de-duplicated tag set.
///
/// Unknown labels are dropped. An empty result becomes `[T::default()]` so
/// every record carries at least one tag.
pub fn tag_set<T, I, S>(values: I) -> Vec<T>
where
    T: Vocabulary,
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<T> = Vec::new();
    for value in values {
        if let Some(v) = T::parse(value.as_ref()) {
            if !out.contains(&v) {
                out.push(v);
            }
        }
    }
    if out.is_empty() {
        out.push(T::default());
    }
    out
}

macro_rules! vocabulary {
    (
        $(#[$meta:meta])*
        pub enum $name:ident (default = $default:ident) {
            $($variant:ident => $label:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum $name {
            $($variant),+
        }

        impl Vocabulary for $name {
            fn all() -> &'static [Self] {
                &[$($name::$variant),+]
            }

            fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                $name::$default
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = Option::<String>::deserialize(deserializer)?;
                Ok(raw.map(|r| <$name as Vocabulary>::coerce(&r)).unwrap_or_default())
            }
        }
    };
}

vocabulary! {
    /// What kind of application the project is.
    pub enum Category (default = Other) {
        Rag => "rag",
        Chatbot => "chatbot",
        Agent => "agent",
        MultiAgent => "multi_agent",
        Automation => "automation",
        Search => "search",
        Vision => "vision",
        Voice => "voice",
        Coding => "coding",
        Finance => "finance",
        Research => "research",
        Other => "other",
    }
}

vocabulary! {
    /// How much prior experience the project assumes.
    pub enum Complexity (default = Intermediate) {
        Beginner => "beginner",
        Intermediate => "intermediate",
        Advanced => "advanced",
    }
}

vocabulary! {
    /// Orchestration framework used by the project.
    pub enum Framework (default = Other) {
        Langchain => "langchain",
        Llamaindex => "llamaindex",
        Crewai => "crewai",
        Autogen => "autogen",
        Phidata => "phidata",
        Dspy => "dspy",
        Haystack => "haystack",
        SemanticKernel => "semantic_kernel",
        RawApi => "raw_api",
        Other => "other",
    }
}

vocabulary! {
    /// Hosted or local model provider.
    pub enum LlmProvider (default = Other) {
        Openai => "openai",
        Anthropic => "anthropic",
        Google => "google",
        Cohere => "cohere",
        Mistral => "mistral",
        Ollama => "ollama",
        Huggingface => "huggingface",
        Local => "local",
        Other => "other",
    }
}

vocabulary! {
    /// Dominant agent design pattern.
    pub enum DesignPattern (default = Other) {
        Rag => "rag",
        React => "react",
        PlanAndExecute => "plan_and_execute",
        Reflection => "reflection",
        MultiAgent => "multi_agent",
        ToolUse => "tool_use",
        SimpleChat => "simple_chat",
        Other => "other",
    }
}

/// API key environment variable names recognised in READMEs.
pub const API_KEY_NAMES: &[&str] = &[
    "OPENAI_API_KEY",
    "ANTHROPIC_API_KEY",
    "GOOGLE_API_KEY",
    "GEMINI_API_KEY",
    "COHERE_API_KEY",
    "MISTRAL_API_KEY",
    "HF_TOKEN",
    "HUGGINGFACEHUB_API_TOKEN",
];

/// One indexed example project.
///
/// This is both the persisted artifact (`agents.json` is a JSON array of
/// these) and the wire format of the HTTP API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Stable slug derived from the folder path; unique within a corpus.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub frameworks: Vec<Framework>,
    #[serde(default)]
    pub llm_providers: Vec<LlmProvider>,
    #[serde(default)]
    pub complexity: Complexity,
    #[serde(default)]
    pub github_url: String,
    #[serde(default)]
    pub folder_path: String,
    #[serde(default)]
    pub readme_relpath: String,
    #[serde(default)]
    pub stars: Option<u64>,
    /// Unix seconds of the last commit touching the README.
    #[serde(default)]
    pub updated_at: Option<i64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub design_pattern: DesignPattern,
    #[serde(default)]
    pub requires_gpu: bool,
    #[serde(default)]
    pub supports_local_models: bool,
    #[serde(default)]
    pub quick_start: String,
    #[serde(default)]
    pub clone_command: String,
    #[serde(default)]
    pub codespaces_url: Option<String>,
    #[serde(default)]
    pub colab_url: Option<String>,
    #[serde(default)]
    pub api_keys: Vec<String>,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub content_hash: String,
}

impl AgentRecord {
    /// Minimal record with defaults for every optional field.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            category: Category::default(),
            frameworks: Vec::new(),
            llm_providers: Vec::new(),
            complexity: Complexity::default(),
            github_url: String::new(),
            folder_path: String::new(),
            readme_relpath: String::new(),
            stars: None,
            updated_at: None,
            tags: Vec::new(),
            design_pattern: DesignPattern::default(),
            requires_gpu: false,
            supports_local_models: false,
            quick_start: String::new(),
            clone_command: String::new(),
            codespaces_url: None,
            colab_url: None,
            api_keys: Vec::new(),
            languages: Vec::new(),
            content_hash: String::new(),
        }
    }
}

/// Derives the record id from a folder path relative to the source root.
pub fn agent_id_from_folder(folder_path: &str) -> String {
    folder_path.replace('/', "_").replace(' ', "_").to_lowercase()
}

/// Distinct values observed for each filterable field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterOptions {
    pub categories: Vec<String>,
    pub frameworks: Vec<String>,
    pub providers: Vec<String>,
    pub complexities: Vec<String>,
}
