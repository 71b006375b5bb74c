//! README metadata extraction without a model.
//!
//! [`heuristic_extract`] turns README text plus a few folder facts into an
//! [`Extraction`] using keyword marker tables. It is the fallback whenever the
//! LLM path is disabled or fails, so it must never fail itself.
//!
//! The helpers at the bottom (quick start, tags, fallback description, title)
//! are shared with the LLM path in [`crate::llm`].

use agent_navigator_core::models::{
    Category, Complexity, DesignPattern, Framework, LlmProvider, Vocabulary, API_KEY_NAMES,
};
use agent_navigator_core::tokenize::tokenize;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Metadata fields that either the heuristics or the model decide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub name: String,
    pub description: String,
    pub category: Category,
    pub frameworks: Vec<Framework>,
    pub llm_providers: Vec<LlmProvider>,
    pub requires_gpu: bool,
    pub supports_local_models: bool,
    pub design_pattern: DesignPattern,
    pub complexity: Complexity,
    pub quick_start: String,
    pub api_keys: Vec<String>,
}

const FRAMEWORK_MARKERS: &[(Framework, &[&str])] = &[
    (Framework::Langchain, &["langchain"]),
    (Framework::Llamaindex, &["llamaindex", "llama index"]),
    (Framework::Crewai, &["crewai"]),
    (Framework::Autogen, &["autogen", "auto-gen"]),
    (Framework::Phidata, &["phidata", "phi data"]),
    (Framework::Dspy, &["dspy"]),
    (Framework::Haystack, &["haystack"]),
    (Framework::SemanticKernel, &["semantic kernel", "semantic_kernel"]),
];

const PROVIDER_MARKERS: &[(LlmProvider, &[&str])] = &[
    (LlmProvider::Openai, &["openai", "gpt-"]),
    (LlmProvider::Anthropic, &["anthropic", "claude"]),
    (LlmProvider::Google, &["gemini", "vertex", "google ai"]),
    (LlmProvider::Cohere, &["cohere"]),
    (LlmProvider::Mistral, &["mistral"]),
    (LlmProvider::Ollama, &["ollama"]),
    (LlmProvider::Huggingface, &["huggingface", "hf.co", "transformers"]),
    (
        LlmProvider::Local,
        &["llama.cpp", "gguf", "vllm", "local model", "offline"],
    ),
];

/// Checked in order; the first rule with a matching needle wins.
const CATEGORY_RULES: &[(Category, DesignPattern, &[&str])] = &[
    (
        Category::Rag,
        DesignPattern::Rag,
        &["rag", "retrieval", "vector", "embedding", "chromadb", "pinecone", "weaviate"],
    ),
    (
        Category::MultiAgent,
        DesignPattern::MultiAgent,
        &["multi-agent", "multi agent", "crew", "swarm", "team"],
    ),
    (
        Category::Chatbot,
        DesignPattern::SimpleChat,
        &["chatbot", "chat bot", "assistant", "chat"],
    ),
    (
        Category::Vision,
        DesignPattern::ToolUse,
        &["vision", "image", "ocr", "detect"],
    ),
    (
        Category::Voice,
        DesignPattern::ToolUse,
        &["voice", "speech", "whisper", "audio"],
    ),
    (
        Category::Coding,
        DesignPattern::ToolUse,
        &["code", "coding", "dev", "github copilot"],
    ),
    (
        Category::Finance,
        DesignPattern::ToolUse,
        &["finance", "trading", "stocks", "portfolio"],
    ),
    (
        Category::Search,
        DesignPattern::ToolUse,
        &["search", "web search", "serp", "browser"],
    ),
    (
        Category::Research,
        DesignPattern::ToolUse,
        &["paper", "research", "literature"],
    ),
];

const LOCAL_MODEL_MARKERS: &[&str] = &["ollama", "llama.cpp", "gguf", "vllm"];
const GPU_MARKERS: &[&str] = &["gpu", "cuda", "torch.cuda", "nvidia", "stable diffusion"];

const QUICK_START_MARKERS: &[&str] = &[
    "pip install",
    "poetry install",
    "uv pip",
    "npm install",
    "pnpm install",
    "yarn install",
    "streamlit run",
    "python ",
    "python3 ",
];

/// Words that carry no search value as tags.
const LOW_VALUE_TAGS: &[&str] = &[
    "allows", "and", "app", "application", "available", "based", "can", "describing", "detailed",
    "download", "enter", "etc", "features", "for", "format", "friendly", "generate", "generated",
    "generation", "input", "instruments", "interface", "listening", "model", "modelslab", "mood",
    "mp3", "music", "output", "prompt", "simple", "this", "they", "the", "track", "type", "user",
    "users", "want", "will", "with",
];

pub const MAX_TAGS: usize = 80;
const TAG_SOURCE_TOKENS: usize = 80;
const HEURISTIC_DESCRIPTION_CHARS: usize = 140;
const NAME_CHARS: usize = 80;
const QUICK_START_CHARS: usize = 800;
const FALLBACK_DESCRIPTION_CHARS: usize = 180;
pub const MIN_DESCRIPTION_CHARS: usize = 20;

static SHELL_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)```(?:bash|shell|sh|zsh|powershell|cmd|text)?\n(.*?)```")
        .expect("shell block pattern is valid")
});

static FIRST_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#\s+(.+)$").expect("heading pattern is valid"));

/// Truncates on a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extracts metadata from README text with marker tables.
///
/// `file_count` is the number of files in the project folder and feeds the
/// complexity estimate.
pub fn heuristic_extract(readme: &str, folder_path: &str, file_count: usize) -> Extraction {
    let text = readme.to_lowercase();
    let path_hint = folder_path.to_lowercase();
    let has_any = |needles: &[&str]| {
        needles
            .iter()
            .any(|n| text.contains(n) || path_hint.contains(n))
    };

    let mut frameworks: Vec<Framework> = FRAMEWORK_MARKERS
        .iter()
        .filter(|(_, markers)| markers.iter().any(|m| text.contains(m)))
        .map(|(fw, _)| *fw)
        .collect();
    if frameworks.is_empty() {
        frameworks.push(Framework::RawApi);
    }

    let mut llm_providers: Vec<LlmProvider> = PROVIDER_MARKERS
        .iter()
        .filter(|(_, markers)| markers.iter().any(|m| text.contains(m)))
        .map(|(p, _)| *p)
        .collect();
    if llm_providers.is_empty() {
        llm_providers.push(LlmProvider::Other);
    }

    let (category, design_pattern) = CATEGORY_RULES
        .iter()
        .find(|(_, _, needles)| has_any(needles))
        .map(|(c, d, _)| (*c, *d))
        .unwrap_or_else(|| {
            if has_any(&["agent"]) {
                (Category::Agent, DesignPattern::ToolUse)
            } else {
                (Category::Other, DesignPattern::Other)
            }
        });

    let complexity = if matches!(
        category,
        Category::MultiAgent | Category::Vision | Category::Voice
    ) || file_count > 80
    {
        Complexity::Advanced
    } else if file_count > 25 || frameworks.len() > 1 {
        Complexity::Intermediate
    } else {
        Complexity::Beginner
    };

    let name = FIRST_HEADING
        .captures(readme)
        .map(|c| truncate_chars(c[1].trim(), NAME_CHARS))
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| title_from_path(folder_path));

    Extraction {
        name,
        description: first_paragraph(readme),
        category,
        frameworks,
        llm_providers,
        requires_gpu: GPU_MARKERS.iter().any(|m| text.contains(m)),
        supports_local_models: LOCAL_MODEL_MARKERS.iter().any(|m| text.contains(m)),
        design_pattern,
        complexity,
        quick_start: extract_quick_start(readme, folder_path),
        api_keys: api_keys_mentioned(readme),
    }
}

/// First paragraph after any leading heading lines, whitespace collapsed.
fn first_paragraph(readme: &str) -> String {
    let mut para: Vec<&str> = Vec::new();
    let mut skipping_headings = true;
    for line in readme.trim().lines() {
        let line = line.trim();
        if skipping_headings {
            if line.starts_with('#') {
                continue;
            }
            skipping_headings = false;
        }
        if !line.is_empty() {
            para.push(line);
        } else if !para.is_empty() {
            break;
        }
    }
    truncate_chars(
        &collapse_whitespace(&para.join(" ")),
        HEURISTIC_DESCRIPTION_CHARS,
    )
    .trim()
    .to_string()
}

/// Known API key names that appear verbatim (case-insensitive) in the README.
pub fn api_keys_mentioned(readme: &str) -> Vec<String> {
    let upper = readme.to_uppercase();
    API_KEY_NAMES
        .iter()
        .filter(|k| upper.contains(*k))
        .map(|k| k.to_string())
        .collect()
}

/// The first fenced shell block that installs or runs something, or a
/// `cd` hint when there is none.
pub fn extract_quick_start(readme: &str, folder_path: &str) -> String {
    for caps in SHELL_BLOCK.captures_iter(readme).take(10) {
        let block = caps[1].trim();
        let lowered = block.to_lowercase();
        if QUICK_START_MARKERS.iter().any(|m| lowered.contains(m)) {
            return truncate_chars(block, QUICK_START_CHARS);
        }
    }
    format!("cd {}\n# follow the README instructions", folder_path)
}

/// `rag_tutorials/chat-with_pdf` becomes `Chat With Pdf`.
pub fn title_from_path(folder_path: &str) -> String {
    let last = folder_path.rsplit('/').next().unwrap_or(folder_path);
    let words: Vec<String> = last
        .replace(['-', '_'], " ")
        .split_whitespace()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect();
    if words.is_empty() {
        "Untitled".to_string()
    } else {
        words.join(" ")
    }
}

/// Search tags from the start of the README and the folder path.
pub fn extract_tags(readme: &str, folder_path: &str) -> Vec<String> {
    let mut tags: Vec<String> = tokenize(readme)
        .into_iter()
        .take(TAG_SOURCE_TOKENS)
        .chain(tokenize(folder_path).into_iter().take(TAG_SOURCE_TOKENS))
        .filter(|t| t.chars().count() > 2 && !LOW_VALUE_TAGS.contains(&t.as_str()))
        .collect();
    tags.sort();
    tags.dedup();
    tags.truncate(MAX_TAGS);
    tags
}

/// Generated description for records whose own description is too short.
pub fn fallback_description(
    category: Category,
    frameworks: &[Framework],
    providers: &[LlmProvider],
) -> String {
    let fw = frameworks.first().map(|f| f.as_str());
    let provider = providers.first().map(|p| p.as_str());
    let text = match category {
        Category::Rag => format!(
            "Build RAG applications using {} with {}. Complete example with vector database integration.",
            fw.unwrap_or("Python"),
            provider.unwrap_or("OpenAI")
        ),
        Category::Chatbot => format!(
            "Create an AI chatbot using {} with {}. Includes conversation memory and user interface.",
            fw.unwrap_or("direct API"),
            provider.unwrap_or("GPT")
        ),
        Category::MultiAgent => format!(
            "Multi-agent system using {}. Agents collaborate on complex tasks with tool use.",
            fw.unwrap_or("custom orchestrator")
        ),
        Category::Agent => format!(
            "LLM agent implementation using {} with {}.",
            fw.unwrap_or("Python"),
            provider.unwrap_or("OpenAI")
        ),
        other => format!(
            "{} agent example with code and setup instructions.",
            title_from_path(other.as_str())
        ),
    };
    truncate_chars(&text, FALLBACK_DESCRIPTION_CHARS)
}
