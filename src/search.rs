//! `agent-nav search` and `agent-nav filters`.
//!
//! Both open the configured backend, run one query and print plain text to
//! stdout.

use agent_navigator_core::filters::SearchFilters;
use agent_navigator_core::models::{FilterOptions, Vocabulary};
use agent_navigator_core::search::SearchHit;
use anyhow::Result;

use crate::catalog::open_backend;
use crate::config::Config;

const SNIPPET_CHARS: usize = 160;

pub async fn run_search(
    config: &Config,
    query: &str,
    filters: SearchFilters,
    limit: Option<usize>,
) -> Result<()> {
    let backend = open_backend(config).await?;
    let limit = limit.unwrap_or(config.search.max_results).max(1);
    let hits = backend
        .search(query.trim(), &filters.normalized(), limit)
        .await?;

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, hit) in hits.iter().enumerate() {
        print!("{}", format_hit(i + 1, hit));
    }
    Ok(())
}

fn join<T: Vocabulary>(values: &[T]) -> String {
    if values.is_empty() {
        return "-".to_string();
    }
    values
        .iter()
        .map(|v| v.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// One numbered result block, trailing blank line included.
fn format_hit(n: usize, hit: &SearchHit) -> String {
    let r = &hit.record;
    let head = match hit.score {
        Some(score) => format!("{}. [{:.2}] {}", n, score, r.name),
        None => format!("{}. {}", n, r.name),
    };
    let mut snippet: String = r.description.chars().take(SNIPPET_CHARS).collect();
    if r.description.chars().count() > SNIPPET_CHARS {
        snippet.push_str("...");
    }
    let mut out = format!(
        "{} ({}, {})\n    id: {}\n    frameworks: {}\n    providers: {}\n",
        head,
        r.category.as_str(),
        r.complexity.as_str(),
        r.id,
        join(&r.frameworks),
        join(&r.llm_providers),
    );
    if !r.github_url.is_empty() {
        out.push_str(&format!("    url: {}\n", r.github_url));
    }
    out.push_str(&format!("    description: \"{}\"\n\n", snippet.trim()));
    out
}

pub async fn run_filters(config: &Config) -> Result<()> {
    let backend = open_backend(config).await?;
    print!("{}", format_filters(&backend.filter_options().await?));
    Ok(())
}

fn format_filters(options: &FilterOptions) -> String {
    let line = |label: &str, values: &[String]| {
        let joined = if values.is_empty() {
            "-".to_string()
        } else {
            values.join(", ")
        };
        format!("{}: {}\n", label, joined)
    };
    [
        line("categories", &options.categories),
        line("frameworks", &options.frameworks),
        line("providers", &options.providers),
        line("complexities", &options.complexities),
    ]
    .concat()
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_navigator_core::models::{AgentRecord, Category, Framework};

    #[test]
    fn hit_block_shows_score_only_when_ranked() {
        let mut r = AgentRecord::new("slack_bot", "Slack Bot");
        r.category = Category::Chatbot;
        r.frameworks = vec![Framework::Langchain];
        r.description = "Answers questions in Slack".into();

        let ranked = format_hit(
            1,
            &SearchHit {
                record: r.clone(),
                score: Some(2.5),
            },
        );
        assert!(ranked.starts_with("1. [2.50] Slack Bot (chatbot, intermediate)\n"));
        assert!(ranked.contains("    frameworks: langchain\n"));
        assert!(ranked.contains("    providers: -\n"));
        assert!(!ranked.contains("url:"));

        let listed = format_hit(2, &SearchHit { record: r, score: None });
        assert!(listed.starts_with("2. Slack Bot ("));
    }

    #[test]
    fn filters_print_one_line_per_field() {
        let options = FilterOptions {
            categories: vec!["chatbot".into(), "rag".into()],
            frameworks: vec![],
            providers: vec!["openai".into()],
            complexities: vec!["beginner".into()],
        };
        assert_eq!(
            format_filters(&options),
            "categories: chatbot, rag\nframeworks: -\nproviders: openai\ncomplexities: beginner\n"
        );
    }
}
