//! Prompt builder for router and resolver model calls.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::core::types::{CompletedStep, END_SENTINEL, ExecutorKind, ExecutorOutput};

const ROUTER_TEMPLATE: &str = include_str!("prompts/router.md");
const RESOLVER_TEMPLATE: &str = include_str!("prompts/resolver.md");

/// Catalogue entry rendered into the agents section.
#[derive(Debug, Clone, Serialize)]
struct AgentCard {
    name: &'static str,
    capabilities: &'static [&'static str],
}

fn agent_catalogue() -> Vec<AgentCard> {
    ExecutorKind::ALL
        .iter()
        .map(|kind| AgentCard {
            name: kind.agent_name(),
            capabilities: kind.capabilities(),
        })
        .collect()
}

fn render_steps(steps: &[CompletedStep]) -> Vec<String> {
    steps
        .iter()
        .map(|step| format!("{}: {}", step.executor.agent_name(), step.action.trim()))
        .collect()
}

fn render_outputs(outputs: &[ExecutorOutput]) -> Vec<String> {
    outputs.iter().map(ExecutorOutput::render).collect()
}

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.add_template("router", ROUTER_TEMPLATE)
            .context("load router template")?;
        env.add_template("resolver", RESOLVER_TEMPLATE)
            .context("load resolver template")?;
        Ok(Self { env })
    }

    fn render_router(&self, input: &RouterPromptInputs<'_>) -> Result<String> {
        let template = self.env.get_template("router")?;
        let rendered = template.render(context! {
            agents => agent_catalogue(),
            request => input.request.trim(),
            completed => render_steps(input.completed),
            outputs => render_outputs(input.outputs),
            end => END_SENTINEL,
        })?;
        Ok(rendered)
    }

    fn render_resolver(&self, input: &ResolverPromptInputs<'_>) -> Result<String> {
        let template = self.env.get_template("resolver")?;
        let rendered = template.render(context! {
            agents => agent_catalogue(),
            request => input.request.trim(),
            failing_action => input.failing_action.trim(),
            failure_detail => input.failure_detail.trim(),
            completed => render_steps(input.completed),
            similar => input.similar.iter().map(|s| s.trim()).collect::<Vec<_>>(),
            end => END_SENTINEL,
        })?;
        Ok(rendered)
    }
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    /// Required sections are never dropped.
    required: bool,
    content: String,
}

/// Parse sections from rendered template output using HTML comment markers.
///
/// Markers follow format: `<!-- section:KEY required|droppable -->`
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
            .expect("section marker regex is valid")
    });

    let markers: Vec<_> = SECTION_RE
        .captures_iter(rendered)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some((
                caps.get(1)?.as_str().to_string(),
                caps.get(2)?.as_str() == "required",
                whole.start(),
                whole.end(),
            ))
        })
        .collect();

    let mut sections = Vec::new();
    for (i, (key, required, _, start)) in markers.iter().enumerate() {
        let end = markers
            .get(i + 1)
            .map(|next| next.2)
            .unwrap_or(rendered.len());
        let content = rendered[*start..end].trim().to_string();
        if !content.is_empty() || *required {
            sections.push(ParsedSection {
                key: key.clone(),
                required: *required,
                content,
            });
        }
    }
    sections
}

/// Apply budget to parsed sections, dropping droppable sections as needed.
///
/// Drop order: outputs -> history -> similar.
fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    let total_len =
        |secs: &[ParsedSection]| -> usize { secs.iter().map(|s| s.content.len()).sum() };

    if total_len(sections) <= budget {
        return;
    }

    for key in ["outputs", "history", "similar"] {
        if total_len(sections) <= budget {
            break;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    // Still over budget: truncate the largest remaining section.
    let total = total_len(sections);
    if total > budget
        && let Some(largest) = sections.iter_mut().max_by_key(|s| s.content.len())
    {
        let before_len = largest.content.len();
        let allowed = before_len.saturating_sub(total - budget);
        let marker = "\n[truncated]";
        let keep = floor_char_boundary(&largest.content, allowed.saturating_sub(marker.len()));
        largest.content.truncate(keep);
        largest.content.push_str(marker);
        debug!(
            section = largest.key,
            before_len,
            after_len = largest.content.len(),
            "truncated section for budget"
        );
    }
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Inputs for the router prompt. Windows are already applied by the caller.
#[derive(Debug, Clone, Copy)]
pub struct RouterPromptInputs<'a> {
    pub request: &'a str,
    pub completed: &'a [CompletedStep],
    pub outputs: &'a [ExecutorOutput],
}

/// Inputs for the resolver prompt.
#[derive(Debug, Clone, Copy)]
pub struct ResolverPromptInputs<'a> {
    pub request: &'a str,
    pub completed: &'a [CompletedStep],
    pub failing_action: &'a str,
    pub failure_detail: &'a str,
    /// Prior outputs ranked by similarity to the failure, most similar first.
    pub similar: &'a [String],
}

/// Builds prompts within a byte budget, dropping less critical sections first.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    pub fn build_router(&self, input: &RouterPromptInputs<'_>) -> Result<String> {
        let rendered = PromptEngine::new()?
            .render_router(input)
            .context("render router prompt")?;
        Ok(self.fit(&rendered))
    }

    pub fn build_resolver(&self, input: &ResolverPromptInputs<'_>) -> Result<String> {
        let rendered = PromptEngine::new()?
            .render_resolver(input)
            .context("render resolver prompt")?;
        Ok(self.fit(&rendered))
    }

    fn fit(&self, rendered: &str) -> String {
        let mut sections = parse_sections(rendered);
        apply_budget_to_sections(&mut sections, self.budget_bytes);
        render_sections(&sections)
    }
}
