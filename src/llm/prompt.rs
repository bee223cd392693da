use crate::search::SearchHit;
use crate::workflow::types::{ArticleRequest, Finding, VerificationIssue};

/// Marker handed to the writer when research came back empty.
pub const NO_FINDINGS_MARKER: &str =
    "No research findings are available. Write from the requirements alone and avoid specific statistics or citations.";

pub fn research_system_prompt() -> String {
    r#"You are a meticulous research assistant. You extract verifiable facts that an article on the given topic will need.

## Output format
Respond with a JSON array and nothing else. Each element is an object:
{"claim": "<one factual statement>", "source": "<url or null>", "title": "<source title or null>"}

## Guidelines
- Prefer facts backed by the supplied search results and cite their URLs.
- Do not invent sources. Use null when a fact has no source.
- Return an empty array if nothing relevant can be established."#
        .to_string()
}

pub fn research_prompt(request: &ArticleRequest, hits: &[SearchHit]) -> String {
    let hits_section = if hits.is_empty() {
        "No web search results are available.".to_string()
    } else {
        hits.iter()
            .enumerate()
            .map(|(i, hit)| {
                format!(
                    "{}. **{}**\n{}\nURL: {}",
                    i + 1,
                    hit.title,
                    hit.snippet,
                    hit.url
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    };

    format!(
        r#"## Topic
{topic}

## Requirements
{requirements}

## Web search results
{hits_section}"#,
        topic = request.topic(),
        requirements = request.requirements_text(),
    )
}

pub fn draft_system_prompt() -> String {
    r#"You are an experienced writer. You turn requirements and research notes into a complete article in Markdown.

## Guidelines
- Start with a `#` title.
- Only state facts that appear in the research notes; keep everything else general.
- Match the requested style and stay close to the target length.
- Output the article only, with no preamble."#
        .to_string()
}

pub fn draft_prompt(
    request: &ArticleRequest,
    findings: Option<&[Finding]>,
    revision_notes: &[VerificationIssue],
) -> String {
    let research_section = match findings {
        Some(findings) => findings
            .iter()
            .map(|f| match &f.source {
                Some(source) => format!("- {} ({source})", f.claim),
                None => format!("- {}", f.claim),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        None => NO_FINDINGS_MARKER.to_string(),
    };

    let revision_section = if revision_notes.is_empty() {
        String::new()
    } else {
        let notes = revision_notes
            .iter()
            .map(|issue| format!("- {}: {}", issue.claim, issue.problem))
            .collect::<Vec<_>>()
            .join("\n");
        format!("\n\n## Problems found in the previous draft\nFix every one of these:\n{notes}")
    };

    format!(
        r#"## Topic
{topic}

## Requirements
{requirements}

## Style
{style}, about {target_length} words.

## Research notes
{research_section}{revision_section}"#,
        topic = request.topic(),
        requirements = request.requirements_text(),
        style = request.style(),
        target_length = request.target_length(),
    )
}

pub fn verify_system_prompt() -> String {
    r#"You are a strict fact checker. Compare the article against the research notes and flag every claim that is unsupported, contradicted, or fabricated.

## Output format
Respond with a JSON object and nothing else:
{"status": "passed" | "failed", "issues": [{"claim": "<quoted claim>", "problem": "<what is wrong>"}]}

Use "passed" only when there are no issues."#
        .to_string()
}

pub fn verify_prompt(draft: &str, findings: &[Finding]) -> String {
    let notes = if findings.is_empty() {
        NO_FINDINGS_MARKER.to_string()
    } else {
        findings
            .iter()
            .map(|f| format!("- {}", f.claim))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!("## Research notes\n{notes}\n\n## Article\n{draft}")
}

pub fn refine_system_prompt() -> String {
    r#"You are a senior editor. Polish the article for flow, clarity, and consistency of voice.

## Guidelines
- Keep every fact exactly as stated; do not add new claims.
- Keep the Markdown structure and the title.
- Output the polished article only."#
        .to_string()
}

pub fn refine_prompt(draft: &str, style: &str, target_length: u32) -> String {
    format!("## Style\n{style}, about {target_length} words.\n\n## Article\n{draft}")
}
