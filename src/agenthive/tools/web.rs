//! Web research tools: `web_search`, `fetch_url`, `wiki_lookup`,
//! `github_search`.
//!
//! All requests go through the shared pooled HTTP client. Responses are
//! size-capped so tool results stay promptable.

use crate::clients::common::get_shared_http_client;
use crate::error::HiveResult;
use crate::tool_protocol::{
    SideEffect, ToolFamily, ToolHandler, ToolMetadata, ToolParameter, ToolParameterType,
    ToolRegistry, ToolResult,
};
use std::sync::Arc;
use std::time::Duration;

/// Cap on fetched body size.
const MAX_BODY_BYTES: usize = 128 * 1024;

/// Deadline for a single web tool request.
const WEB_REQUEST_TIMEOUT_SECS: u64 = 20;

async fn get_text(url: &str) -> Result<String, String> {
    let resp = get_shared_http_client()
        .get(url)
        .timeout(Duration::from_secs(WEB_REQUEST_TIMEOUT_SECS))
        .header("User-Agent", "agenthive/0.4")
        .send()
        .await
        .map_err(|e| format!("request failed: {}", e))?;
    if !resp.status().is_success() {
        return Err(format!("HTTP {} from {}", resp.status(), url));
    }
    let text = resp.text().await.map_err(|e| format!("read failed: {}", e))?;
    if text.len() > MAX_BODY_BYTES {
        Ok(text[..MAX_BODY_BYTES].to_string())
    } else {
        Ok(text)
    }
}

/// Case-insensitive ASCII prefix check at a byte offset.
fn starts_with_ci(bytes: &[u8], at: usize, pat: &[u8]) -> bool {
    bytes.len() >= at + pat.len()
        && bytes[at..at + pat.len()]
            .iter()
            .zip(pat)
            .all(|(a, b)| a.eq_ignore_ascii_case(b))
}

/// Strip tags from an HTML body, best effort.
fn extract_text(html: &str) -> String {
    let bytes = html.as_bytes();
    let mut out = Vec::new();
    let mut in_tag = false;
    let mut in_script = false;
    for i in 0..bytes.len() {
        if !in_tag && starts_with_ci(bytes, i, b"<script") {
            in_script = true;
        }
        if in_script && starts_with_ci(bytes, i, b"</script>") {
            in_script = false;
        }
        match bytes[i] {
            b'<' => in_tag = true,
            b'>' => in_tag = false,
            b if !in_tag && !in_script => out.push(b),
            _ => {}
        }
    }
    // Collapse whitespace runs left behind by the markup.
    String::from_utf8_lossy(&out)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

async fn web_search_impl(params: &serde_json::Value) -> HiveResult<ToolResult> {
    let query = match params.get("query").and_then(|v| v.as_str()) {
        Some(q) => q,
        None => return Ok(ToolResult::failure("missing required parameter: query")),
    };
    let max_results = params
        .get("max_results")
        .and_then(|v| v.as_u64())
        .unwrap_or(5) as usize;

    let url = format!(
        "https://api.duckduckgo.com/?q={}&format=json&no_html=1",
        urlencoding::encode(query)
    );
    let body = match get_text(&url).await {
        Ok(body) => body,
        Err(e) => return Ok(ToolResult::failure(e)),
    };
    let parsed: serde_json::Value = match serde_json::from_str(&body) {
        Ok(v) => v,
        Err(e) => return Ok(ToolResult::failure(format!("bad search response: {}", e))),
    };

    let mut results = Vec::new();
    if let Some(abstract_text) = parsed.get("AbstractText").and_then(|v| v.as_str()) {
        if !abstract_text.is_empty() {
            results.push(serde_json::json!({
                "title": parsed.get("Heading").and_then(|v| v.as_str()).unwrap_or(query),
                "snippet": abstract_text,
                "url": parsed.get("AbstractURL").and_then(|v| v.as_str()).unwrap_or(""),
            }));
        }
    }
    if let Some(topics) = parsed.get("RelatedTopics").and_then(|v| v.as_array()) {
        for topic in topics {
            if results.len() >= max_results {
                break;
            }
            if let (Some(text), Some(url)) = (
                topic.get("Text").and_then(|v| v.as_str()),
                topic.get("FirstURL").and_then(|v| v.as_str()),
            ) {
                results.push(serde_json::json!({
                    "title": text.split(" - ").next().unwrap_or(text),
                    "snippet": text,
                    "url": url,
                }));
            }
        }
    }

    Ok(ToolResult::success(serde_json::json!({
        "query": query,
        "results": results,
        "count": results.len(),
    })))
}

async fn fetch_url_impl(params: &serde_json::Value) -> HiveResult<ToolResult> {
    let url = match params.get("url").and_then(|v| v.as_str()) {
        Some(u) => u,
        None => return Ok(ToolResult::failure("missing required parameter: url")),
    };
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Ok(ToolResult::failure("url must be http(s)"));
    }
    let extract = params
        .get("extract_text")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);

    let body = match get_text(url).await {
        Ok(body) => body,
        Err(e) => return Ok(ToolResult::failure(e)),
    };
    let content = if extract { extract_text(&body) } else { body };

    Ok(ToolResult::success(serde_json::json!({
        "url": url,
        "content": content,
        "length": content.len(),
    })))
}

async fn wiki_lookup_impl(params: &serde_json::Value) -> HiveResult<ToolResult> {
    let topic = match params.get("topic").and_then(|v| v.as_str()) {
        Some(t) => t,
        None => return Ok(ToolResult::failure("missing required parameter: topic")),
    };
    let url = format!(
        "https://en.wikipedia.org/api/rest_v1/page/summary/{}",
        urlencoding::encode(&topic.replace(' ', "_"))
    );
    let body = match get_text(&url).await {
        Ok(body) => body,
        Err(e) => return Ok(ToolResult::failure(e)),
    };
    let parsed: serde_json::Value = match serde_json::from_str(&body) {
        Ok(v) => v,
        Err(e) => return Ok(ToolResult::failure(format!("bad wiki response: {}", e))),
    };
    Ok(ToolResult::success(serde_json::json!({
        "topic": topic,
        "title": parsed.get("title").and_then(|v| v.as_str()).unwrap_or(topic),
        "summary": parsed.get("extract").and_then(|v| v.as_str()).unwrap_or(""),
        "url": parsed
            .get("content_urls")
            .and_then(|v| v.get("desktop"))
            .and_then(|v| v.get("page"))
            .and_then(|v| v.as_str())
            .unwrap_or(""),
    })))
}

async fn github_search_impl(params: &serde_json::Value) -> HiveResult<ToolResult> {
    let query = match params.get("query").and_then(|v| v.as_str()) {
        Some(q) => q,
        None => return Ok(ToolResult::failure("missing required parameter: query")),
    };
    let max_results = params
        .get("max_results")
        .and_then(|v| v.as_u64())
        .unwrap_or(5);

    let url = format!(
        "https://api.github.com/search/repositories?q={}&per_page={}",
        urlencoding::encode(query),
        max_results
    );
    let body = match get_text(&url).await {
        Ok(body) => body,
        Err(e) => return Ok(ToolResult::failure(e)),
    };
    let parsed: serde_json::Value = match serde_json::from_str(&body) {
        Ok(v) => v,
        Err(e) => return Ok(ToolResult::failure(format!("bad github response: {}", e))),
    };

    let repos: Vec<serde_json::Value> = parsed
        .get("items")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .map(|item| {
                    serde_json::json!({
                        "name": item.get("full_name").and_then(|v| v.as_str()).unwrap_or(""),
                        "description": item.get("description").and_then(|v| v.as_str()).unwrap_or(""),
                        "stars": item.get("stargazers_count").and_then(|v| v.as_u64()).unwrap_or(0),
                        "url": item.get("html_url").and_then(|v| v.as_str()).unwrap_or(""),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(ToolResult::success(serde_json::json!({
        "query": query,
        "repositories": repos,
        "count": repos.len(),
    })))
}

/// Register the `web` family.
pub fn register(registry: &mut ToolRegistry) -> HiveResult<()> {
    let handler: ToolHandler =
        Arc::new(move |params| Box::pin(async move { web_search_impl(&params).await }));
    registry.register(
        ToolMetadata::new(
            "web_search",
            "Search the web and return result snippets",
            ToolFamily::Web,
            SideEffect::ExternalIo,
        )
        .with_parameter(ToolParameter::new("query", ToolParameterType::String).required())
        .with_parameter(
            ToolParameter::new("max_results", ToolParameterType::Integer)
                .with_description("Result cap (default 5)"),
        ),
        handler,
    )?;

    let handler: ToolHandler =
        Arc::new(move |params| Box::pin(async move { fetch_url_impl(&params).await }));
    registry.register(
        ToolMetadata::new(
            "fetch_url",
            "Fetch a URL and return its (optionally text-extracted) content",
            ToolFamily::Web,
            SideEffect::ExternalIo,
        )
        .with_parameter(ToolParameter::new("url", ToolParameterType::String).required())
        .with_parameter(
            ToolParameter::new("extract_text", ToolParameterType::Boolean)
                .with_description("Strip markup from HTML bodies (default true)"),
        ),
        handler,
    )?;

    let handler: ToolHandler =
        Arc::new(move |params| Box::pin(async move { wiki_lookup_impl(&params).await }));
    registry.register(
        ToolMetadata::new(
            "wiki_lookup",
            "Look up a topic summary on Wikipedia",
            ToolFamily::Web,
            SideEffect::ExternalIo,
        )
        .with_parameter(ToolParameter::new("topic", ToolParameterType::String).required()),
        handler,
    )?;

    let handler: ToolHandler =
        Arc::new(move |params| Box::pin(async move { github_search_impl(&params).await }));
    registry.register(
        ToolMetadata::new(
            "github_search",
            "Search GitHub repositories",
            ToolFamily::Web,
            SideEffect::ExternalIo,
        )
        .with_parameter(ToolParameter::new("query", ToolParameterType::String).required())
        .with_parameter(ToolParameter::new("max_results", ToolParameterType::Integer)),
        handler,
    )?;

    Ok(())
}
