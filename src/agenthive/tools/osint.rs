//! OSINT tools: `dns_lookup`, `http_headers`, `port_check`,
//! `email_validate`.
//!
//! These are the light reconnaissance helpers granted to the researcher and
//! security agents. `port_check` refuses targets that do not resolve to
//! loopback or private ranges; scanning arbitrary hosts from a chat request
//! is a policy refusal, not a capability.

use crate::clients::common::get_shared_http_client;
use crate::error::HiveResult;
use crate::tool_protocol::{
    SideEffect, ToolFamily, ToolHandler, ToolMetadata, ToolParameter, ToolParameterType,
    ToolRegistry, ToolResult,
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{lookup_host, TcpStream};

fn is_private(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.octets()[0] == 100 && (64..128).contains(&v4.octets()[1]) // CGNAT
        }
        IpAddr::V6(v6) => v6.is_loopback() || (v6.segments()[0] & 0xfe00) == 0xfc00,
    }
}

async fn dns_lookup_impl(params: &serde_json::Value) -> HiveResult<ToolResult> {
    let host = match params.get("host").and_then(|v| v.as_str()) {
        Some(h) => h.to_string(),
        None => return Ok(ToolResult::failure("missing required parameter: host")),
    };
    let lookup_result = lookup_host((host.as_str(), 0u16)).await;
    match lookup_result {
        Ok(addrs) => {
            let mut ips: Vec<String> = addrs.map(|a: SocketAddr| a.ip().to_string()).collect();
            ips.sort();
            ips.dedup();
            Ok(ToolResult::success(serde_json::json!({
                "host": host,
                "addresses": ips,
            })))
        }
        Err(e) => Ok(ToolResult::failure(format!(
            "lookup failed for {}: {}",
            host, e
        ))),
    }
}

async fn http_headers_impl(params: &serde_json::Value) -> HiveResult<ToolResult> {
    let url = match params.get("url").and_then(|v| v.as_str()) {
        Some(u) => u.to_string(),
        None => return Ok(ToolResult::failure("missing required parameter: url")),
    };
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Ok(ToolResult::failure("url must be http(s)"));
    }
    let resp = match get_shared_http_client()
        .head(&url)
        .timeout(Duration::from_secs(15))
        .send()
        .await
    {
        Ok(resp) => resp,
        Err(e) => return Ok(ToolResult::failure(format!("request failed: {}", e))),
    };
    let headers: serde_json::Map<String, serde_json::Value> = resp
        .headers()
        .iter()
        .map(|(k, v)| {
            (
                k.to_string(),
                serde_json::Value::String(v.to_str().unwrap_or("<binary>").to_string()),
            )
        })
        .collect();
    Ok(ToolResult::success(serde_json::json!({
        "url": url,
        "status": resp.status().as_u16(),
        "headers": headers,
    })))
}

async fn port_check_impl(params: &serde_json::Value) -> HiveResult<ToolResult> {
    let host = match params.get("host").and_then(|v| v.as_str()) {
        Some(h) => h.to_string(),
        None => return Ok(ToolResult::failure("missing required parameter: host")),
    };
    let port = match params.get("port").and_then(|v| v.as_u64()) {
        Some(p) if p <= 65535 => p as u16,
        _ => return Ok(ToolResult::failure("missing or invalid parameter: port")),
    };

    let addrs: Vec<SocketAddr> = match lookup_host((host.as_str(), port)).await {
        Ok(addrs) => addrs.collect(),
        Err(e) => {
            return Ok(ToolResult::failure(format!(
                "lookup failed for {}: {}",
                host, e
            )))
        }
    };
    if addrs.is_empty() {
        return Ok(ToolResult::failure(format!("{} did not resolve", host)));
    }
    if !addrs.iter().all(|a| is_private(&a.ip())) {
        return Ok(ToolResult::failure(format!(
            "refused: {} is not a loopback/private target",
            host
        )));
    }

    let addr = addrs[0];
    let open = matches!(
        tokio::time::timeout(Duration::from_secs(3), TcpStream::connect(addr)).await,
        Ok(Ok(_))
    );
    Ok(ToolResult::success(serde_json::json!({
        "host": host,
        "port": port,
        "open": open,
    })))
}

async fn email_validate_impl(params: &serde_json::Value) -> HiveResult<ToolResult> {
    let email = match params.get("email").and_then(|v| v.as_str()) {
        Some(e) => e.trim().to_string(),
        None => return Ok(ToolResult::failure("missing required parameter: email")),
    };

    let mut parts = email.splitn(2, '@');
    let local = parts.next().unwrap_or("");
    let domain = parts.next().unwrap_or("");
    let syntax_ok = !local.is_empty()
        && !domain.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && email.chars().all(|c| !c.is_whitespace());

    let domain_resolves = if syntax_ok {
        lookup_host((domain, 25u16)).await.is_ok()
    } else {
        false
    };

    Ok(ToolResult::success(serde_json::json!({
        "email": email,
        "syntax_valid": syntax_ok,
        "domain_resolves": domain_resolves,
    })))
}

/// Register the `osint` family.
pub fn register(registry: &mut ToolRegistry) -> HiveResult<()> {
    let handler: ToolHandler =
        Arc::new(move |params| Box::pin(async move { dns_lookup_impl(&params).await }));
    registry.register(
        ToolMetadata::new(
            "dns_lookup",
            "Resolve a hostname to its IP addresses",
            ToolFamily::Osint,
            SideEffect::ExternalIo,
        )
        .with_parameter(ToolParameter::new("host", ToolParameterType::String).required()),
        handler,
    )?;

    let handler: ToolHandler =
        Arc::new(move |params| Box::pin(async move { http_headers_impl(&params).await }));
    registry.register(
        ToolMetadata::new(
            "http_headers",
            "Fetch response headers for a URL (server fingerprinting)",
            ToolFamily::Osint,
            SideEffect::ExternalIo,
        )
        .with_parameter(ToolParameter::new("url", ToolParameterType::String).required()),
        handler,
    )?;

    let handler: ToolHandler =
        Arc::new(move |params| Box::pin(async move { port_check_impl(&params).await }));
    registry.register(
        ToolMetadata::new(
            "port_check",
            "Check whether a TCP port is open on a loopback/private host",
            ToolFamily::Osint,
            SideEffect::ExternalIo,
        )
        .with_parameter(ToolParameter::new("host", ToolParameterType::String).required())
        .with_parameter(ToolParameter::new("port", ToolParameterType::Integer).required()),
        handler,
    )?;

    let handler: ToolHandler =
        Arc::new(move |params| Box::pin(async move { email_validate_impl(&params).await }));
    registry.register(
        ToolMetadata::new(
            "email_validate",
            "Validate an email address's syntax and domain",
            ToolFamily::Osint,
            SideEffect::ExternalIo,
        )
        .with_parameter(ToolParameter::new("email", ToolParameterType::String).required()),
        handler,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        register(&mut registry).unwrap();
        registry
    }

    #[test]
    fn private_range_detection() {
        assert!(is_private(&"127.0.0.1".parse().unwrap()));
        assert!(is_private(&"10.1.2.3".parse().unwrap()));
        assert!(is_private(&"192.168.0.1".parse().unwrap()));
        assert!(!is_private(&"8.8.8.8".parse().unwrap()));
    }

    #[tokio::test]
    async fn localhost_resolves() {
        let result = registry()
            .execute("dns_lookup", serde_json::json!({"host": "localhost"}))
            .await
            .unwrap();
        assert!(result.success);
        assert!(!result.output["addresses"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn public_port_scan_is_refused() {
        let result = registry()
            .execute(
                "port_check",
                serde_json::json!({"host": "8.8.8.8", "port": 53}),
            )
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("refused"));
    }

    #[tokio::test]
    async fn email_syntax_checks() {
        let good = registry()
            .execute(
                "email_validate",
                serde_json::json!({"email": "dev@example.com"}),
            )
            .await
            .unwrap();
        assert_eq!(good.output["syntax_valid"], true);

        let bad = registry()
            .execute("email_validate", serde_json::json!({"email": "not-an-email"}))
            .await
            .unwrap();
        assert_eq!(bad.output["syntax_valid"], false);
    }
}
