//! Host resolution and output rendering.

use hickory_resolver::TokioResolver;
use multitrace_core::{BatchResults, Host, LoopReport, TracerouteError};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use tracing::debug;

fn system_resolver() -> Result<TokioResolver, TracerouteError> {
    TokioResolver::builder_tokio()
        .map(|builder| builder.build())
        .map_err(|e| TracerouteError::Internal(format!("Failed to create DNS resolver: {}", e)))
}

/// Parses `name` as an IP literal. IPv6 literals are rejected.
fn parse_literal(name: &str) -> Result<Option<Ipv4Addr>, TracerouteError> {
    match name.parse::<IpAddr>() {
        Ok(IpAddr::V4(addr)) => Ok(Some(addr)),
        Ok(ip @ IpAddr::V6(_)) => Err(TracerouteError::UnsupportedAddress(ip)),
        Err(_) => Ok(None),
    }
}

/// Resolve a hostname to its first IPv4 address.
pub async fn resolve_hostname(
    resolver: &TokioResolver,
    hostname: &str,
) -> Result<Ipv4Addr, TracerouteError> {
    let lookup = resolver.lookup_ip(hostname).await.map_err(|e| {
        TracerouteError::DnsResolutionFailed {
            hostname: hostname.to_string(),
            source: Box::new(e),
        }
    })?;

    lookup
        .iter()
        .find_map(|ip| match ip {
            IpAddr::V4(addr) => Some(addr),
            IpAddr::V6(_) => None,
        })
        .ok_or_else(|| TracerouteError::DnsResolutionFailed {
            hostname: hostname.to_string(),
            source: "no IPv4 address found".into(),
        })
}

/// Resolves every host argument, dropping repeated names.
///
/// The first failure aborts the whole list.
pub async fn resolve_hosts(names: &[String]) -> Result<Vec<Host>, TracerouteError> {
    let mut seen = HashSet::new();
    let mut resolver: Option<TokioResolver> = None;
    let mut hosts = Vec::with_capacity(names.len());

    for name in names {
        if !seen.insert(name.as_str()) {
            debug!(host = %name, "Skipping duplicate host");
            continue;
        }

        let addr = match parse_literal(name)? {
            Some(addr) => addr,
            None => {
                if resolver.is_none() {
                    resolver = Some(system_resolver()?);
                }
                let dns = resolver.as_ref().ok_or_else(|| {
                    TracerouteError::Internal("DNS resolver unavailable".to_string())
                })?;
                resolve_hostname(dns, name).await?
            }
        };

        debug!("Resolved {} to {}", name, addr);
        hosts.push(Host::new(name.clone(), addr));
    }

    if hosts.is_empty() {
        return Err(TracerouteError::NoHosts);
    }
    Ok(hosts)
}

/// Renders final results as hop tables or pretty JSON.
pub fn render_results(results: &BatchResults, json: bool) -> Result<String, serde_json::Error> {
    if json {
        return results.to_json();
    }
    Ok(results
        .traces
        .iter()
        .map(|trace| trace.to_string())
        .collect::<Vec<_>>()
        .join("\n"))
}

/// Renders one loop report, as a hop table or a JSON line.
pub fn render_report(report: &LoopReport, json: bool) -> Result<String, serde_json::Error> {
    if json {
        return report.to_json_compact();
    }
    Ok(format!(
        "[loop {}] {}",
        report.loop_index,
        report.trace.to_string().trim_end()
    ))
}
