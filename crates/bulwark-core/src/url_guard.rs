//! Boundary validation for outbound URLs.
//!
//! Every URL that reaches the extraction pipeline or the image proxy has
//! passed through [`UrlValidator`], which blocks server-side request forgery:
//! only `http`/`https`, no embedded credentials, and no host that is or
//! resolves to a private, loopback or link-local address.

use std::net::IpAddr;

use url::{Host, Url};

use crate::error::AppError;

/// A URL that passed boundary validation. Fragment stripped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ValidatedUrl(Url);

impl ValidatedUrl {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn as_url(&self) -> &Url {
        &self.0
    }

    /// Host name (or IP literal) of the URL.
    pub fn host(&self) -> &str {
        self.0.host_str().unwrap_or_default()
    }
}

impl std::fmt::Display for ValidatedUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0.as_str())
    }
}

/// Validates raw URL strings into [`ValidatedUrl`]s.
///
/// Address checks are **enabled** by default. Use
/// [`allow_private_urls`](Self::allow_private_urls) to disable them (e.g. for
/// CLI usage where the user controls the machine, or local test servers).
#[derive(Debug, Clone, Copy)]
pub struct UrlValidator {
    ssrf_protection: bool,
}

impl Default for UrlValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl UrlValidator {
    pub fn new() -> Self {
        Self {
            ssrf_protection: true,
        }
    }

    /// Disable host/address checks. Scheme and credential checks still apply.
    pub fn allow_private_urls(mut self) -> Self {
        self.ssrf_protection = false;
        self
    }

    pub fn blocks_private_addresses(&self) -> bool {
        self.ssrf_protection
    }

    /// Validate without DNS: scheme, credentials, host names and IP literals.
    pub fn validate_syntax(&self, raw: &str) -> Result<ValidatedUrl, AppError> {
        let mut parsed = Url::parse(raw.trim())
            .map_err(|e| AppError::ValidationError(format!("Invalid URL: {e}")))?;

        match parsed.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(AppError::ValidationError(format!(
                    "URL scheme '{scheme}' is not allowed (only http/https)"
                )));
            }
        }

        if !parsed.username().is_empty() || parsed.password().is_some() {
            return Err(AppError::ValidationError(
                "URLs with embedded credentials are not allowed".to_string(),
            ));
        }

        let host = parsed
            .host()
            .ok_or_else(|| AppError::ValidationError("URL has no host".to_string()))?;

        if self.ssrf_protection {
            match host {
                Host::Domain(name) => {
                    let name = name.trim_end_matches('.').to_ascii_lowercase();
                    if is_local_name(&name) {
                        return Err(AppError::ValidationError(format!(
                            "SSRF blocked: {name} is a local host name"
                        )));
                    }
                }
                Host::Ipv4(v4) => check_ip(IpAddr::V4(v4))?,
                Host::Ipv6(v6) => check_ip(IpAddr::V6(v6))?,
            }
        }

        parsed.set_fragment(None);
        Ok(ValidatedUrl(parsed))
    }

    /// Full validation: [`validate_syntax`](Self::validate_syntax), then DNS
    /// resolution with every resolved address checked.
    pub async fn validate(&self, raw: &str) -> Result<ValidatedUrl, AppError> {
        let validated = self.validate_syntax(raw)?;
        if !self.ssrf_protection {
            return Ok(validated);
        }

        let url = validated.as_url();
        let Some(Host::Domain(host)) = url.host() else {
            // IP literals were already checked.
            return Ok(validated);
        };
        let port = url.port_or_known_default().unwrap_or(80);
        let addrs: Vec<_> = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| {
                AppError::ValidationError(format!("DNS resolution failed for {host}: {e}"))
            })?
            .collect();

        if addrs.is_empty() {
            return Err(AppError::ValidationError(format!(
                "DNS resolution returned no addresses for {host}"
            )));
        }

        for socket_addr in &addrs {
            if is_private_ip(socket_addr.ip()) {
                return Err(AppError::ValidationError(format!(
                    "SSRF blocked: {host} resolves to private/reserved IP {}",
                    socket_addr.ip()
                )));
            }
        }

        Ok(validated)
    }
}

fn is_local_name(name: &str) -> bool {
    name == "localhost" || name.ends_with(".localhost") || name.ends_with(".local")
}

fn check_ip(ip: IpAddr) -> Result<(), AppError> {
    if is_private_ip(ip) {
        return Err(AppError::ValidationError(format!(
            "SSRF blocked: {ip} is a private/reserved IP"
        )));
    }
    Ok(())
}

/// Check if an IP address is in a private/reserved/link-local range.
pub fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()           // 127.0.0.0/8
                || v4.is_private()     // 10/8, 172.16/12, 192.168/16
                || v4.is_link_local()  // 169.254.0.0/16 (cloud metadata!)
                || v4.is_unspecified() // 0.0.0.0
                || v4.is_broadcast()   // 255.255.255.255
                || v4.is_documentation() // 192.0.2.0/24, 198.51.100.0/24, 203.0.113.0/24
                || v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64 // 100.64.0.0/10 (CGN)
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()       // ::1
                || v6.is_unspecified() // ::
                // fe80::/10 (link-local)
                || (v6.segments()[0] & 0xFFC0) == 0xFE80
                // fc00::/7 (unique local)
                || (v6.segments()[0] & 0xFE00) == 0xFC00
                // IPv4-mapped IPv6 (::ffff:x.x.x.x): check the embedded v4
                || match v6.to_ipv4_mapped() {
                    Some(v4) => is_private_ip(IpAddr::V4(v4)),
                    None => false,
                }
        }
    }
}
