//! DNS and hosts overrides applied to sandboxed git processes.

use crate::constants::CLIENT_DOMAIN_SUFFIX;
use crate::errors::{io_error_with_path, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Host resolver configuration read when merging an override.
pub const HOST_RESOLV_CONF: &str = "/etc/resolv.conf";

/// DNS settings that replace or extend the host's `/etc/resolv.conf`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsConfig {
    #[serde(default)]
    pub nameservers: Vec<String>,
    #[serde(default)]
    pub search_domains: Vec<String>,
    #[serde(default)]
    pub options: Vec<String>,
}

/// Files bind-mounted over `/etc/resolv.conf` and `/etc/hosts` for one git CLI.
///
/// Owns the merged resolv.conf temp file; it is removed when the override is dropped.
#[derive(Debug)]
pub struct NetworkOverride {
    resolv_conf: Option<NamedTempFile>,
    hosts: Option<PathBuf>,
}

impl NetworkOverride {
    /// Writes a merged resolv.conf (when `dns` is set) and records the hosts
    /// file. Returns `None` when neither override is requested.
    pub fn prepare(dns: Option<&DnsConfig>, hosts: Option<&Path>) -> Result<Option<Self>> {
        if dns.is_none() && hosts.is_none() {
            return Ok(None);
        }

        let resolv_conf = match dns {
            Some(dns) => {
                let host_conf = match std::fs::read_to_string(HOST_RESOLV_CONF) {
                    Ok(contents) => contents,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
                    Err(e) => return Err(io_error_with_path(e, HOST_RESOLV_CONF)),
                };
                let merged = merge_resolv_conf(&host_conf, dns);
                let mut file = tempfile::Builder::new()
                    .prefix("resolv.conf")
                    .tempfile()
                    .map_err(|e| io_error_with_path(e, std::env::temp_dir()))?;
                file.write_all(merged.as_bytes())
                    .map_err(|e| io_error_with_path(e, file.path()))?;
                log::debug!("Wrote resolv.conf override to {}", file.path().display());
                Some(file)
            }
            None => None,
        };

        Ok(Some(Self {
            resolv_conf,
            hosts: hosts.map(Path::to_path_buf),
        }))
    }

    pub fn resolv_conf_path(&self) -> Option<&Path> {
        self.resolv_conf.as_ref().map(NamedTempFile::path)
    }

    pub fn hosts_path(&self) -> Option<&Path> {
        self.hosts.as_deref()
    }

    /// `(source, target)` pairs to bind-mount inside the child.
    pub fn bind_mounts(&self) -> Vec<(&Path, &'static str)> {
        let mut mounts = Vec::with_capacity(2);
        if let Some(hosts) = self.hosts_path() {
            mounts.push((hosts, "/etc/hosts"));
        }
        if let Some(resolv) = self.resolv_conf_path() {
            mounts.push((resolv, HOST_RESOLV_CONF));
        }
        mounts
    }
}

/// Merges an override into the contents of a host resolv.conf.
///
/// Override nameservers come first, followed by host nameservers not already
/// listed. Search domains are merged the same way. Options are keyed by name
/// (the part before `:`), and an override option replaces the host's option
/// of the same name. `domain` and `sortlist` lines are kept, and comments
/// are dropped.
pub fn merge_resolv_conf(host: &str, dns: &DnsConfig) -> String {
    let mut nameservers: Vec<String> = dns.nameservers.clone();
    let mut search: Vec<String> = dns.search_domains.clone();
    let mut host_options: Vec<String> = Vec::new();
    let mut passthrough: Vec<&str> = Vec::new();

    for line in host.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
            continue;
        }
        let mut fields = trimmed.split_whitespace();
        match fields.next() {
            Some("nameserver") => {
                for ns in fields {
                    push_unique(&mut nameservers, ns);
                }
            }
            Some("search") => {
                for domain in fields {
                    push_unique(&mut search, domain);
                }
            }
            Some("options") => host_options.extend(fields.map(str::to_string)),
            Some(_) => passthrough.push(trimmed),
            None => {}
        }
    }

    let option_name = |opt: &str| opt.split(':').next().unwrap_or(opt).to_string();
    let mut options: Vec<String> = dns.options.clone();
    for opt in host_options {
        let name = option_name(&opt);
        if !options.iter().any(|o| option_name(o) == name) {
            options.push(opt);
        }
    }

    let mut out = String::new();
    for ns in &nameservers {
        out.push_str("nameserver ");
        out.push_str(ns);
        out.push('\n');
    }
    if !search.is_empty() {
        out.push_str("search ");
        out.push_str(&search.join(" "));
        out.push('\n');
    }
    if !options.is_empty() {
        out.push_str("options ");
        out.push_str(&options.join(" "));
        out.push('\n');
    }
    for line in passthrough {
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// The DNS search domain a client id is reachable under.
///
/// ```
/// use gitsnap::sandbox::client_domain;
///
/// let domain = client_domain("client-1");
/// assert!(domain.ends_with(".gitsnap.local"));
/// assert_eq!(domain, client_domain("client-1"));
/// ```
pub fn client_domain(client_id: &str) -> String {
    let digest = hex::encode(Sha256::digest(client_id.as_bytes()));
    format!("{}{}", &digest[..16], CLIENT_DOMAIN_SUFFIX)
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|v| v == value) {
        list.push(value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST_CONF: &str = "\
# generated by resolvconf
nameserver 10.0.0.2
nameserver 1.1.1.1
search corp.example lan
options ndots:2 timeout:1
domain corp.example
";

    #[test]
    fn test_merge_prepends_nameservers_and_dedupes() {
        let dns = DnsConfig {
            nameservers: vec!["1.1.1.1".into(), "8.8.8.8".into()],
            ..Default::default()
        };
        let merged = merge_resolv_conf(HOST_CONF, &dns);
        let nameservers: Vec<_> = merged
            .lines()
            .filter(|l| l.starts_with("nameserver"))
            .collect();
        assert_eq!(
            nameservers,
            vec!["nameserver 1.1.1.1", "nameserver 8.8.8.8", "nameserver 10.0.0.2"]
        );
    }

    #[test]
    fn test_merge_search_and_options_override_wins() {
        let dns = DnsConfig {
            nameservers: vec![],
            search_domains: vec!["abc.gitsnap.local".into(), "lan".into()],
            options: vec!["ndots:5".into(), "rotate".into()],
        };
        let merged = merge_resolv_conf(HOST_CONF, &dns);
        assert!(merged.contains("search abc.gitsnap.local lan corp.example\n"));
        assert!(merged.contains("options ndots:5 rotate timeout:1\n"));
        assert!(merged.contains("domain corp.example\n"));
        assert!(!merged.contains('#'));
    }

    #[test]
    fn test_merge_with_empty_host_conf() {
        let dns = DnsConfig {
            nameservers: vec!["9.9.9.9".into()],
            search_domains: vec!["svc.local".into()],
            options: vec![],
        };
        assert_eq!(
            merge_resolv_conf("", &dns),
            "nameserver 9.9.9.9\nsearch svc.local\n"
        );
    }

    #[test]
    fn test_prepare_without_overrides_is_none() {
        assert!(NetworkOverride::prepare(None, None).unwrap().is_none());
    }

    #[test]
    fn test_prepare_hosts_only() {
        let hosts = tempfile::NamedTempFile::new().unwrap();
        let over = NetworkOverride::prepare(None, Some(hosts.path()))
            .unwrap()
            .unwrap();
        assert_eq!(over.hosts_path(), Some(hosts.path()));
        assert!(over.resolv_conf_path().is_none());
        assert_eq!(over.bind_mounts(), vec![(hosts.path(), "/etc/hosts")]);
    }

    #[test]
    fn test_prepare_writes_resolv_and_cleans_up() {
        let dns = DnsConfig {
            nameservers: vec!["192.0.2.53".into()],
            ..Default::default()
        };
        let over = NetworkOverride::prepare(Some(&dns), None).unwrap().unwrap();
        let path = over.resolv_conf_path().unwrap().to_path_buf();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("nameserver 192.0.2.53\n"));
        drop(over);
        assert!(!path.exists());
    }

    #[test]
    fn test_client_domain_differs_per_client() {
        assert_ne!(client_domain("a"), client_domain("b"));
        assert_eq!(client_domain("a").len(), 16 + CLIENT_DOMAIN_SUFFIX.len());
    }
}
