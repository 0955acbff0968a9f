//! Connection state and the getconfig fetch.
//!
//! The fetcher posts the fixed `ssl-vpn/getconfig.esp` form, routes
//! the response through the interpreter with an XML walker that
//! rebuilds [`ConnectionState`] from scratch, and enforces that the
//! assigned address never drifts across reconnects.

use crate::error::GpstError;
use crate::mtu::calculate_mtu;
use crate::query::{append_opt, filter_fields};
use crate::response::{self, ResponseOutcome};
use crate::transport::{HttpClient, SegmentHints};
use crate::xml::Element;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::{debug, error, info};

/// URL path of the getconfig endpoint.
pub const CONFIG_PATH: &str = "ssl-vpn/getconfig.esp";

/// Tunnel endpoint path used unless the config overrides it.
pub const DEFAULT_TUNNEL_PATH: &str = "/ssl-tunnel-connect.sslvpn";

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// DPD/keepalive default, matching the Windows client.
const DEFAULT_DPD_INTERVAL: Duration = Duration::from_secs(10);

const MAX_DNS_SERVERS: usize = 3;
const MAX_NBNS_SERVERS: usize = 3;

/// Rekey policy pushed by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RekeyMethod {
    #[default]
    None,
    Tunnel {
        interval: Duration,
    },
}

/// Caller-supplied knobs for the session: platform identity and the
/// forced overrides that short-circuit negotiation.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Platform identifier sent as `os-version` (e.g. "linux", "win").
    pub platname: String,
    /// Forced tunnel MTU; 0 means derive it.
    pub req_mtu: u16,
    /// Forced base MTU; 0 means introspect or default.
    pub base_mtu: u16,
    /// Forced DPD interval; `None` means the 10-second default.
    pub force_dpd: Option<Duration>,
    /// Externally known gateway address, cross-checked against the
    /// `gw-address` the config reports (log-only).
    pub gateway_addr: Option<String>,
}

/// Mutable session configuration, fully overwritten by each successful
/// config fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionState {
    pub addr: Option<Ipv4Addr>,
    pub netmask: Option<Ipv4Addr>,
    pub dns: Vec<Ipv4Addr>,
    pub nbns: Vec<Ipv4Addr>,
    pub domain: Option<String>,
    pub mtu: u16,
    pub split_includes: Vec<String>,
    pub rekey: RekeyMethod,
    pub dpd_interval: Duration,
    pub keepalive_interval: Duration,
    /// URL path of the tunnel endpoint for the GET handshake.
    pub urlpath: String,
    /// GlobalProtect SSL tunnels carry no IPv6; always true after a
    /// fetch so the caller disables IPv6 on the interface.
    pub ipv6_disabled: bool,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            addr: None,
            netmask: None,
            dns: Vec::new(),
            nbns: Vec::new(),
            domain: None,
            mtu: 0,
            split_includes: Vec::new(),
            rekey: RekeyMethod::None,
            dpd_interval: Duration::ZERO,
            keepalive_interval: Duration::ZERO,
            urlpath: DEFAULT_TUNNEL_PATH.to_string(),
            ipv6_disabled: false,
        }
    }
}

impl ConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every field the next fetch will re-populate. The DPD
    /// interval survives (it is negotiated once) and so does the
    /// tunnel path (replaced only when the config carries one).
    fn clear_fetched(&mut self) {
        self.addr = None;
        self.netmask = None;
        self.domain = None;
        self.mtu = 0;
        self.rekey = RekeyMethod::None;
        self.dns.clear();
        self.nbns.clear();
        self.split_includes.clear();
    }
}

/// Fetch and apply the tunnel configuration.
///
/// On a reconnect (the session already holds an address), the request
/// advertises it as `preferred-ip` and the reply must agree: a changed
/// address or netmask fails with `ConfigInconsistent` rather than
/// silently re-plumbing the interface.
pub fn fetch_config(
    http: &mut dyn HttpClient,
    state: &mut ConnectionState,
    cookie: &str,
    opts: &SessionOptions,
    hints: Option<SegmentHints>,
    ipv6_peer: bool,
) -> Result<(), GpstError> {
    let old_addr = state.addr;
    let old_netmask = state.netmask;

    let body = build_config_request(opts, cookie, old_addr);
    let result = http.post(CONFIG_PATH, FORM_CONTENT_TYPE, &body);

    {
        let mut walker = |root: &Element| parse_config_xml(state, opts, root);
        match response::interpret(result, false, Some(&mut walker))? {
            ResponseOutcome::Done => {}
            // getconfig never opts into challenges
            ResponseOutcome::NeedsInput(_) => return Err(GpstError::ParseFailure),
        }
    }

    if state.mtu == 0 {
        // GP gateways habitually report <mtu>0</mtu>
        state.mtu = calculate_mtu(opts.req_mtu, opts.base_mtu, hints.as_ref(), ipv6_peer);
        error!("No MTU received. Calculated {}", state.mtu);
    }

    let addr = match state.addr {
        Some(addr) => addr,
        None => {
            error!("No IP address received. Aborting");
            return Err(GpstError::MissingField("ip-address"));
        }
    };

    if let Some(old) = old_addr {
        if old != addr {
            error!("Reconnect gave different IP address ({} != {})", addr, old);
            return Err(GpstError::ConfigInconsistent(format!(
                "IP address changed across reconnect ({} != {})",
                addr, old
            )));
        }
    }
    if let Some(old) = old_netmask {
        if state.netmask != Some(old) {
            let got = state
                .netmask
                .map(|m| m.to_string())
                .unwrap_or_else(|| "none".to_string());
            error!("Reconnect gave different netmask ({} != {})", got, old);
            return Err(GpstError::ConfigInconsistent(format!(
                "netmask changed across reconnect ({} != {})",
                got, old
            )));
        }
    }

    Ok(())
}

/// Build the getconfig POST body. The platform identifier "win" is
/// reported to the server as clientos "Windows".
fn build_config_request(opts: &SessionOptions, cookie: &str, old_addr: Option<Ipv4Addr>) -> String {
    let mut body = String::from("client-type=1&protocol-version=p1&app-version=3.0.1-10");
    append_opt(&mut body, "os-version", &opts.platname);
    let clientos = if opts.platname == "win" {
        "Windows"
    } else {
        &opts.platname
    };
    append_opt(&mut body, "clientos", clientos);
    append_opt(&mut body, "hmac-algo", "sha1,md5");
    append_opt(&mut body, "enc-algo", "aes-128-cbc,aes-256-cbc");

    match old_addr {
        Some(addr) => {
            append_opt(&mut body, "preferred-ip", &addr.to_string());
            let filtered = filter_fields(cookie, "preferred-ip", false);
            if !filtered.is_empty() {
                body.push('&');
                body.push_str(&filtered);
            }
        }
        None => {
            body.push('&');
            body.push_str(cookie);
        }
    }
    body
}

/// Walk the config XML and rebuild `state` from it. Unrecognized
/// elements are skipped; recognized ones overwrite the cleared state.
fn parse_config_xml(
    state: &mut ConnectionState,
    opts: &SessionOptions,
    root: &Element,
) -> Result<(), GpstError> {
    if root.name != "response" {
        return Err(GpstError::ParseFailure);
    }

    state.clear_fetched();

    for node in &root.children {
        match node.name.as_str() {
            "ip-address" => {
                state.addr = Some(node.text().parse().map_err(|_| GpstError::ParseFailure)?);
            }
            "netmask" => {
                state.netmask = Some(node.text().parse().map_err(|_| GpstError::ParseFailure)?);
            }
            "mtu" => {
                state.mtu = node.text().parse().unwrap_or(0);
            }
            "ssl-tunnel-url" => {
                state.urlpath = node.text().to_string();
                if state.urlpath != DEFAULT_TUNNEL_PATH {
                    info!("Non-standard SSL tunnel path: {}", state.urlpath);
                }
            }
            "timeout" => {
                let secs: u64 = node.text().parse().unwrap_or(0);
                info!("Tunnel timeout (rekey interval) is {} minutes", secs / 60);
                state.rekey = RekeyMethod::Tunnel {
                    interval: Duration::from_secs(secs.saturating_sub(60)),
                };
            }
            "gw-address" => {
                // This is a tunnel; the gateway address is only ever
                // informational.
                if let Some(known) = &opts.gateway_addr {
                    if node.text() != known {
                        debug!(
                            "Gateway address in config XML ({}) differs from external gateway address ({})",
                            node.text(),
                            known
                        );
                    }
                }
            }
            "dns" => {
                state.dns = member_addrs(node, MAX_DNS_SERVERS);
            }
            "wins" => {
                state.nbns = member_addrs(node, MAX_NBNS_SERVERS);
            }
            "dns-suffix" => {
                state.domain = node
                    .children
                    .iter()
                    .find(|c| c.name == "member")
                    .map(|c| c.text().to_string());
            }
            "access-routes" => {
                state.split_includes = node
                    .children
                    .iter()
                    .filter(|c| c.name == "member")
                    .map(|c| c.text().to_string())
                    .collect();
            }
            "ipsec" => {
                debug!("Ignoring ESP keys since ESP support not available in this build");
            }
            _ => {}
        }
    }

    // No IPv6 support on GlobalProtect SSL tunnels.
    state.ipv6_disabled = true;

    if state.dpd_interval.is_zero() {
        state.dpd_interval = opts.force_dpd.unwrap_or(DEFAULT_DPD_INTERVAL);
    }
    state.keepalive_interval = state.dpd_interval;

    Ok(())
}

/// Up to `cap` parseable `<member>` addresses, document order.
fn member_addrs(node: &Element, cap: usize) -> Vec<Ipv4Addr> {
    node.children
        .iter()
        .filter(|c| c.name == "member")
        .filter_map(|c| c.text().parse().ok())
        .take(cap)
        .collect()
}
