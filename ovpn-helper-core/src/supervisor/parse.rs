//! Output line classification.
//!
//! The rules here are the contract, not the mechanism: simple
//! substring/split matching, preserved exactly so behavior stays stable
//! across OpenVPN 2.4/2.5.

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    InitComplete,
    InactiveTimeout,
    InactivityTimeoutOther,
    AssignAddressFailed,
    AuthFailed,
    ServerAddr(String),
    ClientAddr(String),
    None,
}

/// Applies the first matching rule, in order.
pub fn classify(line: &str) -> ParsedLine {
    if line.contains("Initialization Sequence Completed") {
        return ParsedLine::InitComplete;
    }
    if line.contains("Inactivity timeout (--inactive)") {
        return ParsedLine::InactiveTimeout;
    }
    if line.contains("Inactivity timeout") {
        return ParsedLine::InactivityTimeoutOther;
    }
    if line.contains("Can't assign requested address (code=49)") {
        return ParsedLine::AssignAddressFailed;
    }
    if line.contains("AUTH_FAILED") || line.contains("auth-failure") {
        return ParsedLine::AuthFailed;
    }
    if let Some(addr) = parse_link_remote(line) {
        return ParsedLine::ServerAddr(addr);
    }
    if let Some(addr) = parse_network_local_netmask(line) {
        return ParsedLine::ClientAddr(addr);
    }
    if let Some(addr) = parse_ifconfig_netmask(line) {
        return ParsedLine::ClientAddr(addr);
    }
    if let Some(addr) = parse_ip_addr_add(line) {
        return ParsedLine::ClientAddr(addr);
    }
    ParsedLine::None
}

/// `link remote:` → the substring between the last `]` and the last `:`.
fn parse_link_remote(line: &str) -> Option<String> {
    if !line.contains("link remote:") {
        return None;
    }
    let last_bracket = line.rfind(']')?;
    let last_colon = line.rfind(':')?;
    if last_colon <= last_bracket {
        return None;
    }
    Some(line[last_bracket + 1..last_colon].to_owned())
}

/// `network/local/netmask` → the token between the last two `/`.
fn parse_network_local_netmask(line: &str) -> Option<String> {
    if !line.contains("network/local/netmask") {
        return None;
    }
    let parts: Vec<&str> = line.split('/').collect();
    if parts.len() < 3 {
        return None;
    }
    Some(parts[parts.len() - 2].to_owned())
}

/// `ifconfig … netmask` → the second whitespace token between `ifconfig`
/// and `netmask`.
fn parse_ifconfig_netmask(line: &str) -> Option<String> {
    let start = line.find("ifconfig")?;
    let after = &line[start + "ifconfig".len()..];
    let end = after.find("netmask")?;
    let between = after[..end].trim();
    let mut tokens = between.split_whitespace();
    tokens.next()?;
    let addr = tokens.next()?;
    Some(addr.to_owned())
}

/// `ip addr add dev` → the CIDR prefix (before `/`) in the field between
/// `ip addr add dev` and `broadcast`.
fn parse_ip_addr_add(line: &str) -> Option<String> {
    let start = line.find("ip addr add dev")?;
    let after = &line[start + "ip addr add dev".len()..];
    let end = after.find("broadcast")?;
    let between = after[..end].trim();
    let mut tokens = between.split_whitespace();
    tokens.next()?; // the device name
    let cidr = tokens.next()?;
    Some(cidr.split('/').next()?.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_init_complete() {
        assert_eq!(
            classify("Tue Jul 27 12:00:00 2026 Initialization Sequence Completed"),
            ParsedLine::InitComplete
        );
    }

    #[test]
    fn classifies_inactive_vs_other_inactivity() {
        assert_eq!(
            classify("Inactivity timeout (--inactive), exiting"),
            ParsedLine::InactiveTimeout
        );
        assert_eq!(
            classify("Inactivity timeout, restarting"),
            ParsedLine::InactivityTimeoutOther
        );
    }

    #[test]
    fn classifies_auth_failures() {
        assert_eq!(classify("AUTH_FAILED"), ParsedLine::AuthFailed);
        assert_eq!(
            classify("TLS Error: TLS handshake failed auth-failure"),
            ParsedLine::AuthFailed
        );
    }

    #[test]
    fn parses_link_remote_server_addr() {
        assert_eq!(
            classify("UDPv4 link remote: [AF_INET]1.2.3.4:1194"),
            ParsedLine::ServerAddr("1.2.3.4".to_owned())
        );
    }

    #[test]
    fn parses_network_local_netmask_client_addr() {
        assert_eq!(
            classify("TUN/TAP device, network/local/netmask = 10.8.0.6/10.8.0.5/255.255.255.252"),
            ParsedLine::ClientAddr("10.8.0.5".to_owned())
        );
    }

    #[test]
    fn parses_ifconfig_netmask_client_addr() {
        assert_eq!(
            classify("/sbin/ifconfig tun0 10.0.0.5 10.0.0.1 netmask 255.255.255.0 mtu 1500"),
            ParsedLine::ClientAddr("10.0.0.5".to_owned())
        );
    }

    #[test]
    fn parses_ip_addr_add_client_addr() {
        assert_eq!(
            classify("ip addr add dev tun0 10.0.0.5/24 broadcast 10.0.0.255"),
            ParsedLine::ClientAddr("10.0.0.5".to_owned())
        );
    }

    #[test]
    fn assign_address_failure_is_recognized() {
        assert_eq!(
            classify("RESOLVE: Cannot resolve host address: Can't assign requested address (code=49)"),
            ParsedLine::AssignAddressFailed
        );
    }
}
