use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Well-known TCP ports and the service conventionally bound to them.
pub static COMMON_SERVICE_PORTS: Lazy<HashMap<u16, &'static str>> = Lazy::new(|| {
    let mut map = HashMap::new();
    map.insert(20, "FTP-DATA");
    map.insert(21, "FTP");
    map.insert(22, "SSH");
    map.insert(23, "TELNET");
    map.insert(25, "SMTP");
    map.insert(53, "DNS");
    map.insert(80, "HTTP");
    map.insert(110, "POP3");
    map.insert(143, "IMAP");
    map.insert(161, "SNMP");
    map.insert(179, "BGP");
    map.insert(389, "LDAP");
    map.insert(443, "HTTPS");
    map.insert(445, "SMB");
    map.insert(465, "SMTPS");
    map.insert(587, "SMTP-TLS");
    map.insert(636, "LDAPS");
    map.insert(993, "IMAPS");
    map.insert(995, "POP3S");
    map.insert(1433, "MSSQL");
    map.insert(3306, "MySQL");
    map.insert(3389, "RDP");
    map.insert(5432, "PostgreSQL");
    map.insert(5900, "VNC");
    map.insert(6379, "Redis");
    map.insert(8080, "HTTP-ALT");
    map.insert(8443, "HTTPS-ALT");
    map.insert(27017, "MongoDB");
    map.insert(50000, "SAP");
    map
});

/// Look up the conventional service name for `port`.
pub fn service_name(port: u16) -> Option<&'static str> {
    COMMON_SERVICE_PORTS.get(&port).copied()
}

/// All table entries, ascending by port.
pub fn common_service_ports() -> Vec<(u16, &'static str)> {
    let mut entries: Vec<_> = COMMON_SERVICE_PORTS.iter().map(|(p, n)| (*p, *n)).collect();
    entries.sort_by_key(|(p, _)| *p);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_ports_resolve() {
        assert_eq!(service_name(22), Some("SSH"));
        assert_eq!(service_name(5432), Some("PostgreSQL"));
        assert_eq!(service_name(3389), Some("RDP"));
        assert_eq!(service_name(54321), None);
    }

    #[test]
    fn listing_is_sorted() {
        let all = common_service_ports();
        assert!(all.len() >= 25);
        assert!(all.windows(2).all(|w| w[0].0 < w[1].0));
    }
}
