//! Reference tables the builder consults: SNMP OID names and MAC vendors.

use std::collections::HashMap;

/// `sysObjectID` → product name.
pub trait OidLookup: Send + Sync {
    fn oid_name(&self, oid: &str) -> Option<&str>;
}

/// MAC prefix (`aa:bb:cc`) → vendor name.
pub trait VendorLookup: Send + Sync {
    fn vendor(&self, prefix: &str) -> Option<&str>;
}

impl OidLookup for HashMap<String, String> {
    fn oid_name(&self, oid: &str) -> Option<&str> {
        self.get(oid).map(String::as_str)
    }
}

impl VendorLookup for HashMap<String, String> {
    fn vendor(&self, prefix: &str) -> Option<&str> {
        self.get(prefix).map(String::as_str)
    }
}

/// Name of the closest known OID.
///
/// On a miss the last `.`-segment is dropped and the lookup retried, at most
/// `max_tries` lookups in total (`0` for no limit). The walk stops once the
/// truncated OID leaves `down_to` or is no longer than it. Falls back to the
/// OID itself.
pub fn decode_oid_name(
    oids: &dyn OidLookup,
    oid: &str,
    down_to: Option<&str>,
    max_tries: usize,
) -> String {
    let mut current = oid;
    let mut tries = 0;
    while !current.is_empty() {
        if let Some(name) = oids.oid_name(current) {
            return name.to_string();
        }
        tries += 1;
        if max_tries > 0 && tries >= max_tries {
            break;
        }
        let Some(dot) = current.rfind('.') else {
            break;
        };
        current = &current[..dot];
        if let Some(base) = down_to {
            if !current.starts_with(base) || current.len() <= base.len() {
                break;
            }
        }
    }
    oid.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oids() -> HashMap<String, String> {
        HashMap::from([(
            ".1.3.6.1.4.1.9.1".to_string(),
            "ciscoProducts".to_string(),
        )])
    }

    #[test]
    fn walks_up_to_known_prefix() {
        let name = decode_oid_name(&oids(), ".1.3.6.1.4.1.9.1.1208", Some(".1.3.6.1.4.1"), 6);
        assert_eq!(name, "ciscoProducts");
    }

    #[test]
    fn bounded_by_tries_and_base() {
        let oid = ".1.3.6.1.4.1.9.1.2.3.4.5.6.7";
        assert_eq!(decode_oid_name(&oids(), oid, Some(".1.3.6.1.4.1"), 6), oid);
        let oid = ".1.3.6.1.4.1.99.1";
        assert_eq!(decode_oid_name(&oids(), oid, Some(".1.3.6.1.4.1"), 0), oid);
    }
}
