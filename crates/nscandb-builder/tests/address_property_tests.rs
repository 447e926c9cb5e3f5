//! Property tests for netmask and broadcast arithmetic.

use std::net::Ipv4Addr;

use nscandb_builder::device::{broadcast_ip, network_prefix};
use proptest::prelude::*;

fn mask_of(prefix: u32) -> String {
    let bits = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
    Ipv4Addr::from(bits).to_string()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn contiguous_masks_give_their_prefix(prefix in 0u32..=32) {
        prop_assert_eq!(network_prefix(Some(&mask_of(prefix))), prefix);
    }

    #[test]
    fn broadcast_keeps_network_and_sets_host_bits(addr in any::<u32>(), prefix in 0u32..=32) {
        let ip = Ipv4Addr::from(addr).to_string();
        let bcast: Ipv4Addr = broadcast_ip(&ip, prefix).unwrap().parse().unwrap();
        let host = if prefix == 32 { 0 } else { u32::MAX >> prefix };
        prop_assert_eq!(u32::from(bcast) & !host, addr & !host);
        prop_assert_eq!(u32::from(bcast) & host, host);
    }
}
