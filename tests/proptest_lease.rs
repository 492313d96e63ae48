use std::collections::HashSet;
use std::net::Ipv4Addr;

use proptest::prelude::*;

use apdhcpd::{Config, LeaseTable, MacAddr, ServerConfig};

#[derive(Debug, Clone)]
enum Operation {
    Lease(u8),
    Release(u8),
    Revoke(u8),
}

fn operation() -> impl Strategy<Value = Operation> {
    prop_oneof![
        3 => (0u8..12).prop_map(Operation::Lease),
        2 => (0u8..12).prop_map(Operation::Release),
        1 => (0u8..12).prop_map(Operation::Revoke),
    ]
}

fn config(pool_end: u8, retain_released: bool, max_leases: usize) -> ServerConfig {
    Config {
        server_address: "10.0.0.1".to_string(),
        gateway: "10.0.0.4".to_string(),
        netmask: "255.255.255.248".to_string(),
        pool_start: "10.0.0.0".to_string(),
        pool_end: format!("10.0.0.{}", pool_end),
        retain_released,
        max_leases,
        ..Default::default()
    }
    .resolve()
    .unwrap()
}

fn mac(id: u8) -> MacAddr {
    MacAddr([0x02, 0, 0, 0, 0, id])
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(2000))]

    #[test]
    fn bindings_stay_unique_and_in_range(
        operations in prop::collection::vec(operation(), 0..80),
        pool_end in 0u8..=7,
        retain_released in any::<bool>(),
        max_leases in 1usize..10,
    ) {
        let config = config(pool_end, retain_released, max_leases);
        let mut table = LeaseTable::new(&config);

        for operation in operations {
            match operation {
                Operation::Lease(id) => {
                    if let Ok(first) = table.lease_for(mac(id)) {
                        let ip = u32::from(first.ip);
                        prop_assert!(ip >= u32::from(config.pool_start));
                        prop_assert!(ip <= u32::from(config.pool_end));
                        prop_assert_ne!(first.ip, config.gateway);
                        prop_assert_ne!(first.ip, Ipv4Addr::new(10, 0, 0, 0));
                        prop_assert_ne!(first.ip, Ipv4Addr::new(10, 0, 0, 7));

                        let again = table.lease_for(mac(id)).unwrap();
                        prop_assert_eq!(again.ip, first.ip);
                    }
                }
                Operation::Release(id) => {
                    table.release(mac(id));
                }
                Operation::Revoke(id) => {
                    table.revoke(mac(id));
                }
            }

            let entries = table.snapshot();
            prop_assert!(entries.len() <= max_leases);

            let ips: HashSet<Ipv4Addr> = entries.iter().map(|entry| entry.ip).collect();
            let macs: HashSet<MacAddr> = entries.iter().map(|entry| entry.mac).collect();
            prop_assert_eq!(ips.len(), entries.len());
            prop_assert_eq!(macs.len(), entries.len());
        }
    }

    #[test]
    fn release_then_lease_returns_same_address(
        others in prop::collection::vec(1u8..12, 0..4),
    ) {
        let config = config(7, true, 32);
        let mut table = LeaseTable::new(&config);

        let before = table.lease_for(mac(0)).unwrap().ip;
        for id in &others {
            let _ = table.lease_for(mac(*id));
        }
        table.release(mac(0));

        // Nothing has claimed the released binding yet.
        prop_assert_eq!(table.lease_for(mac(0)).unwrap().ip, before);
    }
}
