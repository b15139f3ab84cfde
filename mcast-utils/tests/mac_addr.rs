//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use mcast_utils::mac_addr::MacAddr;

#[test]
fn test_multicast_mac_derivation() {
    for (group, mac) in [
        (Ipv4Addr::new(224, 0, 0, 1), "01:00:5e:00:00:01"),
        (Ipv4Addr::new(239, 255, 0, 1), "01:00:5e:7f:00:01"),
        // The top 9 bits of the group address are discarded, so distinct
        // groups can share a MAC address.
        (Ipv4Addr::new(225, 129, 1, 1), "01:00:5e:01:01:01"),
        (Ipv4Addr::new(224, 1, 1, 1), "01:00:5e:01:01:01"),
    ] {
        let mac = mac.parse::<MacAddr>().unwrap();
        assert_eq!(MacAddr::multicast_for_v4(group), mac);
        assert!(mac.is_multicast());
    }
}

#[test]
fn test_parse_display() {
    let mac = "00:50:56:aa:aa:aa".parse::<MacAddr>().unwrap();
    assert_eq!(mac.as_bytes(), [0x00, 0x50, 0x56, 0xaa, 0xaa, 0xaa]);
    assert_eq!(mac.to_string(), "00:50:56:aa:aa:aa");
    assert!(!mac.is_multicast());

    assert_eq!(
        "aa-bb-cc-dd-ee-ff".parse::<MacAddr>().unwrap(),
        MacAddr::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]),
    );
    assert!("aabbccddeeff".parse::<MacAddr>().is_err());
    assert!("aa:bb:cc:dd:ee".parse::<MacAddr>().is_err());
    assert!("aa:bb:cc:dd:ee:zz".parse::<MacAddr>().is_err());
}
