// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::DeviceIdentity;
use yare::parameterized;

#[test]
fn usable_mac_yields_stable_identity() {
    let mac = [0x00, 0x1A, 0x2B, 0x3C, 0x4D, 0x5E];
    let a = DeviceIdentity::derive("lab-pc-01", Some(mac));
    let b = DeviceIdentity::derive("lab-pc-01", Some(mac));
    assert_eq!(a, b);
    assert_eq!(a.as_str(), "ANM-lab-pc-01-00:1A:2B:3C:4D:5E");
}

#[parameterized(
    all_zero = { [0u8; 6] },
    locally_administered = { [0x02, 0x1A, 0x2B, 0x3C, 0x4D, 0x5E] },
)]
fn unusable_mac_falls_back_to_random(mac: [u8; 6]) {
    let a = DeviceIdentity::derive("lab-pc-01", Some(mac));
    let b = DeviceIdentity::derive("lab-pc-01", Some(mac));
    assert_ne!(a, b, "fallback identities must not collide");
    assert!(a.as_str().starts_with("ANM-lab-pc-01-"));
}

#[test]
fn missing_adapter_falls_back_to_random() {
    let a = DeviceIdentity::derive("host", None);
    let b = DeviceIdentity::derive("host", None);
    assert_ne!(a, b);
}
