//! Arming-readiness policy.
//!
//! Combines per-group freshness deadlines and content rules over the ODID
//! record into a single status/reason pair. The result is broadcast
//! continuously on both transports (`OPEN_DRONE_ID_ARM_STATUS` on MAVLink,
//! `dronecan.remoteid.ArmStatus` on CAN); failing the check is a steady
//! state, never a fault.

use serde::Serialize;

use crate::odid::OdidRecord;
use crate::params::{Parameters, OPTIONS_FORCE_ARM_OK};

/// Vehicle location and operator location (System) must track at this rate
/// to satisfy the broadcast rules.
pub const MAX_AGE_LOCATION_MS: u32 = 3000;
/// The remaining groups only change on operator action.
pub const MAX_AGE_OTHER_MS: u32 = 22000;

/// The reason string is bounded like the wire fields that carry it.
pub const REASON_MAX_LEN: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
#[serde(rename_all = "snake_case")]
pub enum ArmStatus {
    GoodToArm = 0,
    PreArmFailGeneric = 1,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArmState {
    pub status: ArmStatus,
    pub reason: String,
}

impl ArmState {
    pub fn good() -> Self {
        Self {
            status: ArmStatus::GoodToArm,
            reason: String::new(),
        }
    }
}

/// Evaluate the arming gate.
///
/// `parse_fail` is a sticky upstream failure (bad firmware signature at
/// boot); while set it is prefixed to every reason and arming never
/// succeeds. The `FORCE_ARM_OK` option short-circuits everything.
pub fn arm_status_check(
    record: &OdidRecord,
    params: &Parameters,
    now_ms: u32,
    parse_fail: Option<&str>,
) -> ArmState {
    if params.option_set(OPTIONS_FORCE_ARM_OK) {
        return ArmState::good();
    }

    let mut tags = String::new();

    if !record.location.is_fresh(now_ms, MAX_AGE_LOCATION_MS) {
        tags.push_str("LOC ");
    }
    if !params.have_basic_id_info()
        && !record.basic_id[0].is_fresh(now_ms, MAX_AGE_OTHER_MS)
    {
        tags.push_str("ID ");
    }
    if !record.self_id.is_fresh(now_ms, MAX_AGE_OTHER_MS) {
        tags.push_str("SELF_ID ");
    }
    if !record.operator_id.is_fresh(now_ms, MAX_AGE_OTHER_MS) {
        tags.push_str("OP_ID ");
    }
    // operator location must come in as fast as the vehicle location, so
    // System shares the location deadline
    if !record.system.is_fresh(now_ms, MAX_AGE_LOCATION_MS) {
        tags.push_str("SYS ");
    }
    if record.location.value.latitude == 0 && record.location.value.longitude == 0
    {
        tags.push_str("LOC ");
    }
    if record.system.value.operator_latitude == 0
        && record.system.value.operator_longitude == 0
    {
        tags.push_str("OP_LOC ");
    }

    if tags.is_empty() && parse_fail.is_none() {
        return ArmState::good();
    }

    let mut reason = String::new();
    if let Some(fail) = parse_fail {
        reason.push_str(fail);
        if !tags.is_empty() {
            reason.push(' ');
        }
    }
    reason.push_str(tags.trim_end());
    reason.truncate(REASON_MAX_LEN);

    ArmState {
        status: ArmStatus::PreArmFailGeneric,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::odid::{copy_str_field, BasicId, IdType, Location, OdidStore, OperatorId, SelfId, System};
    use crate::params::OPTIONS_FORCE_ARM_OK;

    fn full_ingest(store: &mut OdidStore, now_ms: u32, timestamp: f32) {
        store.update_basic_id(
            0,
            BasicId {
                id_type: IdType::SerialNumber,
                uas_id: copy_str_field(b"SN1234"),
                ..Default::default()
            },
            now_ms,
        );
        store.update_location(
            Location {
                latitude: 470_000_000,
                longitude: 80_000_000,
                timestamp,
                ..Default::default()
            },
            now_ms,
        );
        store.update_self_id(SelfId::default(), now_ms);
        store.update_system(
            System {
                operator_latitude: 470_000_100,
                operator_longitude: 80_000_100,
                timestamp: 1_700_000_000,
                ..Default::default()
            },
            now_ms,
        );
        store.update_operator_id(OperatorId::default(), now_ms);
    }

    #[test]
    fn fresh_record_arms_then_goes_stale() {
        // ingest everything right after boot, check at 2 s and at 4 s
        // (a stamp of exactly 0 reads as never-seen, hence t=1)
        let mut store = OdidStore::new();
        let params = Parameters::default();
        full_ingest(&mut store, 1, 100.0);

        let state = arm_status_check(store.record(), &params, 2000, None);
        assert_eq!(state.status, ArmStatus::GoodToArm);
        assert!(state.reason.is_empty());

        let state = arm_status_check(store.record(), &params, 4000, None);
        assert_eq!(state.status, ArmStatus::PreArmFailGeneric);
        assert!(state.reason.contains("LOC"));
        assert!(state.reason.contains("SYS"));
        // the 22 s groups are still fine
        assert!(!state.reason.contains("SELF_ID"));
        assert!(!state.reason.contains("OP_ID"));
    }

    #[test]
    fn duplicate_location_timestamps_trip_the_gate() {
        let mut store = OdidStore::new();
        let params = Parameters::default();
        full_ingest(&mut store, 1, 100.0);
        // replay the same fix twice; System keeps moving
        for now in [1000, 4000] {
            store.update_location(
                Location {
                    latitude: 470_000_000,
                    longitude: 80_000_000,
                    timestamp: 100.0,
                    ..Default::default()
                },
                now,
            );
            store.update_system(
                System {
                    operator_latitude: 470_000_100,
                    operator_longitude: 80_000_100,
                    timestamp: 1_700_000_000 + now,
                    ..Default::default()
                },
                now,
            );
        }
        let state = arm_status_check(store.record(), &params, 4500, None);
        assert_eq!(state.status, ArmStatus::PreArmFailGeneric);
        assert!(state.reason.contains("LOC"));
    }

    #[test]
    fn force_arm_ok_overrides_everything() {
        let store = OdidStore::new();
        let mut params = Parameters::default();
        params.options = OPTIONS_FORCE_ARM_OK;
        let state =
            arm_status_check(store.record(), &params, 60_000, Some("bad firmware"));
        assert_eq!(state.status, ArmStatus::GoodToArm);
    }

    #[test]
    fn parameter_basic_id_satisfies_id_check() {
        let mut store = OdidStore::new();
        let mut params = Parameters::default();
        params.uas_id[..6].copy_from_slice(b"SN9999");
        params.id_type = 1;
        full_ingest(&mut store, 1, 100.0);
        // expire only the basic id by rolling far past OTHER_MAX, then
        // refresh everything else
        let now = 30_000;
        store.update_location(
            Location {
                latitude: 1,
                longitude: 1,
                timestamp: 200.0,
                ..Default::default()
            },
            now,
        );
        store.update_self_id(SelfId::default(), now);
        store.update_system(
            System {
                operator_latitude: 1,
                operator_longitude: 1,
                timestamp: 5,
                ..Default::default()
            },
            now,
        );
        store.update_operator_id(OperatorId::default(), now);
        let state = arm_status_check(store.record(), &params, now + 100, None);
        assert_eq!(state.status, ArmStatus::GoodToArm);

        params.id_type = 0;
        let state = arm_status_check(store.record(), &params, now + 100, None);
        assert!(state.reason.contains("ID"));
    }

    #[test]
    fn zero_latlon_is_rejected() {
        let mut store = OdidStore::new();
        let params = Parameters::default();
        full_ingest(&mut store, 1, 100.0);
        store.update_location(
            Location {
                latitude: 0,
                longitude: 0,
                timestamp: 101.0,
                ..Default::default()
            },
            10,
        );
        let state = arm_status_check(store.record(), &params, 100, None);
        assert_eq!(state.status, ArmStatus::PreArmFailGeneric);
        assert_eq!(state.reason, "LOC");
    }

    #[test]
    fn parse_fail_prefixes_reason_and_blocks() {
        let mut store = OdidStore::new();
        let params = Parameters::default();
        full_ingest(&mut store, 1, 100.0);
        let state =
            arm_status_check(store.record(), &params, 1000, Some("bad firmware signature"));
        assert_eq!(state.status, ArmStatus::PreArmFailGeneric);
        assert!(state.reason.starts_with("bad firmware signature"));
    }

    #[test]
    fn reason_is_truncated() {
        let store = OdidStore::new();
        let params = Parameters::default();
        let long_fail = "x".repeat(400);
        let state = arm_status_check(store.record(), &params, 60_000, Some(&long_fail));
        assert!(state.reason.len() <= REASON_MAX_LEN);
    }
}
