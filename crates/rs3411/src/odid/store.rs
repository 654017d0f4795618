use tracing::debug;

use super::record::{
    Authentication, BasicId, Location, OdidRecord, OperatorId, SelfId, System,
};

/// The single write path into the [`OdidRecord`] (the ingest normaliser).
///
/// Both transports funnel decoded groups through here: validation
/// predicates drop malformed updates, well-formed ones overwrite the record
/// last-writer-wins and refresh the group's `last_update_ms`. For Location
/// and System the freshness stamp is only bumped when the message carries a
/// timestamp different from the previously observed one (or the zero
/// "unknown" marker), so a flight controller replaying a stale fix does not
/// keep the record looking alive.
#[derive(Debug, Default)]
pub struct OdidStore {
    record: OdidRecord,
    last_location_timestamp: f32,
    last_system_timestamp: u32,
}

impl OdidStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self) -> &OdidRecord {
        &self.record
    }

    /// Copy handed to transmit backends; they never borrow the live record.
    pub fn snapshot(&self) -> OdidRecord {
        self.record
    }

    /// Returns false when the update was dropped as malformed.
    pub fn update_basic_id(
        &mut self,
        slot: usize,
        basic_id: BasicId,
        now_ms: u32,
    ) -> bool {
        if slot >= self.record.basic_id.len() || !basic_id.is_well_formed() {
            debug!("dropping malformed basic id update");
            return false;
        }
        let entry = &mut self.record.basic_id[slot];
        entry.value = basic_id;
        entry.valid = true;
        entry.last_update_ms = now_ms;
        true
    }

    pub fn update_location(&mut self, location: Location, now_ms: u32) {
        let entry = &mut self.record.location;
        entry.value = location;
        entry.valid = true;
        if location.timestamp != self.last_location_timestamp
            || location.timestamp == 0.0
        {
            entry.last_update_ms = now_ms;
            self.last_location_timestamp = location.timestamp;
        }
    }

    pub fn update_self_id(&mut self, self_id: SelfId, now_ms: u32) {
        let entry = &mut self.record.self_id;
        entry.value = self_id;
        entry.valid = true;
        entry.last_update_ms = now_ms;
    }

    pub fn update_system(&mut self, system: System, now_ms: u32) {
        let entry = &mut self.record.system;
        entry.value = system;
        entry.valid = true;
        if system.timestamp != self.last_system_timestamp
            || system.timestamp == 0
        {
            entry.last_update_ms = now_ms;
            self.last_system_timestamp = system.timestamp;
        }
    }

    /// Partial update of the operator position inside the System group.
    ///
    /// Only meaningful once a full System message has been seen: until then
    /// the remaining fields are unpopulated and the group stays stale.
    pub fn update_system_operator(
        &mut self,
        operator_latitude: i32,
        operator_longitude: i32,
        operator_altitude_geo: f32,
        timestamp: u32,
        now_ms: u32,
    ) {
        let entry = &mut self.record.system;
        entry.value.operator_latitude = operator_latitude;
        entry.value.operator_longitude = operator_longitude;
        entry.value.operator_altitude_geo = operator_altitude_geo;
        entry.value.timestamp = timestamp;
        if entry.last_update_ms != 0
            && (timestamp != self.last_system_timestamp || timestamp == 0)
        {
            entry.last_update_ms = now_ms;
            self.last_system_timestamp = timestamp;
        }
    }

    pub fn update_operator_id(&mut self, operator_id: OperatorId, now_ms: u32) {
        let entry = &mut self.record.operator_id;
        entry.value = operator_id;
        entry.valid = true;
        entry.last_update_ms = now_ms;
    }

    pub fn update_authentication(
        &mut self,
        authentication: Authentication,
        now_ms: u32,
    ) {
        let entry = &mut self.record.authentication;
        entry.value = authentication;
        entry.valid = true;
        entry.last_update_ms = now_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::odid::record::{copy_str_field, IdType};

    fn valid_basic_id() -> BasicId {
        BasicId {
            id_type: IdType::SerialNumber,
            uas_id: copy_str_field(b"ABC123"),
            ..Default::default()
        }
    }

    #[test]
    fn malformed_basic_id_dropped() {
        let mut store = OdidStore::new();
        assert!(!store.update_basic_id(0, BasicId::default(), 100));
        assert!(!store.record().basic_id[0].valid);

        assert!(store.update_basic_id(0, valid_basic_id(), 100));
        assert!(store.record().basic_id[0].valid);
        assert_eq!(store.record().basic_id[0].last_update_ms, 100);

        // a later malformed update must not clobber the stored value
        assert!(!store.update_basic_id(0, BasicId::default(), 200));
        assert_eq!(store.record().basic_id[0].value.uas_id_str(), "ABC123");
        assert_eq!(store.record().basic_id[0].last_update_ms, 100);
    }

    #[test]
    fn basic_id_slot_out_of_range() {
        let mut store = OdidStore::new();
        assert!(!store.update_basic_id(2, valid_basic_id(), 100));
    }

    #[test]
    fn duplicate_location_timestamp_does_not_refresh() {
        let mut store = OdidStore::new();
        let loc = Location {
            timestamp: 100.0,
            latitude: 470_000_000,
            longitude: 80_000_000,
            ..Default::default()
        };
        store.update_location(loc, 0);
        assert_eq!(store.record().location.last_update_ms, 0);
        store.update_location(loc, 1000);
        assert_eq!(store.record().location.last_update_ms, 0);
        store.update_location(loc, 4000);
        assert_eq!(store.record().location.last_update_ms, 0);

        // a new fix refreshes
        let loc2 = Location {
            timestamp: 101.0,
            ..loc
        };
        store.update_location(loc2, 5000);
        assert_eq!(store.record().location.last_update_ms, 5000);
    }

    #[test]
    fn zero_location_timestamp_always_refreshes() {
        let mut store = OdidStore::new();
        let loc = Location {
            timestamp: 0.0,
            ..Default::default()
        };
        store.update_location(loc, 500);
        assert_eq!(store.record().location.last_update_ms, 500);
        store.update_location(loc, 1500);
        assert_eq!(store.record().location.last_update_ms, 1500);
    }

    #[test]
    fn last_update_non_decreasing() {
        let mut store = OdidStore::new();
        let mut last = 0;
        for (t, ts) in [(10, 1.0), (20, 2.0), (30, 2.0), (40, 3.0)] {
            store.update_location(
                Location {
                    timestamp: ts,
                    ..Default::default()
                },
                t,
            );
            let now = store.record().location.last_update_ms;
            assert!(now >= last);
            last = now;
        }
    }

    #[test]
    fn system_update_requires_prior_full_system() {
        let mut store = OdidStore::new();
        store.update_system_operator(1, 2, 3.0, 1_700_000_000, 100);
        // fields land but the group stays stale
        assert_eq!(store.record().system.value.operator_latitude, 1);
        assert_eq!(store.record().system.last_update_ms, 0);

        store.update_system(
            System {
                timestamp: 1_700_000_000,
                ..Default::default()
            },
            200,
        );
        assert_eq!(store.record().system.last_update_ms, 200);

        store.update_system_operator(5, 6, 7.0, 1_700_000_100, 300);
        assert_eq!(store.record().system.last_update_ms, 300);
        assert_eq!(store.record().system.value.operator_latitude, 5);
    }

    #[test]
    fn transports_share_one_record() {
        // last writer wins regardless of which link produced the update
        let mut store = OdidStore::new();
        let mut a = valid_basic_id();
        a.uas_id = copy_str_field(b"FROM_SERIAL");
        let mut b = valid_basic_id();
        b.uas_id = copy_str_field(b"FROM_CAN");
        store.update_basic_id(0, a, 10);
        store.update_basic_id(0, b, 20);
        assert_eq!(store.record().basic_id[0].value.uas_id_str(), "FROM_CAN");
        assert_eq!(store.record().basic_id[0].last_update_ms, 20);
    }
}
