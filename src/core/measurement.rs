// measurement snapshot: events, vote tallies and observed entities
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::core::classify::RawField;
use crate::core::types::{Counts, EntityId, EventId, GeoLevel, parse_date};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub id: EventId,
    pub date: RawField,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMeasurement {
    pub event_id: EventId,
    pub entity_id: EntityId,
    pub entity_name: String,
    pub level: GeoLevel,
    pub yes: u64,
    pub no: u64,
    pub valid: u64,
    pub cast: u64,
    pub eligible: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub date: NaiveDate,
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    pub event_id: EventId,
    pub entity_id: EntityId,
    pub entity_name: String,
    pub level: GeoLevel,
    pub counts: Counts,
}

impl From<&RawMeasurement> for MeasurementRecord {
    fn from(raw: &RawMeasurement) -> Self {
        Self {
            event_id: raw.event_id,
            entity_id: raw.entity_id,
            entity_name: raw.entity_name.trim().to_string(),
            level: raw.level,
            counts: Counts::new(raw.yes, raw.no, raw.valid, raw.cast, raw.eligible),
        }
    }
}

/// Presence window of a municipality in the measurement data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entity {
    pub id: EntityId,
    /// name at first appearance
    pub name: String,
    pub first_seen: NaiveDate,
    pub last_seen: NaiveDate,
    pub event_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum MeasurementIssue {
    #[error("event {event_id}: malformed date {value:?}, event and its records skipped")]
    MalformedEvent { event_id: EventId, value: String },

    #[error("event {event_id}: declared twice, later declaration skipped")]
    DuplicateEvent { event_id: EventId },

    #[error("record for entity {entity_id} references unknown event {event_id}, skipped")]
    UnknownEvent { event_id: EventId, entity_id: EntityId },

    #[error("duplicate {level} record ({event_id}, {entity_id}), later row skipped")]
    DuplicateMeasurement {
        event_id: EventId,
        entity_id: EntityId,
        level: GeoLevel,
    },
}

/// Immutable snapshot of events and their records, keyed by
/// `(event_id, entity_id, level)`.
#[derive(Debug, Clone, Default)]
pub struct MeasurementSet {
    events: BTreeMap<EventId, Event>,
    records: Vec<MeasurementRecord>,
    issues: Vec<MeasurementIssue>,
}

impl MeasurementSet {
    /// Validate and index. Record-level problems are reported, never fatal.
    pub fn new(events: Vec<Event>, records: Vec<MeasurementRecord>) -> Self {
        let mut set = Self::default();

        for event in events {
            if set.events.contains_key(&event.id) {
                set.report(MeasurementIssue::DuplicateEvent { event_id: event.id });
                continue;
            }
            set.events.insert(event.id, event);
        }

        let mut seen: HashSet<(EventId, EntityId, GeoLevel)> = HashSet::new();
        for record in records {
            if !set.events.contains_key(&record.event_id) {
                set.report(MeasurementIssue::UnknownEvent {
                    event_id: record.event_id,
                    entity_id: record.entity_id,
                });
                continue;
            }
            if !seen.insert((record.event_id, record.entity_id, record.level)) {
                set.report(MeasurementIssue::DuplicateMeasurement {
                    event_id: record.event_id,
                    entity_id: record.entity_id,
                    level: record.level,
                });
                continue;
            }
            set.records.push(record);
        }

        info!(
            events = set.events.len(),
            records = set.records.len(),
            skipped = set.issues.len(),
            "measurement snapshot loaded"
        );
        set
    }

    pub fn from_raw(events: &[RawEvent], rows: &[RawMeasurement]) -> Self {
        let mut parsed = Vec::with_capacity(events.len());
        let mut bad = Vec::new();
        let mut early_issues = Vec::new();

        for raw in events {
            match parse_date(&raw.date.as_text()) {
                Some(date) => parsed.push(Event {
                    id: raw.id,
                    date,
                    title: raw.title.clone(),
                }),
                None => {
                    bad.push(raw.id);
                    early_issues.push(MeasurementIssue::MalformedEvent {
                        event_id: raw.id,
                        value: raw.date.as_text(),
                    });
                }
            }
        }

        //records of a malformed event are dropped together with it, unless
        //another declaration of the same id is valid
        let declared: HashSet<EventId> = parsed.iter().map(|e| e.id).collect();
        let records = rows
            .iter()
            .filter(|r| declared.contains(&r.event_id) || !bad.contains(&r.event_id))
            .map(MeasurementRecord::from)
            .collect();

        for issue in &early_issues {
            warn!("{}", issue);
        }
        let mut set = Self::new(parsed, records);
        early_issues.append(&mut set.issues);
        set.issues = early_issues;
        set
    }

    fn report(&mut self, issue: MeasurementIssue) {
        warn!("{}", issue);
        self.issues.push(issue);
    }

    pub fn issues(&self) -> &[MeasurementIssue] {
        &self.issues
    }

    pub fn event(&self, id: EventId) -> Option<&Event> {
        self.events.get(&id)
    }

    /// Events in publication order: date, then id.
    pub fn events(&self) -> Vec<&Event> {
        let mut events: Vec<&Event> = self.events.values().collect();
        events.sort_by(|a, b| a.date.cmp(&b.date).then(a.id.cmp(&b.id)));
        events
    }

    pub fn records(&self) -> &[MeasurementRecord] {
        &self.records
    }

    pub fn at_level(&self, level: GeoLevel) -> impl Iterator<Item = &MeasurementRecord> + '_ {
        self.records.iter().filter(move |r| r.level == level)
    }

    /// Records of one level bucketed per event.
    pub fn by_event(&self, level: GeoLevel) -> BTreeMap<EventId, Vec<&MeasurementRecord>> {
        let mut buckets: BTreeMap<EventId, Vec<&MeasurementRecord>> = BTreeMap::new();
        for r in self.at_level(level) {
            buckets.entry(r.event_id).or_default().push(r);
        }
        buckets
    }

    /// Every municipality seen in the data with its presence window. Sorted by id.
    pub fn entities(&self) -> Vec<Entity> {
        // id -> (first (date, event), name there, last date, events)
        let mut acc: HashMap<EntityId, ((NaiveDate, EventId), String, NaiveDate, HashSet<EventId>)> =
            HashMap::new();

        for r in self.at_level(GeoLevel::Municipality) {
            let Some(event) = self.events.get(&r.event_id) else {
                continue;
            };
            let key = (event.date, event.id);
            let entry = acc
                .entry(r.entity_id)
                .or_insert_with(|| (key, r.entity_name.clone(), event.date, HashSet::new()));
            if key < entry.0 {
                entry.0 = key;
                entry.1 = r.entity_name.clone();
            }
            if event.date > entry.2 {
                entry.2 = event.date;
            }
            entry.3.insert(event.id);
        }

        let mut entities: Vec<Entity> = acc
            .into_iter()
            .map(|(id, ((first_seen, _), name, last_seen, events))| Entity {
                id,
                name,
                first_seen,
                last_seen,
                event_count: events.len(),
            })
            .collect();
        entities.sort_by_key(|e| e.id);
        entities
    }

    /// Events each municipality has a record in.
    pub fn participation(&self) -> HashMap<EntityId, BTreeSet<EventId>> {
        let mut events: HashMap<EntityId, BTreeSet<EventId>> = HashMap::new();
        for r in self.at_level(GeoLevel::Municipality) {
            events.entry(r.entity_id).or_default().insert(r.event_id);
        }
        events
    }

    pub fn entity(&self, id: EntityId) -> Option<Entity> {
        self.entities().into_iter().find(|e| e.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn mk_event(id: u32, when: NaiveDate) -> Event {
        Event { id, date: when, title: None }
    }

    fn mk_record(event_id: u32, entity_id: u32, name: &str, yes: u64, valid: u64) -> MeasurementRecord {
        MeasurementRecord {
            event_id,
            entity_id,
            entity_name: name.to_string(),
            level: GeoLevel::Municipality,
            counts: Counts::new(yes, valid - yes, valid, valid, valid * 2),
        }
    }

    #[test]
    fn entities_track_presence_window_and_first_name() {
        let set = MeasurementSet::new(
            vec![mk_event(2, date(2010, 3, 7)), mk_event(1, date(2005, 6, 5))],
            vec![
                mk_record(2, 1001, "Oldtown (BE)", 40, 100),
                mk_record(1, 1001, "OldTown", 50, 100),
                mk_record(2, 2002, "NewTown", 10, 20),
            ],
        );

        let entities = set.entities();
        assert_eq!(entities.len(), 2);

        let old = &entities[0];
        assert_eq!(old.id, 1001);
        assert_eq!(old.name, "OldTown");
        assert_eq!(old.first_seen, date(2005, 6, 5));
        assert_eq!(old.last_seen, date(2010, 3, 7));
        assert_eq!(old.event_count, 2);

        assert_eq!(set.entity(2002).unwrap().first_seen, date(2010, 3, 7));
        assert!(set.entity(9999).is_none());
    }

    #[test]
    fn duplicates_and_unknown_events_are_reported() {
        let set = MeasurementSet::new(
            vec![mk_event(1, date(2005, 6, 5)), mk_event(1, date(2006, 1, 1))],
            vec![
                mk_record(1, 1001, "A", 1, 2),
                mk_record(1, 1001, "A", 1, 2),
                mk_record(7, 1001, "A", 1, 2),
            ],
        );

        assert_eq!(set.records().len(), 1);
        assert_eq!(set.issues().len(), 3);
        assert!(set.issues().contains(&MeasurementIssue::DuplicateEvent { event_id: 1 }));
        assert!(set.issues().contains(&MeasurementIssue::UnknownEvent {
            event_id: 7,
            entity_id: 1001
        }));
        assert_eq!(set.event(1).unwrap().date, date(2005, 6, 5));
    }

    #[test]
    fn same_id_on_other_levels_is_not_a_duplicate() {
        let mut district = mk_record(1, 241, "Bern-Mittelland", 5, 10);
        district.level = GeoLevel::District;
        let set = MeasurementSet::new(
            vec![mk_event(1, date(2005, 6, 5))],
            vec![mk_record(1, 241, "Somewhere", 1, 2), district],
        );

        assert!(set.issues().is_empty());
        assert_eq!(set.at_level(GeoLevel::District).count(), 1);
        assert_eq!(set.entities().len(), 1);
    }

    #[test]
    fn from_raw_drops_malformed_events_with_their_records() {
        let events = vec![
            RawEvent { id: 1, date: RawField::Int(20050605), title: Some("Schengen".into()) },
            RawEvent { id: 2, date: "someday".into(), title: None },
        ];
        let row = |event_id| RawMeasurement {
            event_id,
            entity_id: 1001,
            entity_name: " OldTown ".into(),
            level: GeoLevel::Municipality,
            yes: 60,
            no: 40,
            valid: 100,
            cast: 102,
            eligible: 200,
        };

        let set = MeasurementSet::from_raw(&events, &[row(1), row(2)]);

        assert_eq!(set.records().len(), 1);
        assert_eq!(set.records()[0].entity_name, "OldTown");
        assert_eq!(set.issues().len(), 1);
        assert!(matches!(set.issues()[0], MeasurementIssue::MalformedEvent { event_id: 2, .. }));
        assert_eq!(set.events().len(), 1);
    }

    #[test]
    fn valid_redeclaration_keeps_records_of_a_malformed_one() {
        let events = vec![
            RawEvent { id: 1, date: "n/a".into(), title: None },
            RawEvent { id: 1, date: "20050605".into(), title: None },
        ];
        let row = RawMeasurement {
            event_id: 1,
            entity_id: 1001,
            entity_name: "OldTown".into(),
            level: GeoLevel::Municipality,
            yes: 60,
            no: 40,
            valid: 100,
            cast: 102,
            eligible: 200,
        };

        let set = MeasurementSet::from_raw(&events, &[row]);

        assert_eq!(set.records().len(), 1);
        assert_eq!(set.event(1).unwrap().date, date(2005, 6, 5));
        assert_eq!(set.issues().len(), 1);
        assert!(matches!(set.issues()[0], MeasurementIssue::MalformedEvent { event_id: 1, .. }));
    }

    #[test]
    fn participation_lists_events_per_municipality() {
        let mut district = mk_record(2, 241, "Seeland", 5, 10);
        district.level = GeoLevel::District;
        let set = MeasurementSet::new(
            vec![mk_event(1, date(2005, 6, 5)), mk_event(2, date(2010, 3, 7))],
            vec![
                mk_record(1, 1001, "OldTown", 1, 2),
                mk_record(2, 1001, "OldTown", 1, 2),
                mk_record(2, 2002, "NewTown", 1, 2),
                district,
            ],
        );

        let participation = set.participation();

        assert_eq!(participation.len(), 2);
        assert_eq!(participation[&1001], BTreeSet::from([1, 2]));
        assert_eq!(participation[&2002], BTreeSet::from([2]));
    }

    #[test]
    fn events_are_ordered_by_date_then_id() {
        let set = MeasurementSet::new(
            vec![
                mk_event(9, date(2001, 1, 1)),
                mk_event(3, date(2001, 1, 1)),
                mk_event(1, date(2005, 1, 1)),
            ],
            vec![],
        );
        let order: Vec<u32> = set.events().iter().map(|e| e.id).collect();
        assert_eq!(order, vec![3, 9, 1]);
    }
}
