// input tables: TOON files -> ledger and measurement snapshot
use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::classify::{ChangeLedger, RawMutation};
use crate::core::measurement::{MeasurementSet, RawEvent, RawMeasurement};
use crate::error::{Error, Result};

/// `mutations[N]{old_id,old_name,new_id,new_name,mutation_date,...}:`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationFile {
    pub mutations: Vec<RawMutation>,
}

/// `events[N]{id,date,title}:` followed by `records[M]{event_id,entity_id,...}:`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementFile {
    pub events: Vec<RawEvent>,
    #[serde(default)]
    pub records: Vec<RawMeasurement>,
}

fn read_table<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toon_format::decode_default(&text).map_err(|source| Error::Decode {
        path: path.to_path_buf(),
        source,
    })
}

pub fn read_mutations(path: &Path) -> Result<Vec<RawMutation>> {
    let file: MutationFile = read_table(path)?;
    info!(path = %path.display(), rows = file.mutations.len(), "mutation table read");
    Ok(file.mutations)
}

pub fn read_measurements(path: &Path) -> Result<MeasurementFile> {
    let file: MeasurementFile = read_table(path)?;
    info!(
        path = %path.display(),
        events = file.events.len(),
        records = file.records.len(),
        "measurement tables read"
    );
    Ok(file)
}

/// Read and classify. Bad rows end up in [`ChangeLedger::issues`], only an
/// unreadable file is an error.
pub fn load_ledger(path: &Path) -> Result<ChangeLedger> {
    let rows = read_mutations(path)?;
    Ok(ChangeLedger::from_raw(&rows))
}

pub fn load_measurements(path: &Path) -> Result<MeasurementSet> {
    let file = read_measurements(path)?;
    Ok(MeasurementSet::from_raw(&file.events, &file.records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classify::RawField;
    use crate::core::types::GeoLevel;
    use std::io::Write;

    fn mk_raw(old_id: i64, old_name: &str, new_id: i64, new_name: &str, when: &str) -> RawMutation {
        RawMutation {
            mutation_number: None,
            old_canton: Some("BE".into()),
            old_district: None,
            old_id: RawField::Int(old_id),
            old_name: old_name.to_string(),
            new_canton: Some("BE".into()),
            new_district: None,
            new_id: RawField::Int(new_id),
            new_name: new_name.to_string(),
            mutation_date: when.into(),
        }
    }

    fn mk_measurement(event_id: u32, entity_id: u32, name: &str, level: GeoLevel) -> RawMeasurement {
        RawMeasurement {
            event_id,
            entity_id,
            entity_name: name.to_string(),
            level,
            yes: 30,
            no: 20,
            valid: 50,
            cast: 52,
            eligible: 90,
        }
    }

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn ledger_loads_from_encoded_table() {
        let table = MutationFile {
            mutations: vec![
                mk_raw(1001, "OldTown", 2002, "NewTown", "20100101"),
                mk_raw(2002, "NewTown", 3003, "Capital", "20150101"),
            ],
        };
        let file = write_temp(&toon_format::encode_default(&table).unwrap());

        let ledger = load_ledger(file.path()).unwrap();

        assert_eq!(ledger.len(), 2);
        assert!(ledger.issues().is_empty());
        assert_eq!(ledger.records()[0].old_id, 1001);
        assert_eq!(ledger.records()[1].new_name, "Capital");
    }

    #[test]
    fn hand_written_tabular_mutations_are_accepted() {
        let text = "\
mutations[2]{old_id,old_name,new_id,new_name,mutation_date}:
  1001,OldTown,2002,NewTown,20100101
  1002,Hamlet,2002,NewTown,20100101
";
        let file = write_temp(text);

        let ledger = load_ledger(file.path()).unwrap();

        assert_eq!(ledger.len(), 2);
        assert!(ledger.records().iter().all(|r| r.is_merger));
    }

    #[test]
    fn measurements_load_and_drop_bad_rows() {
        let table = MeasurementFile {
            events: vec![
                RawEvent { id: 1, date: "20050605".into(), title: Some("Schengen".into()) },
                RawEvent { id: 2, date: "someday".into(), title: None },
            ],
            records: vec![
                mk_measurement(1, 1001, "OldTown", GeoLevel::Municipality),
                mk_measurement(1, 1001, "OldTown", GeoLevel::Municipality),
                mk_measurement(1, 240, "Seeland", GeoLevel::District),
                mk_measurement(2, 1001, "OldTown", GeoLevel::Municipality),
            ],
        };
        let file = write_temp(&toon_format::encode_default(&table).unwrap());

        let set = load_measurements(file.path()).unwrap();

        assert_eq!(set.events().len(), 1);
        assert_eq!(set.records().len(), 2);
        // malformed event + duplicate record
        assert_eq!(set.issues().len(), 2);
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_ledger(&dir.path().join("nope.toon")).unwrap_err();
        assert!(matches!(err, Error::Read { .. }));
    }
}
