// output artifacts: TOON tables, JSON report and the wide CSV export
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::core::aggregate::AggregatedMeasurement;
use crate::core::engine::{PublishedResults, RunReport};
use crate::core::mapping::IdentityMapping;
use crate::core::measurement::MeasurementSet;
use crate::core::types::{EntityId, EventId, GeoLevel};
use crate::error::{Error, Result};

pub const IDENTITY_MAP_FILE: &str = "identity_map.toon";
pub const AGGREGATES_FILE: &str = "aggregates.toon";
pub const EXPORT_FILE: &str = "export.csv";
pub const REPORT_FILE: &str = "report.json";

#[derive(Serialize)]
struct IdentityMapFile<'a> {
    mappings: &'a [IdentityMapping],
}

#[derive(Serialize)]
struct AggregatesFile<'a> {
    aggregates: &'a [AggregatedMeasurement],
}

/// Paths of everything [`write_artifacts`] produced.
#[derive(Debug, Clone)]
pub struct Artifacts {
    pub identity_map: PathBuf,
    pub aggregates: PathBuf,
    pub export: PathBuf,
    pub report: PathBuf,
}

fn write_text(path: &Path, text: &str) -> Result<()> {
    fs::write(path, text).map_err(|source| Error::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn write_toon<T: Serialize>(path: &Path, what: &'static str, value: &T) -> Result<()> {
    let text = toon_format::encode_default(value).map_err(|source| Error::Encode { what, source })?;
    write_text(path, &text)
}

pub fn write_identity_map(path: &Path, mappings: &[IdentityMapping]) -> Result<()> {
    write_toon(path, "identity map", &IdentityMapFile { mappings })
}

pub fn write_aggregates(path: &Path, aggregates: &[AggregatedMeasurement]) -> Result<()> {
    write_toon(path, "aggregates", &AggregatesFile { aggregates })
}

pub fn write_report(path: &Path, report: &RunReport) -> Result<()> {
    let text = serde_json::to_string_pretty(report)?;
    write_text(path, &text)
}

pub fn write_wide_csv(path: &Path, published: &PublishedResults, measurements: &MeasurementSet) -> Result<()> {
    write_text(path, &render_wide_csv(published, measurements))
}

/// Write all four artifacts into `dir`, creating it if needed.
pub fn write_artifacts(
    dir: &Path,
    published: &PublishedResults,
    report: &RunReport,
    measurements: &MeasurementSet,
) -> Result<Artifacts> {
    fs::create_dir_all(dir).map_err(|source| Error::Write {
        path: dir.to_path_buf(),
        source,
    })?;

    let artifacts = Artifacts {
        identity_map: dir.join(IDENTITY_MAP_FILE),
        aggregates: dir.join(AGGREGATES_FILE),
        export: dir.join(EXPORT_FILE),
        report: dir.join(REPORT_FILE),
    };

    write_identity_map(&artifacts.identity_map, &published.identity_map)?;
    write_aggregates(&artifacts.aggregates, &published.aggregates)?;
    write_wide_csv(&artifacts.export, published, measurements)?;
    write_report(&artifacts.report, report)?;

    info!(
        dir = %dir.display(),
        mappings = published.identity_map.len(),
        aggregates = published.aggregates.len(),
        withheld = published.withheld_events.len(),
        "artifacts written"
    );
    Ok(artifacts)
}

//(yes, no, yes share) of one geo unit in one event
type Cell = (u64, u64, Option<f64>);

struct WideRow {
    level: GeoLevel,
    id: EntityId,
    name: String,
    cells: HashMap<EventId, Cell>,
}

fn sorted_rows(rows: BTreeMap<EntityId, WideRow>) -> Vec<WideRow> {
    let mut rows: Vec<WideRow> = rows.into_values().collect();
    rows.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
    rows
}

fn pass_through(measurements: &MeasurementSet, level: GeoLevel) -> Vec<WideRow> {
    let mut rows: BTreeMap<EntityId, WideRow> = BTreeMap::new();
    for r in measurements.at_level(level) {
        let row = rows.entry(r.entity_id).or_insert_with(|| WideRow {
            level,
            id: r.entity_id,
            name: r.entity_name.clone(),
            cells: HashMap::new(),
        });
        row.cells
            .insert(r.event_id, (r.counts.yes, r.counts.no, r.counts.yes_share()));
    }
    sorted_rows(rows)
}

/// One row per geo unit, three columns per published event.
///
/// Municipality rows come from the aggregates (analysis identities), district
/// and canton rows straight from the measurement snapshot. Withheld events
/// get no columns at all.
pub fn render_wide_csv(published: &PublishedResults, measurements: &MeasurementSet) -> String {
    let events: Vec<EventId> = measurements
        .events()
        .iter()
        .map(|e| e.id)
        .filter(|id| !published.withheld_events.contains(id))
        .collect();

    let mut municipalities: BTreeMap<EntityId, WideRow> = BTreeMap::new();
    for a in &published.aggregates {
        let row = municipalities.entry(a.analysis_id).or_insert_with(|| WideRow {
            level: GeoLevel::Municipality,
            id: a.analysis_id,
            name: a.analysis_name.clone(),
            cells: HashMap::new(),
        });
        row.cells
            .insert(a.event_id, (a.counts.yes, a.counts.no, a.yes_pct));
    }

    let mut rows = sorted_rows(municipalities);
    rows.extend(pass_through(measurements, GeoLevel::District));
    rows.extend(pass_through(measurements, GeoLevel::Canton));

    let mut out = String::new();

    let mut header = vec!["geo_type".to_string(), "geo_id".to_string(), "geo_name".to_string()];
    for id in &events {
        header.push(format!("{id}_yes"));
        header.push(format!("{id}_no"));
        header.push(format!("{id}_pct"));
    }
    push_record(&mut out, &header);

    for row in &rows {
        let mut fields = vec![row.level.to_string(), row.id.to_string(), row.name.clone()];
        for id in &events {
            match row.cells.get(id) {
                Some((yes, no, pct)) => {
                    fields.push(yes.to_string());
                    fields.push(no.to_string());
                    fields.push(pct.map(|p| format!("{p:.2}")).unwrap_or_default());
                }
                None => fields.extend([String::new(), String::new(), String::new()]),
            }
        }
        push_record(&mut out, &fields);
    }
    out
}

fn push_record(out: &mut String, fields: &[String]) {
    for (i, f) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&quote(f));
    }
    out.push('\n');
}

fn quote(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
