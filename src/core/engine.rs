// analysis engine: one snapshot in, every derived table out
use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::core::aggregate::{AggregatedMeasurement, AggregationEngine, AggregationOutput, Exclusion};
use crate::core::classify::{ChangeLedger, LedgerIssue, LedgerSummary, MutationRecord, RawMutation};
use crate::core::conservation::{ConservationReport, ConservationValidator};
use crate::core::graph::{GraphError, MutationGraph};
use crate::core::mapping::IdentityMapping;
use crate::core::measurement::{Entity, MeasurementIssue, MeasurementSet};
use crate::core::quality::{DataQualityReporter, QualityReport};
use crate::core::resolve::{LineageResolver, Resolution, ResolutionIssue, ResolutionOutcome};
use crate::core::types::{EntityId, EventId};
use crate::error::Error;

/// Immutable inputs a derivation is computed from.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub ledger: Arc<ChangeLedger>,
    pub measurements: Arc<MeasurementSet>,
}

/// Everything computed from one snapshot.
#[derive(Debug)]
pub struct Derived {
    pub revision: u64,
    pub snapshot: Snapshot,
    pub graph: MutationGraph,
    pub resolution: ResolutionOutcome,
    pub aggregation: AggregationOutput,
    pub conservation: ConservationReport,
    pub quality: QualityReport,
}

/// The tables downstream consumers get to see.
#[derive(Debug, Clone)]
pub struct PublishedResults {
    pub identity_map: Vec<IdentityMapping>,
    /// rows of verified events only
    pub aggregates: Vec<AggregatedMeasurement>,
    pub withheld_events: BTreeSet<EventId>,
    pub degraded: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub revision: u64,
    pub ledger: LedgerSummary,
    pub ledger_issues: Vec<LedgerIssue>,
    pub measurement_issues: Vec<MeasurementIssue>,
    pub resolution_issues: Vec<ResolutionIssue>,
    /// ids whose outgoing mutations diverge across dates
    pub conflicting_origins: Vec<EntityId>,
    pub exclusions: Vec<Exclusion>,
    pub conservation: ConservationReport,
    pub quality: QualityReport,
    pub degraded: bool,
}

/// One municipality's resolution plus every ledger row it appears in.
#[derive(Debug, Clone, Serialize)]
pub struct Trace {
    pub entity: Entity,
    pub resolution: Resolution,
    pub timeline: Vec<MutationRecord>,
}

/// Owns the current snapshot and memoizes its derivation.
///
/// Any change to the ledger or the measurements bumps the revision and drops
/// the cached [`Derived`]; the next [`AnalysisEngine::derive`] recomputes
/// everything from scratch.
pub struct AnalysisEngine {
    config: EngineConfig,
    ledger: Arc<ChangeLedger>,
    measurements: Arc<MeasurementSet>,
    revision: u64,
    cache: Option<Arc<Derived>>,
}

impl AnalysisEngine {
    pub fn new(
        config: EngineConfig,
        ledger: ChangeLedger,
        measurements: MeasurementSet,
    ) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            config,
            ledger: Arc::new(ledger),
            measurements: Arc::new(measurements),
            revision: 0,
            cache: None,
        })
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            ledger: Arc::clone(&self.ledger),
            measurements: Arc::clone(&self.measurements),
        }
    }

    /// Append mutation rows to the ledger. Earlier snapshots stay untouched.
    pub fn ingest_mutations(&mut self, rows: &[RawMutation]) {
        Arc::make_mut(&mut self.ledger).ingest(rows);
        self.invalidate();
    }

    pub fn replace_measurements(&mut self, measurements: MeasurementSet) {
        self.measurements = Arc::new(measurements);
        self.invalidate();
    }

    fn invalidate(&mut self) {
        self.revision += 1;
        if self.cache.take().is_some() {
            debug!(revision = self.revision, "derived tables invalidated");
        }
    }

    /// Cached derivation for the current revision, computed on first use.
    pub fn derive(&mut self) -> Arc<Derived> {
        if let Some(cached) = &self.cache {
            return Arc::clone(cached);
        }
        let derived = Arc::new(Self::compute(self.revision, self.snapshot(), &self.config));
        self.cache = Some(Arc::clone(&derived));
        derived
    }

    /// Steps:
    /// 1) build the mutation graph and split-origin set
    /// 2) resolve every observed municipality
    /// 3) aggregate per event onto analysis identities
    /// 4) re-check conservation against the raw records
    /// 5) summarize data quality
    fn compute(revision: u64, snapshot: Snapshot, config: &EngineConfig) -> Derived {
        info!(revision, "deriving from snapshot");

        let graph = MutationGraph::build(&snapshot.ledger);
        let entities = snapshot.measurements.entities();

        let resolution = LineageResolver::new(&graph, config.resolver).resolve_all(&entities);
        let aggregation =
            AggregationEngine::new(&resolution.map, config.aggregation).aggregate(&snapshot.measurements);
        let conservation = ConservationValidator::validate(&snapshot.measurements, &aggregation.rows);
        let quality = DataQualityReporter::new(config.top_absorbers).report(
            &resolution.map,
            &resolution.unresolved,
            &snapshot.measurements.participation(),
        );

        if conservation.is_degraded() {
            warn!(
                withheld = ?conservation.withheld_events(),
                "run degraded, affected events withheld from publication"
            );
        }

        Derived {
            revision,
            snapshot,
            graph,
            resolution,
            aggregation,
            conservation,
            quality,
        }
    }

    /// Resolve a single municipality with its full edge path.
    pub fn trace(&mut self, id: EntityId) -> Result<Trace, GraphError> {
        let derived = self.derive();
        let entity = derived
            .snapshot
            .measurements
            .entity(id)
            .ok_or(GraphError::UnknownEntity(id))?;

        let resolution = LineageResolver::new(&derived.graph, self.config.resolver).resolve(&entity)?;
        let timeline = derived.snapshot.ledger.timeline(id).cloned().collect();

        Ok(Trace {
            entity,
            resolution,
            timeline,
        })
    }

    /// Identity map and the aggregates of every event that passed conservation.
    pub fn publish(&mut self) -> PublishedResults {
        let derived = self.derive();
        let publishable = derived.conservation.publishable_events();

        PublishedResults {
            identity_map: derived.resolution.map.iter().cloned().collect(),
            aggregates: derived
                .aggregation
                .rows
                .iter()
                .filter(|r| publishable.contains(&r.event_id))
                .cloned()
                .collect(),
            withheld_events: derived.conservation.withheld_events(),
            degraded: derived.conservation.is_degraded(),
        }
    }

    pub fn report(&mut self) -> RunReport {
        let derived = self.derive();
        RunReport {
            revision: derived.revision,
            ledger: derived.snapshot.ledger.summary(),
            ledger_issues: derived.snapshot.ledger.issues().to_vec(),
            measurement_issues: derived.snapshot.measurements.issues().to_vec(),
            resolution_issues: derived.resolution.issues.clone(),
            conflicting_origins: derived.graph.conflicting_origins().iter().copied().collect(),
            exclusions: derived.aggregation.exclusions.clone(),
            conservation: derived.conservation.clone(),
            quality: derived.quality.clone(),
            degraded: derived.conservation.is_degraded(),
        }
    }
}
