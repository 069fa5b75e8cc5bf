//! Provenance tracker: records every step a context takes
//!
//! The trail is append-only and kept in memory. It answers "why is this
//! task running" and "how did the model get here" after the fact; the
//! engines never read it back.

use chrono::{DateTime, Utc};
use coordination_types::{CompletionKind, ContextId, Fault, Role, StateId, TaskHandle, TaskId};
use serde::{Deserialize, Serialize};

/// Provenance trail of one coordination context
#[derive(Clone, Debug)]
pub struct ProvenanceTracker {
    context: ContextId,
    enabled: bool,
    records: Vec<ProvenanceRecord>,
}

impl ProvenanceTracker {
    pub fn new(context: ContextId) -> Self {
        Self {
            context,
            enabled: true,
            records: Vec::new(),
        }
    }

    /// A tracker that drops every record
    pub fn disabled(context: ContextId) -> Self {
        Self {
            enabled: false,
            ..Self::new(context)
        }
    }

    /// Record a provenance event
    pub fn record(&mut self, record: ProvenanceRecord) {
        if !self.enabled {
            return;
        }
        tracing::trace!(
            context = %self.context,
            event = %record.event_type,
            "Provenance recorded"
        );
        self.records.push(record);
    }

    pub fn record_started(&mut self, model: &str) {
        self.record(ProvenanceRecord::new(
            ProvenanceEventType::ContextStarted {
                model: model.to_string(),
            },
            format!("Context started running '{}'", model),
        ));
    }

    pub fn record_resolved(&mut self, task: &TaskHandle, role: Option<&Role>) {
        let role = role.map(|r| r.to_string()).unwrap_or_default();
        self.record(ProvenanceRecord::new(
            ProvenanceEventType::TaskResolved {
                task: task.id.clone(),
                role: role.clone(),
            },
            format!("Task {} attached as '{}'", task, role),
        ));
    }

    pub fn record_retired(&mut self, task: &TaskHandle) {
        self.record(ProvenanceRecord::new(
            ProvenanceEventType::TaskRetired {
                task: task.id.clone(),
            },
            format!("Task {} stopped and detached", task),
        ));
    }

    pub fn record_advanced(&mut self, pc: usize, label: &str) {
        self.record(ProvenanceRecord::new(
            ProvenanceEventType::InstructionAdvanced {
                pc,
                label: label.to_string(),
            },
            format!("Instruction {} '{}' exited", pc, label),
        ));
    }

    pub fn record_skipped(&mut self, pc: usize, label: &str) {
        self.record(ProvenanceRecord::new(
            ProvenanceEventType::InstructionSkipped {
                pc,
                label: label.to_string(),
            },
            format!("Instruction {} '{}' skipped by its entry guard", pc, label),
        ));
    }

    pub fn record_transition(&mut self, from: &StateId, to: &StateId) {
        self.record(ProvenanceRecord::new(
            ProvenanceEventType::TransitionFired {
                from: from.clone(),
                to: to.clone(),
            },
            format!("Transition fired: {} -> {}", from, to),
        ));
    }

    pub fn record_finished(&mut self, model: &str, kind: CompletionKind) {
        self.record(ProvenanceRecord::new(
            ProvenanceEventType::ModelFinished {
                model: model.to_string(),
                kind,
            },
            format!("Model '{}' finished ({:?})", model, kind),
        ));
    }

    pub fn record_failed(&mut self, model: &str, reason: &str) {
        self.record(ProvenanceRecord::new(
            ProvenanceEventType::ModelFailed {
                model: model.to_string(),
                reason: reason.to_string(),
            },
            format!("Model '{}' failed: {}", model, reason),
        ));
    }

    pub fn record_fault(&mut self, fault: &Fault, outcome: FaultDisposition, entry: Option<&str>) {
        self.record(ProvenanceRecord::new(
            ProvenanceEventType::FaultHandled {
                origin: fault.origin.clone(),
                category: fault.category.to_string(),
                outcome,
                entry: entry.map(|e| e.to_string()),
            },
            match entry {
                Some(entry) => format!("Fault {} {} by '{}'", fault, outcome, entry),
                None => format!("Fault {} {}", fault, outcome),
            },
        ));
    }

    pub fn record_stopped(&mut self, reason: &str) {
        self.record(ProvenanceRecord::new(
            ProvenanceEventType::ContextStopped {
                reason: reason.to_string(),
            },
            format!("Context stopped: {}", reason),
        ));
    }

    // ── Query methods ────────────────────────────────────────────────

    pub fn records(&self) -> &[ProvenanceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records that mention a task
    pub fn records_for_task(&self, task: &TaskId) -> Vec<&ProvenanceRecord> {
        self.records.iter().filter(|r| r.involves_task(task)).collect()
    }

    /// Fault records with the given disposition
    pub fn faults(&self, outcome: FaultDisposition) -> Vec<&ProvenanceRecord> {
        self.records
            .iter()
            .filter(|r| {
                matches!(&r.event_type, ProvenanceEventType::FaultHandled { outcome: o, .. } if *o == outcome)
            })
            .collect()
    }
}

/// One event in the provenance trail
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    pub event_type: ProvenanceEventType,
    /// Human-readable description
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

impl ProvenanceRecord {
    pub fn new(event_type: ProvenanceEventType, description: impl Into<String>) -> Self {
        Self {
            event_type,
            description: description.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn involves_task(&self, task: &TaskId) -> bool {
        match &self.event_type {
            ProvenanceEventType::TaskResolved { task: t, .. } => t == task,
            ProvenanceEventType::TaskRetired { task: t } => t == task,
            ProvenanceEventType::FaultHandled { origin, .. } => origin == task,
            _ => false,
        }
    }
}

/// What happened to a fault
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultDisposition {
    /// A handler started for it
    Triggered,
    /// A handler started for it and displaced a lower-priority one
    Preempted,
    /// Waiting behind the active handler
    Queued,
    /// Dropped from a full queue, or displaced by preemption
    Dropped,
    /// No entry in scope matched it
    Unhandled,
    /// Its handler succeeded
    Resolved,
    /// Its handler failed and the fault moved outward
    Escalated,
    /// No enclosing table could handle it
    Exhausted,
}

impl std::fmt::Display for FaultDisposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FaultDisposition::Triggered => "triggered",
            FaultDisposition::Preempted => "preempted",
            FaultDisposition::Queued => "queued",
            FaultDisposition::Dropped => "dropped",
            FaultDisposition::Unhandled => "unhandled",
            FaultDisposition::Resolved => "resolved",
            FaultDisposition::Escalated => "escalated",
            FaultDisposition::Exhausted => "exhausted",
        };
        write!(f, "{}", name)
    }
}

/// Types of provenance events
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ProvenanceEventType {
    ContextStarted { model: String },
    TaskResolved { task: TaskId, role: String },
    TaskRetired { task: TaskId },
    InstructionAdvanced { pc: usize, label: String },
    InstructionSkipped { pc: usize, label: String },
    TransitionFired { from: StateId, to: StateId },
    ModelFinished { model: String, kind: CompletionKind },
    ModelFailed { model: String, reason: String },
    FaultHandled {
        origin: TaskId,
        category: String,
        outcome: FaultDisposition,
        entry: Option<String>,
    },
    ContextStopped { reason: String },
}

impl std::fmt::Display for ProvenanceEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ContextStarted { model } => write!(f, "context_started:{}", model),
            Self::TaskResolved { task, .. } => write!(f, "task_resolved:{}", task.short()),
            Self::TaskRetired { task } => write!(f, "task_retired:{}", task.short()),
            Self::InstructionAdvanced { pc, .. } => write!(f, "instruction_advanced:{}", pc),
            Self::InstructionSkipped { pc, .. } => write!(f, "instruction_skipped:{}", pc),
            Self::TransitionFired { from, to } => write!(f, "transition:{}→{}", from, to),
            Self::ModelFinished { model, .. } => write!(f, "model_finished:{}", model),
            Self::ModelFailed { model, .. } => write!(f, "model_failed:{}", model),
            Self::FaultHandled { outcome, .. } => write!(f, "fault_{}", outcome),
            Self::ContextStopped { .. } => write!(f, "context_stopped"),
        }
    }
}
