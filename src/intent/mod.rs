//! Intent Classifier
//!
//! Recognises the question shapes that have a hand-written query. Templates
//! are tried in catalogue order over the lower-cased utterance; the first
//! whose regex matches *and* whose slot extractor succeeds wins. `None`
//! leaves the utterance to the LLM planner.

mod catalogue;
pub mod slots;

use chrono::NaiveDate;
use regex::{Captures, Regex};
use serde::Serialize;
use tracing::debug;

use crate::context::{EntityKind, LastResult, Session, TopicEntities};
use crate::planner::dates::{DateRange, Period};
use crate::planner::hierarchy::Level;
use crate::planner::values::{Assignee, Authority, Category};

/// A recognised question with its slots
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum Intent {
    // Hierarchy
    ListRegions,
    ListZones,
    ListPlants,
    ZoneOfVehicle { reg_no: String },
    RegionOfVehicle { reg_no: String },
    PlantOfVehicle { reg_no: String },
    VehiclesInZone { zone: String },
    VehiclesInRegion { region: String },
    VehiclesInPlant { plant: String },
    VehiclesOfPlant { plant: String },
    VehicleHierarchy { reg_no: String },
    /// "which plant is this vehicle in", vehicle taken from context
    ContextualHierarchy { reg_no: String, level: Level },

    // Plant and customer lookups
    PlantById { plant_id: i64 },
    PlantIdByName { plant: String },
    SiteVisitsForPlant { plant: String },
    CustomerById { customer_id: i64 },

    // Complaints
    ComplaintStatus { complaint_id: i64 },
    ComplaintPendingWith { complaint_id: i64 },
    ComplaintWorkflow { complaint_id: i64 },
    ComplaintActionStatus { complaint_id: i64 },
    ComplaintAuthorityAction { complaint_id: i64, authority: Authority },
    ComplaintCorrectionStatus { complaint_id: i64 },
    ComplaintsByAssignee { assignee: Assignee },
    ComplaintsByAction { authority: Authority, approved: bool },
    ComplaintsCorrectionDone,
    ComplaintsCorrectionNotDone,
    ComplaintCountByCategory { category: Category },
    ComplaintsByCategory { category: Category },
    /// `status_word` is the user's word, mapped to a code at planning time
    ComplaintCount { status_word: Option<String> },
    ComplaintsByStatus { status_word: String },

    // Distance
    DistanceReport { date: Option<DateRange> },
    VehicleDistance { reg_no: String, date: Option<DateRange> },
    DrumRotation { reg_no: String },
    DistanceTotals { average: bool },
    InterPlantDistance,
    InterPlantTravel,
    PeriodicDistance { period: Period },

    // Drivers
    DriverByName { name: String },
    DriversOfPlant { plant: String },
    LicenceExpiry,
    DriverBirthdays { month: Option<u32> },

    // Production
    DprRecent { date: Option<DateRange> },
    DprByPlant { plant: String, date: Option<DateRange> },
    DprByCustomer { customer: String },
    TransitMixerUtilisation,
    GradeSummary,
}

impl Intent {
    /// Stable tag recorded on the turn
    pub fn tag(&self) -> &'static str {
        match self {
            Intent::ListRegions => "list_regions",
            Intent::ListZones => "list_zones",
            Intent::ListPlants => "list_plants",
            Intent::ZoneOfVehicle { .. } => "zone_of_vehicle",
            Intent::RegionOfVehicle { .. } => "region_of_vehicle",
            Intent::PlantOfVehicle { .. } => "plant_of_vehicle",
            Intent::VehiclesInZone { .. } => "vehicles_in_zone",
            Intent::VehiclesInRegion { .. } => "vehicles_in_region",
            Intent::VehiclesInPlant { .. } => "vehicles_in_plant",
            Intent::VehiclesOfPlant { .. } => "vehicles_of_plant",
            Intent::VehicleHierarchy { .. } => "vehicle_hierarchy",
            Intent::ContextualHierarchy { .. } => "contextual_vehicle_hierarchy",
            Intent::PlantById { .. } => "plant_by_id",
            Intent::PlantIdByName { .. } => "plant_id_by_name",
            Intent::SiteVisitsForPlant { .. } => "site_visits_for_plant",
            Intent::CustomerById { .. } => "customer_by_id",
            Intent::ComplaintStatus { .. } => "complaint_status",
            Intent::ComplaintPendingWith { .. } => "complaint_pending_with",
            Intent::ComplaintWorkflow { .. } => "complaint_workflow",
            Intent::ComplaintActionStatus { .. } => "complaint_action_status",
            Intent::ComplaintAuthorityAction { .. } => "complaint_authority_action",
            Intent::ComplaintCorrectionStatus { .. } => "complaint_correction_status",
            Intent::ComplaintsByAssignee { .. } => "complaints_by_assignee",
            Intent::ComplaintsByAction { .. } => "complaints_by_action",
            Intent::ComplaintsCorrectionDone => "complaints_correction_done",
            Intent::ComplaintsCorrectionNotDone => "complaints_correction_not_done",
            Intent::ComplaintCountByCategory { .. } => "complaint_count_by_category",
            Intent::ComplaintsByCategory { .. } => "complaints_by_category",
            Intent::ComplaintCount { .. } => "complaint_count",
            Intent::ComplaintsByStatus { .. } => "complaints_by_status",
            Intent::DistanceReport { .. } => "distance_report",
            Intent::VehicleDistance { .. } => "vehicle_distance",
            Intent::DrumRotation { .. } => "drum_rotation",
            Intent::DistanceTotals { .. } => "distance_totals",
            Intent::InterPlantDistance => "inter_plant_distance",
            Intent::InterPlantTravel => "inter_plant_travel",
            Intent::PeriodicDistance { .. } => "periodic_distance",
            Intent::DriverByName { .. } => "driver_by_name",
            Intent::DriversOfPlant { .. } => "drivers_of_plant",
            Intent::LicenceExpiry => "licence_expiry",
            Intent::DriverBirthdays { .. } => "driver_birthdays",
            Intent::DprRecent { .. } => "dpr_recent",
            Intent::DprByPlant { .. } => "dpr_by_plant",
            Intent::DprByCustomer { .. } => "dpr_by_customer",
            Intent::TransitMixerUtilisation => "transit_mixer_utilisation",
            Intent::GradeSummary => "grade_summary",
        }
    }

    /// Entities the user named, bound into the session on success
    pub fn entities(&self) -> TopicEntities {
        let mut entities = TopicEntities::default();
        match self {
            Intent::ZoneOfVehicle { reg_no }
            | Intent::RegionOfVehicle { reg_no }
            | Intent::PlantOfVehicle { reg_no }
            | Intent::VehicleHierarchy { reg_no }
            | Intent::ContextualHierarchy { reg_no, .. } => {
                entities.set(EntityKind::Vehicle, reg_no.as_str());
            }
            Intent::VehicleDistance { reg_no, date } => {
                entities.set(EntityKind::Vehicle, reg_no.as_str());
                entities.set(EntityKind::ReportKind, "distance report");
                if let Some(date) = date {
                    entities.set(EntityKind::DateContext, date.label.as_str());
                }
            }
            Intent::DrumRotation { reg_no } => {
                entities.set(EntityKind::Vehicle, reg_no.as_str());
                entities.set(EntityKind::ReportKind, "drum rotation");
            }
            Intent::DistanceReport { date } => {
                entities.set(EntityKind::ReportKind, "distance report");
                if let Some(date) = date {
                    entities.set(EntityKind::DateContext, date.label.as_str());
                }
            }
            Intent::VehiclesInPlant { plant }
            | Intent::VehiclesOfPlant { plant }
            | Intent::PlantIdByName { plant }
            | Intent::SiteVisitsForPlant { plant }
            | Intent::DriversOfPlant { plant } => {
                entities.set(EntityKind::Plant, plant.as_str());
            }
            Intent::DprByPlant { plant, date } => {
                entities.set(EntityKind::Plant, plant.as_str());
                entities.set(EntityKind::ReportKind, "production report");
                if let Some(date) = date {
                    entities.set(EntityKind::DateContext, date.label.as_str());
                }
            }
            Intent::DprRecent { date } => {
                entities.set(EntityKind::ReportKind, "production report");
                if let Some(date) = date {
                    entities.set(EntityKind::DateContext, date.label.as_str());
                }
            }
            Intent::ComplaintStatus { complaint_id }
            | Intent::ComplaintPendingWith { complaint_id }
            | Intent::ComplaintWorkflow { complaint_id }
            | Intent::ComplaintActionStatus { complaint_id }
            | Intent::ComplaintAuthorityAction { complaint_id, .. }
            | Intent::ComplaintCorrectionStatus { complaint_id } => {
                entities.set(EntityKind::ComplaintId, complaint_id.to_string());
            }
            _ => {}
        }
        entities
    }
}

/// What a contextual template may read from the session
#[derive(Debug, Clone, Copy)]
pub struct ClassifyContext<'a> {
    pub entities: &'a TopicEntities,
    pub last_result: Option<&'a LastResult>,
    pub today: NaiveDate,
}

impl<'a> ClassifyContext<'a> {
    pub fn from_session(session: &'a Session, today: NaiveDate) -> Self {
        Self {
            entities: session.entities(),
            last_result: session.last_result(),
            today,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.last_result.is_none()
    }

    /// First value of any of `columns` in the first displayed row
    pub fn first_item_text(&self, columns: &[&str]) -> Option<String> {
        let item = self.last_result?.displayed_items.first()?;
        columns.iter().find_map(|c| item.text(c))
    }

    pub fn vehicle(&self) -> Option<String> {
        self.entities
            .get(EntityKind::Vehicle)
            .map(str::to_string)
            .or_else(|| self.first_item_text(&["reg_no", "registration_number", "vehicle_no"]))
    }

    pub fn plant_name(&self) -> Option<String> {
        self.entities
            .get(EntityKind::Plant)
            .map(str::to_string)
            .or_else(|| self.first_item_text(&["plant_name", "assigned_plant"]))
    }
}

/// Input handed to a slot extractor
pub struct SlotInput<'a> {
    pub original: &'a str,
    pub lowered: &'a str,
    pub ctx: &'a ClassifyContext<'a>,
}

pub type SlotExtractor = fn(&Captures<'_>, &SlotInput<'_>) -> Option<Intent>;

pub struct IntentTemplate {
    pub id: &'static str,
    regex: Regex,
    /// Only tried when the session has a result or entities
    pub requires_context: bool,
    extract: SlotExtractor,
}

impl IntentTemplate {
    pub fn new(id: &'static str, pattern: &str, requires_context: bool, extract: SlotExtractor) -> Self {
        Self {
            id,
            regex: Regex::new(pattern).expect("valid regex"),
            requires_context,
            extract,
        }
    }

    fn try_match(&self, input: &SlotInput<'_>) -> Option<Intent> {
        let caps = self.regex.captures(input.lowered)?;
        (self.extract)(&caps, input)
    }
}

pub struct IntentClassifier {
    templates: Vec<IntentTemplate>,
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl IntentClassifier {
    pub fn new() -> Self {
        Self {
            templates: catalogue::templates(),
        }
    }

    /// Template ids in priority order
    pub fn template_ids(&self) -> Vec<&'static str> {
        self.templates.iter().map(|t| t.id).collect()
    }

    pub fn classify(&self, utterance: &str, ctx: &ClassifyContext<'_>) -> Option<Intent> {
        let lowered = utterance.trim().to_lowercase();
        let input = SlotInput {
            original: utterance.trim(),
            lowered: &lowered,
            ctx,
        };

        for template in &self.templates {
            if template.requires_context && ctx.is_empty() {
                continue;
            }
            if let Some(intent) = template.try_match(&input) {
                debug!(template = template.id, "intent matched");
                return Some(intent);
            }
        }
        None
    }
}
