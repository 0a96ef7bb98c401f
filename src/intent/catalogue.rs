//! Ordered intent templates
//!
//! Order is priority. The rules that matter:
//!
//! - exact list requests ("show all regions") come first;
//! - contextual templates ("this vehicle") precede the registration-based
//!   ones, which would otherwise fail on the missing registration and let
//!   the question fall through;
//! - distance templates precede the vehicle-hierarchy ones, since "distance
//!   report for vehicle X of plant Y" names a plant too;
//! - complaint-id templates precede the complaint list templates, and among
//!   them the most specific wording (pending with, workflow, correction,
//!   authority) precedes plain "status of complaint N";
//! - counts precede lists.

use super::slots::{first_group, number, person_name, place_name, registration};
use super::{Intent, IntentTemplate, SlotInput};
use crate::planner::dates::{find_date_range, find_month, Period};
use crate::planner::hierarchy::Level;
use crate::planner::values::{Assignee, Authority, Category};

const REG: &str = r"([a-z0-9][a-z0-9\-]*)";
const NAME_TO_END: &str = r"([a-z0-9][a-z0-9 &\-\.]*?)\s*[?.!]*$";
const COMPLAINT_REF: &str = r"complaints?\s+(?:id\s+|no\.?\s+|number\s+|#\s*)?(\d+)";
const AUTHORITY: &str = r"(ho\s*qc|business\s+head|technical\s+head|cfo|md)";
const CATEGORY: &str = r"(operations?|operational|technical|tech)";

/// Words that can qualify "complaints" as a status
const STATUS_WORDS: &[&str] = &[
    "open",
    "active",
    "ongoing",
    "closed",
    "resolved",
    "completed",
    "done",
    "pending",
    "unresolved",
    "approved",
    "rejected",
    "new",
    "cancelled",
    "inactive",
];

/// Words after which a place name turns into a date phrase
const DATE_TAILS: &[&str] = &[
    " for ", " on ", " in ", " during ", " from ", " yesterday", " today", " last ", " this ",
];

pub(super) fn templates() -> Vec<IntentTemplate> {
    vec![
        // lists
        IntentTemplate::new(
            "list_regions",
            r"^(?:please\s+)?(?:(?:show|list|display|get|give)\s+(?:me\s+)?)?(?:all\s+)?(?:the\s+)?(?:regions|districts)\s*[?.!]*$",
            false,
            |_, _| Some(Intent::ListRegions),
        ),
        IntentTemplate::new(
            "list_zones",
            r"^(?:please\s+)?(?:(?:show|list|display|get|give)\s+(?:me\s+)?)?(?:all\s+)?(?:the\s+)?(?:zones|areas)\s*[?.!]*$",
            false,
            |_, _| Some(Intent::ListZones),
        ),
        IntentTemplate::new(
            "list_plants",
            r"^(?:please\s+)?(?:(?:show|list|display|get|give)\s+(?:me\s+)?)?(?:all\s+)?(?:the\s+)?(?:plants|facilities)\s*[?.!]*$",
            false,
            |_, _| Some(Intent::ListPlants),
        ),
        // contextual
        IntentTemplate::new(
            "contextual_vehicle_hierarchy",
            r"\b(zone|area|region|district|plant|facility)\b.*\b(?:this|that|the\s+same|same)\s+(?:vehicle|truck)\b|\b(?:this|that)\s+(?:vehicle|truck)\b.*\b(zone|area|region|district|plant|facility)\b",
            true,
            |caps, input| {
                let level = Level::from_word(first_group(caps)?)?;
                let reg_no = input.ctx.vehicle()?;
                Some(Intent::ContextualHierarchy { reg_no, level })
            },
        ),
        // distance
        IntentTemplate::new(
            "drum_rotation",
            &format!(
                r"\bdrum\s+rotation\b.*?\b(?:for|of)\s+(?:the\s+)?(?:vehicle\s+|truck\s+)?{}",
                REG
            ),
            false,
            |caps, _| {
                Some(Intent::DrumRotation {
                    reg_no: registration(first_group(caps)?)?,
                })
            },
        ),
        IntentTemplate::new(
            "vehicle_distance",
            &format!(
                r"\b(?:distance|travel|journey)\s+(?:report\s+|data\s+|travelled\s+|traveled\s+|covered\s+)?(?:for|of|by)\s+(?:the\s+)?(?:vehicle\s+|truck\s+)?{reg}|\b(?:vehicle|truck)\s+{reg}\s+(?:distance|travel|journey)\b",
                reg = REG
            ),
            false,
            |caps, input| {
                Some(Intent::VehicleDistance {
                    reg_no: registration(first_group(caps)?)?,
                    date: find_date_range(input.lowered, input.ctx.today),
                })
            },
        ),
        IntentTemplate::new(
            "inter_plant_travel",
            r"\b(?:vehicles?|trucks?)\b.*\btravel\w*\s+(?:between|across)\s+(?:different\s+)?(?:plants|facilities)\b",
            false,
            |_, _| Some(Intent::InterPlantTravel),
        ),
        IntentTemplate::new(
            "inter_plant_distance",
            r"\b(?:inter[\s-]*plant|plant[\s-]+to[\s-]+plant|between\s+plants)\b",
            false,
            |_, _| Some(Intent::InterPlantDistance),
        ),
        IntentTemplate::new(
            "distance_totals",
            r"\b(total|sum|average|avg|mean)\s+(?:of\s+)?distance\b",
            false,
            |caps, _| {
                let average = matches!(first_group(caps)?, "average" | "avg" | "mean");
                Some(Intent::DistanceTotals { average })
            },
        ),
        IntentTemplate::new(
            "periodic_distance",
            r"\b(daily|weekly|monthly|day-wise|week-wise|month-wise)\s+distance\b|\bdistance\b.*\b(?:by|per)\s+(day|week|month)\b",
            false,
            |caps, _| {
                Some(Intent::PeriodicDistance {
                    period: Period::parse(first_group(caps)?)?,
                })
            },
        ),
        IntentTemplate::new(
            "distance_report",
            r"\b(?:distance|travel|journey)\s+reports?\b",
            false,
            |_, input| {
                Some(Intent::DistanceReport {
                    date: find_date_range(input.lowered, input.ctx.today),
                })
            },
        ),
        // hierarchy of one vehicle
        IntentTemplate::new(
            "zone_of_vehicle",
            &level_of_vehicle(r"(?:zone|area)"),
            false,
            |caps, _| {
                Some(Intent::ZoneOfVehicle {
                    reg_no: registration(first_group(caps)?)?,
                })
            },
        ),
        IntentTemplate::new(
            "region_of_vehicle",
            &level_of_vehicle(r"(?:region|district)"),
            false,
            |caps, _| {
                Some(Intent::RegionOfVehicle {
                    reg_no: registration(first_group(caps)?)?,
                })
            },
        ),
        IntentTemplate::new(
            "plant_of_vehicle",
            &level_of_vehicle(r"(?:plant|facility)"),
            false,
            |caps, _| {
                Some(Intent::PlantOfVehicle {
                    reg_no: registration(first_group(caps)?)?,
                })
            },
        ),
        // vehicles under a level
        IntentTemplate::new(
            "vehicles_in_zone",
            &vehicles_in_level(r"(?:zone|area)"),
            false,
            |caps, input| {
                Some(Intent::VehiclesInZone {
                    zone: place_name(input.original, first_group(caps)?)?,
                })
            },
        ),
        IntentTemplate::new(
            "vehicles_in_region",
            &vehicles_in_level(r"(?:region|district)"),
            false,
            |caps, input| {
                Some(Intent::VehiclesInRegion {
                    region: place_name(input.original, first_group(caps)?)?,
                })
            },
        ),
        IntentTemplate::new(
            "vehicles_in_plant",
            &format!(r"\b(?:vehicles|trucks)\b.*\b(?:plant|facility)\s+{}", NAME_TO_END),
            false,
            |caps, input| {
                Some(Intent::VehiclesInPlant {
                    plant: place_name(input.original, first_group(caps)?)?,
                })
            },
        ),
        IntentTemplate::new(
            "vehicles_of_plant",
            &format!(
                r"\b(?:vehicles|trucks)\b.*?\b(?:of|in|at|from|assigned\s+to|under)\s+{}",
                NAME_TO_END
            ),
            false,
            |caps, input| {
                Some(Intent::VehiclesOfPlant {
                    plant: plant_or_context(first_group(caps)?, input)?,
                })
            },
        ),
        IntentTemplate::new(
            "vehicle_hierarchy",
            &format!(
                r"\b(?:hierarchy|structure|details?|info(?:rmation)?|about)\b.*\b(?:vehicle|truck)\s+{reg}|\b(?:vehicle|truck)\s+{reg}\s+(?:details?|info(?:rmation)?|hierarchy)\b|^(?:show|find|get)\s+(?:me\s+)?(?:vehicle|truck)\s+{reg}\s*[?.!]*$",
                reg = REG
            ),
            false,
            |caps, _| {
                Some(Intent::VehicleHierarchy {
                    reg_no: registration(first_group(caps)?)?,
                })
            },
        ),
        // plant and customer lookups
        IntentTemplate::new(
            "plant_by_id",
            r"\bplant\s+id\s*(?:is\s+|=\s*|#\s*|no\.?\s*)?(\d+)\b|\bplant\s+(?:name|details?)\b.*\bid\s*(?:is\s+|=\s*|#\s*)?(\d+)\b",
            false,
            |caps, _| {
                Some(Intent::PlantById {
                    plant_id: number(first_group(caps)?)?,
                })
            },
        ),
        IntentTemplate::new(
            "plant_from_context",
            r"\b(?:that|this|the\s+same|same)\s+plant\b",
            true,
            |_, input| {
                let ctx = input.ctx;
                if let Some(plant_id) = ctx
                    .first_item_text(&["plant_id"])
                    .and_then(|id| number(&id))
                {
                    return Some(Intent::PlantById { plant_id });
                }
                Some(Intent::PlantIdByName {
                    plant: ctx.plant_name()?,
                })
            },
        ),
        IntentTemplate::new(
            "customer_from_context",
            r"\b(?:that|this|the\s+same|same)\s+customer\b",
            true,
            |_, input| {
                let customer_id = input
                    .ctx
                    .first_item_text(&["customer_id", "cust_id"])
                    .and_then(|id| number(&id))?;
                Some(Intent::CustomerById { customer_id })
            },
        ),
        IntentTemplate::new(
            "plant_id_by_name",
            &format!(
                r"\bplant\s+id\s+(?:of|for)\s+(?:the\s+)?{}|\bid\s+of\s+(?:the\s+)?([a-z][a-z0-9 \-]*?)\s+plant\s*[?.!]*$",
                NAME_TO_END
            ),
            false,
            |caps, input| {
                Some(Intent::PlantIdByName {
                    plant: place_name(input.original, first_group(caps)?)?,
                })
            },
        ),
        IntentTemplate::new(
            "site_visits_for_plant",
            &format!(
                r"\bsite\s+visits?\b.*?\b(?:for|of|at|in)\s+(?:the\s+)?(?:plant\s+)?{}",
                NAME_TO_END
            ),
            false,
            |caps, input| {
                let raw = first_group(caps)?;
                if raw.contains("complaint") {
                    return None;
                }
                Some(Intent::SiteVisitsForPlant {
                    plant: place_name(input.original, raw)?,
                })
            },
        ),
        IntentTemplate::new(
            "customer_by_id",
            r"\bcustomer\s+(?:id\s*)?(?:#\s*)?(\d+)\b|\bcustomer\s+name\b.*?\bid\s*(\d+)\b",
            false,
            |caps, _| {
                Some(Intent::CustomerById {
                    customer_id: number(first_group(caps)?)?,
                })
            },
        ),
        // one complaint
        IntentTemplate::new(
            "complaint_pending_with",
            &format!(
                r"\b(?:pending\s+with|assigned\s+to|handling|responsible\s+for)\b.*?\b{c}|\b{c}\b.*?\b(?:pending\s+with|assigned\s+to|handled\s+by|with\s+whom)\b",
                c = COMPLAINT_REF
            ),
            false,
            |caps, _| {
                Some(Intent::ComplaintPendingWith {
                    complaint_id: number(first_group(caps)?)?,
                })
            },
        ),
        IntentTemplate::new(
            "complaint_workflow",
            &format!(
                r"\b(?:workflow|current\s+stage|overall\s+status|stage)\b.*?\b{c}|\b{c}\b.*?\b(?:workflow|stage)\b",
                c = COMPLAINT_REF
            ),
            false,
            |caps, _| {
                Some(Intent::ComplaintWorkflow {
                    complaint_id: number(first_group(caps)?)?,
                })
            },
        ),
        IntentTemplate::new(
            "complaint_correction_status",
            &format!(
                r"\bcorrection\b.*?\b{c}|\b{c}\b.*?\bcorrection\b",
                c = COMPLAINT_REF
            ),
            false,
            |caps, _| {
                Some(Intent::ComplaintCorrectionStatus {
                    complaint_id: number(first_group(caps)?)?,
                })
            },
        ),
        IntentTemplate::new(
            "complaint_authority_action",
            &format!(
                r"\b{a}\b.*?\b(?:action|approv\w*|reject\w*|decision)\b.*?\b{c}|\b{c}\b.*?\b{a}\b",
                a = AUTHORITY,
                c = COMPLAINT_REF
            ),
            false,
            |caps, _| {
                // groups: (authority, id) | (id, authority)
                let (authority, id) = match (caps.get(1), caps.get(2)) {
                    (Some(a), Some(id)) => (a.as_str(), id.as_str()),
                    _ => (caps.get(4)?.as_str(), caps.get(3)?.as_str()),
                };
                Some(Intent::ComplaintAuthorityAction {
                    complaint_id: number(id)?,
                    authority: Authority::parse(authority)?,
                })
            },
        ),
        IntentTemplate::new(
            "complaint_action_status",
            &format!(
                r"\b(?:action|approval)\s+status\b.*?\b{c}|\bapprovals?\b.*?\b{c}|\b{c}\b.*?\b(?:action|approval)\s+status\b",
                c = COMPLAINT_REF
            ),
            false,
            |caps, _| {
                Some(Intent::ComplaintActionStatus {
                    complaint_id: number(first_group(caps)?)?,
                })
            },
        ),
        IntentTemplate::new(
            "complaint_status",
            &format!(
                r"\b(?:status|state)\b.*?\b{c}|\b{c}\b.*?\b(?:status|state)\b|^(?:show|check|get|find)\s+(?:me\s+)?{c}\s*[?.!]*$",
                c = COMPLAINT_REF
            ),
            false,
            |caps, _| {
                Some(Intent::ComplaintStatus {
                    complaint_id: number(first_group(caps)?)?,
                })
            },
        ),
        // complaint lists
        IntentTemplate::new(
            "complaints_by_action",
            &format!(
                r"\bcomplaints?\b.*?\b(approved|rejected)\s+(?:by|from)\s+(?:the\s+)?{a}\b|\b{a}\s+(approved|rejected)\b.*?\bcomplaints?\b",
                a = AUTHORITY
            ),
            false,
            |caps, _| {
                // groups: (verb, authority) | (authority, verb)
                let (verb, authority) = match (caps.get(1), caps.get(2)) {
                    (Some(v), Some(a)) => (v.as_str(), a.as_str()),
                    _ => (caps.get(4)?.as_str(), caps.get(3)?.as_str()),
                };
                Some(Intent::ComplaintsByAction {
                    authority: Authority::parse(authority)?,
                    approved: verb == "approved",
                })
            },
        ),
        IntentTemplate::new(
            "complaints_correction_not_done",
            r"\bcomplaints?\b.*?\b(?:(?:product\s+)?correction\s+(?:is\s+|was\s+|has\s+)?(?:not\s+(?:been\s+)?done|pending|incomplete|missing)|(?:no|without|missing)\s+(?:product\s+)?correction)\b",
            false,
            |_, _| Some(Intent::ComplaintsCorrectionNotDone),
        ),
        IntentTemplate::new(
            "complaints_correction_done",
            r"\bcomplaints?\b.*?\b(?:(?:product\s+)?correction\s+(?:is\s+|was\s+|has\s+been\s+|been\s+)?(?:done|completed|finished)|(?:with|having)\s+(?:product\s+)?correction)\b",
            false,
            |_, _| Some(Intent::ComplaintsCorrectionDone),
        ),
        IntentTemplate::new(
            "complaints_by_assignee",
            r"\bcomplaints?\b.*?\b(?:pending\s+with|assigned\s+to|with|at)\s+(?:the\s+)?(plant\s+in-?\s?charge|technical\s+(?:manager|in-?\s?charge)|ho\s*qc|business\s+head|technical\s+head|cfo|md)\b",
            false,
            |caps, _| {
                Some(Intent::ComplaintsByAssignee {
                    assignee: Assignee::parse(first_group(caps)?)?,
                })
            },
        ),
        IntentTemplate::new(
            "complaint_count_by_category",
            &format!(
                r"\b(?:how\s+many|count|number\s+of|total)\b.*?\b{g}\b.*?\bcomplaints?\b|\b(?:how\s+many|count|number\s+of|total)\b.*?\bcomplaints?\b.*?\b{g}\b",
                g = CATEGORY
            ),
            false,
            |caps, _| {
                Some(Intent::ComplaintCountByCategory {
                    category: Category::parse(first_group(caps)?)?,
                })
            },
        ),
        IntentTemplate::new(
            "complaint_count",
            r"\b(?:how\s+many|count|number\s+of)\b.*?\bcomplaints?\s+(?:are|is)\s+(?:currently\s+|still\s+)?([a-z]+)\b|\b(?:how\s+many|count|number\s+of|total)\b(?:\s+of)?(?:\s+the)?(?:\s+([a-z]+))?\s+complaints?\b",
            false,
            |caps, _| {
                let status_word = first_group(caps)
                    .filter(|w| STATUS_WORDS.contains(w))
                    .map(str::to_string);
                Some(Intent::ComplaintCount { status_word })
            },
        ),
        IntentTemplate::new(
            "complaints_by_status",
            r"\b(?:show|list|get|display|give|find)\b.*?\b([a-z]+)\s+complaints\b|\bcomplaints?\s+(?:with\s+status|whose\s+status\s+is|that\s+are|which\s+are)\s+([a-z]+)\b",
            false,
            |caps, _| {
                let word = first_group(caps).filter(|w| STATUS_WORDS.contains(w))?;
                Some(Intent::ComplaintsByStatus {
                    status_word: word.to_string(),
                })
            },
        ),
        IntentTemplate::new(
            "complaints_by_category",
            &format!(
                r"\b{g}\s+complaints?\b|\bcomplaints?\b.*?\b(?:of|in|from|under)\s+(?:the\s+)?{g}\b",
                g = CATEGORY
            ),
            false,
            |caps, _| {
                Some(Intent::ComplaintsByCategory {
                    category: Category::parse(first_group(caps)?)?,
                })
            },
        ),
        // drivers
        IntentTemplate::new(
            "licence_expiry",
            r"\blicen[cs]es?\b.*?\b(?:expir\w*|renew\w*|valid\w*|status)\b|\bexpir\w*\b.*?\blicen[cs]es?\b",
            false,
            |_, _| Some(Intent::LicenceExpiry),
        ),
        IntentTemplate::new(
            "driver_birthdays",
            r"\b(?:birthdays?|born|date\s+of\s+birth|dob)\b.*?\bdrivers?\b|\bdrivers?\b.*?\b(?:birthdays?|born|date\s+of\s+birth|dob)\b",
            false,
            |_, input| {
                let month = if input.lowered.contains("this month") {
                    Some(chrono::Datelike::month(&input.ctx.today))
                } else {
                    find_month(input.lowered)
                };
                Some(Intent::DriverBirthdays { month })
            },
        ),
        IntentTemplate::new(
            "drivers_of_plant",
            &format!(
                r"\bdrivers\b.*?\b(?:of|in|at|from|assigned\s+to|under)\s+{}",
                NAME_TO_END
            ),
            false,
            |caps, input| {
                Some(Intent::DriversOfPlant {
                    plant: plant_or_context(first_group(caps)?, input)?,
                })
            },
        ),
        IntentTemplate::new(
            "driver_by_name",
            r"\b(?:details?|info(?:rmation)?|contact|phone|mobile|number)\s+(?:of|for)\s+(?:the\s+)?driver\s+([a-z]+(?:\s+[a-z]+)?)\s*[?.!]*$|\bdriver\s+(?:named\s+|called\s+)?([a-z]+(?:\s+[a-z]+)?)\s*[?.!]*$|\bdriver\s+(?:named\s+|called\s+)?([a-z]+(?:\s+[a-z]+)?)\s+(?:details?|info)\b",
            false,
            |caps, input| {
                Some(Intent::DriverByName {
                    name: person_name(input.original, first_group(caps)?)?,
                })
            },
        ),
        // production
        IntentTemplate::new(
            "transit_mixer_utilisation",
            r"\b(?:transit\s+mixers?|tm)\b.*?\butili[sz]ation\b|\butili[sz]ation\b.*?\b(?:transit\s+mixers?|tm)\b",
            false,
            |_, _| Some(Intent::TransitMixerUtilisation),
        ),
        IntentTemplate::new(
            "grade_summary",
            r"\b(?:concrete\s+)?grades?\b.*?\b(?:summary|analysis|wise|breakdown|distribution)\b|\bgrade[\s-]+wise\b|\b(?:volume|deliveries)\s+by\s+grade\b",
            false,
            |_, _| Some(Intent::GradeSummary),
        ),
        IntentTemplate::new(
            "dpr_by_customer",
            &format!(
                r"\b(?:dpr|production\s+report|deliveries|supplies)\b.*?\b(?:for|of|to)\s+customer\s+{}",
                NAME_TO_END
            ),
            false,
            |caps, input| {
                let raw = strip_date_tail(first_group(caps)?);
                Some(Intent::DprByCustomer {
                    customer: place_name(input.original, raw)?,
                })
            },
        ),
        IntentTemplate::new(
            "dpr_by_plant",
            &format!(
                r"\b(?:dpr|production\s+report)\b.*?\b(?:for|of|at|from)\s+{}",
                NAME_TO_END
            ),
            false,
            |caps, input| {
                let raw = strip_date_tail(first_group(caps)?);
                if find_date_range(raw, input.ctx.today).is_some() {
                    return None;
                }
                Some(Intent::DprByPlant {
                    plant: place_name(input.original, raw)?,
                    date: find_date_range(input.lowered, input.ctx.today),
                })
            },
        ),
        IntentTemplate::new(
            "dpr_recent",
            r"\b(?:dpr|daily\s+production(?:\s+report)?|production\s+reports?)\b",
            false,
            |_, input| {
                Some(Intent::DprRecent {
                    date: find_date_range(input.lowered, input.ctx.today),
                })
            },
        ),
    ]
}

/// "<level> ... vehicle REG" or "vehicle REG ... <level>"
fn level_of_vehicle(level: &str) -> String {
    format!(
        r"\b{level}\b.*\b(?:vehicle|truck)\s+{reg}|\b(?:vehicle|truck)\s+{reg}\b.*\b{level}\b",
        level = level,
        reg = REG
    )
}

/// "vehicles ... <level> NAME" or "vehicles in NAME <level>"
fn vehicles_in_level(level: &str) -> String {
    format!(
        r"\b(?:vehicles|trucks)\b.*\b{level}\s+{name}|\b(?:vehicles|trucks)\b.*\b(?:in|of|at|from|under)\s+(?:the\s+)?([a-z0-9][a-z0-9 \-]*?)\s+{level}\b",
        level = level,
        name = NAME_TO_END
    )
}

/// Named plant, or the plant in context for "that plant"
fn plant_or_context(raw: &str, input: &SlotInput<'_>) -> Option<String> {
    if let Some(name) = place_name(input.original, raw) {
        return Some(name);
    }
    let demonstrative = raw
        .split_whitespace()
        .next()
        .map_or(false, |w| matches!(w, "that" | "this" | "same"));
    if demonstrative {
        return input.ctx.plant_name();
    }
    None
}

fn strip_date_tail(raw: &str) -> &str {
    let padded_end = DATE_TAILS
        .iter()
        .filter_map(|tail| raw.find(tail))
        .min()
        .unwrap_or(raw.len());
    raw[..padded_end].trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let templates = templates();
        let mut ids: Vec<&str> = templates.iter().map(|t| t.id).collect();
        let total = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), total);
    }

    #[test]
    fn test_contextual_before_registration_templates() {
        let ids: Vec<&str> = templates().iter().map(|t| t.id).collect();
        let position = |id: &str| ids.iter().position(|i| *i == id).unwrap();
        assert!(position("contextual_vehicle_hierarchy") < position("plant_of_vehicle"));
        assert!(position("complaint_pending_with") < position("complaint_status"));
        assert!(position("complaint_count") < position("complaints_by_status"));
    }

    #[test]
    fn test_strip_date_tail() {
        assert_eq!(strip_date_tail("wagholi plant for yesterday"), "wagholi plant");
        assert_eq!(strip_date_tail("wagholi"), "wagholi");
    }
}
