//! Query builders for recognised intents
//!
//! Pure functions of the intent's slots. User-supplied tokens are always
//! bound as `$n` parameters; only codes from the closed value domains are
//! written into the SQL text.

use crate::database::{SqlParam, Statement};
use crate::error::Result;
use crate::formatter::{EmptyHint, ResponseTemplate};
use crate::intent::Intent;

use super::dates::{DateRange, Period};
use super::hierarchy::{join_hierarchy, join_hierarchy_onto, join_hierarchy_with, JoinKind, Level};
use super::values::{
    action_description_case, final_status_case, pending_with_case, value_map, Authority, Category,
};
use super::{Plan, PlanOrigin};

const COMPLAINT_FROM: &str =
    "crm_complaint_dtls cd LEFT JOIN crm_site_visit_dtls sv ON cd.id_no = sv.complaint_id";
const COMPLAINT_TABLES: &[&str] = &["crm_complaint_dtls", "crm_site_visit_dtls"];

const DRUM_ROTATION_HHMM: &str = "CONCAT(\
     LPAD((ROUND(dr.drum_rotation / 2.0)::integer / 60)::text, 2, '0'), ':', \
     LPAD((ROUND(dr.drum_rotation / 2.0)::integer % 60)::text, 2, '0'))";

const DRIVER_COLUMNS: &str = "CONCAT(drv.first_name, ' ', drv.last_name) AS driver_name, \
     drv.d_code AS driver_code, drv.telephone AS mobile_number, \
     drv.lic_no AS license_number, drv.lic_exp AS license_expiry";

const DPR_COLUMNS: &str = "dpr.id_no, hm.name AS plant_name, dpr.pi_name AS plant_incharge, \
     dpr.cust_name AS customer_name, dpr.site_name, dpr.fse_name, dpr.site_distance, \
     dpr.tm_no AS transit_mixer, dpr.vol_cum AS volume_m3, dpr.grade AS concrete_grade, \
     dpr.smode AS service_mode, dpr.cost_m3, dpr.created_date";

/// Accumulates positional parameters while a statement is assembled
#[derive(Default)]
struct Params(Vec<SqlParam>);

impl Params {
    fn text(&mut self, value: impl Into<String>) -> String {
        self.0.push(SqlParam::Text(value.into()));
        format!("${}", self.0.len())
    }

    fn int(&mut self, value: i64) -> String {
        self.0.push(SqlParam::Int(value));
        format!("${}", self.0.len())
    }

    /// `column >= $a::date AND column < $b::date`
    fn date_range(&mut self, column: &str, range: &DateRange) -> String {
        let start = self.text(range.start.format("%Y-%m-%d").to_string());
        let end = self.text(range.end.format("%Y-%m-%d").to_string());
        format!("{c} >= {s}::date AND {c} < {e}::date", c = column, s = start, e = end)
    }
}

/// ILIKE pattern matching the words of `name` in order
pub fn like_pattern(name: &str) -> String {
    let escaped: Vec<String> = name
        .split(|c: char| c.is_whitespace() || c == '-')
        .filter(|w| !w.is_empty())
        .map(|w| {
            w.replace('\\', "\\\\")
                .replace('%', "\\%")
                .replace('_', "\\_")
        })
        .collect();
    format!("%{}%", escaped.join("%"))
}

struct Draft {
    sql: String,
    params: Params,
    tables: Vec<&'static str>,
    response: ResponseTemplate,
    empty_hint: Option<EmptyHint>,
}

impl Draft {
    fn new(sql: String, params: Params, tables: Vec<&'static str>, response: ResponseTemplate) -> Self {
        Self {
            sql,
            params,
            tables,
            response,
            empty_hint: None,
        }
    }

    fn empty(mut self, hint: EmptyHint) -> Self {
        self.empty_hint = Some(hint);
        self
    }
}

/// Build the plan for a recognised intent
pub fn build(intent: &Intent) -> Result<Plan> {
    let draft = match intent {
        Intent::ListRegions => list_level(Level::Region, "region_id", "Here are all the regions:"),
        Intent::ListZones => list_level(Level::Zone, "zone_id", "Here are all the zones:"),
        Intent::ListPlants => list_level(Level::Plant, "plant_id", "Here are all the plants:"),
        Intent::ZoneOfVehicle { reg_no } => level_of_vehicle(Level::Zone, reg_no),
        Intent::RegionOfVehicle { reg_no } => level_of_vehicle(Level::Region, reg_no),
        Intent::PlantOfVehicle { reg_no } => level_of_vehicle(Level::Plant, reg_no),
        Intent::VehiclesInZone { zone } => vehicles_under(Level::Zone, zone),
        Intent::VehiclesInRegion { region } => vehicles_under(Level::Region, region),
        Intent::VehiclesInPlant { plant } => vehicles_of_plant(plant, None),
        Intent::VehiclesOfPlant { plant } => vehicles_of_plant(plant, Some(50)),
        Intent::VehicleHierarchy { reg_no } => vehicle_hierarchy(reg_no),
        Intent::ContextualHierarchy { reg_no, level } => contextual_hierarchy(reg_no, *level),
        Intent::PlantById { plant_id } => plant_by_id(*plant_id),
        Intent::PlantIdByName { plant } => plant_id_by_name(plant),
        Intent::SiteVisitsForPlant { plant } => site_visits(plant),
        Intent::CustomerById { customer_id } => customer_by_id(*customer_id),
        Intent::ComplaintStatus { complaint_id } => complaint_status(*complaint_id, false),
        Intent::ComplaintPendingWith { complaint_id } => complaint_status(*complaint_id, true),
        Intent::ComplaintWorkflow { complaint_id } => complaint_workflow(*complaint_id),
        Intent::ComplaintActionStatus { complaint_id } => complaint_actions(*complaint_id),
        Intent::ComplaintAuthorityAction {
            complaint_id,
            authority,
        } => authority_action(*complaint_id, *authority),
        Intent::ComplaintCorrectionStatus { complaint_id } => correction_status(*complaint_id),
        Intent::ComplaintsByAssignee { assignee } => complaint_list(
            &assignee.condition(),
            format!("Found {{n}} complaints currently assigned to {}.", assignee.label()),
            format!("assigned to {}", assignee.label()),
        ),
        Intent::ComplaintsByAction {
            authority,
            approved,
        } => {
            let (code, verb) = if *approved {
                ("A", "approved")
            } else {
                ("R", "rejected")
            };
            complaint_list(
                &format!("sv.{} = '{}'", authority.action_column(), code),
                format!("Found {{n}} complaints {} by {}.", verb, authority.label()),
                format!("{} by {}", verb, authority.label()),
            )
        }
        Intent::ComplaintsCorrectionDone => complaint_list(
            "sv.product_correction = 'Y'",
            "Found {n} complaints where product correction has been done.".to_string(),
            "with product correction done".to_string(),
        ),
        Intent::ComplaintsCorrectionNotDone => complaint_list(
            "(sv.product_correction = 'N' OR sv.product_correction IS NULL OR sv.product_correction = '')",
            "Found {n} complaints where product correction is not done or status is missing."
                .to_string(),
            "with product correction not done".to_string(),
        ),
        Intent::ComplaintCountByCategory { category } => category_count(*category),
        Intent::ComplaintsByCategory { category } => complaint_list(
            &format!(
                "cd.complaint_category_id = '{}' AND cd.active_status = 'Y'",
                category.id()
            ),
            format!("Found {{n}} open {} complaints.", category.label()),
            format!("in the {} category", category.label()),
        ),
        Intent::ComplaintCount { status_word } => complaint_count(status_word.as_deref())?,
        Intent::ComplaintsByStatus { status_word } => {
            let code = value_map("active_status", status_word)?;
            complaint_list(
                &format!("cd.active_status = '{}'", code),
                format!("Found {{n}} {} complaints.", status_word),
                format!("with status {}", status_word),
            )
        }
        Intent::DistanceReport { date } => distance_report(None, date.as_ref()),
        Intent::VehicleDistance { reg_no, date } => distance_report(Some(reg_no), date.as_ref()),
        Intent::DrumRotation { reg_no } => drum_rotation(reg_no),
        Intent::DistanceTotals { average } => distance_totals(*average),
        Intent::InterPlantDistance => inter_plant(false),
        Intent::InterPlantTravel => inter_plant(true),
        Intent::PeriodicDistance { period } => periodic_distance(*period),
        Intent::DriverByName { name } => driver_by_name(name),
        Intent::DriversOfPlant { plant } => drivers_of_plant(plant),
        Intent::LicenceExpiry => licence_expiry(),
        Intent::DriverBirthdays { month } => driver_birthdays(*month),
        Intent::DprRecent { date } => dpr_report(None, date.as_ref()),
        Intent::DprByPlant { plant, date } => dpr_report(Some(plant), date.as_ref()),
        Intent::DprByCustomer { customer } => dpr_by_customer(customer),
        Intent::TransitMixerUtilisation => transit_mixer_utilisation(),
        Intent::GradeSummary => grade_summary(),
    };

    Ok(Plan {
        statement: Statement::new(draft.sql, draft.params.0),
        tables: draft.tables.iter().map(|t| t.to_string()).collect(),
        response: draft.response,
        empty_hint: draft.empty_hint,
        origin: PlanOrigin::Template(intent.tag()),
        follow_up: None,
    })
}

// ============================================================================
// Hierarchy
// ============================================================================

fn list_level(level: Level, id_alias: &str, lead: &str) -> Draft {
    let name = level.name_column();
    let sql = format!(
        "SELECT DISTINCT {name} AS {alias}, {a}.id_no AS {id_alias} FROM {table} {a} \
         WHERE {name} IS NOT NULL AND {name} != '' ORDER BY {alias}",
        name = name,
        alias = level.name_alias(),
        a = level.alias(),
        id_alias = id_alias,
        table = level.table(),
    );
    Draft::new(
        sql,
        Params::default(),
        vec![level.table()],
        ResponseTemplate::Lead(lead.to_string()),
    )
    .empty(EmptyHint::new(format!("{}s", level.label())))
}

/// Names of every level from `top` down to the plant, then the registration
fn name_columns(levels: &[Level]) -> String {
    levels
        .iter()
        .rev()
        .map(|l| match l {
            Level::Vehicle => l.name_column().to_string(),
            _ => format!("{} AS {}", l.name_column(), l.name_alias()),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn level_of_vehicle(level: Level, reg_no: &str) -> Draft {
    let join = join_hierarchy(&[Level::Vehicle, level]);
    let mut params = Params::default();
    let reg = params.text(reg_no);
    let mut columns = name_columns(&join.levels);
    if level == Level::Plant {
        columns = "hm.name AS plant_name, hm.address, vm.reg_no".to_string();
    }
    let sql = format!(
        "SELECT {} FROM {} WHERE vm.reg_no = {}",
        columns, join.from_clause, reg
    );
    Draft::new(
        sql,
        params,
        join.tables(),
        ResponseTemplate::Lead(format!(
            "Here's the {} information for vehicle {}:",
            level.label(),
            reg_no
        )),
    )
    .empty(EmptyHint::new(level.label()).subject(format!("vehicle {}", reg_no)))
}

fn vehicles_under(level: Level, name: &str) -> Draft {
    let join = join_hierarchy(&[Level::Vehicle, level]);
    let mut params = Params::default();
    let pattern = params.text(like_pattern(name));
    let sql = format!(
        "SELECT {} FROM {} WHERE {} ILIKE {} ORDER BY vm.reg_no",
        name_columns(&join.levels),
        join.from_clause,
        level.name_column(),
        pattern
    );
    Draft::new(
        sql,
        params,
        join.tables(),
        ResponseTemplate::Lead(format!(
            "Here are the vehicles in {} '{}':",
            level.label(),
            name
        )),
    )
    .empty(EmptyHint::new("vehicles").subject(format!("{} '{}'", level.label(), name)))
}

fn vehicles_of_plant(plant: &str, limit: Option<usize>) -> Draft {
    let join = join_hierarchy(&[Level::Vehicle, Level::Plant]);
    let mut params = Params::default();
    let pattern = params.text(like_pattern(plant));
    let mut sql = format!(
        "SELECT vm.reg_no, vm.bus_id, hm.name AS plant_name FROM {} WHERE hm.name ILIKE {} ORDER BY vm.reg_no",
        join.from_clause, pattern
    );
    let lead = match limit {
        Some(n) => {
            sql.push_str(&format!(" LIMIT {}", n));
            format!("Here are the vehicles assigned to '{}' plant:", plant)
        }
        None => format!("Here are the vehicles in plant '{}':", plant),
    };
    Draft::new(sql, params, join.tables(), ResponseTemplate::Lead(lead))
        .empty(EmptyHint::new("vehicles").subject(format!("plant '{}'", plant)))
}

fn vehicle_hierarchy(reg_no: &str) -> Draft {
    let join = join_hierarchy_with(&[Level::Vehicle, Level::Zone], JoinKind::Left);
    let mut params = Params::default();
    let reg = params.text(reg_no);
    let sql = format!(
        "SELECT vm.reg_no, vm.vehicle_no, hm.name AS plant_name, dm.name AS region_name, zm.zone_name \
         FROM {} WHERE vm.reg_no = {}",
        join.from_clause, reg
    );
    Draft::new(
        sql,
        params,
        join.tables(),
        ResponseTemplate::Lead(format!("Here's the complete hierarchy for vehicle {}:", reg_no)),
    )
    .empty(EmptyHint::new("details").subject(format!("vehicle {}", reg_no)))
}

fn contextual_hierarchy(reg_no: &str, level: Level) -> Draft {
    let top = level.max(Level::Region);
    let join = join_hierarchy(&[Level::Vehicle, top]);
    let mut params = Params::default();
    let reg = params.text(reg_no);
    let sql = format!(
        "SELECT {} FROM {} WHERE vm.reg_no = {}",
        name_columns(&join.levels),
        join.from_clause,
        reg
    );
    let lead = if level == Level::Zone {
        format!("Here's the zone information for vehicle {}:", reg_no)
    } else {
        "Here's the plant and region information for the vehicle:".to_string()
    };
    Draft::new(sql, params, join.tables(), ResponseTemplate::Lead(lead))
        .empty(EmptyHint::new(level.label()).subject(format!("vehicle {}", reg_no)))
}

// ============================================================================
// Plant and customer lookups
// ============================================================================

fn plant_by_id(plant_id: i64) -> Draft {
    let mut params = Params::default();
    let id = params.int(plant_id);
    Draft::new(
        format!(
            "SELECT hm.id_no AS plant_id, hm.name AS plant_name, hm.address \
             FROM hosp_master hm WHERE hm.id_no = {} LIMIT 5",
            id
        ),
        params,
        vec!["hosp_master"],
        ResponseTemplate::Lead(format!("Here are the details for plant ID {}:", plant_id)),
    )
    .empty(EmptyHint::new("plant").subject(format!("ID {}", plant_id)))
}

fn plant_id_by_name(plant: &str) -> Draft {
    let mut params = Params::default();
    let pattern = params.text(like_pattern(plant));
    Draft::new(
        format!(
            "SELECT hm.id_no AS plant_id, hm.name AS plant_name FROM hosp_master hm \
             WHERE hm.name ILIKE {} ORDER BY hm.name LIMIT 10",
            pattern
        ),
        params,
        vec!["hosp_master"],
        ResponseTemplate::Lead(format!("Here are the plants matching '{}':", plant)),
    )
    .empty(EmptyHint::new("plants").filter(format!("name matching '{}'", plant)))
}

fn site_visits(plant: &str) -> Draft {
    let mut params = Params::default();
    let pattern = params.text(like_pattern(plant));
    Draft::new(
        format!(
            "SELECT sv.id_no AS visit_id, sv.complaint_id, sv.visit_date, sv.complaint_status, \
             sv.remarks, hm.name AS plant_name, hm.address \
             FROM crm_site_visit_dtls sv JOIN hosp_master hm ON sv.plant_id = hm.id_no \
             WHERE hm.name ILIKE {} ORDER BY sv.visit_date DESC LIMIT 10",
            pattern
        ),
        params,
        vec!["crm_site_visit_dtls", "hosp_master"],
        ResponseTemplate::Lead(format!("Here are the site visits for '{}':", plant)),
    )
    .empty(EmptyHint::new("site visits").subject(format!("plant '{}'", plant)))
}

fn customer_by_id(customer_id: i64) -> Draft {
    let mut params = Params::default();
    let id = params.int(customer_id);
    Draft::new(
        format!(
            "SELECT cm.customer_id, cm.customer_name FROM customer_master cm \
             WHERE cm.customer_id = {}",
            id
        ),
        params,
        vec!["customer_master"],
        ResponseTemplate::FirstRow("Customer ID {customer_id} is {customer_name}.".to_string()),
    )
    .empty(EmptyHint::new("customer").subject(format!("ID {}", customer_id)))
}

// ============================================================================
// Complaints
// ============================================================================

fn complaint_status(complaint_id: i64, pending_only: bool) -> Draft {
    let mut params = Params::default();
    let id = params.int(complaint_id);
    let pending_with = pending_with_case("sv.complaint_status", "cd.complaint_category_id");
    let (columns, answer) = if pending_only {
        (
            format!("cd.id_no AS complaint_id, {} AS pending_with", pending_with),
            "Complaint ID {complaint_id} is currently pending with: {pending_with}",
        )
    } else {
        (
            format!(
                "cd.id_no AS complaint_id, {} AS pending_with, {} AS final_status, \
                 CASE WHEN cd.complaint_category_id = '1' THEN 'Operations' \
                 WHEN cd.complaint_category_id = '2' THEN 'Technical' ELSE 'Unknown' END AS category_type",
                pending_with,
                final_status_case("sv.complaint_status")
            ),
            "Complaint ID {complaint_id} is currently with: {pending_with} (Status: {final_status})",
        )
    };
    Draft::new(
        format!(
            "SELECT {} FROM {} WHERE cd.id_no = {} LIMIT 1",
            columns, COMPLAINT_FROM, id
        ),
        params,
        COMPLAINT_TABLES.to_vec(),
        ResponseTemplate::FirstRow(answer.to_string()),
    )
    .empty(EmptyHint::new("status").subject(format!("complaint {}", complaint_id)))
}

fn complaint_workflow(complaint_id: i64) -> Draft {
    let mut params = Params::default();
    let id = params.int(complaint_id);
    Draft::new(
        format!(
            "SELECT cd.id_no AS complaint_id, sv.complaint_status, sv.ho_qc_action_status, \
             sv.bh_action_status, sv.th_action_status, sv.cf_action_status, sv.md_action_status, \
             CASE WHEN sv.complaint_status = 'P' THEN 'Plant Level' \
             WHEN sv.complaint_status = 'QC' THEN 'HO QC Review' \
             WHEN sv.complaint_status = 'BH' THEN 'Business Head Review' \
             WHEN sv.complaint_status = 'TH' THEN 'Technical Head Review' \
             WHEN sv.complaint_status = 'CF' THEN 'CFO Review' \
             WHEN sv.complaint_status = 'MD' THEN 'MD Review' \
             WHEN sv.complaint_status = 'C' THEN 'Completed' \
             ELSE 'Unknown' END AS current_stage \
             FROM {} WHERE cd.id_no = {} LIMIT 1",
            COMPLAINT_FROM, id
        ),
        params,
        COMPLAINT_TABLES.to_vec(),
        ResponseTemplate::FirstRow(
            "Complaint ID {complaint_id} is currently at stage: {current_stage}".to_string(),
        ),
    )
    .empty(EmptyHint::new("workflow").subject(format!("complaint {}", complaint_id)))
}

fn complaint_actions(complaint_id: i64) -> Draft {
    let mut params = Params::default();
    let id = params.int(complaint_id);
    let actions: Vec<String> = Authority::ALL
        .iter()
        .map(|a| {
            format!(
                "{} AS {}",
                action_description_case(&format!("sv.{}", a.action_column())),
                a.action_column().trim_end_matches("_status")
            )
        })
        .collect();
    Draft::new(
        format!(
            "SELECT cd.id_no AS complaint_id, {} FROM {} WHERE cd.id_no = {} LIMIT 1",
            actions.join(", "),
            COMPLAINT_FROM,
            id
        ),
        params,
        COMPLAINT_TABLES.to_vec(),
        ResponseTemplate::Lead(format!(
            "Here are the approval actions for complaint ID {}:",
            complaint_id
        )),
    )
    .empty(EmptyHint::new("approval actions").subject(format!("complaint {}", complaint_id)))
}

fn authority_action(complaint_id: i64, authority: Authority) -> Draft {
    let mut params = Params::default();
    let id = params.int(complaint_id);
    let column = format!("sv.{}", authority.action_column());
    Draft::new(
        format!(
            "SELECT cd.id_no AS complaint_id, {c} AS action_status, {d} AS action_status_description \
             FROM {f} WHERE cd.id_no = {id} LIMIT 1",
            c = column,
            d = action_description_case(&column),
            f = COMPLAINT_FROM,
            id = id
        ),
        params,
        COMPLAINT_TABLES.to_vec(),
        ResponseTemplate::FirstRow(format!(
            "The {} action status for complaint ID {{complaint_id}} is: {{action_status_description}}",
            authority.label()
        )),
    )
    .empty(
        EmptyHint::new(format!("{} action", authority.label()))
            .subject(format!("complaint {}", complaint_id)),
    )
}

fn correction_status(complaint_id: i64) -> Draft {
    let mut params = Params::default();
    let id = params.int(complaint_id);
    Draft::new(
        format!(
            "SELECT cd.id_no AS complaint_id, sv.product_correction, \
             CASE WHEN sv.product_correction = 'Y' THEN 'Done' \
             WHEN sv.product_correction = 'N' THEN 'Not Done' \
             ELSE 'Not Recorded' END AS correction_status_description \
             FROM {} WHERE cd.id_no = {} LIMIT 1",
            COMPLAINT_FROM, id
        ),
        params,
        COMPLAINT_TABLES.to_vec(),
        ResponseTemplate::FirstRow(
            "Product correction status for complaint ID {complaint_id}: {correction_status_description}"
                .to_string(),
        ),
    )
    .empty(EmptyHint::new("product correction").subject(format!("complaint {}", complaint_id)))
}

fn complaint_list(condition: &str, answer: String, filter: String) -> Draft {
    Draft::new(
        format!(
            "SELECT cd.id_no AS complaint_id, cd.complaint_date, cd.complaint_subject, \
             {} AS pending_with, {} AS final_status FROM {} WHERE {} \
             ORDER BY cd.complaint_date DESC LIMIT 50",
            pending_with_case("sv.complaint_status", "cd.complaint_category_id"),
            final_status_case("sv.complaint_status"),
            COMPLAINT_FROM,
            condition
        ),
        Params::default(),
        COMPLAINT_TABLES.to_vec(),
        ResponseTemplate::RowCount(answer),
    )
    .empty(EmptyHint::new("complaints").filter(filter))
}

fn category_count(category: Category) -> Draft {
    Draft::new(
        format!(
            "SELECT COUNT(cd.id_no) AS complaint_count FROM crm_complaint_dtls cd \
             WHERE cd.complaint_category_id = '{}' AND cd.active_status = 'Y'",
            category.id()
        ),
        Params::default(),
        vec!["crm_complaint_dtls"],
        ResponseTemplate::CountCell {
            column: "complaint_count".to_string(),
            text: format!("Found {{n}} complaints in {} category.", category.label()),
        },
    )
}

fn complaint_count(status_word: Option<&str>) -> Result<Draft> {
    let (condition, text) = match status_word {
        Some(word) => {
            let code = value_map("active_status", word)?;
            (
                format!(" WHERE cd.active_status = '{}'", code),
                format!("Found {{n}} {} complaints.", word),
            )
        }
        None => (String::new(), "Found {n} complaints.".to_string()),
    };
    Ok(Draft::new(
        format!(
            "SELECT COUNT(cd.id_no) AS complaint_count FROM crm_complaint_dtls cd{}",
            condition
        ),
        Params::default(),
        vec!["crm_complaint_dtls"],
        ResponseTemplate::CountCell {
            column: "complaint_count".to_string(),
            text,
        },
    ))
}

// ============================================================================
// Distance
// ============================================================================

fn distance_report(reg_no: Option<&String>, date: Option<&DateRange>) -> Draft {
    let join = join_hierarchy_onto(
        "distance_report dr",
        "dr.reg_no = vm.reg_no",
        &[Level::Vehicle, Level::Region],
        JoinKind::Left,
    );
    let mut params = Params::default();
    let mut conditions = Vec::new();
    if let Some(reg) = reg_no {
        conditions.push(format!("dr.reg_no ILIKE {}", params.text(reg.as_str())));
    }
    if let Some(range) = date {
        conditions.push(params.date_range("dr.from_tm", range));
    }
    let mut sql = format!(
        "SELECT dr.reg_no, dr.from_tm, dr.to_tm, ROUND(dr.distance / 1000.0, 2) AS distance_km, \
         {} AS drum_rotation_time, hm.name AS plant_name, dm.name AS region_name FROM {}",
        DRUM_ROTATION_HHMM, join.from_clause
    );
    if !conditions.is_empty() {
        sql.push_str(&format!(" WHERE {}", conditions.join(" AND ")));
    }
    sql.push_str(" ORDER BY dr.from_tm DESC LIMIT 50");

    let mut tables = vec!["distance_report"];
    tables.extend(join.tables());

    let when = date.map(|d| format!(" for {}", d.label)).unwrap_or_default();
    let (answer, mut hint) = match reg_no {
        Some(reg) => (
            format!(
                "Found {{n}} distance records for vehicle {}{}. Distances are shown in KM and drum rotation time in HH:MM.",
                reg, when
            ),
            EmptyHint::new("distance records").subject(format!("vehicle {}", reg)),
        ),
        None => (
            format!(
                "Here's the distance report{} showing {{n}} travel records with distance in KM and drum rotation time in HH:MM format.",
                when
            ),
            EmptyHint::new("distance records"),
        ),
    };
    if let Some(range) = date {
        hint = hint.filter(range.label.clone());
    }
    Draft::new(sql, params, tables, ResponseTemplate::RowCount(answer)).empty(hint)
}

fn drum_rotation(reg_no: &str) -> Draft {
    let mut params = Params::default();
    let reg = params.text(reg_no);
    Draft::new(
        format!(
            "SELECT dr.reg_no, dr.from_tm, dr.to_tm, {} AS drum_rotation_time \
             FROM distance_report dr WHERE dr.reg_no ILIKE {} ORDER BY dr.from_tm DESC LIMIT 20",
            DRUM_ROTATION_HHMM, reg
        ),
        params,
        vec!["distance_report"],
        ResponseTemplate::RowCount(format!(
            "Found {{n}} drum rotation records for vehicle {}. Times are shown in HH:MM.",
            reg_no
        )),
    )
    .empty(EmptyHint::new("drum rotation").subject(format!("vehicle {}", reg_no)))
}

fn distance_totals(average: bool) -> Draft {
    let (function, alias, word) = if average {
        ("AVG", "average_distance_km", "average")
    } else {
        ("SUM", "total_distance_km", "total")
    };
    Draft::new(
        format!(
            "SELECT dr.reg_no, ROUND({f}(dr.distance) / 1000.0, 2) AS {a}, COUNT(*) AS trip_count \
             FROM distance_report dr GROUP BY dr.reg_no ORDER BY {a} DESC LIMIT 20",
            f = function,
            a = alias
        ),
        Params::default(),
        vec!["distance_report"],
        ResponseTemplate::RowCount(format!(
            "Here's the {} distance analysis for {{n}} vehicles, showing distances in KM.",
            word
        )),
    )
    .empty(EmptyHint::new("distance records"))
}

fn inter_plant(per_vehicle: bool) -> Draft {
    let join = join_hierarchy_onto(
        "distance_report dr",
        "dr.reg_no = vm.reg_no",
        &[Level::Vehicle, Level::Region],
        JoinKind::Inner,
    );
    let mut tables = vec!["distance_report"];
    tables.extend(join.tables());

    let (sql, answer) = if per_vehicle {
        (
            format!(
                "SELECT dr.reg_no, hm.name AS plant_name, COUNT(*) AS trip_count, \
                 ROUND(SUM(dr.distance) / 1000.0, 2) AS total_distance_km FROM {} \
                 GROUP BY dr.reg_no, hm.name HAVING COUNT(*) > 1 \
                 ORDER BY trip_count DESC LIMIT 50",
                join.from_clause
            ),
            "Found {n} vehicles that travel between different plants, with distances in KM.",
        )
    } else {
        (
            format!(
                "SELECT hm.name AS plant_name, dm.name AS region_name, COUNT(*) AS trip_count, \
                 ROUND(SUM(dr.distance) / 1000.0, 2) AS total_distance_km FROM {} \
                 GROUP BY hm.name, dm.name ORDER BY total_distance_km DESC LIMIT 50",
                join.from_clause
            ),
            "Found {n} plants with inter-plant travel data. Distances are shown in KM.",
        )
    };
    Draft::new(
        sql,
        Params::default(),
        tables,
        ResponseTemplate::RowCount(answer.to_string()),
    )
    .empty(EmptyHint::new("inter-plant travel"))
}

fn periodic_distance(period: Period) -> Draft {
    let (columns, group, order, limit) = match period {
        Period::Daily => (
            "DATE(dr.from_tm) AS travel_date",
            "DATE(dr.from_tm)",
            "travel_date DESC",
            30,
        ),
        Period::Weekly => (
            "DATE_TRUNC('week', dr.from_tm) AS week_start",
            "DATE_TRUNC('week', dr.from_tm)",
            "week_start DESC",
            10,
        ),
        Period::Monthly => (
            "EXTRACT(YEAR FROM dr.from_tm) AS travel_year, EXTRACT(MONTH FROM dr.from_tm) AS travel_month",
            "EXTRACT(YEAR FROM dr.from_tm), EXTRACT(MONTH FROM dr.from_tm)",
            "travel_year DESC, travel_month DESC",
            12,
        ),
    };
    Draft::new(
        format!(
            "SELECT {}, COUNT(*) AS trip_count, ROUND(SUM(dr.distance) / 1000.0, 2) AS total_distance_km \
             FROM distance_report dr GROUP BY {} ORDER BY {} LIMIT {}",
            columns, group, order, limit
        ),
        Params::default(),
        vec!["distance_report"],
        ResponseTemplate::RowCount(format!(
            "Here's the {} distance analysis for {{n}} time periods, with distances in KM.",
            period.label()
        )),
    )
    .empty(EmptyHint::new("distance records"))
}

// ============================================================================
// Drivers
// ============================================================================

fn driver_from() -> (String, Vec<&'static str>) {
    let join = join_hierarchy_onto(
        "driver_master drv",
        "drv.id_depo = hm.id_no",
        &[Level::Plant],
        JoinKind::Left,
    );
    let mut tables = vec!["driver_master"];
    tables.extend(join.tables());
    (join.from_clause, tables)
}

fn driver_by_name(name: &str) -> Draft {
    let (from, tables) = driver_from();
    let mut params = Params::default();
    let pattern = params.text(like_pattern(name));
    Draft::new(
        format!(
            "SELECT {cols}, hm.name AS assigned_plant, hm.hosp_code AS plant_code FROM {from} \
             WHERE drv.first_name ILIKE {p} OR drv.last_name ILIKE {p} \
             OR CONCAT(drv.first_name, ' ', drv.last_name) ILIKE {p} \
             ORDER BY drv.first_name, drv.last_name LIMIT 50",
            cols = DRIVER_COLUMNS,
            from = from,
            p = pattern
        ),
        params,
        tables,
        ResponseTemplate::RowCount(format!("Found {{n}} drivers matching '{}'.", name)),
    )
    .empty(EmptyHint::new("drivers").filter(format!("name matching '{}'", name)))
}

fn drivers_of_plant(plant: &str) -> Draft {
    let (from, tables) = driver_from();
    let mut params = Params::default();
    let pattern = params.text(like_pattern(plant));
    Draft::new(
        format!(
            "SELECT {}, hm.name AS assigned_plant, hm.hosp_code AS plant_code FROM {} \
             WHERE hm.name ILIKE {} ORDER BY drv.first_name, drv.last_name LIMIT 50",
            DRIVER_COLUMNS, from, pattern
        ),
        params,
        tables,
        ResponseTemplate::RowCount(format!("Found {{n}} drivers assigned to '{}'.", plant)),
    )
    .empty(EmptyHint::new("drivers").subject(format!("plant '{}'", plant)))
}

fn licence_expiry() -> Draft {
    let (from, tables) = driver_from();
    Draft::new(
        format!(
            "SELECT {}, CASE WHEN drv.lic_exp < CURRENT_DATE THEN 'EXPIRED' \
             WHEN drv.lic_exp <= CURRENT_DATE + INTERVAL '30 days' THEN 'EXPIRES_SOON' \
             ELSE 'VALID' END AS license_status, hm.name AS assigned_plant FROM {} \
             WHERE drv.lic_exp IS NOT NULL AND drv.lic_exp <= CURRENT_DATE + INTERVAL '90 days' \
             ORDER BY drv.lic_exp LIMIT 50",
            DRIVER_COLUMNS, from
        ),
        Params::default(),
        tables,
        ResponseTemplate::RowCount(
            "Found {n} drivers whose licence has expired or expires within 90 days.".to_string(),
        ),
    )
    .empty(EmptyHint::new("licences expiring").filter("within the next 90 days".to_string()))
}

fn driver_birthdays(month: Option<u32>) -> Draft {
    let (from, tables) = driver_from();
    let mut params = Params::default();
    let mut condition = "drv.dt_of_birth IS NOT NULL".to_string();
    let mut answer = "Found {n} driver birthdays".to_string();
    let mut hint = EmptyHint::new("driver birthdays");
    if let Some(m) = month {
        let p = params.int(i64::from(m));
        condition.push_str(&format!(" AND EXTRACT(MONTH FROM drv.dt_of_birth) = {}", p));
        let name = chrono::Month::try_from(m as u8)
            .map(|month| month.name().to_string())
            .unwrap_or_else(|_| m.to_string());
        answer.push_str(&format!(" in {}", name));
        hint = hint.filter(format!("in {}", name));
    }
    answer.push('.');
    Draft::new(
        format!(
            "SELECT CONCAT(drv.first_name, ' ', drv.last_name) AS driver_name, drv.d_code AS driver_code, \
             TO_CHAR(drv.dt_of_birth, 'DD-MM-YYYY') AS date_of_birth, \
             TO_CHAR(drv.dt_of_birth, 'DD Month') AS birthday, \
             EXTRACT(YEAR FROM AGE(drv.dt_of_birth)) AS age, hm.name AS assigned_plant \
             FROM {} WHERE {} \
             ORDER BY EXTRACT(MONTH FROM drv.dt_of_birth), EXTRACT(DAY FROM drv.dt_of_birth) LIMIT 50",
            from, condition
        ),
        params,
        tables,
        ResponseTemplate::RowCount(answer),
    )
    .empty(hint)
}

// ============================================================================
// Production reports
// ============================================================================

fn dpr_from() -> (String, Vec<&'static str>) {
    let join = join_hierarchy_onto(
        "dpr_master1 dpr",
        "dpr.plant_id = hm.id_no",
        &[Level::Plant],
        JoinKind::Left,
    );
    let mut tables = vec!["dpr_master1"];
    tables.extend(join.tables());
    (join.from_clause, tables)
}

fn dpr_report(plant: Option<&String>, date: Option<&DateRange>) -> Draft {
    let (from, tables) = dpr_from();
    let mut params = Params::default();
    let mut conditions = Vec::new();
    if let Some(plant) = plant {
        conditions.push(format!("hm.name ILIKE {}", params.text(like_pattern(plant))));
    }
    if let Some(range) = date {
        conditions.push(params.date_range("dpr.created_date", range));
    }
    let mut sql = format!("SELECT {} FROM {}", DPR_COLUMNS, from);
    if !conditions.is_empty() {
        sql.push_str(&format!(" WHERE {}", conditions.join(" AND ")));
    }
    sql.push_str(" ORDER BY dpr.id_no DESC LIMIT 50");

    let when = date.map(|d| format!(" for {}", d.label)).unwrap_or_default();
    let (answer, mut hint) = match plant {
        Some(plant) => (
            format!("Found {{n}} production report entries for '{}'{}.", plant, when),
            EmptyHint::new("production entries").subject(format!("plant '{}'", plant)),
        ),
        None => (
            format!("Here are the {{n}} most recent production report entries{}.", when),
            EmptyHint::new("production entries"),
        ),
    };
    if let Some(range) = date {
        hint = hint.filter(range.label.clone());
    }
    Draft::new(sql, params, tables, ResponseTemplate::RowCount(answer)).empty(hint)
}

fn dpr_by_customer(customer: &str) -> Draft {
    let (from, tables) = dpr_from();
    let mut params = Params::default();
    let pattern = params.text(like_pattern(customer));
    Draft::new(
        format!(
            "SELECT {} FROM {} WHERE dpr.cust_name ILIKE {} ORDER BY dpr.id_no DESC LIMIT 50",
            DPR_COLUMNS, from, pattern
        ),
        params,
        tables,
        ResponseTemplate::RowCount(format!(
            "Found {{n}} production report entries for customer '{}'.",
            customer
        )),
    )
    .empty(EmptyHint::new("production entries").subject(format!("customer '{}'", customer)))
}

fn transit_mixer_utilisation() -> Draft {
    Draft::new(
        "SELECT dpr.tm_no AS transit_mixer, COUNT(*) AS delivery_count, \
         ROUND(AVG(dpr.vol_cum)::numeric, 2) AS avg_volume_m3, \
         ROUND(SUM(dpr.vol_cum)::numeric, 2) AS total_volume_m3 \
         FROM dpr_master1 dpr WHERE dpr.tm_no IS NOT NULL \
         GROUP BY dpr.tm_no ORDER BY delivery_count DESC LIMIT 50"
            .to_string(),
        Params::default(),
        vec!["dpr_master1"],
        ResponseTemplate::RowCount(
            "Here's the utilisation of {n} transit mixers, busiest first.".to_string(),
        ),
    )
    .empty(EmptyHint::new("transit mixer deliveries"))
}

fn grade_summary() -> Draft {
    Draft::new(
        "SELECT dpr.grade AS concrete_grade, COUNT(*) AS delivery_count, \
         ROUND(SUM(dpr.vol_cum)::numeric, 2) AS total_volume_m3 \
         FROM dpr_master1 dpr WHERE dpr.grade IS NOT NULL \
         GROUP BY dpr.grade ORDER BY total_volume_m3 DESC"
            .to_string(),
        Params::default(),
        vec!["dpr_master1"],
        ResponseTemplate::RowCount("Here's the concrete grade summary across {n} grades.".to_string()),
    )
    .empty(EmptyHint::new("concrete deliveries"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::validate::referenced_tables;
    use crate::planner::values::Assignee;
    use chrono::NaiveDate;
    use std::collections::BTreeSet;

    fn sample_intents() -> Vec<Intent> {
        let date = crate::planner::dates::find_date_range(
            "yesterday",
            NaiveDate::from_ymd_opt(2024, 5, 15).unwrap(),
        );
        vec![
            Intent::ListRegions,
            Intent::ListZones,
            Intent::ListPlants,
            Intent::ZoneOfVehicle { reg_no: "ABC-123".into() },
            Intent::RegionOfVehicle { reg_no: "ABC-123".into() },
            Intent::PlantOfVehicle { reg_no: "ABC-123".into() },
            Intent::VehiclesInZone { zone: "North".into() },
            Intent::VehiclesInRegion { region: "Pune".into() },
            Intent::VehiclesInPlant { plant: "Wagholi".into() },
            Intent::VehiclesOfPlant { plant: "Wagholi".into() },
            Intent::VehicleHierarchy { reg_no: "XYZ-001".into() },
            Intent::ContextualHierarchy { reg_no: "XYZ-001".into(), level: Level::Plant },
            Intent::PlantById { plant_id: 7 },
            Intent::PlantIdByName { plant: "Wagholi".into() },
            Intent::SiteVisitsForPlant { plant: "Wagholi".into() },
            Intent::CustomerById { customer_id: 9 },
            Intent::ComplaintStatus { complaint_id: 1 },
            Intent::ComplaintPendingWith { complaint_id: 1 },
            Intent::ComplaintWorkflow { complaint_id: 1 },
            Intent::ComplaintActionStatus { complaint_id: 1 },
            Intent::ComplaintAuthorityAction { complaint_id: 1, authority: Authority::Md },
            Intent::ComplaintCorrectionStatus { complaint_id: 1 },
            Intent::ComplaintsByAssignee { assignee: Assignee::PlantIncharge },
            Intent::ComplaintsByAction { authority: Authority::Cfo, approved: true },
            Intent::ComplaintsCorrectionDone,
            Intent::ComplaintsCorrectionNotDone,
            Intent::ComplaintCountByCategory { category: Category::Technical },
            Intent::ComplaintsByCategory { category: Category::Operations },
            Intent::ComplaintCount { status_word: Some("open".into()) },
            Intent::ComplaintsByStatus { status_word: "closed".into() },
            Intent::DistanceReport { date: date.clone() },
            Intent::VehicleDistance { reg_no: "AB12".into(), date },
            Intent::DrumRotation { reg_no: "AB12".into() },
            Intent::DistanceTotals { average: true },
            Intent::InterPlantDistance,
            Intent::InterPlantTravel,
            Intent::PeriodicDistance { period: Period::Weekly },
            Intent::DriverByName { name: "Ravi".into() },
            Intent::DriversOfPlant { plant: "Wagholi".into() },
            Intent::LicenceExpiry,
            Intent::DriverBirthdays { month: Some(3) },
            Intent::DprRecent { date: None },
            Intent::DprByPlant { plant: "Wagholi".into(), date: None },
            Intent::DprByCustomer { customer: "Acme".into() },
            Intent::TransitMixerUtilisation,
            Intent::GradeSummary,
        ]
    }

    #[test]
    fn test_sql_references_exactly_declared_tables() {
        for intent in sample_intents() {
            let plan = build(&intent).unwrap();
            let referenced: BTreeSet<String> = referenced_tables(&plan.statement.sql)
                .unwrap_or_else(|e| panic!("{} does not parse: {:?}", intent.tag(), e))
                .into_iter()
                .collect();
            assert_eq!(referenced, plan.tables, "{}", intent.tag());
        }
    }

    #[test]
    fn test_no_write_verbs_and_every_param_bound() {
        let verbs = ["INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "GRANT", "TRUNCATE"];
        for intent in sample_intents() {
            let plan = build(&intent).unwrap();
            let upper = plan.statement.sql.to_uppercase();
            for verb in verbs {
                assert!(!upper.contains(verb), "{} contains {}", intent.tag(), verb);
            }
            for i in 1..=plan.statement.params.len() {
                assert!(plan.statement.sql.contains(&format!("${}", i)));
            }
        }
    }

    #[test]
    fn test_plant_of_vehicle_binds_registration() {
        let plan = build(&Intent::PlantOfVehicle {
            reg_no: "ABC-123".into(),
        })
        .unwrap();
        assert!(plan.statement.sql.contains("vm.reg_no = $1"));
        assert!(plan.statement.sql.contains("JOIN hosp_master hm ON vm.id_hosp = hm.id_no"));
        assert_eq!(plan.statement.params, vec![SqlParam::Text("ABC-123".into())]);
    }

    #[test]
    fn test_region_of_vehicle_joins_plant() {
        let plan = build(&Intent::RegionOfVehicle {
            reg_no: "ABC-123".into(),
        })
        .unwrap();
        assert!(plan.tables.contains("hosp_master"));
        assert!(plan.statement.sql.contains("hm.id_dist = dm.id_no"));
    }

    #[test]
    fn test_list_intents_order_by_masked_alias() {
        let masking = crate::masking::MaskingLayer::from_config(&crate::config::PipelineConfig::default());
        for (intent, level) in [
            (Intent::ListRegions, Level::Region),
            (Intent::ListZones, Level::Zone),
            (Intent::ListPlants, Level::Plant),
        ] {
            let plan = build(&intent).unwrap();
            let sql = masking.rewrite(&plan.statement).unwrap().sql;
            assert!(sql.starts_with("SELECT DISTINCT CASE WHEN"), "{}", sql);
            assert!(sql.contains(&format!("END AS {}", level.name_alias())), "{}", sql);
            assert!(sql.ends_with(&format!("ORDER BY {}", level.name_alias())), "{}", sql);
            assert!(!sql.contains(&format!("ORDER BY {}", level.name_column())), "{}", sql);
        }
    }

    #[test]
    fn test_open_complaints_use_code_literal() {
        let plan = build(&Intent::ComplaintCount {
            status_word: Some("open".into()),
        })
        .unwrap();
        assert!(plan.statement.sql.contains("active_status = 'Y'"));
        assert!(!plan.statement.sql.to_lowercase().contains("'open'"));
    }

    #[test]
    fn test_unknown_status_word_is_clarification() {
        let err = build(&Intent::ComplaintCount {
            status_word: Some("pending".into()),
        })
        .unwrap_err();
        assert!(err.is_clarification());
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("Nagpur Hingna"), "%Nagpur%Hingna%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }

    #[test]
    fn test_date_range_binds_two_params() {
        let date = crate::planner::dates::find_date_range(
            "yesterday",
            NaiveDate::from_ymd_opt(2024, 5, 15).unwrap(),
        );
        let plan = build(&Intent::VehicleDistance {
            reg_no: "AB12".into(),
            date,
        })
        .unwrap();
        assert_eq!(plan.statement.params.len(), 3);
        assert!(plan.statement.sql.contains("dr.from_tm >= $2::date AND dr.from_tm < $3::date"));
        assert_eq!(plan.statement.params[1], SqlParam::Text("2024-05-14".into()));
    }
}
