//! Priority keyword map and hierarchical phrases
//!
//! A phrase in the utterance pins the tables it names. Hierarchical
//! questions pin the whole chain so every intermediate level reaches the
//! shortlist.

use once_cell::sync::Lazy;
use regex::Regex;

const HIERARCHY_CHAIN: &[&str] = &[
    "zone_master",
    "district_master",
    "hosp_master",
    "vehicle_master",
];

/// (phrase, tables). Matched at a word start, so "plant" also covers "plants".
const PRIORITY_PHRASES: &[(&str, &[&str])] = &[
    // crm
    ("site visit", &["crm_site_visit_dtls"]),
    ("visit details", &["crm_site_visit_dtls"]),
    ("complaint", &["crm_complaint_dtls"]),
    ("pending with", &["crm_complaint_dtls", "crm_site_visit_dtls"]),
    ("product correction", &["crm_complaint_dtls", "crm_site_visit_dtls"]),
    ("action status", &["crm_complaint_dtls", "crm_site_visit_dtls"]),
    ("customer", &["customer_master"]),
    // utilisation and stoppage
    ("stoppage", &["util_report"]),
    ("idle", &["util_report"]),
    ("halt", &["util_report"]),
    ("overspeed", &["util_report"]),
    ("utilisation report", &["util_report"]),
    ("utilization report", &["util_report"]),
    ("vehicle tracking", &["util_report"]),
    ("tracking report", &["util_report"]),
    ("vehicle report", &["util_report"]),
    // distance
    ("distance report", &["distance_report"]),
    ("travel report", &["distance_report"]),
    ("journey report", &["distance_report"]),
    ("vehicle distance", &["distance_report"]),
    ("distance", &["distance_report"]),
    ("drum rotation", &["distance_report"]),
    ("inter plant", &["distance_report", "hosp_master"]),
    ("plant to plant", &["distance_report", "hosp_master"]),
    // trips
    ("trip", &["mega_trips"]),
    ("route", &["mega_trips"]),
    // drivers
    ("driver", &["driver_master"]),
    ("licence", &["driver_master"]),
    ("license", &["driver_master"]),
    // production
    ("dpr", &["dpr_master1"]),
    ("production report", &["dpr_master1"]),
    ("transit mixer", &["dpr_master1"]),
    ("concrete", &["dpr_master1"]),
    ("grade", &["dpr_master1"]),
    // hierarchy levels
    ("vehicle", &["vehicle_master"]),
    ("truck", &["vehicle_master"]),
    ("fleet", &["vehicle_master"]),
    ("plant", &["hosp_master"]),
    ("facilit", &["hosp_master"]),
    ("region", &["district_master"]),
    ("district", &["district_master"]),
    ("zone", &["zone_master"]),
    ("area", &["zone_master"]),
    // level pairs
    ("zone region", &["zone_master", "district_master"]),
    ("region plant", &["district_master", "hosp_master"]),
    ("plant vehicle", &["hosp_master", "vehicle_master"]),
    ("zone to vehicle", HIERARCHY_CHAIN),
];

static HIERARCHICAL_PATTERNS: Lazy<Vec<(Regex, &'static [&'static str])>> = Lazy::new(|| {
    let patterns: [(&str, &'static [&'static str]); 9] = [
        (r"\b(?:zone|area)\b.*\b(?:vehicle|truck)\b", HIERARCHY_CHAIN),
        (r"\b(?:vehicle|truck)\b.*\b(?:zone|area)\b", HIERARCHY_CHAIN),
        (
            r"\b(?:region|district)\b.*\b(?:vehicle|truck)\b",
            &["district_master", "hosp_master", "vehicle_master"],
        ),
        (
            r"\b(?:vehicle|truck)\b.*\b(?:region|district)\b",
            &["district_master", "hosp_master", "vehicle_master"],
        ),
        (
            r"\b(?:zone|area)\b.*\b(?:plant|facilit)",
            &["zone_master", "district_master", "hosp_master"],
        ),
        (
            r"\b(?:plant|facilit)\w*\b.*\b(?:zone|area)\b",
            &["zone_master", "district_master", "hosp_master"],
        ),
        (
            r"\b(?:vehicles|trucks)\s+(?:in|of|at|from)\s+(?:the\s+)?\w+\s+(?:plant|facility)\b",
            &["hosp_master", "vehicle_master"],
        ),
        (
            r"\b(?:zone|region|plant|vehicle)\s+(?:hierarchy|relationship|structure)\b",
            HIERARCHY_CHAIN,
        ),
        (
            r"\b(?:stoppage|idle|halt)\w*\b.*\b(?:plant|depot)\b",
            &["util_report", "hosp_master"],
        ),
    ];
    patterns
        .into_iter()
        .map(|(pattern, tables)| (Regex::new(pattern).expect("valid regex"), tables))
        .collect()
});

/// Tables pinned by phrases or hierarchical patterns, first mention first
pub fn priority_tables(utterance: &str) -> Vec<&'static str> {
    let text = utterance.to_lowercase();
    let mut tables: Vec<&'static str> = Vec::new();
    let mut push = |names: &[&'static str]| {
        for name in names {
            if !tables.contains(name) {
                tables.push(*name);
            }
        }
    };

    for (regex, names) in HIERARCHICAL_PATTERNS.iter() {
        if regex.is_match(&text) {
            push(names);
        }
    }
    for (phrase, names) in PRIORITY_PHRASES {
        if contains_at_word_start(&text, phrase) {
            push(names);
        }
    }
    tables
}

fn contains_at_word_start(text: &str, phrase: &str) -> bool {
    text.match_indices(phrase).any(|(at, _)| {
        text[..at]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric())
    })
}
