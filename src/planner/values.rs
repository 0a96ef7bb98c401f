//! Closed value domains of the complaint tables
//!
//! User words never reach SQL: they are mapped to the stored codes here, and
//! a word outside a domain becomes a clarification naming what is accepted.

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Complaint category (`complaint_category_id`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Operations,
    Technical,
}

impl Category {
    pub fn id(self) -> &'static str {
        match self {
            Category::Operations => "1",
            Category::Technical => "2",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Category::Operations => "Operations",
            Category::Technical => "Technical",
        }
    }

    pub fn parse(word: &str) -> Option<Self> {
        match word.trim().to_lowercase().as_str() {
            "operation" | "operations" | "ops" | "operational" => Some(Category::Operations),
            "technical" | "tech" => Some(Category::Technical),
            _ => None,
        }
    }
}

/// Approving authorities of the complaint workflow, in escalation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Authority {
    HoQc,
    BusinessHead,
    TechnicalHead,
    Cfo,
    Md,
}

impl Authority {
    pub const ALL: [Authority; 5] = [
        Authority::HoQc,
        Authority::BusinessHead,
        Authority::TechnicalHead,
        Authority::Cfo,
        Authority::Md,
    ];

    /// Action column on the site-visit table
    pub fn action_column(self) -> &'static str {
        match self {
            Authority::HoQc => "ho_qc_action_status",
            Authority::BusinessHead => "bh_action_status",
            Authority::TechnicalHead => "th_action_status",
            Authority::Cfo => "cf_action_status",
            Authority::Md => "md_action_status",
        }
    }

    /// Value of `complaint_status` while the complaint waits on this authority
    pub fn status_code(self) -> &'static str {
        match self {
            Authority::HoQc => "QC",
            Authority::BusinessHead => "BH",
            Authority::TechnicalHead => "TH",
            Authority::Cfo => "CF",
            Authority::Md => "MD",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Authority::HoQc => "HO QC",
            Authority::BusinessHead => "Business Head",
            Authority::TechnicalHead => "Technical Head",
            Authority::Cfo => "CFO",
            Authority::Md => "MD",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        let normalised = text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        match normalised.as_str() {
            "ho qc" | "hoqc" | "qc" | "ho-qc" => Some(Authority::HoQc),
            "business head" | "bh" => Some(Authority::BusinessHead),
            "technical head" | "th" => Some(Authority::TechnicalHead),
            "cfo" | "cf" => Some(Authority::Cfo),
            "md" | "managing director" => Some(Authority::Md),
            _ => None,
        }
    }
}

/// Who a pending complaint sits with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Assignee {
    /// Status P on an Operations complaint
    PlantIncharge,
    /// Status P on a Technical complaint
    TechnicalManager,
    Authority(Authority),
}

impl Assignee {
    pub fn label(self) -> &'static str {
        match self {
            Assignee::PlantIncharge => "Plant Incharge",
            Assignee::TechnicalManager => "Technical Manager/Incharge",
            Assignee::Authority(a) => a.label(),
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        let normalised = text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        match normalised.as_str() {
            "plant incharge" | "plant in-charge" | "plant in charge" => Some(Assignee::PlantIncharge),
            "technical manager" | "technical incharge" | "technical in-charge" => {
                Some(Assignee::TechnicalManager)
            }
            other => Authority::parse(other).map(Assignee::Authority),
        }
    }

    /// WHERE condition over `sv.complaint_status` and `cd.complaint_category_id`
    pub fn condition(self) -> String {
        match self {
            Assignee::PlantIncharge => format!(
                "sv.complaint_status = 'P' AND cd.complaint_category_id = '{}'",
                Category::Operations.id()
            ),
            Assignee::TechnicalManager => format!(
                "sv.complaint_status = 'P' AND cd.complaint_category_id = '{}'",
                Category::Technical.id()
            ),
            Assignee::Authority(a) => format!("sv.complaint_status = '{}'", a.status_code()),
        }
    }
}

/// Columns whose values form a closed enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueDomain {
    ActiveStatus,
    ComplaintStatus,
    ComplaintCategory,
    ActionStatus,
    ProductCorrection,
}

const ACTIVE_STATUS_WORDS: &[(&str, &str)] = &[
    ("open", "Y"),
    ("active", "Y"),
    ("ongoing", "Y"),
    ("closed", "N"),
    ("resolved", "N"),
    ("completed", "N"),
    ("done", "N"),
];

const COMPLAINT_STATUS_WORDS: &[(&str, &str)] = &[
    ("plant", "P"),
    ("ho qc", "QC"),
    ("qc", "QC"),
    ("business head", "BH"),
    ("technical head", "TH"),
    ("cfo", "CF"),
    ("md", "MD"),
    ("completed", "C"),
];

const CATEGORY_WORDS: &[(&str, &str)] = &[
    ("operations", "1"),
    ("operation", "1"),
    ("technical", "2"),
    ("tech", "2"),
];

const ACTION_STATUS_WORDS: &[(&str, &str)] = &[("approved", "A"), ("rejected", "R")];

const PRODUCT_CORRECTION_WORDS: &[(&str, &str)] = &[
    ("done", "Y"),
    ("yes", "Y"),
    ("corrected", "Y"),
    ("not done", "N"),
    ("no", "N"),
];

impl ValueDomain {
    pub fn for_column(column: &str) -> Option<Self> {
        let bare = column.rsplit('.').next().unwrap_or(column).to_lowercase();
        match bare.as_str() {
            "active_status" => Some(ValueDomain::ActiveStatus),
            "complaint_status" => Some(ValueDomain::ComplaintStatus),
            "complaint_category_id" => Some(ValueDomain::ComplaintCategory),
            "product_correction" => Some(ValueDomain::ProductCorrection),
            c if c.ends_with("_action_status") => Some(ValueDomain::ActionStatus),
            _ => None,
        }
    }

    pub fn column(self) -> &'static str {
        match self {
            ValueDomain::ActiveStatus => "active_status",
            ValueDomain::ComplaintStatus => "complaint_status",
            ValueDomain::ComplaintCategory => "complaint_category_id",
            ValueDomain::ActionStatus => "*_action_status",
            ValueDomain::ProductCorrection => "product_correction",
        }
    }

    fn words(self) -> &'static [(&'static str, &'static str)] {
        match self {
            ValueDomain::ActiveStatus => ACTIVE_STATUS_WORDS,
            ValueDomain::ComplaintStatus => COMPLAINT_STATUS_WORDS,
            ValueDomain::ComplaintCategory => CATEGORY_WORDS,
            ValueDomain::ActionStatus => ACTION_STATUS_WORDS,
            ValueDomain::ProductCorrection => PRODUCT_CORRECTION_WORDS,
        }
    }

    /// Stored codes
    pub fn codes(self) -> Vec<&'static str> {
        let mut codes: Vec<&'static str> = self.words().iter().map(|(_, code)| *code).collect();
        codes.dedup();
        codes
    }

    pub fn is_code(self, value: &str) -> bool {
        let value = value.trim();
        self.words()
            .iter()
            .any(|(_, code)| code.eq_ignore_ascii_case(value))
    }

    pub fn accepted_words(self) -> Vec<String> {
        self.words().iter().map(|(word, _)| word.to_string()).collect()
    }

    /// Map a user word to its code; codes themselves pass through
    pub fn map_word(self, word: &str) -> Option<&'static str> {
        let normalised = word.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        self.words()
            .iter()
            .find(|(w, code)| *w == normalised || code.eq_ignore_ascii_case(&normalised))
            .map(|(_, code)| *code)
    }
}

/// Code stored in `column` for the user's `word`
pub fn value_map(column: &str, word: &str) -> Result<&'static str, PipelineError> {
    let domain = ValueDomain::for_column(column);
    domain
        .and_then(|d| d.map_word(word))
        .ok_or_else(|| PipelineError::ValueDomain {
            column: column.to_string(),
            word: word.to_string(),
            accepted: domain.map(|d| d.accepted_words()).unwrap_or_default(),
        })
}

/// SQL CASE naming who a complaint is pending with
pub fn pending_with_case(status: &str, category: &str) -> String {
    format!(
        "CASE \
         WHEN {s} = 'P' AND {c} = '1' THEN 'Plant Incharge' \
         WHEN {s} = 'P' AND {c} = '2' THEN 'Technical Manager/Incharge' \
         WHEN {s} = 'QC' THEN 'HO QC' \
         WHEN {s} = 'BH' THEN 'Business Head' \
         WHEN {s} = 'TH' THEN 'Technical Head' \
         WHEN {s} = 'CF' THEN 'CFO' \
         WHEN {s} = 'MD' THEN 'MD' \
         WHEN {s} = 'C' THEN 'Completed' \
         ELSE 'Unknown' END",
        s = status,
        c = category
    )
}

/// SQL CASE mapping `complaint_status` to Open/Closed
pub fn final_status_case(status: &str) -> String {
    format!("CASE WHEN {} = 'C' THEN 'Closed' ELSE 'Open' END", status)
}

/// SQL CASE mapping an authority action code to text
pub fn action_description_case(column: &str) -> String {
    format!(
        "CASE WHEN {c} = 'A' THEN 'Approved' WHEN {c} = 'R' THEN 'Rejected' ELSE 'Pending' END",
        c = column
    )
}

/// Value-domain notes for the LLM prompt
pub fn cheat_sheet() -> String {
    let line = |column: &str, words: &[(&str, &str)]| {
        let pairs: Vec<String> = words
            .iter()
            .map(|(word, code)| format!("{} → '{}'", word, code))
            .collect();
        format!("- {}: {}", column, pairs.join(", "))
    };
    [
        line("crm_complaint_dtls.active_status", ACTIVE_STATUS_WORDS),
        line("crm_complaint_dtls.complaint_category_id", CATEGORY_WORDS),
        line("crm_site_visit_dtls.complaint_status", COMPLAINT_STATUS_WORDS),
        line("crm_site_visit_dtls.*_action_status", ACTION_STATUS_WORDS),
        line("crm_site_visit_dtls.product_correction", PRODUCT_CORRECTION_WORDS),
    ]
    .join("\n")
}
