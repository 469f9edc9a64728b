//! The standards-committee questionnaire and how one response becomes a
//! [`SubmissionRecord`].
//!
//! Multi-select answers are joined here, before the record reaches the
//! submitter: roles with `;`, priority domains with `>`. Downstream parsers of
//! the worksheet rely on those separators, so they must not change.

use crate::record::SubmissionRecord;
use chrono::NaiveDateTime;
use serde::Deserialize;
use std::fmt;

pub const ROLE_SEPARATOR: &str = ";";
pub const DOMAIN_SEPARATOR: &str = ">";

/// Local time to the second, no offset.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

macro_rules! labelled_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $label:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $label)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn label(self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.label())
            }
        }
    };
}

labelled_enum!(
    /// Respondent's role on the committee.
    Role {
        Chair => "Chair",
        Member => "Member",
        Secretariat => "Secretariat",
        Regulator => "Regulator",
        Industry => "Industry",
        Academia => "Academia",
        Other => "Other",
    }
);

labelled_enum!(CommitteeType {
    Nsc => "NSC",
    Wg => "WG",
    Sda => "SDA",
    Other => "Other",
});

labelled_enum!(Frequency {
    Never => "Never",
    Rarely => "Rarely",
    Sometimes => "Sometimes",
    Often => "Often",
    Always => "Always",
});

labelled_enum!(PriorityDomain {
    Ai => "AI",
    Cybersecurity => "Cybersecurity",
    GreenEconomy => "Green economy",
    Halal => "Halal",
    Healthcare => "Healthcare",
    Construction => "Construction",
    Other => "Other",
});

/// A 1..=5 agreement score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(try_from = "u8")]
pub struct Likert(u8);

impl Likert {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    pub fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Likert {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        if (Self::MIN..=Self::MAX).contains(&v) {
            Ok(Self(v))
        } else {
            Err(format!("likert score must be {}..={}, got {v}", Self::MIN, Self::MAX))
        }
    }
}

/// One filled-in questionnaire.
///
/// Choice and score fields are required; free text defaults to empty.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuestionnaireResponse {
    // Section A: basic info
    #[serde(default)]
    pub respondent_id: String,
    #[serde(default)]
    pub roles: Vec<Role>,
    pub committee_type: CommitteeType,
    #[serde(default)]
    pub primary_sector_msic: String,
    pub freq_adoption_iso: Frequency,

    // Section B: drivers
    pub q1_market_need: Likert,
    pub q2_regulatory_need: Likert,
    pub q3_consult_regulator: Likert,
    pub q4_align_international: Likert,

    // Section C: process
    pub q5_process_efficient: Likert,
    pub q6_enough_experts: Likert,
    pub q7_budget_sufficient: Likert,
    pub months_to_publish: u32,

    // Forward agenda
    #[serde(default)]
    pub priority_domains: Vec<PriorityDomain>,
    #[serde(default)]
    pub fast_track: String,
    #[serde(default)]
    pub retire_merge: String,
}

impl QuestionnaireResponse {
    /// Record keys in the order the worksheet's header row should list them.
    pub const COLUMNS: [&'static str; 17] = [
        "timestamp",
        "respondent_id",
        "role_multi",
        "committee_type",
        "primary_sector_msic",
        "freq_adoption_iso",
        "q1_market_need",
        "q2_regulatory_need",
        "q3_consult_regulator",
        "q4_align_international",
        "q5_process_efficient",
        "q6_enough_experts",
        "q7_budget_sufficient",
        "months_to_publish",
        "priority_domains",
        "fast_track",
        "retire_merge",
    ];

    /// Normalize into the flat record handed to the submitter.
    pub fn into_record(self, submitted_at: NaiveDateTime) -> SubmissionRecord {
        SubmissionRecord::builder()
            .field("timestamp", submitted_at.format(TIMESTAMP_FORMAT).to_string())
            .field("respondent_id", self.respondent_id.trim())
            .field("role_multi", join(&self.roles, ROLE_SEPARATOR))
            .field("committee_type", self.committee_type.label())
            .field("primary_sector_msic", self.primary_sector_msic.trim())
            .field("freq_adoption_iso", self.freq_adoption_iso.label())
            .field("q1_market_need", self.q1_market_need.value())
            .field("q2_regulatory_need", self.q2_regulatory_need.value())
            .field("q3_consult_regulator", self.q3_consult_regulator.value())
            .field("q4_align_international", self.q4_align_international.value())
            .field("q5_process_efficient", self.q5_process_efficient.value())
            .field("q6_enough_experts", self.q6_enough_experts.value())
            .field("q7_budget_sufficient", self.q7_budget_sufficient.value())
            .field("months_to_publish", self.months_to_publish)
            .field("priority_domains", join(&self.priority_domains, DOMAIN_SEPARATOR))
            .field("fast_track", self.fast_track.trim())
            .field("retire_merge", self.retire_merge.trim())
            .build()
    }
}

fn join<T: fmt::Display>(items: &[T], sep: &str) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(sep)
}
