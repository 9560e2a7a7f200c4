use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

pub const DEFAULT_PASS_PERCENT: f64 = 40.0;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GradingError {
    #[error("no mark records to summarize")]
    NoData,
    #[error("invalid grading policy: {0}")]
    InvalidPolicy(String),
    #[error("invalid mark: {0}")]
    InvalidMark(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeBand {
    pub min_percent: f64,
    pub grade: String,
    pub grade_point: f64,
}

impl GradeBand {
    fn new(min_percent: f64, grade: &str, grade_point: f64) -> Self {
        Self {
            min_percent,
            grade: grade.to_string(),
            grade_point,
        }
    }
}

/// How the overall outcome is decided once the aggregate percentage is known.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutcomeRule {
    /// Pass iff the overall percentage reaches the pass mark. Failing subjects
    /// do not veto an aggregate pass.
    #[default]
    Aggregate,
    /// Aggregate pass and every individual subject at or above the pass mark.
    AllSubjects,
}

/// What `summarize` does when a student has no mark records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EmptyRecords {
    /// 0%, GPA 0, outcome Fail.
    #[default]
    ZeroFail,
    /// `GradingError::NoData`.
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Pass,
    Fail,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Pass => "Pass",
            Outcome::Fail => "Fail",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GradingPolicyDef {
    bands: Vec<GradeBand>,
    #[serde(default = "default_pass_percent")]
    pass_percent: f64,
    #[serde(default)]
    outcome_rule: OutcomeRule,
    #[serde(default)]
    empty_records: EmptyRecords,
}

fn default_pass_percent() -> f64 {
    DEFAULT_PASS_PERCENT
}

/// Grade bands, pass mark and outcome rules. Bands are kept sorted from the
/// highest threshold down and the lowest band always starts at or below 0%,
/// so every percentage maps to exactly one band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "GradingPolicyDef")]
pub struct GradingPolicy {
    bands: Vec<GradeBand>,
    pass_percent: f64,
    outcome_rule: OutcomeRule,
    empty_records: EmptyRecords,
}

impl TryFrom<GradingPolicyDef> for GradingPolicy {
    type Error = GradingError;

    fn try_from(def: GradingPolicyDef) -> Result<Self, Self::Error> {
        GradingPolicy::new(def.bands, def.pass_percent, def.outcome_rule, def.empty_records)
    }
}

impl Default for GradingPolicy {
    fn default() -> Self {
        Self {
            bands: vec![
                GradeBand::new(90.0, "A+", 4.0),
                GradeBand::new(80.0, "A", 3.7),
                GradeBand::new(70.0, "B+", 3.3),
                GradeBand::new(60.0, "B", 3.0),
                GradeBand::new(50.0, "C+", 2.7),
                GradeBand::new(40.0, "C", 2.3),
                GradeBand::new(30.0, "D", 2.0),
                GradeBand::new(0.0, "F", 0.0),
            ],
            pass_percent: DEFAULT_PASS_PERCENT,
            outcome_rule: OutcomeRule::Aggregate,
            empty_records: EmptyRecords::ZeroFail,
        }
    }
}

impl GradingPolicy {
    pub fn new(
        mut bands: Vec<GradeBand>,
        pass_percent: f64,
        outcome_rule: OutcomeRule,
        empty_records: EmptyRecords,
    ) -> Result<Self, GradingError> {
        if bands.is_empty() {
            return Err(GradingError::InvalidPolicy(
                "at least one grade band is required".into(),
            ));
        }
        for b in bands.iter_mut() {
            let grade = b.grade.trim().to_string();
            if grade.is_empty() {
                return Err(GradingError::InvalidPolicy(
                    "grade band letter must not be empty".into(),
                ));
            }
            if !b.min_percent.is_finite() || !b.grade_point.is_finite() {
                return Err(GradingError::InvalidPolicy(format!(
                    "band {} has a non-numeric threshold or grade point",
                    grade
                )));
            }
            if b.grade_point < 0.0 {
                return Err(GradingError::InvalidPolicy(format!(
                    "band {} has a negative grade point",
                    grade
                )));
            }
            b.grade = grade;
        }
        if !pass_percent.is_finite() || !(0.0..=100.0).contains(&pass_percent) {
            return Err(GradingError::InvalidPolicy(
                "passPercent must be between 0 and 100".into(),
            ));
        }

        bands.sort_by(|a, b| {
            b.min_percent
                .partial_cmp(&a.min_percent)
                .unwrap_or(Ordering::Equal)
        });
        if let Some(pair) = bands
            .windows(2)
            .find(|w| w[0].min_percent == w[1].min_percent)
        {
            return Err(GradingError::InvalidPolicy(format!(
                "bands {} and {} share the threshold {}",
                pair[0].grade, pair[1].grade, pair[0].min_percent
            )));
        }
        let lowest = bands[bands.len() - 1].min_percent;
        if lowest > 0.0 {
            return Err(GradingError::InvalidPolicy(
                "the lowest band must start at 0%".into(),
            ));
        }

        Ok(Self {
            bands,
            pass_percent,
            outcome_rule,
            empty_records,
        })
    }

    /// Highest band whose lower bound is <= `percentage`. Anything below every
    /// threshold (negative or NaN) falls into the lowest band.
    pub fn band_for(&self, percentage: f64) -> &GradeBand {
        let lowest = &self.bands[self.bands.len() - 1];
        self.bands
            .iter()
            .find(|b| percentage >= b.min_percent)
            .unwrap_or(lowest)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkRecord {
    pub student_id: String,
    pub subject_id: String,
    pub session_id: String,
    pub exam_type: String,
    pub marks_obtained: f64,
    pub marks_total: f64,
    pub grade: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
}

impl AttendanceStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "present" => Some(Self::Present),
            "absent" => Some(Self::Absent),
            "late" => Some(Self::Late),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::Absent => "absent",
            Self::Late => "late",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub student_id: String,
    pub subject_id: String,
    pub session_id: String,
    /// `YYYY-MM-DD`
    pub date: String,
    pub status: AttendanceStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeAssignment {
    pub percentage: f64,
    pub grade: String,
    pub grade_point: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectResult {
    pub subject_id: String,
    pub marks_obtained: f64,
    pub marks_total: f64,
    pub percentage: f64,
    pub grade: String,
    pub grade_point: f64,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSummary {
    pub student_id: String,
    pub per_subject: Vec<SubjectResult>,
    pub total_obtained: f64,
    pub total_max: f64,
    pub overall_percentage: f64,
    pub gpa: f64,
    pub attendance_percentage: f64,
    pub outcome: Outcome,
}

/// Two-decimal rounding used for every displayed ratio.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// `100 * obtained / total`, or 0 when there is nothing to divide by.
pub fn percentage(obtained: f64, total: f64) -> f64 {
    if total > 0.0 {
        100.0 * obtained / total
    } else {
        0.0
    }
}

pub fn grade_for(policy: &GradingPolicy, marks_obtained: f64, marks_total: f64) -> GradeAssignment {
    let pct = percentage(marks_obtained, marks_total);
    let band = policy.band_for(pct);
    GradeAssignment {
        percentage: pct,
        grade: band.grade.clone(),
        grade_point: band.grade_point,
    }
}

pub fn outcome_for(policy: &GradingPolicy, percentage: f64) -> Outcome {
    if percentage >= policy.pass_percent {
        Outcome::Pass
    } else {
        Outcome::Fail
    }
}

/// Entry-path validation. The scoring functions themselves accept anything.
pub fn validate_mark(marks_obtained: f64, marks_total: f64) -> Result<(), GradingError> {
    if !marks_obtained.is_finite() || !marks_total.is_finite() {
        return Err(GradingError::InvalidMark("marks must be numbers".into()));
    }
    if marks_total <= 0.0 {
        return Err(GradingError::InvalidMark(
            "marksTotal must be greater than 0".into(),
        ));
    }
    if marks_obtained < 0.0 {
        return Err(GradingError::InvalidMark(
            "marksObtained must not be negative".into(),
        ));
    }
    if marks_obtained > marks_total {
        return Err(GradingError::InvalidMark(format!(
            "marksObtained {} exceeds marksTotal {}",
            marks_obtained, marks_total
        )));
    }
    Ok(())
}

pub fn attendance_percentage(records: &[AttendanceRecord]) -> f64 {
    if records.is_empty() {
        return 0.0;
    }
    let present = records
        .iter()
        .filter(|r| r.status == AttendanceStatus::Present)
        .count();
    100.0 * (present as f64) / (records.len() as f64)
}

/// Aggregates one student's records for a session. Records belonging to other
/// students are ignored. Exam types within a subject are summed before the
/// subject is graded, and subjects are visited in id order so the result does
/// not depend on input order.
pub fn summarize(
    policy: &GradingPolicy,
    student_id: &str,
    marks: &[MarkRecord],
    attendance: &[AttendanceRecord],
) -> Result<ResultSummary, GradingError> {
    let mut own: Vec<&MarkRecord> = marks.iter().filter(|r| r.student_id == student_id).collect();
    if own.is_empty() && policy.empty_records == EmptyRecords::Reject {
        return Err(GradingError::NoData);
    }
    own.sort_by(|a, b| {
        a.subject_id
            .cmp(&b.subject_id)
            .then_with(|| a.exam_type.cmp(&b.exam_type))
    });

    let mut by_subject: BTreeMap<&str, (f64, f64)> = BTreeMap::new();
    for r in &own {
        let entry = by_subject.entry(r.subject_id.as_str()).or_insert((0.0, 0.0));
        entry.0 += r.marks_obtained;
        entry.1 += r.marks_total;
    }

    let per_subject: Vec<SubjectResult> = by_subject
        .into_iter()
        .map(|(subject_id, (obtained, total))| {
            let assigned = grade_for(policy, obtained, total);
            SubjectResult {
                subject_id: subject_id.to_string(),
                marks_obtained: obtained,
                marks_total: total,
                outcome: outcome_for(policy, assigned.percentage),
                percentage: assigned.percentage,
                grade: assigned.grade,
                grade_point: assigned.grade_point,
            }
        })
        .collect();

    let total_obtained: f64 = per_subject.iter().map(|s| s.marks_obtained).sum();
    let total_max: f64 = per_subject.iter().map(|s| s.marks_total).sum();
    let overall_percentage = percentage(total_obtained, total_max);
    let gpa = if per_subject.is_empty() {
        0.0
    } else {
        let points: f64 = per_subject.iter().map(|s| s.grade_point).sum();
        round2(points / per_subject.len() as f64)
    };

    // No marks means nothing was passed, whatever the pass mark is.
    let aggregate_pass =
        !per_subject.is_empty() && outcome_for(policy, overall_percentage) == Outcome::Pass;
    let passed = match policy.outcome_rule {
        OutcomeRule::Aggregate => aggregate_pass,
        OutcomeRule::AllSubjects => {
            aggregate_pass && per_subject.iter().all(|s| s.outcome == Outcome::Pass)
        }
    };

    let own_attendance: Vec<AttendanceRecord> = attendance
        .iter()
        .filter(|r| r.student_id == student_id)
        .cloned()
        .collect();

    Ok(ResultSummary {
        student_id: student_id.to_string(),
        per_subject,
        total_obtained,
        total_max,
        overall_percentage,
        gpa,
        attendance_percentage: attendance_percentage(&own_attendance),
        outcome: if passed { Outcome::Pass } else { Outcome::Fail },
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedResult {
    pub rank: usize,
    pub summary: ResultSummary,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassStatistics {
    pub student_count: usize,
    pub pass_count: usize,
    pub fail_count: usize,
    pub pass_rate: f64,
    pub average_percentage: f64,
    pub highest_percentage: f64,
    pub lowest_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassResults {
    pub rows: Vec<RankedResult>,
    pub statistics: ClassStatistics,
}

/// Competition ranking ("1, 2, 2, 4") by overall percentage, then GPA.
/// Equal percentage and GPA share a rank; student id only fixes row order.
pub fn rank_class(mut summaries: Vec<ResultSummary>) -> ClassResults {
    summaries.sort_by(|a, b| {
        b.overall_percentage
            .partial_cmp(&a.overall_percentage)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.gpa.partial_cmp(&a.gpa).unwrap_or(Ordering::Equal))
            .then_with(|| a.student_id.cmp(&b.student_id))
    });

    let mut rows: Vec<RankedResult> = Vec::with_capacity(summaries.len());
    for (i, summary) in summaries.into_iter().enumerate() {
        let rank = match rows.last() {
            Some(prev)
                if prev.summary.overall_percentage == summary.overall_percentage
                    && prev.summary.gpa == summary.gpa =>
            {
                prev.rank
            }
            _ => i + 1,
        };
        rows.push(RankedResult { rank, summary });
    }

    let student_count = rows.len();
    let statistics = if student_count == 0 {
        ClassStatistics::default()
    } else {
        let pass_count = rows
            .iter()
            .filter(|r| r.summary.outcome == Outcome::Pass)
            .count();
        let sum: f64 = rows.iter().map(|r| r.summary.overall_percentage).sum();
        let highest = rows
            .iter()
            .map(|r| r.summary.overall_percentage)
            .fold(f64::MIN, f64::max);
        let lowest = rows
            .iter()
            .map(|r| r.summary.overall_percentage)
            .fold(f64::MAX, f64::min);
        ClassStatistics {
            student_count,
            pass_count,
            fail_count: student_count - pass_count,
            pass_rate: round2(100.0 * pass_count as f64 / student_count as f64),
            average_percentage: round2(sum / student_count as f64),
            highest_percentage: round2(highest),
            lowest_percentage: round2(lowest),
        }
    };

    ClassResults { rows, statistics }
}
