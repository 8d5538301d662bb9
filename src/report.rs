use crate::error::{AppError, AppResult};
use crate::query::Filter;
use crate::store::{self, TermInfo};
use rusqlite::{params_from_iter, Connection};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Stream label of subjects left out of averages.
pub const COMMON_STREAM: &str = "Common";

pub const DISTINCTION_MIN: f64 = 75.0;
pub const CREDIT_MIN: f64 = 65.0;
pub const PASS_MIN: f64 = 50.0;

pub fn is_common_stream(stream: &str) -> bool {
    stream.trim().eq_ignore_ascii_case(COMMON_STREAM)
}

/// Half-up rounding to 2 decimals: `Int(100*x + 0.5) / 100`.
/// The 1e-9 absorbs binary representation error (2.675 is stored as 2.67499...).
pub fn round_off_2_decimals(x: f64) -> f64 {
    ((100.0 * x) + 0.5 + 1e-9).floor() / 100.0
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankingMethod {
    #[default]
    Total,
    Average,
}

impl RankingMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            RankingMethod::Total => "total",
            RankingMethod::Average => "average",
        }
    }

    pub fn parse(raw: Option<&str>) -> AppResult<Self> {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            None | Some("") | Some("total") => Ok(RankingMethod::Total),
            Some("average") => Ok(RankingMethod::Average),
            Some(other) => Err(AppError::validation(format!(
                "rankBy must be one of: total, average (got '{other}')"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradeBand {
    Distinction,
    Credit,
    Pass,
    Fail,
}

pub fn grade_band(mark: f64) -> GradeBand {
    if mark >= DISTINCTION_MIN {
        GradeBand::Distinction
    } else if mark >= CREDIT_MIN {
        GradeBand::Credit
    } else if mark >= PASS_MIN {
        GradeBand::Pass
    } else {
        GradeBand::Fail
    }
}

/// One cell of the student × subject cross product for a term.
/// `marks == None` with `is_absent == false` means "not entered yet".
#[derive(Debug, Clone, PartialEq)]
pub struct MarkRow {
    pub student_id: String,
    pub index_no: String,
    pub student_name: String,
    pub class_name: String,
    pub subject_id: String,
    pub subject_code: String,
    pub subject_name: String,
    pub stream: String,
    pub marks: Option<f64>,
    pub is_absent: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReportOptions {
    pub include_common: bool,
    pub rank_by: RankingMethod,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            include_common: true,
            rank_by: RankingMethod::Total,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubjectMark {
    pub subject_id: String,
    pub code: String,
    pub name: String,
    pub stream: String,
    pub marks: Option<f64>,
    pub is_absent: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StudentReport {
    pub student_id: String,
    pub index_no: String,
    pub name: String,
    pub class_name: String,
    pub subjects: Vec<SubjectMark>,
    pub total: f64,
    pub average: f64,
    pub rank: usize,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GradeCounts {
    pub distinction: usize,
    pub credit: usize,
    pub pass: usize,
    pub fail: usize,
}

impl GradeCounts {
    fn add(&mut self, mark: f64) {
        match grade_band(mark) {
            GradeBand::Distinction => self.distinction += 1,
            GradeBand::Credit => self.credit += 1,
            GradeBand::Pass => self.pass += 1,
            GradeBand::Fail => self.fail += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubjectStats {
    pub subject_id: String,
    pub code: String,
    pub name: String,
    pub stream: String,
    pub count: usize,
    pub absent_count: usize,
    pub average: f64,
    pub highest: Option<f64>,
    pub lowest: Option<f64>,
    pub grades: GradeCounts,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClassSummary {
    pub total_students: usize,
    pub total_subjects: usize,
    pub class_average: f64,
    pub highest: Option<f64>,
    pub lowest: Option<f64>,
    pub has_marks: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedReport {
    pub students: Vec<StudentReport>,
    pub subjects: Vec<SubjectStats>,
    pub summary: ClassSummary,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TermReport {
    pub term: TermInfo,
    pub class_name: Option<String>,
    pub include_common: bool,
    pub rank_by: RankingMethod,
    pub students: Vec<StudentReport>,
    pub subjects: Vec<SubjectStats>,
    pub summary: ClassSummary,
}

fn cmp_desc(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

/// Standard competition ranking over keys already sorted descending:
/// equal keys share a rank, the next distinct key takes its 1-based position.
pub fn competition_ranks(sorted_keys: &[f64]) -> Vec<usize> {
    let mut ranks = Vec::with_capacity(sorted_keys.len());
    let mut current = 0usize;
    for (i, key) in sorted_keys.iter().enumerate() {
        if i == 0 || *key != sorted_keys[i - 1] {
            current = i + 1;
        }
        ranks.push(current);
    }
    ranks
}

/// Stats over one subject's cells; null marks are skipped.
fn subject_stats(first: &MarkRow, cells: &[&MarkRow]) -> SubjectStats {
    let mut grades = GradeCounts::default();
    let mut sum = 0.0_f64;
    let mut count = 0usize;
    let mut absent_count = 0usize;
    let mut highest: Option<f64> = None;
    let mut lowest: Option<f64> = None;
    for cell in cells {
        if cell.is_absent {
            absent_count += 1;
        }
        let Some(v) = cell.marks else {
            continue;
        };
        count += 1;
        sum += v;
        grades.add(v);
        highest = Some(highest.map_or(v, |h| h.max(v)));
        lowest = Some(lowest.map_or(v, |l| l.min(v)));
    }
    SubjectStats {
        subject_id: first.subject_id.clone(),
        code: first.subject_code.clone(),
        name: first.subject_name.clone(),
        stream: first.stream.clone(),
        count,
        absent_count,
        average: if count > 0 {
            round_off_2_decimals(sum / count as f64)
        } else {
            0.0
        },
        highest,
        lowest,
        grades,
    }
}

/// Per-subject statistics, ordered by subject code.
pub fn compute_subject_stats(rows: &[MarkRow]) -> Vec<SubjectStats> {
    let mut order: Vec<&str> = Vec::new();
    let mut by_subject: HashMap<&str, Vec<&MarkRow>> = HashMap::new();
    for row in rows {
        by_subject
            .entry(row.subject_id.as_str())
            .or_insert_with(|| {
                order.push(row.subject_id.as_str());
                Vec::new()
            })
            .push(row);
    }
    let mut stats: Vec<SubjectStats> = order
        .iter()
        .filter_map(|id| by_subject.get(id))
        .map(|cells| subject_stats(cells[0], cells))
        .collect();
    stats.sort_by(|a, b| a.code.cmp(&b.code));
    stats
}

pub fn aggregate(rows: &[MarkRow], opts: ReportOptions) -> AggregatedReport {
    let rows: Vec<MarkRow> = rows
        .iter()
        .filter(|r| opts.include_common || !is_common_stream(&r.stream))
        .cloned()
        .collect();

    let mut students: Vec<StudentReport> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for row in &rows {
        let i = *index.entry(row.student_id.as_str()).or_insert_with(|| {
            students.push(StudentReport {
                student_id: row.student_id.clone(),
                index_no: row.index_no.clone(),
                name: row.student_name.clone(),
                class_name: row.class_name.clone(),
                subjects: Vec::new(),
                total: 0.0,
                average: 0.0,
                rank: 0,
            });
            students.len() - 1
        });
        students[i].subjects.push(SubjectMark {
            subject_id: row.subject_id.clone(),
            code: row.subject_code.clone(),
            name: row.subject_name.clone(),
            stream: row.stream.clone(),
            marks: row.marks,
            is_absent: row.is_absent,
        });
    }

    let mut highest: Option<f64> = None;
    let mut lowest: Option<f64> = None;
    for s in &mut students {
        s.subjects.sort_by(|a, b| a.code.cmp(&b.code));
        let mut total = 0.0_f64;
        let mut ranked_sum = 0.0_f64;
        let mut ranked_count = 0usize;
        for m in &s.subjects {
            let Some(v) = m.marks else {
                continue;
            };
            total += v;
            highest = Some(highest.map_or(v, |h| h.max(v)));
            lowest = Some(lowest.map_or(v, |l| l.min(v)));
            if !is_common_stream(&m.stream) {
                ranked_sum += v;
                ranked_count += 1;
            }
        }
        s.total = round_off_2_decimals(total);
        s.average = if ranked_count > 0 {
            round_off_2_decimals(ranked_sum / ranked_count as f64)
        } else {
            0.0
        };
    }

    let rank_key = |s: &StudentReport| match opts.rank_by {
        RankingMethod::Total => s.total,
        RankingMethod::Average => s.average,
    };
    students.sort_by(|a, b| {
        cmp_desc(rank_key(a), rank_key(b)).then_with(|| a.index_no.cmp(&b.index_no))
    });
    let keys: Vec<f64> = students.iter().map(rank_key).collect();
    for (s, rank) in students.iter_mut().zip(competition_ranks(&keys)) {
        s.rank = rank;
    }

    let subjects = compute_subject_stats(&rows);
    let class_average = if students.is_empty() {
        0.0
    } else {
        round_off_2_decimals(
            students.iter().map(|s| s.total).sum::<f64>() / students.len() as f64,
        )
    };
    let summary = ClassSummary {
        total_students: students.len(),
        total_subjects: subjects.len(),
        class_average,
        highest,
        lowest,
        has_marks: highest.is_some(),
    };

    AggregatedReport {
        students,
        subjects,
        summary,
    }
}

#[derive(Debug, Clone)]
pub struct ReportContext<'a> {
    pub conn: &'a Connection,
    pub term_id: &'a str,
    pub class_name: Option<&'a str>,
}

/// Active students × active subjects for the term, left joined with marks.
/// A class that has subjects assigned only crosses with those subjects.
pub fn load_mark_rows(
    ctx: &ReportContext<'_>,
    subject_id: Option<&str>,
) -> AppResult<Vec<MarkRow>> {
    let filter = Filter::new()
        .eq("s.status", store::STATUS_ACTIVE.to_string())
        .eq("sub.status", store::STATUS_ACTIVE.to_string())
        .eq_opt("s.class_name", ctx.class_name.map(str::to_string))
        .eq_opt("sub.id", subject_id.map(str::to_string));
    let sql = format!(
        "SELECT s.id, s.index_no, s.name, s.class_name,
                sub.id, sub.code, sub.name, sub.stream,
                m.marks, m.status
         FROM students s
         CROSS JOIN subjects sub
         LEFT JOIN marks m
           ON m.student_id = s.id AND m.subject_id = sub.id AND m.term_id = ?
         {}
           AND (NOT EXISTS (SELECT 1 FROM class_subjects cs WHERE cs.class_name = s.class_name)
                OR EXISTS (SELECT 1 FROM class_subjects cs
                           WHERE cs.class_name = s.class_name AND cs.subject_id = sub.id))
         ORDER BY s.class_name, s.index_no, sub.code",
        filter.where_sql()
    );
    let mut params: Vec<rusqlite::types::Value> = vec![ctx.term_id.to_string().into()];
    params.extend(filter.into_params());

    let mut stmt = ctx.conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(params), |r| {
            let status: Option<String> = r.get(9)?;
            Ok(MarkRow {
                student_id: r.get(0)?,
                index_no: r.get(1)?,
                student_name: r.get(2)?,
                class_name: r.get(3)?,
                subject_id: r.get(4)?,
                subject_code: r.get(5)?,
                subject_name: r.get(6)?,
                stream: r.get(7)?,
                marks: r.get(8)?,
                is_absent: status.as_deref() == Some("absent"),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn compute_term_report(ctx: &ReportContext<'_>, opts: ReportOptions) -> AppResult<TermReport> {
    let term = store::load_term(ctx.conn, ctx.term_id)?;
    let rows = load_mark_rows(ctx, None)?;
    let aggregated = aggregate(&rows, opts);
    tracing::debug!(
        term_id = ctx.term_id,
        class = ctx.class_name.unwrap_or("*"),
        students = aggregated.summary.total_students,
        "term report computed"
    );
    Ok(TermReport {
        term,
        class_name: ctx.class_name.map(str::to_string),
        include_common: opts.include_common,
        rank_by: opts.rank_by,
        students: aggregated.students,
        subjects: aggregated.subjects,
        summary: aggregated.summary,
    })
}
