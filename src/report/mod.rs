//! Report assembly and generation for completed matches.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use log::{debug, info};
use mongodb::{bson::doc, Database};
use rocket::{futures::TryStreamExt, tokio::fs};

use crate::catalogue::{QuestionStore, SelectedCategory};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::locks::ReportLocks;
use crate::model::{
    api::report::ReportReference,
    common::{match_id::MatchId, role::Role},
    db::{answer::Answer, matches::Match},
    mongodb::Coll,
};

pub mod html;
mod pdf;

pub use pdf::PdfPrinter;
#[cfg(test)]
pub use pdf::TEST_PDF_MARKER;

/// One numbered question and its answer, if one was given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportItem {
    pub number: usize,
    pub question: String,
    pub answer: Option<String>,
}

/// All items answered by one side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportSection {
    pub role: Role,
    pub items: Vec<ReportItem>,
}

/// The content of a report, ready to be rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportDocument {
    pub match_id: String,
    pub teacher_name: String,
    pub student_name: String,
    pub created_at: DateTime<Utc>,
    pub sections: Vec<ReportSection>,
}

/// Pair every currently selected question with its persisted answer.
///
/// Sections follow the order of `selections`; within a section, questions appear in
/// selection order. Answers to questions outside the selection are left out, and
/// selected questions without a (non-blank) answer get `None`.
pub fn assemble(
    m: &Match,
    selections: &[(Role, Vec<SelectedCategory>)],
    answers: &[Answer],
) -> ReportDocument {
    let by_question: HashMap<(Role, u32), &str> = answers
        .iter()
        .filter(|a| !a.content.trim().is_empty())
        .map(|a| ((a.role, a.question_id), a.content.as_str()))
        .collect();

    let sections = selections
        .iter()
        .map(|(role, selection)| ReportSection {
            role: *role,
            items: selection
                .iter()
                .flat_map(|s| s.questions.iter())
                .enumerate()
                .map(|(i, question)| ReportItem {
                    number: i + 1,
                    question: question.text.clone(),
                    answer: by_question
                        .get(&(*role, question.id))
                        .map(|content| content.to_string()),
                })
                .collect(),
        })
        .collect();

    ReportDocument {
        match_id: m.id.to_string(),
        teacher_name: m.teacher_name.clone(),
        student_name: m.student_name.clone(),
        created_at: m.created_at,
        sections,
    }
}

/// The reference under which a match's report is served.
pub fn report_url(match_id: &MatchId) -> String {
    format!("/reports/{match_id}.pdf")
}

/// The file a match's report is stored in.
pub fn report_file(config: &Config, match_id: &MatchId) -> PathBuf {
    config.report_dir().join(format!("{match_id}.pdf"))
}

/// Build and store the report for a completed match, or return the existing one.
pub async fn generate_report(
    db: &Database,
    config: &Config,
    printer: &PdfPrinter,
    locks: &ReportLocks,
    match_id: &MatchId,
) -> Result<ReportReference> {
    let _guard = locks.lock(match_id).await;

    let matches = Coll::<Match>::from_db(db);
    let m = matches
        .find_one(match_id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found("Match", match_id))?;

    if let Some(report_url) = m.report_url {
        debug!("Report for match {match_id} already exists");
        return Ok(ReportReference {
            report_url,
            generated: false,
        });
    }
    if !m.status.is_complete() {
        return Err(Error::PreconditionFailed(format!(
            "Match {match_id} is {}, both sides must submit before a report can be generated",
            m.status
        )));
    }

    let store = QuestionStore::from_db(db);
    let mut selections = Vec::with_capacity(Role::ALL.len());
    for role in Role::ALL {
        selections.push((role, store.selection_for(match_id, role).await?));
    }
    let answers: Vec<Answer> = Coll::<Answer>::from_db(db)
        .find(doc! {"match_id": match_id.as_str()}, None)
        .await?
        .try_collect()
        .await?;

    let document = assemble(&m, &selections, &answers);
    let pdf = printer.print(&html::render(&document)).await?;
    fs::create_dir_all(config.report_dir()).await?;
    fs::write(report_file(config, match_id), pdf).await?;

    // Only the first writer stores its reference.
    let url = report_url(match_id);
    let stored = matches
        .update_one(
            doc! {"_id": match_id.as_str(), "report_url": null},
            doc! {"$set": {"report_url": &url}},
            None,
        )
        .await?;
    if stored.modified_count == 0 {
        let existing = matches
            .find_one(match_id.as_doc(), None)
            .await?
            .and_then(|m| m.report_url)
            .unwrap_or(url);
        return Ok(ReportReference {
            report_url: existing,
            generated: false,
        });
    }

    info!("Generated report for match {match_id}");
    Ok(ReportReference {
        report_url: url,
        generated: true,
    })
}

/// Forget a match's report so that the next request rebuilds it.
/// Returns the previous reference, if there was one.
pub async fn reset_report(
    db: &Database,
    config: &Config,
    locks: &ReportLocks,
    match_id: &MatchId,
) -> Result<Option<String>> {
    let _guard = locks.lock(match_id).await;

    let matches = Coll::<Match>::from_db(db);
    let m = matches
        .find_one(match_id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found("Match", match_id))?;

    if m.report_url.is_some() {
        matches
            .update_one(
                match_id.as_doc(),
                doc! {"$set": {"report_url": null}},
                None,
            )
            .await?;
    }
    match fs::remove_file(report_file(config, match_id)).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    info!("Reset report for match {match_id}");
    Ok(m.report_url)
}
