use log::{debug, info, warn};
use mongodb::{
    bson::doc,
    error::TRANSIENT_TRANSACTION_ERROR,
    options::FindOptions,
    Client, ClientSession, Database,
};
use rocket::{futures::TryStreamExt, serde::json::Json, Route, State};

use crate::{
    catalogue::{selected_ids, QuestionStore},
    config::Config,
    error::{Error, Result},
    locks::{ReportLocks, SubmissionLocks},
    model::{
        api::{
            matches::MatchSummary,
            report::ReportReference,
            session::{ExistingAnswer, QuestionSet, SessionQuestion, Submission, SubmissionResult},
        },
        common::{match_id::MatchId, role::Role, status::MatchStatus},
        db::{
            answer::{answers_by, Answer, NewAnswer},
            matches::Match,
        },
        mongodb::{commit, Coll},
    },
    report::{self, PdfPrinter},
};

/// How often a submission is retried after colliding with a concurrent one.
const MAX_SUBMISSION_ATTEMPTS: usize = 5;

pub fn routes() -> Vec<Route> {
    routes![get_questions, submit_answers, get_status, generate_report]
}

/// Session links carry the match ID as typed by the admin; a malformed one cannot exist.
fn session_match(match_id: &str) -> Result<MatchId> {
    match_id
        .parse()
        .map_err(|_| Error::not_found("Match", match_id))
}

async fn find_match(matches: &Coll<Match>, match_id: &MatchId) -> Result<Match> {
    matches
        .find_one(match_id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found("Match", match_id))
}

#[get("/session/<match_id>/<role>", rank = 2)]
async fn get_questions(
    match_id: &str,
    role: &str,
    matches: Coll<Match>,
    answers: Coll<Answer>,
    store: QuestionStore,
) -> Result<Json<QuestionSet>> {
    let role: Role = role.parse()?;
    let match_id = session_match(match_id)?;
    let m = find_match(&matches, &match_id).await?;

    let selection = store.selection_for(&match_id, role).await?;
    let by_question = FindOptions::builder().sort(doc! {"question_id": 1}).build();
    let existing_answers = answers
        .find(answers_by(&match_id, role), by_question)
        .await?
        .map_ok(ExistingAnswer::from)
        .try_collect()
        .await?;

    Ok(Json(QuestionSet {
        summary: m.into(),
        role,
        questions: SessionQuestion::from_selection(&selection),
        existing_answers,
    }))
}

#[allow(clippy::too_many_arguments)]
#[post("/session/<match_id>/<role>/submit", data = "<submission>", format = "json")]
async fn submit_answers(
    match_id: &str,
    role: &str,
    submission: Json<Submission>,
    matches: Coll<Match>,
    store: QuestionStore,
    locks: &State<SubmissionLocks>,
    db_client: &State<Client>,
    db: &State<Database>,
) -> Result<Json<SubmissionResult>> {
    let role: Role = role.parse()?;
    let match_id = session_match(match_id)?;
    find_match(&matches, &match_id).await?;

    // Validate everything before touching the stored answers.
    let selection = store.selection_for(&match_id, role).await?;
    let new_answers: Vec<NewAnswer> = submission
        .0
        .validate(&selected_ids(&selection))?
        .into_iter()
        .map(|(question_id, content)| NewAnswer::new(match_id.clone(), role, question_id, content))
        .collect();
    let answer_count = new_answers.len();

    let _guard = locks.lock(&(match_id.clone(), role)).await;
    let mut session = db_client.start_session(None).await?;
    let new_status = replace_answers(&mut session, db, &match_id, role, &new_answers).await?;

    info!("Match {match_id}: {role} submitted {answer_count} answer(s), now {new_status}");
    Ok(Json(SubmissionResult {
        new_status,
        answer_count,
    }))
}

/// Replace `role`'s answers and advance the match status, atomically.
///
/// Transactions that collide with a concurrent submission for the other role are retried,
/// so both submissions count towards the status.
async fn replace_answers(
    session: &mut ClientSession,
    db: &Database,
    match_id: &MatchId,
    role: Role,
    new_answers: &[NewAnswer],
) -> Result<MatchStatus> {
    let mut attempt = 1;
    loop {
        session.start_transaction(None).await?;
        let result = replace_answers_in_transaction(session, db, match_id, role, new_answers).await;
        let outcome = match result {
            Ok(Some(status)) => commit(session)
                .await
                .map(|_| Some(status))
                .map_err(Error::from),
            Ok(None) => {
                session.abort_transaction().await?;
                Ok(None)
            }
            Err(e) => {
                if let Err(abort) = session.abort_transaction().await {
                    debug!("Abort after failed submission also failed: {abort}");
                }
                Err(e)
            }
        };

        match outcome {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => debug!("Match {match_id} status changed underneath submission"),
            Err(Error::Db(e)) if e.contains_label(TRANSIENT_TRANSACTION_ERROR) => {
                debug!("Submission for match {match_id} collided: {e}")
            }
            Err(e) => return Err(e),
        }

        if attempt >= MAX_SUBMISSION_ATTEMPTS {
            warn!("Giving up on submission for match {match_id} after {attempt} attempts");
            return Err(Error::Conflict(
                "Too many simultaneous submissions, please try again".to_string(),
            ));
        }
        attempt += 1;
    }
}

/// One attempt at the submission writes. `Ok(None)` means the status moved since it was
/// read and the attempt should be retried.
async fn replace_answers_in_transaction(
    session: &mut ClientSession,
    db: &Database,
    match_id: &MatchId,
    role: Role,
    new_answers: &[NewAnswer],
) -> Result<Option<MatchStatus>> {
    let answers = Coll::<NewAnswer>::from_db(db);
    let matches = Coll::<Match>::from_db(db);

    answers
        .delete_many_with_session(answers_by(match_id, role), None, session)
        .await?;
    answers
        .insert_many_with_session(new_answers, None, session)
        .await?;

    let current = matches
        .find_one_with_session(match_id.as_doc(), None, session)
        .await?
        .ok_or_else(|| Error::not_found("Match", match_id))?
        .status;
    let next = current.after_submission(role);
    if next != current {
        let update = matches
            .update_one_with_session(
                doc! {"_id": match_id.as_str(), "status": current},
                doc! {"$set": {"status": next}},
                None,
                session,
            )
            .await?;
        if update.matched_count == 0 {
            return Ok(None);
        }
    }
    Ok(Some(next))
}

#[get("/session/<match_id>/status")]
async fn get_status(match_id: &str, matches: Coll<Match>) -> Result<Json<MatchSummary>> {
    let match_id = session_match(match_id)?;
    let m = find_match(&matches, &match_id).await?;
    Ok(Json(m.into()))
}

#[post("/session/<match_id>/report")]
async fn generate_report(
    match_id: &str,
    db: &State<Database>,
    config: &State<Config>,
    printer: &State<PdfPrinter>,
    locks: &State<ReportLocks>,
) -> Result<Json<ReportReference>> {
    let match_id = session_match(match_id)?;
    let reference = report::generate_report(db, config, printer, locks, &match_id).await?;
    Ok(Json(reference))
}

#[cfg(test)]
mod tests {
    use rocket::{
        futures::join,
        http::{ContentType, Status},
        local::asynchronous::{Client, LocalResponse},
        serde::json::serde_json,
    };

    use crate::report::TEST_PDF_MARKER;

    use super::*;

    #[backend_test]
    async fn questions_for_each_role(client: Client, matches: Coll<Match>) {
        matches.insert_one(Match::example(), None).await.unwrap();

        let teacher = get_question_set(&client, Role::Teacher).await;
        assert_eq!(teacher.role, Role::Teacher);
        assert_eq!(teacher.summary.id, MatchId::example());
        assert_eq!(teacher.questions.len(), 6);
        assert!(teacher
            .questions
            .iter()
            .all(|q| q.category_id == 1 || q.category_id == 2));
        assert!(teacher.existing_answers.is_empty());

        let student = get_question_set(&client, Role::Student).await;
        assert_eq!(student.questions.len(), 6);
        assert!(student
            .questions
            .iter()
            .all(|q| q.category_id == 3 || q.category_id == 4));

        // The selection is stable.
        let again = get_question_set(&client, Role::Teacher).await;
        assert_eq!(teacher.questions, again.questions);
    }

    #[backend_test]
    async fn invalid_role_before_lookup(client: Client) {
        // No match exists, but the role is checked first.
        let response = client.get("/session/m-001/parent").dispatch().await;
        assert_eq!(Status::BadRequest, response.status());
        let body = response.into_string().await.unwrap();
        assert!(body.contains("Invalid role"));

        let response = client
            .post("/session/m-001/parent/submit")
            .header(ContentType::JSON)
            .body(serde_json::to_string(&Submission::example(&[101])).unwrap())
            .dispatch()
            .await;
        assert_eq!(Status::BadRequest, response.status());
    }

    #[backend_test]
    async fn unknown_match(client: Client) {
        let response = client.get("/session/nope/teacher").dispatch().await;
        assert_eq!(Status::NotFound, response.status());
        let response = client.get("/session/nope/status").dispatch().await;
        assert_eq!(Status::NotFound, response.status());
        let response = client.post("/session/nope/report").dispatch().await;
        assert_eq!(Status::NotFound, response.status());
        let response = submit(&client, Role::Teacher, &Submission::example(&[101])).await;
        assert_eq!(Status::NotFound, response.status());
    }

    #[backend_test]
    async fn lifecycle(client: Client, matches: Coll<Match>) {
        matches.insert_one(Match::example(), None).await.unwrap();

        assert_eq!(
            submit_all(&client, Role::Teacher).await,
            MatchStatus::TeacherCompleted
        );
        // Resubmitting does not move the status.
        assert_eq!(
            submit_all(&client, Role::Teacher).await,
            MatchStatus::TeacherCompleted
        );
        assert_eq!(
            submit_all(&client, Role::Student).await,
            MatchStatus::BothCompleted
        );
        assert_eq!(
            submit_all(&client, Role::Teacher).await,
            MatchStatus::BothCompleted
        );
        assert_eq!(
            submit_all(&client, Role::Student).await,
            MatchStatus::BothCompleted
        );

        let response = client.get("/session/m-001/status").dispatch().await;
        assert_eq!(Status::Ok, response.status());
        let body = response.into_string().await.unwrap();
        let summary: MatchSummary = serde_json::from_str(&body).unwrap();
        assert_eq!(summary.status, MatchStatus::BothCompleted);
        assert!(!body.contains("Phone"));
    }

    #[backend_test]
    async fn resubmission_replaces_answers(
        client: Client,
        matches: Coll<Match>,
        answers: Coll<Answer>,
    ) {
        matches.insert_one(Match::example(), None).await.unwrap();
        submit_all(&client, Role::Teacher).await;
        submit_all(&client, Role::Student).await;
        assert_eq!(answers.count_documents(None, None).await.unwrap(), 12);

        // A smaller set replaces the teacher's answers only.
        let ids = selected(&client, Role::Teacher).await;
        let response = submit(&client, Role::Teacher, &Submission::example(&ids[..2])).await;
        assert_eq!(Status::Ok, response.status());

        let teacher_answers = answers
            .count_documents(answers_by(&MatchId::example(), Role::Teacher), None)
            .await
            .unwrap();
        assert_eq!(teacher_answers, 2);
        let student_answers = answers
            .count_documents(answers_by(&MatchId::example(), Role::Student), None)
            .await
            .unwrap();
        assert_eq!(student_answers, 6);

        // Existing answers are offered for resuming.
        let set = get_question_set(&client, Role::Teacher).await;
        let mut resumed: Vec<u32> = set.existing_answers.iter().map(|a| a.question_id).collect();
        let mut expected = ids[..2].to_vec();
        resumed.sort_unstable();
        expected.sort_unstable();
        assert_eq!(resumed, expected);
    }

    #[backend_test]
    async fn rejected_submission_changes_nothing(
        client: Client,
        matches: Coll<Match>,
        answers: Coll<Answer>,
    ) {
        matches.insert_one(Match::example(), None).await.unwrap();
        submit_all(&client, Role::Teacher).await;

        let ids = selected(&client, Role::Teacher).await;
        let student_ids = selected(&client, Role::Student).await;
        let invalid = [
            Submission::default(),
            Submission::example(&[ids[0], ids[0]]),
            // Another role's question.
            Submission::example(&[ids[0], student_ids[0]]),
            // A retired question is never selected.
            Submission::example(&[199]),
        ];
        for submission in invalid {
            let response = submit(&client, Role::Teacher, &submission).await;
            assert_eq!(Status::BadRequest, response.status());
        }

        let stored: Vec<Answer> = answers
            .find(answers_by(&MatchId::example(), Role::Teacher), None)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(stored.len(), 6);
        assert!(stored.iter().all(|a| a.content.starts_with("Answer to")));
        let m = matches
            .find_one(MatchId::example().as_doc(), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(m.status, MatchStatus::TeacherCompleted);
    }

    #[backend_test]
    async fn concurrent_submissions_both_count(client: Client, matches: Coll<Match>) {
        matches.insert_one(Match::example(), None).await.unwrap();
        let teacher = Submission::example(&selected(&client, Role::Teacher).await);
        let student = Submission::example(&selected(&client, Role::Student).await);

        let (teacher_response, student_response) = join!(
            submit(&client, Role::Teacher, &teacher),
            submit(&client, Role::Student, &student)
        );
        assert_eq!(Status::Ok, teacher_response.status());
        assert_eq!(Status::Ok, student_response.status());

        let m = matches
            .find_one(MatchId::example().as_doc(), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(m.status, MatchStatus::BothCompleted);
    }

    #[backend_test]
    async fn report_requires_both_sides(client: Client, matches: Coll<Match>) {
        matches.insert_one(Match::example(), None).await.unwrap();
        submit_all(&client, Role::Teacher).await;

        let response = client.post("/session/m-001/report").dispatch().await;
        assert_eq!(Status::Conflict, response.status());

        let m = matches
            .find_one(MatchId::example().as_doc(), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(m.status, MatchStatus::TeacherCompleted);
        assert_eq!(m.report_url, None);
    }

    #[backend_test]
    async fn report_generated_once(client: Client, matches: Coll<Match>, answers: Coll<Answer>) {
        matches.insert_one(Match::example(), None).await.unwrap();
        submit_all(&client, Role::Teacher).await;
        submit_all(&client, Role::Student).await;

        let first = request_report(&client).await;
        assert!(first.generated);
        assert_eq!(first.report_url, "/reports/m-001.pdf");

        let second = request_report(&client).await;
        assert!(!second.generated);
        assert_eq!(second.report_url, first.report_url);
        assert_eq!(answers.count_documents(None, None).await.unwrap(), 12);

        // The artifact is served and contains the answers.
        let response = client.get(first.report_url.as_str()).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        assert_eq!(response.content_type(), Some(ContentType::PDF));
        let bytes = response.into_bytes().await.unwrap();
        assert!(bytes.starts_with(TEST_PDF_MARKER));
        let html = String::from_utf8_lossy(&bytes);
        assert!(html.contains("Kim Minji &amp; Park Jiho"));
        let first_teacher = selected(&client, Role::Teacher).await[0];
        assert!(html.contains(&format!("Answer to {first_teacher}")));

        // The status shows the reference.
        let response = client.get("/session/m-001/status").dispatch().await;
        let summary: MatchSummary =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(summary.report_url, Some(first.report_url));
    }

    #[backend_test]
    async fn concurrent_report_requests(client: Client, matches: Coll<Match>) {
        matches.insert_one(Match::example(), None).await.unwrap();
        submit_all(&client, Role::Teacher).await;
        submit_all(&client, Role::Student).await;

        let (a, b) = join!(
            client.post("/session/m-001/report").dispatch(),
            client.post("/session/m-001/report").dispatch()
        );
        let a: ReportReference = serde_json::from_str(&a.into_string().await.unwrap()).unwrap();
        let b: ReportReference = serde_json::from_str(&b.into_string().await.unwrap()).unwrap();
        assert_eq!(a.report_url, b.report_url);
        // Exactly one of them built the report.
        assert!(a.generated != b.generated);
    }

    #[backend_test]
    async fn missing_answers_get_placeholders(client: Client, matches: Coll<Match>) {
        matches
            .insert_one(Match::example_with_status(MatchStatus::BothCompleted), None)
            .await
            .unwrap();
        let ids = selected(&client, Role::Teacher).await;
        submit(&client, Role::Teacher, &Submission::example(&ids[..1])).await;

        let reference = request_report(&client).await;
        let response = client.get(reference.report_url.as_str()).dispatch().await;
        let html = String::from_utf8_lossy(&response.into_bytes().await.unwrap()).into_owned();
        // Five teacher questions and all six student questions are unanswered.
        assert_eq!(html.matches(report::html::NO_ANSWER).count(), 11);
    }

    async fn get_question_set(client: &Client, role: Role) -> QuestionSet {
        let match_id = MatchId::example();
        let response = client
            .get(uri!(get_questions(match_id.as_str(), role.as_str())))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        serde_json::from_str(&response.into_string().await.unwrap()).unwrap()
    }

    async fn selected(client: &Client, role: Role) -> Vec<u32> {
        get_question_set(client, role)
            .await
            .questions
            .into_iter()
            .map(|q| q.id)
            .collect()
    }

    async fn submit<'c>(
        client: &'c Client,
        role: Role,
        submission: &Submission,
    ) -> LocalResponse<'c> {
        client
            .post(format!("/session/m-001/{role}/submit"))
            .header(ContentType::JSON)
            .body(serde_json::to_string(submission).unwrap())
            .dispatch()
            .await
    }

    async fn submit_all(client: &Client, role: Role) -> MatchStatus {
        let submission = Submission::example(&selected(client, role).await);
        let response = submit(client, role, &submission).await;
        assert_eq!(Status::Ok, response.status());
        let result: SubmissionResult =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(result.answer_count, 6);
        result.new_status
    }

    async fn request_report(client: &Client) -> ReportReference {
        let response = client.post("/session/m-001/report").dispatch().await;
        assert_eq!(Status::Ok, response.status());
        serde_json::from_str(&response.into_string().await.unwrap()).unwrap()
    }
}
