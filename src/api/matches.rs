use std::collections::HashMap;

use log::{debug, info};
use mongodb::{
    bson::doc,
    options::FindOptions,
    Database,
};
use rocket::{futures::TryStreamExt, serde::json::Json, Route, State};

use crate::{
    catalogue::QuestionStore,
    config::Config,
    error::{Error, Result},
    locks::ReportLocks,
    model::{
        api::{
            auth::AuthToken,
            matches::{AnswerDescription, CreatedMatch, MatchAnswers, MatchDescription, MatchSpec},
            report::ReportReset,
        },
        common::{match_id::MatchId, role::Role},
        db::{answer::Answer, matches::Match},
        mongodb::{is_duplicate_key_error, Coll},
    },
    report,
};

pub fn routes() -> Vec<Route> {
    routes![create_match, get_matches, get_match_answers, reset_report]
}

/// How many fresh IDs are tried when a generated one is already taken.
const MAX_GENERATED_ID_ATTEMPTS: usize = 5;

#[post("/admin/matches", data = "<spec>", format = "json")]
async fn create_match(
    _token: AuthToken,
    spec: Json<MatchSpec>,
    matches: Coll<Match>,
) -> Result<Json<CreatedMatch>> {
    let spec = spec.into_inner();
    // Only IDs the admin did not choose may be swapped for another.
    let retries = if spec.generates_id() {
        MAX_GENERATED_ID_ATTEMPTS
    } else {
        0
    };
    let new_match = spec.into_match()?;
    let fresh_ids = std::iter::repeat_with(MatchId::generate).take(retries);
    let new_match = insert_match(&matches, new_match, fresh_ids).await?;

    info!("Created match {}", new_match.id);
    Ok(Json(new_match.into()))
}

/// Insert `new_match`, moving it to the next of `fresh_ids` whenever its ID is taken.
async fn insert_match(
    matches: &Coll<Match>,
    mut new_match: Match,
    mut fresh_ids: impl Iterator<Item = MatchId>,
) -> Result<Match> {
    loop {
        // The primary key rejects IDs already in use.
        match matches.insert_one(&new_match, None).await {
            Ok(_) => return Ok(new_match),
            Err(e) if is_duplicate_key_error(&e) => match fresh_ids.next() {
                Some(id) => {
                    debug!("Match ID {} taken, trying {id}", new_match.id);
                    new_match.id = id;
                }
                None => {
                    return Err(Error::Conflict(format!(
                        "Match ID already in use: {}",
                        new_match.id
                    )))
                }
            },
            Err(e) => return Err(e.into()),
        }
    }
}

#[get("/admin/matches")]
async fn get_matches(
    _token: AuthToken,
    matches: Coll<Match>,
) -> Result<Json<Vec<MatchDescription>>> {
    let newest_first = FindOptions::builder()
        .sort(doc! {"created_at": -1, "_id": 1})
        .build();
    let descriptions = matches
        .find(None, newest_first)
        .await?
        .map_ok(MatchDescription::from)
        .try_collect()
        .await?;
    Ok(Json(descriptions))
}

#[get("/admin/matches/<match_id>/answers")]
async fn get_match_answers(
    _token: AuthToken,
    match_id: MatchId,
    matches: Coll<Match>,
    answers: Coll<Answer>,
    store: QuestionStore,
) -> Result<Json<MatchAnswers>> {
    let m = matches
        .find_one(match_id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found("Match", &match_id))?;

    let oldest_first = FindOptions::builder()
        .sort(doc! {"created_at": 1, "question_id": 1})
        .build();
    let all_answers: Vec<Answer> = answers
        .find(doc! {"match_id": match_id.as_str()}, oldest_first)
        .await?
        .try_collect()
        .await?;

    let category_names: HashMap<u32, String> = store
        .categories()
        .await?
        .into_iter()
        .map(|c| (c.id, c.name))
        .collect();
    let questions: HashMap<u32, (String, String)> = store
        .questions()
        .await?
        .into_iter()
        .map(|q| {
            let category = category_names
                .get(&q.category_id)
                .cloned()
                .unwrap_or_default();
            (q.id, (q.text, category))
        })
        .collect();

    let total_answers = all_answers.len();
    let mut teacher_answers = Vec::new();
    let mut student_answers = Vec::new();
    for answer in all_answers {
        let (question_text, category_name) = questions
            .get(&answer.question_id)
            .cloned()
            .unwrap_or_default();
        let description = AnswerDescription {
            question_id: answer.question_id,
            question_text,
            category_name,
            content: answer.answer.content,
            created_at: answer.answer.created_at,
        };
        match answer.answer.role {
            Role::Teacher => teacher_answers.push(description),
            Role::Student => student_answers.push(description),
        }
    }

    Ok(Json(MatchAnswers {
        description: m.into(),
        teacher_answers,
        student_answers,
        total_answers,
    }))
}

#[post("/admin/matches/<match_id>/report/reset")]
async fn reset_report(
    _token: AuthToken,
    match_id: MatchId,
    db: &State<Database>,
    config: &State<Config>,
    locks: &State<ReportLocks>,
) -> Result<Json<ReportReset>> {
    let previous_report_url = report::reset_report(db, config, locks, &match_id).await?;
    Ok(Json(ReportReset {
        previous_report_url,
    }))
}

#[cfg(test)]
mod tests {
    use rocket::{
        http::{ContentType, Status},
        local::asynchronous::Client,
        serde::json::serde_json,
    };

    use crate::model::{
        common::{phone::Phone, status::MatchStatus},
        db::answer::NewAnswer,
    };

    use super::*;

    #[backend_test(admin)]
    async fn create_and_list(client: Client, matches: Coll<Match>) {
        let created = create(&client, &MatchSpec::example()).await;
        assert_eq!(created.description.id, MatchId::example());
        assert_eq!(created.description.status, MatchStatus::Waiting);
        assert_eq!(created.description.teacher_phone, "+821011112222");
        assert_eq!(created.teacher_path, "/session/m-001/teacher");
        assert_eq!(created.student_path, "/session/m-001/student");

        // The match is stored.
        let stored = matches
            .find_one(MatchId::example().as_doc(), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.student_phone, Phone::example_student());
        assert_eq!(stored.report_url, None);

        // A generated ID, created later, is listed first.
        let generated = create(&client, &MatchSpec::example_generated_id()).await;
        assert!(generated.description.id.starts_with("ZIP"));

        let response = client.get(uri!(get_matches)).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        let listed: Vec<MatchDescription> =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        let ids: Vec<MatchId> = listed.into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![generated.description.id, MatchId::example()]);
    }

    #[backend_test(admin)]
    async fn duplicate_match_id(client: Client, matches: Coll<Match>) {
        create(&client, &MatchSpec::example()).await;
        let response = client
            .post(uri!(create_match))
            .header(ContentType::JSON)
            .body(serde_json::to_string(&MatchSpec::example()).unwrap())
            .dispatch()
            .await;
        assert_eq!(Status::Conflict, response.status());
        assert_eq!(matches.count_documents(None, None).await.unwrap(), 1);
    }

    #[backend_test]
    async fn taken_generated_id_is_replaced(_client: Client, matches: Coll<Match>) {
        matches.insert_one(Match::example(), None).await.unwrap();

        let clash = MatchSpec::example().into_match().unwrap();
        let stored = insert_match(&matches, clash, std::iter::once(MatchId::example2()))
            .await
            .unwrap();
        assert_eq!(stored.id, MatchId::example2());
        assert_eq!(matches.count_documents(None, None).await.unwrap(), 2);
    }

    #[backend_test]
    async fn fresh_ids_run_out(_client: Client, matches: Coll<Match>) {
        matches.insert_one(Match::example(), None).await.unwrap();

        let clash = MatchSpec::example().into_match().unwrap();
        let taken = std::iter::repeat_with(MatchId::example).take(3);
        let result = insert_match(&matches, clash, taken).await;
        assert!(matches!(result, Err(Error::Conflict(_))));
        assert_eq!(matches.count_documents(None, None).await.unwrap(), 1);
    }

    #[backend_test(admin)]
    async fn invalid_match_spec(client: Client, matches: Coll<Match>) {
        let missing_name = MatchSpec {
            teacher_name: "".to_string(),
            ..MatchSpec::example()
        };
        let bad_phone = MatchSpec {
            student_phone: "not a phone".to_string(),
            ..MatchSpec::example()
        };
        for spec in [missing_name, bad_phone] {
            let response = client
                .post(uri!(create_match))
                .header(ContentType::JSON)
                .body(serde_json::to_string(&spec).unwrap())
                .dispatch()
                .await;
            assert_eq!(Status::BadRequest, response.status());
            let body = response.into_string().await.unwrap();
            assert!(body.contains("\"error\""));
        }
        assert_eq!(matches.count_documents(None, None).await.unwrap(), 0);
    }

    #[backend_test]
    async fn match_admin_needs_login(client: Client) {
        let response = client
            .post(uri!(create_match))
            .header(ContentType::JSON)
            .body(serde_json::to_string(&MatchSpec::example()).unwrap())
            .dispatch()
            .await;
        assert_eq!(Status::Unauthorized, response.status());
        let response = client.get(uri!(get_matches)).dispatch().await;
        assert_eq!(Status::Unauthorized, response.status());
    }

    #[backend_test(admin)]
    async fn answers_by_role(client: Client, matches: Coll<Match>, answers: Coll<NewAnswer>) {
        matches.insert_one(Match::example(), None).await.unwrap();
        let new_answers = vec![
            NewAnswer::new(MatchId::example(), Role::Teacher, 101, "Patience".to_string()),
            NewAnswer::new(MatchId::example(), Role::Student, 301, "Lunch".to_string()),
            NewAnswer::new(MatchId::example(), Role::Student, 302, "Football".to_string()),
        ];
        answers.insert_many(new_answers, None).await.unwrap();

        let response = client
            .get(uri!(get_match_answers(MatchId::example())))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let listed: MatchAnswers =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();

        assert_eq!(listed.total_answers, 3);
        assert_eq!(listed.description.teacher_phone, "+821011112222");
        assert_eq!(listed.teacher_answers.len(), 1);
        assert_eq!(listed.teacher_answers[0].content, "Patience");
        assert_eq!(listed.teacher_answers[0].category_name, "Teaching style");
        assert_eq!(
            listed.teacher_answers[0].question_text,
            "Question 101 of category 1?"
        );
        let student: Vec<u32> = listed
            .student_answers
            .iter()
            .map(|a| a.question_id)
            .collect();
        assert_eq!(student, vec![301, 302]);
    }

    #[backend_test(admin)]
    async fn answers_of_unknown_match(client: Client) {
        let response = client
            .get(uri!(get_match_answers(MatchId::example())))
            .dispatch()
            .await;
        assert_eq!(Status::NotFound, response.status());
    }

    #[backend_test(admin)]
    async fn reset_clears_reference(client: Client, matches: Coll<Match>) {
        let m = Match {
            report_url: Some(report::report_url(&MatchId::example())),
            ..Match::example_with_status(MatchStatus::BothCompleted)
        };
        matches.insert_one(m, None).await.unwrap();

        let response = client
            .post(uri!(reset_report(MatchId::example())))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let reset: ReportReset =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(
            reset.previous_report_url.as_deref(),
            Some("/reports/m-001.pdf")
        );

        let stored = matches
            .find_one(MatchId::example().as_doc(), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.report_url, None);
        assert_eq!(stored.status, MatchStatus::BothCompleted);

        // Resetting again is harmless.
        let response = client
            .post(uri!(reset_report(MatchId::example())))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let reset: ReportReset =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(reset.previous_report_url, None);
    }

    #[backend_test(admin)]
    async fn reset_unknown_match(client: Client) {
        let response = client
            .post(uri!(reset_report(MatchId::example())))
            .dispatch()
            .await;
        assert_eq!(Status::NotFound, response.status());
    }

    async fn create(client: &Client, spec: &MatchSpec) -> CreatedMatch {
        let response = client
            .post(uri!(create_match))
            .header(ContentType::JSON)
            .body(serde_json::to_string(spec).unwrap())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        serde_json::from_str(&response.into_string().await.unwrap()).unwrap()
    }
}
