use log::{debug, info, warn};
use mongodb::{
    bson::doc, error::TRANSIENT_TRANSACTION_ERROR, options::FindOptions, Client, ClientSession,
};
use rocket::{futures::TryStreamExt, serde::json::Json, Route, State};

use crate::{
    catalogue::QuestionStore,
    error::{Error, Result},
    model::{
        api::{admin::AdminCredentials, auth::AuthToken, catalogue::CategoryListing},
        db::admin::{Admin, NewAdmin},
        mongodb::{commit, is_duplicate_key_error, Coll},
    },
};

/// How often an admin deletion is retried after colliding with a concurrent one.
const MAX_DELETE_ATTEMPTS: usize = 5;

pub fn routes() -> Vec<Route> {
    routes![list_admins, add_admin, remove_admin, get_questions]
}

/// Usernames of all admins, oldest account first.
#[get("/admins")]
async fn list_admins(_token: AuthToken, admins: Coll<Admin>) -> Result<Json<Vec<String>>> {
    let oldest_first = FindOptions::builder().sort(doc! {"_id": 1}).build();
    let usernames = admins
        .find(None, oldest_first)
        .await?
        .map_ok(|admin| admin.admin.username)
        .try_collect()
        .await?;
    Ok(Json(usernames))
}

#[post("/admins", data = "<credentials>", format = "json")]
async fn add_admin(
    _token: AuthToken,
    credentials: Json<AdminCredentials>,
    admins: Coll<NewAdmin>,
) -> Result<()> {
    let new_admin = NewAdmin::try_from(credentials.into_inner())?;
    match admins.insert_one(&new_admin, None).await {
        Ok(_) => {
            info!("Admin {} added", new_admin.username);
            Ok(())
        }
        Err(e) if is_duplicate_key_error(&e) => Err(Error::Conflict(format!(
            "Username {} is taken",
            new_admin.username
        ))),
        Err(e) => Err(e.into()),
    }
}

/// Delete the admin with the given username, unless it is the only one left.
#[delete("/admins", data = "<username>", format = "json")]
async fn remove_admin(
    _token: AuthToken,
    username: Json<String>,
    db_client: &State<Client>,
    admins: Coll<Admin>,
) -> Result<()> {
    let username = username.into_inner();
    let mut session = db_client.start_session(None).await?;
    let mut attempt = 1;
    loop {
        match remove_admin_in_transaction(&mut session, &admins, &username).await {
            Err(Error::Db(e))
                if e.contains_label(TRANSIENT_TRANSACTION_ERROR)
                    && attempt < MAX_DELETE_ATTEMPTS =>
            {
                debug!("Deletion of admin {username} collided: {e}");
                attempt += 1;
            }
            Err(e @ Error::Db(_)) => {
                warn!("Failed to delete admin {username} after {attempt} attempt(s)");
                return Err(e);
            }
            Err(e) => return Err(e),
            Ok(()) => {
                info!("Admin {username} removed");
                return Ok(());
            }
        }
    }
}

async fn remove_admin_in_transaction(
    session: &mut ClientSession,
    admins: &Coll<Admin>,
    username: &str,
) -> Result<()> {
    session.start_transaction(None).await?;
    match remove_admin_writes(session, admins, username).await {
        Ok(()) => Ok(commit(session).await?),
        Err(e) => {
            if let Err(abort) = session.abort_transaction().await {
                debug!("Abort after failed admin deletion also failed: {abort}");
            }
            Err(e)
        }
    }
}

async fn remove_admin_writes(
    session: &mut ClientSession,
    admins: &Coll<Admin>,
    username: &str,
) -> Result<()> {
    let deleted = admins
        .delete_one_with_session(doc! {"username": username}, None, session)
        .await?;
    if deleted.deleted_count == 0 {
        return Err(Error::NotFound(format!("Admin {username}")));
    }

    // Writing every remaining admin makes two concurrent deletions conflict, so they
    // cannot both see the other's admin as the survivor.
    let remaining = admins
        .update_many_with_session(doc! {}, doc! {"$inc": {"revision": 1}}, None, session)
        .await?;
    if remaining.matched_count == 0 {
        return Err(Error::Conflict("Cannot delete the last admin".to_string()));
    }
    Ok(())
}

#[get("/admin/questions")]
async fn get_questions(
    _token: AuthToken,
    store: QuestionStore,
) -> Result<Json<Vec<CategoryListing>>> {
    let categories = store.categories().await?;
    let questions = store.questions().await?;
    Ok(Json(CategoryListing::group(categories, &questions)))
}

#[cfg(test)]
mod tests {
    use rocket::{
        futures::join,
        http::{ContentType, Status},
        local::asynchronous::{Client, LocalResponse},
        serde::json::serde_json,
    };

    use crate::{
        config::Config,
        model::{common::role::Role, db::question::Question},
    };

    use super::*;

    #[backend_test(admin)]
    async fn add_then_remove(client: Client, admins: Coll<Admin>) {
        let added = AdminCredentials::example2();
        assert_eq!(post_admin(&client, &added).await, Status::Ok);

        let stored = admins
            .find_one(doc! {"username": &added.username}, None)
            .await
            .unwrap()
            .unwrap();
        assert!(stored.verify_password(&added.password));
        assert_eq!(admins.count_documents(None, None).await.unwrap(), 3);

        let response = delete_admin(&client, &added.username).await;
        assert_eq!(response.status(), Status::Ok);
        assert_eq!(
            usernames(&client).await,
            [bootstrap_username(&client), AdminCredentials::example().username]
        );
    }

    #[backend_test(admin)]
    async fn invalid_admins_are_rejected(client: Client, admins: Coll<Admin>) {
        let blank_name = AdminCredentials {
            username: " ".to_string(),
            password: "long enough".to_string(),
        };
        let short_password = AdminCredentials {
            username: "foo".to_string(),
            password: "short".to_string(),
        };
        assert_eq!(post_admin(&client, &blank_name).await, Status::BadRequest);
        assert_eq!(post_admin(&client, &short_password).await, Status::BadRequest);
        assert_eq!(
            post_admin(&client, &AdminCredentials::empty()).await,
            Status::BadRequest
        );
        assert_eq!(
            post_admin(&client, &AdminCredentials::example()).await,
            Status::Conflict
        );

        // Bootstrap admin and the logged-in test admin only.
        assert_eq!(admins.count_documents(None, None).await.unwrap(), 2);
    }

    #[backend_test(admin)]
    async fn admins_listed_oldest_first(client: Client) {
        post_admin(&client, &AdminCredentials::example2()).await;
        post_admin(&client, &AdminCredentials::example3()).await;

        assert_eq!(
            usernames(&client).await,
            [
                bootstrap_username(&client),
                AdminCredentials::example().username,
                AdminCredentials::example2().username,
                AdminCredentials::example3().username,
            ]
        );
    }

    #[backend_test(admin)]
    async fn last_admin_is_kept(client: Client, admins: Coll<Admin>) {
        let bootstrap = bootstrap_username(&client);
        assert_eq!(delete_admin(&client, &bootstrap).await.status(), Status::Ok);

        let response = delete_admin(&client, &AdminCredentials::example().username).await;
        assert_eq!(response.status(), Status::Conflict);
        assert_eq!(admins.count_documents(None, None).await.unwrap(), 1);
    }

    #[backend_test(admin)]
    async fn concurrent_removals_keep_one_admin(client: Client, admins: Coll<Admin>) {
        let bootstrap = bootstrap_username(&client);
        let own = AdminCredentials::example().username;
        let (first, second) = join!(delete_admin(&client, &bootstrap), delete_admin(&client, &own));

        let statuses = [first.status(), second.status()];
        assert!(statuses.contains(&Status::Ok), "{statuses:?}");
        assert_eq!(admins.count_documents(None, None).await.unwrap(), 1);
    }

    #[backend_test(admin)]
    async fn remove_unknown_admin(client: Client) {
        let response = delete_admin(&client, "nobody").await;
        assert_eq!(response.status(), Status::NotFound);
    }

    #[backend_test(admin)]
    async fn raw_username_body_is_rejected(client: Client, admins: Coll<Admin>) {
        let response = client
            .delete(uri!(remove_admin))
            .header(ContentType::JSON)
            .body(AdminCredentials::example().username)
            .dispatch()
            .await;
        assert_ne!(response.status(), Status::Ok);
        assert_eq!(admins.count_documents(None, None).await.unwrap(), 2);
    }

    #[backend_test]
    async fn admin_routes_need_login(client: Client) {
        let response = client.get(uri!(list_admins)).dispatch().await;
        assert_eq!(response.status(), Status::Unauthorized);
        let response = client.get(uri!(get_questions)).dispatch().await;
        assert_eq!(response.status(), Status::Unauthorized);
        let response = delete_admin(&client, "admin").await;
        assert_eq!(response.status(), Status::Unauthorized);
    }

    #[backend_test(admin)]
    async fn list_questions(client: Client, questions: Coll<Question>) {
        let response = client.get(uri!(get_questions)).dispatch().await;
        assert_eq!(response.status(), Status::Ok);

        let listing: Vec<CategoryListing> =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        let ids: Vec<u32> = listing.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(listing[2].role, Role::Student);

        let total: usize = listing.iter().map(|c| c.questions.len()).sum();
        let stored = questions.count_documents(None, None).await.unwrap();
        assert_eq!(total as u64, stored);
    }

    fn bootstrap_username(client: &Client) -> String {
        let config = client.rocket().state::<Config>().unwrap();
        config.default_admin_username().to_string()
    }

    async fn usernames(client: &Client) -> Vec<String> {
        let response = client.get(uri!(list_admins)).dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        serde_json::from_str(&response.into_string().await.unwrap()).unwrap()
    }

    async fn post_admin(client: &Client, credentials: &AdminCredentials) -> Status {
        client
            .post(uri!(add_admin))
            .header(ContentType::JSON)
            .body(serde_json::to_string(credentials).unwrap())
            .dispatch()
            .await
            .status()
    }

    async fn delete_admin<'c>(client: &'c Client, username: &str) -> LocalResponse<'c> {
        client
            .delete(uri!(remove_admin))
            .header(ContentType::JSON)
            .body(serde_json::to_string(username).unwrap())
            .dispatch()
            .await
    }
}
