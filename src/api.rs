use rocket::Route;

mod admin;
pub(crate) mod auth;
mod matches;
mod reports;
mod session;

pub fn routes() -> Vec<Route> {
    let mut routes = Vec::new();
    routes.extend(admin::routes());
    routes.extend(auth::routes());
    routes.extend(matches::routes());
    routes.extend(reports::routes());
    routes.extend(session::routes());
    routes
}
