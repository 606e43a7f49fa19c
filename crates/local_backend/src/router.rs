use axum::{
    routing::{
        get,
        post,
    },
    Router,
};
use tower_http::trace::TraceLayer;

use crate::{
    datasets::{
        create_dataset,
        delete_dataset,
        get_dataset,
        list_datasets,
    },
    ingest::{
        get_changes,
        get_entities,
        post_entities,
    },
    logins::register_login,
    query::post_query,
    LocalAppState,
};

pub fn router(st: LocalAppState) -> Router {
    Router::new()
        .route("/datasets", get(list_datasets))
        .route(
            "/datasets/{name}",
            post(create_dataset).get(get_dataset).delete(delete_dataset),
        )
        .route("/datasets/{name}/entities", post(post_entities).get(get_entities))
        .route("/datasets/{name}/changes", get(get_changes))
        .route("/provider/logins", post(register_login))
        .route("/query", post(post_query))
        .layer(TraceLayer::new_for_http())
        .with_state(st)
}
