pub mod auth;
pub mod error;
pub mod rate_limit;
pub mod validation;

use async_graphql::http::GraphiQLSource;
use axum::{
    extract::State,
    http::{header, HeaderValue, Method},
    middleware,
    response::Html,
    routing::{get, post},
    Extension, Json, Router,
};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::Identity;
use crate::config::ServerConfig;
use crate::graphql::{build_schema, types::HealthStatus, AppSchema};
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let schema = build_schema(state.clone());

    // Auth runs first so the rate limiter can see the operation's access class.
    // Route layers leave the 405 fallback for other methods untouched.
    let mut graphql = post(graphql_handler)
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_graphql,
        ))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::graphql_auth,
        ));
    if state.config.server.playground {
        graphql = graphql.get(graphiql);
    }

    Router::new()
        .route("/health", get(health_check))
        .route("/graphql", graphql)
        .layer(Extension(schema))
        .layer(cors_layer(&state.config.server))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn graphql_handler(
    Extension(schema): Extension<AppSchema>,
    identity: Option<Extension<Identity>>,
    Json(request): Json<async_graphql::Request>,
) -> Json<async_graphql::Response> {
    let request = match identity {
        Some(Extension(identity)) => request.data(identity),
        None => request,
    };
    Json(schema.execute(request).await)
}

async fn graphiql() -> Html<String> {
    Html(GraphiQLSource::build().endpoint("/graphql").finish())
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthStatus> {
    Json(HealthStatus::current(&state.config))
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let origins = config.allowed_origins();
    let allow_origin = if origins.iter().any(|origin| origin == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            origins
                .iter()
                .filter_map(|origin| HeaderValue::from_str(origin).ok()),
        )
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}
