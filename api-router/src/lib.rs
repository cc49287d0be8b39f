use api_state::ApiState;
use axum::{extract::FromRef, routing::get, Router};
use routes::{
    liveness::live,
    readiness::ready,
    search::{deep_search, fast_search},
    spelling::{spell_check, suggestions},
};

pub mod api_state;
pub mod error;
mod routes;

/// Router for API functionality, version 1
pub fn api_routes_v1<S>(_app_state: &ApiState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    // Probes for k8s/systemd
    let probes = Router::new()
        .route("/ready", get(ready))
        .route("/live", get(live));

    let search = Router::new()
        .route("/search/fast", get(fast_search))
        .route("/search/deep", get(deep_search))
        .route("/spell-check", get(spell_check))
        .route("/suggestions", get(suggestions));

    probes.merge(search)
}
