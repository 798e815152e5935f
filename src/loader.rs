//! Result loader: route a completed task's artifacts to their views.
//!
//! The HTML rendition is handed over by reference: the view receives its
//! URL and fetches it itself. The JSON result is fetched here, parsed and
//! pretty-printed. The artifacts load concurrently and independently; a
//! slow or broken one never holds back the other.

use crate::error::ClientError;
use crate::session::{SessionPhase, Shared, Ticket};
use crate::task::TaskId;
use serde_json::Value;
use tracing::{debug, info, warn};

/// Parse `raw` as JSON and re-render it indented, keeping key order.
///
/// # Errors
/// `ResultParse` when `raw` is not well-formed JSON.
pub fn pretty_json(raw: &str, artifact: &'static str) -> Result<String, ClientError> {
    let value: Value = serde_json::from_str(raw).map_err(|e| ClientError::ResultParse {
        artifact,
        detail: e.to_string(),
    })?;
    serde_json::to_string_pretty(&value).map_err(|e| ClientError::ResultParse {
        artifact,
        detail: e.to_string(),
    })
}

/// Load every result artifact of `task_id` into the view, then mark the
/// session completed. Each effect is dropped if `ticket` went stale.
pub(crate) async fn load_results(shared: &Shared, ticket: &Ticket, task_id: &TaskId) {
    info!(%task_id, "Loading results");

    let html = async {
        match shared.service.html_url(task_id) {
            Ok(url) => {
                debug!(%task_id, "HTML result at {}", url);
                shared.apply(ticket, |_, view| view.on_html_ready(&url));
            }
            Err(e) => {
                warn!(%task_id, "{}", e);
                shared.apply(ticket, |_, view| view.on_status(&e.to_string()));
            }
        }
    };

    let json = async {
        let outcome = shared
            .service
            .fetch_json(task_id)
            .await
            .and_then(|raw| pretty_json(&raw, "JSON"));
        shared.apply(ticket, |_, view| match &outcome {
            Ok(pretty) => view.on_json_ready(pretty),
            Err(e) => {
                warn!(%task_id, "{}", e);
                view.on_json_error(&e.to_string());
                view.on_status(&format!("Conversion complete, but the JSON result is unavailable: {e}"));
            }
        });
    };

    let intermediate = async {
        if !shared.config.load_intermediate {
            return;
        }
        let outcome = shared
            .service
            .fetch_intermediate(task_id)
            .await
            .and_then(|raw| pretty_json(&raw, "intermediate"));
        match outcome {
            Ok(pretty) => {
                shared.apply(ticket, |_, view| view.on_intermediate_ready(&pretty));
            }
            Err(e) => warn!(%task_id, "Intermediate layout unavailable: {}", e),
        }
    };

    tokio::join!(html, json, intermediate);

    shared.apply(ticket, |_, _| {
        shared.set_phase(SessionPhase::Completed(task_id.clone()));
    });
}
