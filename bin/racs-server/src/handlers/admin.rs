//! The `/racs` admin surface: repository status/priority/active
//! toggles and the stats dump (§4.6, §9).
//!
//! The source evaluates `?cmd=<arbitrary expression>` here. This
//! rewrite replaces that with the fixed allow-list below; anything
//! else in the query string is ignored rather than evaluated.

use std::fmt::Write as _;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use racs_repository::Repository;
use serde::Deserialize;

use crate::state::AppState;

const ALLOWED_COMMANDS: &[&str] = &["increase_priority", "decrease_priority", "toggle_active", "reset_stats"];

#[derive(Debug, Deserialize)]
pub struct AdminQuery {
    pub cmd: Option<String>,
    pub repo: Option<String>,
}

pub async fn admin_page(State(state): State<Arc<AppState>>, Query(query): Query<AdminQuery>) -> Response {
    if let Some(cmd) = query.cmd.as_deref() {
        if !ALLOWED_COMMANDS.contains(&cmd) {
            return (StatusCode::BAD_REQUEST, format!("unknown command: {cmd}")).into_response();
        }
        if let Err(msg) = run_command(&state, cmd, query.repo.as_deref()) {
            return (StatusCode::BAD_REQUEST, msg).into_response();
        }
    }

    Html(render_page(&state)).into_response()
}

fn run_command(state: &AppState, cmd: &str, repo: Option<&str>) -> Result<(), String> {
    if cmd == "reset_stats" {
        state.reset_stats();
        return Ok(());
    }

    let repo_name = repo.ok_or_else(|| format!("?cmd={cmd} requires ?repo=<name>"))?;
    let repository = state
        .find_repository(repo_name)
        .ok_or_else(|| format!("no such repository: {repo_name}"))?;

    match cmd {
        "increase_priority" => repository.set_priority(repository.priority() + 1),
        "decrease_priority" => repository.set_priority(repository.priority() - 1),
        "toggle_active" => repository.set_active(!repository.active()),
        _ => unreachable!("checked against ALLOWED_COMMANDS above"),
    }
    Ok(())
}

fn render_page(state: &AppState) -> String {
    let mut out = String::new();
    out.push_str("<html><head><title>racs</title></head><body>");
    out.push_str("<h1>repositories</h1><table border=\"1\"><tr><th>name</th><th>priority</th><th>active</th></tr>");
    for repo in &state.repositories {
        let _ = write!(
            out,
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
            repo.name(),
            repo.priority(),
            repo.active()
        );
    }
    out.push_str("</table>");

    let _ = write!(out, "<p>stats reset at: {}</p>", state.stats_reset_at_http_date());
    out.push_str("<h1>stats</h1><pre>");
    out.push_str(&html_escape(&state.metrics_snapshot()));
    out.push_str("</pre>");
    out.push_str("</body></html>");
    out
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}
