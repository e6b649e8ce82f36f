//! The pipeline orchestrator
//!
//! Sequences one run through `Pending → PreRequest → Sending → PostRequest
//! → Completed`, with `Failed` reachable from the three middle states. The
//! entry point never returns an error for request-domain failures: the
//! error lands in `context.error`, open timings are stopped on every exit
//! path, and the context always comes back to the caller.

use serde_json::json;

use crate::auth::{authorization_header, oauth2};
use crate::client::cookies::parse_set_cookie_headers;
use crate::client::{build_client, build_request_spec, determine_preview_type, send_request};
use crate::collection::cascade::{
    collect_folder_data, effective_auth, merged_headers, post_script_chain, pre_script_chain,
    test_script_chain, FolderData,
};
use crate::collection::{AuthConfig, Collection, PostVarEntry};
use crate::errors::{EngineError, Result};
use crate::scripting::bridge::LogLine;
use crate::scripting::{RequestView, ResponseView, Sandbox, SandboxState};
use crate::vars::interpolate::interpolate_request;

use super::assertions::evaluate_assertions;
use super::context::{ExecuteOptions, RequestContext, RunState};
use super::debug::DebugTrail;
use super::tests::run_test_scripts;

/// Execute one request run to completion.
///
/// This is the single inbound entry point. Success and failure are both
/// reported through the returned context; callers inspect `context.error`.
pub async fn execute(opts: ExecuteOptions) -> RequestContext {
    let mut ctx = RequestContext::new(opts);
    tracing::debug!(run = %ctx.uid, item = %ctx.item.uid, "starting request run");

    // A previous run of the same item may have left its artifact behind.
    let artifact = ctx.artifact_path();
    if let Err(error) = tokio::fs::remove_file(&artifact).await {
        if error.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %artifact.display(), %error, "failed to remove stale artifact");
        }
    }

    if let Err(error) = run_pipeline(&mut ctx).await {
        tracing::debug!(run = %ctx.uid, %error, "run failed");
        ctx.debug.log(format!("run failed: {error}"));
        ctx.state = RunState::Failed;
        ctx.error = Some(error);
    }

    // Close open intervals on success and failure alike.
    ctx.timings.stop_all();
    ctx
}

async fn run_pipeline(ctx: &mut RequestContext) -> Result<()> {
    ctx.timings.start_measure("total");
    ctx.state = RunState::PreRequest;
    ctx.debug.add_stage("pre-request");

    ctx.hooks.request_queued(ctx);
    ctx.hooks.folder_request_queued(ctx);

    let (folder_data, folder_vars) = collect_folder_data(&ctx.collection, &ctx.item.uid);
    ctx.variables.folder = folder_vars;
    ctx.debug.log_with(
        "folder data collected",
        Some(json!({ "levels": folder_data.levels.len() })),
    );

    apply_collection_settings(ctx, &folder_data);
    run_pre_request_scripts(ctx, &folder_data).await?;

    // All variable-mutating stages are done; resolve placeholders.
    let flat = ctx.variables.flatten();
    interpolate_request(&mut ctx.resolved_request, &flat);
    ctx.debug.log("request interpolated");

    let oauth_token = match ctx.resolved_request.auth.clone() {
        AuthConfig::OAuth2(config) => {
            ctx.timings.start_measure("oauth2");
            let token =
                oauth2::resolve_token(&config, ctx.auth_code_fetcher.as_ref(), &ctx.cancel).await;
            ctx.timings.stop_measure("oauth2");
            let token = token?;
            ctx.debug.log("oauth2 token resolved");
            Some(token)
        }
        _ => None,
    };

    let authorization = authorization_header(&ctx.resolved_request.auth, oauth_token.as_ref());
    let spec = build_request_spec(&ctx.resolved_request, authorization)?;
    ctx.debug.log_with(
        "http request built",
        Some(json!({ "method": spec.method, "url": spec.url })),
    );
    ctx.http_request = Some(spec.clone());

    ctx.hooks.request_about_to_send(ctx);

    ctx.state = RunState::Sending;
    ctx.debug.add_stage("request");
    let client = build_client(&ctx.preferences, &ctx.cookie_jar)?;
    let body_path = ctx.artifact_path();
    ctx.timings.start_measure("request");
    let response = send_request(&client, &spec, &ctx.cancel, &body_path).await;
    ctx.timings.stop_measure("request");
    let response = response?;
    ctx.debug.log_with(
        "response received",
        Some(json!({ "status": response.status, "size": response.size })),
    );

    ctx.state = RunState::PostRequest;
    ctx.debug.add_stage("post-request");

    let cookies = parse_set_cookie_headers(&response.headers);
    if !cookies.is_empty() {
        let names: Vec<_> = cookies.iter().map(|cookie| cookie.name().to_string()).collect();
        ctx.debug
            .log_with("cookie jar updated", Some(json!({ "cookies": names })));
        ctx.hooks.cookie_jar_updated(&ctx.cookie_jar);
    }

    ctx.timings.start_measure("parseResponse");
    let body = tokio::select! {
        _ = ctx.cancel.cancelled() => {
            return Err(EngineError::Cancelled("while reading response body".to_string()));
        }
        body = tokio::fs::read(&response.body_path) => body?,
    };
    ctx.timings.stop_measure("parseResponse");

    ctx.preview = Some(determine_preview_type(response.content_type()));

    let response_view = ResponseView {
        status: response.status,
        status_text: response.status_text.clone(),
        headers: response.headers.clone(),
        body_text: String::from_utf8_lossy(&body).to_string(),
        elapsed_ms: response.elapsed.as_millis() as u64,
    };
    ctx.response = Some(response);
    ctx.response_body = Some(bytes::Bytes::from(body));

    extract_post_request_vars(ctx, &folder_data, &response_view);

    // A fatal post script aborts the remaining post-processing, but the
    // response stored above stays with the context.
    run_post_request_scripts(ctx, &folder_data, &response_view).await?;

    let flat = ctx.variables.flatten();
    ctx.assertion_results =
        evaluate_assertions(&ctx.resolved_request.assertions, &flat, Some(&response_view));
    if !ctx.assertion_results.is_empty() {
        let passed = ctx.assertion_results.iter().filter(|r| r.passed).count();
        ctx.debug.log_with(
            "assertions evaluated",
            Some(json!({ "passed": passed, "total": ctx.assertion_results.len() })),
        );
    }

    run_test_suite(ctx, &folder_data, &response_view).await?;

    ctx.timings.stop_measure("total");
    ctx.state = RunState::Completed;
    ctx.hooks.folder_response_received(ctx);

    Ok(())
}

/// Apply the collection and folder cascade to the working request copy:
/// merged headers and the resolved auth mode.
fn apply_collection_settings(ctx: &mut RequestContext, folder_data: &FolderData) {
    let headers = merged_headers(&ctx.collection, folder_data, &ctx.resolved_request);
    let auth = effective_auth(&ctx.collection, folder_data, &ctx.resolved_request);
    ctx.debug.log_with(
        "collection settings applied",
        Some(json!({ "headers": headers.len() })),
    );
    ctx.resolved_request.headers = headers;
    ctx.resolved_request.auth = auth;
}

async fn run_pre_request_scripts(
    ctx: &mut RequestContext,
    folder_data: &FolderData,
) -> Result<()> {
    let chain = pre_script_chain(&ctx.collection, folder_data, &ctx.resolved_request);
    if chain.is_empty() {
        return Ok(());
    }

    ctx.timings.start_measure("preScript");
    let state = SandboxState::new(
        ctx.variables.clone(),
        RequestView::from_request(&ctx.resolved_request),
    );
    let sandbox = Sandbox::new(state)?;

    let mut failure = None;
    for source in &chain {
        if let Err(error) = sandbox.run(source, &ctx.cancel).await {
            failure = Some(error);
            break;
        }
    }

    // Writes made before a throwing line still count, so the state is
    // drained on failure too.
    let state = sandbox.into_state();
    ctx.variables = state.bag;
    state.request.apply_to(&mut ctx.resolved_request);
    persist_runtime_writes(&ctx.collection, &state.runtime_writes);
    drain_logs(&mut ctx.debug, state.logs);
    ctx.test_results.extend(state.tests);
    ctx.timings.stop_measure("preScript");
    ctx.debug.log(format!("pre-request scripts ran ({})", chain.len()));

    match failure {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

async fn run_post_request_scripts(
    ctx: &mut RequestContext,
    folder_data: &FolderData,
    response_view: &ResponseView,
) -> Result<()> {
    let chain = post_script_chain(&ctx.collection, folder_data, &ctx.resolved_request);
    if chain.is_empty() {
        return Ok(());
    }

    ctx.timings.start_measure("postScript");
    let state = SandboxState::new(
        ctx.variables.clone(),
        RequestView::from_request(&ctx.resolved_request),
    );
    let sandbox = Sandbox::new(state)?;
    sandbox.set_response(response_view.clone());

    let mut failure = None;
    for source in &chain {
        if let Err(error) = sandbox.run(source, &ctx.cancel).await {
            failure = Some(error);
            break;
        }
    }

    let state = sandbox.into_state();
    ctx.variables = state.bag;
    persist_runtime_writes(&ctx.collection, &state.runtime_writes);
    drain_logs(&mut ctx.debug, state.logs);
    ctx.test_results.extend(state.tests);
    ctx.timings.stop_measure("postScript");
    ctx.debug.log(format!("post-request scripts ran ({})", chain.len()));

    match failure {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

/// Evaluate post-response variable definitions (collection, folders,
/// request) and persist the results into the runtime scope.
fn extract_post_request_vars(
    ctx: &mut RequestContext,
    folder_data: &FolderData,
    response_view: &ResponseView,
) {
    let flat = ctx.variables.flatten();

    let mut defs: Vec<PostVarEntry> = Vec::new();
    if let Some(root) = &ctx.collection.root {
        defs.extend(root.vars.post.iter().cloned());
    }
    for level in &folder_data.levels {
        defs.extend(level.vars.post.iter().cloned());
    }
    defs.extend(ctx.resolved_request.vars.post.iter().cloned());

    for def in defs.iter().filter(|def| def.enabled) {
        let value = super::assertions::resolve_expr(&def.expr, &flat, Some(response_view))
            .unwrap_or(serde_json::Value::Null);
        ctx.debug.log_with(
            "post-request variable extracted",
            Some(json!({ "name": def.name, "expr": def.expr })),
        );
        ctx.variables.runtime.insert(def.name.clone(), value.clone());
        ctx.collection.set_runtime_var(def.name.clone(), value);
    }
}

async fn run_test_suite(
    ctx: &mut RequestContext,
    folder_data: &FolderData,
    response_view: &ResponseView,
) -> Result<()> {
    let chain = test_script_chain(&ctx.collection, folder_data, &ctx.resolved_request);
    if chain.is_empty() {
        return Ok(());
    }

    ctx.timings.start_measure("tests");
    let state = SandboxState::new(
        ctx.variables.clone(),
        RequestView::from_request(&ctx.resolved_request),
    );
    let sandbox = Sandbox::new(state)?;
    sandbox.set_response(response_view.clone());

    let script_failures = run_test_scripts(&sandbox, &chain, &ctx.cancel).await;

    let state = sandbox.into_state();
    ctx.variables = state.bag;
    persist_runtime_writes(&ctx.collection, &state.runtime_writes);
    drain_logs(&mut ctx.debug, state.logs);
    ctx.test_results.extend(state.tests);
    ctx.timings.stop_measure("tests");

    let script_failures = script_failures?;
    ctx.test_results.extend(script_failures);
    let passed = ctx.test_results.iter().filter(|t| t.passed).count();
    ctx.debug.log_with(
        "tests ran",
        Some(json!({ "passed": passed, "total": ctx.test_results.len() })),
    );

    Ok(())
}

fn persist_runtime_writes(collection: &Collection, writes: &[(String, serde_json::Value)]) {
    for (name, value) in writes {
        collection.set_runtime_var(name.clone(), value.clone());
    }
}

fn drain_logs(debug: &mut DebugTrail, logs: Vec<LogLine>) {
    for line in logs {
        debug.log_with(
            format!("script: {}", line.message),
            Some(json!({ "level": line.level.as_str() })),
        );
    }
}
