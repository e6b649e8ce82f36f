//! Lifecycle hooks
//!
//! The host subscribes to fixed pipeline checkpoints by implementing
//! [`LifecycleHooks`]; every method has a no-op default so partial
//! implementations stay cheap. Hooks are injected at run start and must not
//! block the pipeline.

use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::cookie::Jar;

use super::context::RequestContext;

/// Fixed pipeline checkpoints, fired in this order
pub trait LifecycleHooks: Send + Sync {
    fn request_queued(&self, _ctx: &RequestContext) {}
    fn folder_request_queued(&self, _ctx: &RequestContext) {}
    fn request_about_to_send(&self, _ctx: &RequestContext) {}
    fn cookie_jar_updated(&self, _jar: &Arc<Jar>) {}
    fn folder_response_received(&self, _ctx: &RequestContext) {}
}

/// Default hook set that ignores every checkpoint
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl LifecycleHooks for NoopHooks {}

/// What the host needs to drive an interactive consent flow
#[derive(Debug, Clone)]
pub struct AuthCodePrompt {
    /// Fully assembled consent URL to present to the user
    pub authorize_url: String,
    /// Redirect URI the provider will call back to
    pub callback_url: String,
    /// CSRF state embedded in the consent URL
    pub state: String,
}

pub type AuthCodeResult = std::result::Result<String, String>;

/// Host-supplied callback resolving an [`AuthCodePrompt`] into an
/// authorization code, typically by opening a browser and waiting for the
/// redirect.
pub type AuthCodeFetcher =
    Arc<dyn Fn(AuthCodePrompt) -> BoxFuture<'static, AuthCodeResult> + Send + Sync>;
