//! The plugin node contract.
//!
//! Everything that actually computes a finding (protocol checks, license
//! validation, scanners, provider calls) lives behind [`PluginHandler`].
//! The engine treats a handler as an opaque async function: it is given the
//! run's [`DiagnosticContext`] and the node's configured arguments, and
//! returns findings and recoverable errors. A handler that returns `Err`
//! does not abort the run; the orchestrator records the failure and keeps
//! routing.
//!
//! # Examples
//!
//! ```rust
//! use async_trait::async_trait;
//! use probeflow::plugin::{DiagnosticContext, PluginError, PluginHandler, PluginOutput};
//! use probeflow::finding::Finding;
//!
//! struct TlsProbe;
//!
//! #[async_trait]
//! impl PluginHandler for TlsProbe {
//!     async fn run(
//!         &self,
//!         ctx: &DiagnosticContext,
//!         _args: &serde_json::Value,
//!     ) -> Result<PluginOutput, PluginError> {
//!         let finding = Finding::info("tls-probe", format!("probed {}", ctx.endpoint));
//!         Ok(PluginOutput::new().with_finding(finding))
//!     }
//! }
//! ```

use async_trait::async_trait;
use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;

use crate::errors::ErrorEvent;
use crate::finding::Finding;

/// Opaque diagnostic collaborator forwarded to plugin handlers unmodified.
///
/// The engine reads nothing from it beyond the endpoint identifier used to
/// seed run state; request/RPC/probe machinery is the handler's business.
#[derive(Clone, Debug, Default)]
pub struct DiagnosticContext {
    /// Identifier of the endpoint under diagnosis.
    pub endpoint: String,
    /// Caller-supplied parameters shared by all handlers in the run.
    pub params: Value,
}

impl DiagnosticContext {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            params: Value::Null,
        }
    }

    #[must_use]
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }
}

/// What a plugin handler produced. All fields merge into run state in
/// order: findings appended, severities escalated, errors appended.
#[derive(Clone, Debug, Default)]
pub struct PluginOutput {
    pub findings: Vec<Finding>,
    pub errors: Vec<ErrorEvent>,
}

impl PluginOutput {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_finding(mut self, finding: Finding) -> Self {
        self.findings.push(finding);
        self
    }

    #[must_use]
    pub fn with_findings(mut self, findings: Vec<Finding>) -> Self {
        self.findings.extend(findings);
        self
    }

    #[must_use]
    pub fn with_error(mut self, error: ErrorEvent) -> Self {
        self.errors.push(error);
        self
    }
}

/// Failure of a plugin handler. Recorded against the run, never fatal.
#[derive(Debug, Error, Diagnostic)]
pub enum PluginError {
    /// The external provider or service behind the plugin failed.
    #[error("provider error ({provider}): {message}")]
    #[diagnostic(code(probeflow::plugin::provider))]
    Provider {
        provider: &'static str,
        message: String,
    },

    /// Required input is missing from the context or arguments.
    #[error("missing expected input: {what}")]
    #[diagnostic(
        code(probeflow::plugin::missing_input),
        help("Check the node's configured args and the diagnostic context.")
    )]
    MissingInput { what: &'static str },

    #[error(transparent)]
    #[diagnostic(code(probeflow::plugin::serde_json))]
    Serde(#[from] serde_json::Error),

    #[error("plugin failed: {0}")]
    #[diagnostic(code(probeflow::plugin::failed))]
    Failed(String),
}

/// Async unit of diagnostic work bound to plugin nodes.
#[async_trait]
pub trait PluginHandler: Send + Sync {
    /// Execute the check against the context with the node's arguments.
    async fn run(&self, ctx: &DiagnosticContext, args: &Value)
        -> Result<PluginOutput, PluginError>;
}
