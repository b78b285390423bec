//! Hot-swappable binding between the live endpoint and the active server
//!
//! [`DynamicProxy`] holds a single [`ProxyBinding`] (app name, access token,
//! server) behind one `RwLock<Arc<_>>`. [`DynamicProxy::reconfigure`] builds
//! the complete replacement first and swaps the `Arc` in one write, so a
//! reader observes either the old binding or the new one, never a mix.
//! Admitted requests hold their own `Arc` and finish against the binding
//! they were admitted under.

use std::sync::{Arc, OnceLock, RwLock};

use crate::error::{Result, ToolbridgeError};
use crate::mcp::server::ToolServer;

/// The active (app identity, token, server) triple.
#[derive(Debug)]
pub struct ProxyBinding {
    /// Identity advertised for the bound server.
    pub app_name: String,
    /// Token inbound requests must present; empty disables the check.
    pub token: String,
    /// Server that handles admitted requests.
    pub server: Arc<ToolServer>,
}

impl ProxyBinding {
    fn placeholder() -> Self {
        Self {
            app_name: String::new(),
            token: String::new(),
            server: Arc::new(ToolServer::new("")),
        }
    }

    /// Whether `token` is accepted by this binding.
    pub fn accepts(&self, token: &str) -> bool {
        self.token.is_empty() || self.token == token
    }
}

/// Process-wide routing cell for inbound requests.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use toolbridge::mcp::proxy::DynamicProxy;
/// use toolbridge::mcp::server::ToolServer;
///
/// let proxy = DynamicProxy::new();
/// proxy.reconfigure(Arc::new(ToolServer::new("notes")), "s3cret");
///
/// let binding = proxy.binding();
/// assert_eq!(binding.app_name, "notes");
/// assert!(proxy.admit("s3cret").is_ok());
/// assert!(proxy.admit("wrong").is_err());
/// ```
#[derive(Debug)]
pub struct DynamicProxy {
    binding: RwLock<Arc<ProxyBinding>>,
}

impl Default for DynamicProxy {
    fn default() -> Self {
        Self::new()
    }
}

impl DynamicProxy {
    /// A proxy bound to an empty placeholder server with no token.
    pub fn new() -> Self {
        Self {
            binding: RwLock::new(Arc::new(ProxyBinding::placeholder())),
        }
    }

    /// The process-wide instance, created with a placeholder binding on first use.
    ///
    /// Code in this crate passes explicit handles; this exists for hosts that
    /// want a single shared proxy without threading one through.
    pub fn get_instance() -> Arc<DynamicProxy> {
        static INSTANCE: OnceLock<Arc<DynamicProxy>> = OnceLock::new();
        Arc::clone(INSTANCE.get_or_init(|| Arc::new(DynamicProxy::new())))
    }

    /// Swap in a new binding for `server` and `token`.
    ///
    /// The app name is taken from `server.name()`.
    pub fn reconfigure(&self, server: Arc<ToolServer>, token: impl Into<String>) {
        let app_name = server.name().to_string();
        let next = Arc::new(ProxyBinding {
            app_name: app_name.clone(),
            token: token.into(),
            server,
        });
        let previous = {
            let mut slot = self
                .binding
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::replace(&mut *slot, next)
        };
        tracing::info!(
            previous = %previous.app_name,
            current = %app_name,
            "proxy binding reconfigured"
        );
    }

    /// Snapshot of the current binding.
    pub fn binding(&self) -> Arc<ProxyBinding> {
        let slot = self
            .binding
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&*slot)
    }

    /// Admit a request presenting `token`.
    ///
    /// # Errors
    ///
    /// Returns [`ToolbridgeError::Unauthorized`] when the current binding has
    /// a token and `token` does not match it.
    pub fn admit(&self, token: &str) -> Result<Arc<ProxyBinding>> {
        let binding = self.binding();
        if binding.accepts(token) {
            Ok(binding)
        } else {
            tracing::warn!(app = %binding.app_name, "rejected request with mismatched token");
            Err(ToolbridgeError::Unauthorized(format!(
                "token does not match the active binding for `{}`",
                binding.app_name
            ))
            .into())
        }
    }

    /// Admit then dispatch one serialized JSON-RPC message.
    ///
    /// Returns the serialized reply, or `None` for notifications.
    ///
    /// # Errors
    ///
    /// Returns [`ToolbridgeError::Unauthorized`] if admission fails. Handler
    /// faults never surface here; they are encoded in the reply.
    pub async fn handle_message(&self, raw: &str, token: &str) -> Result<Option<String>> {
        let binding = self.admit(token)?;
        let endpoint = binding.server.get_transport_instance();
        Ok(endpoint.handle_message(raw).await)
    }
}
