//! Remote condensation seam
//!
//! The request/response format of the remote service is owned by the
//! implementor of [`RemoteCondenser`]. The dispatcher only hands over the
//! content plus the leased credential and interprets the result.

use crate::config::Config;
use crate::credential_pool::CredentialLease;
use crate::error::CondenseError;
use crate::types::CredentialId;
use crate::utils::{is_blank, mask_secret};
use futures::future::join_all;
use serde::Serialize;
use std::time::{Duration, Instant};

/// Text sent by [`probe_credentials`]
pub const PROBE_TEXT: &str = "这是一个用于检测接口可用性的简短测试文本。请用一句话概括它。";

/// A remote text-condensation service
///
/// Implementations must apply their own timeout; any error they return is
/// charged to the leased credential and retried with another one.
#[async_trait::async_trait]
pub trait RemoteCondenser: Send + Sync {
    /// Condense `content` using the credential in `lease`
    async fn condense(&self, content: &str, lease: &CredentialLease) -> Result<String, CondenseError>;
}

/// Result of probing one configured credential
#[derive(Debug, Clone, Serialize)]
pub struct CredentialCheck {
    /// Position among the usable credentials
    pub id: CredentialId,
    /// Masked key
    pub key: String,
    /// Endpoint override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    /// Model override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Whether the probe returned usable text
    pub ok: bool,
    /// Round-trip time
    pub latency: Duration,
    /// Failure detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Send [`PROBE_TEXT`] through `condenser` once per usable credential
///
/// Probing does not touch any [`CredentialPool`](crate::credential_pool::CredentialPool),
/// so a failed probe never skips a credential.
pub async fn probe_credentials(config: &Config, condenser: &dyn RemoteCondenser) -> Vec<CredentialCheck> {
    let probes = config.usable_credentials().enumerate().map(|(i, record)| {
        let lease = CredentialLease {
            id: CredentialId(i),
            key: record.key.trim().to_string(),
            redirect_url: record.redirect_url.clone(),
            model: record.model.clone(),
            not_before: None,
        };
        async move {
            let start = Instant::now();
            let result = condenser.condense(PROBE_TEXT, &lease).await;
            let latency = start.elapsed();
            let error = match result {
                Ok(text) if !is_blank(&text) => None,
                Ok(_) => Some(CondenseError::EmptyResponse.to_string()),
                Err(e) => Some(e.to_string()),
            };
            match &error {
                None => tracing::info!(credential = %lease.id, ?latency, "Credential probe succeeded"),
                Some(e) => tracing::warn!(credential = %lease.id, error = %e, "Credential probe failed"),
            }
            CredentialCheck {
                id: lease.id,
                key: mask_secret(&lease.key),
                redirect_url: lease.redirect_url,
                model: lease.model,
                ok: error.is_none(),
                latency,
                error,
            }
        }
    });
    join_all(probes).await
}
