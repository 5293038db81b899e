//! User-data pipeline
//!
//! Assembles the boot payload for a new instance:
//!
//! 1. Read the raw payload from the secret named in the provider spec
//! 2. Render it as a control-plane or worker startup script, unless the
//!    secret disables templating
//! 3. Run the named postprocessor, if the secret names one
//!
//! A machine without a user-data secret boots with an empty payload.

pub mod ct;

use crate::bootstrap;
use crate::error::{Error, Result};
use crate::machine::{Machine, OpenstackProviderSpec};
use crate::registry::PostprocessorRegistry;
use crate::traits::{ScriptRenderer, SecretStore};
use std::sync::Arc;
use tracing::{debug, info};

/// Secret key holding the raw user data
pub const USER_DATA_KEY: &str = "userData";
/// Secret key whose presence disables templating
pub const DISABLE_TEMPLATING_KEY: &str = "disableTemplating";
/// Secret key naming the postprocessor to run
pub const POSTPROCESSOR_KEY: &str = "postprocessor";

/// Builds user data for machines
pub struct UserDataPipeline {
    secrets: Arc<dyn SecretStore>,
    renderer: Arc<dyn ScriptRenderer>,
    registry: PostprocessorRegistry,
    token_ttl: chrono::Duration,
}

/// What the user-data secret asked for
struct UserDataSource {
    payload: Vec<u8>,
    templating: bool,
    postprocessor: Option<String>,
}

impl UserDataPipeline {
    pub fn new(
        secrets: Arc<dyn SecretStore>,
        renderer: Arc<dyn ScriptRenderer>,
        registry: PostprocessorRegistry,
        token_ttl: chrono::Duration,
    ) -> Self {
        Self {
            secrets,
            renderer,
            registry,
            token_ttl,
        }
    }

    /// Build the user data for `machine`
    ///
    /// Workers get a freshly issued bootstrap token rendered into their
    /// script; a token is never reused across calls.
    pub async fn build(&self, machine: &Machine, spec: &OpenstackProviderSpec) -> Result<String> {
        let Some(source) = self.load(machine, spec).await? else {
            return Ok(String::new());
        };

        let raw = String::from_utf8(source.payload)
            .map_err(|_| Error::user_data("user data is not valid UTF-8"))?;

        let rendered = if !raw.is_empty() && source.templating {
            self.render(machine, &raw).await?
        } else {
            raw
        };

        match source.postprocessor {
            Some(name) => {
                debug!(machine = %machine.key(), postprocessor = %name, "Postprocessing user data");
                self.registry.apply(&name, &rendered)
            }
            None => Ok(rendered),
        }
    }

    async fn load(
        &self,
        machine: &Machine,
        spec: &OpenstackProviderSpec,
    ) -> Result<Option<UserDataSource>> {
        let Some(reference) = &spec.user_data_secret else {
            return Ok(None);
        };

        if reference.name.is_empty() {
            return Err(Error::invalid_configuration("UserDataSecret name must be provided"));
        }
        let namespace = if reference.namespace.is_empty() {
            machine.namespace.as_str()
        } else {
            reference.namespace.as_str()
        };

        let mut secret = self.secrets.get(namespace, &reference.name).await?.ok_or_else(|| {
            Error::user_data(format!(
                "Machine's userdata secret {} in namespace {} does not exist",
                reference.name, namespace
            ))
        })?;

        let payload = secret.data.remove(USER_DATA_KEY).ok_or_else(|| {
            Error::user_data(format!(
                "Machine's userdata secret {} in namespace {} did not contain key {}",
                reference.name, namespace, USER_DATA_KEY
            ))
        })?;

        let postprocessor = secret
            .data
            .get(POSTPROCESSOR_KEY)
            .map(|name| String::from_utf8_lossy(name).into_owned());

        Ok(Some(UserDataSource {
            payload,
            templating: !secret.data.contains_key(DISABLE_TEMPLATING_KEY),
            postprocessor,
        }))
    }

    async fn render(&self, machine: &Machine, template: &str) -> Result<String> {
        let rendered = if machine.is_control_plane() {
            self.renderer.render_control_plane(machine, template)
        } else {
            info!(machine = %machine.key(), "Creating bootstrap token");
            let token = bootstrap::issue(self.secrets.as_ref(), self.token_ttl).await?;
            self.renderer.render_worker(machine, &token, template)
        };

        rendered.map_err(|e| {
            if e.bypasses_status() {
                e
            } else {
                Error::create(format!("error creating Openstack instance: {}", e))
            }
        })
    }
}
