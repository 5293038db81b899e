// # Script Renderer Trait
//
// Startup-script templating is owned by the embedder. The actuator only
// decides which flavor of script a machine gets.

use crate::machine::Machine;

/// Renders user-data templates into startup scripts
pub trait ScriptRenderer: Send + Sync {
    /// Render the script for a control-plane machine
    fn render_control_plane(&self, machine: &Machine, template: &str) -> Result<String, crate::Error>;

    /// Render the script for a worker joining with `bootstrap_token`
    fn render_worker(
        &self,
        machine: &Machine,
        bootstrap_token: &str,
        template: &str,
    ) -> Result<String, crate::Error>;
}
