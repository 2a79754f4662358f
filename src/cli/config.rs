use anyhow::Result;
use clap::Args;

use crate::compose;
use crate::config::Settings;

#[derive(Args, Clone, Debug)]
pub struct ConfigCommand {}

impl ConfigCommand {
    pub fn execute(&self, settings: &Settings) -> Result<()> {
        let state_dir = settings.state_dir();
        let artifacts = compose::write_artifacts(&state_dir, &settings.project)?;

        println!(
            "📝 Generated {} services in {}",
            artifacts.compose.services.len(),
            state_dir.display()
        );
        Ok(())
    }
}
