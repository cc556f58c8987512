pub mod analyze;
pub mod config;
pub mod stream;

use anyhow::{Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::domain::models::{ClinicalInput, Config, SubjectId};
use crate::infrastructure::config::ConfigLoader;
use crate::infrastructure::http::{HttpStreamTransport, HttpTransport};
use crate::infrastructure::logging::LoggerImpl;
use crate::services::{ClinicalPayloadBuilder, SessionRegistry};

/// Subject and clinical context shared by the analysis commands
#[derive(Args, Debug)]
pub struct InputArgs {
    /// Identifier of the patient being analyzed
    #[arg(short, long)]
    pub subject: String,

    /// Clinician notes; overrides `notes` from --input
    #[arg(short, long)]
    pub notes: Option<String>,

    /// Current medication; repeat for several
    #[arg(short, long = "medication")]
    pub medications: Vec<String>,

    /// JSON file with the full clinical context
    #[arg(short, long)]
    pub input: Option<PathBuf>,
}

impl InputArgs {
    pub fn subject_id(&self) -> SubjectId {
        SubjectId::from(self.subject.as_str())
    }

    /// Merge the input file (if any) with the notes flag.
    pub async fn clinical_input(&self) -> Result<ClinicalInput> {
        let mut input = match &self.input {
            Some(path) => {
                let text = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                serde_json::from_str::<ClinicalInput>(&text)
                    .with_context(|| format!("Invalid clinical input in {}", path.display()))?
            }
            None => ClinicalInput::default(),
        };
        if let Some(notes) = &self.notes {
            input.notes.clone_from(notes);
        }
        input.medications.extend(self.medications.iter().cloned());
        if !input.has_notes() {
            anyhow::bail!("No clinical notes given; pass --notes or an --input file with notes");
        }
        Ok(input)
    }
}

/// Configured services for one CLI invocation
pub struct Runtime {
    pub config: Config,
    pub registry: Arc<SessionRegistry>,
    _logger: LoggerImpl,
}

impl Runtime {
    /// Load configuration from `root`, install logging and wire the HTTP
    /// transports into a session registry.
    pub fn start(root: &Path) -> Result<Self> {
        let config = ConfigLoader::load_from_dir(root)?;
        let logger = LoggerImpl::init(&config.logging)?;

        let transport =
            HttpTransport::new(&config.transport).context("Failed to build HTTP transport")?;
        let streams = HttpStreamTransport::new(&config.transport)
            .context("Failed to build stream transport")?;
        let registry = SessionRegistry::new(
            &config,
            Arc::new(transport),
            Arc::new(streams),
            Arc::new(ClinicalPayloadBuilder::new()),
        );

        Ok(Self {
            config,
            registry: Arc::new(registry),
            _logger: logger,
        })
    }
}
