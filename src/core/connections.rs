use crate::adapters::catmaid::CatmaidInstance;
use crate::config::connection::{ConnectionConfig, ProjectSettings};
use crate::domain::model::ProjectId;
use crate::domain::ports::CatmaidApi;
use crate::utils::error::{AddonsError, Result};
use crate::utils::validation::Validate;

/// Which of the two open projects an operation reads from or writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProjectSelector {
    #[default]
    Source,
    Target,
}

impl std::str::FromStr for ProjectSelector {
    type Err = AddonsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "source" => Ok(Self::Source),
            "target" => Ok(Self::Target),
            other => Err(AddonsError::validation(format!(
                "unknown project '{}', expected source or target",
                other
            ))),
        }
    }
}

/// The source project and, if configured, the target project.
pub struct Connections<A: CatmaidApi = CatmaidInstance> {
    pub source: A,
    pub target: Option<A>,
}

impl Connections<CatmaidInstance> {
    /// Open both projects from a configuration and check that each API key
    /// can see its project.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        config.validate()?;
        let source = open_instance(config, &config.source()?)?;
        verify_access(config, &source, "Source").await?;

        let target = match config.target()? {
            Some(settings) => {
                let target = open_instance(config, &settings)?;
                verify_access(config, &target, "Target").await?;
                Some(target)
            }
            None => None,
        };
        Ok(Self { source, target })
    }

    /// `ConnectionConfig::load` followed by `connect`.
    pub async fn connect_to_catmaid(name_or_path: &str) -> Result<Self> {
        tracing::info!("🔌 Connecting to catmaid...");
        let config = ConnectionConfig::load(name_or_path)?;
        Self::connect(&config).await
    }
}

fn open_instance(config: &ConnectionConfig, settings: &ProjectSettings) -> Result<CatmaidInstance> {
    let mut instance =
        CatmaidInstance::new(&settings.url, &settings.api_key, settings.project_id);
    if let Some((user, password)) = config.http_auth() {
        instance = instance.with_http_auth(user, password);
    }
    if let Some(seconds) = config.request_timeout_seconds {
        instance = instance.with_timeout(seconds)?;
    }
    Ok(instance)
}

async fn verify_access<A: CatmaidApi>(config: &ConnectionConfig, api: &A, label: &str) -> Result<()> {
    match api.project_title().await {
        Ok(title) => {
            tracing::info!("{} project: {} {} {}", label, api.server(), api.project_id(), title);
            Ok(())
        }
        Err(e) => {
            tracing::debug!("Project lookup failed: {}", e);
            Err(AddonsError::AuthError {
                message: format!(
                    "The API key provided in {} does not appear to have access to project {}. \
                     Please provide a different API key or project ID.",
                    config.display_name(),
                    api.project_id()
                ),
            })
        }
    }
}

impl<A: CatmaidApi> Connections<A> {
    pub fn new(source: A, target: Option<A>) -> Self {
        Self { source, target }
    }

    pub fn target(&self) -> Result<&A> {
        self.target
            .as_ref()
            .ok_or_else(|| AddonsError::config("Target project not defined."))
    }

    pub fn project(&self, which: ProjectSelector) -> Result<&A> {
        match which {
            ProjectSelector::Source => Ok(&self.source),
            ProjectSelector::Target => self.target(),
        }
    }

    pub fn get_source_project_id(&self) -> ProjectId {
        self.source.project_id()
    }

    pub fn set_source_project_id(&mut self, project_id: ProjectId) -> ProjectId {
        self.source.set_project_id(project_id);
        self.source.clear_cache();
        self.get_source_project_id()
    }

    /// `None` when there is no target project.
    pub fn get_target_project_id(&self) -> Option<ProjectId> {
        match &self.target {
            Some(target) => Some(target.project_id()),
            None => {
                tracing::warn!("Target project not defined.");
                None
            }
        }
    }

    pub fn set_target_project_id(&mut self, project_id: ProjectId) -> Option<ProjectId> {
        if let Some(target) = self.target.as_mut() {
            target.set_project_id(project_id);
            target.clear_cache();
        }
        self.get_target_project_id()
    }

    /// Target defaults to the same project as the source.
    pub fn set_project_ids(
        &mut self,
        source_id: ProjectId,
        target_id: Option<ProjectId>,
    ) -> (ProjectId, Option<ProjectId>) {
        let source = self.set_source_project_id(source_id);
        let target = self.set_target_project_id(target_id.unwrap_or(source_id));
        (source, target)
    }

    pub fn get_project_ids(&self) -> (ProjectId, Option<ProjectId>) {
        (self.get_source_project_id(), self.get_target_project_id())
    }

    pub fn clear_cache(&self) {
        self.source.clear_cache();
        if let Some(target) = &self.target {
            target.clear_cache();
        }
    }
}
