use crate::context::OperationContext;
use crate::error::Result;
use crate::operation::single::{CommandVariant, SingleCommand};
use crate::operation::ProviderOperation;
use crate::options::{LocalOption, LocalOptions};
use crate::resource::ResourceMapping;
use crate::session::CommandKind;
use crate::tag::{Tag, TagKind};

/// Options for bringing local resources up to date
#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    /// Update to this tag and make it sticky; HEAD clears sticky tags
    pub tag: Option<Tag>,
    /// Drop sticky tags and dates (`-A`)
    pub clear_sticky: bool,
    /// Create folders that exist only on the server (`-d`)
    pub create_directories: bool,
    /// Overrides `prune_empty_directories` from the configuration (`-P`)
    pub prune_empty_directories: Option<bool>,
}

impl UpdateOptions {
    pub fn to_tag(tag: Tag) -> Self {
        Self {
            tag: Some(tag),
            ..Self::default()
        }
    }

    pub(crate) fn local_options(&self, prune_default: bool) -> Result<LocalOptions> {
        let mut local = LocalOptions::new();
        if self.prune_empty_directories.unwrap_or(prune_default) {
            local.add(LocalOption::new(LocalOption::PRUNE_EMPTY_DIRECTORIES));
        }
        if self.create_directories {
            local.add(LocalOption::new(LocalOption::BUILD_DIRECTORIES));
        }
        match &self.tag {
            Some(tag) if tag.kind() == TagKind::Head => {
                local.add(LocalOption::new(LocalOption::CLEAR_STICKY));
            }
            Some(tag) => {
                tag.validate()?;
                local.add(LocalOption::tag(tag)?);
            }
            None => {}
        }
        if self.clear_sticky {
            local.add(LocalOption::new(LocalOption::CLEAR_STICKY));
        }
        Ok(local)
    }
}

/// Update the selected resources from the repository
pub fn update(
    context: OperationContext,
    mappings: Vec<ResourceMapping>,
    options: UpdateOptions,
) -> Result<ProviderOperation<SingleCommand>> {
    let local = options.local_options(context.config.prune_empty_directories)?;
    let variant = CommandVariant::new("Update", CommandKind::Update).with_options(local);
    Ok(ProviderOperation::new(context, mappings, SingleCommand::new(variant)))
}
