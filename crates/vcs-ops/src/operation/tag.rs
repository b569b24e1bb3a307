use std::sync::Arc;

use crate::context::OperationContext;
use crate::error::{Result, VcsError};
use crate::operation::single::{CommandVariant, PassSteps, SingleCommand};
use crate::operation::ProviderOperation;
use crate::options::{LocalOption, LocalOptions};
use crate::provider::RepositoryProvider;
use crate::resource::ResourceMapping;
use crate::result::ReportablePolicy;
use crate::session::CommandKind;
use crate::status::{StatusCode, StatusRef};
use crate::tag::{Tag, TagKind};

/// What a tag operation does with the tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TagAction {
    #[default]
    Create,
    /// Move an existing tag onto the selected revisions (`-F`)
    Move,
    /// Remove the tag from the selected files (`-d`)
    Delete,
}

#[derive(Debug, Clone)]
pub struct TagOptions {
    pub tag: Tag,
    pub action: TagAction,
}

impl TagOptions {
    pub fn create(tag: Tag) -> Self {
        Self {
            tag,
            action: TagAction::Create,
        }
    }

    fn local_options(&self) -> Result<LocalOptions> {
        match self.tag.kind() {
            TagKind::Branch | TagKind::Version => self.tag.validate()?,
            TagKind::Date | TagKind::Head => {
                return Err(VcsError::Validation(format!(
                    "Cannot tag with '{}'; only branch and version tags can be applied",
                    self.tag
                )));
            }
        }
        let mut local = LocalOptions::new();
        match self.action {
            TagAction::Create => {}
            TagAction::Move => local.add(LocalOption::new(LocalOption::FORCE_REASSIGNMENT)),
            TagAction::Delete => local.add(LocalOption::new(LocalOption::DELETE_TAG)),
        }
        if self.tag.kind() == TagKind::Branch && self.action != TagAction::Delete {
            local.add(LocalOption::new(LocalOption::BRANCH_TAG));
        }
        Ok(local)
    }
}

/// Broadcasts tag changes once a provider has been tagged
pub struct TagSteps {
    options: TagOptions,
}

impl PassSteps for TagSteps {
    fn provider_finished(
        &mut self,
        context: &OperationContext,
        provider: &Arc<RepositoryProvider>,
        status: &StatusRef,
    ) -> Result<()> {
        if status.is_error() {
            return Ok(());
        }
        let tag = std::slice::from_ref(&self.options.tag);
        match self.options.action {
            TagAction::Create | TagAction::Move => context.tags.notify(provider.project(), tag, &[]),
            TagAction::Delete => context.tags.notify(provider.project(), &[], tag),
        }
        Ok(())
    }
}

/// Tag the selected resources.
///
/// An existing tag of the same name is reported to the caller.
pub fn tag(
    context: OperationContext,
    mappings: Vec<ResourceMapping>,
    options: TagOptions,
) -> Result<ProviderOperation<SingleCommand<TagSteps>>> {
    let local = options.local_options()?;
    let variant = CommandVariant::new("Tag", CommandKind::Tag)
        .with_options(local)
        .with_operands(vec![options.tag.name().to_string()])
        .server_modification()
        .with_reportable(ReportablePolicy::default().with_code(StatusCode::TAG_ALREADY_EXISTS));
    Ok(ProviderOperation::new(
        context,
        mappings,
        SingleCommand::with_steps(variant, TagSteps { options }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_sets() {
        let create = TagOptions::create(Tag::version("v1")).local_options().unwrap();
        assert!(create.is_empty());

        let moved = TagOptions {
            tag: Tag::version("v1"),
            action: TagAction::Move,
        };
        assert_eq!(moved.local_options().unwrap().to_strings(), vec!["-F"]);

        let branch = TagOptions::create(Tag::branch("b1")).local_options().unwrap();
        assert_eq!(branch.to_strings(), vec!["-b"]);

        let deleted = TagOptions {
            tag: Tag::version("v1"),
            action: TagAction::Delete,
        };
        assert_eq!(deleted.local_options().unwrap().to_strings(), vec!["-d"]);
    }

    #[test]
    fn test_date_and_head_cannot_be_applied() {
        assert!(TagOptions::create(Tag::head()).local_options().is_err());
        assert!(TagOptions::create(Tag::date("01 Jan 2024 00:00:00 -0000"))
            .local_options()
            .is_err());
        assert!(TagOptions::create(Tag::version("bad name")).local_options().is_err());
    }
}
