use crate::context::OperationContext;
use crate::operation::single::{CommandVariant, SingleCommand};
use crate::operation::ProviderOperation;
use crate::options::{LocalOption, LocalOptions};
use crate::resource::ResourceMapping;
use crate::session::CommandKind;

/// Options for committing outgoing changes
#[derive(Debug, Clone, Default)]
pub struct CommitOptions {
    /// Log message; sent as an empty message when missing
    pub message: Option<String>,
    /// Commit unchanged files too, creating new revisions (`-f`)
    pub force: bool,
}

/// Commit the selected resources, one `ci` per pass
pub fn commit(
    context: OperationContext,
    mappings: Vec<ResourceMapping>,
    options: CommitOptions,
) -> ProviderOperation<SingleCommand> {
    let mut local = LocalOptions::new().with(LocalOption::message(options.message.as_deref()));
    if options.force {
        local.add(LocalOption::new("-f"));
    }
    let variant = CommandVariant::new("Commit", CommandKind::Commit)
        .with_options(local)
        .server_modification();
    ProviderOperation::new(context, mappings, SingleCommand::new(variant))
}
