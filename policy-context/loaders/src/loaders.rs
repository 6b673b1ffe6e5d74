//! Entry loaders, one per context entry source.

mod api_call;
mod config_map;
mod image_data;
mod variable;

pub use self::{
    api_call::ApiCallLoader, config_map::ConfigMapLoader, image_data::ImageDataLoader,
    variable::VariableLoader,
};
use policy_context_core::{LoadError, QueryError};

/// Tests whether a load failed because a nested load was cancelled.
pub(crate) fn is_cancelled(error: &anyhow::Error) -> bool {
    error.chain().any(|e| {
        if let Some(QueryError::Load(e)) = e.downcast_ref::<QueryError>() {
            return e.is_cancelled();
        }
        e.downcast_ref::<LoadError>()
            .is_some_and(LoadError::is_cancelled)
    })
}
