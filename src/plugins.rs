//! Name-keyed factories for configurable extensions
//!
//! Configuration names receivers and after-action tasks by string. They are
//! resolved here, once, when the configuration is loaded. Unknown names are
//! logged and skipped so the rest of the configuration still loads.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::archive::{CompressIndexHandler, CompressIndexTask};
use crate::error::Result;
use crate::events::EventReceiver;
use crate::location::{IndexLocation, LocationRegistry};

/// Plugin name of the archive receiver and task
pub const COMPRESS_INDEX: &str = "compress_index";

/// Work run by an update job after it finished indexing
pub trait AfterActionTask: Send + Sync {
    fn name(&self) -> &str;

    fn execute(&self, location: &Arc<IndexLocation>, cancel: &CancellationToken) -> Result<()>;
}

/// What a receiver needs to know about the index it was configured for
#[derive(Debug, Clone)]
pub struct ReceiverContext {
    pub index_name: String,
    pub locations: Arc<LocationRegistry>,
    pub max_temp_age: Duration,
}

#[derive(Debug, Clone)]
pub struct TaskContext {
    pub max_temp_age: Duration,
}

pub fn receiver_factory(name: &str, context: &ReceiverContext) -> Option<Arc<dyn EventReceiver>> {
    match name {
        COMPRESS_INDEX => Some(Arc::new(CompressIndexHandler::new(
            context.index_name.clone(),
            context.locations.clone(),
            context.max_temp_age,
        ))),
        _ => None,
    }
}

pub fn task_factory(name: &str, context: &TaskContext) -> Option<Arc<dyn AfterActionTask>> {
    match name {
        COMPRESS_INDEX => Some(Arc::new(CompressIndexTask::new(context.max_temp_age))),
        _ => None,
    }
}

/// Resolve every configured receiver name, skipping unknown ones
pub fn build_receivers(names: &[String], context: &ReceiverContext) -> Vec<Arc<dyn EventReceiver>> {
    names
        .iter()
        .filter_map(|name| {
            let receiver = receiver_factory(name, context);
            if receiver.is_none() {
                tracing::error!(
                    "Invalid configuration for index {}: unknown event receiver '{}'",
                    context.index_name,
                    name
                );
            }
            receiver
        })
        .collect()
}

/// Resolve every configured task name, skipping unknown ones
pub fn build_tasks(names: &[String], context: &TaskContext) -> Vec<Arc<dyn AfterActionTask>> {
    names
        .iter()
        .filter_map(|name| {
            let task = task_factory(name, context);
            if task.is_none() {
                tracing::error!("Invalid configuration: unknown after-action task '{}'", name);
            }
            task
        })
        .collect()
}
