use std::time::Duration;

use async_trait::async_trait;
use nightowl_core::config::SchedulerConfig;
use nightowl_rpc::{ExceptionRegistry, Params, RpcClient, RpcError};
use serde::de::DeserializeOwned;

use crate::control::{ControlError, ControlResult, JobControl};
use crate::error::SchedulerError;
use crate::trigger::TriggerSpec;
use crate::types::{JobChanges, JobInfo, NewJob};

/// [`JobControl`] over RPC to a scheduler service in another process.
///
/// Scheduler errors raised remotely come back as
/// [`ControlError::Scheduler`], so `is_not_found` works the same as against
/// an in-process scheduler.
pub struct SchedulerClient {
    rpc: RpcClient,
}

impl SchedulerClient {
    pub fn new(
        url: impl Into<String>,
        timeout: Duration,
        connect_timeout: Duration,
    ) -> nightowl_rpc::Result<Self> {
        let mut exceptions = ExceptionRegistry::new();
        exceptions.register::<SchedulerError>();
        Ok(Self {
            rpc: RpcClient::new(url, timeout, connect_timeout, exceptions)?,
        })
    }

    pub fn from_config(config: &SchedulerConfig) -> nightowl_rpc::Result<Self> {
        Self::new(
            config.url.clone(),
            Duration::from_millis(config.rpc_timeout_ms),
            Duration::from_millis(config.connect_timeout_ms),
        )
    }

    pub fn url(&self) -> &str {
        self.rpc.url()
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Params) -> ControlResult<T> {
        self.rpc.call_as(method, params).await.map_err(lift)
    }
}

/// Pull a rebuilt [`SchedulerError`] out of a remote failure.
fn lift(err: RpcError) -> ControlError {
    match err {
        RpcError::Remote(remote) => match remote.downcast::<SchedulerError>() {
            Ok(e) => ControlError::Scheduler(e),
            Err(remote) => ControlError::Rpc(RpcError::Remote(remote)),
        },
        other => ControlError::Rpc(other),
    }
}

#[async_trait]
impl JobControl for SchedulerClient {
    async fn get_job(&self, id: &str) -> ControlResult<Option<JobInfo>> {
        self.call("get_job", Params::new().arg(id)).await
    }

    async fn get_jobs(&self, store: Option<&str>) -> ControlResult<Vec<JobInfo>> {
        self.call("get_jobs", Params::new().arg(store)).await
    }

    async fn add_job(&self, job: NewJob, store: Option<&str>) -> ControlResult<String> {
        let params = Params::new()
            .arg(job.entry_point)
            .arg(job.args)
            .arg(job.kwargs)
            .named("id", job.id)
            .named("name", job.name)
            .named("store", store)
            .extend_named(&job.trigger);
        self.call("add_job", params).await
    }

    async fn modify_job(&self, id: &str, changes: JobChanges) -> ControlResult<String> {
        self.call("modify_job", Params::new().arg(id).extend_named(&changes))
            .await
    }

    async fn reschedule_job(&self, id: &str, trigger: TriggerSpec) -> ControlResult<String> {
        let params = Params::new().arg(id).extend_named(&trigger);
        self.call("reschedule_job", params).await
    }

    async fn pause_job(&self, id: &str) -> ControlResult<String> {
        self.call("pause_job", Params::new().arg(id)).await
    }

    async fn resume_job(&self, id: &str) -> ControlResult<String> {
        self.call("resume_job", Params::new().arg(id)).await
    }

    async fn remove_job(&self, id: &str) -> ControlResult<()> {
        self.call("remove_job", Params::new().arg(id)).await
    }
}
