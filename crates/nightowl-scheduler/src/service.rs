use std::sync::Arc;

use nightowl_rpc::{ExceptionPayload, MethodRegistry, ParamError, Params};
use serde_json::{Map, Value};

use crate::engine::Scheduler;
use crate::trigger::TriggerSpec;
use crate::types::{JobChanges, NewJob};

/// Job-control methods exposed over the RPC endpoint.
///
/// | Method           | Positional                               | Keyword-only       |
/// |------------------|------------------------------------------|--------------------|
/// | `get_job`        | `id`                                     |                    |
/// | `get_jobs`       | `store`                                  |                    |
/// | `add_job`        | `entry_point, args, kwargs, trigger`     | `id, name, store`, trigger fields |
/// | `modify_job`     | `id, store`                              | changes            |
/// | `reschedule_job` | `id, store, trigger`                     | trigger fields     |
/// | `pause_job`      | `id, store`                              |                    |
/// | `resume_job`     | `id, store`                              |                    |
/// | `remove_job`     | `id, store`                              |                    |
pub fn methods(scheduler: Arc<Scheduler>) -> MethodRegistry {
    let mut registry = MethodRegistry::new();

    let s = scheduler.clone();
    registry.register("get_job", move |mut p: Params| {
        let id: String = p.take(0, "id")?;
        Ok::<_, ExceptionPayload>(s.get_job(&id)?)
    });

    let s = scheduler.clone();
    registry.register("get_jobs", move |mut p: Params| {
        let store: Option<String> = p.take_opt(0, "store")?;
        Ok::<_, ExceptionPayload>(s.get_jobs(store.as_deref())?)
    });

    let s = scheduler.clone();
    registry.register("add_job", move |mut p: Params| {
        let entry_point: String = p.take(0, "entry_point")?;
        let args: Option<Vec<Value>> = p.take_opt(1, "args")?;
        let kwargs: Option<Map<String, Value>> = p.take_opt(2, "kwargs")?;
        let kind: String = p.take(3, "trigger")?;
        let id: Option<String> = p.take_kw("id")?;
        let name: Option<String> = p.take_kw("name")?;
        let store: Option<String> = p.take_kw("store")?;
        let trigger = trigger_spec(kind, p.into_named())?;

        let new = NewJob {
            id,
            name,
            entry_point,
            args: args.unwrap_or_default(),
            kwargs: kwargs.unwrap_or_default(),
            trigger,
        };
        Ok::<_, ExceptionPayload>(s.add_job(new, store.as_deref())?)
    });

    let s = scheduler.clone();
    registry.register("modify_job", move |mut p: Params| {
        let id: String = p.take(0, "id")?;
        let store: Option<String> = p.take_opt(1, "store")?;
        let changes: JobChanges = p.rest_as("changes")?;
        Ok::<_, ExceptionPayload>(s.modify_job(&id, store.as_deref(), changes)?)
    });

    let s = scheduler.clone();
    registry.register("reschedule_job", move |mut p: Params| {
        let id: String = p.take(0, "id")?;
        let store: Option<String> = p.take_opt(1, "store")?;
        let kind: String = p.take(2, "trigger")?;
        let trigger = trigger_spec(kind, p.into_named())?;
        Ok::<_, ExceptionPayload>(s.reschedule_job(&id, store.as_deref(), trigger)?)
    });

    let s = scheduler.clone();
    registry.register("pause_job", move |mut p: Params| {
        let id: String = p.take(0, "id")?;
        let store: Option<String> = p.take_opt(1, "store")?;
        Ok::<_, ExceptionPayload>(s.pause_job(&id, store.as_deref())?)
    });

    let s = scheduler.clone();
    registry.register("resume_job", move |mut p: Params| {
        let id: String = p.take(0, "id")?;
        let store: Option<String> = p.take_opt(1, "store")?;
        Ok::<_, ExceptionPayload>(s.resume_job(&id, store.as_deref())?)
    });

    let s = scheduler;
    registry.register("remove_job", move |mut p: Params| {
        let id: String = p.take(0, "id")?;
        let store: Option<String> = p.take_opt(1, "store")?;
        Ok::<_, ExceptionPayload>(s.remove_job(&id, store.as_deref())?)
    });

    registry
}

/// Reassemble the tagged trigger descriptor from its kind and the leftover
/// keyword arguments.
fn trigger_spec(kind: String, mut fields: Map<String, Value>) -> Result<TriggerSpec, ParamError> {
    fields.insert("trigger".to_string(), Value::String(kind));
    serde_json::from_value(Value::Object(fields)).map_err(|e| ParamError::Invalid {
        name: "trigger".to_string(),
        reason: e.to_string(),
    })
}
